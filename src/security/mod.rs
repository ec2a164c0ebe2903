//! Threat detection for gateway input.
//!
//! Multi-layer scanning of request fields and bodies: a two-tier regex
//! library, JSON structure checks and statistical heuristics, aggregated into
//! one [`Severity`].
//!
//! # Severity Table
//!
//! | Severity   | Categories                                                        |
//! |------------|-------------------------------------------------------------------|
//! | `critical` | container_escape, privilege_escalation, code_execution, system_access, credential_theft |
//! | `high`     | command_injection, prompt_injection, deserialization_attack, supply_chain_attack, ssrf, metadata_access, malicious_structure |
//! | `medium`   | sql_injection, xss, template_injection, path_traversal, nosql_injection, jwt_manipulation, excessive_length |
//! | `low`      | everything else                                                   |
//!
//! Heuristics raise the floor: `pattern_bombing` forces high, the
//! entropy/encoding/length checks force at least medium.
//!
//! # Detection Layers
//!
//! ## Pattern-Based
//!
//! Compiled once, case-insensitive and multiline. Each match is classified
//! by keyword precedence over the pattern source (see
//! [`patterns::classify_pattern`]).
//!
//! ## Structural
//!
//! JSON-shaped values are parsed; prototype-pollution markers and nesting
//! beyond `max_json_depth` are flagged. Traversal is iterative.
//!
//! ## Statistical
//!
//! | Check                 | Trigger                                           |
//! |-----------------------|---------------------------------------------------|
//! | `obfuscated_payload`  | ≥20 chars with Shannon entropy > 4.5              |
//! | `pattern_bombing`     | a dangerous substring repeated more than 5 times  |
//! | `encoding_obfuscation`| base64 run > 50, hex density > 0.8, > 5 `%XX`     |
//! | `length_attack`       | ≥90% of max length with a 100-char repeated run   |
//!
//! # Usage
//!
//! ```rust,ignore
//! use shieldgate::security::{Severity, ThreatDetector};
//!
//! let detector = ThreatDetector::new();
//!
//! // Inspect never fails
//! let result = detector.inspect("../../etc/passwd", "path", 1024);
//! assert_eq!(result.severity(), Severity::Critical);
//!
//! // Strict validation fails closed
//! assert!(detector.validate_strict("<script>", "bio", 1024).is_err());
//! ```

mod detector;
pub mod heuristics;
pub mod patterns;
pub mod structure;

pub use detector::{
    html_escape, ThreatDetector, ValidationResult, MAX_DOMAINS, MAX_DOMAIN_LENGTH,
    MAX_ROLE_LENGTH, PRIVILEGE_KEYWORDS,
};
pub use patterns::{Severity, ThreatCategory, ThreatPattern, BASE_PATTERNS, EXTENDED_PATTERNS};

/// Pattern library version
pub const SECURITY_VERSION: &str = "1.0.0";
