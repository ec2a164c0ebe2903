//! # ShieldGate - Request Validation and Access-Control Gateway
//!
//! Sits in front of an API's business handlers and decides, per request,
//! whether it may reach them. Malicious or malformed input is rejected before
//! application code sees it, callers are rate limited, authenticated and
//! authorized, and every decision lands in an audit trail. Callers only ever
//! see a category and a fixed message.
//!
//! ## Features
//!
//! - **Threat detection**: two-tier regex library, JSON structure checks and
//!   entropy/encoding/padding heuristics, aggregated into one severity
//! - **Rate limiting**: per-client sliding window, plus a burst signal
//! - **Authentication**: opaque API keys, method-aware permissions, failure
//!   lockout
//! - **Audit**: structured `tracing` events on the `audit` target
//! - **Hardening**: fixed security header set on every response
//!
//! ## Pipeline
//!
//! ```text
//! request
//!   │ identity (X-Forwarded-For → peer → "unknown")
//!   ├─ blocklist ──────────────────────────── 403
//!   ├─ rate limit ─────────────────────────── 429
//!   ├─ size ───────────────────────────────── 413
//!   ├─ lockout → key → permission ─────────── 429 / 401 / 403
//!   ├─ body (depth cap, leaf scan) ────────── 400
//!   ├─ handler
//!   ├─ header hardening
//!   └─ audit
//! ```
//!
//! ## Severity
//!
//! | Severity   | Meaning                                   |
//! |------------|-------------------------------------------|
//! | `none`     | Nothing detected                          |
//! | `low`      | Weak indicator                            |
//! | `medium`   | Injection-shaped input                    |
//! | `high`     | Blocked by default                        |
//! | `critical` | System access, escape or code execution   |
//!
//! Aggregation takes the maximum; severity never decreases across stages.
//!
//! ## Quick Start
//!
//! ### Field Validation
//!
//! ```rust,ignore
//! use shieldgate::security::ThreatDetector;
//!
//! let detector = ThreatDetector::new();
//!
//! let result = detector.inspect("hello <b>world</b>", "comment", 1000);
//! println!("{} -> {}", result.severity(), result.sanitized_value());
//!
//! // Fails closed
//! assert!(detector.validate_strict("'; DROP TABLE users; --", "name", 100).is_err());
//! ```
//!
//! ### Serving
//!
//! ```rust,ignore
//! use shieldgate::{server::Server, Config};
//!
//! let server = Server::new(Config::load(None)?);
//! server.run().await?;
//! ```
//!
//! ## Modules
//!
//! - [`security`]: Threat detector and pattern library
//! - [`ratelimit`]: Sliding-window rate limiter
//! - [`auth`]: API keys, permissions, lockout
//! - [`audit`]: Security event emission
//! - [`gateway`]: Request pipeline and axum middleware
//! - [`server`]: Demo HTTP API behind the gateway
//! - [`config`]: Configuration management
//! - [`error`]: Error types and result aliases

pub mod audit;
pub mod auth;
pub mod config;
pub mod error;
pub mod gateway;
pub mod ratelimit;
pub mod security;
pub mod server;

// Re-exports for convenience
pub use audit::{AuditEvent, AuditLogger, AuditSeverity};
pub use auth::{ApiKeyRecord, AuthManager, Permission};
pub use config::Config;
pub use error::{ErrorCategory, GatewayError, Result};
pub use gateway::{GatewayRequest, GatewayResponse, SecurityGateway};
pub use ratelimit::RateLimiter;
pub use security::{Severity, ThreatCategory, ThreatDetector, ValidationResult};
pub use server::{AppState, Server};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
