//! Threat patterns for rule-based detection.
//!
//! Two tiers of signatures:
//! - Base: high-confidence classics (SQL, script, path, command, code,
//!   prototype pollution)
//! - Extended: newer attack classes (LLM prompt injection, container and
//!   orchestrator escape, supply chain, deserialization gadgets, template and
//!   log injection, GraphQL, SSRF and cloud metadata, JWT, NoSQL)
//!
//! Patterns do not carry a category. A match is classified by
//! [`classify_pattern`], which tests the pattern source against an ordered
//! keyword table where the first matching rule wins.

use lazy_static::lazy_static;
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};

/// Ordered threat strength. Aggregation always takes the maximum.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Nothing detected
    #[default]
    None,
    /// Weak signal
    Low,
    /// Suspicious
    Medium,
    /// Likely attack
    High,
    /// Attack with direct system impact
    Critical,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::None => write!(f, "none"),
            Severity::Low => write!(f, "low"),
            Severity::Medium => write!(f, "medium"),
            Severity::High => write!(f, "high"),
            Severity::Critical => write!(f, "critical"),
        }
    }
}

impl std::str::FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "none" => Ok(Severity::None),
            "low" => Ok(Severity::Low),
            "medium" => Ok(Severity::Medium),
            "high" => Ok(Severity::High),
            "critical" => Ok(Severity::Critical),
            other => Err(format!("unknown severity: {other}")),
        }
    }
}

/// Threat categories
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThreatCategory {
    /// LLM instruction override or role hijack
    PromptInjection,
    /// Container runtime or orchestrator breakout
    ContainerEscape,
    /// Remote package or install-script execution
    SupplyChainAttack,
    /// Serialized object gadgets
    DeserializationAttack,
    /// Server-side template or log-lookup injection
    TemplateInjection,
    /// GraphQL introspection or destructive queries
    GraphqlInjection,
    /// Server-side request forgery
    Ssrf,
    /// Forged or unsigned JWT structures
    JwtManipulation,
    /// MongoDB-style operator injection
    NosqlInjection,
    /// Cloud instance metadata endpoints
    MetadataAccess,
    /// SQL injection
    SqlInjection,
    /// Shell command injection
    CommandInjection,
    /// Directory traversal
    PathTraversal,
    /// Script injection
    Xss,
    /// Interpreter-level code execution
    CodeExecution,
    /// `__proto__` / constructor pollution
    PrototypePollution,
    /// sudo / setuid escalation
    PrivilegeEscalation,
    /// Direct access to host system files or shells
    SystemAccess,
    /// Cloud or SSH credential harvesting
    CredentialTheft,
    /// Matched a signature with no specific class
    GenericInjection,
    /// High Shannon entropy
    ObfuscatedPayload,
    /// Dangerous substrings repeated many times
    PatternBombing,
    /// Long base64/hex/percent-encoded runs
    EncodingObfuscation,
    /// Near-limit input padded with repeated bytes
    LengthAttack,
    /// Input longer than the allowed maximum
    ExcessiveLength,
    /// JSON nesting beyond the configured depth
    MaliciousStructure,
}

impl ThreatCategory {
    /// Fixed category severity.
    pub fn severity(self) -> Severity {
        match self {
            ThreatCategory::ContainerEscape
            | ThreatCategory::PrivilegeEscalation
            | ThreatCategory::CodeExecution
            | ThreatCategory::SystemAccess
            | ThreatCategory::CredentialTheft => Severity::Critical,
            ThreatCategory::CommandInjection
            | ThreatCategory::PromptInjection
            | ThreatCategory::DeserializationAttack
            | ThreatCategory::SupplyChainAttack
            | ThreatCategory::Ssrf
            | ThreatCategory::MetadataAccess
            | ThreatCategory::MaliciousStructure => Severity::High,
            ThreatCategory::SqlInjection
            | ThreatCategory::Xss
            | ThreatCategory::TemplateInjection
            | ThreatCategory::PathTraversal
            | ThreatCategory::NosqlInjection
            | ThreatCategory::JwtManipulation
            | ThreatCategory::ExcessiveLength => Severity::Medium,
            _ => Severity::Low,
        }
    }

    /// Whether this tag comes from a statistical check rather than a pattern.
    pub fn is_heuristic(self) -> bool {
        matches!(
            self,
            ThreatCategory::ObfuscatedPayload
                | ThreatCategory::PatternBombing
                | ThreatCategory::EncodingObfuscation
                | ThreatCategory::LengthAttack
        )
    }

    /// Stable snake_case name.
    pub fn as_str(self) -> &'static str {
        match self {
            ThreatCategory::PromptInjection => "prompt_injection",
            ThreatCategory::ContainerEscape => "container_escape",
            ThreatCategory::SupplyChainAttack => "supply_chain_attack",
            ThreatCategory::DeserializationAttack => "deserialization_attack",
            ThreatCategory::TemplateInjection => "template_injection",
            ThreatCategory::GraphqlInjection => "graphql_injection",
            ThreatCategory::Ssrf => "ssrf",
            ThreatCategory::JwtManipulation => "jwt_manipulation",
            ThreatCategory::NosqlInjection => "nosql_injection",
            ThreatCategory::MetadataAccess => "metadata_access",
            ThreatCategory::SqlInjection => "sql_injection",
            ThreatCategory::CommandInjection => "command_injection",
            ThreatCategory::PathTraversal => "path_traversal",
            ThreatCategory::Xss => "xss",
            ThreatCategory::CodeExecution => "code_execution",
            ThreatCategory::PrototypePollution => "prototype_pollution",
            ThreatCategory::PrivilegeEscalation => "privilege_escalation",
            ThreatCategory::SystemAccess => "system_access",
            ThreatCategory::CredentialTheft => "credential_theft",
            ThreatCategory::GenericInjection => "generic_injection",
            ThreatCategory::ObfuscatedPayload => "obfuscated_payload",
            ThreatCategory::PatternBombing => "pattern_bombing",
            ThreatCategory::EncodingObfuscation => "encoding_obfuscation",
            ThreatCategory::LengthAttack => "length_attack",
            ThreatCategory::ExcessiveLength => "excessive_length",
            ThreatCategory::MaliciousStructure => "malicious_structure",
        }
    }
}

impl std::fmt::Display for ThreatCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Signature tier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatternTier {
    /// Classic high-confidence signatures
    Base,
    /// Newer attack classes
    Extended,
}

/// A threat detection pattern
#[derive(Debug, Clone)]
pub struct ThreatPattern {
    /// Pattern name
    pub name: &'static str,
    /// Regex pattern
    pub pattern: &'static str,
    /// Signature tier
    pub tier: PatternTier,
}

const fn base(name: &'static str, pattern: &'static str) -> ThreatPattern {
    ThreatPattern {
        name,
        pattern,
        tier: PatternTier::Base,
    }
}

const fn extended(name: &'static str, pattern: &'static str) -> ThreatPattern {
    ThreatPattern {
        name,
        pattern,
        tier: PatternTier::Extended,
    }
}

/// High-confidence base signatures
pub static BASE_PATTERNS: &[ThreatPattern] = &[
    base(
        "sql_destructive",
        r";\s*(drop|delete|truncate|alter)\s+(table|database|from)\b",
    ),
    base("sql_union", r"\bunion\s+(all\s+)?select\b"),
    base("sql_tautology", r"'\s*or\s+'?\d+'?\s*=\s*'?\d+"),
    base(
        "sql_time_based",
        r"\b(sleep|benchmark|pg_sleep)\s*\(\s*\d+|waitfor\s+delay\b",
    ),
    base("script_tag", r"<script"),
    base(
        "event_handler",
        r"\bon(error|load|click|mouseover|focus)\s*=",
    ),
    base("javascript_uri", r"javascript\s*:"),
    base("path_traversal", r"\.\./|\.\.\\"),
    base(
        "path_traversal_encoded",
        r"%2e%2e(%2f|%5c|/)|\.\.%2f|%252e%252e",
    ),
    base(
        "command_chain",
        r"[;&|`]\s*(rm|cat|ls|nc|bash|sh|python|perl|whoami|uname)\b",
    ),
    base("rm_recursive", r"\brm\s+-[rf]{1,2}\b"),
    base("command_substitution", r"\$\([^)]*\)"),
    base(
        "code_eval",
        r"\b(eval|exec|system|passthru|shell_exec|popen)\s*\(",
    ),
    base(
        "prototype_pollution",
        r"__proto__|constructor\s*\[|\[\s*.?prototype.?\s*\]",
    ),
];

/// Extended signatures for newer attack classes
pub static EXTENDED_PATTERNS: &[ThreatPattern] = &[
    // LLM prompt injection
    extended(
        "ignore_instructions",
        r"ignore\s+(all\s+)?(previous|prior|above|earlier)\s+(instructions?|prompts?|rules?|directions)",
    ),
    extended(
        "disregard_instructions",
        r"disregard\s+(all\s+)?(previous|prior|your|the)\s+(instructions?|guidelines|rules)",
    ),
    extended(
        "forget_instructions",
        r"forget\s+(everything|all|your)\s+(previous\s+)?(instructions?|rules|training)",
    ),
    extended(
        "role_hijack",
        r"you\s+are\s+now\s+(a|an|in)?\s*(dan|unrestricted|jailbroken|developer\s+mode)",
    ),
    extended(
        "system_prompt_extract",
        r"(reveal|print|show|repeat|output)\s+(me\s+)?(your|the)\s+(system\s*prompt|hidden\s+instructions)",
    ),
    extended(
        "chat_template_tokens",
        r"<\|im_start\|>|\[/?inst\]|<\|(system|assistant)\|>",
    ),
    extended("jailbreak_mode", r"(enable|activate|enter)\s+(dan|god|jailbreak)\s+mode"),
    // Container and orchestrator escape
    extended("docker_privileged", r"docker\s+(run|exec)\b.*--privileged"),
    extended("docker_socket", r"/var/run/docker\.sock"),
    extended("nsenter", r"nsenter\s+(-t|--target|--mount)"),
    extended("proc_self", r"/proc/(self|1)/(environ|cgroup|root|exe|mem)"),
    extended("kubectl_exec", r"kubectl\s+(exec|cp|run|proxy|auth\s+can-i)"),
    extended(
        "k8s_api_path",
        r"/api/v1/namespaces/[^/\s]+/(secrets|pods|serviceaccounts)",
    ),
    extended(
        "k8s_service_account",
        r"/var/run/secrets/kubernetes\.io/serviceaccount",
    ),
    extended("cgroup_release_agent", r"release_agent|notify_on_release"),
    // Supply chain
    extended(
        "pipe_to_shell",
        r"(curl|wget)\s+[^|;\n]*\|\s*(sudo\s+)?(ba|z)?sh\b",
    ),
    extended(
        "npm_remote_install",
        r"npm\s+(install|i|add)\s+\S*(https?://|git\+|file:)",
    ),
    extended(
        "pip_foreign_index",
        r"pip3?\s+install\s+(--index-url|--extra-index-url|-i)\s+https?://",
    ),
    extended(
        "install_script_hook",
        r#""(preinstall|postinstall)"\s*:\s*"[^"]*(node\s+-e|bash|sh\s+-c)"#,
    ),
    // Deserialization gadgets
    extended("java_serialized", r"rO0AB[A-Za-z0-9+/=]{4,}|aced0005"),
    extended("yaml_python_tag", r"!!python/(object|name|module)"),
    extended("pickle_reduce", r"__reduce__|c__builtin__"),
    extended("php_object", r#"O:\d+:"[A-Za-z0-9_\\]+":\d+:\{"#),
    extended(
        "dotnet_type_gadget",
        r#""\$type"\s*:\s*"[^"]*(ObjectDataProvider|WindowsIdentity|System\.Diagnostics\.Process)"#,
    ),
    extended(
        "java_runtime_gadget",
        r"java\.lang\.(Runtime|ProcessBuilder)|javax\.script\.ScriptEngine",
    ),
    // Template and log injection
    extended(
        "jndi_lookup",
        r"\$\{jndi:(ldap|ldaps|rmi|dns|iiop|nis|corba)://",
    ),
    extended("log_lookup", r"\$\{(env|sys|java|lower|upper|date|ctx|main):"),
    extended(
        "jinja_object_access",
        r"\{\{[^}]*(__class__|__globals__|config|self|lipsum|cycler|request)[^}]*\}\}",
    ),
    extended("jinja_arithmetic", r"\{\{\s*\d+\s*\*\s*\d+\s*\}\}"),
    extended("server_page_tag", r"<%[=\-]?[^%]*%>"),
    // GraphQL
    extended("graphql_schema_introspection", r"__schema\s*\{"),
    extended("graphql_type_introspection", r"__type\s*\(\s*name\s*:"),
    extended(
        "graphql_destructive_mutation",
        r"\bmutation\b[^{]*\{[^}]*\b(delete|drop|update|create)[a-z]*\s*\(",
    ),
    // SSRF
    extended(
        "ssrf_loopback",
        r"https?://(localhost|127\.0\.0\.1|0\.0\.0\.0|\[::1?\])",
    ),
    extended("ssrf_scheme", r"\b(file|gopher|dict|tftp)://"),
    extended("ssrf_link_local", r"https?://169\.254\.169\.254"),
    extended(
        "ssrf_private_range",
        r"https?://(10\.\d+|192\.168|172\.(1[6-9]|2\d|3[01]))\.\d+\.\d+",
    ),
    // JWT
    extended(
        "jwt_structure",
        r"eyJ[A-Za-z0-9_-]{10,}\.eyJ[A-Za-z0-9_-]{10,}\.[A-Za-z0-9_-]*",
    ),
    extended("jwt_alg_none", r#""alg"\s*:\s*"none""#),
    extended("jwt_remote_key", r#""(jku|x5u)"\s*:\s*"https?://"#),
    // NoSQL
    extended(
        "nosql_operator",
        r#"\{\s*"?\$(ne|gt|gte|lt|lte|nin|in|regex|exists|where)"?\s*:"#,
    ),
    extended("nosql_query_param", r"\[\$(ne|gt|lt|regex|where)\]\s*="),
    // Cloud metadata
    extended("gcp_metadata", r"metadata\.google\.internal"),
    extended("gcp_metadata_path", r"computeMetadata/v1"),
    extended("aws_metadata_path", r"/latest/(meta-data|user-data|api/token)"),
    extended("alibaba_metadata", r"100\.100\.100\.200"),
    extended("ecs_task_metadata", r"169\.254\.170\.2\b"),
    // Credentials
    extended(
        "credential_files",
        r"\.aws/credentials|\.ssh/id_(rsa|dsa|ecdsa|ed25519)",
    ),
    extended(
        "cloud_secret_names",
        r"aws_secret_access_key|aws_session_token",
    ),
    // Host system access
    extended("sensitive_etc_files", r"/etc/(passwd|shadow|sudoers)\b"),
    extended(
        "windows_shell",
        r"(cmd|powershell)(\.exe)?\s+(/c|-c|-enc|-e|-command)\b",
    ),
    extended("bash_dev_tcp", r"/dev/tcp/"),
    // Privilege escalation
    extended("sudo_shell", r"\bsudo\s+(-s|-i|su\b|bash|sh\b)"),
    extended("setuid_chmod", r"chmod\s+(u?\+s|[2467][0-7]{3})\b"),
    // Code execution
    extended(
        "node_child_process",
        r#"require\s*\(\s*['"]child_process['"]\s*\)"#,
    ),
    extended(
        "python_dynamic_import",
        r#"__import__\s*\(\s*['"](os|subprocess|pty)['"]"#,
    ),
];

/// Ordered classification rules. The first rule with a keyword contained in
/// the normalized pattern source wins, so `169.254` resolves to SSRF before
/// metadata access is ever considered.
static CLASSIFICATION_RULES: &[(&[&str], ThreatCategory)] = &[
    (
        &[
            "ignore",
            "disregard",
            "forget",
            r"you\s+are\s+now",
            r"system\s*prompt",
            "im_start",
            "jailbreak",
        ],
        ThreatCategory::PromptInjection,
    ),
    (
        &[
            "docker",
            "nsenter",
            "/proc/(",
            "kubectl",
            "namespaces",
            "kubernetes",
            "release_agent",
        ],
        ThreatCategory::ContainerEscape,
    ),
    (
        &["curl", r"npm\s", r"pip3?\s+install", "postinstall"],
        ThreatCategory::SupplyChainAttack,
    ),
    (
        &[
            "ro0ab",
            "python/",
            "__reduce__",
            r#"o:\d+:""#,
            "objectdataprovider",
            "java.lang",
        ],
        ThreatCategory::DeserializationAttack,
    ),
    (&["jndi", "${", "{{", "<%"], ThreatCategory::TemplateInjection),
    (
        &["__schema", "__type", "mutation"],
        ThreatCategory::GraphqlInjection,
    ),
    (
        &["localhost", "127.0.0.1", "gopher", "169.254", "192.168"],
        ThreatCategory::Ssrf,
    ),
    (&["eyj", "\"alg\"", "jku"], ThreatCategory::JwtManipulation),
    (&["$(ne|", "$where"], ThreatCategory::NosqlInjection),
    (
        &["metadata", "meta-data", "169.254", "100.100.100.200"],
        ThreatCategory::MetadataAccess,
    ),
    (
        &[".aws/credentials", "aws_secret"],
        ThreatCategory::CredentialTheft,
    ),
    (
        &["/etc/(", "powershell", "/dev/tcp"],
        ThreatCategory::SystemAccess,
    ),
    (&["sudo", "chmod"], ThreatCategory::PrivilegeEscalation),
    (&["__proto__"], ThreatCategory::PrototypePollution),
    (
        &["drop", "union", r"'\s*or\s", "sleep"],
        ThreatCategory::SqlInjection,
    ),
    (&["script", "on(error"], ThreatCategory::Xss),
    (&["../", "%2e%2e"], ThreatCategory::PathTraversal),
    (
        &["eval", "child_process", "__import__"],
        ThreatCategory::CodeExecution,
    ),
    (
        &["[;&|`]", r"rm\s", "$("],
        ThreatCategory::CommandInjection,
    ),
];

/// Lower-case a pattern source and drop backslashes that escape punctuation,
/// so `169\.254` reads as `169.254` while `\s` and `\d` stay intact.
fn normalize_source(source: &str) -> String {
    let mut out = String::with_capacity(source.len());
    let mut chars = source.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '\\' {
            if let Some(&next) = chars.peek() {
                if !next.is_ascii_alphanumeric() {
                    out.push(next);
                    chars.next();
                    continue;
                }
            }
        }
        out.extend(c.to_lowercase());
    }
    out
}

/// Classify a pattern source into a threat category.
pub fn classify_pattern(source: &str) -> ThreatCategory {
    let normalized = normalize_source(source);
    CLASSIFICATION_RULES
        .iter()
        .find(|(keywords, _)| keywords.iter().any(|k| normalized.contains(k)))
        .map_or(ThreatCategory::GenericInjection, |(_, category)| *category)
}

/// A compiled pattern with its precomputed category
pub struct CompiledPattern {
    /// Compiled regex
    pub regex: Regex,
    /// Source pattern
    pub pattern: &'static ThreatPattern,
    /// Category from [`classify_pattern`]
    pub category: ThreatCategory,
}

fn compile(patterns: &'static [ThreatPattern]) -> Vec<CompiledPattern> {
    patterns
        .iter()
        .filter_map(|p| {
            RegexBuilder::new(p.pattern)
                .case_insensitive(true)
                .multi_line(true)
                .build()
                .ok()
                .map(|regex| CompiledPattern {
                    regex,
                    pattern: p,
                    category: classify_pattern(p.pattern),
                })
        })
        .collect()
}

lazy_static! {
    /// Compiled pattern library, base tier first
    pub static ref PATTERN_LIBRARY: Vec<CompiledPattern> = {
        let mut library = compile(BASE_PATTERNS);
        library.extend(compile(EXTENDED_PATTERNS));
        library
    };
}

/// Match content against the full library
pub fn match_patterns(content: &str) -> Vec<&'static CompiledPattern> {
    PATTERN_LIBRARY
        .iter()
        .filter(|p| p.regex.is_match(content))
        .collect()
}
