//! Configuration management.
//!
//! Supports configuration from:
//! - TOML config files
//! - Environment variables (`SHIELDGATE_*`)
//! - CLI arguments (for the `serve` command)
//!
//! Every section defaults independently, so a file only needs the keys it
//! changes.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{GatewayError, Result};
use crate::security::heuristics::DEFAULT_ENTROPY_THRESHOLD;
use crate::security::Severity;

/// Main configuration struct
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// HTTP server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Authentication and lockout
    #[serde(default)]
    pub auth: AuthConfig,

    /// Sliding-window rate limiting
    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    /// Size, depth and detection settings
    #[serde(default)]
    pub validation: ValidationConfig,

    /// Cross-origin settings
    #[serde(default)]
    pub cors: CorsConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let content = std::fs::read_to_string(&path)
            .map_err(|e| GatewayError::Config(format!("Failed to read config file: {e}")))?;

        toml::from_str(&content)
            .map_err(|e| GatewayError::Config(format!("Failed to parse config: {e}")))
    }

    /// Default config file location (`<config_dir>/shieldgate/config.toml`)
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("shieldgate").join("config.toml"))
    }

    /// Load from an explicit path, else the default path if present, then
    /// apply environment overrides and validate.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let base = match path {
            Some(path) => Self::from_file(path)?,
            None => match Self::default_path().filter(|p| p.exists()) {
                Some(path) => Self::from_file(path)?,
                None => Self::default(),
            },
        };

        let config = base.with_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        Self::default().with_env_overrides()
    }

    /// Apply `SHIELDGATE_*` environment variables on top of this config
    pub fn with_env_overrides(mut self) -> Self {
        fn parsed<T: std::str::FromStr>(key: &str) -> Option<T> {
            std::env::var(key).ok().and_then(|v| v.parse().ok())
        }

        if let Ok(host) = std::env::var("SHIELDGATE_HOST") {
            self.server.host = host;
        }
        if let Some(port) = parsed("SHIELDGATE_PORT") {
            self.server.port = port;
        }
        if let Some(enabled) = parsed("SHIELDGATE_AUTH_ENABLED") {
            self.auth.enabled = enabled;
        }
        if let Some(max) = parsed("SHIELDGATE_RATE_LIMIT_REQUESTS") {
            self.rate_limit.max_requests = max;
        }
        if let Some(window) = parsed("SHIELDGATE_RATE_LIMIT_WINDOW") {
            self.rate_limit.window_secs = window;
        }
        if let Some(size) = parsed("SHIELDGATE_MAX_REQUEST_SIZE") {
            self.validation.max_request_size = size;
        }
        if let Some(strict) = parsed("SHIELDGATE_STRICT_VALIDATION") {
            self.validation.strict_validation = strict;
        }
        if let Ok(origins) = std::env::var("SHIELDGATE_CORS_ORIGINS") {
            self.cors.allowed_origins = origins
                .split(',')
                .map(str::trim)
                .filter(|o| !o.is_empty())
                .map(String::from)
                .collect();
        }
        if let Ok(level) = std::env::var("SHIELDGATE_LOG_LEVEL") {
            self.logging.level = level;
        }

        self
    }

    /// Reject settings that would disable a guard by accident
    pub fn validate(&self) -> Result<()> {
        let rl = &self.rate_limit;
        if rl.max_requests == 0 || rl.window_secs == 0 {
            return Err(GatewayError::Config(
                "rate_limit.max_requests and rate_limit.window_secs must be positive".to_string(),
            ));
        }
        let auth = &self.auth;
        if auth.max_login_attempts == 0 || auth.lockout_duration_secs == 0 {
            return Err(GatewayError::Config(
                "auth.max_login_attempts and auth.lockout_duration_secs must be positive"
                    .to_string(),
            ));
        }
        if auth.api_key_length < 16 {
            return Err(GatewayError::Config(
                "auth.api_key_length must be at least 16".to_string(),
            ));
        }
        if self.server.request_timeout_secs == 0 || self.server.cleanup_interval_secs == 0 {
            return Err(GatewayError::Config(
                "server.request_timeout_secs and server.cleanup_interval_secs must be positive"
                    .to_string(),
            ));
        }
        let v = &self.validation;
        if v.max_request_size == 0 || v.max_json_depth == 0 || v.max_field_length == 0 {
            return Err(GatewayError::Config(
                "validation limits must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,

    /// Port to listen on
    pub port: u16,

    /// Value of the `Server` response header
    pub name: String,

    /// Per-request deadline in seconds, body read included
    pub request_timeout_secs: u64,

    /// Interval between sweeps of idle rate-limit and lockout state
    pub cleanup_interval_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            name: "ShieldGate".to_string(),
            request_timeout_secs: 30,
            cleanup_interval_secs: 60,
        }
    }
}

impl ServerConfig {
    /// Get the full listen address
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Authentication configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Require API keys on protected paths
    pub enabled: bool,

    /// Random bytes per generated key
    pub api_key_length: usize,

    /// Session timeout in seconds (advertised to collaborators that hold sessions)
    pub session_timeout_secs: u64,

    /// Failures within the lockout window before an IP is locked out
    pub max_login_attempts: usize,

    /// Lockout window in seconds
    pub lockout_duration_secs: u64,

    /// Paths served without authentication
    pub public_paths: Vec<String>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            api_key_length: 32,
            session_timeout_secs: 3600,
            max_login_attempts: 5,
            lockout_duration_secs: 900, // 15 minutes
            public_paths: vec![
                "/health".to_string(),
                "/docs".to_string(),
                "/redoc".to_string(),
                "/openapi.json".to_string(),
                "/config/public".to_string(),
            ],
        }
    }
}

/// Rate limiting configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Requests allowed per window
    pub max_requests: usize,

    /// Window length in seconds
    pub window_secs: u64,

    /// Burst detection window in seconds
    pub burst_window_secs: u64,

    /// Requests within the burst window that count as a burst
    pub burst_threshold: usize,

    /// Reject bursts instead of only auditing them
    pub enforce_burst: bool,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: 100,
            window_secs: 60,
            burst_window_secs: 5,
            burst_threshold: 20,
            enforce_burst: false,
        }
    }
}

/// Validation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationConfig {
    /// Maximum request body size in bytes
    pub max_request_size: usize,

    /// Maximum JSON nesting depth
    pub max_json_depth: usize,

    /// Maximum chars per JSON string leaf
    pub max_field_length: usize,

    /// Fail on any non-none severity
    pub strict_validation: bool,

    /// Severity at which content is blocked
    pub block_threshold: Severity,

    /// Entropy above which long strings count as obfuscated
    pub entropy_threshold: f64,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            max_request_size: 10 * 1024 * 1024, // 10 MB
            max_json_depth: 10,
            max_field_length: 10_000,
            strict_validation: true,
            block_threshold: Severity::High,
            entropy_threshold: DEFAULT_ENTROPY_THRESHOLD,
        }
    }
}

/// CORS configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CorsConfig {
    /// Allowed origins; empty disables cross-origin access
    pub allowed_origins: Vec<String>,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: vec!["http://localhost:3000".to_string()],
        }
    }
}

/// Log output format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable
    #[default]
    Pretty,
    /// One JSON object per line
    Json,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter when `RUST_LOG` is unset
    pub level: String,

    /// Output format
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.rate_limit.max_requests, 100);
        assert_eq!(config.rate_limit.window_secs, 60);
        assert_eq!(config.auth.max_login_attempts, 5);
        assert_eq!(config.server.cleanup_interval_secs, 60);
        assert_eq!(config.validation.block_threshold, Severity::High);
        assert!(config.validation.strict_validation);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_listen_addr() {
        let config = ServerConfig::default();
        assert_eq!(config.listen_addr(), "127.0.0.1:8080");
    }

    #[test]
    fn test_partial_toml() {
        let toml = r#"
            [server]
            port = 9090

            [rate_limit]
            max_requests = 10

            [validation]
            block_threshold = "critical"
            strict_validation = false

            [logging]
            format = "json"
        "#;

        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.server.port, 9090);
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.rate_limit.max_requests, 10);
        assert_eq!(config.rate_limit.window_secs, 60);
        assert_eq!(
            config.validation.block_threshold,
            Severity::Critical
        );
        assert!(!config.validation.strict_validation);
        assert_eq!(config.logging.format, LogFormat::Json);
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[auth]\nmax_login_attempts = 3").unwrap();

        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.auth.max_login_attempts, 3);
        assert!(config.auth.enabled);
    }

    #[test]
    fn test_bad_file_is_config_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[server\nport = ").unwrap();

        assert!(matches!(
            Config::from_file(file.path()),
            Err(GatewayError::Config(_))
        ));
        assert!(matches!(
            Config::from_file("/nonexistent/shieldgate.toml"),
            Err(GatewayError::Config(_))
        ));
    }

    #[test]
    fn test_load_validates() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[server]\nname = \"edge-1\"").unwrap();
        let config = Config::load(Some(file.path())).unwrap();
        assert_eq!(config.server.name, "edge-1");

        let mut bad = tempfile::NamedTempFile::new().unwrap();
        writeln!(bad, "[rate_limit]\nmax_requests = 0").unwrap();
        assert!(Config::load(Some(bad.path())).is_err());
    }

    #[test]
    fn test_default_renders_as_toml() {
        let rendered = toml::to_string_pretty(&Config::default()).unwrap();
        assert!(rendered.contains("block_threshold = \"high\""));

        let parsed: Config = toml::from_str(&rendered).unwrap();
        assert_eq!(parsed.auth.public_paths, AuthConfig::default().public_paths);
    }

    #[test]
    fn test_validate_rejects_zero_window() {
        let mut config = Config::default();
        config.rate_limit.window_secs = 0;
        assert!(config.validate().is_err());
    }
}
