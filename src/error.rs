//! Gateway error types.
//!
//! # Disclosure Model
//!
//! Every variant carries full server-side detail in its `Display` form, which
//! only ever reaches the audit log. What the caller sees is derived from
//! [`GatewayError::category`], [`GatewayError::status`] and
//! [`GatewayError::public_message`], none of which depend on request content:
//!
//! | Category     | Variants                                                   |
//! |--------------|------------------------------------------------------------|
//! | `validation` | `ValidationFailure`, `MalformedPayload`, `PayloadTooLarge` |
//! | `security`   | `ThreatDetected`, `RateLimitExceeded`, `AccountLocked`, `IpBlocked` |
//! | `permission` | `AuthenticationFailure`, `AuthorizationFailure`            |
//! | `system`     | `Timeout`, `Internal`, `Config`, `Io`, `Json`              |

use http::StatusCode;
use serde::Serialize;
use thiserror::Error;

use crate::security::{Severity, ThreatCategory};

/// ShieldGate errors.
#[derive(Error, Debug)]
pub enum GatewayError {
    /// Input violated a length, character or structure rule without
    /// reaching the block threshold.
    #[error("Validation failed for '{field}': {reason}")]
    ValidationFailure {
        /// Field or source that failed.
        field: String,
        /// Server-side reason.
        reason: String,
    },

    /// Threat detector reported a severity at or above the block threshold.
    #[error("Threat detected in '{field}': severity {severity}, categories {categories:?}")]
    ThreatDetected {
        /// Field or source that was scanned.
        field: String,
        /// Aggregated severity.
        severity: Severity,
        /// Detected categories, in detection order.
        categories: Vec<ThreatCategory>,
    },

    /// Client exceeded its sliding-window quota.
    #[error("Rate limit exceeded for client {client}")]
    RateLimitExceeded {
        /// Resolved client identity.
        client: String,
    },

    /// Declared or buffered body exceeds the configured maximum.
    #[error("Payload too large: {size} > {limit} bytes")]
    PayloadTooLarge {
        /// Observed size.
        size: u64,
        /// Configured limit.
        limit: u64,
    },

    /// Body could not be parsed, nests too deeply, or has a dangerous shape.
    #[error("Malformed payload: {0}")]
    MalformedPayload(String),

    /// Missing or unknown credentials.
    #[error("Authentication failed: {0}")]
    AuthenticationFailure(String),

    /// Valid credentials without the required permission.
    #[error("Authorization failed: {0}")]
    AuthorizationFailure(String),

    /// Too many recent authentication failures from this identity.
    #[error("Client {client} is locked out")]
    AccountLocked {
        /// Resolved client identity.
        client: String,
    },

    /// Identity is on the gateway blocklist.
    #[error("Client {client} is blocked")]
    IpBlocked {
        /// Resolved client identity.
        client: String,
    },

    /// Caller-supplied deadline elapsed mid-pipeline.
    #[error("Request deadline of {0:?} exceeded")]
    Timeout(std::time::Duration),

    /// Anything unanticipated, including panics caught at the boundary.
    #[error("Internal error: {0}")]
    Internal(String),

    /// Configuration error.
    #[error("Config error: {0}")]
    Config(String),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for gateway operations
pub type Result<T> = std::result::Result<T, GatewayError>;

/// The four caller-visible error categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorCategory {
    /// Input was rejected on shape or size.
    Validation,
    /// Input or caller was rejected as hostile.
    Security,
    /// The gateway itself failed.
    System,
    /// Caller lacks credentials or permission.
    Permission,
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorCategory::Validation => write!(f, "validation"),
            ErrorCategory::Security => write!(f, "security"),
            ErrorCategory::System => write!(f, "system"),
            ErrorCategory::Permission => write!(f, "permission"),
        }
    }
}

impl GatewayError {
    /// Build a validation failure for a field.
    pub fn validation(field: impl Into<String>, reason: impl Into<String>) -> Self {
        GatewayError::ValidationFailure {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Caller-visible category.
    pub fn category(&self) -> ErrorCategory {
        match self {
            GatewayError::ValidationFailure { .. }
            | GatewayError::MalformedPayload(_)
            | GatewayError::PayloadTooLarge { .. } => ErrorCategory::Validation,
            GatewayError::ThreatDetected { .. }
            | GatewayError::RateLimitExceeded { .. }
            | GatewayError::AccountLocked { .. }
            | GatewayError::IpBlocked { .. } => ErrorCategory::Security,
            GatewayError::AuthenticationFailure(_) | GatewayError::AuthorizationFailure(_) => {
                ErrorCategory::Permission
            },
            GatewayError::Timeout(_)
            | GatewayError::Internal(_)
            | GatewayError::Config(_)
            | GatewayError::Json(_)
            | GatewayError::Io(_) => ErrorCategory::System,
        }
    }

    /// HTTP status for the rejection.
    pub fn status(&self) -> StatusCode {
        match self {
            GatewayError::ValidationFailure { .. } | GatewayError::MalformedPayload(_) => {
                StatusCode::BAD_REQUEST
            },
            GatewayError::ThreatDetected { .. } => StatusCode::BAD_REQUEST,
            GatewayError::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            GatewayError::RateLimitExceeded { .. } | GatewayError::AccountLocked { .. } => {
                StatusCode::TOO_MANY_REQUESTS
            },
            GatewayError::IpBlocked { .. } | GatewayError::AuthorizationFailure(_) => {
                StatusCode::FORBIDDEN
            },
            GatewayError::AuthenticationFailure(_) => StatusCode::UNAUTHORIZED,
            GatewayError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            GatewayError::Internal(_)
            | GatewayError::Config(_)
            | GatewayError::Json(_)
            | GatewayError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Fixed, content-free message safe to return to the caller.
    pub fn public_message(&self) -> &'static str {
        match self {
            GatewayError::ValidationFailure { .. } => "Invalid input",
            GatewayError::MalformedPayload(_) => "Malformed request payload",
            GatewayError::PayloadTooLarge { .. } => "Request payload too large",
            GatewayError::ThreatDetected { .. } => "Request blocked by security policy",
            GatewayError::RateLimitExceeded { .. } => "Rate limit exceeded",
            GatewayError::AccountLocked { .. } => "Too many failed authentication attempts",
            GatewayError::IpBlocked { .. } => "Access denied",
            GatewayError::AuthenticationFailure(_) => "Authentication required",
            GatewayError::AuthorizationFailure(_) => "Insufficient permissions",
            GatewayError::Timeout(_) => "Request timed out",
            GatewayError::Internal(_)
            | GatewayError::Config(_)
            | GatewayError::Json(_)
            | GatewayError::Io(_) => "Internal server error",
        }
    }

    /// Stable variant name, the only detail logged for unanticipated failures.
    pub fn kind(&self) -> &'static str {
        match self {
            GatewayError::ValidationFailure { .. } => "ValidationFailure",
            GatewayError::ThreatDetected { .. } => "ThreatDetected",
            GatewayError::RateLimitExceeded { .. } => "RateLimitExceeded",
            GatewayError::PayloadTooLarge { .. } => "PayloadTooLarge",
            GatewayError::MalformedPayload(_) => "MalformedPayload",
            GatewayError::AuthenticationFailure(_) => "AuthenticationFailure",
            GatewayError::AuthorizationFailure(_) => "AuthorizationFailure",
            GatewayError::AccountLocked { .. } => "AccountLocked",
            GatewayError::IpBlocked { .. } => "IpBlocked",
            GatewayError::Timeout(_) => "Timeout",
            GatewayError::Internal(_) => "Internal",
            GatewayError::Config(_) => "Config",
            GatewayError::Json(_) => "Json",
            GatewayError::Io(_) => "Io",
        }
    }

    /// Severity carried by a detection error, if any.
    pub fn severity(&self) -> Option<Severity> {
        match self {
            GatewayError::ThreatDetected { severity, .. } => Some(*severity),
            _ => None,
        }
    }
}

impl From<toml::de::Error> for GatewayError {
    fn from(err: toml::de::Error) -> Self {
        GatewayError::Config(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_public_message_hides_detail() {
        let err = GatewayError::ThreatDetected {
            field: "comment".to_string(),
            severity: Severity::Critical,
            categories: vec![ThreatCategory::CodeExecution],
        };

        assert!(err.to_string().contains("comment"));
        assert!(!err.public_message().contains("comment"));
        assert_eq!(err.category(), ErrorCategory::Security);
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        assert_eq!(err.severity(), Some(Severity::Critical));
    }

    #[test]
    fn test_permission_errors() {
        let authn = GatewayError::AuthenticationFailure("missing key".to_string());
        let authz = GatewayError::AuthorizationFailure("read-only key".to_string());

        assert_eq!(authn.category(), ErrorCategory::Permission);
        assert_eq!(authn.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(authz.status(), StatusCode::FORBIDDEN);
        assert_eq!(authz.public_message(), "Insufficient permissions");
    }

    #[test]
    fn test_system_errors_share_message() {
        let internal = GatewayError::Internal("panic in handler".to_string());
        let io = GatewayError::Io(std::io::Error::other("disk"));

        assert_eq!(internal.public_message(), io.public_message());
        assert_eq!(internal.kind(), "Internal");
        assert_eq!(io.category(), ErrorCategory::System);
    }
}
