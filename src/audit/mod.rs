//! Structured security audit trail.
//!
//! Every event becomes one `tracing` event on the `audit` target, so the
//! subscriber decides where it goes. Emission never blocks the caller as long
//! as the installed writer is non-blocking (the binary uses
//! `tracing-appender`).

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

use crate::security::Severity;

/// Tracing target for audit events.
pub const AUDIT_TARGET: &str = "audit";

/// Audit event severity. Maps onto a tracing level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditSeverity {
    /// Diagnostic
    Debug,
    /// Normal traffic
    Info,
    /// Rejected or suspicious traffic
    Warning,
    /// Gateway failures
    Error,
    /// Critical threats
    Critical,
}

impl AuditSeverity {
    /// Audit severity for a detection severity.
    pub fn from_threat(severity: Severity) -> Self {
        match severity {
            Severity::None => AuditSeverity::Info,
            Severity::Low | Severity::Medium => AuditSeverity::Warning,
            Severity::High => AuditSeverity::Error,
            Severity::Critical => AuditSeverity::Critical,
        }
    }
}

impl fmt::Display for AuditSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AuditSeverity::Debug => "debug",
            AuditSeverity::Info => "info",
            AuditSeverity::Warning => "warning",
            AuditSeverity::Error => "error",
            AuditSeverity::Critical => "critical",
        };
        f.write_str(s)
    }
}

/// One audit record. Write-only once emitted.
#[derive(Debug, Clone, Serialize)]
pub struct AuditEvent {
    /// Emission time
    pub timestamp: DateTime<Utc>,
    /// Unique id
    pub event_id: Uuid,
    /// Event type, e.g. `rate_limit_exceeded`
    pub event_type: String,
    /// Resolved client identity
    pub client: String,
    /// Free-form details
    pub details: Value,
    /// Severity
    pub severity: AuditSeverity,
}

/// Emits audit events and counts them per type.
#[derive(Debug, Default)]
pub struct AuditLogger {
    counters: DashMap<String, AtomicU64>,
    total: AtomicU64,
}

impl AuditLogger {
    /// Create a logger
    pub fn new() -> Self {
        Self::default()
    }

    /// Emit one event and return it.
    pub fn log_event(
        &self,
        event_type: &str,
        client: &str,
        details: Value,
        severity: AuditSeverity,
    ) -> AuditEvent {
        let event = AuditEvent {
            timestamp: Utc::now(),
            event_id: Uuid::new_v4(),
            event_type: event_type.to_string(),
            client: client.to_string(),
            details,
            severity,
        };

        self.emit(&event);

        self.total.fetch_add(1, Ordering::Relaxed);
        self.counters
            .entry(event.event_type.clone())
            .or_default()
            .fetch_add(1, Ordering::Relaxed);

        event
    }

    fn emit(&self, event: &AuditEvent) {
        macro_rules! audit {
            ($level:ident) => {
                tracing::$level!(
                    target: AUDIT_TARGET,
                    event_id = %event.event_id,
                    timestamp = %event.timestamp.to_rfc3339(),
                    event_type = %event.event_type,
                    client = %event.client,
                    severity = %event.severity,
                    details = %event.details,
                    "security event"
                )
            };
        }

        match event.severity {
            AuditSeverity::Debug => audit!(debug),
            AuditSeverity::Info => audit!(info),
            AuditSeverity::Warning => audit!(warn),
            AuditSeverity::Error | AuditSeverity::Critical => audit!(error),
        }
    }

    /// Events emitted with `event_type`.
    pub fn count(&self, event_type: &str) -> u64 {
        self.counters
            .get(event_type)
            .map_or(0, |c| c.load(Ordering::Relaxed))
    }

    /// All events emitted.
    pub fn total(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }

    /// Snapshot of per-type counts, sorted by type.
    pub fn counts(&self) -> Vec<(String, u64)> {
        let mut counts: Vec<_> = self
            .counters
            .iter()
            .map(|e| (e.key().clone(), e.value().load(Ordering::Relaxed)))
            .collect();
        counts.sort();
        counts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_event_fields() {
        let logger = AuditLogger::new();
        let event = logger.log_event(
            "rate_limit_exceeded",
            "10.0.0.1",
            json!({"path": "/api"}),
            AuditSeverity::Warning,
        );

        assert_eq!(event.event_type, "rate_limit_exceeded");
        assert_eq!(event.client, "10.0.0.1");
        assert_eq!(event.details["path"], "/api");

        let serialized = serde_json::to_value(&event).unwrap();
        assert_eq!(serialized["severity"], "warning");
    }

    #[test]
    fn test_counters() {
        let logger = AuditLogger::new();
        for _ in 0..3 {
            logger.log_event("request_processed", "c", Value::Null, AuditSeverity::Info);
        }
        logger.log_event("internal_error", "c", Value::Null, AuditSeverity::Error);

        assert_eq!(logger.count("request_processed"), 3);
        assert_eq!(logger.count("internal_error"), 1);
        assert_eq!(logger.count("blocked_ip"), 0);
        assert_eq!(logger.total(), 4);
        assert_eq!(
            logger.counts(),
            vec![
                ("internal_error".to_string(), 1),
                ("request_processed".to_string(), 3)
            ]
        );
    }

    #[test]
    fn test_event_ids_unique() {
        let logger = AuditLogger::new();
        let a = logger.log_event("x", "c", Value::Null, AuditSeverity::Debug);
        let b = logger.log_event("x", "c", Value::Null, AuditSeverity::Debug);
        assert_ne!(a.event_id, b.event_id);
    }

    #[test]
    fn test_threat_severity_mapping() {
        assert_eq!(AuditSeverity::from_threat(Severity::None), AuditSeverity::Info);
        assert_eq!(AuditSeverity::from_threat(Severity::Medium), AuditSeverity::Warning);
        assert_eq!(
            AuditSeverity::from_threat(Severity::Critical),
            AuditSeverity::Critical
        );
    }
}
