//! Property tests for the threat detector.

use proptest::prelude::*;
use shieldgate::security::html_escape;
use shieldgate::{GatewayError, Severity, ThreatDetector};

proptest! {
    /// Digits and spaces match no pattern and stay below every heuristic.
    #[test]
    fn benign_text_is_identity(value in "[0-9 ]{0,19}") {
        let detector = ThreatDetector::new();
        let result = detector.inspect(&value, "field", 1000);

        prop_assert!(result.is_clean());
        prop_assert_eq!(result.sanitized_value(), value.as_str());
        prop_assert!(detector.validate_strict(&value, "field", 1000).is_ok());
    }

    /// Aggregated severity is never below any detected category's own severity.
    #[test]
    fn severity_dominates_categories(value in any::<String>()) {
        let detector = ThreatDetector::new();
        let result = detector.inspect(&value, "field", 256);

        for category in result.threats() {
            prop_assert!(result.severity() >= category.severity());
        }
        prop_assert_eq!(result.is_clean(), result.threats().is_empty());
    }

    /// Sanitized output never carries raw markup characters.
    #[test]
    fn sanitized_has_no_markup(value in "[<>\"'&a-z ]{0,64}") {
        let result = ThreatDetector::new().inspect(&value, "field", 1000);
        let sanitized = result.sanitized_value();

        prop_assert!(!sanitized.contains('<'));
        prop_assert!(!sanitized.contains('>'));
        prop_assert!(!sanitized.contains('"'));
        prop_assert!(!sanitized.contains('\''));
        prop_assert_eq!(sanitized, html_escape(&value));
    }

    /// Strict mode fails exactly when something was detected.
    #[test]
    fn strict_fails_iff_detected(value in "[a-z0-9 ./<>;$(){}-]{0,40}") {
        let detector = ThreatDetector::new();
        let result = detector.inspect(&value, "field", 1000);
        let strict = detector.validate_strict(&value, "field", 1000);

        prop_assert_eq!(strict.is_err(), !result.is_clean());
        if let Err(GatewayError::ThreatDetected { severity, .. }) = strict {
            prop_assert!(severity >= Severity::High);
        }
    }

    /// Any input longer than the limit is flagged without panicking.
    #[test]
    fn oversize_always_flagged(value in any::<String>(), limit in 0usize..16) {
        let result = ThreatDetector::new().inspect(&value, "field", limit);
        if value.chars().count() > limit {
            prop_assert!(result.has(shieldgate::ThreatCategory::ExcessiveLength));
            prop_assert!(result.severity() >= Severity::Medium);
        }
    }
}
