//! Statistical and obfuscation heuristics.
//!
//! Each check is independent and reports at most one category. All checks
//! operate on input that the detector has already capped to `max_length`.

use std::collections::HashMap;

use lazy_static::lazy_static;
use regex::Regex;

use super::patterns::{Severity, ThreatCategory};

/// Minimum char count before entropy is meaningful.
pub const ENTROPY_MIN_CHARS: usize = 20;

/// Default entropy threshold (bits per char).
pub const DEFAULT_ENTROPY_THRESHOLD: f64 = 4.5;

/// Occurrence count above which a dangerous substring counts as bombing.
pub const BOMBING_REPEAT_LIMIT: usize = 5;

/// Substrings counted by the pattern-bombing check (lower-case).
pub const BOMBING_SUBSTRINGS: &[&str] = &[
    "<script",
    "${",
    "$(",
    "eval(",
    "union select",
    "../",
    "etc/passwd",
    "__proto__",
    "javascript:",
    "{{",
    "drop table",
    "; rm",
];

/// Run of identical chars that marks padding.
pub const REPEATED_RUN_LIMIT: usize = 100;

lazy_static! {
    static ref BASE64_RUN: Regex = Regex::new(r"[A-Za-z0-9+/]{51,}").unwrap();
    static ref PERCENT_ENCODED: Regex = Regex::new(r"%[0-9A-Fa-f]{2}").unwrap();
    static ref SHELLCODE_ESCAPES: Regex = Regex::new(r"(?i)(\\x(90|41)){10,}").unwrap();
}

/// A single heuristic hit with the minimum severity it imposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeuristicHit {
    /// Reported category
    pub category: ThreatCategory,
    /// Severity floor
    pub min_severity: Severity,
}

/// Shannon entropy over chars, in bits.
pub fn shannon_entropy(value: &str) -> f64 {
    let mut counts: HashMap<char, usize> = HashMap::new();
    let mut total = 0usize;
    for c in value.chars() {
        *counts.entry(c).or_insert(0) += 1;
        total += 1;
    }
    if total == 0 {
        return 0.0;
    }

    let total = total as f64;
    counts
        .values()
        .map(|&n| {
            let p = n as f64 / total;
            -p * p.log2()
        })
        .sum()
}

/// High-entropy strings look like packed or encrypted payloads.
pub fn check_entropy(value: &str, threshold: f64) -> Option<HeuristicHit> {
    if value.chars().count() < ENTROPY_MIN_CHARS {
        return None;
    }
    (shannon_entropy(value) > threshold).then_some(HeuristicHit {
        category: ThreatCategory::ObfuscatedPayload,
        min_severity: Severity::Medium,
    })
}

/// Any dangerous substring repeated more than [`BOMBING_REPEAT_LIMIT`] times.
pub fn check_pattern_bombing(value: &str) -> Option<HeuristicHit> {
    let lower = value.to_lowercase();
    BOMBING_SUBSTRINGS
        .iter()
        .any(|s| lower.matches(s).count() > BOMBING_REPEAT_LIMIT)
        .then_some(HeuristicHit {
            category: ThreatCategory::PatternBombing,
            min_severity: Severity::High,
        })
}

/// Long base64 runs, hex-dense strings, or heavy percent-encoding.
pub fn check_encoding(value: &str) -> Option<HeuristicHit> {
    let hit = HeuristicHit {
        category: ThreatCategory::EncodingObfuscation,
        min_severity: Severity::Medium,
    };

    if BASE64_RUN.is_match(value) {
        return Some(hit);
    }

    let total = value.chars().count();
    if total <= 20 {
        return None;
    }

    let hex = value.chars().filter(char::is_ascii_hexdigit).count();
    if hex as f64 / total as f64 > 0.8 {
        return Some(hit);
    }

    (PERCENT_ENCODED.find_iter(value).count() > 5).then_some(hit)
}

/// Length of the longest run of one repeated char.
pub fn longest_run(value: &str) -> usize {
    let mut longest = 0;
    let mut current = 0;
    let mut previous = None;
    for c in value.chars() {
        if Some(c) == previous {
            current += 1;
        } else {
            previous = Some(c);
            current = 1;
        }
        longest = longest.max(current);
    }
    longest
}

/// Near-limit input padded with a repeated byte or NOP-sled escapes.
pub fn check_length_attack(value: &str, max_length: usize) -> Option<HeuristicHit> {
    if max_length == 0 || value.chars().count() * 10 < max_length * 9 {
        return None;
    }
    let padded = longest_run(value) >= REPEATED_RUN_LIMIT || SHELLCODE_ESCAPES.is_match(value);
    padded.then_some(HeuristicHit {
        category: ThreatCategory::LengthAttack,
        min_severity: Severity::Medium,
    })
}

/// Run every heuristic in a fixed order.
pub fn run_all(value: &str, max_length: usize, entropy_threshold: f64) -> Vec<HeuristicHit> {
    [
        check_entropy(value, entropy_threshold),
        check_pattern_bombing(value),
        check_encoding(value),
        check_length_attack(value, max_length),
    ]
    .into_iter()
    .flatten()
    .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entropy_bounds() {
        assert_eq!(shannon_entropy(""), 0.0);
        assert_eq!(shannon_entropy("aaaa"), 0.0);
        assert!((shannon_entropy("ab") - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_entropy_flags_random_text() {
        let random = "q8#Lz!0vX^mR2@kT9&wB$7pN*eY4%hJ6(cF1)dG3";
        assert!(check_entropy(random, DEFAULT_ENTROPY_THRESHOLD).is_some());
        assert!(check_entropy("the quick brown fox jumps", DEFAULT_ENTROPY_THRESHOLD).is_none());
        // Below the minimum length nothing is reported.
        assert!(check_entropy("q8#Lz!0vX^", DEFAULT_ENTROPY_THRESHOLD).is_none());
    }

    #[test]
    fn test_pattern_bombing_threshold() {
        let five = "../".repeat(5);
        let six = "../".repeat(6);
        assert!(check_pattern_bombing(&five).is_none());

        let hit = check_pattern_bombing(&six).unwrap();
        assert_eq!(hit.category, ThreatCategory::PatternBombing);
        assert_eq!(hit.min_severity, Severity::High);
    }

    #[test]
    fn test_encoding_checks() {
        let b64 = "QUJDREVGR0hJSktMTU5PUFFSU1RVVldYWVphYmNkZWZnaGlqa2xtbm9wcXJzdHV2";
        assert!(check_encoding(b64).is_some());

        assert!(check_encoding("deadbeefcafebabe0123456789").is_some());
        assert!(check_encoding("%3C%73%63%72%69%70%74%3E alert").is_some());
        assert!(check_encoding("a perfectly normal sentence here").is_none());
    }

    #[test]
    fn test_length_attack() {
        let padded = "A".repeat(950);
        assert!(check_length_attack(&padded, 1000).is_some());

        // Far from the limit, padding alone is fine.
        assert!(check_length_attack(&padded, 10_000).is_none());

        let sled = format!("{}{}", "\\x90".repeat(20), "x".repeat(900));
        assert!(check_length_attack(&sled, 1000).is_some());
    }

    #[test]
    fn test_longest_run() {
        assert_eq!(longest_run(""), 0);
        assert_eq!(longest_run("abbbc"), 3);
        assert_eq!(longest_run("zz"), 2);
    }
}
