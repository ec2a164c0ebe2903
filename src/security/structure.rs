//! Bounded, non-recursive JSON traversal.
//!
//! Depth is counted the same way throughout the crate: a scalar is depth 0,
//! and each enclosing object or array adds one. Both walkers use an explicit
//! stack, so adversarial nesting cannot exhaust the call stack.

use serde_json::Value;

/// Depth of a JSON value, or `None` as soon as any branch exceeds `cap`.
///
/// Stops at the first over-deep container; the rest of the document is
/// never visited.
pub fn json_depth(value: &Value, cap: usize) -> Option<usize> {
    let mut max_depth = 0;
    let mut stack: Vec<(&Value, usize)> = vec![(value, 0)];

    while let Some((node, depth)) = stack.pop() {
        if !(node.is_object() || node.is_array()) {
            continue;
        }

        let depth = depth + 1;
        if depth > cap {
            return None;
        }
        max_depth = max_depth.max(depth);

        match node {
            Value::Object(map) => stack.extend(map.values().map(|child| (child, depth))),
            Value::Array(items) => stack.extend(items.iter().map(|child| (child, depth))),
            _ => {},
        }
    }

    Some(max_depth)
}

/// A string found inside a JSON document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StringLeaf<'a> {
    /// Dotted path from the root, `[i]` for array positions
    pub path: String,
    /// The string itself
    pub value: &'a str,
    /// Whether this string is an object key rather than a value
    pub is_key: bool,
}

/// Collect every string value and object key, in document order.
pub fn string_leaves(value: &Value) -> Vec<StringLeaf<'_>> {
    let mut leaves = Vec::new();
    let mut stack: Vec<(&Value, String)> = vec![(value, String::from("$"))];

    while let Some((node, path)) = stack.pop() {
        match node {
            Value::String(s) => leaves.push(StringLeaf {
                path,
                value: s.as_str(),
                is_key: false,
            }),
            Value::Object(map) => {
                // Reverse push keeps document order on pop.
                for (key, child) in map.iter().rev() {
                    stack.push((child, format!("{path}.{key}")));
                }
                for key in map.keys() {
                    leaves.push(StringLeaf {
                        path: format!("{path}.{key}"),
                        value: key.as_str(),
                        is_key: true,
                    });
                }
            },
            Value::Array(items) => {
                for (i, child) in items.iter().enumerate().rev() {
                    stack.push((child, format!("{path}[{i}]")));
                }
            },
            _ => {},
        }
    }

    leaves
}

/// Whether a string looks like a JSON object or array.
pub fn looks_like_json(value: &str) -> bool {
    let trimmed = value.trim();
    (trimmed.starts_with('{') && trimmed.ends_with('}'))
        || (trimmed.starts_with('[') && trimmed.ends_with(']'))
}

/// Whether a serde_json error came from its own nesting guard.
pub fn is_recursion_error(err: &serde_json::Error) -> bool {
    err.to_string().contains("recursion limit")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn nested(levels: usize) -> Value {
        let mut value = json!("leaf");
        for _ in 0..levels {
            value = json!({ "n": value });
        }
        value
    }

    #[test]
    fn test_depth_counts_containers() {
        assert_eq!(json_depth(&json!(1), 10), Some(0));
        assert_eq!(json_depth(&json!({}), 10), Some(1));
        assert_eq!(json_depth(&json!({"a": [1, {"b": 2}]}), 10), Some(3));
    }

    #[test]
    fn test_depth_cap() {
        assert_eq!(json_depth(&nested(10), 10), Some(10));
        assert_eq!(json_depth(&nested(11), 10), None);
    }

    #[test]
    fn test_depth_survives_extreme_nesting() {
        // Build without serde_json's parser so its recursion limit is not involved.
        let mut value = Value::Null;
        for _ in 0..50_000 {
            value = Value::Array(vec![value]);
        }
        assert_eq!(json_depth(&value, 32), None);
        std::mem::forget(value);
    }

    #[test]
    fn test_string_leaves_paths() {
        let doc = json!({"user": {"name": "alice", "tags": ["a", "b"]}, "n": 3});
        let leaves = string_leaves(&doc);

        let values: Vec<_> = leaves.iter().filter(|l| !l.is_key).map(|l| l.value).collect();
        assert_eq!(values.len(), 3);
        assert!(values.contains(&"alice"));

        let tag_path = leaves.iter().find(|l| l.value == "b").unwrap();
        assert_eq!(tag_path.path, "$.user.tags[1]");

        assert!(leaves.iter().any(|l| l.is_key && l.value == "user"));
    }

    #[test]
    fn test_looks_like_json() {
        assert!(looks_like_json(" {\"a\": 1} "));
        assert!(looks_like_json("[1,2]"));
        assert!(!looks_like_json("{unterminated"));
        assert!(!looks_like_json("plain text"));
    }

    #[test]
    fn test_parser_recursion_error_detected() {
        let deep = format!("{}{}", "[".repeat(200), "]".repeat(200));
        let err = serde_json::from_str::<Value>(&deep).unwrap_err();
        assert!(is_recursion_error(&err));
    }
}
