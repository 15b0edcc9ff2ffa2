//! src/utils/mod.rs
//! Shared helpers: tool-argument extraction, untyped-object traversal,
//! YAML string assembly and selector formatting.

use std::collections::BTreeMap;

use serde_json::{Map, Value};

use crate::error::McpError;

/// String-keyed argument map, as delivered by a `tools/call` request.
pub type Args = Map<String, Value>;

/// Argument keys whose values are never rendered into telemetry.
const REDACTED_KEY_MARKERS: &[&str] = &["secret", "token", "key"];

/// Read a string argument.
pub fn arg_str<'a>(args: &'a Args, name: &str) -> Option<&'a str> {
    args.get(name).and_then(Value::as_str).map(str::trim).filter(|s| !s.is_empty())
}

/// Read a required string argument, failing with `INVALID_INPUT`.
pub fn require_str<'a>(args: &'a Args, name: &str, tool: &str) -> Result<&'a str, McpError> {
    arg_str(args, name)
        .ok_or_else(|| McpError::invalid_input(tool, format!("missing required argument: {name}")))
}

/// Read a boolean argument with a default. Accepts JSON booleans and the
/// strings "true"/"false" (agents frequently send either).
pub fn arg_bool(args: &Args, name: &str, default: bool) -> bool {
    match args.get(name) {
        Some(Value::Bool(b)) => *b,
        Some(Value::String(s)) => match s.to_lowercase().as_str() {
            "true" => true,
            "false" => false,
            _ => default,
        },
        _ => default,
    }
}

/// Read an integer argument.
pub fn arg_i64(args: &Args, name: &str) -> Option<i64> {
    match args.get(name) {
        Some(Value::Number(n)) => n.as_i64(),
        Some(Value::String(s)) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Walk a nested untyped object. `None` is the "does not exist" signal;
/// a present-but-null field also reads as absent.
pub fn nested<'a>(value: &'a Value, path: &[&str]) -> Option<&'a Value> {
    let mut current = value;
    for segment in path {
        current = current.get(segment)?;
    }
    if current.is_null() { None } else { Some(current) }
}

/// Nested string accessor.
pub fn nested_str<'a>(value: &'a Value, path: &[&str]) -> Option<&'a str> {
    nested(value, path).and_then(Value::as_str)
}

/// Nested array accessor.
pub fn nested_array<'a>(value: &'a Value, path: &[&str]) -> Option<&'a Vec<Value>> {
    nested(value, path).and_then(Value::as_array)
}

/// Render arguments for span attributes with sensitive values redacted.
/// Any key containing `secret`, `token` or `key` is masked.
pub fn sanitize_args(args: &Args) -> String {
    let sanitized: Map<String, Value> = args
        .iter()
        .map(|(k, v)| {
            let lowered = k.to_lowercase();
            if REDACTED_KEY_MARKERS.iter().any(|m| lowered.contains(m)) {
                (k.clone(), Value::String("[REDACTED]".to_string()))
            } else {
                (k.clone(), v.clone())
            }
        })
        .collect();
    Value::Object(sanitized).to_string()
}

/// Truncate a string to `max_len` bytes on a char boundary, appending an
/// ellipsis when truncation happened.
pub fn truncate(s: &str, max_len: usize) -> String {
    if s.len() <= max_len {
        return s.to_string();
    }
    let mut end = max_len;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &s[..end])
}

/// Render a label selector as `k1=v1,k2=v2`, keys sorted lexicographically.
/// Sorting is what makes generated manifests reproducible.
pub fn format_selector(labels: &BTreeMap<String, String>) -> String {
    labels
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(",")
}

/// Collect an untyped `matchLabels`-style object into a sorted map.
pub fn sorted_labels(value: &Value) -> BTreeMap<String, String> {
    value
        .as_object()
        .map(|map| {
            map.iter()
                .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
                .collect()
        })
        .unwrap_or_default()
}

/// Indent every line of `text` by `spaces` spaces. Used when splicing a
/// nested block into an assembled YAML manifest.
pub fn indent_lines(text: &str, spaces: usize) -> String {
    let pad = " ".repeat(spaces);
    text.lines()
        .map(|line| {
            if line.is_empty() {
                line.to_string()
            } else {
                format!("{pad}{line}")
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Render a sorted label map as YAML mapping lines at the given indent.
pub fn yaml_label_lines(labels: &BTreeMap<String, String>, spaces: usize) -> String {
    let pad = " ".repeat(spaces);
    labels
        .iter()
        .map(|(k, v)| format!("{pad}{k}: {v}"))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn args(v: Value) -> Args {
        v.as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn test_arg_str_trims_and_filters_empty() {
        let a = args(json!({"name": "  web  ", "empty": "   "}));
        assert_eq!(arg_str(&a, "name"), Some("web"));
        assert_eq!(arg_str(&a, "empty"), None);
        assert_eq!(arg_str(&a, "missing"), None);
    }

    #[test]
    fn test_require_str_yields_invalid_input() {
        let a = args(json!({}));
        let err = require_str(&a, "service", "get_service").unwrap_err();
        assert_eq!(err.code, crate::error::ErrorCode::InvalidInput);
        assert!(err.message.contains("service"));
    }

    #[test]
    fn test_arg_bool_accepts_string_forms() {
        let a = args(json!({"detail": "true", "flag": false}));
        assert!(arg_bool(&a, "detail", false));
        assert!(!arg_bool(&a, "flag", true));
        assert!(!arg_bool(&a, "missing", false));
    }

    #[test]
    fn test_nested_returns_exists_flag() {
        let v = json!({"spec": {"versions": [{"name": "v1", "served": true}], "group": null}});
        assert!(nested(&v, &["spec", "versions"]).is_some());
        assert!(nested(&v, &["spec", "group"]).is_none());
        assert!(nested(&v, &["spec", "missing", "deeper"]).is_none());
        assert_eq!(
            nested_str(&v, &["spec", "versions"]).map(|_| ()),
            None,
            "array is not a string"
        );
    }

    #[test]
    fn test_sanitize_args_redacts_sensitive_keys() {
        let a = args(json!({
            "namespace": "prod",
            "apiToken": "abc123",
            "client_secret": "xyz",
            "sshKey": "----"
        }));
        let rendered = sanitize_args(&a);
        assert!(rendered.contains("prod"));
        assert!(!rendered.contains("abc123"));
        assert!(!rendered.contains("xyz"));
        assert!(!rendered.contains("----"));
        assert_eq!(rendered.matches("[REDACTED]").count(), 3);
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        assert_eq!(truncate("hello", 10), "hello");
        assert_eq!(truncate("hello world", 5), "hello...");
        // multi-byte char straddling the cut
        let s = "aé";
        assert_eq!(truncate(s, 2), "a...");
    }

    #[test]
    fn test_format_selector_sorted() {
        let mut labels = BTreeMap::new();
        labels.insert("tier".to_string(), "web".to_string());
        labels.insert("app".to_string(), "shop".to_string());
        assert_eq!(format_selector(&labels), "app=shop,tier=web");
    }

    #[test]
    fn test_yaml_label_lines_sorted_and_indented() {
        let mut labels = BTreeMap::new();
        labels.insert("b".to_string(), "2".to_string());
        labels.insert("a".to_string(), "1".to_string());
        assert_eq!(yaml_label_lines(&labels, 4), "    a: 1\n    b: 2");
    }

    #[test]
    fn test_indent_lines_skips_empty() {
        assert_eq!(indent_lines("a\n\nb", 2), "  a\n\n  b");
    }
}
