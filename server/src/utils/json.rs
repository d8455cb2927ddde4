//! JSON utility functions

use serde_json::Value as JsonValue;
use serde_json_path::JsonPath;

/// Render a value as plain text: strings unquoted, everything else as JSON.
pub fn json_to_plain_string(value: &JsonValue) -> String {
    match value {
        JsonValue::String(s) => s.clone(),
        JsonValue::Null => String::new(),
        other => other.to_string(),
    }
}

/// Error returned for malformed JSONPath expressions
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid JSONPath '{path}': {reason}")]
pub struct JsonPathError {
    pub path: String,
    pub reason: String,
}

/// Accept `input.messages` and `[0]` as shorthand for `$.input.messages` and `$[0]`
fn normalize(path: &str) -> String {
    let path = path.trim();
    if path.starts_with('$') {
        path.to_string()
    } else if path.starts_with('[') {
        format!("${}", path)
    } else {
        format!("$.{}", path)
    }
}

/// Evaluate an RFC 9535 JSONPath against a value.
///
/// A root that is a string holding a JSON object or array is parsed first,
/// so paths reach inside payloads stored as text. One match yields the node,
/// several yield an array of them, none yields `None`.
pub fn json_path_get(root: &JsonValue, path: &str) -> Result<Option<JsonValue>, JsonPathError> {
    let normalized = normalize(path);
    let compiled = JsonPath::parse(&normalized).map_err(|e| JsonPathError {
        path: path.to_string(),
        reason: e.to_string(),
    })?;

    let parsed = match root {
        JsonValue::String(s) => serde_json::from_str::<JsonValue>(s)
            .ok()
            .filter(|v| v.is_object() || v.is_array()),
        _ => None,
    };
    let target = parsed.as_ref().unwrap_or(root);

    let mut nodes: Vec<JsonValue> = compiled.query(target).all().into_iter().cloned().collect();
    Ok(match nodes.len() {
        0 => None,
        1 => nodes.pop(),
        _ => Some(JsonValue::Array(nodes)),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_plain_string() {
        assert_eq!(json_to_plain_string(&json!("hi")), "hi");
        assert_eq!(json_to_plain_string(&json!(3)), "3");
        assert_eq!(json_to_plain_string(&JsonValue::Null), "");
    }

    #[test]
    fn test_json_path_root() {
        let value = json!({"a": 1});
        assert_eq!(json_path_get(&value, "$").unwrap(), Some(value.clone()));
    }

    #[test]
    fn test_json_path_nested() {
        let value = json!({"input": {"messages": [{"content": "hello"}]}});
        assert_eq!(
            json_path_get(&value, "$.input.messages[0].content").unwrap(),
            Some(json!("hello"))
        );
        assert_eq!(
            json_path_get(&value, "input['messages'][0]['content']").unwrap(),
            Some(json!("hello"))
        );
        assert_eq!(json_path_get(&value, "$.input.missing").unwrap(), None);
        assert_eq!(json_path_get(&value, "$.input.messages[3]").unwrap(), None);
    }

    #[test]
    fn test_json_path_wildcards_and_descent() {
        let value = json!({"messages": [{"content": "a"}, {"content": "b"}]});
        assert_eq!(
            json_path_get(&value, "$.messages[*].content").unwrap(),
            Some(json!(["a", "b"]))
        );
        assert_eq!(
            json_path_get(&value, "$..content").unwrap(),
            Some(json!(["a", "b"]))
        );
        assert_eq!(
            json_path_get(&value, "$.messages[-1].content").unwrap(),
            Some(json!("b"))
        );
    }

    #[test]
    fn test_json_path_through_string_payload() {
        let value = json!("{\"answer\": 42}");
        assert_eq!(json_path_get(&value, "$.answer").unwrap(), Some(json!(42)));
        assert_eq!(json_path_get(&json!("plain"), "$.answer").unwrap(), None);
    }

    #[test]
    fn test_json_path_malformed() {
        assert!(json_path_get(&json!({}), "$.a[0").is_err());
        assert!(json_path_get(&json!({}), "$[x]").is_err());
    }
}
