//! OTLP attribute helpers
//!
//! Conversions from OTLP `AnyValue`/`KeyValue` into the typed shapes the
//! span store keeps.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use opentelemetry_proto::tonic::common::v1::{AnyValue, KeyValue, any_value};
use serde_json::Value as JsonValue;

/// Attribute value routed by its native type
#[derive(Debug, Clone, PartialEq)]
pub enum TypedAttr {
    String(String),
    Long(i64),
    Double(f64),
    Bool(bool),
    /// Base64 of the raw bytes
    Bytes(String),
}

/// Route an OTLP value to the tag map of its native type
///
/// Arrays and key-value lists are flattened to JSON text.
pub fn typed_value(value: &AnyValue) -> Option<TypedAttr> {
    match value.value.as_ref()? {
        any_value::Value::StringValue(s) => Some(TypedAttr::String(s.clone())),
        any_value::Value::BoolValue(b) => Some(TypedAttr::Bool(*b)),
        any_value::Value::IntValue(i) => Some(TypedAttr::Long(*i)),
        any_value::Value::DoubleValue(d) => Some(TypedAttr::Double(*d)),
        any_value::Value::BytesValue(b) => Some(TypedAttr::Bytes(STANDARD.encode(b))),
        any_value::Value::ArrayValue(_) | any_value::Value::KvlistValue(_) => {
            Some(TypedAttr::String(any_value_to_json(value).to_string()))
        }
    }
}

/// String rendering of a value; structured values become JSON text
pub fn any_value_to_string(value: &AnyValue) -> String {
    match &value.value {
        Some(any_value::Value::StringValue(s)) => s.clone(),
        Some(any_value::Value::BoolValue(b)) => b.to_string(),
        Some(any_value::Value::IntValue(i)) => i.to_string(),
        Some(any_value::Value::DoubleValue(d)) => d.to_string(),
        Some(any_value::Value::BytesValue(b)) => STANDARD.encode(b),
        Some(any_value::Value::ArrayValue(_) | any_value::Value::KvlistValue(_)) => {
            any_value_to_json(value).to_string()
        }
        None => String::new(),
    }
}

/// Convert AnyValue to JSON value (preserves native types)
pub fn any_value_to_json(value: &AnyValue) -> JsonValue {
    match &value.value {
        Some(any_value::Value::StringValue(s)) => serde_json::json!(s),
        Some(any_value::Value::BoolValue(b)) => serde_json::json!(b),
        Some(any_value::Value::IntValue(i)) => serde_json::json!(i),
        Some(any_value::Value::DoubleValue(d)) => serde_json::json!(d),
        Some(any_value::Value::ArrayValue(arr)) => {
            JsonValue::Array(arr.values.iter().map(any_value_to_json).collect())
        }
        Some(any_value::Value::KvlistValue(kvlist)) => {
            let map: serde_json::Map<String, JsonValue> = kvlist
                .values
                .iter()
                .filter_map(|kv| {
                    kv.value
                        .as_ref()
                        .map(|v| (kv.key.clone(), any_value_to_json(v)))
                })
                .collect();
            JsonValue::Object(map)
        }
        Some(any_value::Value::BytesValue(b)) => serde_json::json!(STANDARD.encode(b)),
        None => JsonValue::Null,
    }
}

/// First attribute named `key`, rendered as a string
pub fn find_string(attrs: &[KeyValue], key: &str) -> Option<String> {
    attrs
        .iter()
        .find(|kv| kv.key == key)
        .and_then(|kv| kv.value.as_ref())
        .map(any_value_to_string)
        .filter(|s| !s.is_empty())
}

/// First attribute named `key` holding an integer (or an integer string)
pub fn find_long(attrs: &[KeyValue], key: &str) -> Option<i64> {
    let value = attrs.iter().find(|kv| kv.key == key)?.value.as_ref()?;
    match value.value.as_ref()? {
        any_value::Value::IntValue(i) => Some(*i),
        any_value::Value::DoubleValue(d) if d.fract() == 0.0 => Some(*d as i64),
        any_value::Value::StringValue(s) => s.trim().parse().ok(),
        _ => None,
    }
}

#[cfg(test)]
pub fn kv(key: &str, value: any_value::Value) -> KeyValue {
    KeyValue {
        key: key.to_string(),
        value: Some(AnyValue { value: Some(value) }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use opentelemetry_proto::tonic::common::v1::{ArrayValue, KeyValueList};
    use serde_json::json;

    fn make_any_value(value: any_value::Value) -> AnyValue {
        AnyValue { value: Some(value) }
    }

    #[test]
    fn test_typed_value_routing() {
        assert_eq!(
            typed_value(&make_any_value(any_value::Value::IntValue(4))),
            Some(TypedAttr::Long(4))
        );
        assert_eq!(
            typed_value(&make_any_value(any_value::Value::BoolValue(true))),
            Some(TypedAttr::Bool(true))
        );
        assert_eq!(
            typed_value(&make_any_value(any_value::Value::BytesValue(vec![1, 2, 3]))),
            Some(TypedAttr::Bytes("AQID".into()))
        );
        assert_eq!(typed_value(&AnyValue { value: None }), None);
    }

    #[test]
    fn test_structured_values_become_json_text() {
        let arr = make_any_value(any_value::Value::ArrayValue(ArrayValue {
            values: vec![
                make_any_value(any_value::Value::IntValue(1)),
                make_any_value(any_value::Value::StringValue("a".into())),
            ],
        }));
        assert_eq!(typed_value(&arr), Some(TypedAttr::String(r#"[1,"a"]"#.into())));

        let kvlist = make_any_value(any_value::Value::KvlistValue(KeyValueList {
            values: vec![kv("role", any_value::Value::StringValue("user".into()))],
        }));
        assert_eq!(any_value_to_json(&kvlist), json!({"role": "user"}));
        assert_eq!(any_value_to_string(&kvlist), r#"{"role":"user"}"#);
    }

    #[test]
    fn test_find_helpers() {
        let attrs = vec![
            kv("a", any_value::Value::StringValue("".into())),
            kv("b", any_value::Value::IntValue(7)),
            kv("c", any_value::Value::StringValue("42".into())),
        ];
        assert_eq!(find_string(&attrs, "a"), None);
        assert_eq!(find_string(&attrs, "b").as_deref(), Some("7"));
        assert_eq!(find_long(&attrs, "b"), Some(7));
        assert_eq!(find_long(&attrs, "c"), Some(42));
        assert_eq!(find_long(&attrs, "missing"), None);
    }
}
