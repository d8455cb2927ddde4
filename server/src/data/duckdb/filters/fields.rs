//! Filterable span fields
//!
//! Built-in fields map onto span columns. Any other well-formed name is a
//! custom tag, resolved against the tag map matching its declared type.

use super::types::{FieldType, QueryType};

/// Longest custom tag name accepted in a filter
const MAX_CUSTOM_FIELD_LEN: usize = 128;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldDef {
    pub name: &'static str,
    pub field_type: FieldType,
    /// Closed value set, empty when free-form
    pub options: &'static [&'static str],
}

impl FieldDef {
    pub fn query_types(&self) -> &'static [QueryType] {
        QueryType::supported_for(self.field_type)
    }
}

const fn def(name: &'static str, field_type: FieldType) -> FieldDef {
    FieldDef {
        name,
        field_type,
        options: &[],
    }
}

pub const STATUS_SUCCESS: &str = "success";
pub const STATUS_ERROR: &str = "error";

pub const SPAN_FIELDS: &[FieldDef] = &[
    def("trace_id", FieldType::String),
    def("span_id", FieldType::String),
    def("parent_id", FieldType::String),
    def("span_name", FieldType::String),
    def("span_type", FieldType::String),
    def("call_type", FieldType::String),
    FieldDef {
        name: "status",
        field_type: FieldType::String,
        options: &[STATUS_SUCCESS, STATUS_ERROR],
    },
    def("status_code", FieldType::Long),
    // milliseconds
    def("duration", FieldType::Long),
    def("start_time", FieldType::Long),
    def("input", FieldType::String),
    def("output", FieldType::String),
    def("input_tokens", FieldType::Long),
    def("output_tokens", FieldType::Long),
    def("tokens", FieldType::Long),
];

pub fn builtin(name: &str) -> Option<&'static FieldDef> {
    SPAN_FIELDS.iter().find(|f| f.name == name)
}

/// Whether `name` may address a custom tag
pub fn is_valid_custom_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= MAX_CUSTOM_FIELD_LEN
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-' | ':' | '/'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_lookup() {
        assert_eq!(builtin("duration").unwrap().field_type, FieldType::Long);
        assert_eq!(builtin("status").unwrap().options, &["success", "error"]);
        assert!(builtin("user_rating").is_none());
    }

    #[test]
    fn test_custom_name_rules() {
        assert!(is_valid_custom_name("gen_ai.request.model"));
        assert!(!is_valid_custom_name(""));
        assert!(!is_valid_custom_name("drop table;"));
        assert!(!is_valid_custom_name(&"x".repeat(200)));
    }
}
