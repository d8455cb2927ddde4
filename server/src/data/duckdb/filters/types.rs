//! Filter tree definitions
//!
//! A filter is a tree: each level holds a list of field conditions joined by
//! `query_and_or`, and any condition may carry a `sub_filter` that stands in
//! for its own values/query_type.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Value type a condition compares as
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    #[default]
    String,
    Long,
    Double,
    Bool,
}

impl FieldType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Long => "long",
            Self::Double => "double",
            Self::Bool => "bool",
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryType {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
    In,
    NotIn,
    Like,
    NotLike,
    Exists,
}

impl QueryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Eq => "eq",
            Self::Ne => "ne",
            Self::Gt => "gt",
            Self::Ge => "ge",
            Self::Lt => "lt",
            Self::Le => "le",
            Self::In => "in",
            Self::NotIn => "not_in",
            Self::Like => "like",
            Self::NotLike => "not_like",
            Self::Exists => "exists",
        }
    }

    /// Operators meaningful for a value type
    pub fn supported_for(field_type: FieldType) -> &'static [QueryType] {
        use QueryType::*;
        match field_type {
            FieldType::String => &[Eq, Ne, In, NotIn, Like, NotLike, Exists],
            FieldType::Long | FieldType::Double => &[Eq, Ne, Gt, Ge, Lt, Le, In, NotIn, Exists],
            FieldType::Bool => &[Eq, Ne, Exists],
        }
    }

    pub fn is_supported_for(&self, field_type: FieldType) -> bool {
        Self::supported_for(field_type).contains(self)
    }
}

impl fmt::Display for QueryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum QueryRelation {
    #[default]
    And,
    Or,
}

/// One condition of the tree
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct FilterField {
    #[serde(default)]
    pub field_name: String,
    #[serde(default)]
    pub field_type: FieldType,
    #[serde(default)]
    pub values: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query_type: Option<QueryType>,
    /// Joins the comparisons of a multi-valued `like`/`not_like`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query_and_or: Option<QueryRelation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub_filter: Option<Box<FilterFields>>,
}

/// One level of the tree
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct FilterFields {
    #[serde(default)]
    pub query_and_or: QueryRelation,
    #[serde(default)]
    pub filter_fields: Vec<FilterField>,
}

impl FilterFields {
    pub fn is_empty(&self) -> bool {
        self.filter_fields.is_empty()
    }

    /// Nesting depth; a flat list is depth 1
    pub fn depth(&self) -> usize {
        1 + self
            .filter_fields
            .iter()
            .filter_map(|f| f.sub_filter.as_ref())
            .map(|s| s.depth())
            .max()
            .unwrap_or(0)
    }

    /// Conjunction of `self` and `other` (either side may be empty)
    pub fn and(self, other: FilterFields) -> FilterFields {
        match (self.is_empty(), other.is_empty()) {
            (true, _) => other,
            (_, true) => self,
            _ => FilterFields {
                query_and_or: QueryRelation::And,
                filter_fields: vec![
                    FilterField {
                        sub_filter: Some(Box::new(self)),
                        ..Default::default()
                    },
                    FilterField {
                        sub_filter: Some(Box::new(other)),
                        ..Default::default()
                    },
                ],
            },
        }
    }
}

/// Filter validation errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FilterError {
    #[error("filter JSON exceeds {max} bytes")]
    TooLarge { max: usize },

    #[error("invalid filter JSON: {0}")]
    InvalidJson(String),

    #[error("filter nesting depth exceeds {max}")]
    TooDeep { max: usize },

    #[error("unknown filter field: {0}")]
    UnknownField(String),

    #[error("filter field {field} is {expected}, not {actual}")]
    TypeMismatch {
        field: String,
        expected: FieldType,
        actual: FieldType,
    },

    #[error("query type {query_type} is not supported for field {field}")]
    UnsupportedQueryType { field: String, query_type: QueryType },

    #[error("invalid value for field {field}: {reason}")]
    InvalidValue { field: String, reason: String },
}
