//! Span filter trees
//!
//! Filters arrive as a JSON tree of field conditions. They are validated
//! against the known span fields, then evaluated per span while the store
//! scans a partition.

mod fields;
mod matcher;
mod parser;
mod types;

pub use fields::{FieldDef, SPAN_FIELDS, STATUS_ERROR, STATUS_SUCCESS, builtin, is_valid_custom_name};
pub use parser::{parse_filters, validate_filters};
pub use types::{FieldType, FilterError, FilterField, FilterFields, QueryRelation, QueryType};
