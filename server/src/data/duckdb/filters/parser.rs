//! Filter parsing
//!
//! Parses a JSON filter tree and validates it against the known span fields.

use super::fields;
use super::types::{FieldType, FilterField, FilterError, FilterFields, QueryType};

/// Maximum size of filter JSON in bytes (64KB)
const MAX_FILTER_JSON_SIZE: usize = 64 * 1024;

/// Parse a filter tree from JSON; an empty string is the empty filter
pub fn parse_filters(json_str: &str, max_depth: usize) -> Result<FilterFields, FilterError> {
    if json_str.trim().is_empty() {
        return Ok(FilterFields::default());
    }
    if json_str.len() > MAX_FILTER_JSON_SIZE {
        return Err(FilterError::TooLarge {
            max: MAX_FILTER_JSON_SIZE,
        });
    }

    let filters: FilterFields =
        serde_json::from_str(json_str).map_err(|e| FilterError::InvalidJson(e.to_string()))?;
    validate_filters(&filters, max_depth)?;
    Ok(filters)
}

/// Validate every node of an already-decoded tree
pub fn validate_filters(filters: &FilterFields, max_depth: usize) -> Result<(), FilterError> {
    if filters.depth() > max_depth {
        return Err(FilterError::TooDeep { max: max_depth });
    }
    validate_level(filters)
}

fn validate_level(filters: &FilterFields) -> Result<(), FilterError> {
    for field in &filters.filter_fields {
        match &field.sub_filter {
            Some(sub) => validate_level(sub)?,
            None => validate_field(field)?,
        }
    }
    Ok(())
}

fn validate_field(field: &FilterField) -> Result<(), FilterError> {
    let name = field.field_name.as_str();
    let invalid = |reason: &str| FilterError::InvalidValue {
        field: name.to_string(),
        reason: reason.to_string(),
    };

    if name.is_empty() {
        return Err(invalid("field_name is required"));
    }

    let options = match fields::builtin(name) {
        Some(def) => {
            if def.field_type != field.field_type {
                return Err(FilterError::TypeMismatch {
                    field: name.to_string(),
                    expected: def.field_type,
                    actual: field.field_type,
                });
            }
            def.options
        }
        None if fields::is_valid_custom_name(name) => &[],
        None => return Err(FilterError::UnknownField(name.to_string())),
    };

    let query_type = field
        .query_type
        .ok_or_else(|| invalid("query_type is required"))?;
    if !query_type.is_supported_for(field.field_type) {
        return Err(FilterError::UnsupportedQueryType {
            field: name.to_string(),
            query_type,
        });
    }

    if query_type == QueryType::Exists {
        return Ok(());
    }
    if field.values.is_empty() {
        return Err(invalid("at least one value is required"));
    }
    for value in &field.values {
        check_value(field.field_type, value).map_err(|reason| invalid(&reason))?;
        if !options.is_empty() && !options.contains(&value.as_str()) {
            return Err(invalid(&format!(
                "'{}' is not one of {}",
                value,
                options.join(", ")
            )));
        }
    }
    Ok(())
}

fn check_value(field_type: FieldType, value: &str) -> Result<(), String> {
    let ok = match field_type {
        FieldType::String => true,
        FieldType::Long => value.trim().parse::<i64>().is_ok(),
        FieldType::Double => value.trim().parse::<f64>().is_ok_and(f64::is_finite),
        FieldType::Bool => value.trim().parse::<bool>().is_ok(),
    };
    if ok {
        Ok(())
    } else {
        Err(format!("'{}' is not a valid {}", value, field_type))
    }
}
