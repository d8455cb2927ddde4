//! In-memory evaluation of a filter tree against a span

use std::borrow::Cow;

use super::fields::{STATUS_ERROR, STATUS_SUCCESS};
use super::types::{FieldType, FilterField, FilterFields, QueryRelation, QueryType};
use crate::data::types::Span;
use crate::utils::time::MICROS_PER_MILLI;

/// Resolved value of a field on one span
#[derive(Debug, Clone, PartialEq)]
enum FieldValue<'a> {
    Str(Cow<'a, str>),
    Num(f64),
    Bool(bool),
}

impl FilterFields {
    /// Evaluate the tree; an empty level matches everything
    pub fn matches(&self, span: &Span) -> bool {
        if self.filter_fields.is_empty() {
            return true;
        }
        match self.query_and_or {
            QueryRelation::And => self.filter_fields.iter().all(|f| f.matches(span)),
            QueryRelation::Or => self.filter_fields.iter().any(|f| f.matches(span)),
        }
    }
}

impl FilterField {
    pub fn matches(&self, span: &Span) -> bool {
        if let Some(sub) = &self.sub_filter {
            return sub.matches(span);
        }
        let Some(query_type) = self.query_type else {
            return true;
        };
        let value = resolve(span, &self.field_name, self.field_type);

        match query_type {
            QueryType::Exists => value.is_some(),
            QueryType::Eq => value.is_some_and(|v| self.first().is_some_and(|c| equals(&v, c))),
            QueryType::Ne => !value.is_some_and(|v| self.first().is_some_and(|c| equals(&v, c))),
            QueryType::In => value.is_some_and(|v| self.values.iter().any(|c| equals(&v, c))),
            QueryType::NotIn => !value.is_some_and(|v| self.values.iter().any(|c| equals(&v, c))),
            QueryType::Gt => self.compare(value, |a, b| a > b),
            QueryType::Ge => self.compare(value, |a, b| a >= b),
            QueryType::Lt => self.compare(value, |a, b| a < b),
            QueryType::Le => self.compare(value, |a, b| a <= b),
            QueryType::Like => value.is_some_and(|v| self.like(&v)),
            QueryType::NotLike => !value.is_some_and(|v| self.like(&v)),
        }
    }

    fn first(&self) -> Option<&str> {
        self.values.first().map(String::as_str)
    }

    fn compare(&self, value: Option<FieldValue<'_>>, op: impl Fn(f64, f64) -> bool) -> bool {
        let Some(FieldValue::Num(actual)) = value else {
            return false;
        };
        self.first()
            .and_then(|c| c.trim().parse::<f64>().ok())
            .is_some_and(|expected| op(actual, expected))
    }

    /// Substring match; several values join by `query_and_or` (default `or`)
    fn like(&self, value: &FieldValue<'_>) -> bool {
        let FieldValue::Str(s) = value else {
            return false;
        };
        let mut hits = self.values.iter().map(|needle| s.contains(needle.as_str()));
        match self.query_and_or.unwrap_or(QueryRelation::Or) {
            QueryRelation::And => hits.all(|h| h),
            QueryRelation::Or => hits.any(|h| h),
        }
    }
}

fn equals(value: &FieldValue<'_>, candidate: &str) -> bool {
    match value {
        FieldValue::Str(s) => s.as_ref() == candidate,
        FieldValue::Num(n) => candidate.trim().parse::<f64>().is_ok_and(|c| c == *n),
        FieldValue::Bool(b) => candidate.trim().parse::<bool>().is_ok_and(|c| c == *b),
    }
}

fn non_empty(s: &str) -> Option<FieldValue<'_>> {
    (!s.is_empty()).then_some(FieldValue::Str(Cow::Borrowed(s)))
}

fn resolve<'a>(span: &'a Span, name: &str, field_type: FieldType) -> Option<FieldValue<'a>> {
    let millis = |us: i64| FieldValue::Num((us / MICROS_PER_MILLI) as f64);
    match name {
        "trace_id" => non_empty(&span.trace_id),
        "span_id" => non_empty(&span.span_id),
        "parent_id" => non_empty(&span.parent_id),
        "span_name" => non_empty(&span.span_name),
        "call_type" => non_empty(&span.call_type),
        "input" => non_empty(&span.input),
        "output" => non_empty(&span.output),
        "span_type" => Some(FieldValue::Str(Cow::Borrowed(span.span_type.as_str()))),
        "status" => Some(FieldValue::Str(Cow::Borrowed(if span.is_success() {
            STATUS_SUCCESS
        } else {
            STATUS_ERROR
        }))),
        "status_code" => Some(FieldValue::Num(f64::from(span.status_code))),
        "duration" => Some(millis(span.duration_us)),
        "start_time" => Some(millis(span.start_time_us)),
        "input_tokens" => Some(FieldValue::Num(span.input_tokens() as f64)),
        "output_tokens" => Some(FieldValue::Num(span.output_tokens() as f64)),
        "tokens" => Some(FieldValue::Num(
            span.input_tokens().saturating_add(span.output_tokens()) as f64,
        )),
        custom => resolve_tag(span, custom, field_type),
    }
}

fn resolve_tag<'a>(span: &'a Span, key: &str, field_type: FieldType) -> Option<FieldValue<'a>> {
    match field_type {
        FieldType::String => span
            .tags_string
            .get(key)
            .or_else(|| span.system_tags.get(key))
            .map(|s| FieldValue::Str(Cow::Borrowed(s.as_str()))),
        FieldType::Long => span.tags_long.get(key).map(|v| FieldValue::Num(*v as f64)),
        FieldType::Double => span
            .tags_double
            .get(key)
            .copied()
            .or_else(|| span.tags_long.get(key).map(|v| *v as f64))
            .map(FieldValue::Num),
        FieldType::Bool => span.tags_bool.get(key).map(|b| FieldValue::Bool(*b)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::types::SpanType;

    fn span() -> Span {
        let mut span = Span {
            trace_id: "T1".into(),
            span_id: "S1".into(),
            workspace_id: "7".into(),
            span_name: "chat completion".into(),
            span_type: SpanType::Model,
            start_time_us: 1_700_000_000_000_000,
            duration_us: 1_500_000,
            status_code: 0,
            ..Default::default()
        };
        span.tags_string.insert("env".into(), "prod".into());
        span.tags_double.insert("score".into(), 0.8);
        span.tags_long.insert("input_tokens".into(), 10);
        span.tags_bool.insert("cached".into(), true);
        span
    }

    fn field(name: &str, ft: FieldType, qt: QueryType, values: &[&str]) -> FilterField {
        FilterField {
            field_name: name.into(),
            field_type: ft,
            values: values.iter().map(|v| v.to_string()).collect(),
            query_type: Some(qt),
            ..Default::default()
        }
    }

    fn level(rel: QueryRelation, fields: Vec<FilterField>) -> FilterFields {
        FilterFields {
            query_and_or: rel,
            filter_fields: fields,
        }
    }

    #[test]
    fn test_empty_matches_all() {
        assert!(FilterFields::default().matches(&span()));
    }

    #[test]
    fn test_builtin_fields() {
        let s = span();
        assert!(field("span_name", FieldType::String, QueryType::Like, &["chat"]).matches(&s));
        assert!(field("span_type", FieldType::String, QueryType::Eq, &["model"]).matches(&s));
        assert!(field("status", FieldType::String, QueryType::Eq, &["success"]).matches(&s));
        assert!(field("duration", FieldType::Long, QueryType::Ge, &["1500"]).matches(&s));
        assert!(!field("duration", FieldType::Long, QueryType::Gt, &["1500"]).matches(&s));
        assert!(field("tokens", FieldType::Long, QueryType::Eq, &["10"]).matches(&s));
        assert!(!field("parent_id", FieldType::String, QueryType::Exists, &[]).matches(&s));
    }

    #[test]
    fn test_custom_tags() {
        let s = span();
        assert!(field("env", FieldType::String, QueryType::In, &["dev", "prod"]).matches(&s));
        assert!(field("env", FieldType::String, QueryType::NotIn, &["dev"]).matches(&s));
        assert!(field("score", FieldType::Double, QueryType::Lt, &["0.9"]).matches(&s));
        assert!(field("cached", FieldType::Bool, QueryType::Eq, &["true"]).matches(&s));
        assert!(field("missing", FieldType::String, QueryType::Ne, &["x"]).matches(&s));
        assert!(!field("missing", FieldType::Long, QueryType::Gt, &["0"]).matches(&s));
    }

    #[test]
    fn test_like_relation() {
        let s = span();
        let mut f = field("span_name", FieldType::String, QueryType::Like, &["chat", "embed"]);
        assert!(f.matches(&s));
        f.query_and_or = Some(QueryRelation::And);
        assert!(!f.matches(&s));
        assert!(
            field("span_name", FieldType::String, QueryType::NotLike, &["embed"]).matches(&s)
        );
    }

    #[test]
    fn test_nested_tree() {
        let s = span();
        let inner = level(
            QueryRelation::Or,
            vec![
                field("env", FieldType::String, QueryType::Eq, &["dev"]),
                field("score", FieldType::Double, QueryType::Gt, &["0.5"]),
            ],
        );
        let tree = level(
            QueryRelation::And,
            vec![
                field("span_type", FieldType::String, QueryType::Eq, &["model"]),
                FilterField {
                    field_name: "ignored".into(),
                    values: vec!["ignored".into()],
                    query_type: Some(QueryType::Eq),
                    sub_filter: Some(Box::new(inner)),
                    ..Default::default()
                },
            ],
        );
        assert!(tree.matches(&s));

        let failing = level(
            QueryRelation::And,
            vec![
                field("span_type", FieldType::String, QueryType::Eq, &["agent"]),
                field("env", FieldType::String, QueryType::Eq, &["prod"]),
            ],
        );
        assert!(!failing.matches(&s));
    }
}
