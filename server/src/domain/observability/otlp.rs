//! OTLP span conversion
//!
//! Turns an OTLP trace export into spans for the inner ingest path. Ids are
//! hex-encoded, times converted from ns to µs, and attributes routed into
//! the typed tag maps. A few well-known keys fill the span columns.

use std::collections::BTreeMap;

use opentelemetry_proto::tonic::collector::trace::v1::ExportTraceServiceRequest;
use opentelemetry_proto::tonic::common::v1::KeyValue;
use opentelemetry_proto::tonic::trace::v1::{Span as OtlpSpan, status::StatusCode};

use crate::core::constants::WORKSPACE_ID_ATTR;
use crate::data::types::{Span, SpanType, TAG_INPUT_TOKENS, TAG_OUTPUT_TOKENS};
use crate::utils::otlp::{TypedAttr, any_value_to_string, find_long, find_string, typed_value};
use crate::utils::time::nanos_to_micros;

/// Attribute keys read into span columns, in order of preference
const INPUT_KEYS: &[&str] = &["input", "gen_ai.prompt", "gen_ai.input.messages"];
const OUTPUT_KEYS: &[&str] = &["output", "gen_ai.completion", "gen_ai.output.messages"];
const INPUT_TOKEN_KEYS: &[&str] = &["gen_ai.usage.input_tokens", "gen_ai.usage.prompt_tokens"];
const OUTPUT_TOKEN_KEYS: &[&str] = &[
    "gen_ai.usage.output_tokens",
    "gen_ai.usage.completion_tokens",
];
const SPAN_TYPE_KEY: &str = "span_type";
const CALL_TYPE_KEY: &str = "call_type";
const OPERATION_KEY: &str = "gen_ai.operation.name";

/// Span events carrying prompt/completion payloads in older conventions
const PROMPT_EVENT: &str = "gen_ai.content.prompt";
const COMPLETION_EVENT: &str = "gen_ai.content.completion";

const STATUS_MESSAGE_TAG: &str = "status_message";

#[derive(Debug, Default)]
pub struct Converted {
    pub spans: Vec<Span>,
    /// Spans dropped for lack of a workspace
    pub rejected: usize,
}

/// Convert a trace export
///
/// The workspace comes from the resource attribute, falling back to
/// `default_workspace` (the request header).
pub fn convert_request(
    request: &ExportTraceServiceRequest,
    default_workspace: Option<&str>,
) -> Converted {
    let mut out = Converted::default();
    for resource_spans in &request.resource_spans {
        let resource_attrs: &[KeyValue] = resource_spans
            .resource
            .as_ref()
            .map(|r| r.attributes.as_slice())
            .unwrap_or_default();
        let workspace = find_string(resource_attrs, WORKSPACE_ID_ATTR)
            .or_else(|| default_workspace.map(str::to_string));
        let spans = resource_spans
            .scope_spans
            .iter()
            .flat_map(|scope| scope.spans.iter());

        let Some(workspace) = workspace else {
            let dropped = spans.count();
            tracing::warn!(spans = dropped, "OTLP spans without workspace dropped");
            out.rejected += dropped;
            continue;
        };
        let system_tags: BTreeMap<String, String> = resource_attrs
            .iter()
            .filter(|kv| kv.key != WORKSPACE_ID_ATTR)
            .filter_map(|kv| kv.value.as_ref().map(|v| (kv.key.clone(), any_value_to_string(v))))
            .collect();
        out.spans
            .extend(spans.map(|s| convert_span(s, &workspace, &system_tags)));
    }
    out
}

pub fn convert_span(span: &OtlpSpan, workspace_id: &str, system_tags: &BTreeMap<String, String>) -> Span {
    let attrs = &span.attributes;
    let start_us = nanos_to_micros(span.start_time_unix_nano);
    let end_us = nanos_to_micros(span.end_time_unix_nano);

    let mut out = Span {
        trace_id: hex::encode(&span.trace_id),
        span_id: hex::encode(&span.span_id),
        parent_id: hex::encode(&span.parent_span_id),
        workspace_id: workspace_id.to_string(),
        span_name: span.name.clone(),
        span_type: span_type(attrs),
        start_time_us: start_us,
        duration_us: end_us.saturating_sub(start_us).max(0),
        status_code: 0,
        call_type: find_string(attrs, CALL_TYPE_KEY).unwrap_or_default(),
        input: first_string(attrs, INPUT_KEYS)
            .or_else(|| event_payload(span, PROMPT_EVENT, "gen_ai.prompt"))
            .unwrap_or_default(),
        output: first_string(attrs, OUTPUT_KEYS)
            .or_else(|| event_payload(span, COMPLETION_EVENT, "gen_ai.completion"))
            .unwrap_or_default(),
        system_tags: system_tags.clone(),
        ..Default::default()
    };

    if let Some(status) = &span.status {
        if status.code == StatusCode::Error as i32 {
            out.status_code = 1;
        }
        if !status.message.is_empty() {
            out.system_tags
                .insert(STATUS_MESSAGE_TAG.to_string(), status.message.clone());
        }
    }

    let consumed = |key: &str| {
        INPUT_KEYS.contains(&key)
            || OUTPUT_KEYS.contains(&key)
            || key == SPAN_TYPE_KEY
            || key == CALL_TYPE_KEY
    };
    for kv in attrs.iter().filter(|kv| !consumed(&kv.key)) {
        match kv.value.as_ref().and_then(typed_value) {
            Some(TypedAttr::String(v)) => {
                out.tags_string.insert(kv.key.clone(), v);
            }
            Some(TypedAttr::Long(v)) => {
                out.tags_long.insert(kv.key.clone(), v);
            }
            Some(TypedAttr::Double(v)) => {
                out.tags_double.insert(kv.key.clone(), v);
            }
            Some(TypedAttr::Bool(v)) => {
                out.tags_bool.insert(kv.key.clone(), v);
            }
            Some(TypedAttr::Bytes(v)) => {
                out.tags_bytes.insert(kv.key.clone(), v);
            }
            None => {}
        }
    }

    if let Some(tokens) = INPUT_TOKEN_KEYS.iter().find_map(|k| find_long(attrs, k)) {
        out.tags_long.insert(TAG_INPUT_TOKENS.to_string(), tokens);
    }
    if let Some(tokens) = OUTPUT_TOKEN_KEYS.iter().find_map(|k| find_long(attrs, k)) {
        out.tags_long.insert(TAG_OUTPUT_TOKENS.to_string(), tokens);
    }
    out
}

fn first_string(attrs: &[KeyValue], keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|k| find_string(attrs, k))
}

fn event_payload(span: &OtlpSpan, event_name: &str, key: &str) -> Option<String> {
    span.events
        .iter()
        .filter(|e| e.name == event_name)
        .find_map(|e| find_string(&e.attributes, key))
}

/// Explicit `span_type` wins; otherwise inferred from the gen_ai operation
fn span_type(attrs: &[KeyValue]) -> SpanType {
    if let Some(explicit) = find_string(attrs, SPAN_TYPE_KEY) {
        return SpanType::parse_lossy(&explicit);
    }
    match find_string(attrs, OPERATION_KEY).as_deref() {
        Some("chat" | "text_completion" | "generate_content") => SpanType::Model,
        Some("embeddings") => SpanType::Embedding,
        Some("execute_tool") => SpanType::Function,
        Some("invoke_agent" | "create_agent") => SpanType::Agent,
        _ => SpanType::Unknown,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use opentelemetry_proto::tonic::common::v1::any_value::Value;
    use opentelemetry_proto::tonic::resource::v1::Resource;
    use opentelemetry_proto::tonic::trace::v1::{ResourceSpans, ScopeSpans, Status, span::Event};

    use crate::utils::otlp::kv;

    fn otlp_span(attributes: Vec<KeyValue>) -> OtlpSpan {
        OtlpSpan {
            trace_id: vec![0xab; 16],
            span_id: vec![0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08],
            name: "chat gpt".into(),
            start_time_unix_nano: 1_700_000_000_123_456_789,
            end_time_unix_nano: 1_700_000_001_123_456_789,
            attributes,
            ..Default::default()
        }
    }

    fn request(resource: Vec<KeyValue>, spans: Vec<OtlpSpan>) -> ExportTraceServiceRequest {
        ExportTraceServiceRequest {
            resource_spans: vec![ResourceSpans {
                resource: Some(Resource {
                    attributes: resource,
                    ..Default::default()
                }),
                scope_spans: vec![ScopeSpans {
                    spans,
                    ..Default::default()
                }],
                ..Default::default()
            }],
        }
    }

    #[test]
    fn test_convert_ids_times_and_columns() {
        let span = otlp_span(vec![
            kv("gen_ai.operation.name", Value::StringValue("chat".into())),
            kv("gen_ai.prompt", Value::StringValue("hello".into())),
            kv("output", Value::StringValue("hi!".into())),
            kv("gen_ai.usage.prompt_tokens", Value::IntValue(12)),
            kv("gen_ai.usage.output_tokens", Value::IntValue(3)),
            kv("temperature", Value::DoubleValue(0.2)),
            kv("stream", Value::BoolValue(false)),
        ]);
        let converted = convert_request(
            &request(
                vec![
                    kv(WORKSPACE_ID_ATTR, Value::StringValue("7".into())),
                    kv("service.name", Value::StringValue("bot".into())),
                ],
                vec![span],
            ),
            None,
        );
        assert_eq!(converted.rejected, 0);
        let s = &converted.spans[0];
        assert_eq!(s.trace_id, "ab".repeat(16));
        assert_eq!(s.span_id, "0102030405060708");
        assert!(s.is_root());
        assert_eq!(s.workspace_id, "7");
        assert_eq!(s.start_time_us, 1_700_000_000_123_456);
        assert_eq!(s.duration_us, 1_000_000);
        assert_eq!(s.span_type, SpanType::Model);
        assert_eq!((s.input.as_str(), s.output.as_str()), ("hello", "hi!"));
        assert_eq!(s.input_tokens(), 12);
        assert_eq!(s.output_tokens(), 3);
        assert_eq!(s.tags_double["temperature"], 0.2);
        assert!(!s.tags_bool["stream"]);
        assert!(!s.tags_string.contains_key("gen_ai.prompt"));
        assert_eq!(s.system_tags["service.name"], "bot");
        assert!(!s.system_tags.contains_key(WORKSPACE_ID_ATTR));
    }

    #[test]
    fn test_workspace_fallback_and_rejection() {
        let with_header = convert_request(&request(vec![], vec![otlp_span(vec![])]), Some("9"));
        assert_eq!(with_header.spans[0].workspace_id, "9");

        let without = convert_request(&request(vec![], vec![otlp_span(vec![]), otlp_span(vec![])]), None);
        assert!(without.spans.is_empty());
        assert_eq!(without.rejected, 2);
    }

    #[test]
    fn test_status_and_events() {
        let mut span = otlp_span(vec![kv("span_type", Value::StringValue("agent".into()))]);
        span.status = Some(Status {
            message: "boom".into(),
            code: StatusCode::Error as i32,
        });
        span.events = vec![Event {
            name: PROMPT_EVENT.into(),
            attributes: vec![kv("gen_ai.prompt", Value::StringValue("from event".into()))],
            ..Default::default()
        }];
        let s = convert_span(&span, "7", &BTreeMap::new());
        assert_eq!(s.status_code, 1);
        assert_eq!(s.system_tags[STATUS_MESSAGE_TAG], "boom");
        assert_eq!(s.input, "from event");
        assert_eq!(s.span_type, SpanType::Agent);
    }
}
