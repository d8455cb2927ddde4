//! OTLP content-type encoding and decoding
//!
//! Trace exports arrive as protobuf (`application/x-protobuf`) or JSON
//! (`application/json`); responses mirror the request encoding.

use std::fmt;

use axum::body::Bytes;
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use prost::Message;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OtlpContentType {
    Protobuf,
    Json,
}

impl OtlpContentType {
    /// Protobuf unless the request says JSON
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let content_type = headers
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");

        if content_type.starts_with("application/json") {
            OtlpContentType::Json
        } else {
            OtlpContentType::Protobuf
        }
    }

    pub fn as_header_value(self) -> &'static str {
        match self {
            OtlpContentType::Protobuf => "application/x-protobuf",
            OtlpContentType::Json => "application/json",
        }
    }
}

pub fn decode_request<T>(body: &Bytes, content_type: OtlpContentType) -> Result<T, DecodeError>
where
    T: Message + Default + for<'de> Deserialize<'de>,
{
    match content_type {
        OtlpContentType::Protobuf => {
            T::decode(body.as_ref()).map_err(|e| DecodeError::Protobuf(e.to_string()))
        }
        OtlpContentType::Json => {
            serde_json::from_slice(body.as_ref()).map_err(|e| DecodeError::Json(e.to_string()))
        }
    }
}

/// 200 with the response encoded like the request
pub fn success_response<T>(response: &T, content_type: OtlpContentType) -> Response
where
    T: Message + Serialize,
{
    let encoded = match content_type {
        OtlpContentType::Protobuf => Ok(response.encode_to_vec()),
        OtlpContentType::Json => serde_json::to_vec(response).map_err(|e| e.to_string()),
    };
    match encoded {
        Ok(bytes) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, content_type.as_header_value())],
            bytes,
        )
            .into_response(),
        Err(e) => {
            tracing::error!(error = %e, "Failed to encode OTLP response");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                [(header::CONTENT_TYPE, "text/plain")],
                "Internal server error",
            )
                .into_response()
        }
    }
}

#[derive(Debug)]
pub enum DecodeError {
    Protobuf(String),
    Json(String),
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeError::Protobuf(e) => write!(f, "protobuf decode error: {}", e),
            DecodeError::Json(e) => write!(f, "JSON decode error: {}", e),
        }
    }
}

impl std::error::Error for DecodeError {}

impl IntoResponse for DecodeError {
    /// Details are logged, not returned
    fn into_response(self) -> Response {
        tracing::warn!(error = %self, "Failed to decode OTLP request");
        let message = match self {
            DecodeError::Protobuf(_) => "Failed to decode protobuf request",
            DecodeError::Json(_) => "Failed to decode JSON request",
        };
        (
            StatusCode::BAD_REQUEST,
            [(header::CONTENT_TYPE, "text/plain")],
            message,
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use opentelemetry_proto::tonic::collector::trace::v1::ExportTraceServiceRequest;
    use opentelemetry_proto::tonic::trace::v1::{ResourceSpans, ScopeSpans, Span};

    fn request() -> ExportTraceServiceRequest {
        ExportTraceServiceRequest {
            resource_spans: vec![ResourceSpans {
                scope_spans: vec![ScopeSpans {
                    spans: vec![Span {
                        trace_id: vec![1; 16],
                        span_id: vec![2; 8],
                        name: "llm-call".to_string(),
                        ..Default::default()
                    }],
                    ..Default::default()
                }],
                ..Default::default()
            }],
        }
    }

    #[test]
    fn test_content_type_detection() {
        let mut headers = HeaderMap::new();
        assert_eq!(OtlpContentType::from_headers(&headers), OtlpContentType::Protobuf);
        headers.insert(
            header::CONTENT_TYPE,
            "application/json; charset=utf-8".parse().unwrap(),
        );
        assert_eq!(OtlpContentType::from_headers(&headers), OtlpContentType::Json);
        headers.insert(header::CONTENT_TYPE, "text/plain".parse().unwrap());
        assert_eq!(OtlpContentType::from_headers(&headers), OtlpContentType::Protobuf);
    }

    #[test]
    fn test_decode_protobuf() {
        let bytes = Bytes::from(request().encode_to_vec());
        let decoded: ExportTraceServiceRequest =
            decode_request(&bytes, OtlpContentType::Protobuf).unwrap();
        assert_eq!(decoded.resource_spans[0].scope_spans[0].spans[0].name, "llm-call");

        let empty: ExportTraceServiceRequest =
            decode_request(&Bytes::new(), OtlpContentType::Protobuf).unwrap();
        assert!(empty.resource_spans.is_empty());
    }

    #[test]
    fn test_decode_json_matches_encoded_response() {
        let body = serde_json::to_vec(&request()).unwrap();
        let decoded: ExportTraceServiceRequest =
            decode_request(&Bytes::from(body), OtlpContentType::Json).unwrap();
        let span = &decoded.resource_spans[0].scope_spans[0].spans[0];
        assert_eq!(span.trace_id, vec![1; 16]);
        assert_eq!(span.name, "llm-call");
    }

    #[test]
    fn test_decode_errors() {
        let err = decode_request::<ExportTraceServiceRequest>(
            &Bytes::from("not json"),
            OtlpContentType::Json,
        )
        .unwrap_err();
        assert!(matches!(err, DecodeError::Json(_)));

        let err = decode_request::<ExportTraceServiceRequest>(
            &Bytes::from("not protobuf"),
            OtlpContentType::Protobuf,
        )
        .unwrap_err();
        assert!(matches!(err, DecodeError::Protobuf(_)));
    }
}
