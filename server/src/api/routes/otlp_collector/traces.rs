//! Traces export endpoint

use std::time::Duration;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, HeaderName, StatusCode};
use axum::response::{IntoResponse, Response};
use opentelemetry_proto::tonic::collector::trace::v1::{
    ExportTracePartialSuccess, ExportTraceServiceRequest, ExportTraceServiceResponse,
};

use super::OtlpState;
use super::encoding::{OtlpContentType, decode_request, success_response};
use crate::api::extractors::Caller;
use crate::api::types::ApiError;
use crate::core::constants::{BACKPRESSURE_RETRY_AFTER_SECS, HEADER_WORKSPACE_ID};
use crate::domain::error::ServiceError;
use crate::domain::observability::SpanBatch;
use crate::domain::observability::ingest::enqueue;
use crate::domain::observability::otlp::convert_request;

/// Maximum retry attempts for a full ingest queue
const PUBLISH_MAX_ATTEMPTS: u32 = 3;

/// Base delay in milliseconds for exponential backoff
const PUBLISH_BASE_DELAY_MS: u64 = 50;

pub async fn export(
    State(state): State<OtlpState>,
    caller: Caller,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let content_type = OtlpContentType::from_headers(&headers);

    let request: ExportTraceServiceRequest = match decode_request(&body, content_type) {
        Ok(req) => req,
        Err(e) => return e.into_response(),
    };

    let default_workspace = headers
        .get(HEADER_WORKSPACE_ID)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty());
    let converted = convert_request(&request, default_workspace);
    let rejected = converted.rejected;

    if !converted.spans.is_empty() {
        let batch = SpanBatch {
            user_id: caller.0,
            spans: converted.spans,
        };
        if let Err(e) = publish_with_retry(&state, batch).await {
            return match e {
                ServiceError::Transient(_) => (
                    StatusCode::SERVICE_UNAVAILABLE,
                    [(
                        HeaderName::from_static("retry-after"),
                        BACKPRESSURE_RETRY_AFTER_SECS.to_string(),
                    )],
                )
                    .into_response(),
                other => ApiError::from(other).into_response(),
            };
        }
    }

    let partial_success = (rejected > 0).then(|| ExportTracePartialSuccess {
        rejected_spans: rejected as i64,
        error_message: "spans without a workspace id were dropped".to_string(),
    });
    success_response(&ExportTraceServiceResponse { partial_success }, content_type)
}

/// Publish to the ingest topic, backing off while the queue is full
async fn publish_with_retry(state: &OtlpState, batch: SpanBatch) -> Result<usize, ServiceError> {
    let mut attempt = 1;
    loop {
        match enqueue(&state.publisher, batch.clone()) {
            Ok(count) => {
                if attempt > 1 {
                    tracing::debug!(attempt, "Span publish succeeded after retry");
                }
                return Ok(count);
            }
            Err(e) if e.is_retryable() && attempt < PUBLISH_MAX_ATTEMPTS => {
                let delay = Duration::from_millis(PUBLISH_BASE_DELAY_MS * 2_u64.pow(attempt - 1));
                tracing::warn!(
                    error = %e,
                    attempt,
                    delay_ms = delay.as_millis(),
                    "Retrying span publish after transient error"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => {
                tracing::warn!(error = %e, attempts = attempt, "Failed to publish spans");
                return Err(e);
            }
        }
    }
}
