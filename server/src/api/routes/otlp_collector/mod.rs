//! OpenTelemetry Protocol (OTLP) HTTP trace endpoint

mod encoding;
mod traces;

use axum::Router;
use axum::routing::post;

use crate::data::topics::Publisher;
use crate::domain::observability::SpanBatch;

#[derive(Clone)]
pub struct OtlpState {
    /// Inner ingest topic
    pub publisher: Publisher<SpanBatch>,
}

pub fn routes(publisher: Publisher<SpanBatch>) -> Router {
    Router::new()
        .route("/traces", post(traces::export))
        .with_state(OtlpState { publisher })
}
