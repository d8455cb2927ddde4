//! Trace ingestion and query endpoints

pub mod types;

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};

use crate::api::extractors::{Caller, ValidatedJson};
use crate::api::types::{AffectedResponse, ApiError};
use crate::data::topics::Publisher;
use crate::domain::observability::ingest::{IngestOutcome, enqueue};
use crate::domain::observability::query::{
    AdvanceInfoRequest, DeleteSpansRequest, GetTraceRequest, GetTraceResponse, ListSpansRequest,
    ListSpansResponse, TracesMeta,
};
use crate::domain::observability::{Ingestor, SpanBatch, TraceQuery};

use types::{AdvanceInfoResponse, IngestBody, InnerIngestBody, MetaQuery, QueuedResponse};

/// Shared state for trace endpoints
#[derive(Clone)]
pub struct TracesApiState {
    pub ingestor: Arc<Ingestor>,
    pub query: Arc<TraceQuery>,
    pub ingest_publisher: Publisher<SpanBatch>,
}

pub fn routes(
    ingestor: Arc<Ingestor>,
    query: Arc<TraceQuery>,
    ingest_publisher: Publisher<SpanBatch>,
) -> Router {
    let state = TracesApiState {
        ingestor,
        query,
        ingest_publisher,
    };

    Router::new()
        .route("/traces/ingest", post(ingest))
        .route("/traces/ingest/inner", post(ingest_inner))
        .route("/traces/get", post(get_trace))
        .route("/traces/advance_info", post(advance_info))
        .route("/traces/meta", get(meta))
        .route("/traces/delete", post(delete_spans))
        .route("/spans/list", post(list_spans))
        .with_state(state)
}

/// Public ingest, written synchronously
pub async fn ingest(
    State(state): State<TracesApiState>,
    caller: Caller,
    ValidatedJson(body): ValidatedJson<IngestBody>,
) -> Result<Json<IngestOutcome>, ApiError> {
    let outcome = state.ingestor.ingest(caller.user_id(), body.spans).await?;
    Ok(Json(outcome))
}

/// Inner ingest, queued for the ingest pipeline
pub async fn ingest_inner(
    State(state): State<TracesApiState>,
    caller: Caller,
    ValidatedJson(body): ValidatedJson<InnerIngestBody>,
) -> Result<(StatusCode, Json<QueuedResponse>), ApiError> {
    let batch = SpanBatch {
        user_id: caller.0,
        spans: body.spans,
    };
    let queued = enqueue(&state.ingest_publisher, batch)?;
    Ok((StatusCode::ACCEPTED, Json(QueuedResponse { queued })))
}

pub async fn list_spans(
    State(state): State<TracesApiState>,
    caller: Caller,
    Json(body): Json<ListSpansRequest>,
) -> Result<Json<ListSpansResponse>, ApiError> {
    Ok(Json(state.query.list_spans(caller.user_id(), body).await?))
}

pub async fn get_trace(
    State(state): State<TracesApiState>,
    caller: Caller,
    Json(body): Json<GetTraceRequest>,
) -> Result<Json<GetTraceResponse>, ApiError> {
    Ok(Json(state.query.get_trace(caller.user_id(), body).await?))
}

pub async fn advance_info(
    State(state): State<TracesApiState>,
    caller: Caller,
    Json(body): Json<AdvanceInfoRequest>,
) -> Result<Json<AdvanceInfoResponse>, ApiError> {
    let traces_advance_info = state.query.get_advance_info(caller.user_id(), body).await?;
    Ok(Json(AdvanceInfoResponse {
        traces_advance_info,
    }))
}

pub async fn meta(
    State(state): State<TracesApiState>,
    caller: Caller,
    Query(query): Query<MetaQuery>,
) -> Result<Json<TracesMeta>, ApiError> {
    let meta = state
        .query
        .get_meta(
            caller.user_id(),
            query.workspace_id,
            query.platform_type.as_deref(),
            query.span_list_type.as_deref(),
        )
        .await?;
    Ok(Json(meta))
}

/// Soft delete; spans stay stored until their TTL runs out
pub async fn delete_spans(
    State(state): State<TracesApiState>,
    caller: Caller,
    Json(body): Json<DeleteSpansRequest>,
) -> Result<Json<AffectedResponse>, ApiError> {
    let affected = state.query.soft_delete(caller.user_id(), body).await?;
    Ok(Json(AffectedResponse {
        affected: affected as u64,
    }))
}
