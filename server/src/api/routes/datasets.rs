//! Dataset export endpoints

use std::sync::Arc;

use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};

use crate::api::extractors::Caller;
use crate::api::types::ApiError;
use crate::domain::observability::DatasetExporter;
use crate::domain::observability::export::{ExportRequest, ExportResponse, PreviewResponse};

#[derive(Clone)]
pub struct DatasetsApiState {
    pub exporter: Arc<DatasetExporter>,
}

pub fn routes(exporter: Arc<DatasetExporter>) -> Router {
    Router::new()
        .route("/datasets/export", post(export))
        .route("/datasets/export/preview", post(preview))
        .with_state(DatasetsApiState { exporter })
}

pub async fn export(
    State(state): State<DatasetsApiState>,
    caller: Caller,
    Json(body): Json<ExportRequest>,
) -> Result<Json<ExportResponse>, ApiError> {
    Ok(Json(state.exporter.export(caller.user_id(), body).await?))
}

/// Same mapping as export, nothing written
pub async fn preview(
    State(state): State<DatasetsApiState>,
    caller: Caller,
    Json(body): Json<ExportRequest>,
) -> Result<Json<PreviewResponse>, ApiError> {
    Ok(Json(state.exporter.preview(caller.user_id(), &body).await?))
}
