//! Annotation endpoints
//!
//! Manual annotations from the UI plus the open-API variants keyed by
//! `(trace_id, span_id, key)`.

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::routing::{post, put};
use axum::{Json, Router};
use serde::Serialize;

use crate::api::extractors::{Caller, IdPath};
use crate::api::types::{ApiError, CreatedResponse, WorkspaceQuery};
use crate::data::types::Annotation;
use crate::domain::observability::AnnotationSvc;
use crate::domain::observability::annotation::{
    CreateAnnotationRequest, DeleteByKeyRequest, ListAnnotationsRequest, OpenApiCreateRequest,
    UpdateAnnotationRequest,
};
use crate::domain::observability::enrich::AnnotationView;

#[derive(Clone)]
pub struct AnnotationsApiState {
    pub annotations: Arc<AnnotationSvc>,
}

#[derive(Debug, Serialize)]
pub struct AnnotationListResponse {
    pub annotations: Vec<AnnotationView>,
}

pub fn routes(annotations: Arc<AnnotationSvc>) -> Router {
    let state = AnnotationsApiState { annotations };

    Router::new()
        .route("/annotations", post(create_annotation))
        .route("/annotations/list", post(list_annotations))
        .route(
            "/annotations/{id}",
            put(update_annotation).delete(delete_annotation),
        )
        .route("/openapi/annotations", post(create_open_api))
        .route("/openapi/annotations/delete", post(delete_by_key))
        .with_state(state)
}

pub async fn create_annotation(
    State(state): State<AnnotationsApiState>,
    caller: Caller,
    Json(body): Json<CreateAnnotationRequest>,
) -> Result<(StatusCode, Json<CreatedResponse<String>>), ApiError> {
    let id = state.annotations.create(caller.user_id(), body).await?;
    Ok((StatusCode::CREATED, Json(CreatedResponse { id })))
}

pub async fn update_annotation(
    State(state): State<AnnotationsApiState>,
    caller: Caller,
    IdPath(id): IdPath,
    Json(body): Json<UpdateAnnotationRequest>,
) -> Result<Json<Annotation>, ApiError> {
    let annotation = state.annotations.update(caller.user_id(), &id, body).await?;
    Ok(Json(annotation))
}

pub async fn delete_annotation(
    State(state): State<AnnotationsApiState>,
    caller: Caller,
    IdPath(id): IdPath,
    Query(query): Query<WorkspaceQuery>,
) -> Result<StatusCode, ApiError> {
    state
        .annotations
        .delete(caller.user_id(), query.workspace_id, &id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn list_annotations(
    State(state): State<AnnotationsApiState>,
    caller: Caller,
    Json(body): Json<ListAnnotationsRequest>,
) -> Result<Json<AnnotationListResponse>, ApiError> {
    let annotations = state.annotations.list(caller.user_id(), body).await?;
    Ok(Json(AnnotationListResponse { annotations }))
}

pub async fn create_open_api(
    State(state): State<AnnotationsApiState>,
    caller: Caller,
    Json(body): Json<OpenApiCreateRequest>,
) -> Result<(StatusCode, Json<CreatedResponse<String>>), ApiError> {
    let id = state
        .annotations
        .create_open_api(caller.user_id(), body)
        .await?;
    Ok((StatusCode::CREATED, Json(CreatedResponse { id })))
}

pub async fn delete_by_key(
    State(state): State<AnnotationsApiState>,
    caller: Caller,
    Json(body): Json<DeleteByKeyRequest>,
) -> Result<StatusCode, ApiError> {
    state
        .annotations
        .delete_by_key(caller.user_id(), body)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
