//! Saved view endpoints

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, put};
use axum::{Json, Router};
use serde::Serialize;

use crate::api::extractors::Caller;
use crate::api::types::{ApiError, WorkspaceQuery};
use crate::data::types::View;
use crate::domain::observability::ViewSvc;
use crate::domain::observability::views::{CreateViewRequest, UpdateViewRequest};

#[derive(Clone)]
pub struct ViewsApiState {
    pub views: Arc<ViewSvc>,
}

#[derive(Debug, Serialize)]
pub struct ViewListResponse {
    pub views: Vec<View>,
}

pub fn routes(views: Arc<ViewSvc>) -> Router {
    Router::new()
        .route("/views", get(list_views).post(create_view))
        .route("/views/{id}", put(update_view).delete(delete_view))
        .with_state(ViewsApiState { views })
}

/// System views first, then the workspace's own
pub async fn list_views(
    State(state): State<ViewsApiState>,
    caller: Caller,
    Query(query): Query<WorkspaceQuery>,
) -> Result<Json<ViewListResponse>, ApiError> {
    let views = state
        .views
        .list(caller.user_id(), query.workspace_id)
        .await?;
    Ok(Json(ViewListResponse { views }))
}

pub async fn create_view(
    State(state): State<ViewsApiState>,
    caller: Caller,
    Json(body): Json<CreateViewRequest>,
) -> Result<(StatusCode, Json<View>), ApiError> {
    let view = state.views.create(caller.user_id(), body).await?;
    Ok((StatusCode::CREATED, Json(view)))
}

pub async fn update_view(
    State(state): State<ViewsApiState>,
    caller: Caller,
    Path(view_id): Path<i64>,
    Json(body): Json<UpdateViewRequest>,
) -> Result<Json<View>, ApiError> {
    let view = state.views.update(caller.user_id(), view_id, body).await?;
    Ok(Json(view))
}

pub async fn delete_view(
    State(state): State<ViewsApiState>,
    caller: Caller,
    Path(view_id): Path<i64>,
    Query(query): Query<WorkspaceQuery>,
) -> Result<StatusCode, ApiError> {
    state
        .views
        .delete(caller.user_id(), query.workspace_id, view_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
