//! Experiment endpoints

pub mod types;

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};

use crate::api::extractors::{Caller, ValidatedJson};
use crate::api::types::{ApiError, WorkspaceQuery};
use crate::data::types::{AggregateResult, Experiment};
use crate::domain::evaluation::{
    AddItemsResponse, CreateExperimentRequest, ExperimentPage, ExperimentSvc,
    ListExperimentsRequest, ResultPage,
};

use types::{AddItemsBody, ExperimentDetail, ResultsBody, StopResponse, WorkspaceBody};

#[derive(Clone)]
pub struct ExperimentsApiState {
    pub experiments: Arc<ExperimentSvc>,
}

pub fn routes(experiments: Arc<ExperimentSvc>) -> Router {
    Router::new()
        .route("/experiments", post(create_experiment))
        .route("/experiments/list", post(list_experiments))
        .route("/experiments/{id}", get(get_experiment))
        .route("/experiments/{id}/stop", post(stop_experiment))
        .route("/experiments/{id}/items", post(add_items))
        .route("/experiments/{id}/results", post(list_results))
        .route("/experiments/{id}/aggregate", post(aggregate))
        .with_state(ExperimentsApiState { experiments })
}

/// Create and start an experiment
pub async fn create_experiment(
    State(state): State<ExperimentsApiState>,
    caller: Caller,
    Json(body): Json<CreateExperimentRequest>,
) -> Result<(StatusCode, Json<Experiment>), ApiError> {
    let experiment = state.experiments.create(caller.user_id(), body).await?;
    Ok((StatusCode::CREATED, Json(experiment)))
}

pub async fn list_experiments(
    State(state): State<ExperimentsApiState>,
    caller: Caller,
    Json(body): Json<ListExperimentsRequest>,
) -> Result<Json<ExperimentPage>, ApiError> {
    Ok(Json(state.experiments.list(caller.user_id(), body).await?))
}

pub async fn get_experiment(
    State(state): State<ExperimentsApiState>,
    caller: Caller,
    Path(experiment_id): Path<i64>,
    Query(query): Query<WorkspaceQuery>,
) -> Result<Json<ExperimentDetail>, ApiError> {
    let experiment = state
        .experiments
        .get(caller.user_id(), query.workspace_id, experiment_id)
        .await?;
    Ok(Json(experiment.into()))
}

pub async fn stop_experiment(
    State(state): State<ExperimentsApiState>,
    caller: Caller,
    Path(experiment_id): Path<i64>,
    ValidatedJson(body): ValidatedJson<WorkspaceBody>,
) -> Result<Json<StopResponse>, ApiError> {
    let status = state
        .experiments
        .stop(caller.user_id(), body.workspace_id, experiment_id)
        .await?;
    Ok(Json(StopResponse { status }))
}

/// Append items to a running online experiment
pub async fn add_items(
    State(state): State<ExperimentsApiState>,
    caller: Caller,
    Path(experiment_id): Path<i64>,
    ValidatedJson(body): ValidatedJson<AddItemsBody>,
) -> Result<Json<AddItemsResponse>, ApiError> {
    let added = state
        .experiments
        .add_items(caller.user_id(), body.workspace_id, experiment_id, body.items)
        .await?;
    Ok(Json(added))
}

pub async fn list_results(
    State(state): State<ExperimentsApiState>,
    caller: Caller,
    Path(experiment_id): Path<i64>,
    ValidatedJson(body): ValidatedJson<ResultsBody>,
) -> Result<Json<ResultPage>, ApiError> {
    let page = state
        .experiments
        .results(caller.user_id(), body.workspace_id, experiment_id, body.query)
        .await?;
    Ok(Json(page))
}

/// Recompute and store the aggregate
pub async fn aggregate(
    State(state): State<ExperimentsApiState>,
    caller: Caller,
    Path(experiment_id): Path<i64>,
    ValidatedJson(body): ValidatedJson<WorkspaceBody>,
) -> Result<Json<AggregateResult>, ApiError> {
    let result = state
        .experiments
        .aggregate(caller.user_id(), body.workspace_id, experiment_id)
        .await?;
    Ok(Json(result))
}
