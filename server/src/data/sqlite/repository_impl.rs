//! Metadata repository trait implementations for SQLite

use std::sync::Arc;

use async_trait::async_trait;

use crate::data::error::DataError;
use crate::data::traits::{AnnotationRepository, ExperimentRepository, ViewRepository};
use crate::data::types::{
    AggregateResult, Annotation, AnnotationKey, Experiment, ExptStats, ExptStatusChange,
    ListExperimentsParams, TurnResult, TurnRunState, View, ViewPatch,
};

use super::SqliteService;
use super::repositories::{annotation, experiment, view};

#[async_trait]
impl AnnotationRepository for Arc<SqliteService> {
    async fn insert_annotation(&self, value: &Annotation) -> Result<(), DataError> {
        annotation::insert_annotation(self.pool(), value)
            .await
            .map_err(Into::into)
    }

    async fn update_annotation(&self, value: &Annotation) -> Result<bool, DataError> {
        annotation::update_annotation(self.pool(), value)
            .await
            .map_err(Into::into)
    }

    async fn get_annotation(
        &self,
        workspace_id: &str,
        id: &str,
    ) -> Result<Option<Annotation>, DataError> {
        annotation::get_annotation(self.pool(), workspace_id, id)
            .await
            .map_err(Into::into)
    }

    async fn find_live_annotation(
        &self,
        key: &AnnotationKey,
    ) -> Result<Option<Annotation>, DataError> {
        annotation::find_live_by_key(self.pool(), key)
            .await
            .map_err(Into::into)
    }

    async fn list_span_annotations(
        &self,
        workspace_id: &str,
        trace_id: &str,
        span_id: &str,
        start_time_ms: Option<i64>,
        desc_by_updated_at: bool,
    ) -> Result<Vec<Annotation>, DataError> {
        annotation::list_for_span(
            self.pool(),
            workspace_id,
            trace_id,
            span_id,
            start_time_ms,
            desc_by_updated_at,
        )
        .await
        .map_err(Into::into)
    }

    async fn list_annotations_for_spans(
        &self,
        workspace_id: &str,
        span_ids: &[String],
    ) -> Result<Vec<Annotation>, DataError> {
        annotation::list_for_spans(self.pool(), workspace_id, span_ids)
            .await
            .map_err(Into::into)
    }

    async fn delete_annotation(
        &self,
        workspace_id: &str,
        id: &str,
        updated_by: &str,
        now_ms: i64,
    ) -> Result<bool, DataError> {
        annotation::soft_delete(self.pool(), workspace_id, id, updated_by, now_ms)
            .await
            .map_err(Into::into)
    }

    async fn delete_annotation_by_key(
        &self,
        key: &AnnotationKey,
        updated_by: &str,
        now_ms: i64,
    ) -> Result<bool, DataError> {
        annotation::soft_delete_by_key(self.pool(), key, updated_by, now_ms)
            .await
            .map_err(Into::into)
    }
}

#[async_trait]
impl ViewRepository for Arc<SqliteService> {
    async fn create_view(&self, value: &View) -> Result<View, DataError> {
        view::create_view(self.pool(), value)
            .await
            .map_err(Into::into)
    }

    async fn get_view(&self, workspace_id: i64, id: i64) -> Result<Option<View>, DataError> {
        view::get_view(self.pool(), workspace_id, id)
            .await
            .map_err(Into::into)
    }

    async fn list_views(
        &self,
        workspace_id: i64,
        created_by: &str,
    ) -> Result<Vec<View>, DataError> {
        view::list_views(self.pool(), workspace_id, created_by)
            .await
            .map_err(Into::into)
    }

    async fn update_view(
        &self,
        workspace_id: i64,
        id: i64,
        patch: &ViewPatch,
        updated_by: &str,
        expected_updated_at_ms: i64,
        now_ms: i64,
    ) -> Result<Option<View>, DataError> {
        view::update_view(
            self.pool(),
            workspace_id,
            id,
            patch,
            updated_by,
            expected_updated_at_ms,
            now_ms,
        )
        .await
        .map_err(Into::into)
    }

    async fn delete_view(&self, workspace_id: i64, id: i64) -> Result<bool, DataError> {
        view::delete_view(self.pool(), workspace_id, id)
            .await
            .map_err(Into::into)
    }
}

#[async_trait]
impl ExperimentRepository for Arc<SqliteService> {
    async fn create_experiment(&self, value: &Experiment) -> Result<Experiment, DataError> {
        experiment::create_experiment(self.pool(), value)
            .await
            .map_err(Into::into)
    }

    async fn get_experiment(&self, id: i64) -> Result<Option<Experiment>, DataError> {
        experiment::get_experiment(self.pool(), id)
            .await
            .map_err(Into::into)
    }

    async fn transition_status(
        &self,
        id: i64,
        change: &ExptStatusChange,
        now_ms: i64,
    ) -> Result<bool, DataError> {
        experiment::transition_status(self.pool(), id, change, now_ms)
            .await
            .map_err(Into::into)
    }

    async fn update_stats(
        &self,
        id: i64,
        stats: &ExptStats,
        now_ms: i64,
    ) -> Result<(), DataError> {
        experiment::update_stats(self.pool(), id, stats, now_ms)
            .await
            .map_err(Into::into)
    }

    async fn list_active_experiments(&self) -> Result<Vec<Experiment>, DataError> {
        experiment::list_active(self.pool())
            .await
            .map_err(Into::into)
    }

    async fn list_experiments(
        &self,
        params: &ListExperimentsParams,
    ) -> Result<(Vec<Experiment>, u64), DataError> {
        experiment::list_experiments(self.pool(), params)
            .await
            .map_err(Into::into)
    }

    async fn insert_turns_if_absent(&self, turns: &[TurnResult]) -> Result<u64, DataError> {
        experiment::insert_turns_if_absent(self.pool(), turns)
            .await
            .map_err(Into::into)
    }

    async fn upsert_turn_result(&self, turn: &TurnResult) -> Result<(), DataError> {
        experiment::upsert_turn_result(self.pool(), turn)
            .await
            .map_err(Into::into)
    }

    async fn list_turn_results(&self, experiment_id: i64) -> Result<Vec<TurnResult>, DataError> {
        experiment::list_turn_results(self.pool(), experiment_id)
            .await
            .map_err(Into::into)
    }

    async fn list_stale_turns(&self, updated_before_ms: i64) -> Result<Vec<TurnResult>, DataError> {
        experiment::list_stale_turns(self.pool(), updated_before_ms)
            .await
            .map_err(Into::into)
    }

    async fn transition_turns(
        &self,
        experiment_id: i64,
        from: TurnRunState,
        to: TurnRunState,
        now_ms: i64,
    ) -> Result<u64, DataError> {
        experiment::transition_turns(self.pool(), experiment_id, from, to, now_ms)
            .await
            .map_err(Into::into)
    }

    async fn save_aggregate(&self, aggregate: &AggregateResult) -> Result<(), DataError> {
        experiment::save_aggregate(self.pool(), aggregate)
            .await
            .map_err(Into::into)
    }

    async fn get_aggregate(
        &self,
        experiment_id: i64,
    ) -> Result<Option<AggregateResult>, DataError> {
        experiment::get_aggregate(self.pool(), experiment_id)
            .await
            .map_err(Into::into)
    }
}
