//! Repository traits for the storage engines
//!
//! The domain layer only sees these traits. The span store is implemented
//! on DuckDB; annotations, views and experiments on SQLite.

use async_trait::async_trait;

use crate::data::error::DataError;
use crate::data::types::{
    AggregateResult, Annotation, AnnotationKey, Experiment, ExptStats, ExptStatusChange,
    GetTraceParams, ListExperimentsParams, ListSpansParams, SoftDeleteParams, Span, SpanPage,
    TraceTokens, TraceWindow, TtlTier, TurnResult, TurnRunState, View, ViewPatch,
};

// ============================================================================
// Span store
// ============================================================================

#[async_trait]
pub trait SpanRepository: Send + Sync {
    /// Durably append spans of one workspace under a retention tier
    async fn insert_spans(&self, spans: Vec<Span>, ttl: TtlTier) -> Result<usize, DataError>;

    async fn list_spans(&self, params: &ListSpansParams) -> Result<SpanPage, DataError>;

    async fn get_trace(&self, params: &GetTraceParams) -> Result<Vec<Span>, DataError>;

    async fn get_spans_by_ids(
        &self,
        workspace_id: &str,
        span_ids: &[String],
        start_us: i64,
        end_us: i64,
    ) -> Result<Vec<Span>, DataError>;

    async fn trace_token_usage(
        &self,
        workspace_id: &str,
        windows: &[TraceWindow],
    ) -> Result<Vec<TraceTokens>, DataError>;

    async fn soft_delete(&self, params: &SoftDeleteParams) -> Result<usize, DataError>;

    /// Visible spans stored for a workspace
    async fn count_spans(&self, workspace_id: &str) -> Result<u64, DataError>;
}

// ============================================================================
// Metadata store
// ============================================================================

#[async_trait]
pub trait AnnotationRepository: Send + Sync {
    async fn insert_annotation(&self, annotation: &Annotation) -> Result<(), DataError>;

    async fn update_annotation(&self, annotation: &Annotation) -> Result<bool, DataError>;

    async fn get_annotation(
        &self,
        workspace_id: &str,
        id: &str,
    ) -> Result<Option<Annotation>, DataError>;

    async fn find_live_annotation(
        &self,
        key: &AnnotationKey,
    ) -> Result<Option<Annotation>, DataError>;

    async fn list_span_annotations(
        &self,
        workspace_id: &str,
        trace_id: &str,
        span_id: &str,
        start_time_ms: Option<i64>,
        desc_by_updated_at: bool,
    ) -> Result<Vec<Annotation>, DataError>;

    async fn list_annotations_for_spans(
        &self,
        workspace_id: &str,
        span_ids: &[String],
    ) -> Result<Vec<Annotation>, DataError>;

    async fn delete_annotation(
        &self,
        workspace_id: &str,
        id: &str,
        updated_by: &str,
        now_ms: i64,
    ) -> Result<bool, DataError>;

    async fn delete_annotation_by_key(
        &self,
        key: &AnnotationKey,
        updated_by: &str,
        now_ms: i64,
    ) -> Result<bool, DataError>;
}

#[async_trait]
pub trait ViewRepository: Send + Sync {
    async fn create_view(&self, view: &View) -> Result<View, DataError>;

    async fn get_view(&self, workspace_id: i64, id: i64) -> Result<Option<View>, DataError>;

    async fn list_views(&self, workspace_id: i64, created_by: &str)
    -> Result<Vec<View>, DataError>;

    async fn update_view(
        &self,
        workspace_id: i64,
        id: i64,
        patch: &ViewPatch,
        updated_by: &str,
        expected_updated_at_ms: i64,
        now_ms: i64,
    ) -> Result<Option<View>, DataError>;

    async fn delete_view(&self, workspace_id: i64, id: i64) -> Result<bool, DataError>;
}

#[async_trait]
pub trait ExperimentRepository: Send + Sync {
    async fn create_experiment(&self, experiment: &Experiment) -> Result<Experiment, DataError>;

    async fn get_experiment(&self, id: i64) -> Result<Option<Experiment>, DataError>;

    async fn transition_status(
        &self,
        id: i64,
        change: &ExptStatusChange,
        now_ms: i64,
    ) -> Result<bool, DataError>;

    async fn update_stats(&self, id: i64, stats: &ExptStats, now_ms: i64)
    -> Result<(), DataError>;

    async fn list_active_experiments(&self) -> Result<Vec<Experiment>, DataError>;

    async fn list_experiments(
        &self,
        params: &ListExperimentsParams,
    ) -> Result<(Vec<Experiment>, u64), DataError>;

    async fn insert_turns_if_absent(&self, turns: &[TurnResult]) -> Result<u64, DataError>;

    async fn upsert_turn_result(&self, turn: &TurnResult) -> Result<(), DataError>;

    async fn list_turn_results(&self, experiment_id: i64) -> Result<Vec<TurnResult>, DataError>;

    async fn list_stale_turns(&self, updated_before_ms: i64) -> Result<Vec<TurnResult>, DataError>;

    async fn transition_turns(
        &self,
        experiment_id: i64,
        from: TurnRunState,
        to: TurnRunState,
        now_ms: i64,
    ) -> Result<u64, DataError>;

    async fn save_aggregate(&self, aggregate: &AggregateResult) -> Result<(), DataError>;

    async fn get_aggregate(&self, experiment_id: i64)
    -> Result<Option<AggregateResult>, DataError>;
}
