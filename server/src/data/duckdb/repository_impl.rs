//! SpanRepository implementation for DuckDB
//!
//! Implemented for `Arc<DuckdbService>` because the connection guard is not
//! `Send`: each call clones the Arc and takes the connection inside the
//! blocking task.

use std::sync::Arc;

use async_trait::async_trait;

use crate::data::error::DataError;
use crate::data::traits::SpanRepository;
use crate::data::types::{
    GetTraceParams, ListSpansParams, SoftDeleteParams, Span, SpanPage, TraceTokens, TraceWindow,
    TtlTier,
};
use crate::utils::time::now_us;

use super::DuckdbService;
use super::repositories::span;

#[async_trait]
impl SpanRepository for Arc<DuckdbService> {
    async fn insert_spans(&self, spans: Vec<Span>, ttl: TtlTier) -> Result<usize, DataError> {
        let db = Arc::clone(self);
        DuckdbService::run_query(move || {
            let conn = db.conn()?;
            span::insert_spans(&conn, &spans, ttl, now_us())
        })
        .await
        .map_err(DataError::from)?
        .map_err(Into::into)
    }

    async fn list_spans(&self, params: &ListSpansParams) -> Result<SpanPage, DataError> {
        let db = Arc::clone(self);
        let params = params.clone();
        DuckdbService::run_query(move || {
            let conn = db.conn()?;
            span::list_spans(&conn, &params, now_us())
        })
        .await
        .map_err(DataError::from)?
        .map_err(Into::into)
    }

    async fn get_trace(&self, params: &GetTraceParams) -> Result<Vec<Span>, DataError> {
        let db = Arc::clone(self);
        let params = params.clone();
        DuckdbService::run_query(move || {
            let conn = db.conn()?;
            span::get_trace(&conn, &params, now_us())
        })
        .await
        .map_err(DataError::from)?
        .map_err(Into::into)
    }

    async fn get_spans_by_ids(
        &self,
        workspace_id: &str,
        span_ids: &[String],
        start_us: i64,
        end_us: i64,
    ) -> Result<Vec<Span>, DataError> {
        let db = Arc::clone(self);
        let wid = workspace_id.to_string();
        let ids = span_ids.to_vec();
        DuckdbService::run_query(move || {
            let conn = db.conn()?;
            span::get_spans_by_ids(&conn, &wid, &ids, start_us, end_us, now_us())
        })
        .await
        .map_err(DataError::from)?
        .map_err(Into::into)
    }

    async fn trace_token_usage(
        &self,
        workspace_id: &str,
        windows: &[TraceWindow],
    ) -> Result<Vec<TraceTokens>, DataError> {
        let db = Arc::clone(self);
        let wid = workspace_id.to_string();
        let windows = windows.to_vec();
        DuckdbService::run_query(move || {
            let conn = db.conn()?;
            span::trace_token_usage(&conn, &wid, &windows, now_us())
        })
        .await
        .map_err(DataError::from)?
        .map_err(Into::into)
    }

    async fn soft_delete(&self, params: &SoftDeleteParams) -> Result<usize, DataError> {
        let db = Arc::clone(self);
        let params = params.clone();
        DuckdbService::run_query(move || {
            let conn = db.conn()?;
            span::soft_delete(&conn, &params)
        })
        .await
        .map_err(DataError::from)?
        .map_err(Into::into)
    }

    async fn count_spans(&self, workspace_id: &str) -> Result<u64, DataError> {
        let db = Arc::clone(self);
        let wid = workspace_id.to_string();
        DuckdbService::run_query(move || {
            let conn = db.conn()?;
            span::count_spans(&conn, &wid, now_us())
        })
        .await
        .map_err(DataError::from)?
        .map_err(Into::into)
    }
}
