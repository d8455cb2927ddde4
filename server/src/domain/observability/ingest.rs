//! Span ingestion
//!
//! The public path validates, authorizes and checks benefit synchronously.
//! The inner path (internal producers and OTLP) goes through the span ingest
//! topic and never fails the producer on benefit shortage.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;

use super::ttl::{IngestPath, TtlPolicy};
use crate::core::constants::{MAX_INGEST_SPANS, OPENAPI_CALL_TYPE};
use crate::data::error::DataError;
use crate::data::topics::{Publisher, TopicError, TopicMessage};
use crate::data::traits::SpanRepository;
use crate::data::types::{Span, TtlTier};
use crate::domain::error::ServiceError;
use crate::domain::external::{AuthAction, AuthResource, Authorizer};
use crate::domain::pipeline::TopicHandler;
use crate::utils::retry::{DEFAULT_BASE_DELAY_MS, DEFAULT_MAX_ATTEMPTS, retry_with_backoff_async};

/// Fixed per-span overhead used for topic backpressure accounting
const SPAN_OVERHEAD_BYTES: usize = 256;

/// Spans queued for the inner ingest path
#[derive(Debug, Clone)]
pub struct SpanBatch {
    pub user_id: String,
    pub spans: Vec<Span>,
}

impl TopicMessage for SpanBatch {
    fn size_bytes(&self) -> usize {
        self.spans
            .iter()
            .map(|s| SPAN_OVERHEAD_BYTES + s.input.len() + s.output.len())
            .sum::<usize>()
            .max(SPAN_OVERHEAD_BYTES)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IngestOutcome {
    pub accepted: usize,
    pub ttl_days: i64,
}

pub struct Ingestor {
    spans: Arc<dyn SpanRepository>,
    authorizer: Arc<dyn Authorizer>,
    ttl: TtlPolicy,
    max_spans_per_workspace: Option<u64>,
}

impl Ingestor {
    pub fn new(
        spans: Arc<dyn SpanRepository>,
        authorizer: Arc<dyn Authorizer>,
        ttl: TtlPolicy,
        max_spans_per_workspace: Option<u64>,
    ) -> Self {
        Self {
            spans,
            authorizer,
            ttl,
            max_spans_per_workspace,
        }
    }

    /// Public ingest: one workspace, 1..=100 spans, call type forced
    pub async fn ingest(
        &self,
        user_id: &str,
        mut spans: Vec<Span>,
    ) -> Result<IngestOutcome, ServiceError> {
        if spans.is_empty() || spans.len() > MAX_INGEST_SPANS {
            return Err(ServiceError::invalid_param(format!(
                "a batch carries 1 to {} spans, got {}",
                MAX_INGEST_SPANS,
                spans.len()
            )));
        }
        let workspace = spans[0].workspace_id.clone();
        if spans.iter().any(|s| s.workspace_id != workspace) {
            return Err(ServiceError::invalid_param(
                "all spans of a batch must share one workspace_id",
            ));
        }
        let workspace_id = parse_workspace_id(&workspace)?;
        validate_spans(&spans)?;

        self.authorizer
            .check(
                user_id,
                AuthAction::IngestLoopTrace,
                &AuthResource::Workspace(workspace_id),
            )
            .await?;
        let decision = self
            .ttl
            .decide(workspace_id, user_id, IngestPath::OpenApi)
            .await?;

        for span in &mut spans {
            span.call_type = OPENAPI_CALL_TYPE.to_string();
        }
        let accepted = self.write(&workspace, spans, decision.tier).await?;
        Ok(IngestOutcome {
            accepted,
            ttl_days: decision.tier.days(),
        })
    }

    /// Inner ingest: spans of several workspaces, grouped and written per
    /// workspace. A failing workspace does not stop the others.
    pub async fn ingest_inner(&self, batch: SpanBatch) -> Result<usize, ServiceError> {
        let mut by_workspace: BTreeMap<String, Vec<Span>> = BTreeMap::new();
        for span in batch.spans {
            by_workspace
                .entry(span.workspace_id.clone())
                .or_default()
                .push(span);
        }

        let mut written = 0;
        let mut first_error = None;
        for (workspace, spans) in by_workspace {
            match self.ingest_workspace(&batch.user_id, &workspace, spans).await {
                Ok(n) => written += n,
                Err(e) => {
                    tracing::warn!(workspace_id = %workspace, error = %e, "Inner ingest failed");
                    first_error.get_or_insert(e);
                }
            }
        }
        match (written, first_error) {
            (0, Some(e)) => Err(e),
            _ => Ok(written),
        }
    }

    async fn ingest_workspace(
        &self,
        user_id: &str,
        workspace: &str,
        spans: Vec<Span>,
    ) -> Result<usize, ServiceError> {
        let workspace_id = parse_workspace_id(workspace)?;
        validate_spans(&spans)?;
        let decision = self
            .ttl
            .decide(workspace_id, user_id, IngestPath::Inner)
            .await?;
        self.write(workspace, spans, decision.tier).await
    }

    async fn write(
        &self,
        workspace: &str,
        spans: Vec<Span>,
        tier: TtlTier,
    ) -> Result<usize, ServiceError> {
        if let Some(max) = self.max_spans_per_workspace {
            let stored = self.spans.count_spans(workspace).await?;
            if stored.saturating_add(spans.len() as u64) > max {
                return Err(ServiceError::NoCapacity(format!(
                    "workspace {} would exceed {} stored spans",
                    workspace, max
                )));
            }
        }

        let count = spans.len();
        let result = retry_with_backoff_async(
            DEFAULT_MAX_ATTEMPTS,
            DEFAULT_BASE_DELAY_MS,
            DataError::is_transient,
            |_| self.spans.insert_spans(spans.clone(), tier),
        )
        .await;
        match result {
            Ok((written, attempts)) => {
                tracing::debug!(
                    workspace_id = workspace,
                    spans = count,
                    ttl_days = tier.days(),
                    attempts,
                    "Spans written"
                );
                Ok(written)
            }
            Err((e, attempts)) => {
                tracing::error!(workspace_id = workspace, attempts, error = %e, "Span write failed");
                Err(e.into())
            }
        }
    }
}

fn parse_workspace_id(raw: &str) -> Result<i64, ServiceError> {
    match raw.trim().parse::<i64>() {
        Ok(id) if id > 0 => Ok(id),
        _ => Err(ServiceError::invalid_param(format!(
            "invalid workspace_id '{}'",
            raw
        ))),
    }
}

fn validate_spans(spans: &[Span]) -> Result<(), ServiceError> {
    spans
        .iter()
        .try_for_each(|s| s.validate().map_err(ServiceError::InvalidParam))
}

/// Queue spans for the inner path
pub fn enqueue(publisher: &Publisher<SpanBatch>, batch: SpanBatch) -> Result<usize, ServiceError> {
    let count = batch.spans.len();
    publisher.publish(batch).map_err(|e| match e {
        TopicError::BufferFull => ServiceError::Transient("ingest queue is full".to_string()),
        other => ServiceError::Fatal(format!("ingest queue unavailable: {}", other)),
    })?;
    Ok(count)
}

/// Topic consumer feeding the inner path
pub struct IngestConsumer {
    ingestor: Arc<Ingestor>,
}

impl IngestConsumer {
    pub fn new(ingestor: Arc<Ingestor>) -> Self {
        Self { ingestor }
    }
}

#[async_trait]
impl TopicHandler<SpanBatch> for IngestConsumer {
    fn name(&self) -> &'static str {
        "span_ingest"
    }

    async fn handle(&self, batch: SpanBatch) {
        let count = batch.spans.len();
        if let Err(e) = self.ingestor.ingest_inner(batch).await {
            tracing::error!(spans = count, error = %e, "Dropped span batch");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::BenefitConfig;
    use crate::data::DataStores;
    use crate::data::types::GetTraceParams;
    use crate::domain::external::{ConfigBenefitOracle, LocalAuthorizer};

    fn span(workspace: &str, trace: &str, id: &str) -> Span {
        Span {
            trace_id: trace.into(),
            span_id: id.into(),
            workspace_id: workspace.into(),
            span_name: "chat".into(),
            start_time_us: 1_000_000,
            duration_us: 250_000,
            ..Default::default()
        }
    }

    fn ingestor(stores: &DataStores, benefit: BenefitConfig, max: Option<u64>) -> Ingestor {
        Ingestor::new(
            stores.spans(),
            Arc::new(LocalAuthorizer),
            TtlPolicy::new(Arc::new(ConfigBenefitOracle::new(benefit))),
            max,
        )
    }

    fn benefit(is_enough: bool) -> BenefitConfig {
        BenefitConfig {
            storage_duration_days: 30,
            is_enough,
            account_available: true,
        }
    }

    #[tokio::test]
    async fn test_ingest_forces_call_type() {
        let stores = DataStores::in_memory().await.unwrap();
        let ingestor = ingestor(&stores, benefit(true), None);
        let mut s = span("7", "T1", "S1");
        s.call_type = "Evaluator".into();

        let outcome = ingestor.ingest("alice", vec![s]).await.unwrap();
        assert_eq!(outcome, IngestOutcome { accepted: 1, ttl_days: 30 });

        let spans = stores
            .spans()
            .get_trace(&GetTraceParams {
                workspace_id: "7".into(),
                trace_id: "T1".into(),
                start_us: 0,
                end_us: 2_000_000,
                span_ids: vec![],
            })
            .await
            .unwrap();
        assert_eq!(spans[0].call_type, OPENAPI_CALL_TYPE);
    }

    #[tokio::test]
    async fn test_ingest_batch_bounds() {
        let stores = DataStores::in_memory().await.unwrap();
        let ingestor = ingestor(&stores, benefit(true), None);
        assert!(matches!(
            ingestor.ingest("alice", vec![]).await,
            Err(ServiceError::InvalidParam(_))
        ));
        let many = (0..=MAX_INGEST_SPANS)
            .map(|i| span("7", "T", &format!("S{}", i)))
            .collect();
        assert!(ingestor.ingest("alice", many).await.is_err());
        let mixed = vec![span("7", "T", "a"), span("8", "T", "b")];
        assert!(ingestor.ingest("alice", mixed).await.is_err());
    }

    #[tokio::test]
    async fn test_open_path_rejects_without_capacity() {
        let stores = DataStores::in_memory().await.unwrap();
        let ingestor = ingestor(&stores, benefit(false), None);
        assert!(matches!(
            ingestor.ingest("alice", vec![span("7", "T", "S")]).await,
            Err(ServiceError::NoCapacity(_))
        ));
    }

    #[tokio::test]
    async fn test_inner_path_degrades_and_groups() {
        let stores = DataStores::in_memory().await.unwrap();
        let ingestor = ingestor(&stores, benefit(false), None);
        let written = ingestor
            .ingest_inner(SpanBatch {
                user_id: String::new(),
                spans: vec![span("7", "T", "a"), span("8", "T", "b"), span("7", "T", "c")],
            })
            .await
            .unwrap();
        assert_eq!(written, 3);
        assert_eq!(stores.spans().count_spans("7").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_workspace_quota() {
        let stores = DataStores::in_memory().await.unwrap();
        let ingestor = ingestor(&stores, benefit(true), Some(1));
        ingestor.ingest("alice", vec![span("7", "T", "a")]).await.unwrap();
        assert!(matches!(
            ingestor.ingest("alice", vec![span("7", "T", "b")]).await,
            Err(ServiceError::NoCapacity(_))
        ));
    }
}
