//! Trace and span queries
//!
//! Requests arrive in milliseconds and leave in milliseconds; the span
//! store is addressed in microseconds. Spans come back with their live
//! annotations, presented through the enricher.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::date::DateValidator;
use super::enrich::{AnnotationView, Enricher};
use crate::core::constants::{MAX_FILTER_DEPTH, MAX_PAGE_SIZE};
use crate::data::duckdb::filters::{
    FieldType, FilterFields, QueryType, SPAN_FIELDS, STATUS_ERROR, STATUS_SUCCESS,
    validate_filters,
};
use crate::data::traits::{AnnotationRepository, SpanRepository};
use crate::data::types::{
    AttrTos, GetTraceParams, ListSpansParams, PlatformType, SoftDeleteParams, Span, SpanCursor,
    SpanListType, SpanOrder, SpanType, TraceWindow,
};
use crate::domain::error::ServiceError;
use crate::domain::external::{AuthAction, AuthResource, Authorizer};
use crate::utils::time::{ms_to_us, now_us, us_to_ms};

/// The only sortable span field
const ORDER_FIELD_START_TIME: &str = "start_time";

// ============================================================================
// Requests / responses
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderBy {
    pub field: String,
    #[serde(default)]
    pub is_asc: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListSpansRequest {
    pub workspace_id: i64,
    pub start_time: i64,
    pub end_time: i64,
    #[serde(default)]
    pub platform_type: Option<String>,
    #[serde(default)]
    pub span_list_type: Option<String>,
    #[serde(default)]
    pub filters: Option<FilterFields>,
    #[serde(default)]
    pub order_bys: Vec<OrderBy>,
    #[serde(default)]
    pub page_token: Option<String>,
    #[serde(default)]
    pub page_size: Option<i32>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ListSpansResponse {
    pub spans: Vec<SpanView>,
    pub next_page_token: String,
    pub has_more: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct GetTraceRequest {
    pub workspace_id: i64,
    pub trace_id: String,
    pub start_time: i64,
    pub end_time: i64,
    #[serde(default)]
    pub platform_type: Option<String>,
    #[serde(default)]
    pub span_ids: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct GetTraceResponse {
    pub spans: Vec<SpanView>,
    pub traces_advance_info: TraceAdvanceInfo,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TraceQueryWindow {
    pub trace_id: String,
    pub start_time: i64,
    pub end_time: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AdvanceInfoRequest {
    pub workspace_id: i64,
    pub traces: Vec<TraceQueryWindow>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TokenCost {
    pub input: i64,
    pub output: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TraceAdvanceInfo {
    pub trace_id: String,
    pub tokens: TokenCost,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldMeta {
    pub value_type: FieldType,
    pub filter_types: Vec<QueryType>,
    pub support_custom: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field_options: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TracesMeta {
    pub field_metas: BTreeMap<String, FieldMeta>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeleteSpansRequest {
    pub workspace_id: i64,
    pub trace_id: String,
    #[serde(default)]
    pub span_ids: Vec<String>,
}

/// Span as served to clients, times in milliseconds
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SpanView {
    pub trace_id: String,
    pub span_id: String,
    pub parent_id: String,
    pub workspace_id: String,
    pub span_name: String,
    pub span_type: SpanType,
    pub started_at: i64,
    pub duration: i64,
    pub status: &'static str,
    pub status_code: i32,
    pub call_type: String,
    pub input: String,
    pub output: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attr_tos: Option<AttrTos>,
    pub custom_tags: BTreeMap<String, serde_json::Value>,
    pub system_tags: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logic_delete_time: Option<i64>,
    pub annotations: Vec<AnnotationView>,
}

impl From<Span> for SpanView {
    fn from(span: Span) -> Self {
        let mut custom_tags = BTreeMap::new();
        custom_tags.extend(span.tags_string.into_iter().map(|(k, v)| (k, v.into())));
        custom_tags.extend(span.tags_long.into_iter().map(|(k, v)| (k, v.into())));
        custom_tags.extend(span.tags_double.into_iter().map(|(k, v)| (k, v.into())));
        custom_tags.extend(span.tags_bool.into_iter().map(|(k, v)| (k, v.into())));
        Self {
            status: if span.status_code == 0 {
                STATUS_SUCCESS
            } else {
                STATUS_ERROR
            },
            started_at: us_to_ms(span.start_time_us),
            duration: us_to_ms(span.duration_us),
            logic_delete_time: span.logic_delete_time_us.map(us_to_ms),
            trace_id: span.trace_id,
            span_id: span.span_id,
            parent_id: span.parent_id,
            workspace_id: span.workspace_id,
            span_name: span.span_name,
            span_type: span.span_type,
            status_code: span.status_code,
            call_type: span.call_type,
            input: span.input,
            output: span.output,
            attr_tos: span.attr_tos,
            custom_tags,
            system_tags: span.system_tags,
            annotations: Vec::new(),
        }
    }
}

// ============================================================================
// Service
// ============================================================================

pub struct TraceQuery {
    spans: Arc<dyn SpanRepository>,
    annotations: Arc<dyn AnnotationRepository>,
    authorizer: Arc<dyn Authorizer>,
    enricher: Enricher,
    dates: DateValidator,
    default_page_size: i32,
}

impl TraceQuery {
    pub fn new(
        spans: Arc<dyn SpanRepository>,
        annotations: Arc<dyn AnnotationRepository>,
        authorizer: Arc<dyn Authorizer>,
        enricher: Enricher,
        earliest_days: i64,
        default_page_size: i32,
    ) -> Self {
        Self {
            spans,
            annotations,
            authorizer,
            enricher,
            dates: DateValidator::new(earliest_days),
            default_page_size,
        }
    }

    pub async fn list_spans(
        &self,
        user_id: &str,
        req: ListSpansRequest,
    ) -> Result<ListSpansResponse, ServiceError> {
        check_workspace(req.workspace_id)?;
        let page_size = req.page_size.unwrap_or(self.default_page_size);
        if !(0..=MAX_PAGE_SIZE).contains(&page_size) {
            return Err(ServiceError::invalid_param(format!(
                "page_size must be within [0, {}]",
                MAX_PAGE_SIZE
            )));
        }
        let order = parse_order(&req.order_bys)?;
        let window = self.dates.correct(req.start_time, req.end_time)?;
        let platform = parse_platform(req.platform_type.as_deref())?;
        let span_list_type = parse_list_type(req.span_list_type.as_deref())?;
        let filters = req.filters.unwrap_or_default();
        validate_filters(&filters, MAX_FILTER_DEPTH)?;
        let cursor = match req.page_token.as_deref().filter(|t| !t.is_empty()) {
            Some(token) => Some(SpanCursor::decode(token).map_err(ServiceError::InvalidParam)?),
            None => None,
        };
        self.authorize_read(user_id, req.workspace_id).await?;

        if page_size == 0 {
            return Ok(ListSpansResponse::default());
        }

        let page = self
            .spans
            .list_spans(&ListSpansParams {
                workspace_id: req.workspace_id.to_string(),
                platform,
                span_list_type,
                filters,
                start_us: ms_to_us(window.start_ms),
                end_us: ms_to_us(window.end_ms),
                order,
                cursor,
                limit: page_size as usize,
            })
            .await?;

        Ok(ListSpansResponse {
            spans: self.attach_annotations(req.workspace_id, page.spans).await?,
            next_page_token: page.next_cursor.map(|c| c.encode()).unwrap_or_default(),
            has_more: page.has_more,
        })
    }

    pub async fn get_trace(
        &self,
        user_id: &str,
        req: GetTraceRequest,
    ) -> Result<GetTraceResponse, ServiceError> {
        check_workspace(req.workspace_id)?;
        if req.trace_id.trim().is_empty() {
            return Err(ServiceError::invalid_param("trace_id is required"));
        }
        check_raw_window(req.start_time, req.end_time)?;
        let platform = parse_platform(req.platform_type.as_deref())?;
        self.authorize_read(user_id, req.workspace_id).await?;

        let workspace = req.workspace_id.to_string();
        let start_us = ms_to_us(req.start_time);
        let end_us = ms_to_us(req.end_time);
        let spans: Vec<Span> = self
            .spans
            .get_trace(&GetTraceParams {
                workspace_id: workspace.clone(),
                trace_id: req.trace_id.clone(),
                start_us,
                end_us,
                span_ids: req.span_ids,
            })
            .await?
            .into_iter()
            .filter(|s| s.trace_id == req.trace_id && platform.accepts_call_type(&s.call_type))
            .collect();

        let tokens = spans.iter().fold(TokenCost::default(), |acc, s| TokenCost {
            input: acc.input + s.input_tokens(),
            output: acc.output + s.output_tokens(),
        });
        Ok(GetTraceResponse {
            spans: self.attach_annotations(req.workspace_id, spans).await?,
            traces_advance_info: TraceAdvanceInfo {
                trace_id: req.trace_id,
                tokens,
            },
        })
    }

    /// Token sums per trace, in request order; unknown traces report zero
    pub async fn get_advance_info(
        &self,
        user_id: &str,
        req: AdvanceInfoRequest,
    ) -> Result<Vec<TraceAdvanceInfo>, ServiceError> {
        check_workspace(req.workspace_id)?;
        let windows = req
            .traces
            .iter()
            .map(|t| {
                check_raw_window(t.start_time, t.end_time)?;
                Ok(TraceWindow {
                    trace_id: t.trace_id.clone(),
                    start_us: ms_to_us(t.start_time),
                    end_us: ms_to_us(t.end_time),
                })
            })
            .collect::<Result<Vec<_>, ServiceError>>()?;
        self.authorize_read(user_id, req.workspace_id).await?;

        let usage: HashMap<String, (i64, i64)> = self
            .spans
            .trace_token_usage(&req.workspace_id.to_string(), &windows)
            .await?
            .into_iter()
            .map(|t| (t.trace_id, (t.input_tokens, t.output_tokens)))
            .collect();

        Ok(windows
            .into_iter()
            .map(|w| {
                let (input, output) = usage.get(&w.trace_id).copied().unwrap_or_default();
                TraceAdvanceInfo {
                    trace_id: w.trace_id,
                    tokens: TokenCost { input, output },
                }
            })
            .collect())
    }

    /// Filterable fields for UI-driven filter building
    pub async fn get_meta(
        &self,
        user_id: &str,
        workspace_id: i64,
        platform_type: Option<&str>,
        span_list_type: Option<&str>,
    ) -> Result<TracesMeta, ServiceError> {
        check_workspace(workspace_id)?;
        parse_platform(platform_type)?;
        let list_type = parse_list_type(span_list_type)?;
        self.authorize_read(user_id, workspace_id).await?;
        Ok(traces_meta(list_type))
    }

    /// Mark spans of a trace deleted; they stay stored until expiry
    pub async fn soft_delete(
        &self,
        user_id: &str,
        req: DeleteSpansRequest,
    ) -> Result<usize, ServiceError> {
        check_workspace(req.workspace_id)?;
        if req.trace_id.trim().is_empty() {
            return Err(ServiceError::invalid_param("trace_id is required"));
        }
        self.authorizer
            .check(
                user_id,
                AuthAction::IngestLoopTrace,
                &AuthResource::Workspace(req.workspace_id),
            )
            .await?;
        let deleted = self
            .spans
            .soft_delete(&SoftDeleteParams {
                workspace_id: req.workspace_id.to_string(),
                trace_id: req.trace_id,
                span_ids: req.span_ids,
                delete_at_us: now_us(),
            })
            .await?;
        Ok(deleted)
    }

    async fn authorize_read(&self, user_id: &str, workspace_id: i64) -> Result<(), ServiceError> {
        self.authorizer
            .check(
                user_id,
                AuthAction::ReadLoopTrace,
                &AuthResource::Workspace(workspace_id),
            )
            .await
    }

    async fn attach_annotations(
        &self,
        workspace_id: i64,
        spans: Vec<Span>,
    ) -> Result<Vec<SpanView>, ServiceError> {
        if spans.is_empty() {
            return Ok(Vec::new());
        }
        let span_ids: Vec<String> = spans.iter().map(|s| s.span_id.clone()).collect();
        let annotations = self
            .annotations
            .list_annotations_for_spans(&workspace_id.to_string(), &span_ids)
            .await?;

        let mut by_span: HashMap<(String, String), Vec<AnnotationView>> = HashMap::new();
        for view in self.enricher.enrich(workspace_id, annotations).await {
            by_span
                .entry((view.annotation.trace_id.clone(), view.annotation.span_id.clone()))
                .or_default()
                .push(view);
        }

        Ok(spans
            .into_iter()
            .map(|span| {
                let key = (span.trace_id.clone(), span.span_id.clone());
                let mut view = SpanView::from(span);
                view.annotations = by_span.remove(&key).unwrap_or_default();
                view
            })
            .collect())
    }
}

fn check_workspace(workspace_id: i64) -> Result<(), ServiceError> {
    if workspace_id <= 0 {
        return Err(ServiceError::invalid_param("workspace_id must be positive"));
    }
    Ok(())
}

/// Trace lookups take the window as given, without corridor clamping
fn check_raw_window(start_ms: i64, end_ms: i64) -> Result<(), ServiceError> {
    if start_ms < 0 || end_ms < start_ms {
        return Err(ServiceError::invalid_param(format!(
            "invalid time window [{}, {}]",
            start_ms, end_ms
        )));
    }
    Ok(())
}

fn parse_platform(raw: Option<&str>) -> Result<PlatformType, ServiceError> {
    raw.unwrap_or_default()
        .parse()
        .map_err(ServiceError::InvalidParam)
}

fn parse_list_type(raw: Option<&str>) -> Result<SpanListType, ServiceError> {
    raw.unwrap_or_default()
        .parse()
        .map_err(ServiceError::InvalidParam)
}

fn parse_order(order_bys: &[OrderBy]) -> Result<SpanOrder, ServiceError> {
    match order_bys {
        [] => Ok(SpanOrder::default()),
        [order] if order.field == ORDER_FIELD_START_TIME => Ok(if order.is_asc {
            SpanOrder::StartTimeAsc
        } else {
            SpanOrder::StartTimeDesc
        }),
        [order] => Err(ServiceError::invalid_param(format!(
            "cannot order by {}",
            order.field
        ))),
        _ => Err(ServiceError::invalid_param("at most one order_by is allowed")),
    }
}

pub fn traces_meta(span_list_type: SpanListType) -> TracesMeta {
    let field_metas = SPAN_FIELDS
        .iter()
        .filter(|f| !(span_list_type == SpanListType::Root && f.name == "parent_id"))
        .map(|f| {
            (
                f.name.to_string(),
                FieldMeta {
                    value_type: f.field_type,
                    filter_types: f.query_types().to_vec(),
                    support_custom: f.options.is_empty(),
                    field_options: (!f.options.is_empty())
                        .then(|| f.options.iter().map(|o| o.to_string()).collect()),
                },
            )
        })
        .collect();
    TracesMeta { field_metas }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::DataStores;
    use crate::data::duckdb::filters::FilterField;
    use crate::data::types::{
        Annotation, AnnotationStatus, AnnotationType, AnnotationValue, TAG_INPUT_TOKENS, TtlTier,
    };
    use crate::domain::external::{
        ConfigTagCatalog, LocalAuthorizer, LocalEvaluatorResolver, LocalUserResolver,
    };
    use crate::domain::metrics::MetricsEmitter;
    use crate::utils::time::now_ms;

    fn query(stores: &DataStores) -> TraceQuery {
        TraceQuery::new(
            stores.spans(),
            stores.annotations(),
            Arc::new(LocalAuthorizer),
            Enricher::new(
                Arc::new(LocalUserResolver),
                Arc::new(LocalEvaluatorResolver),
                Arc::new(ConfigTagCatalog::new(vec![])),
                MetricsEmitter::noop(),
            ),
            365,
            100,
        )
    }

    fn span(trace: &str, id: &str, start_ms: i64) -> Span {
        Span {
            trace_id: trace.into(),
            span_id: id.into(),
            workspace_id: "7".into(),
            span_name: "chat".into(),
            start_time_us: ms_to_us(start_ms),
            duration_us: ms_to_us(250),
            call_type: "Custom".into(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_get_trace_round_trip() {
        let stores = DataStores::in_memory().await.unwrap();
        let mut s = span("T1", "S1", 1000);
        s.tags_long.insert(TAG_INPUT_TOKENS.into(), 0);
        stores.spans().insert_spans(vec![s], TtlTier::Days3).await.unwrap();

        let q = query(&stores);
        let trace = q
            .get_trace(
                "alice",
                GetTraceRequest {
                    workspace_id: 7,
                    trace_id: "T1".into(),
                    start_time: 0,
                    end_time: 2000,
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(trace.spans.len(), 1);
        let got = &trace.spans[0];
        assert_eq!((got.trace_id.as_str(), got.span_id.as_str()), ("T1", "S1"));
        assert_eq!(got.started_at, 1000);
        assert_eq!(got.duration, 250);
        assert_eq!(got.status, "success");

        let info = q
            .get_advance_info(
                "alice",
                AdvanceInfoRequest {
                    workspace_id: 7,
                    traces: vec![TraceQueryWindow {
                        trace_id: "T1".into(),
                        start_time: 0,
                        end_time: 2000,
                    }],
                },
            )
            .await
            .unwrap();
        assert_eq!(info[0].tokens, TokenCost { input: 0, output: 0 });
    }

    #[tokio::test]
    async fn test_list_spans_validation() {
        let stores = DataStores::in_memory().await.unwrap();
        let q = query(&stores);
        let now = now_ms();
        let base = ListSpansRequest {
            workspace_id: 7,
            start_time: now - 60_000,
            end_time: now,
            ..Default::default()
        };

        let bad_ws = ListSpansRequest {
            workspace_id: 0,
            ..base.clone()
        };
        assert!(q.list_spans("alice", bad_ws).await.is_err());

        let too_big = ListSpansRequest {
            page_size: Some(MAX_PAGE_SIZE + 1),
            ..base.clone()
        };
        assert!(q.list_spans("alice", too_big).await.is_err());

        let two_orders = ListSpansRequest {
            order_bys: vec![
                OrderBy { field: "start_time".into(), is_asc: true },
                OrderBy { field: "start_time".into(), is_asc: false },
            ],
            ..base.clone()
        };
        assert!(q.list_spans("alice", two_orders).await.is_err());

        let empty = q
            .list_spans(
                "alice",
                ListSpansRequest {
                    page_size: Some(0),
                    ..base
                },
            )
            .await
            .unwrap();
        assert!(empty.spans.is_empty());
        assert!(!empty.has_more);
    }

    #[tokio::test]
    async fn test_list_spans_pages_with_annotations() {
        let stores = DataStores::in_memory().await.unwrap();
        let now = now_ms();
        let spans = (0..3).map(|i| span(&format!("T{}", i), "root", now - 10_000 + i)).collect();
        stores.spans().insert_spans(spans, TtlTier::Days3).await.unwrap();
        stores
            .annotations()
            .insert_annotation(&Annotation {
                id: "a1".into(),
                workspace_id: "7".into(),
                trace_id: "T2".into(),
                span_id: "root".into(),
                start_time_ms: now - 10_000 + 2,
                annotation_type: AnnotationType::CozeFeedback,
                key: "chat_feedback".into(),
                value: AnnotationValue::String("dislike".into()),
                reasoning: String::new(),
                status: AnnotationStatus::Normal,
                corrections: vec![],
                auto_evaluate: None,
                created_by: "alice".into(),
                updated_by: "alice".into(),
                created_at_ms: now,
                updated_at_ms: now,
            })
            .await
            .unwrap();

        let q = query(&stores);
        let req = ListSpansRequest {
            workspace_id: 7,
            start_time: now - 60_000,
            end_time: now,
            page_size: Some(2),
            ..Default::default()
        };
        let first = q.list_spans("alice", req.clone()).await.unwrap();
        assert_eq!(first.spans.len(), 2);
        assert!(first.has_more);
        assert_eq!(first.spans[0].trace_id, "T2");
        assert!(first.spans[0].started_at >= first.spans[1].started_at);
        assert_eq!(first.spans[0].annotations[0].display_value, "踩");

        let second = q
            .list_spans(
                "alice",
                ListSpansRequest {
                    page_token: Some(first.next_page_token),
                    ..req
                },
            )
            .await
            .unwrap();
        assert_eq!(second.spans.len(), 1);
        assert!(!second.has_more);
    }

    #[tokio::test]
    async fn test_list_spans_rejects_bad_filter() {
        let stores = DataStores::in_memory().await.unwrap();
        let now = now_ms();
        let req = ListSpansRequest {
            workspace_id: 7,
            start_time: now - 60_000,
            end_time: now,
            filters: Some(FilterFields {
                filter_fields: vec![FilterField {
                    field_name: "duration".into(),
                    field_type: FieldType::String,
                    values: vec!["1".into()],
                    query_type: Some(QueryType::Eq),
                    ..Default::default()
                }],
                ..Default::default()
            }),
            ..Default::default()
        };
        assert!(matches!(
            query(&stores).list_spans("alice", req).await,
            Err(ServiceError::InvalidParam(_))
        ));
    }

    #[test]
    fn test_traces_meta() {
        let meta = traces_meta(SpanListType::Root);
        assert!(!meta.field_metas.contains_key("parent_id"));
        let status = &meta.field_metas["status"];
        assert_eq!(
            status.field_options,
            Some(vec!["success".to_string(), "error".to_string()])
        );
        assert!(!status.support_custom);
        assert!(meta.field_metas["duration"].filter_types.contains(&QueryType::Gt));
    }
}
