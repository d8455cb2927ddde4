//! Annotation lifecycle
//!
//! Manual annotations are written synchronously. Auto-evaluate and chat
//! feedback annotations may also arrive as events on the annotation topic;
//! the consumer validates them the same way and upserts by logical key.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;

use super::enrich::{AnnotationView, Enricher};
use super::tags::TagResolver;
use crate::core::constants::ANNOTATION_SPAN_LOOKUP_SLACK_MS;
use crate::data::topics::{Publisher, TopicError, TopicMessage};
use crate::data::traits::{AnnotationRepository, SpanRepository};
use crate::data::types::{
    Annotation, AnnotationKey, AnnotationStatus, AnnotationType, AnnotationValue,
    AnnotationValueType, AutoEvaluateMeta, Correction, CorrectionType,
};
use crate::domain::error::ServiceError;
use crate::domain::external::{AuthAction, AuthResource, Authorizer};
use crate::domain::pipeline::TopicHandler;
use crate::utils::time::{ms_to_us, now_ms};

const EVENT_OVERHEAD_BYTES: usize = 256;

#[derive(Debug, Clone, Deserialize)]
pub struct CreateAnnotationRequest {
    pub workspace_id: i64,
    pub trace_id: String,
    pub span_id: String,
    /// Start time of the annotated span (ms)
    pub start_time: i64,
    pub annotation_type: AnnotationType,
    pub key: String,
    pub value: AnnotationValue,
    #[serde(default)]
    pub reasoning: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpdateAnnotationRequest {
    pub workspace_id: i64,
    pub value: AnnotationValue,
    #[serde(default)]
    pub reasoning: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ListAnnotationsRequest {
    pub workspace_id: i64,
    pub trace_id: String,
    pub span_id: String,
    #[serde(default)]
    pub start_time: Option<i64>,
    #[serde(default)]
    pub desc_by_updated_at: bool,
}

/// Open-API create: the value travels as a string
#[derive(Debug, Clone, Deserialize)]
pub struct OpenApiCreateRequest {
    pub workspace_id: i64,
    pub trace_id: String,
    pub span_id: String,
    pub start_time: i64,
    pub key: String,
    pub value_type: AnnotationValueType,
    pub value: String,
    #[serde(default)]
    pub reasoning: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeleteByKeyRequest {
    pub workspace_id: i64,
    pub trace_id: String,
    pub span_id: String,
    pub key: String,
}

/// Annotation produced by an evaluator or a feedback source
#[derive(Debug, Clone, Deserialize)]
pub struct AnnotationEvent {
    pub workspace_id: i64,
    pub trace_id: String,
    pub span_id: String,
    pub start_time: i64,
    pub annotation_type: AnnotationType,
    pub key: String,
    pub value: AnnotationValue,
    #[serde(default)]
    pub reasoning: String,
    #[serde(default)]
    pub auto_evaluate: Option<AutoEvaluateMeta>,
    pub source_user: String,
}

impl TopicMessage for AnnotationEvent {
    fn size_bytes(&self) -> usize {
        EVENT_OVERHEAD_BYTES + self.key.len() + self.reasoning.len()
    }
}

pub struct AnnotationSvc {
    annotations: Arc<dyn AnnotationRepository>,
    spans: Arc<dyn SpanRepository>,
    authorizer: Arc<dyn Authorizer>,
    tags: TagResolver,
    enricher: Enricher,
    events: Publisher<AnnotationEvent>,
}

impl AnnotationSvc {
    pub fn new(
        annotations: Arc<dyn AnnotationRepository>,
        spans: Arc<dyn SpanRepository>,
        authorizer: Arc<dyn Authorizer>,
        tags: TagResolver,
        enricher: Enricher,
        events: Publisher<AnnotationEvent>,
    ) -> Self {
        Self {
            annotations,
            spans,
            authorizer,
            tags,
            enricher,
            events,
        }
    }

    /// Create an annotation; returns its id
    pub async fn create(
        &self,
        user_id: &str,
        req: CreateAnnotationRequest,
    ) -> Result<String, ServiceError> {
        check_target(req.workspace_id, &req.trace_id, &req.span_id, &req.key)?;
        if req.annotation_type == AnnotationType::AutoEvaluate {
            return Err(ServiceError::invalid_param(
                "auto_evaluate annotations arrive as events",
            ));
        }
        self.authorize(user_id, req.workspace_id).await?;
        if req.annotation_type == AnnotationType::ManualFeedback {
            self.tags
                .validate(req.workspace_id, &req.key, &req.value)
                .await?;
        }
        self.ensure_span(req.workspace_id, &req.trace_id, &req.span_id, req.start_time)
            .await?;

        let annotation = new_annotation(
            req.workspace_id,
            req.trace_id,
            req.span_id,
            req.start_time,
            req.annotation_type,
            req.key,
            req.value,
            req.reasoning,
            None,
            user_id,
        );
        self.annotations.insert_annotation(&annotation).await?;
        tracing::debug!(
            annotation_id = %annotation.id,
            annotation_type = annotation.annotation_type.as_str(),
            "Annotation created"
        );
        Ok(annotation.id)
    }

    /// Open-API create of a manual annotation with a string-encoded value
    pub async fn create_open_api(
        &self,
        user_id: &str,
        req: OpenApiCreateRequest,
    ) -> Result<String, ServiceError> {
        let value =
            AnnotationValue::parse(req.value_type, &req.value).map_err(ServiceError::InvalidParam)?;
        self.create(
            user_id,
            CreateAnnotationRequest {
                workspace_id: req.workspace_id,
                trace_id: req.trace_id,
                span_id: req.span_id,
                start_time: req.start_time,
                annotation_type: AnnotationType::ManualFeedback,
                key: req.key,
                value,
                reasoning: req.reasoning,
            },
        )
        .await
    }

    /// Auto-evaluate annotations keep their value and gain a manual
    /// correction; any other type has its value replaced.
    pub async fn update(
        &self,
        user_id: &str,
        annotation_id: &str,
        req: UpdateAnnotationRequest,
    ) -> Result<Annotation, ServiceError> {
        check_workspace(req.workspace_id)?;
        self.authorize(user_id, req.workspace_id).await?;
        let mut annotation = self
            .annotations
            .get_annotation(&req.workspace_id.to_string(), annotation_id)
            .await?
            .filter(Annotation::is_live)
            .ok_or_else(|| ServiceError::not_found(format!("annotation {}", annotation_id)))?;

        if req.value.value_type() != annotation.value.value_type() {
            return Err(ServiceError::invalid_param(format!(
                "annotation holds a {} value, got {}",
                annotation.value.value_type(),
                req.value.value_type()
            )));
        }

        let now = now_ms();
        match annotation.annotation_type {
            AnnotationType::AutoEvaluate => annotation.corrections.push(Correction {
                value: req.value,
                reasoning: req.reasoning,
                correction_type: CorrectionType::Manual,
                updated_by: user_id.to_string(),
                updated_at_ms: now,
            }),
            AnnotationType::ManualFeedback => {
                self.tags
                    .validate(req.workspace_id, &annotation.key, &req.value)
                    .await?;
                annotation.value = req.value;
                annotation.reasoning = req.reasoning;
            }
            AnnotationType::CozeFeedback => {
                annotation.value = req.value;
                annotation.reasoning = req.reasoning;
            }
        }
        annotation.updated_by = user_id.to_string();
        annotation.updated_at_ms = now;

        if !self.annotations.update_annotation(&annotation).await? {
            return Err(ServiceError::not_found(format!("annotation {}", annotation_id)));
        }
        Ok(annotation)
    }

    pub async fn delete(
        &self,
        user_id: &str,
        workspace_id: i64,
        annotation_id: &str,
    ) -> Result<(), ServiceError> {
        check_workspace(workspace_id)?;
        self.authorize(user_id, workspace_id).await?;
        let deleted = self
            .annotations
            .delete_annotation(&workspace_id.to_string(), annotation_id, user_id, now_ms())
            .await?;
        if !deleted {
            return Err(ServiceError::not_found(format!("annotation {}", annotation_id)));
        }
        Ok(())
    }

    pub async fn delete_by_key(
        &self,
        user_id: &str,
        req: DeleteByKeyRequest,
    ) -> Result<(), ServiceError> {
        check_target(req.workspace_id, &req.trace_id, &req.span_id, &req.key)?;
        self.authorize(user_id, req.workspace_id).await?;
        let key = AnnotationKey {
            workspace_id: req.workspace_id.to_string(),
            trace_id: req.trace_id,
            span_id: req.span_id,
            key: req.key,
        };
        if !self
            .annotations
            .delete_annotation_by_key(&key, user_id, now_ms())
            .await?
        {
            return Err(ServiceError::not_found(format!(
                "annotation '{}' on span {}/{}",
                key.key, key.trace_id, key.span_id
            )));
        }
        Ok(())
    }

    /// Live annotations of one span, presented
    pub async fn list(
        &self,
        user_id: &str,
        req: ListAnnotationsRequest,
    ) -> Result<Vec<AnnotationView>, ServiceError> {
        check_workspace(req.workspace_id)?;
        self.authorizer
            .check(
                user_id,
                AuthAction::ReadLoopTrace,
                &AuthResource::Workspace(req.workspace_id),
            )
            .await?;
        let annotations = self
            .annotations
            .list_span_annotations(
                &req.workspace_id.to_string(),
                &req.trace_id,
                &req.span_id,
                req.start_time,
                req.desc_by_updated_at,
            )
            .await?;
        Ok(self.enricher.enrich(req.workspace_id, annotations).await)
    }

    /// Queue an annotation event for the consumer
    pub fn send(&self, event: AnnotationEvent) -> Result<(), ServiceError> {
        if event.annotation_type == AnnotationType::ManualFeedback {
            return Err(ServiceError::invalid_param(
                "manual_feedback annotations are created synchronously",
            ));
        }
        check_target(event.workspace_id, &event.trace_id, &event.span_id, &event.key)?;
        self.events.publish(event).map_err(|e| match e {
            TopicError::BufferFull => {
                ServiceError::Transient("annotation queue is full".to_string())
            }
            other => ServiceError::Fatal(format!("annotation queue unavailable: {}", other)),
        })
    }

    /// Write path of queued events: validate, then upsert by logical key
    pub async fn apply_event(&self, event: AnnotationEvent) -> Result<Annotation, ServiceError> {
        check_target(event.workspace_id, &event.trace_id, &event.span_id, &event.key)?;
        if event.annotation_type == AnnotationType::AutoEvaluate && event.auto_evaluate.is_none() {
            return Err(ServiceError::invalid_param(
                "auto_evaluate event without evaluator provenance",
            ));
        }
        self.ensure_span(
            event.workspace_id,
            &event.trace_id,
            &event.span_id,
            event.start_time,
        )
        .await?;

        let key = AnnotationKey {
            workspace_id: event.workspace_id.to_string(),
            trace_id: event.trace_id.clone(),
            span_id: event.span_id.clone(),
            key: event.key.clone(),
        };
        match self.annotations.find_live_annotation(&key).await? {
            Some(mut existing) => {
                existing.value = event.value;
                existing.reasoning = event.reasoning;
                existing.auto_evaluate = event.auto_evaluate.or(existing.auto_evaluate);
                existing.updated_by = event.source_user;
                existing.updated_at_ms = now_ms();
                self.annotations.update_annotation(&existing).await?;
                Ok(existing)
            }
            None => {
                let annotation = new_annotation(
                    event.workspace_id,
                    event.trace_id,
                    event.span_id,
                    event.start_time,
                    event.annotation_type,
                    event.key,
                    event.value,
                    event.reasoning,
                    event.auto_evaluate,
                    &event.source_user,
                );
                self.annotations.insert_annotation(&annotation).await?;
                Ok(annotation)
            }
        }
    }

    async fn authorize(&self, user_id: &str, workspace_id: i64) -> Result<(), ServiceError> {
        self.authorizer
            .check(
                user_id,
                AuthAction::AnnotationCreate,
                &AuthResource::Workspace(workspace_id),
            )
            .await
    }

    /// The span must exist within a day of the given start time
    async fn ensure_span(
        &self,
        workspace_id: i64,
        trace_id: &str,
        span_id: &str,
        start_time_ms: i64,
    ) -> Result<(), ServiceError> {
        let found = self
            .spans
            .get_spans_by_ids(
                &workspace_id.to_string(),
                &[span_id.to_string()],
                ms_to_us(start_time_ms - ANNOTATION_SPAN_LOOKUP_SLACK_MS),
                ms_to_us(start_time_ms + ANNOTATION_SPAN_LOOKUP_SLACK_MS),
            )
            .await?
            .iter()
            .any(|s| s.trace_id == trace_id);
        if !found {
            return Err(ServiceError::not_found(format!(
                "span {}/{}",
                trace_id, span_id
            )));
        }
        Ok(())
    }
}

#[allow(clippy::too_many_arguments)]
fn new_annotation(
    workspace_id: i64,
    trace_id: String,
    span_id: String,
    start_time_ms: i64,
    annotation_type: AnnotationType,
    key: String,
    value: AnnotationValue,
    reasoning: String,
    auto_evaluate: Option<AutoEvaluateMeta>,
    user_id: &str,
) -> Annotation {
    let now = now_ms();
    Annotation {
        id: uuid::Uuid::new_v4().to_string(),
        workspace_id: workspace_id.to_string(),
        trace_id,
        span_id,
        start_time_ms,
        annotation_type,
        key,
        value,
        reasoning,
        status: AnnotationStatus::Normal,
        corrections: Vec::new(),
        auto_evaluate,
        created_by: user_id.to_string(),
        updated_by: user_id.to_string(),
        created_at_ms: now,
        updated_at_ms: now,
    }
}

fn check_workspace(workspace_id: i64) -> Result<(), ServiceError> {
    if workspace_id <= 0 {
        return Err(ServiceError::invalid_param("workspace_id must be positive"));
    }
    Ok(())
}

fn check_target(
    workspace_id: i64,
    trace_id: &str,
    span_id: &str,
    key: &str,
) -> Result<(), ServiceError> {
    check_workspace(workspace_id)?;
    if trace_id.is_empty() || span_id.is_empty() {
        return Err(ServiceError::invalid_param("trace_id and span_id are required"));
    }
    if key.trim().is_empty() {
        return Err(ServiceError::invalid_param("annotation key is required"));
    }
    Ok(())
}

/// Topic consumer applying queued annotation events
pub struct AnnotationEventConsumer {
    svc: Arc<AnnotationSvc>,
}

impl AnnotationEventConsumer {
    pub fn new(svc: Arc<AnnotationSvc>) -> Self {
        Self { svc }
    }
}

#[async_trait]
impl TopicHandler<AnnotationEvent> for AnnotationEventConsumer {
    fn name(&self) -> &'static str {
        "annotation_events"
    }

    async fn handle(&self, event: AnnotationEvent) {
        let (trace_id, span_id) = (event.trace_id.clone(), event.span_id.clone());
        if let Err(e) = self.svc.apply_event(event).await {
            tracing::warn!(%trace_id, %span_id, error = %e, "Dropped annotation event");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::constants::TOPIC_ANNOTATION_EVENTS;
    use crate::data::DataStores;
    use crate::data::topics::TopicService;
    use crate::data::types::{Span, TagContentType, TagInfo, TagValue, TtlTier};
    use crate::domain::external::{
        ConfigTagCatalog, LocalAuthorizer, LocalEvaluatorResolver, LocalUserResolver,
    };
    use crate::domain::metrics::MetricsEmitter;

    const SPAN_START_MS: i64 = 1_700_000_000_000;

    struct Fixture {
        stores: DataStores,
        svc: AnnotationSvc,
        topics: TopicService,
    }

    async fn fixture() -> Fixture {
        let stores = DataStores::in_memory().await.unwrap();
        stores
            .spans()
            .insert_spans(
                vec![Span {
                    trace_id: "T1".into(),
                    span_id: "S1".into(),
                    workspace_id: "7".into(),
                    start_time_us: ms_to_us(SPAN_START_MS),
                    duration_us: 1_000,
                    ..Default::default()
                }],
                TtlTier::Days3,
            )
            .await
            .unwrap();
        let catalog = Arc::new(ConfigTagCatalog::new(vec![TagInfo {
            tag_key_id: 10,
            tag_key_name: "quality".into(),
            active: true,
            content_type: TagContentType::Categorical,
            tag_values: vec![TagValue {
                tag_value_id: 1,
                tag_value_name: "good".into(),
                children: vec![],
            }],
        }]));
        let topics = TopicService::new();
        let topic = topics
            .topic::<AnnotationEvent>(TOPIC_ANNOTATION_EVENTS)
            .unwrap();
        let svc = AnnotationSvc::new(
            stores.annotations(),
            stores.spans(),
            Arc::new(LocalAuthorizer),
            TagResolver::new(catalog.clone()),
            Enricher::new(
                Arc::new(LocalUserResolver),
                Arc::new(LocalEvaluatorResolver),
                catalog,
                MetricsEmitter::noop(),
            ),
            topic.publisher(),
        );
        Fixture { stores, svc, topics }
    }

    fn create_req(annotation_type: AnnotationType, key: &str, value: AnnotationValue) -> CreateAnnotationRequest {
        CreateAnnotationRequest {
            workspace_id: 7,
            trace_id: "T1".into(),
            span_id: "S1".into(),
            start_time: SPAN_START_MS,
            annotation_type,
            key: key.into(),
            value,
            reasoning: String::new(),
        }
    }

    fn list_req() -> ListAnnotationsRequest {
        ListAnnotationsRequest {
            workspace_id: 7,
            trace_id: "T1".into(),
            span_id: "S1".into(),
            start_time: None,
            desc_by_updated_at: false,
        }
    }

    #[tokio::test]
    async fn test_coze_feedback_round_trip() {
        let f = fixture().await;
        let id = f
            .svc
            .create(
                "alice",
                create_req(
                    AnnotationType::CozeFeedback,
                    "chat_feedback",
                    AnnotationValue::String("like".into()),
                ),
            )
            .await
            .unwrap();

        let listed = f.svc.list("alice", list_req()).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].display_key, "消息反馈");
        assert_eq!(listed[0].display_value, "赞");

        f.svc.delete("alice", 7, &id).await.unwrap();
        assert!(f.svc.list("alice", list_req()).await.unwrap().is_empty());
        assert!(matches!(
            f.svc.delete("alice", 7, &id).await,
            Err(ServiceError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_manual_feedback_validation_and_conflict() {
        let f = fixture().await;
        let bad = f
            .svc
            .create(
                "alice",
                create_req(AnnotationType::ManualFeedback, "10", AnnotationValue::Long(99)),
            )
            .await;
        assert!(matches!(bad, Err(ServiceError::InvalidParam(_))));

        let first = f
            .svc
            .create(
                "alice",
                create_req(AnnotationType::ManualFeedback, "10", AnnotationValue::Long(1)),
            )
            .await
            .unwrap();
        let dup = f
            .svc
            .create(
                "alice",
                create_req(AnnotationType::ManualFeedback, "10", AnnotationValue::Long(1)),
            )
            .await;
        assert!(matches!(dup, Err(ServiceError::Conflict(_))));

        // re-creation after delete yields a new id
        f.svc
            .delete_by_key(
                "alice",
                DeleteByKeyRequest {
                    workspace_id: 7,
                    trace_id: "T1".into(),
                    span_id: "S1".into(),
                    key: "10".into(),
                },
            )
            .await
            .unwrap();
        let second = f
            .svc
            .create(
                "alice",
                create_req(AnnotationType::ManualFeedback, "10", AnnotationValue::Long(1)),
            )
            .await
            .unwrap();
        assert_ne!(first, second);
    }

    #[tokio::test]
    async fn test_create_requires_existing_span() {
        let f = fixture().await;
        let mut req = create_req(
            AnnotationType::CozeFeedback,
            "chat_feedback",
            AnnotationValue::String("like".into()),
        );
        req.start_time = SPAN_START_MS + 3 * ANNOTATION_SPAN_LOOKUP_SLACK_MS;
        assert!(matches!(
            f.svc.create("alice", req).await,
            Err(ServiceError::NotFound(_))
        ));

        let mut req = create_req(
            AnnotationType::CozeFeedback,
            "chat_feedback",
            AnnotationValue::String("like".into()),
        );
        req.trace_id = "T9".into();
        assert!(f.svc.create("alice", req).await.is_err());
    }

    #[tokio::test]
    async fn test_open_api_parses_string_values() {
        let f = fixture().await;
        let req = |value: &str| OpenApiCreateRequest {
            workspace_id: 7,
            trace_id: "T1".into(),
            span_id: "S1".into(),
            start_time: SPAN_START_MS,
            key: "10".into(),
            value_type: AnnotationValueType::Long,
            value: value.into(),
            reasoning: String::new(),
        };
        assert!(matches!(
            f.svc.create_open_api("alice", req("one")).await,
            Err(ServiceError::InvalidParam(_))
        ));
        assert!(f.svc.create_open_api("alice", req("1")).await.is_ok());
    }

    #[tokio::test]
    async fn test_events_upsert_and_corrections() {
        let f = fixture().await;
        let event = |score: f64| AnnotationEvent {
            workspace_id: 7,
            trace_id: "T1".into(),
            span_id: "S1".into(),
            start_time: SPAN_START_MS,
            annotation_type: AnnotationType::AutoEvaluate,
            key: "relevance".into(),
            value: AnnotationValue::Double(score),
            reasoning: "judged".into(),
            auto_evaluate: Some(AutoEvaluateMeta {
                evaluator_version_id: 3,
                task_id: 4,
                evaluator_record_id: 5,
            }),
            source_user: "evaluator".into(),
        };
        let first = f.svc.apply_event(event(0.4)).await.unwrap();
        let second = f.svc.apply_event(event(0.8)).await.unwrap();
        assert_eq!(first.id, second.id);

        let updated = f
            .svc
            .update(
                "alice",
                &first.id,
                UpdateAnnotationRequest {
                    workspace_id: 7,
                    value: AnnotationValue::Double(1.0),
                    reasoning: "fixed".into(),
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.value, AnnotationValue::Double(0.8));
        assert_eq!(
            updated.latest_manual_correction().map(|c| c.value.clone()),
            Some(AnnotationValue::Double(1.0))
        );

        let listed = f.svc.list("alice", list_req()).await.unwrap();
        assert_eq!(listed[0].score, Some(0.8));
        assert_eq!(listed[0].correction_score, Some(1.0));

        let stored = f
            .stores
            .annotations()
            .get_annotation("7", &first.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.corrections.len(), 1);
    }

    #[tokio::test]
    async fn test_send_goes_through_topic() {
        let f = fixture().await;
        let mut sub = f
            .topics
            .topic::<AnnotationEvent>(TOPIC_ANNOTATION_EVENTS)
            .unwrap()
            .subscribe();
        f.svc
            .send(AnnotationEvent {
                workspace_id: 7,
                trace_id: "T1".into(),
                span_id: "S1".into(),
                start_time: SPAN_START_MS,
                annotation_type: AnnotationType::CozeFeedback,
                key: "chat_feedback".into(),
                value: AnnotationValue::String("dislike".into()),
                reasoning: String::new(),
                auto_evaluate: None,
                source_user: "bot".into(),
            })
            .unwrap();
        let received = sub.recv().await.unwrap();
        assert_eq!(received.key, "chat_feedback");

        let mut manual = received.clone();
        manual.annotation_type = AnnotationType::ManualFeedback;
        assert!(f.svc.send(manual).is_err());
    }
}
