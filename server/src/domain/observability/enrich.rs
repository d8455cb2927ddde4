//! Annotation presentation
//!
//! Annotations reference users, evaluator versions and tag keys by id.
//! The three resolvers run concurrently on their own tasks; a failing or
//! panicking resolver leaves its ids unresolved and never fails the call.

use std::collections::{BTreeSet, HashMap};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use moka::future::Cache;
use serde::Serialize;

use super::tags::{coze_feedback_key, coze_feedback_value};
use crate::data::types::{Annotation, AnnotationType, AnnotationValue, TagInfo};
use crate::domain::error::ServiceError;
use crate::domain::external::{
    EvaluatorInfo, EvaluatorResolver, TagCatalog, UserInfo, UserResolver,
};
use crate::domain::metrics::MetricsEmitter;

const EVALUATOR_CACHE_CAPACITY: u64 = 10_000;
const EVALUATOR_CACHE_TTL_SECS: u64 = 300;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnnotationView {
    #[serde(flatten)]
    pub annotation: Annotation,
    pub display_key: String,
    pub display_value: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correction_score: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub creator: Option<UserInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub evaluator: Option<EvaluatorInfo>,
}

/// Lookups gathered by one enrichment round
#[derive(Debug, Default)]
pub struct Resolved {
    pub users: HashMap<String, UserInfo>,
    pub evaluators: HashMap<i64, EvaluatorInfo>,
    pub tags: HashMap<i64, TagInfo>,
}

#[derive(Clone)]
pub struct Enricher {
    users: Arc<dyn UserResolver>,
    evaluators: Arc<dyn EvaluatorResolver>,
    tags: Arc<dyn TagCatalog>,
    evaluator_cache: Cache<(i64, i64), EvaluatorInfo>,
    metrics: MetricsEmitter,
}

impl Enricher {
    pub fn new(
        users: Arc<dyn UserResolver>,
        evaluators: Arc<dyn EvaluatorResolver>,
        tags: Arc<dyn TagCatalog>,
        metrics: MetricsEmitter,
    ) -> Self {
        Self {
            users,
            evaluators,
            tags,
            evaluator_cache: Cache::builder()
                .max_capacity(EVALUATOR_CACHE_CAPACITY)
                .time_to_live(Duration::from_secs(EVALUATOR_CACHE_TTL_SECS))
                .build(),
            metrics,
        }
    }

    pub async fn enrich(&self, workspace_id: i64, annotations: Vec<Annotation>) -> Vec<AnnotationView> {
        if annotations.is_empty() {
            return Vec::new();
        }
        let resolved = self.resolve(workspace_id, &annotations).await;
        annotations
            .into_iter()
            .map(|a| present(a, &resolved))
            .collect()
    }

    pub async fn resolve(&self, workspace_id: i64, annotations: &[Annotation]) -> Resolved {
        let mut user_ids = BTreeSet::new();
        let mut evaluator_ids = BTreeSet::new();
        let mut tag_ids = BTreeSet::new();
        for a in annotations {
            user_ids.insert(a.created_by.clone());
            user_ids.insert(a.updated_by.clone());
            if let Some(meta) = &a.auto_evaluate {
                evaluator_ids.insert(meta.evaluator_version_id);
            }
            if a.annotation_type == AnnotationType::ManualFeedback
                && let Ok(id) = a.key.trim().parse::<i64>()
            {
                tag_ids.insert(id);
            }
        }
        user_ids.retain(|u| !u.is_empty());

        let users = {
            let resolver = Arc::clone(&self.users);
            let ids: Vec<String> = user_ids.into_iter().collect();
            spawn_resolver(&self.metrics, workspace_id, "user", async move {
                if ids.is_empty() {
                    return Ok(HashMap::new());
                }
                let users = resolver.get_users(&ids).await?;
                Ok(users.into_iter().map(|u| (u.user_id.clone(), u)).collect())
            })
        };
        let evaluators = {
            let this = self.clone();
            let ids: Vec<i64> = evaluator_ids.into_iter().collect();
            spawn_resolver(&self.metrics, workspace_id, "evaluator", async move {
                this.resolve_evaluators(workspace_id, ids).await
            })
        };
        let tags = {
            let catalog = Arc::clone(&self.tags);
            let ids: Vec<i64> = tag_ids.into_iter().collect();
            spawn_resolver(&self.metrics, workspace_id, "tag", async move {
                if ids.is_empty() {
                    return Ok(HashMap::new());
                }
                let tags = catalog.get_tags(workspace_id, &ids).await?;
                Ok(tags.into_iter().map(|t| (t.tag_key_id, t)).collect())
            })
        };

        let (users, evaluators, tags) = tokio::join!(users, evaluators, tags);
        Resolved {
            users,
            evaluators,
            tags,
        }
    }

    async fn resolve_evaluators(
        &self,
        workspace_id: i64,
        ids: Vec<i64>,
    ) -> Result<HashMap<i64, EvaluatorInfo>, ServiceError> {
        let mut found = HashMap::new();
        let mut missing = Vec::new();
        for id in ids {
            match self.evaluator_cache.get(&(workspace_id, id)).await {
                Some(info) => {
                    self.metrics.emit_prompt_cache(workspace_id, false, true);
                    found.insert(id, info);
                }
                None => {
                    self.metrics.emit_prompt_cache(workspace_id, false, false);
                    missing.push(id);
                }
            }
        }
        if missing.is_empty() {
            return Ok(found);
        }
        for info in self.evaluators.get_evaluators(workspace_id, &missing).await? {
            self.evaluator_cache
                .insert((workspace_id, info.evaluator_version_id), info.clone())
                .await;
            found.insert(info.evaluator_version_id, info);
        }
        Ok(found)
    }
}

/// Run one resolver on its own task; any failure yields an empty map
async fn spawn_resolver<K, V, F>(
    metrics: &MetricsEmitter,
    workspace_id: i64,
    name: &'static str,
    fut: F,
) -> HashMap<K, V>
where
    K: Send + 'static,
    V: Send + 'static,
    F: Future<Output = Result<HashMap<K, V>, ServiceError>> + Send + 'static,
{
    let result = match tokio::spawn(fut).await {
        Ok(result) => result,
        Err(e) => {
            tracing::warn!(resolver = name, error = %e, "Resolver task aborted");
            Err(ServiceError::Fatal(format!("{} resolver task aborted", name)))
        }
    };
    metrics.emit_enrich_resolver(workspace_id, name, &result);
    result.unwrap_or_else(|e| {
        tracing::warn!(resolver = name, error = %e, "Resolver failed, leaving ids unresolved");
        HashMap::new()
    })
}

/// Presentation of one annotation given the resolved lookups
pub fn present(annotation: Annotation, resolved: &Resolved) -> AnnotationView {
    let a = &annotation;
    let mut display_key = a.key.clone();
    let mut display_value = a.value.to_display();
    let mut score = None;
    let mut correction_score = None;
    let mut evaluator = None;

    match a.annotation_type {
        AnnotationType::CozeFeedback => {
            if let Some(key) = coze_feedback_key(&a.key) {
                display_key = key.to_string();
            }
            if let Some(value) = a.value.as_str().and_then(coze_feedback_value) {
                display_value = value.to_string();
            }
        }
        AnnotationType::ManualFeedback => {
            let tag = a.key.trim().parse::<i64>().ok().and_then(|id| resolved.tags.get(&id));
            if let Some(tag) = tag {
                display_key = tag.tag_key_name.clone();
                if let AnnotationValue::Long(value_id) = a.value
                    && let Some(value) = tag.find_value(value_id)
                {
                    display_value = value.tag_value_name.clone();
                }
            }
        }
        AnnotationType::AutoEvaluate => {
            score = a.value.as_double();
            if let Some(correction) = a.latest_manual_correction() {
                correction_score = correction.value.as_double();
                display_value = correction.value.to_display();
            }
            evaluator = a
                .auto_evaluate
                .and_then(|m| resolved.evaluators.get(&m.evaluator_version_id))
                .cloned();
            if let Some(info) = &evaluator {
                display_key = info.name.clone();
            }
        }
    }

    AnnotationView {
        creator: resolved.users.get(&a.created_by).cloned(),
        display_key,
        display_value,
        score,
        correction_score,
        evaluator,
        annotation,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    use crate::data::types::{
        AnnotationStatus, AutoEvaluateMeta, Correction, CorrectionType, TagContentType, TagValue,
    };
    use crate::domain::external::{ConfigTagCatalog, LocalEvaluatorResolver, LocalUserResolver};
    use crate::domain::metrics::{RecordingMeter, TagKey};

    struct BrokenUsers;

    #[async_trait]
    impl UserResolver for BrokenUsers {
        async fn get_users(&self, _ids: &[String]) -> Result<Vec<UserInfo>, ServiceError> {
            Err(ServiceError::Transient("user service down".into()))
        }
    }

    struct PanickingEvaluators;

    #[async_trait]
    impl EvaluatorResolver for PanickingEvaluators {
        async fn get_evaluators(
            &self,
            _workspace_id: i64,
            _ids: &[i64],
        ) -> Result<Vec<EvaluatorInfo>, ServiceError> {
            panic!("evaluator resolver bug");
        }
    }

    fn annotation(kind: AnnotationType, key: &str, value: AnnotationValue) -> Annotation {
        Annotation {
            id: "a1".into(),
            workspace_id: "7".into(),
            trace_id: "T1".into(),
            span_id: "S1".into(),
            start_time_ms: 1_000,
            annotation_type: kind,
            key: key.into(),
            value,
            reasoning: String::new(),
            status: AnnotationStatus::Normal,
            corrections: vec![],
            auto_evaluate: None,
            created_by: "alice".into(),
            updated_by: "alice".into(),
            created_at_ms: 1,
            updated_at_ms: 1,
        }
    }

    fn catalog() -> Arc<ConfigTagCatalog> {
        Arc::new(ConfigTagCatalog::new(vec![TagInfo {
            tag_key_id: 10,
            tag_key_name: "quality".into(),
            active: true,
            content_type: TagContentType::Categorical,
            tag_values: vec![TagValue {
                tag_value_id: 1,
                tag_value_name: "good".into(),
                children: vec![],
            }],
        }]))
    }

    #[tokio::test]
    async fn test_coze_feedback_presentation() {
        let enricher = Enricher::new(
            Arc::new(LocalUserResolver),
            Arc::new(LocalEvaluatorResolver),
            catalog(),
            MetricsEmitter::noop(),
        );
        let views = enricher
            .enrich(
                7,
                vec![annotation(
                    AnnotationType::CozeFeedback,
                    "chat_feedback",
                    AnnotationValue::String("like".into()),
                )],
            )
            .await;
        assert_eq!(views[0].display_key, "消息反馈");
        assert_eq!(views[0].display_value, "赞");
        assert_eq!(views[0].creator.as_ref().map(|u| u.name.as_str()), Some("alice"));
    }

    #[tokio::test]
    async fn test_manual_feedback_uses_tag_names() {
        let enricher = Enricher::new(
            Arc::new(LocalUserResolver),
            Arc::new(LocalEvaluatorResolver),
            catalog(),
            MetricsEmitter::noop(),
        );
        let views = enricher
            .enrich(
                7,
                vec![annotation(AnnotationType::ManualFeedback, "10", AnnotationValue::Long(1))],
            )
            .await;
        assert_eq!(views[0].display_key, "quality");
        assert_eq!(views[0].display_value, "good");
    }

    #[tokio::test]
    async fn test_auto_evaluate_scores_and_cache() {
        let meter = Arc::new(RecordingMeter::default());
        let enricher = Enricher::new(
            Arc::new(LocalUserResolver),
            Arc::new(LocalEvaluatorResolver),
            catalog(),
            MetricsEmitter::new(meter.clone()),
        );
        let mut a = annotation(AnnotationType::AutoEvaluate, "9", AnnotationValue::Double(0.4));
        a.auto_evaluate = Some(AutoEvaluateMeta {
            evaluator_version_id: 9,
            task_id: 1,
            evaluator_record_id: 2,
        });
        a.corrections.push(Correction {
            value: AnnotationValue::Double(0.8),
            reasoning: "too harsh".into(),
            correction_type: CorrectionType::Manual,
            updated_by: "bob".into(),
            updated_at_ms: 5,
        });

        let views = enricher.enrich(7, vec![a.clone()]).await;
        assert_eq!(views[0].score, Some(0.4));
        assert_eq!(views[0].correction_score, Some(0.8));
        assert_eq!(views[0].display_key, "evaluator-9");

        enricher.enrich(7, vec![a]).await;
        let hits: Vec<_> = meter
            .named("prompt_cache.throughput")
            .into_iter()
            .filter_map(|r| r.tag(crate::domain::metrics::TagKey::Hit).map(str::to_string))
            .collect();
        assert_eq!(hits, vec!["false".to_string(), "true".to_string()]);
    }

    #[tokio::test]
    async fn test_resolver_failures_degrade() {
        let meter = Arc::new(RecordingMeter::default());
        let enricher = Enricher::new(
            Arc::new(BrokenUsers),
            Arc::new(PanickingEvaluators),
            catalog(),
            MetricsEmitter::new(meter.clone()),
        );
        let mut a = annotation(AnnotationType::AutoEvaluate, "9", AnnotationValue::Double(0.5));
        a.auto_evaluate = Some(AutoEvaluateMeta {
            evaluator_version_id: 9,
            task_id: 1,
            evaluator_record_id: 2,
        });
        let views = enricher.enrich(7, vec![a]).await;
        assert_eq!(views.len(), 1);
        assert!(views[0].creator.is_none());
        assert!(views[0].evaluator.is_none());
        assert_eq!(views[0].display_key, "9");
        assert_eq!(views[0].score, Some(0.5));

        let outcome = |resolver: &str| {
            meter
                .named("enrich_resolver.throughput")
                .into_iter()
                .find(|r| r.tag(TagKey::Method) == Some(resolver))
                .and_then(|r| r.tag(TagKey::IsErr).map(str::to_string))
        };
        assert_eq!(outcome("user").as_deref(), Some("1"));
        assert_eq!(outcome("evaluator").as_deref(), Some("1"));
        assert_eq!(outcome("tag").as_deref(), Some("0"));
    }
}
