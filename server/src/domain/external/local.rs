//! In-process collaborators for a standalone deployment

use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;

use super::{
    AddItemsOutcome, AuthAction, AuthResource, Authorizer, BenefitOracle, BenefitResult,
    DatasetService, EvalTargetResolver, EvaluatorInfo, EvaluatorInvocation, EvaluatorInvoker,
    EvaluatorOutput, EvaluatorResolver, NewDataset, SourceTarget, TagCatalog, TargetInvocation,
    TargetInvoker, TargetOutput, UserInfo, UserResolver,
};
use crate::core::config::BenefitConfig;
use crate::data::types::{
    Dataset, DatasetItem, ItemErrorDetail, ItemErrorGroup, ItemErrorType, ItemStatus, TagInfo,
};
use crate::domain::error::ServiceError;

/// Field the echo target writes its answer to
pub const ACTUAL_OUTPUT_FIELD: &str = "actual_output";
/// Field the exact-match evaluator compares against
pub const REFERENCE_OUTPUT_FIELD: &str = "reference_output";

/// Items one local dataset may hold
const MAX_DATASET_ITEMS: usize = 100_000;

// ============================================================================
// Authorization
// ============================================================================

/// Any identified caller may act on any workspace; views are edited by
/// their owner only.
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalAuthorizer;

#[async_trait]
impl Authorizer for LocalAuthorizer {
    async fn check(
        &self,
        user_id: &str,
        action: AuthAction,
        resource: &AuthResource,
    ) -> Result<(), ServiceError> {
        if user_id.trim().is_empty() {
            return Err(ServiceError::NoPermission(format!(
                "{} requires an identified caller",
                action
            )));
        }
        match resource {
            AuthResource::View { view_id, owner, .. }
                if action == AuthAction::Edit && owner != user_id =>
            {
                Err(ServiceError::NoPermission(format!(
                    "user {} cannot edit view {}",
                    user_id, view_id
                )))
            }
            _ => Ok(()),
        }
    }
}

// ============================================================================
// Benefit
// ============================================================================

pub struct ConfigBenefitOracle {
    config: BenefitConfig,
}

impl ConfigBenefitOracle {
    pub fn new(config: BenefitConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl BenefitOracle for ConfigBenefitOracle {
    async fn check_trace_benefit(
        &self,
        _workspace_id: i64,
        _user_id: &str,
    ) -> Result<BenefitResult, ServiceError> {
        Ok(BenefitResult {
            account_available: self.config.account_available,
            is_enough: self.config.is_enough,
            storage_duration_days: self.config.storage_duration_days,
            ..Default::default()
        })
    }
}

// ============================================================================
// Resolvers
// ============================================================================

#[derive(Debug, Default, Clone, Copy)]
pub struct LocalUserResolver;

#[async_trait]
impl UserResolver for LocalUserResolver {
    async fn get_users(&self, user_ids: &[String]) -> Result<Vec<UserInfo>, ServiceError> {
        Ok(user_ids
            .iter()
            .map(|id| UserInfo {
                user_id: id.clone(),
                name: id.clone(),
                avatar_url: String::new(),
            })
            .collect())
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct LocalEvaluatorResolver;

#[async_trait]
impl EvaluatorResolver for LocalEvaluatorResolver {
    async fn get_evaluators(
        &self,
        _workspace_id: i64,
        version_ids: &[i64],
    ) -> Result<Vec<EvaluatorInfo>, ServiceError> {
        Ok(version_ids
            .iter()
            .map(|&id| EvaluatorInfo {
                evaluator_version_id: id,
                evaluator_id: id,
                name: format!("evaluator-{}", id),
                version: "v1".to_string(),
            })
            .collect())
    }
}

/// Tag catalog loaded from configuration, shared by all workspaces
pub struct ConfigTagCatalog {
    tags: Vec<TagInfo>,
}

impl ConfigTagCatalog {
    pub fn new(tags: Vec<TagInfo>) -> Self {
        Self { tags }
    }
}

#[async_trait]
impl TagCatalog for ConfigTagCatalog {
    async fn get_tags(
        &self,
        _workspace_id: i64,
        tag_key_ids: &[i64],
    ) -> Result<Vec<TagInfo>, ServiceError> {
        Ok(self
            .tags
            .iter()
            .filter(|t| tag_key_ids.contains(&t.tag_key_id))
            .cloned()
            .collect())
    }
}

/// Local targets are registered under their own id
#[derive(Debug, Default, Clone, Copy)]
pub struct IdentityEvalTargetResolver;

#[async_trait]
impl EvalTargetResolver for IdentityEvalTargetResolver {
    async fn batch_get_by_source(
        &self,
        _workspace_id: i64,
        sources: &[SourceTarget],
    ) -> Result<Vec<i64>, ServiceError> {
        Ok(sources
            .iter()
            .filter_map(|s| s.source_target_id.trim().parse::<i64>().ok())
            .filter(|id| *id > 0)
            .collect())
    }
}

// ============================================================================
// Datasets
// ============================================================================

#[derive(Default)]
pub struct InMemoryDatasetService {
    next_id: AtomicI64,
    datasets: DashMap<i64, Dataset>,
    items: DashMap<i64, Vec<DatasetItem>>,
}

impl InMemoryDatasetService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn item_count(&self, dataset_id: i64) -> usize {
        self.items.get(&dataset_id).map(|v| v.len()).unwrap_or(0)
    }

    fn check_item(dataset: &Dataset, item: &DatasetItem) -> Result<(), (ItemErrorType, String)> {
        if item.status == ItemStatus::Error {
            let first = item.errors.first();
            return Err((
                first.map(|e| e.error_type).unwrap_or(ItemErrorType::InternalError),
                first
                    .map(|e| e.message.clone())
                    .unwrap_or_else(|| "item carries errors".to_string()),
            ));
        }
        let keys: HashSet<&str> = dataset.schema.iter().map(|f| f.key.as_str()).collect();
        match item.field_data.iter().find(|f| !keys.contains(f.key.as_str())) {
            Some(field) => Err((
                ItemErrorType::MismatchSchema,
                format!("field {} is not in the dataset schema", field.key),
            )),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl DatasetService for InMemoryDatasetService {
    async fn create_dataset(&self, dataset: NewDataset) -> Result<Dataset, ServiceError> {
        let duplicate = self
            .datasets
            .iter()
            .any(|d| d.workspace_id == dataset.workspace_id && d.name == dataset.name);
        if duplicate {
            return Err(ServiceError::Conflict(format!(
                "dataset {} already exists",
                dataset.name
            )));
        }
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let created = Dataset {
            id,
            workspace_id: dataset.workspace_id,
            name: dataset.name,
            description: dataset.description,
            category: dataset.category,
            evaluation_biz_category: None,
            schema: dataset.schema,
        };
        self.datasets.insert(id, created.clone());
        self.items.insert(id, Vec::new());
        Ok(created)
    }

    async fn get_dataset(
        &self,
        workspace_id: i64,
        dataset_id: i64,
    ) -> Result<Option<Dataset>, ServiceError> {
        Ok(self
            .datasets
            .get(&dataset_id)
            .filter(|d| d.workspace_id == workspace_id)
            .map(|d| d.clone()))
    }

    async fn clear_items(&self, workspace_id: i64, dataset_id: i64) -> Result<(), ServiceError> {
        if self.get_dataset(workspace_id, dataset_id).await?.is_none() {
            return Err(ServiceError::not_found(format!("dataset {}", dataset_id)));
        }
        if let Some(mut items) = self.items.get_mut(&dataset_id) {
            items.clear();
        }
        Ok(())
    }

    async fn add_items(
        &self,
        workspace_id: i64,
        dataset_id: i64,
        items: Vec<DatasetItem>,
    ) -> Result<AddItemsOutcome, ServiceError> {
        let dataset = self
            .get_dataset(workspace_id, dataset_id)
            .await?
            .ok_or_else(|| ServiceError::not_found(format!("dataset {}", dataset_id)))?;

        let mut stored = self.items.entry(dataset_id).or_default();
        let mut errors = Vec::new();
        let mut added = 0;
        for (index, item) in items.into_iter().enumerate() {
            let check = if stored.len() >= MAX_DATASET_ITEMS {
                Err((
                    ItemErrorType::ExceedDatasetCapacity,
                    format!("dataset holds at most {} items", MAX_DATASET_ITEMS),
                ))
            } else {
                Self::check_item(&dataset, &item)
            };
            match check {
                Ok(()) => {
                    stored.push(item);
                    added += 1;
                }
                Err((error_type, message)) => errors.push((
                    error_type,
                    ItemErrorDetail {
                        message,
                        index: Some(index),
                        field_key: None,
                    },
                )),
            }
        }
        Ok(AddItemsOutcome {
            added,
            errors: ItemErrorGroup::group(errors),
        })
    }
}

// ============================================================================
// Evaluation
// ============================================================================

/// Answers every turn with its own `input` field
#[derive(Debug, Default, Clone, Copy)]
pub struct EchoTargetInvoker;

#[async_trait]
impl TargetInvoker for EchoTargetInvoker {
    async fn invoke(&self, request: &TargetInvocation) -> Result<TargetOutput, ServiceError> {
        let answer = match request.inputs.get("input") {
            Some(input) => input.clone(),
            None => request
                .inputs
                .values()
                .cloned()
                .collect::<Vec<_>>()
                .join("\n"),
        };
        let input_tokens = request
            .inputs
            .values()
            .map(|v| v.split_whitespace().count() as i64)
            .sum();
        let output_tokens = answer.split_whitespace().count() as i64;
        let mut fields = BTreeMap::new();
        fields.insert(ACTUAL_OUTPUT_FIELD.to_string(), answer);
        Ok(TargetOutput {
            fields,
            input_tokens,
            output_tokens,
        })
    }
}

/// Scores 1 when the target output equals the reference output, else 0
#[derive(Debug, Default, Clone, Copy)]
pub struct ExactMatchEvaluatorInvoker;

#[async_trait]
impl EvaluatorInvoker for ExactMatchEvaluatorInvoker {
    async fn evaluate(
        &self,
        request: &EvaluatorInvocation,
    ) -> Result<EvaluatorOutput, ServiceError> {
        let expected = request
            .eval_set_fields
            .get(REFERENCE_OUTPUT_FIELD)
            .ok_or_else(|| {
                ServiceError::invalid_param(format!("missing field {}", REFERENCE_OUTPUT_FIELD))
            })?;
        let actual = request
            .target_fields
            .get(ACTUAL_OUTPUT_FIELD)
            .map(String::as_str)
            .unwrap_or_default();
        let matched = expected.trim() == actual.trim();
        Ok(EvaluatorOutput {
            score: Some(if matched { 1.0 } else { 0.0 }),
            option: Some(if matched { "match" } else { "mismatch" }.to_string()),
            reasoning: if matched {
                "output equals the reference".to_string()
            } else {
                format!("expected {:?}, got {:?}", expected, actual)
            },
            model_id: "exact_match".to_string(),
            ..Default::default()
        })
    }
}
