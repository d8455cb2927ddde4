//! Collaborator contracts
//!
//! Authorization, benefit, identity, tag catalog, datasets, evaluation
//! targets and evaluators all live outside this service. The domain talks to
//! them through these traits; `local` holds the in-process implementations
//! used by a standalone deployment and `http` the JSON clients for remote
//! target/evaluator runners.

mod http;
mod local;

use std::collections::BTreeMap;
use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use http::{HttpEvaluatorInvoker, HttpTargetInvoker};
pub use local::{
    ConfigBenefitOracle, ConfigTagCatalog, EchoTargetInvoker, ExactMatchEvaluatorInvoker,
    IdentityEvalTargetResolver, InMemoryDatasetService, LocalAuthorizer, LocalEvaluatorResolver,
    LocalUserResolver,
};

use crate::data::types::{Dataset, DatasetCategory, DatasetItem, FieldSchema, ItemErrorGroup, TagInfo};
use crate::domain::error::ServiceError;

// ============================================================================
// Authorization
// ============================================================================

/// Closed set of authorization actions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AuthAction {
    ReadLoopTrace,
    IngestLoopTrace,
    CreateLoopTraceView,
    ListLoopTraceView,
    Edit,
    AnnotationCreate,
}

impl AuthAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ReadLoopTrace => "readLoopTrace",
            Self::IngestLoopTrace => "ingestLoopTrace",
            Self::CreateLoopTraceView => "createLoopTraceView",
            Self::ListLoopTraceView => "listLoopTraceView",
            Self::Edit => "edit",
            Self::AnnotationCreate => "annotationCreate",
        }
    }
}

impl fmt::Display for AuthAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthResource {
    Workspace(i64),
    View {
        workspace_id: i64,
        view_id: i64,
        owner: String,
    },
}

#[async_trait]
pub trait Authorizer: Send + Sync {
    /// `NoPermission` when denied
    async fn check(
        &self,
        user_id: &str,
        action: AuthAction,
        resource: &AuthResource,
    ) -> Result<(), ServiceError>;
}

// ============================================================================
// Benefit
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BenefitResult {
    pub account_available: bool,
    pub is_enough: bool,
    pub storage_duration_days: i64,
    pub which_is_enough: i64,
    pub volcano_account_id: i64,
}

impl Default for BenefitResult {
    fn default() -> Self {
        Self {
            account_available: true,
            is_enough: true,
            storage_duration_days: crate::core::constants::DEFAULT_STORAGE_DURATION_DAYS,
            which_is_enough: -1,
            volcano_account_id: 0,
        }
    }
}

#[async_trait]
pub trait BenefitOracle: Send + Sync {
    async fn check_trace_benefit(
        &self,
        workspace_id: i64,
        user_id: &str,
    ) -> Result<BenefitResult, ServiceError>;
}

// ============================================================================
// Presentation resolvers
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserInfo {
    pub user_id: String,
    pub name: String,
    #[serde(default)]
    pub avatar_url: String,
}

#[async_trait]
pub trait UserResolver: Send + Sync {
    async fn get_users(&self, user_ids: &[String]) -> Result<Vec<UserInfo>, ServiceError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvaluatorInfo {
    pub evaluator_version_id: i64,
    pub evaluator_id: i64,
    pub name: String,
    pub version: String,
}

#[async_trait]
pub trait EvaluatorResolver: Send + Sync {
    async fn get_evaluators(
        &self,
        workspace_id: i64,
        version_ids: &[i64],
    ) -> Result<Vec<EvaluatorInfo>, ServiceError>;
}

#[async_trait]
pub trait TagCatalog: Send + Sync {
    async fn get_tags(
        &self,
        workspace_id: i64,
        tag_key_ids: &[i64],
    ) -> Result<Vec<TagInfo>, ServiceError>;
}

// ============================================================================
// Datasets
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct NewDataset {
    pub workspace_id: i64,
    pub name: String,
    pub description: String,
    pub category: DatasetCategory,
    pub schema: Vec<FieldSchema>,
}

/// Outcome of one `add_items` call; error indices refer to the call's items
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AddItemsOutcome {
    pub added: usize,
    pub errors: Vec<ItemErrorGroup>,
}

#[async_trait]
pub trait DatasetService: Send + Sync {
    async fn create_dataset(&self, dataset: NewDataset) -> Result<Dataset, ServiceError>;

    async fn get_dataset(
        &self,
        workspace_id: i64,
        dataset_id: i64,
    ) -> Result<Option<Dataset>, ServiceError>;

    async fn clear_items(&self, workspace_id: i64, dataset_id: i64) -> Result<(), ServiceError>;

    async fn add_items(
        &self,
        workspace_id: i64,
        dataset_id: i64,
        items: Vec<DatasetItem>,
    ) -> Result<AddItemsOutcome, ServiceError>;
}

// ============================================================================
// Evaluation collaborators
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetInvocation {
    pub workspace_id: i64,
    pub target_id: i64,
    pub target_version_id: i64,
    pub experiment_id: i64,
    pub item_id: i64,
    pub turn_id: i64,
    pub inputs: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TargetOutput {
    #[serde(default)]
    pub fields: BTreeMap<String, String>,
    #[serde(default)]
    pub input_tokens: i64,
    #[serde(default)]
    pub output_tokens: i64,
}

#[async_trait]
pub trait TargetInvoker: Send + Sync {
    async fn invoke(&self, request: &TargetInvocation) -> Result<TargetOutput, ServiceError>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluatorInvocation {
    pub workspace_id: i64,
    pub evaluator_version_id: i64,
    pub experiment_id: i64,
    pub item_id: i64,
    pub turn_id: i64,
    pub eval_set_fields: BTreeMap<String, String>,
    pub target_fields: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EvaluatorOutput {
    #[serde(default)]
    pub score: Option<f64>,
    #[serde(default)]
    pub option: Option<String>,
    #[serde(default)]
    pub reasoning: String,
    #[serde(default)]
    pub model_id: String,
    #[serde(default)]
    pub input_tokens: i64,
    #[serde(default)]
    pub output_tokens: i64,
}

#[async_trait]
pub trait EvaluatorInvoker: Send + Sync {
    async fn evaluate(
        &self,
        request: &EvaluatorInvocation,
    ) -> Result<EvaluatorOutput, ServiceError>;
}

/// A target identified by the system that owns it
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SourceTarget {
    pub source_target_id: String,
    pub target_type: String,
}

#[async_trait]
pub trait EvalTargetResolver: Send + Sync {
    /// Target ids registered for each source; unknown sources map to nothing
    async fn batch_get_by_source(
        &self,
        workspace_id: i64,
        sources: &[SourceTarget],
    ) -> Result<Vec<i64>, ServiceError>;
}
