//! Experiment records, configuration and results

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

// ============================================================================
// ENUMS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ExptType {
    #[default]
    Offline,
    Online,
}

impl ExptType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Offline => "offline",
            Self::Online => "online",
        }
    }
}

impl FromStr for ExptType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "offline" | "1" => Ok(Self::Offline),
            "online" | "2" => Ok(Self::Online),
            other => Err(format!("unknown experiment type: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ExptStatus {
    #[default]
    Pending,
    Processing,
    Draining,
    Success,
    Failed,
    Terminated,
}

impl ExptStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Draining => "draining",
            Self::Success => "success",
            Self::Failed => "failed",
            Self::Terminated => "terminated",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::Failed | Self::Terminated)
    }
}

impl FromStr for ExptStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "draining" => Ok(Self::Draining),
            "success" => Ok(Self::Success),
            "failed" => Ok(Self::Failed),
            "terminated" => Ok(Self::Terminated),
            other => Err(format!("unknown experiment status: {}", other)),
        }
    }
}

impl fmt::Display for ExptStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Who launched the experiment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    #[default]
    Evaluation,
    AutoTask,
}

impl SourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Evaluation => "evaluation",
            Self::AutoTask => "auto_task",
        }
    }
}

impl FromStr for SourceType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "evaluation" | "1" => Ok(Self::Evaluation),
            "auto_task" | "2" => Ok(Self::AutoTask),
            other => Err(format!("unknown source type: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TurnRunState {
    #[default]
    Queueing,
    Processing,
    Success,
    Fail,
    Terminated,
}

impl TurnRunState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queueing => "queueing",
            Self::Processing => "processing",
            Self::Success => "success",
            Self::Fail => "fail",
            Self::Terminated => "terminated",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::Fail | Self::Terminated)
    }
}

impl FromStr for TurnRunState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "queueing" => Ok(Self::Queueing),
            "processing" => Ok(Self::Processing),
            "success" => Ok(Self::Success),
            "fail" => Ok(Self::Fail),
            "terminated" => Ok(Self::Terminated),
            other => Err(format!("unknown turn run state: {}", other)),
        }
    }
}

// ============================================================================
// EVALUATION CONFIGURATION
// ============================================================================

/// Where a mapped field's value comes from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldSource {
    /// Project the named field of the source record
    FromField(String),
    /// Inject the literal
    ConstValue(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldConf {
    pub field_name: String,
    pub source: FieldSource,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldAdapter {
    #[serde(default)]
    pub field_confs: Vec<FieldConf>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetIngressConf {
    pub eval_set_adapter: FieldAdapter,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetConf {
    pub target_version_id: i64,
    pub ingress_conf: TargetIngressConf,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvaluatorIngressConf {
    pub eval_set_adapter: FieldAdapter,
    pub target_adapter: FieldAdapter,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvaluatorConf {
    pub evaluator_version_id: i64,
    pub ingress_conf: EvaluatorIngressConf,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvaluatorsConf {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evaluator_concur_num: Option<usize>,
    pub evaluator_conf: Vec<EvaluatorConf>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectorConf {
    pub target_conf: TargetConf,
    pub evaluators_conf: EvaluatorsConf,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvalConf {
    pub connector_conf: ConnectorConf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub item_concur_num: Option<usize>,
}

// ============================================================================
// EXPERIMENT
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExptStats {
    pub pending_turn_cnt: i64,
    pub processing_turn_cnt: i64,
    pub success_turn_cnt: i64,
    pub fail_turn_cnt: i64,
    pub terminated_turn_cnt: i64,
    pub credit_cost: f64,
    pub input_tokens: i64,
    pub output_tokens: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Experiment {
    pub id: i64,
    pub workspace_id: i64,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub creator: String,
    pub eval_set_id: i64,
    pub eval_set_version_id: i64,
    pub target_id: i64,
    pub target_version_id: i64,
    #[serde(default)]
    pub target_type: String,
    pub evaluator_version_ids: Vec<i64>,
    pub expt_type: ExptType,
    pub source_type: SourceType,
    #[serde(default)]
    pub source_id: String,
    pub status: ExptStatus,
    #[serde(default)]
    pub status_message: String,
    pub max_alive_time_ms: i64,
    pub start_at_ms: Option<i64>,
    pub end_at_ms: Option<i64>,
    pub eval_conf: EvalConf,
    #[serde(default)]
    pub stats: ExptStats,
    pub created_at_ms: i64,
    pub updated_at_ms: i64,
}

/// Compare-and-set status change: applies only while the status is in `from`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExptStatusChange {
    pub from: Vec<ExptStatus>,
    pub to: ExptStatus,
    pub status_message: Option<String>,
    pub start_at_ms: Option<i64>,
    pub end_at_ms: Option<i64>,
}

// ============================================================================
// EVALUATION SET INPUT
// ============================================================================

/// One turn of an evaluation-set item; fields keyed by field name
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EvalSetTurn {
    pub turn_id: i64,
    #[serde(default)]
    pub fields: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EvalSetItem {
    pub item_id: i64,
    pub turns: Vec<EvalSetTurn>,
}

// ============================================================================
// RESULTS
// ============================================================================

/// Evaluator correction attached to a record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreCorrection {
    pub score: f64,
    #[serde(default)]
    pub explain: String,
}

/// One evaluator's verdict on one turn
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluatorRecord {
    pub evaluator_version_id: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
    /// Categorical output, when the evaluator yields an option instead of a score
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub option: Option<String>,
    #[serde(default)]
    pub reasoning: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correction: Option<ScoreCorrection>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl EvaluatorRecord {
    /// Corrected score wins over the raw one
    pub fn effective_score(&self) -> Option<f64> {
        self.correction.as_ref().map(|c| c.score).or(self.score)
    }
}

/// Human annotation on a turn, keyed by tag
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TurnAnnotation {
    pub tag_key_id: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub option: Option<String>,
}

/// Outcome of one turn of one item
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TurnResult {
    pub experiment_id: i64,
    pub item_id: i64,
    pub turn_id: i64,
    pub item_index: i64,
    pub turn_index: i64,
    /// Evaluation-set fields of the turn
    #[serde(default)]
    pub inputs: BTreeMap<String, String>,
    pub state: TurnRunState,
    #[serde(default)]
    pub target_output: BTreeMap<String, String>,
    #[serde(default)]
    pub evaluator_records: Vec<EvaluatorRecord>,
    #[serde(default)]
    pub annotations: Vec<TurnAnnotation>,
    pub is_err: bool,
    pub retry: u32,
    pub stable: bool,
    pub code: i32,
    #[serde(default)]
    pub error_message: String,
    pub input_tokens: i64,
    pub output_tokens: i64,
    pub created_at_ms: i64,
    pub updated_at_ms: i64,
}

// ============================================================================
// AGGREGATES
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregatorType {
    Average,
    Sum,
    Max,
    Min,
    ScoreDistribution,
    OptionDistribution,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregateDataType {
    Double,
    ScoreDistribution,
    OptionDistribution,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreDistributionItem {
    pub score: String,
    pub count: i64,
    pub percentage: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptionDistributionItem {
    pub option: String,
    pub count: i64,
    pub percentage: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateData {
    pub data_type: AggregateDataType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score_distribution: Option<Vec<ScoreDistributionItem>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub option_distribution: Option<Vec<OptionDistributionItem>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregatorResult {
    pub aggregator_type: AggregatorType,
    pub data: AggregateData,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluatorAggregateResult {
    pub evaluator_version_id: i64,
    pub results: Vec<AggregatorResult>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnnotationAggregateResult {
    pub tag_key_id: i64,
    pub results: Vec<AggregatorResult>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AggregateResult {
    pub experiment_id: i64,
    pub evaluator_results: Vec<EvaluatorAggregateResult>,
    pub annotation_results: Vec<AnnotationAggregateResult>,
    pub updated_at_ms: i64,
}

// ============================================================================
// LIST FILTERS
// ============================================================================

/// Per-dimension value sets; `None` leaves the dimension unconstrained
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExptFilterFields {
    pub creators: Option<Vec<String>>,
    pub statuses: Option<Vec<ExptStatus>>,
    pub eval_set_ids: Option<Vec<i64>>,
    pub target_ids: Option<Vec<i64>>,
    pub target_types: Option<Vec<String>>,
    pub evaluator_version_ids: Option<Vec<i64>>,
    pub expt_types: Option<Vec<ExptType>>,
    pub source_types: Option<Vec<SourceType>>,
    pub source_ids: Option<Vec<String>>,
}

/// Resolved experiment list filter
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExptListFilter {
    pub includes: ExptFilterFields,
    pub excludes: ExptFilterFields,
    pub fuzzy_name: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct ListExperimentsParams {
    pub workspace_id: i64,
    pub filter: ExptListFilter,
    pub offset: u64,
    pub limit: u64,
}
