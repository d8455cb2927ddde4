//! Experiment service
//!
//! Request validation, authorization and persistence for experiments. The
//! runner does the execution; this layer seeds it and reads its results.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};

use super::aggregate::AggregationEngine;
use super::config::{EvaluatorFieldMapping, TargetFieldMapping, WireEvalConf, to_eval_conf};
use super::filter::{ExperimentFilter, ExptFilterRequest, Filters, TurnFilter};
use super::runner::ExperimentRunner;
use crate::core::constants::DEFAULT_MAX_ALIVE_TIME_MS;
use crate::data::ExperimentRepository;
use crate::data::types::{
    AggregateResult, EvalConf, EvalSetItem, Experiment, ExptStats, ExptStatus, ExptType,
    ListExperimentsParams, SourceType, TurnResult,
};
use crate::domain::error::ServiceError;
use crate::domain::external::{AuthAction, AuthResource, Authorizer};
use crate::domain::metrics::MetricsEmitter;
use crate::utils::time::now_ms;

const MAX_NAME_LEN: usize = 128;
const DEFAULT_LIST_LIMIT: u64 = 20;
const MAX_LIST_LIMIT: u64 = 200;
const STOP_MESSAGE: &str = "stopped by user";

#[derive(Debug, Clone, Deserialize)]
pub struct CreateExperimentRequest {
    pub workspace_id: i64,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub eval_set_id: i64,
    #[serde(default)]
    pub eval_set_version_id: i64,
    pub target_id: i64,
    pub target_version_id: i64,
    #[serde(default)]
    pub target_type: String,
    pub evaluator_version_ids: Vec<i64>,
    #[serde(default)]
    pub expt_type: ExptType,
    #[serde(default)]
    pub max_alive_time_ms: Option<i64>,
    #[serde(default)]
    pub source_type: SourceType,
    #[serde(default)]
    pub source_id: String,
    #[serde(default)]
    pub target_field_mapping: Option<TargetFieldMapping>,
    #[serde(default)]
    pub evaluator_field_mapping: Option<Vec<EvaluatorFieldMapping>>,
    #[serde(default)]
    pub evaluator_concur_num: Option<usize>,
    #[serde(default)]
    pub item_concur_num: Option<usize>,
    /// Evaluation-set items; required for offline experiments
    #[serde(default)]
    pub items: Vec<EvalSetItem>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListExperimentsRequest {
    pub workspace_id: i64,
    #[serde(default)]
    pub filters: Option<Filters>,
    #[serde(default)]
    pub fuzzy_name: Option<String>,
    #[serde(default)]
    pub offset: u64,
    #[serde(default)]
    pub limit: Option<u64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExperimentPage {
    pub experiments: Vec<Experiment>,
    pub total: u64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListResultsRequest {
    #[serde(default)]
    pub filters: Option<Filters>,
    #[serde(default)]
    pub offset: u64,
    #[serde(default)]
    pub limit: Option<u64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ResultPage {
    pub results: Vec<TurnResult>,
    pub total: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct AddItemsResponse {
    pub added_turns: u64,
}

fn check_workspace(workspace_id: i64) -> Result<(), ServiceError> {
    if workspace_id <= 0 {
        return Err(ServiceError::invalid_param("workspace_id is required"));
    }
    Ok(())
}

fn check_items(items: &[EvalSetItem]) -> Result<(), ServiceError> {
    let mut seen = HashSet::new();
    for item in items {
        if !seen.insert(item.item_id) {
            return Err(ServiceError::invalid_param(format!(
                "duplicate item_id {}",
                item.item_id
            )));
        }
        if item.turns.is_empty() {
            return Err(ServiceError::invalid_param(format!(
                "item {} has no turns",
                item.item_id
            )));
        }
        let mut turn_ids = HashSet::new();
        if let Some(turn) = item.turns.iter().find(|t| !turn_ids.insert(t.turn_id)) {
            return Err(ServiceError::invalid_param(format!(
                "duplicate turn_id {} in item {}",
                turn.turn_id, item.item_id
            )));
        }
    }
    Ok(())
}

/// Every configured evaluator needs exactly one mapping and vice versa
fn check_evaluator_mappings(evaluator_ids: &[i64], conf: &EvalConf) -> Result<(), ServiceError> {
    let mapped: Vec<i64> = conf
        .connector_conf
        .evaluators_conf
        .evaluator_conf
        .iter()
        .map(|e| e.evaluator_version_id)
        .collect();
    let mapped_set: HashSet<i64> = mapped.iter().copied().collect();
    if mapped_set.len() != mapped.len() {
        return Err(ServiceError::InvalidConfig(
            "evaluator mapped more than once".to_string(),
        ));
    }
    let wanted: HashSet<i64> = evaluator_ids.iter().copied().collect();
    if let Some(missing) = wanted.difference(&mapped_set).next() {
        return Err(ServiceError::InvalidConfig(format!(
            "evaluator {} has no field mapping",
            missing
        )));
    }
    if let Some(extra) = mapped_set.difference(&wanted).next() {
        return Err(ServiceError::InvalidConfig(format!(
            "field mapping for unknown evaluator {}",
            extra
        )));
    }
    Ok(())
}

/// Queued turns for `items`, numbered from `first_index`
fn seed_turns(experiment_id: i64, first_index: i64, items: &[EvalSetItem], now: i64) -> Vec<TurnResult> {
    let mut turns = Vec::new();
    for (offset, item) in items.iter().enumerate() {
        for (turn_index, turn) in item.turns.iter().enumerate() {
            turns.push(TurnResult {
                experiment_id,
                item_id: item.item_id,
                turn_id: turn.turn_id,
                item_index: first_index + offset as i64,
                turn_index: turn_index as i64,
                inputs: turn.fields.clone(),
                stable: true,
                created_at_ms: now,
                updated_at_ms: now,
                ..Default::default()
            });
        }
    }
    turns
}

fn limit(requested: Option<u64>) -> Result<u64, ServiceError> {
    match requested {
        None => Ok(DEFAULT_LIST_LIMIT),
        Some(0) => Err(ServiceError::invalid_param("limit must be positive")),
        Some(n) if n > MAX_LIST_LIMIT => Err(ServiceError::invalid_param(format!(
            "limit must not exceed {}",
            MAX_LIST_LIMIT
        ))),
        Some(n) => Ok(n),
    }
}

pub struct ExperimentSvc {
    experiments: Arc<dyn ExperimentRepository>,
    runner: Arc<ExperimentRunner>,
    filter: ExperimentFilter,
    authorizer: Arc<dyn Authorizer>,
    aggregator: AggregationEngine,
    metrics: MetricsEmitter,
}

impl ExperimentSvc {
    pub fn new(
        experiments: Arc<dyn ExperimentRepository>,
        runner: Arc<ExperimentRunner>,
        filter: ExperimentFilter,
        authorizer: Arc<dyn Authorizer>,
        metrics: MetricsEmitter,
    ) -> Self {
        Self {
            experiments,
            runner,
            filter,
            authorizer,
            aggregator: AggregationEngine::default(),
            metrics,
        }
    }

    async fn authorize(
        &self,
        user_id: &str,
        action: AuthAction,
        workspace_id: i64,
    ) -> Result<(), ServiceError> {
        self.authorizer
            .check(user_id, action, &AuthResource::Workspace(workspace_id))
            .await
    }

    /// The experiment, when it exists in `workspace_id`
    async fn owned(&self, workspace_id: i64, experiment_id: i64) -> Result<Experiment, ServiceError> {
        self.experiments
            .get_experiment(experiment_id)
            .await?
            .filter(|e| e.workspace_id == workspace_id)
            .ok_or_else(|| ServiceError::not_found(format!("experiment {}", experiment_id)))
    }

    pub async fn create(
        &self,
        user_id: &str,
        req: CreateExperimentRequest,
    ) -> Result<Experiment, ServiceError> {
        check_workspace(req.workspace_id)?;
        let name = req.name.trim();
        if name.is_empty() || name.chars().count() > MAX_NAME_LEN {
            return Err(ServiceError::invalid_param(format!(
                "name must be 1..={} characters",
                MAX_NAME_LEN
            )));
        }
        if req.eval_set_id <= 0 || req.target_id <= 0 || req.target_version_id <= 0 {
            return Err(ServiceError::invalid_param(
                "eval_set_id, target_id and target_version_id are required",
            ));
        }
        if req.evaluator_version_ids.is_empty() {
            return Err(ServiceError::invalid_param("at least one evaluator is required"));
        }
        let unique: HashSet<i64> = req.evaluator_version_ids.iter().copied().collect();
        if unique.len() != req.evaluator_version_ids.len() {
            return Err(ServiceError::invalid_param("duplicate evaluator_version_ids"));
        }
        let max_alive_time_ms = req.max_alive_time_ms.unwrap_or(DEFAULT_MAX_ALIVE_TIME_MS);
        if max_alive_time_ms < 0 {
            return Err(ServiceError::invalid_param("max_alive_time_ms must not be negative"));
        }
        if req.expt_type == ExptType::Offline && req.items.is_empty() {
            return Err(ServiceError::invalid_param(
                "offline experiments need their items at creation",
            ));
        }
        check_items(&req.items)?;

        let eval_conf = to_eval_conf(&WireEvalConf {
            target_version_id: req.target_version_id,
            target_field_mapping: req.target_field_mapping,
            evaluator_field_mapping: req.evaluator_field_mapping,
            evaluator_concur_num: req.evaluator_concur_num,
            item_concur_num: req.item_concur_num,
        })?;
        check_evaluator_mappings(&req.evaluator_version_ids, &eval_conf)?;
        self.authorize(user_id, AuthAction::Edit, req.workspace_id)
            .await?;

        let now = now_ms();
        let created = self
            .experiments
            .create_experiment(&Experiment {
                id: 0,
                workspace_id: req.workspace_id,
                name: name.to_string(),
                description: req.description,
                creator: user_id.to_string(),
                eval_set_id: req.eval_set_id,
                eval_set_version_id: req.eval_set_version_id,
                target_id: req.target_id,
                target_version_id: req.target_version_id,
                target_type: req.target_type,
                evaluator_version_ids: req.evaluator_version_ids,
                expt_type: req.expt_type,
                source_type: req.source_type,
                source_id: req.source_id,
                status: ExptStatus::Pending,
                status_message: String::new(),
                max_alive_time_ms,
                start_at_ms: None,
                end_at_ms: None,
                eval_conf,
                stats: ExptStats::default(),
                created_at_ms: now,
                updated_at_ms: now,
            })
            .await?;

        let seeded = self
            .experiments
            .insert_turns_if_absent(&seed_turns(created.id, 0, &req.items, now))
            .await
            .map_err(ServiceError::from);
        self.metrics
            .emit_eval_set(created.workspace_id, "seed_items", &seeded);
        let seeded = seeded?;
        tracing::info!(
            experiment_id = created.id,
            workspace_id = created.workspace_id,
            expt_type = created.expt_type.as_str(),
            turns = seeded,
            "Experiment created"
        );

        self.runner.start(created.id);
        Ok(created)
    }

    pub async fn get(
        &self,
        user_id: &str,
        workspace_id: i64,
        experiment_id: i64,
    ) -> Result<Experiment, ServiceError> {
        check_workspace(workspace_id)?;
        self.authorize(user_id, AuthAction::ReadLoopTrace, workspace_id)
            .await?;
        self.owned(workspace_id, experiment_id).await
    }

    pub async fn list(
        &self,
        user_id: &str,
        req: ListExperimentsRequest,
    ) -> Result<ExperimentPage, ServiceError> {
        check_workspace(req.workspace_id)?;
        let limit = limit(req.limit)?;
        self.authorize(user_id, AuthAction::ReadLoopTrace, req.workspace_id)
            .await?;
        let filter = self
            .filter
            .parse(
                req.workspace_id,
                &ExptFilterRequest {
                    filters: req.filters,
                    fuzzy_name: req.fuzzy_name,
                },
            )
            .await?;
        let (experiments, total) = self
            .experiments
            .list_experiments(&ListExperimentsParams {
                workspace_id: req.workspace_id,
                filter,
                offset: req.offset,
                limit,
            })
            .await?;
        Ok(ExperimentPage { experiments, total })
    }

    pub async fn stop(
        &self,
        user_id: &str,
        workspace_id: i64,
        experiment_id: i64,
    ) -> Result<ExptStatus, ServiceError> {
        check_workspace(workspace_id)?;
        self.authorize(user_id, AuthAction::Edit, workspace_id)
            .await?;
        self.owned(workspace_id, experiment_id).await?;
        self.runner.stop(experiment_id, STOP_MESSAGE).await
    }

    /// Append items to a running online experiment
    pub async fn add_items(
        &self,
        user_id: &str,
        workspace_id: i64,
        experiment_id: i64,
        items: Vec<EvalSetItem>,
    ) -> Result<AddItemsResponse, ServiceError> {
        check_workspace(workspace_id)?;
        if items.is_empty() {
            return Err(ServiceError::invalid_param("items must not be empty"));
        }
        check_items(&items)?;
        self.authorize(user_id, AuthAction::Edit, workspace_id)
            .await?;
        let expt = self.owned(workspace_id, experiment_id).await?;
        if expt.expt_type != ExptType::Online {
            return Err(ServiceError::invalid_param(
                "offline experiments have a frozen item set",
            ));
        }
        if !matches!(expt.status, ExptStatus::Pending | ExptStatus::Processing) {
            return Err(ServiceError::invalid_param(format!(
                "experiment is {} and no longer accepts items",
                expt.status
            )));
        }

        let existing = self.experiments.list_turn_results(experiment_id).await?;
        let known: HashSet<i64> = existing.iter().map(|t| t.item_id).collect();
        let fresh: Vec<EvalSetItem> = items
            .into_iter()
            .filter(|item| !known.contains(&item.item_id))
            .collect();
        let first_index = existing
            .iter()
            .map(|t| t.item_index + 1)
            .max()
            .unwrap_or(0);

        let added = self
            .experiments
            .insert_turns_if_absent(&seed_turns(experiment_id, first_index, &fresh, now_ms()))
            .await
            .map_err(ServiceError::from);
        self.metrics.emit_eval_set(workspace_id, "add_items", &added);
        let added_turns = added?;
        if added_turns > 0 {
            self.runner.notify(experiment_id);
        }
        Ok(AddItemsResponse { added_turns })
    }

    /// Turn results in item/turn order, filtered per turn
    pub async fn results(
        &self,
        user_id: &str,
        workspace_id: i64,
        experiment_id: i64,
        req: ListResultsRequest,
    ) -> Result<ResultPage, ServiceError> {
        let started = Instant::now();
        let result = self
            .results_inner(user_id, workspace_id, experiment_id, req)
            .await;
        self.metrics
            .emit_get_result(workspace_id, "turn_result", &result, started.elapsed());
        result
    }

    async fn results_inner(
        &self,
        user_id: &str,
        workspace_id: i64,
        experiment_id: i64,
        req: ListResultsRequest,
    ) -> Result<ResultPage, ServiceError> {
        check_workspace(workspace_id)?;
        let limit = limit(req.limit)?;
        let turn_filter = match &req.filters {
            Some(filters) => TurnFilter::parse(filters)?,
            None => TurnFilter::default(),
        };
        self.authorize(user_id, AuthAction::ReadLoopTrace, workspace_id)
            .await?;
        self.owned(workspace_id, experiment_id).await?;

        let matching: Vec<TurnResult> = self
            .experiments
            .list_turn_results(experiment_id)
            .await?
            .into_iter()
            .filter(|t| turn_filter.matches(t))
            .collect();
        let total = matching.len() as u64;
        let results = matching
            .into_iter()
            .skip(usize::try_from(req.offset).unwrap_or(usize::MAX))
            .take(usize::try_from(limit).unwrap_or(usize::MAX))
            .collect();
        Ok(ResultPage { results, total })
    }

    /// Recompute and store the aggregate of an experiment
    pub async fn aggregate(
        &self,
        user_id: &str,
        workspace_id: i64,
        experiment_id: i64,
    ) -> Result<AggregateResult, ServiceError> {
        check_workspace(workspace_id)?;
        self.authorize(user_id, AuthAction::ReadLoopTrace, workspace_id)
            .await?;
        self.owned(workspace_id, experiment_id).await?;

        let started = Instant::now();
        let result = self.calculate(experiment_id).await;
        self.metrics
            .emit_calculate_aggr(workspace_id, &result, started.elapsed());
        result
    }

    async fn calculate(&self, experiment_id: i64) -> Result<AggregateResult, ServiceError> {
        let turns = self.experiments.list_turn_results(experiment_id).await?;
        let aggregate = self.aggregator.aggregate(experiment_id, &turns, now_ms());
        self.experiments.save_aggregate(&aggregate).await?;
        Ok(aggregate)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::time::Duration;

    use super::*;
    use crate::core::config::EvaluationConfig;
    use crate::data::DataStores;
    use crate::data::types::{AggregatorType, EvalSetTurn, TurnRunState};
    use crate::domain::evaluation::config::FieldMapping;
    use crate::domain::evaluation::filter::{
        FilterCondition, FilterFieldRef, FilterFieldType, FilterOperator, LogicOp,
    };
    use crate::domain::external::{
        EchoTargetInvoker, ExactMatchEvaluatorInvoker, IdentityEvalTargetResolver,
        LocalAuthorizer,
    };

    fn field(name: &str, from: &str) -> FieldMapping {
        FieldMapping {
            field_name: name.into(),
            from_field: from.into(),
            const_value: String::new(),
        }
    }

    fn item(item_id: i64, question: &str, answer: &str) -> EvalSetItem {
        let mut fields = BTreeMap::new();
        fields.insert("question".to_string(), question.to_string());
        fields.insert("answer".to_string(), answer.to_string());
        EvalSetItem {
            item_id,
            turns: vec![EvalSetTurn { turn_id: 1, fields }],
        }
    }

    fn request(name: &str, expt_type: ExptType, items: Vec<EvalSetItem>) -> CreateExperimentRequest {
        CreateExperimentRequest {
            workspace_id: 7,
            name: name.into(),
            description: String::new(),
            eval_set_id: 10,
            eval_set_version_id: 1,
            target_id: 2,
            target_version_id: 2,
            target_type: "prompt".into(),
            evaluator_version_ids: vec![9],
            expt_type,
            max_alive_time_ms: None,
            source_type: SourceType::Evaluation,
            source_id: String::new(),
            target_field_mapping: Some(TargetFieldMapping {
                from_eval_set: vec![field("input", "question")],
            }),
            evaluator_field_mapping: Some(vec![EvaluatorFieldMapping {
                evaluator_version_id: 9,
                from_eval_set: vec![field("reference_output", "answer")],
                from_target: vec![field("actual_output", "actual_output")],
            }]),
            evaluator_concur_num: None,
            item_concur_num: None,
            items,
        }
    }

    async fn service() -> (ExperimentSvc, Arc<dyn ExperimentRepository>) {
        let stores = DataStores::in_memory().await.unwrap();
        let repo = stores.experiments();
        let runner = Arc::new(ExperimentRunner::new(
            repo.clone(),
            Arc::new(EchoTargetInvoker),
            Arc::new(ExactMatchEvaluatorInvoker),
            MetricsEmitter::noop(),
            EvaluationConfig::default(),
        ));
        let svc = ExperimentSvc::new(
            repo.clone(),
            runner,
            ExperimentFilter::new(Arc::new(IdentityEvalTargetResolver)),
            Arc::new(LocalAuthorizer),
            MetricsEmitter::noop(),
        );
        (svc, repo)
    }

    async fn wait_for(repo: &Arc<dyn ExperimentRepository>, id: i64, status: ExptStatus) -> Experiment {
        for _ in 0..300 {
            let expt = repo.get_experiment(id).await.unwrap().unwrap();
            if expt.status == status {
                return expt;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("experiment {} never reached {}", id, status);
    }

    #[tokio::test]
    async fn test_offline_lifecycle() {
        let (svc, repo) = service().await;
        let created = svc
            .create(
                "alice",
                request(
                    "s4",
                    ExptType::Offline,
                    vec![item(1, "yes", "yes"), item(2, "no", "maybe")],
                ),
            )
            .await
            .unwrap();
        assert_eq!(created.status, ExptStatus::Pending);
        assert_eq!(created.creator, "alice");

        let done = wait_for(&repo, created.id, ExptStatus::Success).await;
        assert_eq!(done.stats.success_turn_cnt, 2);
        assert_eq!(done.stats.fail_turn_cnt, 0);
        assert_eq!(done.stats.pending_turn_cnt, 0);

        let page = svc
            .results("alice", 7, created.id, ListResultsRequest::default())
            .await
            .unwrap();
        assert_eq!(page.total, 2);
        assert!(page.results.iter().all(|t| t.state == TurnRunState::Success));
        assert_eq!(page.results[0].item_index, 0);
        assert_eq!(page.results[1].item_index, 1);

        let aggregate = svc.aggregate("alice", 7, created.id).await.unwrap();
        let results = &aggregate.evaluator_results[0].results;
        let average = results
            .iter()
            .find(|r| r.aggregator_type == AggregatorType::Average)
            .and_then(|r| r.data.value);
        assert_eq!(average, Some(0.5));
        let distribution = results
            .iter()
            .find(|r| r.aggregator_type == AggregatorType::ScoreDistribution)
            .and_then(|r| r.data.score_distribution.clone())
            .unwrap();
        let total: f64 = distribution.iter().map(|d| d.percentage).sum();
        assert!((total - 1.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_create_validation() {
        let (svc, _) = service().await;

        let mut req = request("a", ExptType::Offline, vec![item(1, "q", "a")]);
        req.target_field_mapping = None;
        assert!(matches!(
            svc.create("alice", req).await,
            Err(ServiceError::InvalidConfig(_))
        ));

        let mut req = request("a", ExptType::Offline, vec![item(1, "q", "a")]);
        req.evaluator_version_ids = vec![9, 10];
        assert!(matches!(
            svc.create("alice", req).await,
            Err(ServiceError::InvalidConfig(_))
        ));

        let req = request("a", ExptType::Offline, vec![]);
        assert!(matches!(
            svc.create("alice", req).await,
            Err(ServiceError::InvalidParam(_))
        ));

        let req = request("a", ExptType::Offline, vec![item(1, "q", "a"), item(1, "q", "a")]);
        assert!(matches!(
            svc.create("alice", req).await,
            Err(ServiceError::InvalidParam(_))
        ));

        let req = request("a", ExptType::Offline, vec![item(1, "q", "a")]);
        assert!(matches!(
            svc.create("", req).await,
            Err(ServiceError::NoPermission(_))
        ));
    }

    #[tokio::test]
    async fn test_duplicate_name_conflicts() {
        let (svc, _) = service().await;
        svc.create("alice", request("same", ExptType::Offline, vec![item(1, "q", "q")]))
            .await
            .unwrap();
        assert!(matches!(
            svc.create("alice", request("same", ExptType::Offline, vec![item(1, "q", "q")]))
                .await,
            Err(ServiceError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn test_online_items_and_stop() {
        let (svc, repo) = service().await;
        let created = svc
            .create("alice", request("live", ExptType::Online, vec![]))
            .await
            .unwrap();

        let added = svc
            .add_items("alice", 7, created.id, vec![item(5, "hi", "hi")])
            .await
            .unwrap();
        assert_eq!(added.added_turns, 1);
        let again = svc
            .add_items("alice", 7, created.id, vec![item(5, "hi", "hi"), item(6, "x", "y")])
            .await
            .unwrap();
        assert_eq!(again.added_turns, 1);

        let mut finished_items = 0;
        for _ in 0..300 {
            let expt = repo.get_experiment(created.id).await.unwrap().unwrap();
            finished_items = expt.stats.success_turn_cnt;
            if finished_items == 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(finished_items, 2);
        let turns = repo.list_turn_results(created.id).await.unwrap();
        assert_eq!(turns[1].item_id, 6);
        assert_eq!(turns[1].item_index, 1);

        svc.stop("alice", 7, created.id).await.unwrap();
        let done = wait_for(&repo, created.id, ExptStatus::Terminated).await;
        assert_eq!(done.status_message, STOP_MESSAGE);

        assert!(matches!(
            svc.add_items("alice", 7, created.id, vec![item(8, "a", "a")]).await,
            Err(ServiceError::InvalidParam(_))
        ));
    }

    #[tokio::test]
    async fn test_offline_rejects_items_and_foreign_workspace() {
        let (svc, _) = service().await;
        let created = svc
            .create("alice", request("off", ExptType::Offline, vec![item(1, "q", "q")]))
            .await
            .unwrap();
        assert!(matches!(
            svc.add_items("alice", 7, created.id, vec![item(2, "q", "q")]).await,
            Err(ServiceError::InvalidParam(_))
        ));
        assert!(matches!(
            svc.get("alice", 8, created.id).await,
            Err(ServiceError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_list_filters_and_result_filters() {
        let (svc, repo) = service().await;
        let mut first = request("alpha", ExptType::Offline, vec![item(1, "q", "q"), item(2, "q", "no")]);
        first.eval_set_id = 11;
        let first = svc.create("alice", first).await.unwrap();
        let mut second = request("beta", ExptType::Offline, vec![item(1, "q", "q")]);
        second.eval_set_id = 12;
        svc.create("bob", second).await.unwrap();
        svc.create("bob", request("gamma", ExptType::Online, vec![]))
            .await
            .unwrap();

        let cond = |value: &str| FilterCondition {
            field: FilterFieldRef {
                field_type: FilterFieldType::EvalSetId,
                field_key: String::new(),
            },
            operator: FilterOperator::In,
            value: value.into(),
            source_target: None,
        };
        let page = svc
            .list(
                "alice",
                ListExperimentsRequest {
                    workspace_id: 7,
                    filters: Some(Filters {
                        logic_op: LogicOp::And,
                        filter_conditions: vec![cond("10,11"), cond("11,12")],
                    }),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(page.total, 1);
        assert_eq!(page.experiments[0].name, "alpha");

        let all = svc
            .list(
                "alice",
                ListExperimentsRequest {
                    workspace_id: 7,
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(all.total, 2);

        let mut exclude_both = vec![cond("11"), cond("12")];
        for c in exclude_both.iter_mut() {
            c.operator = FilterOperator::NotIn;
        }
        let page = svc
            .list(
                "alice",
                ListExperimentsRequest {
                    workspace_id: 7,
                    filters: Some(Filters {
                        logic_op: LogicOp::And,
                        filter_conditions: exclude_both,
                    }),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(page.total, 0);

        wait_for(&repo, first.id, ExptStatus::Success).await;
        let mut score = FilterCondition {
            field: FilterFieldRef {
                field_type: FilterFieldType::EvaluatorScore,
                field_key: "9".into(),
            },
            operator: FilterOperator::Less,
            value: "0.5".into(),
            source_target: None,
        };
        let page = svc
            .results(
                "alice",
                7,
                first.id,
                ListResultsRequest {
                    filters: Some(Filters {
                        logic_op: LogicOp::And,
                        filter_conditions: vec![score.clone()],
                    }),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(page.total, 1);
        assert_eq!(page.results[0].item_id, 2);

        score.field.field_type = FilterFieldType::Creator;
        assert!(matches!(
            svc.results(
                "alice",
                7,
                first.id,
                ListResultsRequest {
                    filters: Some(Filters {
                        logic_op: LogicOp::And,
                        filter_conditions: vec![score],
                    }),
                    ..Default::default()
                },
            )
            .await,
            Err(ServiceError::InvalidParam(_))
        ));
    }
}
