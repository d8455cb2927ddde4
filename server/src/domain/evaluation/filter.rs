//! Experiment filter parsing
//!
//! Two parsers share one wire shape. The list parser splits conditions into
//! per-dimension include/exclude sets for the experiment store; the turn
//! parser builds a predicate over stored turn results.

use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::data::types::{
    ExptFilterFields, ExptListFilter, ExptStatus, ExptType, TurnResult, TurnRunState,
};
use crate::domain::error::ServiceError;
use crate::domain::external::{EvalTargetResolver, SourceTarget};

/// Id that no target carries; forces an empty target set
const UNMATCHABLE_TARGET_ID: i64 = -1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LogicOp {
    #[default]
    And,
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterOperator {
    Equal,
    NotEqual,
    In,
    NotIn,
    Like,
    Greater,
    GreaterOrEqual,
    Less,
    LessOrEqual,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterFieldType {
    Creator,
    Status,
    EvalSetId,
    TargetId,
    TargetType,
    EvaluatorId,
    SourceTarget,
    ExptType,
    SourceType,
    SourceId,
    TurnRunState,
    EvaluatorScore,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterFieldRef {
    pub field_type: FilterFieldType,
    /// Qualifies the field, e.g. the evaluator version of an `evaluator_score`
    #[serde(default)]
    pub field_key: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceTargetFilter {
    #[serde(default)]
    pub eval_target_type: String,
    #[serde(default)]
    pub source_target_ids: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterCondition {
    pub field: FilterFieldRef,
    pub operator: FilterOperator,
    /// Comma-separated for multi-valued operators
    #[serde(default)]
    pub value: String,
    #[serde(default)]
    pub source_target: Option<SourceTargetFilter>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Filters {
    #[serde(default)]
    pub logic_op: LogicOp,
    #[serde(default)]
    pub filter_conditions: Vec<FilterCondition>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExptFilterRequest {
    #[serde(default)]
    pub filters: Option<Filters>,
    #[serde(default)]
    pub fuzzy_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExptFilterError {
    #[error("unsupported logic op {0:?}")]
    InvalidOp(LogicOp),

    #[error("operator {operator:?} is not supported for {field:?}")]
    InvalidOperator {
        field: FilterFieldType,
        operator: FilterOperator,
    },

    #[error("field {0:?} is not supported here")]
    InvalidField(FilterFieldType),

    #[error("invalid value for {field:?}: {reason}")]
    InvalidValue {
        field: FilterFieldType,
        reason: String,
    },
}

impl From<ExptFilterError> for ServiceError {
    fn from(err: ExptFilterError) -> Self {
        ServiceError::InvalidParam(err.to_string())
    }
}

fn split_values(raw: &str) -> Vec<&str> {
    raw.split(',').map(str::trim).filter(|v| !v.is_empty()).collect()
}

fn parse_values<T: FromStr>(field: FilterFieldType, raw: &str) -> Result<Vec<T>, ExptFilterError>
where
    T::Err: ToString,
{
    split_values(raw)
        .into_iter()
        .map(|v| {
            v.parse::<T>().map_err(|e| ExptFilterError::InvalidValue {
                field,
                reason: e.to_string(),
            })
        })
        .collect()
}

fn strings(raw: &str) -> Vec<String> {
    split_values(raw).into_iter().map(String::from).collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Side {
    Include,
    Exclude,
}

/// Merge into `slot`; an unconstrained slot adopts the incoming set.
/// Includes intersect, excludes union: both narrow the result.
fn merge<T: PartialEq>(side: Side, slot: &mut Option<Vec<T>>, incoming: Vec<T>) {
    match slot {
        None => *slot = Some(incoming),
        Some(current) if side == Side::Include => current.retain(|v| incoming.contains(v)),
        Some(current) => {
            for value in incoming {
                if !current.contains(&value) {
                    current.push(value);
                }
            }
        }
    }
}

/// Builds store-level list filters
pub struct ExperimentFilter {
    targets: Arc<dyn EvalTargetResolver>,
}

impl ExperimentFilter {
    pub fn new(targets: Arc<dyn EvalTargetResolver>) -> Self {
        Self { targets }
    }

    pub async fn parse(
        &self,
        workspace_id: i64,
        request: &ExptFilterRequest,
    ) -> Result<ExptListFilter, ServiceError> {
        let mut filter = ExptListFilter {
            fuzzy_name: request
                .fuzzy_name
                .as_deref()
                .map(str::trim)
                .filter(|n| !n.is_empty())
                .map(String::from),
            ..Default::default()
        };
        let mut saw_expt_type = false;

        if let Some(filters) = &request.filters {
            if filters.logic_op != LogicOp::And {
                return Err(ExptFilterError::InvalidOp(filters.logic_op).into());
            }
            for condition in &filters.filter_conditions {
                if condition.field.field_type == FilterFieldType::ExptType {
                    saw_expt_type = true;
                }
                let (side, target) = match condition.operator {
                    FilterOperator::Equal | FilterOperator::In => {
                        (Side::Include, &mut filter.includes)
                    }
                    FilterOperator::NotEqual | FilterOperator::NotIn => {
                        (Side::Exclude, &mut filter.excludes)
                    }
                    _ => continue,
                };
                self.apply(workspace_id, condition, side, target).await?;
            }
        }

        if !saw_expt_type {
            filter.includes.expt_types = Some(vec![ExptType::Offline]);
        }
        Ok(filter)
    }

    async fn apply(
        &self,
        workspace_id: i64,
        condition: &FilterCondition,
        side: Side,
        fields: &mut ExptFilterFields,
    ) -> Result<(), ServiceError> {
        let field = condition.field.field_type;
        let raw = condition.value.as_str();
        match field {
            FilterFieldType::Creator => merge(side, &mut fields.creators, strings(raw)),
            FilterFieldType::Status => {
                let mut statuses: Vec<ExptStatus> = parse_values(field, raw)?;
                if statuses.contains(&ExptStatus::Processing)
                    && !statuses.contains(&ExptStatus::Draining)
                {
                    statuses.push(ExptStatus::Draining);
                }
                merge(side, &mut fields.statuses, statuses);
            }
            FilterFieldType::EvalSetId => {
                merge(side, &mut fields.eval_set_ids, parse_values(field, raw)?)
            }
            FilterFieldType::TargetId => {
                merge(side, &mut fields.target_ids, parse_values(field, raw)?)
            }
            FilterFieldType::TargetType => merge(side, &mut fields.target_types, strings(raw)),
            FilterFieldType::EvaluatorId => {
                merge(side, &mut fields.evaluator_version_ids, parse_values(field, raw)?)
            }
            FilterFieldType::SourceTarget => {
                let ids = self.resolve_source_target(workspace_id, condition).await?;
                merge(side, &mut fields.target_ids, ids);
            }
            FilterFieldType::ExptType => {
                let types: Vec<ExptType> = parse_values(field, raw)?;
                if !types.is_empty() {
                    merge(side, &mut fields.expt_types, types);
                }
            }
            FilterFieldType::SourceType => {
                merge(side, &mut fields.source_types, parse_values(field, raw)?)
            }
            FilterFieldType::SourceId => merge(side, &mut fields.source_ids, strings(raw)),
            FilterFieldType::TurnRunState | FilterFieldType::EvaluatorScore => {
                return Err(ExptFilterError::InvalidField(field).into());
            }
        }
        Ok(())
    }

    async fn resolve_source_target(
        &self,
        workspace_id: i64,
        condition: &FilterCondition,
    ) -> Result<Vec<i64>, ServiceError> {
        let spec = condition.source_target.clone().unwrap_or_default();
        let sources: Vec<SourceTarget> = spec
            .source_target_ids
            .iter()
            .map(|id| SourceTarget {
                source_target_id: id.clone(),
                target_type: spec.eval_target_type.clone(),
            })
            .collect();
        if sources.is_empty() {
            return Err(ExptFilterError::InvalidValue {
                field: FilterFieldType::SourceTarget,
                reason: "source_target_ids is empty".to_string(),
            }
            .into());
        }
        let ids = self.targets.batch_get_by_source(workspace_id, &sources).await?;
        if ids.is_empty() && sources.len() == 1 {
            return Ok(vec![UNMATCHABLE_TARGET_ID]);
        }
        Ok(ids)
    }
}

// ============================================================================
// Turn filters
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScoreComparator {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
}

impl ScoreComparator {
    fn holds(&self, left: f64, right: f64) -> bool {
        match self {
            Self::Eq => left == right,
            Self::Ne => left != right,
            Self::Gt => left > right,
            Self::Ge => left >= right,
            Self::Lt => left < right,
            Self::Le => left <= right,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScoreCondition {
    pub evaluator_version_id: i64,
    pub comparator: ScoreComparator,
    pub value: f64,
}

/// Conjunction of per-turn conditions
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TurnFilter {
    pub states: Option<Vec<TurnRunState>>,
    pub excluded_states: Vec<TurnRunState>,
    pub scores: Vec<ScoreCondition>,
}

impl TurnFilter {
    pub fn parse(filters: &Filters) -> Result<Self, ExptFilterError> {
        if filters.logic_op != LogicOp::And {
            return Err(ExptFilterError::InvalidOp(filters.logic_op));
        }
        let mut out = TurnFilter::default();
        for condition in &filters.filter_conditions {
            let field = condition.field.field_type;
            let invalid_operator = || ExptFilterError::InvalidOperator {
                field,
                operator: condition.operator,
            };
            match field {
                FilterFieldType::TurnRunState => {
                    let states: Vec<TurnRunState> = parse_values(field, &condition.value)?;
                    match condition.operator {
                        FilterOperator::In => merge(Side::Include, &mut out.states, states),
                        FilterOperator::NotIn => out.excluded_states.extend(states),
                        _ => return Err(invalid_operator()),
                    }
                }
                FilterFieldType::EvaluatorScore => {
                    let comparator = match condition.operator {
                        FilterOperator::Equal => ScoreComparator::Eq,
                        FilterOperator::NotEqual => ScoreComparator::Ne,
                        FilterOperator::Greater => ScoreComparator::Gt,
                        FilterOperator::GreaterOrEqual => ScoreComparator::Ge,
                        FilterOperator::Less => ScoreComparator::Lt,
                        FilterOperator::LessOrEqual => ScoreComparator::Le,
                        _ => return Err(invalid_operator()),
                    };
                    let invalid = |reason: String| ExptFilterError::InvalidValue { field, reason };
                    let evaluator_version_id = condition
                        .field
                        .field_key
                        .trim()
                        .parse::<i64>()
                        .map_err(|_| invalid("field_key must be an evaluator version id".into()))?;
                    let value = condition
                        .value
                        .trim()
                        .parse::<f64>()
                        .ok()
                        .filter(|v| v.is_finite())
                        .ok_or_else(|| invalid(format!("'{}' is not a number", condition.value)))?;
                    out.scores.push(ScoreCondition {
                        evaluator_version_id,
                        comparator,
                        value,
                    });
                }
                other => return Err(ExptFilterError::InvalidField(other)),
            }
        }
        Ok(out)
    }

    pub fn matches(&self, turn: &TurnResult) -> bool {
        if let Some(states) = &self.states
            && !states.contains(&turn.state)
        {
            return false;
        }
        if self.excluded_states.contains(&turn.state) {
            return false;
        }
        self.scores.iter().all(|cond| {
            turn.evaluator_records
                .iter()
                .find(|r| r.evaluator_version_id == cond.evaluator_version_id)
                .and_then(|r| r.effective_score())
                .is_some_and(|score| cond.comparator.holds(score, cond.value))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::types::EvaluatorRecord;
    use crate::domain::external::IdentityEvalTargetResolver;

    fn cond(field_type: FilterFieldType, operator: FilterOperator, value: &str) -> FilterCondition {
        FilterCondition {
            field: FilterFieldRef {
                field_type,
                field_key: String::new(),
            },
            operator,
            value: value.into(),
            source_target: None,
        }
    }

    fn request(conditions: Vec<FilterCondition>) -> ExptFilterRequest {
        ExptFilterRequest {
            filters: Some(Filters {
                logic_op: LogicOp::And,
                filter_conditions: conditions,
            }),
            fuzzy_name: None,
        }
    }

    fn parser() -> ExperimentFilter {
        ExperimentFilter::new(Arc::new(IdentityEvalTargetResolver))
    }

    #[tokio::test]
    async fn test_same_dimension_intersects() {
        let filter = parser()
            .parse(
                7,
                &request(vec![
                    cond(FilterFieldType::EvalSetId, FilterOperator::In, "10,11"),
                    cond(FilterFieldType::EvalSetId, FilterOperator::In, "11,12"),
                ]),
            )
            .await
            .unwrap();
        assert_eq!(filter.includes.eval_set_ids, Some(vec![11]));
        assert_eq!(filter.excludes, ExptFilterFields::default());
    }

    #[tokio::test]
    async fn test_same_dimension_excludes_accumulate() {
        let filter = parser()
            .parse(
                7,
                &request(vec![
                    cond(FilterFieldType::EvalSetId, FilterOperator::NotIn, "1"),
                    cond(FilterFieldType::EvalSetId, FilterOperator::NotEqual, "2"),
                    cond(FilterFieldType::EvalSetId, FilterOperator::NotIn, "2,3"),
                ]),
            )
            .await
            .unwrap();
        assert_eq!(filter.excludes.eval_set_ids, Some(vec![1, 2, 3]));
        assert_eq!(filter.includes.eval_set_ids, None);
    }

    #[tokio::test]
    async fn test_only_and_at_top_level() {
        let mut req = request(vec![]);
        if let Some(f) = req.filters.as_mut() {
            f.logic_op = LogicOp::Or;
        }
        assert!(matches!(
            parser().parse(7, &req).await,
            Err(ServiceError::InvalidParam(_))
        ));
    }

    #[tokio::test]
    async fn test_operator_routing_and_status_expansion() {
        let filter = parser()
            .parse(
                7,
                &request(vec![
                    cond(FilterFieldType::Status, FilterOperator::Equal, "processing"),
                    cond(FilterFieldType::Creator, FilterOperator::NotIn, "bob, eve"),
                    cond(FilterFieldType::TargetType, FilterOperator::Like, "prompt"),
                ]),
            )
            .await
            .unwrap();
        assert_eq!(
            filter.includes.statuses,
            Some(vec![ExptStatus::Processing, ExptStatus::Draining])
        );
        assert_eq!(
            filter.excludes.creators,
            Some(vec!["bob".to_string(), "eve".to_string()])
        );
        assert_eq!(filter.includes.target_types, None);

        let filter = parser()
            .parse(
                7,
                &request(vec![cond(FilterFieldType::Status, FilterOperator::In, "draining")]),
            )
            .await
            .unwrap();
        assert_eq!(filter.includes.statuses, Some(vec![ExptStatus::Draining]));
    }

    #[tokio::test]
    async fn test_expt_type_default_and_empty() {
        let filter = parser().parse(7, &ExptFilterRequest::default()).await.unwrap();
        assert_eq!(filter.includes.expt_types, Some(vec![ExptType::Offline]));

        let filter = parser()
            .parse(7, &request(vec![cond(FilterFieldType::ExptType, FilterOperator::In, "")]))
            .await
            .unwrap();
        assert_eq!(filter.includes.expt_types, None);

        let filter = parser()
            .parse(
                7,
                &request(vec![cond(FilterFieldType::ExptType, FilterOperator::In, "online")]),
            )
            .await
            .unwrap();
        assert_eq!(filter.includes.expt_types, Some(vec![ExptType::Online]));
    }

    #[tokio::test]
    async fn test_source_target_resolution() {
        let mut c = cond(FilterFieldType::SourceTarget, FilterOperator::In, "");
        c.source_target = Some(SourceTargetFilter {
            eval_target_type: "prompt".into(),
            source_target_ids: vec!["42".into()],
        });
        let filter = parser().parse(7, &request(vec![c.clone()])).await.unwrap();
        assert_eq!(filter.includes.target_ids, Some(vec![42]));

        c.source_target = Some(SourceTargetFilter {
            eval_target_type: "prompt".into(),
            source_target_ids: vec!["unknown".into()],
        });
        let filter = parser().parse(7, &request(vec![c])).await.unwrap();
        assert_eq!(filter.includes.target_ids, Some(vec![UNMATCHABLE_TARGET_ID]));
    }

    #[tokio::test]
    async fn test_turn_fields_rejected_in_list_filter() {
        let result = parser()
            .parse(
                7,
                &request(vec![cond(FilterFieldType::TurnRunState, FilterOperator::In, "success")]),
            )
            .await;
        assert!(matches!(result, Err(ServiceError::InvalidParam(_))));
    }

    fn turn(state: TurnRunState, score: Option<f64>) -> TurnResult {
        TurnResult {
            state,
            evaluator_records: vec![EvaluatorRecord {
                evaluator_version_id: 9,
                score,
                option: None,
                reasoning: String::new(),
                correction: None,
                error: None,
            }],
            ..Default::default()
        }
    }

    #[test]
    fn test_turn_filter_parse_and_match() {
        let mut score = cond(FilterFieldType::EvaluatorScore, FilterOperator::GreaterOrEqual, "0.5");
        score.field.field_key = "9".into();
        let filters = Filters {
            logic_op: LogicOp::And,
            filter_conditions: vec![
                cond(FilterFieldType::TurnRunState, FilterOperator::In, "success,fail"),
                score,
            ],
        };
        let filter = TurnFilter::parse(&filters).unwrap();
        assert!(filter.matches(&turn(TurnRunState::Success, Some(0.8))));
        assert!(!filter.matches(&turn(TurnRunState::Success, Some(0.2))));
        assert!(!filter.matches(&turn(TurnRunState::Success, None)));
        assert!(!filter.matches(&turn(TurnRunState::Queueing, Some(1.0))));
    }

    #[test]
    fn test_turn_filter_rejects_other_fields_and_operators() {
        let filters = Filters {
            logic_op: LogicOp::And,
            filter_conditions: vec![cond(FilterFieldType::Creator, FilterOperator::In, "bob")],
        };
        assert_eq!(
            TurnFilter::parse(&filters),
            Err(ExptFilterError::InvalidField(FilterFieldType::Creator))
        );

        let filters = Filters {
            logic_op: LogicOp::And,
            filter_conditions: vec![cond(
                FilterFieldType::TurnRunState,
                FilterOperator::Greater,
                "success",
            )],
        };
        assert!(matches!(
            TurnFilter::parse(&filters),
            Err(ExptFilterError::InvalidOperator { .. })
        ));
    }
}
