//! Field mapping configuration
//!
//! Converts between the wire mappings a client submits with an experiment and
//! the stored [`EvalConf`], and projects records through a [`FieldAdapter`].

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::data::types::{
    ConnectorConf, EvalConf, EvaluatorConf, EvaluatorIngressConf, EvaluatorsConf, FieldAdapter,
    FieldConf, FieldSource, TargetConf, TargetIngressConf,
};
use crate::domain::error::ServiceError;

/// One mapped field: projected from `from_field` when set, else `const_value`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldMapping {
    pub field_name: String,
    #[serde(default)]
    pub from_field: String,
    #[serde(default)]
    pub const_value: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetFieldMapping {
    #[serde(default)]
    pub from_eval_set: Vec<FieldMapping>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvaluatorFieldMapping {
    pub evaluator_version_id: i64,
    #[serde(default)]
    pub from_eval_set: Vec<FieldMapping>,
    #[serde(default)]
    pub from_target: Vec<FieldMapping>,
}

/// Everything the wire carries about how an experiment is wired together
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireEvalConf {
    pub target_version_id: i64,
    #[serde(default)]
    pub target_field_mapping: Option<TargetFieldMapping>,
    #[serde(default)]
    pub evaluator_field_mapping: Option<Vec<EvaluatorFieldMapping>>,
    #[serde(default)]
    pub evaluator_concur_num: Option<usize>,
    #[serde(default)]
    pub item_concur_num: Option<usize>,
}

fn to_field_conf(mapping: &FieldMapping) -> Result<FieldConf, ServiceError> {
    let field_name = mapping.field_name.trim();
    if field_name.is_empty() {
        return Err(ServiceError::InvalidConfig(
            "field mapping without field_name".to_string(),
        ));
    }
    let source = if mapping.from_field.is_empty() {
        FieldSource::ConstValue(mapping.const_value.clone())
    } else {
        FieldSource::FromField(mapping.from_field.clone())
    };
    Ok(FieldConf {
        field_name: field_name.to_string(),
        source,
    })
}

fn to_adapter(mappings: &[FieldMapping]) -> Result<FieldAdapter, ServiceError> {
    Ok(FieldAdapter {
        field_confs: mappings.iter().map(to_field_conf).collect::<Result<_, _>>()?,
    })
}

fn from_adapter(adapter: &FieldAdapter) -> Vec<FieldMapping> {
    adapter
        .field_confs
        .iter()
        .map(|conf| match &conf.source {
            FieldSource::FromField(from) => FieldMapping {
                field_name: conf.field_name.clone(),
                from_field: from.clone(),
                const_value: String::new(),
            },
            FieldSource::ConstValue(value) => FieldMapping {
                field_name: conf.field_name.clone(),
                from_field: String::new(),
                const_value: value.clone(),
            },
        })
        .collect()
}

fn check_concurrency(name: &str, value: Option<usize>) -> Result<(), ServiceError> {
    if value == Some(0) {
        return Err(ServiceError::InvalidConfig(format!("{} must be positive", name)));
    }
    Ok(())
}

/// Build the stored configuration; both mappings are required
pub fn to_eval_conf(wire: &WireEvalConf) -> Result<EvalConf, ServiceError> {
    let target_mapping = wire
        .target_field_mapping
        .as_ref()
        .ok_or_else(|| ServiceError::InvalidConfig("target field mapping is missing".into()))?;
    let evaluator_mappings = wire
        .evaluator_field_mapping
        .as_ref()
        .ok_or_else(|| ServiceError::InvalidConfig("evaluator field mapping is missing".into()))?;
    check_concurrency("evaluator_concur_num", wire.evaluator_concur_num)?;
    check_concurrency("item_concur_num", wire.item_concur_num)?;

    let evaluator_conf = evaluator_mappings
        .iter()
        .map(|m| {
            Ok(EvaluatorConf {
                evaluator_version_id: m.evaluator_version_id,
                ingress_conf: EvaluatorIngressConf {
                    eval_set_adapter: to_adapter(&m.from_eval_set)?,
                    target_adapter: to_adapter(&m.from_target)?,
                },
            })
        })
        .collect::<Result<Vec<_>, ServiceError>>()?;

    Ok(EvalConf {
        connector_conf: ConnectorConf {
            target_conf: TargetConf {
                target_version_id: wire.target_version_id,
                ingress_conf: TargetIngressConf {
                    eval_set_adapter: to_adapter(&target_mapping.from_eval_set)?,
                },
            },
            evaluators_conf: EvaluatorsConf {
                evaluator_concur_num: wire.evaluator_concur_num,
                evaluator_conf,
            },
        },
        item_concur_num: wire.item_concur_num,
    })
}

/// Inverse of [`to_eval_conf`]
pub fn to_wire(conf: &EvalConf) -> WireEvalConf {
    let target = &conf.connector_conf.target_conf;
    let evaluators = &conf.connector_conf.evaluators_conf;
    WireEvalConf {
        target_version_id: target.target_version_id,
        target_field_mapping: Some(TargetFieldMapping {
            from_eval_set: from_adapter(&target.ingress_conf.eval_set_adapter),
        }),
        evaluator_field_mapping: Some(
            evaluators
                .evaluator_conf
                .iter()
                .map(|e| EvaluatorFieldMapping {
                    evaluator_version_id: e.evaluator_version_id,
                    from_eval_set: from_adapter(&e.ingress_conf.eval_set_adapter),
                    from_target: from_adapter(&e.ingress_conf.target_adapter),
                })
                .collect(),
        ),
        evaluator_concur_num: evaluators.evaluator_concur_num,
        item_concur_num: conf.item_concur_num,
    }
}

/// Apply an adapter to a source record; a projection of an absent field is
/// an `InvalidParam` on that record
pub fn project(
    adapter: &FieldAdapter,
    source: &BTreeMap<String, String>,
) -> Result<BTreeMap<String, String>, ServiceError> {
    adapter
        .field_confs
        .iter()
        .map(|conf| {
            let value = match &conf.source {
                FieldSource::FromField(from) => source.get(from).cloned().ok_or_else(|| {
                    ServiceError::invalid_param(format!("source field {} not found", from))
                })?,
                FieldSource::ConstValue(value) => value.clone(),
            };
            Ok((conf.field_name.clone(), value))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mapping(name: &str, from: &str, value: &str) -> FieldMapping {
        FieldMapping {
            field_name: name.into(),
            from_field: from.into(),
            const_value: value.into(),
        }
    }

    fn wire() -> WireEvalConf {
        WireEvalConf {
            target_version_id: 3,
            target_field_mapping: Some(TargetFieldMapping {
                from_eval_set: vec![mapping("input", "question", "")],
            }),
            evaluator_field_mapping: Some(vec![EvaluatorFieldMapping {
                evaluator_version_id: 9,
                from_eval_set: vec![mapping("reference_output", "answer", "")],
                from_target: vec![
                    mapping("actual_output", "actual_output", ""),
                    mapping("lang", "", "en"),
                ],
            }]),
            evaluator_concur_num: Some(2),
            item_concur_num: None,
        }
    }

    #[test]
    fn test_round_trip_is_lossless() {
        let conf = to_eval_conf(&wire()).unwrap();
        let evaluator = &conf.connector_conf.evaluators_conf.evaluator_conf[0];
        assert_eq!(
            evaluator.ingress_conf.target_adapter.field_confs[1].source,
            FieldSource::ConstValue("en".into())
        );
        assert_eq!(conf.item_concur_num, None);
        assert_eq!(to_wire(&conf), wire());
    }

    #[test]
    fn test_missing_mapping_is_invalid_config() {
        let mut w = wire();
        w.target_field_mapping = None;
        assert!(matches!(to_eval_conf(&w), Err(ServiceError::InvalidConfig(_))));

        let mut w = wire();
        w.evaluator_field_mapping = None;
        assert!(matches!(to_eval_conf(&w), Err(ServiceError::InvalidConfig(_))));

        let mut w = wire();
        w.item_concur_num = Some(0);
        assert!(matches!(to_eval_conf(&w), Err(ServiceError::InvalidConfig(_))));
    }

    #[test]
    fn test_project_reads_fields_and_literals() {
        let conf = to_eval_conf(&wire()).unwrap();
        let adapter = &conf.connector_conf.evaluators_conf.evaluator_conf[0]
            .ingress_conf
            .target_adapter;
        let mut source = BTreeMap::new();
        source.insert("actual_output".to_string(), "42".to_string());
        let projected = project(adapter, &source).unwrap();
        assert_eq!(projected["actual_output"], "42");
        assert_eq!(projected["lang"], "en");

        assert!(matches!(
            project(adapter, &BTreeMap::new()),
            Err(ServiceError::InvalidParam(_))
        ));
    }
}
