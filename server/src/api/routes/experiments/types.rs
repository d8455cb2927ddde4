//! Experiment endpoint DTOs

use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::data::types::{EvalSetItem, Experiment, ExptStatus};
use crate::domain::evaluation::ListResultsRequest;
use crate::domain::evaluation::config::{WireEvalConf, to_wire};

#[derive(Debug, Deserialize, Validate)]
pub struct WorkspaceBody {
    #[validate(range(min = 1, message = "workspace_id is required"))]
    pub workspace_id: i64,
}

#[derive(Debug, Deserialize, Validate)]
pub struct AddItemsBody {
    #[validate(range(min = 1, message = "workspace_id is required"))]
    pub workspace_id: i64,
    #[validate(length(min = 1, message = "items must not be empty"))]
    pub items: Vec<EvalSetItem>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct ResultsBody {
    #[validate(range(min = 1, message = "workspace_id is required"))]
    pub workspace_id: i64,
    #[serde(flatten)]
    pub query: ListResultsRequest,
}

#[derive(Debug, Serialize)]
pub struct StopResponse {
    pub status: ExptStatus,
}

/// An experiment plus its field mapping in the shape it was created with
#[derive(Debug, Serialize)]
pub struct ExperimentDetail {
    #[serde(flatten)]
    pub experiment: Experiment,
    pub field_mapping: WireEvalConf,
}

impl From<Experiment> for ExperimentDetail {
    fn from(experiment: Experiment) -> Self {
        let field_mapping = to_wire(&experiment.eval_conf);
        Self {
            experiment,
            field_mapping,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_results_body_flattens_query() {
        let body: ResultsBody = serde_json::from_value(serde_json::json!({
            "workspace_id": 7,
            "offset": 10,
            "limit": 5
        }))
        .unwrap();
        assert!(body.validate().is_ok());
        assert_eq!(body.query.offset, 10);
        assert_eq!(body.query.limit, Some(5));
        assert!(body.query.filters.is_none());
    }

    #[test]
    fn test_add_items_requires_items() {
        let body = AddItemsBody {
            workspace_id: 7,
            items: vec![],
        };
        let errors = body.validate().unwrap_err();
        assert!(errors.field_errors().contains_key("items"));

        let body = WorkspaceBody { workspace_id: 0 };
        assert!(body.validate().is_err());
    }
}
