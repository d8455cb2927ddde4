//! Retention tier selection from the tenant's benefit

use std::sync::Arc;

use crate::data::types::TtlTier;
use crate::domain::error::ServiceError;
use crate::domain::external::{BenefitOracle, BenefitResult};

/// Which ingest surface the spans arrived on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestPath {
    /// Public API; benefit rejections are returned to the caller
    OpenApi,
    /// Internal producers; benefit rejections degrade to the shortest tier
    Inner,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TtlDecision {
    pub tier: TtlTier,
    pub benefit: BenefitResult,
    pub degraded: bool,
}

#[derive(Clone)]
pub struct TtlPolicy {
    oracle: Arc<dyn BenefitOracle>,
}

impl TtlPolicy {
    pub fn new(oracle: Arc<dyn BenefitOracle>) -> Self {
        Self { oracle }
    }

    pub async fn decide(
        &self,
        workspace_id: i64,
        user_id: &str,
        path: IngestPath,
    ) -> Result<TtlDecision, ServiceError> {
        let benefit = match self.oracle.check_trace_benefit(workspace_id, user_id).await {
            Ok(benefit) => benefit,
            Err(e) => {
                tracing::warn!(workspace_id, error = %e, "Benefit check failed, using default tier");
                BenefitResult::default()
            }
        };
        decide_tier(workspace_id, benefit, path)
    }
}

pub fn decide_tier(
    workspace_id: i64,
    benefit: BenefitResult,
    path: IngestPath,
) -> Result<TtlDecision, ServiceError> {
    if benefit.is_enough && benefit.account_available {
        return Ok(TtlDecision {
            tier: TtlTier::from_days(benefit.storage_duration_days),
            benefit,
            degraded: false,
        });
    }

    match path {
        IngestPath::OpenApi if !benefit.is_enough => Err(ServiceError::NoCapacity(format!(
            "workspace {} has no trace capacity left",
            workspace_id
        ))),
        IngestPath::OpenApi => Err(ServiceError::AccountNotAvailable(format!(
            "account of workspace {} is not available",
            workspace_id
        ))),
        IngestPath::Inner => {
            tracing::warn!(
                workspace_id,
                is_enough = benefit.is_enough,
                account_available = benefit.account_available,
                "Benefit insufficient, degrading spans to the 3-day tier"
            );
            Ok(TtlDecision {
                tier: TtlTier::Days3,
                benefit,
                degraded: true,
            })
        }
    }
}
