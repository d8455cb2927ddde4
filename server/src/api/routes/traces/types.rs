//! Trace endpoint DTOs

use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::data::types::Span;
use crate::domain::observability::query::TraceAdvanceInfo;

#[derive(Debug, Deserialize, Validate)]
pub struct IngestBody {
    #[validate(length(min = 1, message = "spans must not be empty"))]
    pub spans: Vec<Span>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct InnerIngestBody {
    #[validate(length(min = 1, max = 1000, message = "spans must contain 1-1000 items"))]
    pub spans: Vec<Span>,
}

#[derive(Debug, Serialize)]
pub struct QueuedResponse {
    pub queued: usize,
}

#[derive(Debug, Deserialize)]
pub struct MetaQuery {
    pub workspace_id: i64,
    #[serde(default)]
    pub platform_type: Option<String>,
    #[serde(default)]
    pub span_list_type: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct AdvanceInfoResponse {
    pub traces_advance_info: Vec<TraceAdvanceInfo>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inner_batch_size_bounds() {
        let spans = vec![Span::default(); 1001];
        assert!(InnerIngestBody { spans }.validate().is_err());
        assert!(InnerIngestBody { spans: vec![] }.validate().is_err());
        let spans = vec![Span::default(); 1000];
        assert!(InnerIngestBody { spans }.validate().is_ok());
    }
}
