//! Operation metrics
//!
//! Every instrumented operation emits a `<name>.throughput` counter and,
//! when it has a duration, a `<name>.latency` timer carrying the same tags.
//! `space_id`, `is_err` and `code` are always present.

mod meter;

use std::sync::Arc;
use std::time::Duration;

pub use meter::{Meter, MeterError, NoopMeter, OtelMeter, Tag, TagKey, global_meter, init_meter};
#[cfg(test)]
pub use meter::{Recorded, RecordedKind, RecordingMeter};

use crate::domain::error::{ServiceError, get_code};

const THROUGHPUT_SUFFIX: &str = ".throughput";
const LATENCY_SUFFIX: &str = ".latency";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetricName {
    EvaluationTarget,
    EvaluationSet,
    Evaluator,
    ExptEval,
    ExptItemEval,
    ExptTurnEval,
    GetExptResult,
    CalculateExptAggrResult,
    PromptCache,
    EnrichResolver,
}

impl MetricName {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::EvaluationTarget => "evaluation_target",
            Self::EvaluationSet => "evaluation_set",
            Self::Evaluator => "evaluator",
            Self::ExptEval => "expt_eval",
            Self::ExptItemEval => "expt_item_eval",
            Self::ExptTurnEval => "expt_turn_eval",
            Self::GetExptResult => "get_expt_result",
            Self::CalculateExptAggrResult => "calculate_expt_aggr_result",
            Self::PromptCache => "prompt_cache",
            Self::EnrichResolver => "enrich_resolver",
        }
    }

    pub fn throughput(&self) -> String {
        format!("{}{}", self.as_str(), THROUGHPUT_SUFFIX)
    }

    pub fn latency(&self) -> String {
        format!("{}{}", self.as_str(), LATENCY_SUFFIX)
    }
}

/// Retry bookkeeping of a turn or item execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RetryInfo {
    pub retry: bool,
    pub stable: bool,
}

#[derive(Clone)]
pub struct MetricsEmitter {
    meter: Arc<dyn Meter>,
}

impl MetricsEmitter {
    pub fn new(meter: Arc<dyn Meter>) -> Self {
        Self { meter }
    }

    /// Emitter bound to the process meter
    pub fn global() -> Self {
        Self::new(global_meter())
    }

    pub fn noop() -> Self {
        Self::new(Arc::new(NoopMeter))
    }

    fn base_tags(space_id: i64, code: (i32, u8)) -> Vec<Tag> {
        vec![
            Tag::new(TagKey::SpaceId, space_id),
            Tag::new(TagKey::IsErr, code.1),
            Tag::new(TagKey::Code, code.0),
        ]
    }

    fn emit(&self, name: MetricName, tags: Vec<Tag>, elapsed: Option<Duration>) {
        self.meter.counter(&name.throughput(), 1, &tags);
        if let Some(elapsed) = elapsed {
            self.meter.timer(&name.latency(), elapsed, &tags);
        }
    }

    pub fn emit_target_invoke<T>(
        &self,
        space_id: i64,
        result: &Result<T, ServiceError>,
        elapsed: Duration,
    ) {
        let tags = Self::base_tags(space_id, get_code(result));
        self.emit(MetricName::EvaluationTarget, tags, Some(elapsed));
    }

    pub fn emit_eval_set<T>(&self, space_id: i64, method: &str, result: &Result<T, ServiceError>) {
        let mut tags = Self::base_tags(space_id, get_code(result));
        tags.push(Tag::new(TagKey::Method, method));
        self.emit(MetricName::EvaluationSet, tags, None);
    }

    pub fn emit_evaluator_run<T>(
        &self,
        space_id: i64,
        model_id: &str,
        result: &Result<T, ServiceError>,
        elapsed: Duration,
    ) {
        let mut tags = Self::base_tags(space_id, get_code(result));
        tags.push(Tag::new(TagKey::ModelId, model_id));
        self.emit(MetricName::Evaluator, tags, Some(elapsed));
    }

    /// Experiment-level state transition
    pub fn emit_expt_eval(
        &self,
        space_id: i64,
        expt_type: &str,
        mode: &str,
        status: &str,
        code: (i32, u8),
    ) {
        let mut tags = Self::base_tags(space_id, code);
        tags.push(Tag::new(TagKey::ExptType, expt_type));
        tags.push(Tag::new(TagKey::Mode, mode));
        tags.push(Tag::new(TagKey::Status, status));
        self.emit(MetricName::ExptEval, tags, None);
    }

    pub fn emit_item_eval(
        &self,
        space_id: i64,
        expt_type: &str,
        retry: RetryInfo,
        code: (i32, u8),
        elapsed: Duration,
    ) {
        let mut tags = Self::base_tags(space_id, code);
        tags.push(Tag::new(TagKey::ExptType, expt_type));
        tags.push(Tag::new(TagKey::Retry, retry.retry));
        tags.push(Tag::new(TagKey::Stable, retry.stable));
        self.emit(MetricName::ExptItemEval, tags, Some(elapsed));
    }

    pub fn emit_turn_eval(
        &self,
        space_id: i64,
        retry: RetryInfo,
        code: (i32, u8),
        elapsed: Duration,
    ) {
        let mut tags = Self::base_tags(space_id, code);
        tags.push(Tag::new(TagKey::Retry, retry.retry));
        tags.push(Tag::new(TagKey::Stable, retry.stable));
        self.emit(MetricName::ExptTurnEval, tags, Some(elapsed));
    }

    /// Turns reaped after sitting in processing past the horizon
    pub fn emit_zombies(&self, space_id: i64, expt_type: &str, count: u64) {
        let mut tags = Self::base_tags(space_id, (0, 0));
        tags.push(Tag::new(TagKey::ExptType, expt_type));
        tags.push(Tag::new(TagKey::Status, "zombie"));
        self.meter
            .counter(&MetricName::ExptTurnEval.throughput(), count, &tags);
    }

    pub fn emit_get_result<T>(
        &self,
        space_id: i64,
        query_type: &str,
        result: &Result<T, ServiceError>,
        elapsed: Duration,
    ) {
        let mut tags = Self::base_tags(space_id, get_code(result));
        tags.push(Tag::new(TagKey::QueryType, query_type));
        self.emit(MetricName::GetExptResult, tags, Some(elapsed));
    }

    pub fn emit_calculate_aggr<T>(
        &self,
        space_id: i64,
        result: &Result<T, ServiceError>,
        elapsed: Duration,
    ) {
        let tags = Self::base_tags(space_id, get_code(result));
        self.emit(MetricName::CalculateExptAggrResult, tags, Some(elapsed));
    }

    pub fn emit_prompt_cache(&self, space_id: i64, with_commit: bool, hit: bool) {
        let mut tags = Self::base_tags(space_id, (0, 0));
        tags.push(Tag::new(TagKey::WithCommit, with_commit));
        tags.push(Tag::new(TagKey::Hit, hit));
        self.emit(MetricName::PromptCache, tags, None);
    }

    /// One presentation lookup (user, evaluator or tag) during enrichment
    pub fn emit_enrich_resolver<T>(
        &self,
        space_id: i64,
        resolver: &str,
        result: &Result<T, ServiceError>,
    ) {
        let mut tags = Self::base_tags(space_id, get_code(result));
        tags.push(Tag::new(TagKey::Method, resolver));
        self.emit(MetricName::EnrichResolver, tags, None);
    }
}
