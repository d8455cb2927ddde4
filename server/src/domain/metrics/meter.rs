//! Meter backends
//!
//! The process holds one meter, installed at startup. Until then (and in
//! processes that never install one) emissions go to the no-op meter.

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use dashmap::DashMap;
use opentelemetry::KeyValue;
use opentelemetry::metrics::{Counter, Histogram};

use crate::core::constants::APP_NAME_LOWER;

/// Closed tag vocabulary shared by every metric
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TagKey {
    SpaceId,
    IsErr,
    Code,
    Mode,
    Status,
    Retry,
    Stable,
    ExptType,
    ModelId,
    QueryType,
    WithCommit,
    Method,
    Hit,
}

impl TagKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SpaceId => "space_id",
            Self::IsErr => "is_err",
            Self::Code => "code",
            Self::Mode => "mode",
            Self::Status => "status",
            Self::Retry => "retry",
            Self::Stable => "stable",
            Self::ExptType => "expt_type",
            Self::ModelId => "model_id",
            Self::QueryType => "query_type",
            Self::WithCommit => "with_commit",
            Self::Method => "method",
            Self::Hit => "hit",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tag {
    pub key: TagKey,
    pub value: String,
}

impl Tag {
    pub fn new(key: TagKey, value: impl ToString) -> Self {
        Self {
            key,
            value: value.to_string(),
        }
    }
}

pub trait Meter: Send + Sync {
    fn counter(&self, name: &str, value: u64, tags: &[Tag]);

    fn timer(&self, name: &str, elapsed: Duration, tags: &[Tag]);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMeter;

impl Meter for NoopMeter {
    fn counter(&self, _name: &str, _value: u64, _tags: &[Tag]) {}

    fn timer(&self, _name: &str, _elapsed: Duration, _tags: &[Tag]) {}
}

/// Meter backed by the OpenTelemetry metrics API
///
/// Instruments are created lazily per metric name and cached. Export is
/// whatever provider the embedding process registers globally.
pub struct OtelMeter {
    meter: opentelemetry::metrics::Meter,
    counters: DashMap<String, Counter<u64>>,
    histograms: DashMap<String, Histogram<f64>>,
}

impl OtelMeter {
    pub fn new() -> Self {
        Self {
            meter: opentelemetry::global::meter(APP_NAME_LOWER),
            counters: DashMap::new(),
            histograms: DashMap::new(),
        }
    }

    fn attributes(tags: &[Tag]) -> Vec<KeyValue> {
        tags.iter()
            .map(|t| KeyValue::new(t.key.as_str(), t.value.clone()))
            .collect()
    }
}

impl Default for OtelMeter {
    fn default() -> Self {
        Self::new()
    }
}

impl Meter for OtelMeter {
    fn counter(&self, name: &str, value: u64, tags: &[Tag]) {
        let counter = self
            .counters
            .entry(name.to_string())
            .or_insert_with(|| self.meter.u64_counter(name.to_string()).build())
            .clone();
        counter.add(value, &Self::attributes(tags));
    }

    fn timer(&self, name: &str, elapsed: Duration, tags: &[Tag]) {
        let histogram = self
            .histograms
            .entry(name.to_string())
            .or_insert_with(|| {
                self.meter
                    .f64_histogram(name.to_string())
                    .with_unit("ms")
                    .build()
            })
            .clone();
        histogram.record(elapsed.as_secs_f64() * 1000.0, &Self::attributes(tags));
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum MeterError {
    #[error("meter already initialized")]
    AlreadyInitialized,
}

static GLOBAL_METER: OnceLock<Arc<dyn Meter>> = OnceLock::new();

/// Install the process meter; a second call is rejected
pub fn init_meter(meter: Arc<dyn Meter>) -> Result<(), MeterError> {
    GLOBAL_METER
        .set(meter)
        .map_err(|_| MeterError::AlreadyInitialized)
}

/// The installed meter, or a no-op one
pub fn global_meter() -> Arc<dyn Meter> {
    match GLOBAL_METER.get() {
        Some(meter) => Arc::clone(meter),
        None => Arc::new(NoopMeter),
    }
}

#[cfg(test)]
pub use recording::{Recorded, RecordedKind, RecordingMeter};
