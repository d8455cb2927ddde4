//! Domain logic
//!
//! - `observability` - span ingestion, trace queries, annotations, views, export
//! - `evaluation` - experiments: configuration, runner, aggregation, filters
//! - `external` - collaborator contracts and their local implementations
//! - `metrics` - evaluation metrics emission
//! - `pipeline` - topic consumers

pub mod error;
pub mod evaluation;
pub mod external;
pub mod metrics;
pub mod observability;
pub mod pipeline;

pub use error::ServiceError;
