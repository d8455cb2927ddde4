//! Trace ingestion, query and annotation services

pub mod annotation;
pub mod date;
pub mod enrich;
pub mod export;
pub mod ingest;
pub mod otlp;
pub mod query;
pub mod tags;
pub mod ttl;
pub mod views;

pub use annotation::{AnnotationEvent, AnnotationEventConsumer, AnnotationSvc};
pub use enrich::Enricher;
pub use export::DatasetExporter;
pub use ingest::{IngestConsumer, Ingestor, SpanBatch};
pub use query::TraceQuery;
pub use tags::TagResolver;
pub use ttl::TtlPolicy;
pub use views::ViewSvc;
