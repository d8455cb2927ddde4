//! Experiment configuration, execution and result aggregation

pub mod aggregate;
pub mod config;
pub mod filter;
pub mod runner;
pub mod service;

pub use aggregate::AggregationEngine;
pub use filter::{ExperimentFilter, ExptFilterRequest, Filters, TurnFilter};
pub use runner::ExperimentRunner;
pub use service::{
    AddItemsResponse, CreateExperimentRequest, ExperimentPage, ExperimentSvc,
    ListExperimentsRequest, ListResultsRequest, ResultPage,
};
