//! API route handlers

pub mod annotations;
pub mod datasets;
pub mod experiments;
pub mod health;
pub mod otlp_collector;
pub mod traces;
pub mod views;
