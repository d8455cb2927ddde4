//! Utility functions for the application

pub mod crypto;
pub mod file;
pub mod json;
pub mod otlp;
pub mod retry;
pub mod time;
