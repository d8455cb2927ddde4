//! SQLite repositories
//!
//! Record types are imported from `crate::data::types`.

pub mod annotation;
pub mod experiment;
pub mod view;
