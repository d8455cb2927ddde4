//! DuckDB error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DuckdbError {
    #[error("Database error: {0}")]
    Database(#[from] duckdb::Error),

    #[error("Migration {version} ({name}) failed: {error}")]
    MigrationFailed {
        version: i32,
        name: String,
        error: String,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Query timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    #[error("Connection already closed")]
    Closed,

    #[error("Corrupt row: {0}")]
    CorruptRow(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migration_failed_error_display() {
        let err = DuckdbError::MigrationFailed {
            version: 2,
            name: "add_span_index".to_string(),
            error: "syntax error".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Migration 2 (add_span_index) failed: syntax error"
        );
    }

    #[test]
    fn test_timeout_display() {
        let err = DuckdbError::Timeout { timeout_secs: 30 };
        assert_eq!(err.to_string(), "Query timed out after 30s");
    }
}
