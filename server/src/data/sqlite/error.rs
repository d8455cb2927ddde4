//! SQLite error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SqliteError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration {version} ({name}) failed: {error}")]
    MigrationFailed {
        version: i32,
        name: String,
        error: String,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Conflict: {0}")]
    Conflict(String),

    /// A stored row could not be decoded into its record type
    #[error("Corrupt row: {0}")]
    CorruptRow(String),
}

impl SqliteError {
    pub(crate) fn corrupt(what: impl std::fmt::Display) -> Self {
        Self::CorruptRow(what.to_string())
    }
}
