//! Unified error type for the data layer
//!
//! Engine errors are folded into `DataError` with the backend that raised
//! them, so the domain can classify without knowing which store it hit.

use thiserror::Error;

use super::duckdb::DuckdbError;
use super::sqlite::SqliteError;

const DUCKDB: &str = "duckdb";
const SQLITE: &str = "sqlite";

#[derive(Error, Debug)]
pub enum DataError {
    #[error("SQLite error: {0}")]
    Sqlite(sqlx::Error),

    #[error("DuckDB error: {0}")]
    Duckdb(#[from] duckdb::Error),

    #[error("Migration {version} ({name}) failed on {backend}: {error}")]
    MigrationFailed {
        backend: &'static str,
        version: i32,
        name: String,
        error: String,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Query timeout after {timeout_secs}s on {backend}")]
    Timeout {
        backend: &'static str,
        timeout_secs: u64,
    },

    #[error("Connection pool exhausted on {backend}")]
    PoolExhausted { backend: &'static str },

    #[error("Backend {backend} is not available: {reason}")]
    BackendUnavailable {
        backend: &'static str,
        reason: String,
    },

    #[error("Corrupt row on {backend}: {reason}")]
    Corrupt {
        backend: &'static str,
        reason: String,
    },

    /// Unique key already taken
    #[error("Conflict: {0}")]
    Conflict(String),
}

impl DataError {
    pub fn corrupt(backend: &'static str, reason: impl Into<String>) -> Self {
        Self::Corrupt {
            backend,
            reason: reason.into(),
        }
    }

    /// Worth retrying: timeouts, pool pressure and I/O hiccups
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Timeout { .. } | Self::PoolExhausted { .. } | Self::Io(_) => true,
            Self::Sqlite(e) => matches!(e, sqlx::Error::PoolClosed | sqlx::Error::Io(_)),
            _ => false,
        }
    }

    pub fn backend(&self) -> &'static str {
        match self {
            Self::Sqlite(_) => SQLITE,
            Self::Duckdb(_) => DUCKDB,
            Self::MigrationFailed { backend, .. }
            | Self::Timeout { backend, .. }
            | Self::PoolExhausted { backend }
            | Self::BackendUnavailable { backend, .. }
            | Self::Corrupt { backend, .. } => backend,
            Self::Io(_) | Self::Conflict(_) => "unknown",
        }
    }
}

impl From<sqlx::Error> for DataError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::PoolTimedOut => Self::PoolExhausted { backend: SQLITE },
            sqlx::Error::Database(ref db) if db.is_unique_violation() => {
                Self::Conflict(db.message().to_string())
            }
            other => Self::Sqlite(other),
        }
    }
}

impl From<DuckdbError> for DataError {
    fn from(e: DuckdbError) -> Self {
        match e {
            DuckdbError::Database(e) => Self::Duckdb(e),
            DuckdbError::MigrationFailed {
                version,
                name,
                error,
            } => Self::MigrationFailed {
                backend: DUCKDB,
                version,
                name,
                error,
            },
            DuckdbError::Io(e) => Self::Io(e),
            DuckdbError::Timeout { timeout_secs } => Self::Timeout {
                backend: DUCKDB,
                timeout_secs,
            },
            DuckdbError::Closed => Self::BackendUnavailable {
                backend: DUCKDB,
                reason: "connection closed".to_string(),
            },
            DuckdbError::CorruptRow(reason) => Self::corrupt(DUCKDB, reason),
        }
    }
}

impl From<SqliteError> for DataError {
    fn from(e: SqliteError) -> Self {
        match e {
            SqliteError::Database(e) => e.into(),
            SqliteError::MigrationFailed {
                version,
                name,
                error,
            } => Self::MigrationFailed {
                backend: SQLITE,
                version,
                name,
                error,
            },
            SqliteError::Io(e) => Self::Io(e),
            SqliteError::Conflict(msg) => Self::Conflict(msg),
            SqliteError::CorruptRow(reason) => Self::corrupt(SQLITE, reason),
        }
    }
}
