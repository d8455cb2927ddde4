//! DuckDB span store service
//!
//! One embedded database file holds every span. All statements go through a
//! single connection; callers hop onto the blocking pool with `run_query`.

pub mod error;
pub mod filters;
mod migrations;
pub mod repositories;
mod repository_impl;
mod retention;
pub mod schema;

pub use repositories::span as span_repository;

pub use error::DuckdbError;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use duckdb::Connection;
use parking_lot::{MappedMutexGuard, Mutex, MutexGuard};

use crate::core::constants::{DUCKDB_DB_FILENAME, DUCKDB_QUERY_TIMEOUT_SECS};
use crate::core::storage::{AppStorage, DataSubdir};
use crate::utils::time::now_us;

/// Offline-only session: no extension downloads, json is bundled
const SESSION_SETUP: &str = "
    SET autoinstall_known_extensions = false;
    SET autoload_known_extensions = false;
    SET extension_directory = '';
    PRAGMA enable_checkpoint_on_shutdown;
    LOAD json;
";

pub struct DuckdbService {
    /// `None` after `close()`
    conn: Mutex<Option<Connection>>,
}

impl Drop for DuckdbService {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.get_mut().take()
            && let Err((_, e)) = conn.close()
        {
            tracing::warn!(error = %e, "DuckDB close on drop failed");
        }
    }
}

impl DuckdbService {
    pub async fn init(storage: &AppStorage) -> Result<Self, DuckdbError> {
        let path = storage.subdir(DataSubdir::Duckdb).join(DUCKDB_DB_FILENAME);
        let opened = path.clone();
        let conn = tokio::task::spawn_blocking(move || open_file(&opened))
            .await
            .map_err(|e| DuckdbError::Io(std::io::Error::other(e)))??;
        tracing::debug!(path = %path.display(), "Span store opened");
        Ok(Self::with_connection(conn))
    }

    pub fn open_in_memory() -> Result<Self, DuckdbError> {
        let conn = Connection::open_in_memory()?;
        migrations::run_migrations(&conn)?;
        Ok(Self::with_connection(conn))
    }

    fn with_connection(conn: Connection) -> Self {
        Self {
            conn: Mutex::new(Some(conn)),
        }
    }

    /// Exclusive connection access; `Closed` once the store has shut down
    pub fn conn(&self) -> Result<MappedMutexGuard<'_, Connection>, DuckdbError> {
        MutexGuard::try_map(self.conn.lock(), |opt| opt.as_mut()).map_err(|_| DuckdbError::Closed)
    }

    /// Run blocking store work off the async runtime, bounded by the query timeout
    pub async fn run_query<T, F>(f: F) -> Result<T, DuckdbError>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        let limit = Duration::from_secs(DUCKDB_QUERY_TIMEOUT_SECS);
        match tokio::time::timeout(limit, tokio::task::spawn_blocking(f)).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(join)) => {
                tracing::error!(error = %join, "Span store task panicked or was cancelled");
                Err(DuckdbError::Io(std::io::Error::other(join)))
            }
            Err(_) => {
                tracing::warn!(timeout_secs = DUCKDB_QUERY_TIMEOUT_SECS, "Span store query timed out");
                Err(DuckdbError::Timeout {
                    timeout_secs: DUCKDB_QUERY_TIMEOUT_SECS,
                })
            }
        }
    }

    /// Flush the WAL; a closed store is left alone
    pub async fn checkpoint(self: &Arc<Self>) -> Result<(), DuckdbError> {
        let db = Arc::clone(self);
        Self::run_query(move || match db.conn() {
            Ok(conn) => conn.execute_batch("CHECKPOINT").map_err(DuckdbError::from),
            Err(DuckdbError::Closed) => Ok(()),
            Err(e) => Err(e),
        })
        .await?
    }

    /// Delete spans whose retention has run out, returning how many went
    pub async fn evict_expired(self: &Arc<Self>) -> Result<u64, DuckdbError> {
        let db = Arc::clone(self);
        let outcome = Self::run_query(move || {
            let conn = db.conn()?;
            retention::run_retention(&conn, now_us())
        })
        .await??;
        Ok(outcome.deleted_count)
    }

    /// Checkpoint then close; later `conn()` calls fail with `Closed`
    pub async fn close(self: Arc<Self>) -> Result<(), DuckdbError> {
        tokio::task::spawn_blocking(move || {
            let Some(conn) = self.conn.lock().take() else {
                return Ok(());
            };
            if let Err(e) = conn.execute_batch("CHECKPOINT") {
                tracing::warn!(error = %e, "Final span store checkpoint failed");
            }
            conn.close().map_err(|(_, e)| DuckdbError::Database(e))?;
            tracing::debug!("Span store closed");
            Ok(())
        })
        .await
        .map_err(|e| DuckdbError::Io(std::io::Error::other(e)))?
    }
}

fn open_file(path: &Path) -> Result<Connection, DuckdbError> {
    let conn = Connection::open(path)?;
    conn.execute_batch(SESSION_SETUP)?;
    migrations::run_migrations(&conn)?;
    Ok(conn)
}

/// Run `f` inside BEGIN/COMMIT, rolling back when it fails
pub(crate) fn in_transaction<F, T>(conn: &Connection, f: F) -> Result<T, DuckdbError>
where
    F: FnOnce(&Connection) -> Result<T, DuckdbError>,
{
    conn.execute_batch("BEGIN TRANSACTION")?;
    let result = f(conn);
    let finish = if result.is_ok() { "COMMIT" } else { "ROLLBACK" };
    if let Err(e) = conn.execute_batch(finish) {
        if result.is_ok() {
            return Err(e.into());
        }
        tracing::warn!(error = %e, "ROLLBACK failed");
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn on_disk() -> (TempDir, AppStorage) {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("duckdb")).unwrap();
        let storage = AppStorage::init_for_test(dir.path().to_path_buf());
        (dir, storage)
    }

    #[tokio::test]
    async fn test_init_checkpoint_close() {
        let (_dir, storage) = on_disk();
        let service = Arc::new(DuckdbService::init(&storage).await.unwrap());
        service.checkpoint().await.unwrap();

        let handle = Arc::clone(&service);
        service.close().await.unwrap();
        assert!(matches!(handle.conn(), Err(DuckdbError::Closed)));
        // no-op once closed
        handle.checkpoint().await.unwrap();
        assert_eq!(handle.evict_expired().await.ok(), None);
    }

    #[tokio::test]
    async fn test_reopen_keeps_schema() {
        let (_dir, storage) = on_disk();
        let first = Arc::new(DuckdbService::init(&storage).await.unwrap());
        first.close().await.unwrap();

        let second = DuckdbService::init(&storage).await.unwrap();
        let version: i32 = second
            .conn()
            .unwrap()
            .query_row("SELECT version FROM schema_version WHERE id = 1", [], |row| {
                row.get(0)
            })
            .unwrap();
        assert_eq!(version, schema::SCHEMA_VERSION);
    }

    #[test]
    fn test_in_transaction_rolls_back() {
        let service = DuckdbService::open_in_memory().unwrap();
        let conn = service.conn().unwrap();
        conn.execute_batch("CREATE TABLE t (v INTEGER)").unwrap();

        let failed: Result<(), DuckdbError> = in_transaction(&conn, |c| {
            c.execute("INSERT INTO t VALUES (1)", [])?;
            Err(DuckdbError::CorruptRow("boom".into()))
        });
        assert!(failed.is_err());
        let rows: i64 = conn
            .query_row("SELECT COUNT(*) FROM t", [], |row| row.get(0))
            .unwrap();
        assert_eq!(rows, 0);
    }

    #[tokio::test]
    async fn test_evict_expired_on_empty_store() {
        let service = Arc::new(DuckdbService::open_in_memory().unwrap());
        assert_eq!(service.evict_expired().await.unwrap(), 0);
    }
}
