//! Data storage layer
//!
//! - `duckdb` - Span store (append-only, partitioned by workspace and day)
//! - `sqlite` - Metadata store for annotations, views and experiments
//! - `topics` - In-process topics between request handlers and consumers
//! - `types` - Records and query shapes shared by both stores
//! - `traits` - Repository traits the domain layer depends on
//! - `error` - Unified error type for both backends

pub mod duckdb;
pub mod error;
pub mod sqlite;
pub mod topics;
pub mod traits;
pub mod types;

pub use duckdb::DuckdbService;
pub use error::DataError;
pub use sqlite::SqliteService;
pub use traits::{AnnotationRepository, ExperimentRepository, SpanRepository, ViewRepository};

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::core::constants::{DUCKDB_CHECKPOINT_INTERVAL_SECS, SQLITE_CHECKPOINT_INTERVAL_SECS};
use crate::core::storage::AppStorage;

/// Both storage engines, opened together and shared through `Arc`
#[derive(Clone)]
pub struct DataStores {
    duckdb: Arc<DuckdbService>,
    sqlite: Arc<SqliteService>,
}

impl DataStores {
    /// Open both stores under the data directory and run their migrations
    pub async fn init(storage: &AppStorage) -> Result<Self, DataError> {
        let duckdb = DuckdbService::init(storage).await?;
        let sqlite = SqliteService::init(storage).await?;
        Ok(Self {
            duckdb: Arc::new(duckdb),
            sqlite: Arc::new(sqlite),
        })
    }

    /// Private in-memory stores with full schemas
    pub async fn in_memory() -> Result<Self, DataError> {
        let duckdb = DuckdbService::open_in_memory()?;
        let sqlite = SqliteService::open_in_memory().await?;
        Ok(Self {
            duckdb: Arc::new(duckdb),
            sqlite: Arc::new(sqlite),
        })
    }

    pub fn spans(&self) -> Arc<dyn SpanRepository> {
        Arc::new(Arc::clone(&self.duckdb))
    }

    pub fn annotations(&self) -> Arc<dyn AnnotationRepository> {
        Arc::new(Arc::clone(&self.sqlite))
    }

    pub fn views(&self) -> Arc<dyn ViewRepository> {
        Arc::new(Arc::clone(&self.sqlite))
    }

    pub fn experiments(&self) -> Arc<dyn ExperimentRepository> {
        Arc::new(Arc::clone(&self.sqlite))
    }

    /// Checkpoint and retention tasks; all stop when `shutdown_rx` flips to true
    ///
    /// A zero retention interval disables eviction.
    pub fn start_background_tasks(
        &self,
        retention_interval_secs: u64,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Vec<JoinHandle<()>> {
        let duckdb = Arc::clone(&self.duckdb);
        let sqlite = Arc::clone(&self.sqlite);
        let mut handles = vec![
            spawn_periodic(
                "duckdb checkpoint",
                Duration::from_secs(DUCKDB_CHECKPOINT_INTERVAL_SECS),
                shutdown_rx.clone(),
                move || {
                    let db = Arc::clone(&duckdb);
                    async move {
                        if let Err(e) = db.checkpoint().await {
                            tracing::warn!(error = %e, "DuckDB checkpoint failed");
                        }
                    }
                },
            ),
            spawn_periodic(
                "sqlite checkpoint",
                Duration::from_secs(SQLITE_CHECKPOINT_INTERVAL_SECS),
                shutdown_rx.clone(),
                move || {
                    let db = Arc::clone(&sqlite);
                    async move {
                        if let Err(e) = db.checkpoint().await {
                            tracing::warn!(error = %e, "WAL checkpoint failed");
                        }
                    }
                },
            ),
        ];

        if retention_interval_secs == 0 {
            tracing::debug!("Span retention disabled");
            return handles;
        }
        let duckdb = Arc::clone(&self.duckdb);
        handles.push(spawn_periodic(
            "span retention",
            Duration::from_secs(retention_interval_secs),
            shutdown_rx,
            move || {
                let db = Arc::clone(&duckdb);
                async move {
                    match db.evict_expired().await {
                        Ok(0) => {}
                        Ok(deleted) => tracing::info!(deleted, "Evicted expired spans"),
                        Err(e) => tracing::warn!(error = %e, "Span retention failed"),
                    }
                }
            },
        ));
        handles
    }

    /// Flush both stores and release their connections
    pub async fn close(&self) {
        if let Err(e) = self.sqlite.checkpoint().await {
            tracing::warn!(error = %e, "SQLite checkpoint on shutdown failed");
        }
        self.sqlite.close().await;
        if let Err(e) = Arc::clone(&self.duckdb).close().await {
            tracing::warn!(error = %e, "DuckDB close failed");
        }
    }
}

/// Run `job` every `period` until shutdown; the first run is one period in
fn spawn_periodic<F, Fut>(
    label: &'static str,
    period: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
    mut job: F,
) -> JoinHandle<()>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        loop {
            tokio::select! {
                biased;
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        tracing::debug!(task = label, "Store task stopped");
                        break;
                    }
                }
                _ = ticker.tick() => job().await,
            }
        }
    })
}
