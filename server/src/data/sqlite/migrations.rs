//! Metadata store schema versioning
//!
//! `schema_migrations` is an append-only ledger; the highest recorded
//! version is the schema version. Fresh databases get the full schema
//! recorded at `SCHEMA_VERSION`, older ones replay the pending upgrades.

use sqlx::SqlitePool;

use super::error::SqliteError;
use super::schema::{SCHEMA, SCHEMA_VERSION, TURN_STATE_INDEX_SQL};
use crate::utils::crypto::sha256_hex;
use crate::utils::time::now_ms;

struct Upgrade {
    version: i32,
    name: &'static str,
    sql: &'static str,
}

const UPGRADES: &[Upgrade] = &[Upgrade {
    version: 2,
    name: "add_turn_state_index",
    sql: TURN_STATE_INDEX_SQL,
}];

pub async fn run_migrations(pool: &SqlitePool) -> Result<(), SqliteError> {
    let has_ledger: bool = sqlx::query_scalar(
        "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type = 'table' AND name = 'schema_migrations'",
    )
    .fetch_one(pool)
    .await?;
    if !has_ledger {
        record(pool, SCHEMA_VERSION, "initial", SCHEMA).await?;
        tracing::debug!(version = SCHEMA_VERSION, "Metadata schema created");
        return Ok(());
    }

    let current: i32 = sqlx::query_scalar("SELECT COALESCE(MAX(version), 0) FROM schema_migrations")
        .fetch_one(pool)
        .await?;
    if current > SCHEMA_VERSION {
        return Err(SqliteError::MigrationFailed {
            version: current,
            name: "version_check".to_string(),
            error: format!(
                "metadata store is at schema {} but this build only knows {}",
                current, SCHEMA_VERSION
            ),
        });
    }

    for upgrade in UPGRADES.iter().filter(|u| u.version > current) {
        record(pool, upgrade.version, upgrade.name, upgrade.sql).await?;
        tracing::debug!(
            version = upgrade.version,
            name = upgrade.name,
            "Applied metadata migration"
        );
    }
    Ok(())
}

/// Execute `sql` and append it to the ledger in one transaction
async fn record(
    pool: &SqlitePool,
    version: i32,
    name: &str,
    sql: &str,
) -> Result<(), SqliteError> {
    let failed = |e: sqlx::Error| SqliteError::MigrationFailed {
        version,
        name: name.to_string(),
        error: e.to_string(),
    };

    let mut tx = pool.begin().await?;
    sqlx::raw_sql(sql).execute(&mut *tx).await.map_err(failed)?;
    sqlx::query(
        "INSERT INTO schema_migrations (version, name, checksum, applied_at_ms) VALUES (?, ?, ?, ?)",
    )
    .bind(version)
    .bind(name)
    .bind(sha256_hex(sql))
    .bind(now_ms())
    .execute(&mut *tx)
    .await
    .map_err(failed)?;
    tx.commit().await?;
    Ok(())
}
