//! Span store schema versioning
//!
//! A fresh database gets the full schema at `SCHEMA_VERSION`. Existing
//! databases replay every entry of `MIGRATIONS` newer than their recorded
//! version, each in its own transaction.

use duckdb::{Connection, OptionalExt};

use super::error::DuckdbError;
use super::in_transaction;
use super::schema::{SCHEMA, SCHEMA_VERSION, TRACE_INDEX_SQL};
use crate::utils::crypto::sha256_hex;
use crate::utils::time::now_us;

struct Migration {
    version: i32,
    name: &'static str,
    sql: &'static str,
}

/// Upgrades after the initial schema, ascending by version
const MIGRATIONS: &[Migration] = &[Migration {
    version: 2,
    name: "add_span_trace_index",
    sql: TRACE_INDEX_SQL,
}];

pub fn run_migrations(conn: &Connection) -> Result<(), DuckdbError> {
    let Some(current) = recorded_version(conn)? else {
        return bootstrap(conn);
    };

    if current > SCHEMA_VERSION {
        return Err(DuckdbError::MigrationFailed {
            version: current,
            name: "version_check".to_string(),
            error: format!(
                "span store is at schema {} but this build only knows {}",
                current, SCHEMA_VERSION
            ),
        });
    }

    let pending: Vec<&Migration> = MIGRATIONS.iter().filter(|m| m.version > current).collect();
    if pending.is_empty() {
        tracing::debug!(version = current, "Span store schema up to date");
        return Ok(());
    }
    for migration in pending {
        apply(conn, migration)?;
    }
    Ok(())
}

/// `None` when the version table has never been created
fn recorded_version(conn: &Connection) -> Result<Option<i32>, DuckdbError> {
    let has_table: bool = conn.query_row(
        "SELECT COUNT(*) > 0 FROM information_schema.tables WHERE table_name = 'schema_version'",
        [],
        |row| row.get(0),
    )?;
    if !has_table {
        return Ok(None);
    }
    let version = conn
        .query_row("SELECT version FROM schema_version WHERE id = 1", [], |row| {
            row.get::<_, i32>(0)
        })
        .optional()?;
    Ok(Some(version.unwrap_or(0)))
}

fn bootstrap(conn: &Connection) -> Result<(), DuckdbError> {
    in_transaction(conn, |conn| {
        conn.execute_batch(SCHEMA)?;
        conn.execute(
            "INSERT INTO schema_version (id, version, applied_at, description) VALUES (1, ?, ?, 'initial')",
            duckdb::params![SCHEMA_VERSION, now_us()],
        )?;
        Ok(())
    })?;
    tracing::debug!(version = SCHEMA_VERSION, "Span store schema created");
    Ok(())
}

fn apply(conn: &Connection, migration: &Migration) -> Result<(), DuckdbError> {
    let failed = |e: duckdb::Error| DuckdbError::MigrationFailed {
        version: migration.version,
        name: migration.name.to_string(),
        error: e.to_string(),
    };

    in_transaction(conn, |conn| {
        conn.execute_batch(migration.sql).map_err(failed)?;
        conn.execute(
            "UPDATE schema_version SET version = ?, applied_at = ?, description = ? WHERE id = 1",
            duckdb::params![migration.version, now_us(), migration.name],
        )
        .map_err(failed)?;
        Ok(())
    })?;

    tracing::debug!(
        version = migration.version,
        name = migration.name,
        checksum = &sha256_hex(migration.sql)[..8],
        "Applied span store migration"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn version_and_description(conn: &Connection) -> (i32, String) {
        conn.query_row(
            "SELECT version, description FROM schema_version WHERE id = 1",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .unwrap()
    }

    #[test]
    fn test_migrations_end_at_schema_version() {
        let last = MIGRATIONS.last().map(|m| m.version).unwrap();
        assert_eq!(last, SCHEMA_VERSION);
        assert!(MIGRATIONS.windows(2).all(|w| w[0].version < w[1].version));
    }

    #[test]
    fn test_fresh_database_is_bootstrapped_once() {
        let conn = Connection::open_in_memory().unwrap();
        assert_eq!(recorded_version(&conn).unwrap(), None);

        run_migrations(&conn).unwrap();
        run_migrations(&conn).unwrap();

        assert_eq!(version_and_description(&conn), (SCHEMA_VERSION, "initial".to_string()));
        let rows: i64 = conn
            .query_row("SELECT COUNT(*) FROM schema_version", [], |row| row.get(0))
            .unwrap();
        assert_eq!(rows, 1);
    }

    #[test]
    fn test_replays_pending_migrations() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();
        conn.execute_batch(
            "DROP INDEX idx_spans_trace; UPDATE schema_version SET version = 1 WHERE id = 1;",
        )
        .unwrap();

        run_migrations(&conn).unwrap();
        assert_eq!(
            version_and_description(&conn),
            (2, "add_span_trace_index".to_string())
        );
    }

    #[test]
    fn test_newer_store_is_rejected() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();
        conn.execute("UPDATE schema_version SET version = 99 WHERE id = 1", [])
            .unwrap();

        assert!(matches!(
            run_migrations(&conn),
            Err(DuckdbError::MigrationFailed { version: 99, .. })
        ));
    }
}
