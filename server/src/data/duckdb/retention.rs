//! DuckDB retention management
//!
//! Spans carry their own `expire_at_us`, fixed at ingest from the retention
//! tier, so eviction is a single range delete followed by a checkpoint.

use duckdb::Connection;

use super::DuckdbError;
use super::repositories::span;

/// Outcome of one retention pass
#[derive(Debug, Default, PartialEq, Eq)]
pub struct RetentionResult {
    pub deleted_count: u64,
}

/// Evict expired spans; runs CHECKPOINT when anything was removed
pub fn run_retention(conn: &Connection, now_us: i64) -> Result<RetentionResult, DuckdbError> {
    let deleted_count = span::delete_expired(conn, now_us)?;

    if deleted_count > 0 {
        // DuckDB doesn't shrink the file; freed space is reused internally
        conn.execute("CHECKPOINT", [])?;
        tracing::debug!(deleted = deleted_count, "Retention cleanup completed, checkpoint done");
    } else {
        tracing::debug!("Retention check complete, nothing to delete");
    }

    Ok(RetentionResult { deleted_count })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::duckdb::migrations::run_migrations;
    use crate::data::types::{Span, TtlTier};
    use crate::utils::time::MICROS_PER_DAY;

    #[test]
    fn test_retention_evicts_only_expired() {
        let conn = Connection::open_in_memory().expect("Failed to create in-memory database");
        run_migrations(&conn).expect("Migrations should succeed");

        let now = 1_700_000_000_000_000;
        let make = |id: &str| Span {
            trace_id: "T1".into(),
            span_id: id.into(),
            workspace_id: "7".into(),
            start_time_us: now,
            ..Default::default()
        };
        span::insert_spans(&conn, &[make("short")], TtlTier::Days3, now).unwrap();
        span::insert_spans(&conn, &[make("long")], TtlTier::Days90, now).unwrap();

        let result = run_retention(&conn, now + 4 * MICROS_PER_DAY).unwrap();
        assert_eq!(result, RetentionResult { deleted_count: 1 });

        let remaining: String = conn
            .query_row("SELECT span_id FROM spans", [], |row| row.get(0))
            .unwrap();
        assert_eq!(remaining, "long");

        let result = run_retention(&conn, now + 4 * MICROS_PER_DAY).unwrap();
        assert_eq!(result.deleted_count, 0);
    }
}
