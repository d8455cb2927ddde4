//! DuckDB span repository
//!
//! Writes go through the Appender API. Reads push the partition keys
//! (workspace, time window, list type, platform call types) down to SQL and
//! evaluate the filter tree on the scanned rows, fetching in batches until
//! the page is full.

use std::collections::BTreeMap;

use duckdb::types::Value;
use duckdb::{Connection, params};
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::core::constants::SPAN_SCAN_BATCH_SIZE;
use crate::data::duckdb::{DuckdbError, in_transaction};
use crate::data::types::{
    AttrTos, CallTypeScope, GetTraceParams, ListSpansParams, SoftDeleteParams, Span, SpanCursor,
    SpanListType, SpanOrder, SpanPage, SpanType, TAG_INPUT_TOKENS, TAG_OUTPUT_TOKENS, TraceTokens,
    TraceWindow, TtlTier,
};
use crate::utils::time::{MICROS_PER_DAY, day_bucket};

/// Columns read back into a `Span`, in `row_to_span` order
const SPAN_COLUMNS: &str = "trace_id, span_id, parent_id, workspace_id, span_name, span_type, \
     start_time_us, duration_us, status_code, call_type, input, output, attr_tos, \
     tags_string, tags_long, tags_double, tags_bool, system_tags, tags_bytes, logic_delete_time_us";

// ============================================================================
// WRITES
// ============================================================================

/// Append a batch of spans under one retention tier
pub fn insert_spans(
    conn: &Connection,
    spans: &[Span],
    ttl: TtlTier,
    now_us: i64,
) -> Result<usize, DuckdbError> {
    if spans.is_empty() {
        return Ok(0);
    }

    in_transaction(conn, |conn| {
        let mut appender = conn.appender("spans")?;
        let ttl_days = ttl.days() as i32;
        let expire_at_us = now_us.saturating_add(ttl.days().saturating_mul(MICROS_PER_DAY));

        for span in spans {
            let attr_tos = span.attr_tos.as_ref().map(to_json).transpose()?;
            let tags_string = to_json(&span.tags_string)?;
            let tags_long = to_json(&span.tags_long)?;
            let tags_double = to_json(&span.tags_double)?;
            let tags_bool = to_json(&span.tags_bool)?;
            let system_tags = to_json(&span.system_tags)?;
            let tags_bytes = to_json(&span.tags_bytes)?;

            // Column order must match schema.rs CREATE TABLE definition
            appender.append_row(params![
                span.workspace_id,
                span.trace_id,
                span.span_id,
                span.parent_id,
                span.span_name,
                span.span_type.as_str(),
                span.status_code,
                span.call_type,
                span.start_time_us,
                span.duration_us,
                span.input,
                span.output,
                attr_tos,
                tags_string,
                tags_long,
                tags_double,
                tags_bool,
                system_tags,
                tags_bytes,
                day_bucket(span.start_time_us),
                ttl_days,
                expire_at_us,
                span.logic_delete_time_us,
                now_us,
            ])?;
        }

        appender.flush()?;
        Ok(spans.len())
    })
}

/// Mark spans of a trace deleted without erasing them
pub fn soft_delete(conn: &Connection, params: &SoftDeleteParams) -> Result<usize, DuckdbError> {
    let mut sql = String::from(
        "UPDATE spans SET logic_delete_time_us = ? WHERE workspace_id = ? AND trace_id = ?",
    );
    let mut bind: Vec<Value> = vec![
        Value::BigInt(params.delete_at_us),
        Value::Text(params.workspace_id.clone()),
        Value::Text(params.trace_id.clone()),
    ];
    if !params.span_ids.is_empty() {
        sql.push_str(&format!(" AND span_id IN ({})", placeholders(params.span_ids.len())));
        bind.extend(params.span_ids.iter().cloned().map(Value::Text));
    }

    let updated = conn.execute(&sql, duckdb::params_from_iter(bind))?;
    Ok(updated)
}

/// Physically remove spans whose retention has lapsed
pub fn delete_expired(conn: &Connection, now_us: i64) -> Result<u64, DuckdbError> {
    in_transaction(conn, |conn| {
        let deleted = conn.execute("DELETE FROM spans WHERE expire_at_us <= ?", [now_us])?;
        Ok(deleted as u64)
    })
}

// ============================================================================
// READS
// ============================================================================

/// Live span count of a workspace (quota accounting)
pub fn count_spans(conn: &Connection, workspace_id: &str, now_us: i64) -> Result<u64, DuckdbError> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM spans_v
         WHERE workspace_id = ? AND expire_at_us > ?
           AND (logic_delete_time_us IS NULL OR logic_delete_time_us > ?)",
        params![workspace_id, now_us, now_us],
        |row| row.get(0),
    )?;
    Ok(count.max(0) as u64)
}

/// One page of spans matching the partition keys and filter tree
pub fn list_spans(
    conn: &Connection,
    params: &ListSpansParams,
    now_us: i64,
) -> Result<SpanPage, DuckdbError> {
    if params.limit == 0 || params.start_us >= params.end_us {
        return Ok(SpanPage::default());
    }

    let want = params.limit + 1;
    let batch_size = if params.filters.is_empty() {
        want
    } else {
        SPAN_SCAN_BATCH_SIZE
    };

    let mut matched: Vec<Span> = Vec::with_capacity(want.min(SPAN_SCAN_BATCH_SIZE));
    let mut scan_cursor = params.cursor.clone();

    loop {
        let batch = scan_batch(conn, params, scan_cursor.as_ref(), batch_size, now_us)?;
        let exhausted = batch.len() < batch_size;
        if let Some(last) = batch.last() {
            scan_cursor = Some(SpanCursor::of(last));
        }

        for span in batch {
            if params.filters.matches(&span) {
                matched.push(span);
                if matched.len() == want {
                    break;
                }
            }
        }

        if matched.len() == want || exhausted {
            break;
        }
    }

    let has_more = matched.len() > params.limit;
    matched.truncate(params.limit);
    let next_cursor = if has_more {
        matched.last().map(SpanCursor::of)
    } else {
        None
    };

    Ok(SpanPage {
        spans: matched,
        next_cursor,
        has_more,
    })
}

fn scan_batch(
    conn: &Connection,
    params: &ListSpansParams,
    cursor: Option<&SpanCursor>,
    batch_size: usize,
    now_us: i64,
) -> Result<Vec<Span>, DuckdbError> {
    let mut bind: Vec<Value> = Vec::new();
    let mut sql = format!("SELECT {} FROM spans_v WHERE ", SPAN_COLUMNS);
    sql.push_str(&partition_clause(
        &params.workspace_id,
        params.start_us,
        params.end_us,
        now_us,
        &mut bind,
    ));

    match params.span_list_type {
        SpanListType::Root => sql.push_str(" AND parent_id IN ('', '0')"),
        SpanListType::Llm => {
            let llm: Vec<&str> = SpanType::ALL
                .iter()
                .filter(|t| t.is_llm())
                .map(|t| t.as_str())
                .collect();
            sql.push_str(&format!(" AND span_type IN ({})", placeholders(llm.len())));
            bind.extend(llm.into_iter().map(|t| Value::Text(t.to_string())));
        }
        SpanListType::All => {}
    }

    let (op, call_types) = match params.platform.call_type_scope() {
        CallTypeScope::Include(set) => ("IN", set),
        CallTypeScope::Exclude(set) => ("NOT IN", set),
    };
    sql.push_str(&format!(
        " AND call_type {} ({})",
        op,
        placeholders(call_types.len())
    ));
    bind.extend(call_types.iter().map(|c| Value::Text(c.to_string())));

    let (cmp, dir) = match params.order {
        SpanOrder::StartTimeDesc => ("<", "DESC"),
        SpanOrder::StartTimeAsc => (">", "ASC"),
    };
    if let Some(c) = cursor {
        sql.push_str(&format!(
            " AND (start_time_us {cmp} ? OR (start_time_us = ? AND (trace_id {cmp} ? OR (trace_id = ? AND span_id {cmp} ?))))"
        ));
        bind.extend([
            Value::BigInt(c.start_time_us),
            Value::BigInt(c.start_time_us),
            Value::Text(c.trace_id.clone()),
            Value::Text(c.trace_id.clone()),
            Value::Text(c.span_id.clone()),
        ]);
    }
    sql.push_str(&format!(
        " ORDER BY start_time_us {dir}, trace_id {dir}, span_id {dir} LIMIT ?"
    ));
    bind.push(Value::BigInt(batch_size as i64));

    query_spans(conn, &sql, bind)
}

/// All live spans of one trace, start time ascending
pub fn get_trace(
    conn: &Connection,
    params: &GetTraceParams,
    now_us: i64,
) -> Result<Vec<Span>, DuckdbError> {
    if params.start_us >= params.end_us {
        return Ok(Vec::new());
    }

    let mut bind: Vec<Value> = Vec::new();
    let mut sql = format!("SELECT {} FROM spans_v WHERE ", SPAN_COLUMNS);
    sql.push_str(&partition_clause(
        &params.workspace_id,
        params.start_us,
        params.end_us,
        now_us,
        &mut bind,
    ));
    sql.push_str(" AND trace_id = ?");
    bind.push(Value::Text(params.trace_id.clone()));
    if !params.span_ids.is_empty() {
        sql.push_str(&format!(" AND span_id IN ({})", placeholders(params.span_ids.len())));
        bind.extend(params.span_ids.iter().cloned().map(Value::Text));
    }
    sql.push_str(" ORDER BY start_time_us ASC, span_id ASC");

    query_spans(conn, &sql, bind)
}

/// Spans by id within a window, regardless of trace
pub fn get_spans_by_ids(
    conn: &Connection,
    workspace_id: &str,
    span_ids: &[String],
    start_us: i64,
    end_us: i64,
    now_us: i64,
) -> Result<Vec<Span>, DuckdbError> {
    if span_ids.is_empty() || start_us >= end_us {
        return Ok(Vec::new());
    }

    let mut bind: Vec<Value> = Vec::new();
    let mut sql = format!("SELECT {} FROM spans_v WHERE ", SPAN_COLUMNS);
    sql.push_str(&partition_clause(workspace_id, start_us, end_us, now_us, &mut bind));
    sql.push_str(&format!(" AND span_id IN ({})", placeholders(span_ids.len())));
    bind.extend(span_ids.iter().cloned().map(Value::Text));
    sql.push_str(" ORDER BY start_time_us ASC, span_id ASC");

    query_spans(conn, &sql, bind)
}

/// Input/output token sums per trace; unknown traces report zero
pub fn trace_token_usage(
    conn: &Connection,
    workspace_id: &str,
    windows: &[TraceWindow],
    now_us: i64,
) -> Result<Vec<TraceTokens>, DuckdbError> {
    let mut out = Vec::with_capacity(windows.len());
    let mut stmt = conn.prepare(
        "SELECT tags_long FROM spans_v
         WHERE workspace_id = ? AND trace_id = ?
           AND start_time_us >= ? AND start_time_us < ?
           AND expire_at_us > ?
           AND (logic_delete_time_us IS NULL OR logic_delete_time_us > ?)",
    )?;

    for window in windows {
        let mut tokens = TraceTokens {
            trace_id: window.trace_id.clone(),
            ..Default::default()
        };
        let mut rows = stmt.query(params![
            workspace_id,
            window.trace_id,
            window.start_us,
            window.end_us,
            now_us,
            now_us
        ])?;
        while let Some(row) = rows.next()? {
            let tags: BTreeMap<String, i64> = from_json(row.get(0)?)?;
            tokens.input_tokens += tags.get(TAG_INPUT_TOKENS).copied().unwrap_or(0);
            tokens.output_tokens += tags.get(TAG_OUTPUT_TOKENS).copied().unwrap_or(0);
        }
        out.push(tokens);
    }

    Ok(out)
}

/// Day buckets a window spans, inclusive of the end's bucket
fn bucket_range(start_us: i64, end_us: i64) -> (i32, i32) {
    (day_bucket(start_us), day_bucket(end_us.saturating_sub(1)))
}

/// `workspace AND window AND live` predicate shared by every read
fn partition_clause(
    workspace_id: &str,
    start_us: i64,
    end_us: i64,
    now_us: i64,
    bind: &mut Vec<Value>,
) -> String {
    let (first_bucket, last_bucket) = bucket_range(start_us, end_us);
    bind.extend([
        Value::Text(workspace_id.to_string()),
        Value::Int(first_bucket),
        Value::Int(last_bucket),
        Value::BigInt(start_us),
        Value::BigInt(end_us),
        Value::BigInt(now_us),
        Value::BigInt(now_us),
    ]);
    "workspace_id = ? AND day_bucket BETWEEN ? AND ? \
     AND start_time_us >= ? AND start_time_us < ? \
     AND expire_at_us > ? \
     AND (logic_delete_time_us IS NULL OR logic_delete_time_us > ?)"
        .to_string()
}

fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}

fn query_spans(conn: &Connection, sql: &str, bind: Vec<Value>) -> Result<Vec<Span>, DuckdbError> {
    let mut stmt = conn.prepare(sql)?;
    let params: Vec<&dyn duckdb::ToSql> = bind.iter().map(|v| v as &dyn duckdb::ToSql).collect();
    let mut rows = stmt.query(params.as_slice())?;

    let mut spans = Vec::new();
    while let Some(row) = rows.next()? {
        spans.push(row_to_span(row)?);
    }
    Ok(spans)
}

fn row_to_span(row: &duckdb::Row<'_>) -> Result<Span, DuckdbError> {
    let span_type: String = row.get(5)?;
    let attr_tos: Option<String> = row.get(12)?;
    let attr_tos: Option<AttrTos> = match attr_tos {
        Some(raw) if !raw.is_empty() => Some(
            serde_json::from_str(&raw).map_err(|e| DuckdbError::CorruptRow(e.to_string()))?,
        ),
        _ => None,
    };

    Ok(Span {
        trace_id: row.get(0)?,
        span_id: row.get(1)?,
        parent_id: row.get(2)?,
        workspace_id: row.get(3)?,
        span_name: row.get(4)?,
        span_type: SpanType::parse_lossy(&span_type),
        start_time_us: row.get(6)?,
        duration_us: row.get(7)?,
        status_code: row.get(8)?,
        call_type: row.get(9)?,
        input: row.get::<_, Option<String>>(10)?.unwrap_or_default(),
        output: row.get::<_, Option<String>>(11)?.unwrap_or_default(),
        attr_tos,
        tags_string: from_json(row.get(13)?)?,
        tags_long: from_json(row.get(14)?)?,
        tags_double: from_json(row.get(15)?)?,
        tags_bool: from_json(row.get(16)?)?,
        system_tags: from_json(row.get(17)?)?,
        tags_bytes: from_json(row.get(18)?)?,
        logic_delete_time_us: row.get(19)?,
    })
}

fn to_json<T: Serialize>(value: &T) -> Result<String, DuckdbError> {
    serde_json::to_string(value).map_err(|e| DuckdbError::CorruptRow(e.to_string()))
}

fn from_json<T: DeserializeOwned>(
    raw: Option<String>,
) -> Result<BTreeMap<String, T>, DuckdbError> {
    match raw {
        Some(s) if !s.is_empty() => {
            serde_json::from_str(&s).map_err(|e| DuckdbError::CorruptRow(e.to_string()))
        }
        _ => Ok(BTreeMap::new()),
    }
}
