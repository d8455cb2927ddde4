//! DuckDB schema definitions
//!
//! Append-only span storage with no PRIMARY KEY constraints. Re-ingested
//! spans are deduplicated at query time via the `spans_v` VIEW (latest
//! ingest wins per workspace/trace/span).

/// Current schema version
pub const SCHEMA_VERSION: i32 = 2;

/// Index added by migration 2
pub const TRACE_INDEX_SQL: &str =
    "CREATE INDEX IF NOT EXISTS idx_spans_trace ON spans (workspace_id, trace_id);";

/// Complete schema SQL
pub const SCHEMA: &str = r#"
-- Infrastructure: Schema version tracking
CREATE TABLE IF NOT EXISTS schema_version (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    version INTEGER NOT NULL,
    applied_at BIGINT NOT NULL,
    description VARCHAR
);

-- ═══════════════════════════════════════════════════════════════════════════════
-- Spans: partitioned logically by (workspace_id, day_bucket)
-- ═══════════════════════════════════════════════════════════════════════════════
CREATE TABLE IF NOT EXISTS spans (
    -- IDENTITY
    workspace_id        VARCHAR NOT NULL,   -- Tenant isolation
    trace_id            VARCHAR NOT NULL,
    span_id             VARCHAR NOT NULL,
    parent_id           VARCHAR NOT NULL DEFAULT '',  -- '' = root

    -- SPAN METADATA
    span_name           VARCHAR NOT NULL DEFAULT '',
    span_type           VARCHAR NOT NULL DEFAULT 'unknown',
    status_code         INTEGER NOT NULL DEFAULT 0,   -- 0 = success
    call_type           VARCHAR NOT NULL DEFAULT '',

    -- TIMING (microseconds)
    start_time_us       BIGINT NOT NULL,
    duration_us         BIGINT NOT NULL DEFAULT 0,

    -- PAYLOAD
    input               VARCHAR,
    output              VARCHAR,
    attr_tos            VARCHAR,            -- JSON object, externalised payload URLs

    -- TAG MAPS (JSON objects)
    tags_string         VARCHAR,
    tags_long           VARCHAR,
    tags_double         VARCHAR,
    tags_bool           VARCHAR,
    system_tags         VARCHAR,
    tags_bytes          VARCHAR,

    -- RETENTION
    day_bucket          INTEGER NOT NULL,   -- Days since epoch of start_time_us
    ttl_days            INTEGER NOT NULL,
    expire_at_us        BIGINT NOT NULL,
    logic_delete_time_us BIGINT,            -- Soft delete marker
    ingested_at_us      BIGINT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_spans_partition ON spans (workspace_id, day_bucket);
CREATE INDEX IF NOT EXISTS idx_spans_expire ON spans (expire_at_us);
CREATE INDEX IF NOT EXISTS idx_spans_trace ON spans (workspace_id, trace_id);

-- Deduplicated read path
CREATE OR REPLACE VIEW spans_v AS
SELECT * FROM spans
QUALIFY ROW_NUMBER() OVER (
    PARTITION BY workspace_id, trace_id, span_id
    ORDER BY ingested_at_us DESC
) = 1;
"#;
