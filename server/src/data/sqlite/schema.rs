//! SQLite schema definitions
//!
//! Metadata store: annotations, saved views and experiments.

/// Current schema version
pub const SCHEMA_VERSION: i32 = 2;

/// Index added by migration 2
pub const TURN_STATE_INDEX_SQL: &str = "CREATE INDEX IF NOT EXISTS idx_turn_results_state ON experiment_turn_results(state, updated_at_ms)";

/// Complete schema SQL
pub const SCHEMA: &str = r#"
-- Applied migrations; the highest version is the schema version
CREATE TABLE IF NOT EXISTS schema_migrations (
    version INTEGER PRIMARY KEY,
    name TEXT NOT NULL,
    checksum TEXT NOT NULL,
    applied_at_ms INTEGER NOT NULL
);

-- =============================================================================
-- 1. Annotations (one row per logical annotation, corrections as JSON array)
-- =============================================================================
CREATE TABLE IF NOT EXISTS annotations (
    id TEXT PRIMARY KEY,
    workspace_id TEXT NOT NULL,
    trace_id TEXT NOT NULL,
    span_id TEXT NOT NULL,
    start_time_ms INTEGER NOT NULL,
    annotation_type TEXT NOT NULL CHECK(annotation_type IN ('manual_feedback', 'auto_evaluate', 'coze_feedback')),
    annotation_key TEXT NOT NULL CHECK(length(annotation_key) >= 1),
    value_type TEXT NOT NULL CHECK(value_type IN ('long', 'double', 'string', 'bool')),
    long_value INTEGER,
    double_value REAL,
    string_value TEXT,
    bool_value INTEGER,
    reasoning TEXT NOT NULL DEFAULT '',
    status TEXT NOT NULL DEFAULT 'normal' CHECK(status IN ('normal', 'deleted')),
    corrections TEXT NOT NULL DEFAULT '[]',
    auto_evaluate TEXT,
    created_by TEXT NOT NULL,
    updated_by TEXT NOT NULL,
    created_at_ms INTEGER NOT NULL,
    updated_at_ms INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_annotations_span ON annotations(workspace_id, trace_id, span_id);
-- At most one live annotation per key on a span
CREATE UNIQUE INDEX IF NOT EXISTS idx_annotations_live_key
    ON annotations(workspace_id, trace_id, span_id, annotation_key) WHERE status = 'normal';

-- =============================================================================
-- 2. Saved views (system views come from config and are never stored)
-- =============================================================================
CREATE TABLE IF NOT EXISTS views (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    workspace_id INTEGER NOT NULL,
    enterprise_id TEXT NOT NULL DEFAULT '',
    view_name TEXT NOT NULL CHECK(length(view_name) >= 1 AND length(view_name) <= 100),
    platform_type TEXT NOT NULL,
    span_list_type TEXT NOT NULL,
    filters TEXT NOT NULL DEFAULT '',
    created_by TEXT NOT NULL,
    updated_by TEXT NOT NULL,
    created_at_ms INTEGER NOT NULL,
    updated_at_ms INTEGER NOT NULL,
    UNIQUE(workspace_id, created_by, view_name)
);

-- =============================================================================
-- 3. Experiments
-- =============================================================================
CREATE TABLE IF NOT EXISTS experiments (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    workspace_id INTEGER NOT NULL,
    name TEXT NOT NULL CHECK(length(name) >= 1),
    description TEXT NOT NULL DEFAULT '',
    creator TEXT NOT NULL,
    eval_set_id INTEGER NOT NULL,
    eval_set_version_id INTEGER NOT NULL,
    target_id INTEGER NOT NULL,
    target_version_id INTEGER NOT NULL,
    target_type TEXT NOT NULL DEFAULT '',
    evaluator_version_ids TEXT NOT NULL DEFAULT '[]',
    expt_type TEXT NOT NULL,
    source_type TEXT NOT NULL,
    source_id TEXT NOT NULL DEFAULT '',
    status TEXT NOT NULL,
    status_message TEXT NOT NULL DEFAULT '',
    max_alive_time_ms INTEGER NOT NULL,
    start_at_ms INTEGER,
    end_at_ms INTEGER,
    eval_conf TEXT NOT NULL,
    stats TEXT NOT NULL DEFAULT '{}',
    created_at_ms INTEGER NOT NULL,
    updated_at_ms INTEGER NOT NULL,
    UNIQUE(workspace_id, name)
);

CREATE INDEX IF NOT EXISTS idx_experiments_workspace ON experiments(workspace_id, created_at_ms);
CREATE INDEX IF NOT EXISTS idx_experiments_status ON experiments(status);

CREATE TABLE IF NOT EXISTS experiment_turn_results (
    experiment_id INTEGER NOT NULL REFERENCES experiments(id) ON DELETE CASCADE,
    item_id INTEGER NOT NULL,
    turn_id INTEGER NOT NULL,
    item_index INTEGER NOT NULL,
    turn_index INTEGER NOT NULL,
    inputs TEXT NOT NULL DEFAULT '{}',
    state TEXT NOT NULL,
    target_output TEXT NOT NULL DEFAULT '{}',
    evaluator_records TEXT NOT NULL DEFAULT '[]',
    annotations TEXT NOT NULL DEFAULT '[]',
    is_err INTEGER NOT NULL DEFAULT 0,
    retry INTEGER NOT NULL DEFAULT 0,
    stable INTEGER NOT NULL DEFAULT 1,
    code INTEGER NOT NULL DEFAULT 0,
    error_message TEXT NOT NULL DEFAULT '',
    input_tokens INTEGER NOT NULL DEFAULT 0,
    output_tokens INTEGER NOT NULL DEFAULT 0,
    created_at_ms INTEGER NOT NULL,
    updated_at_ms INTEGER NOT NULL,
    PRIMARY KEY (experiment_id, item_id, turn_id)
);

CREATE INDEX IF NOT EXISTS idx_turn_results_state ON experiment_turn_results(state, updated_at_ms);

CREATE TABLE IF NOT EXISTS experiment_aggregates (
    experiment_id INTEGER PRIMARY KEY REFERENCES experiments(id) ON DELETE CASCADE,
    result TEXT NOT NULL,
    updated_at_ms INTEGER NOT NULL
);
"#;
