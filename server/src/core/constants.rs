// =============================================================================
// Application Identity
// =============================================================================

/// Application name in title case (for display and platform directories)
pub const APP_NAME: &str = "Loupe";

/// Application name in lowercase (for paths and identifiers)
pub const APP_NAME_LOWER: &str = "loupe";

/// Unix-style dotfile folder name
pub const APP_DOT_FOLDER: &str = ".loupe";

// =============================================================================
// Configuration Files
// =============================================================================

/// Config file name
pub const CONFIG_FILE_NAME: &str = "loupe.json";

/// Environment variable for config file path
pub const ENV_CONFIG: &str = "LOUPE_CONFIG";

// =============================================================================
// Environment Variables - Server
// =============================================================================

/// Environment variable for server host
pub const ENV_HOST: &str = "LOUPE_HOST";

/// Environment variable for server port
pub const ENV_PORT: &str = "LOUPE_PORT";

/// Environment variable for log level/filter
pub const ENV_LOG: &str = "LOUPE_LOG";

/// Environment variable to override data directory
pub const ENV_DATA_DIR: &str = "LOUPE_DATA_DIR";

// =============================================================================
// Environment Variables - Trace / Evaluation
// =============================================================================

pub const ENV_TRACE_EARLIEST_DAYS: &str = "LOUPE_TRACE_EARLIEST_DAYS";
pub const ENV_TRACE_MAX_SPANS_PER_WORKSPACE: &str = "LOUPE_TRACE_MAX_SPANS_PER_WORKSPACE";
pub const ENV_BENEFIT_STORAGE_DAYS: &str = "LOUPE_BENEFIT_STORAGE_DAYS";
pub const ENV_EVAL_ITEM_CONCUR_NUM: &str = "LOUPE_EVAL_ITEM_CONCUR_NUM";
pub const ENV_EVAL_EVALUATOR_CONCUR_NUM: &str = "LOUPE_EVAL_EVALUATOR_CONCUR_NUM";
pub const ENV_TARGET_URL: &str = "LOUPE_TARGET_URL";
pub const ENV_EVALUATOR_URL: &str = "LOUPE_EVALUATOR_URL";
pub const ENV_METRICS_BACKEND: &str = "LOUPE_METRICS_BACKEND";

// =============================================================================
// Server Defaults
// =============================================================================

/// Default server host
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Default server port
pub const DEFAULT_PORT: u16 = 5390;

/// Default request body limit (2 MB)
pub const DEFAULT_BODY_LIMIT: usize = 2 * 1024 * 1024;

/// OTLP ingestion body limit (16 MB)
pub const OTLP_BODY_LIMIT: usize = 16 * 1024 * 1024;

/// Retry-After header value when ingestion is backpressured
pub const BACKPRESSURE_RETRY_AFTER_SECS: u64 = 2;

/// Graceful shutdown timeout for background tasks
pub const SHUTDOWN_TIMEOUT_SECS: u64 = 30;

// =============================================================================
// Request Identity
// =============================================================================

/// Header carrying the caller's user id
pub const HEADER_USER_ID: &str = "x-loupe-user-id";

/// Header carrying the workspace id for OTLP ingestion
pub const HEADER_WORKSPACE_ID: &str = "x-loupe-workspace-id";

/// Resource attribute carrying the workspace id on OTLP payloads
pub const WORKSPACE_ID_ATTR: &str = "loupe.workspace_id";

// =============================================================================
// SQLite Database
// =============================================================================

/// SQLite database filename
pub const SQLITE_DB_FILENAME: &str = "loupe.db";

/// SQLite connection pool max connections
pub const SQLITE_MAX_CONNECTIONS: u32 = 5;

/// SQLite busy timeout in seconds
pub const SQLITE_BUSY_TIMEOUT_SECS: u64 = 30;

/// SQLite cache size (negative = KB, so -64000 = 64MB)
pub const SQLITE_CACHE_SIZE: &str = "-64000";

/// Pages between automatic WAL checkpoints
pub const SQLITE_WAL_AUTOCHECKPOINT: &str = "1000";

/// Interval between explicit WAL checkpoints
pub const SQLITE_CHECKPOINT_INTERVAL_SECS: u64 = 300;

// =============================================================================
// DuckDB Database
// =============================================================================

/// DuckDB database filename
pub const DUCKDB_DB_FILENAME: &str = "spans.duckdb";

/// Per-query timeout
pub const DUCKDB_QUERY_TIMEOUT_SECS: u64 = 30;

/// Interval between DuckDB checkpoints
pub const DUCKDB_CHECKPOINT_INTERVAL_SECS: u64 = 300;

/// Default interval between span TTL eviction runs
pub const DEFAULT_RETENTION_INTERVAL_SECS: u64 = 600;

/// Rows fetched per scan batch when a filter tree is evaluated in memory
pub const SPAN_SCAN_BATCH_SIZE: usize = 2000;

// =============================================================================
// Topics
// =============================================================================

/// Topic carrying inner-ingest span batches
pub const TOPIC_SPAN_INGEST: &str = "spans.ingest";

/// Topic carrying asynchronous annotation events
pub const TOPIC_ANNOTATION_EVENTS: &str = "annotations.events";

pub const ENV_TOPIC_BUFFER_SIZE: &str = "LOUPE_TOPIC_BUFFER_SIZE";
pub const ENV_TOPIC_CHANNEL_CAPACITY: &str = "LOUPE_TOPIC_CHANNEL_CAPACITY";

/// Max bytes buffered per topic before publishers see backpressure (64 MB)
pub const DEFAULT_TOPIC_BUFFER_SIZE: usize = 64 * 1024 * 1024;

/// Channel capacity (message count) per topic
pub const DEFAULT_TOPIC_CHANNEL_CAPACITY: usize = 1024;

// =============================================================================
// Trace Query Defaults
// =============================================================================

/// Platform used when a query does not name one
pub const DEFAULT_PLATFORM: &str = "cozeloop";

/// Oldest day (relative to today) a query window may reach
pub const DEFAULT_EARLIEST_DAYS: i64 = 365;

/// Page size used when the request leaves it unset
pub const DEFAULT_PAGE_SIZE: i32 = 100;

/// Hard upper bound on page size
pub const MAX_PAGE_SIZE: i32 = 1000;

/// Max spans accepted per ingest call
pub const MAX_INGEST_SPANS: usize = 100;

/// Max nesting depth of a span filter tree
pub const MAX_FILTER_DEPTH: usize = 5;

/// Call type forced onto spans ingested through the open API
pub const OPENAPI_CALL_TYPE: &str = "Custom";

/// Slack around an annotation's start time when checking the span exists
pub const ANNOTATION_SPAN_LOOKUP_SLACK_MS: i64 = 24 * 60 * 60 * 1000;

/// Max length of a free-text annotation value
pub const FREE_TEXT_MAX_LEN: usize = 1024;

// =============================================================================
// Benefit Defaults
// =============================================================================

/// Retention tier assigned when no benefit answer is available
pub const DEFAULT_STORAGE_DURATION_DAYS: i64 = 3;

// =============================================================================
// Dataset Export
// =============================================================================

/// Items per AddDatasetItems call
pub const DATASET_ITEM_BATCH_SIZE: usize = 100;

// =============================================================================
// Evaluation Defaults
// =============================================================================

pub const DEFAULT_ITEM_CONCUR_NUM: usize = 3;
pub const DEFAULT_EVALUATOR_CONCUR_NUM: usize = 3;
pub const DEFAULT_TURN_MAX_RETRIES: u32 = 3;
pub const DEFAULT_TURN_RETRY_BASE_DELAY_MS: u64 = 200;
pub const DEFAULT_TURN_TIMEOUT_SECS: u64 = 120;
pub const DEFAULT_ZOMBIE_HORIZON_SECS: u64 = 3600;
pub const DEFAULT_REAP_INTERVAL_SECS: u64 = 60;

/// Experiment lifetime used when the request leaves `max_alive_time` unset (ms)
pub const DEFAULT_MAX_ALIVE_TIME_MS: i64 = 24 * 60 * 60 * 1000;

/// Timeout for calls to HTTP target/evaluator collaborators
pub const COLLABORATOR_HTTP_TIMEOUT_SECS: u64 = 60;

/// Buckets kept in a score distribution before the rest merge into "other"
pub const SCORE_DISTRIBUTION_TOP_N: usize = 5;
