use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::data::types::TagInfo;
use crate::utils::file::expand_path;

use super::cli::CliConfig;
use super::constants::{
    APP_DOT_FOLDER, CONFIG_FILE_NAME, DEFAULT_EARLIEST_DAYS, DEFAULT_EVALUATOR_CONCUR_NUM,
    DEFAULT_HOST, DEFAULT_ITEM_CONCUR_NUM, DEFAULT_PAGE_SIZE, DEFAULT_PORT,
    DEFAULT_REAP_INTERVAL_SECS, DEFAULT_RETENTION_INTERVAL_SECS, DEFAULT_STORAGE_DURATION_DAYS,
    DEFAULT_TURN_MAX_RETRIES, DEFAULT_TURN_RETRY_BASE_DELAY_MS, DEFAULT_TURN_TIMEOUT_SECS,
    DEFAULT_ZOMBIE_HORIZON_SECS, MAX_PAGE_SIZE,
};

// =============================================================================
// Metrics Backend Enum
// =============================================================================

/// Where operation metrics are emitted
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricsBackend {
    #[default]
    Noop,
    Otel,
}

impl fmt::Display for MetricsBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetricsBackend::Noop => write!(f, "noop"),
            MetricsBackend::Otel => write!(f, "otel"),
        }
    }
}

// =============================================================================
// File Config Structs (JSON deserialization)
// =============================================================================

/// Server configuration section
#[derive(Debug, Default, Clone, Deserialize)]
pub struct ServerFileConfig {
    pub host: Option<String>,
    pub port: Option<u16>,
}

/// Span storage and query section
#[derive(Debug, Default, Clone, Deserialize)]
pub struct TraceFileConfig {
    pub earliest_days: Option<i64>,
    pub default_page_size: Option<i32>,
    pub max_spans_per_workspace: Option<u64>,
    pub retention_interval_secs: Option<u64>,
}

/// Local benefit oracle answers
#[derive(Debug, Default, Clone, Deserialize)]
pub struct BenefitFileConfig {
    pub storage_duration_days: Option<i64>,
    pub is_enough: Option<bool>,
    pub account_available: Option<bool>,
}

/// One process-wide, read-only view
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct SystemViewConfig {
    pub id: i64,
    pub view_name: String,
    #[serde(default = "default_platform")]
    pub platform_type: String,
    #[serde(default = "default_span_list_type")]
    pub span_list_type: String,
    #[serde(default)]
    pub filters: serde_json::Value,
}

fn default_platform() -> String {
    super::constants::DEFAULT_PLATFORM.to_string()
}

fn default_span_list_type() -> String {
    "root".to_string()
}

#[derive(Debug, Default, Clone, Deserialize)]
pub struct ViewsFileConfig {
    pub system: Option<Vec<SystemViewConfig>>,
}

#[derive(Debug, Default, Clone, Deserialize)]
pub struct TagsFileConfig {
    pub catalog: Option<Vec<TagInfo>>,
}

/// Experiment runner knobs
#[derive(Debug, Default, Clone, Deserialize)]
pub struct EvaluationFileConfig {
    pub item_concur_num: Option<usize>,
    pub evaluator_concur_num: Option<usize>,
    pub max_retries: Option<u32>,
    pub retry_base_delay_ms: Option<u64>,
    pub turn_timeout_secs: Option<u64>,
    pub zombie_horizon_secs: Option<u64>,
    pub reap_interval_secs: Option<u64>,
}

/// Endpoints of external target/evaluator services
#[derive(Debug, Default, Clone, Deserialize)]
pub struct CollaboratorsFileConfig {
    pub target_url: Option<String>,
    pub evaluator_url: Option<String>,
}

#[derive(Debug, Default, Clone, Deserialize)]
pub struct MetricsFileConfig {
    pub backend: Option<MetricsBackend>,
}

/// File-based configuration (JSON)
#[derive(Debug, Default, Deserialize)]
pub struct FileConfig {
    pub server: Option<ServerFileConfig>,
    pub trace: Option<TraceFileConfig>,
    pub benefit: Option<BenefitFileConfig>,
    pub views: Option<ViewsFileConfig>,
    pub tags: Option<TagsFileConfig>,
    pub evaluation: Option<EvaluationFileConfig>,
    pub collaborators: Option<CollaboratorsFileConfig>,
    pub metrics: Option<MetricsFileConfig>,
    #[serde(flatten)]
    pub extra: serde_json::Value,
}

/// Overwrite `$dst` with `$src` when the latter is set
macro_rules! merge_field {
    ($dst:expr, $src:expr, $name:literal) => {
        if $src.is_some() {
            tracing::trace!(field = $name, value = ?$src, "Merging config field");
            $dst = $src;
        }
    };
}

impl FileConfig {
    /// Load configuration from a JSON file
    fn load_from_file(path: &Path) -> Result<Self> {
        tracing::debug!(path = %path.display(), "Loading config file");
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        tracing::trace!(config = ?config, "Parsed config file");
        Ok(config)
    }

    /// Warn about unknown fields in the config
    fn warn_unknown_fields(&self) {
        if let serde_json::Value::Object(map) = &self.extra
            && !map.is_empty()
        {
            let keys_str: String = map
                .keys()
                .map(|k| k.as_str())
                .collect::<Vec<_>>()
                .join(", ");
            tracing::warn!(
                fields = %keys_str,
                "Unknown fields in config file (possible typos)"
            );
        }
    }

    /// Merge another FileConfig into this one (other takes precedence)
    fn merge(&mut self, other: FileConfig) {
        if let Some(server) = other.server {
            let current = self.server.get_or_insert_with(ServerFileConfig::default);
            merge_field!(current.host, server.host, "server.host");
            merge_field!(current.port, server.port, "server.port");
        }

        if let Some(trace) = other.trace {
            let current = self.trace.get_or_insert_with(TraceFileConfig::default);
            merge_field!(current.earliest_days, trace.earliest_days, "trace.earliest_days");
            merge_field!(
                current.default_page_size,
                trace.default_page_size,
                "trace.default_page_size"
            );
            merge_field!(
                current.max_spans_per_workspace,
                trace.max_spans_per_workspace,
                "trace.max_spans_per_workspace"
            );
            merge_field!(
                current.retention_interval_secs,
                trace.retention_interval_secs,
                "trace.retention_interval_secs"
            );
        }

        if let Some(benefit) = other.benefit {
            let current = self.benefit.get_or_insert_with(BenefitFileConfig::default);
            merge_field!(
                current.storage_duration_days,
                benefit.storage_duration_days,
                "benefit.storage_duration_days"
            );
            merge_field!(current.is_enough, benefit.is_enough, "benefit.is_enough");
            merge_field!(
                current.account_available,
                benefit.account_available,
                "benefit.account_available"
            );
        }

        // Lists replace wholesale
        if let Some(views) = other.views {
            let current = self.views.get_or_insert_with(ViewsFileConfig::default);
            merge_field!(current.system, views.system, "views.system");
        }

        if let Some(tags) = other.tags {
            let current = self.tags.get_or_insert_with(TagsFileConfig::default);
            merge_field!(current.catalog, tags.catalog, "tags.catalog");
        }

        if let Some(eval) = other.evaluation {
            let current = self
                .evaluation
                .get_or_insert_with(EvaluationFileConfig::default);
            merge_field!(
                current.item_concur_num,
                eval.item_concur_num,
                "evaluation.item_concur_num"
            );
            merge_field!(
                current.evaluator_concur_num,
                eval.evaluator_concur_num,
                "evaluation.evaluator_concur_num"
            );
            merge_field!(current.max_retries, eval.max_retries, "evaluation.max_retries");
            merge_field!(
                current.retry_base_delay_ms,
                eval.retry_base_delay_ms,
                "evaluation.retry_base_delay_ms"
            );
            merge_field!(
                current.turn_timeout_secs,
                eval.turn_timeout_secs,
                "evaluation.turn_timeout_secs"
            );
            merge_field!(
                current.zombie_horizon_secs,
                eval.zombie_horizon_secs,
                "evaluation.zombie_horizon_secs"
            );
            merge_field!(
                current.reap_interval_secs,
                eval.reap_interval_secs,
                "evaluation.reap_interval_secs"
            );
        }

        if let Some(collab) = other.collaborators {
            let current = self
                .collaborators
                .get_or_insert_with(CollaboratorsFileConfig::default);
            merge_field!(current.target_url, collab.target_url, "collaborators.target_url");
            merge_field!(
                current.evaluator_url,
                collab.evaluator_url,
                "collaborators.evaluator_url"
            );
        }

        if let Some(metrics) = other.metrics {
            let current = self.metrics.get_or_insert_with(MetricsFileConfig::default);
            merge_field!(current.backend, metrics.backend, "metrics.backend");
        }
    }
}

// =============================================================================
// Runtime Config Structs (final merged configuration)
// =============================================================================

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Span storage and query configuration
#[derive(Debug, Clone)]
pub struct TraceConfig {
    pub earliest_days: i64,
    pub default_page_size: i32,
    pub max_spans_per_workspace: Option<u64>,
    pub retention_interval_secs: u64,
}

/// Answers of the local benefit oracle
#[derive(Debug, Clone)]
pub struct BenefitConfig {
    pub storage_duration_days: i64,
    pub is_enough: bool,
    pub account_available: bool,
}

#[derive(Debug, Clone, Default)]
pub struct ViewsConfig {
    pub system: Vec<SystemViewConfig>,
}

#[derive(Debug, Clone, Default)]
pub struct TagsConfig {
    pub catalog: Vec<TagInfo>,
}

/// Experiment runner configuration
#[derive(Debug, Clone)]
pub struct EvaluationConfig {
    pub item_concur_num: usize,
    pub evaluator_concur_num: usize,
    pub max_retries: u32,
    pub retry_base_delay_ms: u64,
    pub turn_timeout_secs: u64,
    pub zombie_horizon_secs: u64,
    pub reap_interval_secs: u64,
}

impl Default for EvaluationConfig {
    fn default() -> Self {
        Self {
            item_concur_num: DEFAULT_ITEM_CONCUR_NUM,
            evaluator_concur_num: DEFAULT_EVALUATOR_CONCUR_NUM,
            max_retries: DEFAULT_TURN_MAX_RETRIES,
            retry_base_delay_ms: DEFAULT_TURN_RETRY_BASE_DELAY_MS,
            turn_timeout_secs: DEFAULT_TURN_TIMEOUT_SECS,
            zombie_horizon_secs: DEFAULT_ZOMBIE_HORIZON_SECS,
            reap_interval_secs: DEFAULT_REAP_INTERVAL_SECS,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct CollaboratorsConfig {
    pub target_url: Option<String>,
    pub evaluator_url: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct MetricsConfig {
    pub backend: MetricsBackend,
}

/// Final merged application configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub trace: TraceConfig,
    pub benefit: BenefitConfig,
    pub views: ViewsConfig,
    pub tags: TagsConfig,
    pub evaluation: EvaluationConfig,
    pub collaborators: CollaboratorsConfig,
    pub metrics: MetricsConfig,
}

impl AppConfig {
    /// Load configuration from all sources
    ///
    /// Priority (lowest to highest):
    /// 1. Defaults
    /// 2. Profile directory config (~/.loupe/loupe.json)
    /// 3. Local directory config OR CLI-specified config path
    /// 4. CLI arguments (which include env var fallbacks via clap)
    pub fn load(cli: &CliConfig) -> Result<Self> {
        tracing::debug!("Loading application configuration");
        tracing::trace!(cli = ?cli, "CLI config");

        let mut file_config = FileConfig::default();
        let mut found_configs: Vec<String> = Vec::new();

        if let Some(profile_path) = get_profile_config_path()
            && profile_path.exists()
        {
            let profile_config = FileConfig::load_from_file(&profile_path)?;
            profile_config.warn_unknown_fields();
            file_config.merge(profile_config);
            found_configs.push(profile_path.display().to_string());
        }

        let overlay_path = if let Some(ref path) = cli.config {
            let expanded = expand_path(&path.to_string_lossy());
            if !expanded.exists() {
                anyhow::bail!("Config file not found: {}", expanded.display());
            }
            Some(expanded)
        } else {
            let local = PathBuf::from(CONFIG_FILE_NAME);
            if local.exists() { Some(local) } else { None }
        };

        if let Some(path) = overlay_path {
            let overlay_config = FileConfig::load_from_file(&path)?;
            overlay_config.warn_unknown_fields();
            file_config.merge(overlay_config);
            found_configs.push(path.display().to_string());
        }

        tracing::debug!(configs = ?found_configs, "Config files loaded");

        let config = Self::from_layers(cli, file_config);
        config.validate()?;

        tracing::debug!(
            host = %config.server.host,
            port = config.server.port,
            earliest_days = config.trace.earliest_days,
            default_page_size = config.trace.default_page_size,
            max_spans_per_workspace = ?config.trace.max_spans_per_workspace,
            storage_duration_days = config.benefit.storage_duration_days,
            system_views = config.views.system.len(),
            catalog_tags = config.tags.catalog.len(),
            item_concur_num = config.evaluation.item_concur_num,
            evaluator_concur_num = config.evaluation.evaluator_concur_num,
            metrics_backend = %config.metrics.backend,
            "Configuration loaded"
        );

        Ok(config)
    }

    /// Layer defaults -> file config -> CLI/env overrides
    fn from_layers(cli: &CliConfig, file_config: FileConfig) -> Self {
        let file_server = file_config.server.unwrap_or_default();
        let file_trace = file_config.trace.unwrap_or_default();
        let file_benefit = file_config.benefit.unwrap_or_default();
        let file_views = file_config.views.unwrap_or_default();
        let file_tags = file_config.tags.unwrap_or_default();
        let file_eval = file_config.evaluation.unwrap_or_default();
        let file_collab = file_config.collaborators.unwrap_or_default();
        let file_metrics = file_config.metrics.unwrap_or_default();

        let defaults = EvaluationConfig::default();

        Self {
            server: ServerConfig {
                host: cli
                    .host
                    .clone()
                    .or(file_server.host)
                    .unwrap_or_else(|| DEFAULT_HOST.to_string()),
                port: cli.port.or(file_server.port).unwrap_or(DEFAULT_PORT),
            },
            trace: TraceConfig {
                earliest_days: cli
                    .trace_earliest_days
                    .or(file_trace.earliest_days)
                    .unwrap_or(DEFAULT_EARLIEST_DAYS),
                default_page_size: file_trace.default_page_size.unwrap_or(DEFAULT_PAGE_SIZE),
                max_spans_per_workspace: cli
                    .trace_max_spans_per_workspace
                    .or(file_trace.max_spans_per_workspace),
                retention_interval_secs: file_trace
                    .retention_interval_secs
                    .unwrap_or(DEFAULT_RETENTION_INTERVAL_SECS),
            },
            benefit: BenefitConfig {
                storage_duration_days: cli
                    .benefit_storage_days
                    .or(file_benefit.storage_duration_days)
                    .unwrap_or(DEFAULT_STORAGE_DURATION_DAYS),
                is_enough: file_benefit.is_enough.unwrap_or(true),
                account_available: file_benefit.account_available.unwrap_or(true),
            },
            views: ViewsConfig {
                system: file_views.system.unwrap_or_default(),
            },
            tags: TagsConfig {
                catalog: file_tags.catalog.unwrap_or_default(),
            },
            evaluation: EvaluationConfig {
                item_concur_num: cli
                    .item_concur_num
                    .or(file_eval.item_concur_num)
                    .unwrap_or(defaults.item_concur_num),
                evaluator_concur_num: cli
                    .evaluator_concur_num
                    .or(file_eval.evaluator_concur_num)
                    .unwrap_or(defaults.evaluator_concur_num),
                max_retries: file_eval.max_retries.unwrap_or(defaults.max_retries),
                retry_base_delay_ms: file_eval
                    .retry_base_delay_ms
                    .unwrap_or(defaults.retry_base_delay_ms),
                turn_timeout_secs: file_eval
                    .turn_timeout_secs
                    .unwrap_or(defaults.turn_timeout_secs),
                zombie_horizon_secs: file_eval
                    .zombie_horizon_secs
                    .unwrap_or(defaults.zombie_horizon_secs),
                reap_interval_secs: file_eval
                    .reap_interval_secs
                    .unwrap_or(defaults.reap_interval_secs),
            },
            collaborators: CollaboratorsConfig {
                target_url: cli.target_url.clone().or(file_collab.target_url),
                evaluator_url: cli.evaluator_url.clone().or(file_collab.evaluator_url),
            },
            metrics: MetricsConfig {
                backend: cli
                    .metrics_backend
                    .or(file_metrics.backend)
                    .unwrap_or_default(),
            },
        }
    }

    /// Validate the configuration for consistency and correctness
    fn validate(&self) -> Result<()> {
        if self.server.host.is_empty() {
            anyhow::bail!("Configuration error: server.host must not be empty");
        }
        if self.server.port == 0 {
            anyhow::bail!("Configuration error: server.port must be greater than 0");
        }
        if self.trace.earliest_days <= 0 {
            anyhow::bail!("Configuration error: trace.earliest_days must be greater than 0");
        }
        if !(1..=MAX_PAGE_SIZE).contains(&self.trace.default_page_size) {
            anyhow::bail!(
                "Configuration error: trace.default_page_size must be between 1 and {}",
                MAX_PAGE_SIZE
            );
        }
        if self.trace.retention_interval_secs == 0 {
            anyhow::bail!("Configuration error: trace.retention_interval_secs must be > 0");
        }
        if self.evaluation.item_concur_num == 0 || self.evaluation.evaluator_concur_num == 0 {
            anyhow::bail!("Configuration error: evaluation concurrency must be at least 1");
        }
        if self.evaluation.reap_interval_secs == 0 {
            anyhow::bail!("Configuration error: evaluation.reap_interval_secs must be > 0");
        }
        for url in [
            &self.collaborators.target_url,
            &self.collaborators.evaluator_url,
        ]
        .into_iter()
        .flatten()
        {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                anyhow::bail!("Configuration error: collaborator url must be http(s): {}", url);
            }
        }

        let mut seen = std::collections::HashSet::new();
        for view in &self.views.system {
            if !seen.insert(view.id) {
                anyhow::bail!("Configuration error: duplicate system view id {}", view.id);
            }
        }

        Ok(())
    }
}

/// Get the profile config path (~/.loupe/loupe.json)
fn get_profile_config_path() -> Option<PathBuf> {
    dirs::home_dir().map(|h| h.join(APP_DOT_FOLDER).join(CONFIG_FILE_NAME))
}

#[cfg(test)]
impl AppConfig {
    /// Defaults only, no files or flags
    pub fn for_test() -> Self {
        Self::from_layers(&CliConfig::default(), FileConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::types::TagContentType;

    #[test]
    fn test_metrics_backend_serde() {
        let backend: MetricsBackend = serde_json::from_str(r#""otel""#).unwrap();
        assert_eq!(backend, MetricsBackend::Otel);
        assert_eq!(MetricsBackend::Noop.to_string(), "noop");
    }

    #[test]
    fn test_file_config_parse_full() {
        let json = r#"{
            "server": { "host": "0.0.0.0", "port": 8080 },
            "trace": { "earliest_days": 30, "max_spans_per_workspace": 1000 },
            "benefit": { "storage_duration_days": 90 },
            "views": { "system": [ { "id": 1, "view_name": "errors", "filters": {} } ] },
            "tags": { "catalog": [ {
                "tag_key_id": 11, "tag_key_name": "quality", "content_type": "free_text"
            } ] },
            "evaluation": { "item_concur_num": 5 },
            "collaborators": { "target_url": "http://localhost:9000/invoke" }
        }"#;
        let config: FileConfig = serde_json::from_str(json).unwrap();

        assert_eq!(config.server.as_ref().unwrap().port, Some(8080));
        assert_eq!(config.trace.as_ref().unwrap().earliest_days, Some(30));
        let views = config.views.as_ref().unwrap().system.as_ref().unwrap();
        assert_eq!(views[0].platform_type, "cozeloop");
        assert_eq!(views[0].span_list_type, "root");
        let tags = config.tags.as_ref().unwrap().catalog.as_ref().unwrap();
        assert_eq!(tags[0].content_type, TagContentType::FreeText);
        assert!(tags[0].active);
    }

    #[test]
    fn test_file_config_parse_extra_fields() {
        let json = r#"{ "server": { "host": "localhost" }, "unknown_field": 123 }"#;
        let config: FileConfig = serde_json::from_str(json).unwrap();
        assert_eq!(
            config.server.as_ref().unwrap().host,
            Some("localhost".to_string())
        );
        assert!(config.extra.get("unknown_field").is_some());
    }

    #[test]
    fn test_file_config_merge() {
        let mut base: FileConfig = serde_json::from_str(
            r#"{ "server": { "host": "a", "port": 1 }, "evaluation": { "max_retries": 2 } }"#,
        )
        .unwrap();
        let overlay: FileConfig = serde_json::from_str(
            r#"{ "server": { "port": 2 }, "evaluation": { "turn_timeout_secs": 9 } }"#,
        )
        .unwrap();
        base.merge(overlay);

        let server = base.server.unwrap();
        assert_eq!(server.host.as_deref(), Some("a"));
        assert_eq!(server.port, Some(2));
        let eval = base.evaluation.unwrap();
        assert_eq!(eval.max_retries, Some(2));
        assert_eq!(eval.turn_timeout_secs, Some(9));
    }

    #[test]
    fn test_app_config_defaults() {
        let config = AppConfig::from_layers(&CliConfig::default(), FileConfig::default());
        assert_eq!(config.server.host, DEFAULT_HOST);
        assert_eq!(config.server.port, DEFAULT_PORT);
        assert_eq!(config.trace.earliest_days, DEFAULT_EARLIEST_DAYS);
        assert_eq!(config.benefit.storage_duration_days, 3);
        assert!(config.benefit.is_enough);
        assert_eq!(config.evaluation.item_concur_num, DEFAULT_ITEM_CONCUR_NUM);
        assert_eq!(config.metrics.backend, MetricsBackend::Noop);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_app_config_cli_override() {
        let file: FileConfig = serde_json::from_str(
            r#"{ "server": { "port": 7000 }, "evaluation": { "item_concur_num": 2 } }"#,
        )
        .unwrap();
        let cli = CliConfig {
            port: Some(3000),
            item_concur_num: Some(9),
            metrics_backend: Some(MetricsBackend::Otel),
            ..Default::default()
        };
        let config = AppConfig::from_layers(&cli, file);
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.evaluation.item_concur_num, 9);
        assert_eq!(config.metrics.backend, MetricsBackend::Otel);
    }

    #[test]
    fn test_app_config_validation_rejects_zero_concurrency() {
        let mut config = AppConfig::from_layers(&CliConfig::default(), FileConfig::default());
        config.evaluation.item_concur_num = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_app_config_validation_rejects_bad_url() {
        let mut config = AppConfig::from_layers(&CliConfig::default(), FileConfig::default());
        config.collaborators.target_url = Some("ftp://nope".to_string());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_app_config_validation_duplicate_system_view() {
        let mut config = AppConfig::from_layers(&CliConfig::default(), FileConfig::default());
        let view = SystemViewConfig {
            id: 1,
            view_name: "v".to_string(),
            platform_type: "cozeloop".to_string(),
            span_list_type: "root".to_string(),
            filters: serde_json::Value::Null,
        };
        config.views.system = vec![view.clone(), view];
        assert!(config.validate().is_err());
    }
}
