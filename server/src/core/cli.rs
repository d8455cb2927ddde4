use clap::{Parser, Subcommand};

use std::path::PathBuf;

use super::config::MetricsBackend;
use super::constants::{
    ENV_BENEFIT_STORAGE_DAYS, ENV_CONFIG, ENV_EVAL_EVALUATOR_CONCUR_NUM, ENV_EVAL_ITEM_CONCUR_NUM,
    ENV_EVALUATOR_URL, ENV_HOST, ENV_METRICS_BACKEND, ENV_PORT, ENV_TARGET_URL,
    ENV_TRACE_EARLIEST_DAYS, ENV_TRACE_MAX_SPANS_PER_WORKSPACE,
};

#[derive(Parser)]
#[command(name = "loupe")]
#[command(version, about = "LLM trace observability and evaluation server", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Server host address
    #[arg(long, short = 'H', global = true, env = ENV_HOST)]
    pub host: Option<String>,

    /// Server port
    #[arg(long, short = 'p', global = true, env = ENV_PORT)]
    pub port: Option<u16>,

    /// Path to config file
    #[arg(long, short = 'c', global = true, env = ENV_CONFIG)]
    pub config: Option<PathBuf>,

    /// Oldest day a span query window may reach
    #[arg(long, global = true, env = ENV_TRACE_EARLIEST_DAYS)]
    pub trace_earliest_days: Option<i64>,

    /// Span quota per workspace (unset = unlimited)
    #[arg(long, global = true, env = ENV_TRACE_MAX_SPANS_PER_WORKSPACE)]
    pub trace_max_spans_per_workspace: Option<u64>,

    /// Storage duration in days granted by the local benefit oracle
    #[arg(long, global = true, env = ENV_BENEFIT_STORAGE_DAYS)]
    pub benefit_storage_days: Option<i64>,

    /// Default item-level concurrency for experiments
    #[arg(long, global = true, env = ENV_EVAL_ITEM_CONCUR_NUM)]
    pub item_concur_num: Option<usize>,

    /// Default evaluator concurrency within a turn
    #[arg(long, global = true, env = ENV_EVAL_EVALUATOR_CONCUR_NUM)]
    pub evaluator_concur_num: Option<usize>,

    /// HTTP endpoint invoked as the evaluation target
    #[arg(long, global = true, env = ENV_TARGET_URL)]
    pub target_url: Option<String>,

    /// HTTP endpoint invoked for evaluator scoring
    #[arg(long, global = true, env = ENV_EVALUATOR_URL)]
    pub evaluator_url: Option<String>,

    /// Metrics backend (noop or otel)
    #[arg(long, global = true, env = ENV_METRICS_BACKEND, value_parser = parse_metrics_backend)]
    pub metrics_backend: Option<MetricsBackend>,
}

/// Parse metrics backend from CLI/env string
fn parse_metrics_backend(s: &str) -> Result<MetricsBackend, String> {
    match s.to_lowercase().as_str() {
        "noop" | "none" => Ok(MetricsBackend::Noop),
        "otel" | "opentelemetry" => Ok(MetricsBackend::Otel),
        _ => Err(format!(
            "Invalid metrics backend '{}'. Valid options: noop, otel",
            s
        )),
    }
}

#[derive(Subcommand, Clone, Debug)]
pub enum Commands {
    /// Start the server (default command)
    Start,
    /// System maintenance commands
    System {
        #[command(subcommand)]
        command: SystemCommands,
    },
}

#[derive(Subcommand, Clone, Debug)]
pub enum SystemCommands {
    /// Delete local data directory (span store, metadata). Requires confirmation.
    Prune {
        /// Skip confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },
}

/// Configuration derived from CLI arguments
#[derive(Debug, Clone, Default)]
pub struct CliConfig {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub config: Option<PathBuf>,
    pub trace_earliest_days: Option<i64>,
    pub trace_max_spans_per_workspace: Option<u64>,
    pub benefit_storage_days: Option<i64>,
    pub item_concur_num: Option<usize>,
    pub evaluator_concur_num: Option<usize>,
    pub target_url: Option<String>,
    pub evaluator_url: Option<String>,
    pub metrics_backend: Option<MetricsBackend>,
}

/// Parse CLI arguments and return config with command
pub fn parse() -> (CliConfig, Option<Commands>) {
    let cli = Cli::parse();
    let config = CliConfig {
        host: cli.host,
        port: cli.port,
        config: cli.config,
        trace_earliest_days: cli.trace_earliest_days,
        trace_max_spans_per_workspace: cli.trace_max_spans_per_workspace,
        benefit_storage_days: cli.benefit_storage_days,
        item_concur_num: cli.item_concur_num,
        evaluator_concur_num: cli.evaluator_concur_num,
        target_url: cli.target_url,
        evaluator_url: cli.evaluator_url,
        metrics_backend: cli.metrics_backend,
    };
    (config, cli.command)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_metrics_backend() {
        assert_eq!(parse_metrics_backend("noop"), Ok(MetricsBackend::Noop));
        assert_eq!(parse_metrics_backend("OTEL"), Ok(MetricsBackend::Otel));
        assert!(parse_metrics_backend("prometheus").is_err());
    }

    #[test]
    fn test_cli_parses_flags() {
        let cli = Cli::parse_from([
            "loupe",
            "--port",
            "9000",
            "--item-concur-num",
            "8",
            "start",
        ]);
        assert_eq!(cli.port, Some(9000));
        assert_eq!(cli.item_concur_num, Some(8));
        assert!(matches!(cli.command, Some(Commands::Start)));
    }
}
