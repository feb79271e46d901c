//! CLI command definitions

use clap::Args;
use std::path::PathBuf;

/// Run a pipeline
#[derive(Debug, Args, Clone)]
pub struct RunCommand {
    /// Path to pipeline YAML file
    #[arg(short, long)]
    pub file: PathBuf,

    /// Use the offline echo provider instead of the configured LLM
    #[arg(long)]
    pub offline: bool,

    /// Run one stage at a time
    #[arg(long, conflicts_with = "max_parallel")]
    pub sequential: bool,

    /// Override max_parallel_agents
    #[arg(long)]
    pub max_parallel: Option<usize>,

    /// Variable overrides (key=value)
    #[arg(long, value_parser = parse_key_value)]
    pub var: Vec<(String, String)>,

    /// Don't save the run to history
    #[arg(long)]
    pub no_history: bool,

    /// History database path (defaults to the user data directory)
    #[arg(long)]
    pub db: Option<PathBuf>,

    /// Also write every notification event to the log
    #[arg(long)]
    pub log_events: bool,
}

/// Validate a pipeline configuration
#[derive(Debug, Args, Clone)]
pub struct ValidateCommand {
    /// Path to pipeline YAML file
    #[arg(short, long)]
    pub file: PathBuf,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

/// Show run history
#[derive(Debug, Args, Clone)]
pub struct HistoryCommand {
    /// Pipeline name to filter by
    #[arg(short, long)]
    pub pipeline: Option<String>,

    /// Number of recent runs to show
    #[arg(short, long, default_value_t = 10)]
    pub limit: usize,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,

    /// History database path
    #[arg(long)]
    pub db: Option<PathBuf>,
}

/// Show run statistics
#[derive(Debug, Args, Clone)]
pub struct StatsCommand {
    /// Pipeline name to filter by
    #[arg(short, long)]
    pub pipeline: Option<String>,

    /// Only count runs started in the last N days
    #[arg(short, long, default_value_t = 30)]
    pub days: i64,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,

    /// History database path
    #[arg(long)]
    pub db: Option<PathBuf>,
}

/// Show one recorded run
#[derive(Debug, Args, Clone)]
pub struct ShowCommand {
    /// Run ID
    pub run_id: String,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,

    /// History database path
    #[arg(long)]
    pub db: Option<PathBuf>,
}

/// Parse key=value pairs
pub fn parse_key_value(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_string(), value.to_string()))
        }
        _ => Err(format!("Invalid key=value pair: {}", s)),
    }
}
