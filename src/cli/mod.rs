//! Command-line interface

pub mod commands;
pub mod output;

use clap::{Parser, Subcommand};
use commands::{HistoryCommand, RunCommand, ShowCommand, StatsCommand, ValidateCommand};
use std::ffi::OsString;

/// Multi-agent DevSecOps pipeline orchestrator
#[derive(Debug, Parser, Clone)]
#[command(name = "vedops")]
#[command(version)]
#[command(about = "Run AI agent pipelines for code analysis, build, security, deployment and governance", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

/// Available commands
#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Run a pipeline
    Run(RunCommand),

    /// Validate a pipeline configuration
    Validate(ValidateCommand),

    /// Show run history
    History(HistoryCommand),

    /// Show one recorded run
    Show(ShowCommand),

    /// Summarize recent runs
    Stats(StatsCommand),

    /// List the built-in agent roles
    Roles,
}

impl Cli {
    /// Parse CLI arguments from environment
    pub fn from_args() -> Self {
        Self::parse()
    }

    /// Parse CLI arguments from a slice
    pub fn try_parse_from<I, T>(itr: I) -> Result<Self, clap::Error>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        <Self as Parser>::try_parse_from(itr)
    }
}
