//! CLI argument definitions using clap derive

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use crate::cli::commands::{
    completions::CompletionsArgs, init::InitArgs, schema::SchemaArgs, status::StatusArgs,
    sync::SyncArgs,
};

#[derive(Parser)]
#[command(name = "plansync")]
#[command(author, version, about = "Keep plan documents and the work-item store in sync")]
#[command(long_about = "Reconciles epic, feature and task markdown files with a SQLite work-item store under a named resolution strategy.")]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    #[command(flatten)]
    pub global: GlobalOpts,
}

#[derive(clap::Args, Clone, Debug)]
pub struct GlobalOpts {
    /// Output format
    #[arg(long, short = 'f', global = true, default_value = "auto")]
    pub format: OutputFormat,

    /// Suppress non-essential output
    #[arg(long, short = 'q', global = true)]
    pub quiet: bool,

    /// Enable verbose output (debug logging)
    #[arg(long, short = 'v', global = true)]
    pub verbose: bool,

    /// Project root (default: auto-detect by finding .plansync/)
    #[arg(long, global = true)]
    pub project: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Initialize a new plansync project
    Init(InitArgs),

    /// Synchronize plan documents into the store
    Sync(SyncArgs),

    /// Show store contents and the last sync time
    Status(StatusArgs),

    /// Print or check against the scan report JSON schema
    Schema(SchemaArgs),

    /// Generate shell completions
    Completions(CompletionsArgs),
}

#[derive(ValueEnum, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum OutputFormat {
    /// Human-readable output on a terminal
    #[default]
    Auto,
    /// JSON format (for programming)
    Json,
}
