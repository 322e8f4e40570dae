//! Command-line argument definitions.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

/// Personal time tracker.
///
/// Records tagged time intervals locally and keeps them in sync with a
/// remote authority. Tags are `#words` inside a description.
#[derive(Debug, Parser)]
#[command(name = "tally", version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to config file.
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Available subcommands.
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Start a running record now.
    Start {
        /// Description, e.g. "#project fixing the build".
        #[arg(trailing_var_arg = true)]
        description: Vec<String>,
    },

    /// Stop every running record now.
    Stop,

    /// Add a finished record.
    Add(AddArgs),

    /// Hide a record (soft delete).
    Hide {
        /// Record key or unique key prefix.
        key: String,
    },

    /// Restore a hidden record.
    Unhide {
        /// Record key or unique key prefix.
        key: String,
    },

    /// List records overlapping a time range.
    Records(RangeArgs),

    /// Show time per tag combination.
    Stats(RangeArgs),

    /// Show running records and sync state.
    Status,

    /// Push pending changes to the authority and pull new ones.
    Sync,

    /// Export all records as JSONL to stdout.
    Export,

    /// Import records as JSONL from stdin.
    Import,
}

#[derive(Debug, Args)]
pub struct AddArgs {
    /// Start time (RFC 3339 or relative, e.g. "2 hours ago").
    #[arg(long)]
    pub start: String,

    /// End time (RFC 3339, relative, or "now").
    #[arg(long, default_value = "now")]
    pub end: String,

    #[arg(trailing_var_arg = true)]
    pub description: Vec<String>,
}

#[derive(Debug, Args)]
pub struct RangeArgs {
    /// Range start (RFC 3339 or relative). Defaults to one week before the end.
    #[arg(long)]
    pub start: Option<String>,

    /// Range end (RFC 3339, relative, or "now"). Defaults to now.
    #[arg(long)]
    pub end: Option<String>,

    /// Output as JSON.
    #[arg(long)]
    pub json: bool,
}
