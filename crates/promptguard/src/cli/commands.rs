//! CLI command definitions.
//!
//! This module defines the structure of all CLI subcommands.

use std::path::PathBuf;

use clap::{Args, Subcommand};

/// Scan command arguments.
#[derive(Debug, Args)]
pub struct ScanCommand {
    /// URL the body would be posted to
    #[arg(short, long)]
    pub url: String,

    /// Scan and print without recording detections
    #[arg(long)]
    pub dry_run: bool,
}

/// Issues command arguments.
#[derive(Debug, Args)]
pub struct IssuesCommand {
    /// Show issues awaiting review, grouped by address (default)
    #[arg(long, conflicts_with = "history")]
    pub active: bool,

    /// Show every issue, newest first
    #[arg(long)]
    pub history: bool,

    /// Output as JSON
    #[arg(short, long)]
    pub json: bool,
}

/// Status command arguments.
#[derive(Debug, Args)]
pub struct StatusCommand {
    /// Output as JSON
    #[arg(short, long)]
    pub json: bool,
}

/// Dismiss command arguments.
#[derive(Debug, Args)]
pub struct DismissCommand {
    /// Identifier of the issue
    pub id: String,
}

/// Dismiss-email command arguments.
#[derive(Debug, Args)]
pub struct DismissEmailCommand {
    /// Address to snooze, matched exactly
    pub email: String,
}

/// Clear command arguments.
#[derive(Debug, Args)]
pub struct ClearCommand {
    /// Skip confirmation
    #[arg(short, long)]
    pub yes: bool,
}

/// Configuration commands.
#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Show current configuration
    Show {
        /// Output as JSON
        #[arg(short, long)]
        json: bool,
    },

    /// Show configuration file path
    Path,

    /// Validate configuration file
    Validate {
        /// Path to config file to validate
        #[arg(short, long)]
        file: Option<PathBuf>,
    },
}
