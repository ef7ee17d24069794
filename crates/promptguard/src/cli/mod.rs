//! Command-line interface for promptguard.
//!
//! This module provides the CLI structure for the `promptguard` binary.

mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

pub use commands::{
    ClearCommand, ConfigCommand, DismissCommand, DismissEmailCommand, IssuesCommand, ScanCommand,
    StatusCommand,
};

/// promptguard - Keep email addresses out of chat prompts
///
/// Redacts email addresses from outgoing chat requests and keeps a record of
/// each detection so it can be reviewed, dismissed or snoozed.
#[derive(Debug, Parser)]
#[command(name = "promptguard")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to custom configuration file
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Increase verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// The command to execute
    #[command(subcommand)]
    pub command: Command,
}

/// Available commands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the coordinator, reading JSON actions from stdin
    Serve,

    /// Redact a request body read from stdin and record detections
    Scan(ScanCommand),

    /// List recorded issues
    Issues(IssuesCommand),

    /// Show store statistics
    Status(StatusCommand),

    /// Dismiss a single issue
    Dismiss(DismissCommand),

    /// Snooze every issue for an address
    DismissEmail(DismissEmailCommand),

    /// Remove all issues and snoozes
    Clear(ClearCommand),

    /// Reactivate issues whose snooze has lapsed
    Reconcile,

    /// View or validate configuration
    #[command(subcommand)]
    Config(ConfigCommand),
}

impl Cli {
    /// Get the verbosity level based on flags.
    #[must_use]
    pub fn verbosity(&self) -> crate::logging::Verbosity {
        if self.quiet {
            crate::logging::Verbosity::Quiet
        } else {
            match self.verbose {
                0 => crate::logging::Verbosity::Normal,
                1 => crate::logging::Verbosity::Verbose,
                _ => crate::logging::Verbosity::Trace,
            }
        }
    }
}
