//! Command-line interface.
//!
//! Unified CLI for notary operations.

pub mod commands;

use clap::{Parser, Subcommand};

/// Notarius - distributed notarization service.
#[derive(Parser, Debug)]
#[command(name = "notarius")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Configuration file path.
    #[arg(short, long, global = true)]
    pub config: Option<String>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the notary node.
    Start(commands::StartArgs),
    /// Query a running node's status.
    Status(commands::StatusArgs),
    /// Configuration operations.
    Config(commands::ConfigArgs),
    /// Inspect the commit store and replicated log.
    Inspect(commands::InspectArgs),
    /// Generate a notary signing key.
    Keygen(commands::KeygenArgs),
}
