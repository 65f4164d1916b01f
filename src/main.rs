//! Notarius - unified CLI entrypoint.
//!
//! Usage:
//!   notarius start --config config/notarius.toml
//!   notarius status [--address HOST:PORT]
//!   notarius config validate --config config/notarius.toml
//!   notarius inspect log --data-dir data
//!   notarius keygen --name notary-1

use anyhow::Result;
use clap::Parser;
use notarius::cli::commands::{run_config, run_inspect, run_keygen, run_status};
use notarius::cli::{Cli, Commands};
use std::path::PathBuf;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config_path = cli
        .config
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config/notarius.toml"));

    match cli.command {
        Commands::Start(_args) => {
            notarius::cli::commands::run_start_with_config(&config_path, cli.log_level.as_deref())
                .await
        }
        Commands::Status(args) => run_status(args).await,
        Commands::Config(args) => run_config(args),
        Commands::Inspect(args) => run_inspect(args),
        Commands::Keygen(args) => run_keygen(args),
    }
}
