//! Config command implementation.

use crate::core::config::Config;
use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use std::path::{Path, PathBuf};

/// Configuration operations.
#[derive(Args, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

/// Config subcommands.
#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Validate a configuration file.
    Validate {
        /// Config file path.
        #[arg(short, long, default_value = "config/notarius.toml")]
        config: PathBuf,
    },
    /// Print the effective configuration with defaults applied.
    Show {
        /// Config file path.
        #[arg(short, long, default_value = "config/notarius.toml")]
        config: PathBuf,
        /// Output format (toml, json).
        #[arg(long, default_value = "toml")]
        format: String,
    },
}

/// Run the config command.
pub fn run_config(args: ConfigArgs) -> Result<()> {
    match args.command {
        ConfigCommand::Validate { config } => validate_config(&config),
        ConfigCommand::Show { config, format } => show_config(&config, &format),
    }
}

fn validate_config(path: &Path) -> Result<()> {
    let config = Config::from_file(path)?;
    println!("ok: {} is valid", path.display());
    println!("  notary:   {} ({})", config.identity.name, config.notary.variant);
    println!("  provider: {}", config.provider.mode);
    if config.is_replicated() {
        println!(
            "  cluster:  node {} of {} members",
            config.cluster.node_id,
            config.cluster.peers.len()
        );
    }
    Ok(())
}

fn show_config(path: &Path, format: &str) -> Result<()> {
    let config = Config::from_file(path)?;
    let rendered = match format {
        "json" => serde_json::to_string_pretty(&config).context("failed to render config")?,
        _ => toml::to_string_pretty(&config).context("failed to render config")?,
    };
    println!("{rendered}");
    Ok(())
}
