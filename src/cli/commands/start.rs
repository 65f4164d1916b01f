//! Start command implementation.

use crate::core::config::Config;
use crate::core::runtime::Runtime;
use anyhow::{Context, Result};
use clap::Args;
use std::path::Path;

/// Start the notary node.
#[derive(Args, Debug)]
pub struct StartArgs {
    // No additional arguments - config is handled globally
}

fn init_tracing(log_level: Option<&str>) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level.unwrap_or("info")));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true))
        .with(filter)
        .init();
}

/// Run the start command with the given config path.
pub async fn run_start_with_config(config_path: &Path, log_level: Option<&str>) -> Result<()> {
    init_tracing(log_level);

    let config = Config::from_file(config_path)
        .with_context(|| format!("failed to load config from {config_path:?}"))?;

    let mut runtime = Runtime::new(config)?;
    runtime.start().await?;
    runtime.run().await
}
