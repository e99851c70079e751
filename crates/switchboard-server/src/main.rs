//! # Switchboard Server
//!
//! Relay hub that lets game servers find each other and exchange messages.
//!
//! ## Usage
//!
//! ```bash
//! # Run with default settings
//! switchboard
//!
//! # Run with custom config
//! switchboard --config /path/to/switchboard.toml
//!
//! # Run with environment variables
//! SWITCHBOARD_PORT=27200 SWITCHBOARD_ALLOW_LIST="62.226.205.78:27015" switchboard
//! ```

mod config;
mod metrics;
mod server;
mod shutdown;

use anyhow::{bail, Context, Result};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "switchboard=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = match config_path_arg(std::env::args().skip(1))? {
        Some(path) => config::Config::from_file(&path)?.with_env_overrides()?,
        None => config::Config::load()?,
    };

    tracing::info!("Starting Switchboard on {}:{}", config.host, config.port);

    // Initialize metrics
    metrics::init_metrics();

    // Start the server
    server::run_server(config)
        .await
        .context("Relay hub stopped with an error")?;

    Ok(())
}

/// Parse `--config <path>` from the command line.
fn config_path_arg(mut args: impl Iterator<Item = String>) -> Result<Option<PathBuf>> {
    let mut path = None;

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" | "-c" => {
                let value = args.next().context("--config requires a path")?;
                path = Some(PathBuf::from(value));
            }
            other => bail!("Unknown argument: {other}"),
        }
    }

    Ok(path)
}
