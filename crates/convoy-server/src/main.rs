//! # Convoy Server
//!
//! Presence, chat and notification server for a transport operator.
//!
//! ## Usage
//!
//! ```bash
//! # Run with default settings
//! convoy
//!
//! # Run with a specific config file
//! convoy --config /path/to/convoy.toml
//!
//! # Run with environment overrides
//! CONVOY__PORT=8080 CONVOY__HOST=0.0.0.0 convoy
//! ```
//!
//! Clients connect over WebSocket, `join` with their identity, and then
//! receive chat messages, notifications and (admins) driver presence.
//! Producers create notifications through the REST API.

mod api;
mod config;
mod handlers;
mod metrics;

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Command-line arguments.
#[derive(Debug, Parser)]
#[command(name = "convoy", version, about = "Presence, chat and notification server")]
struct Args {
    /// Read configuration from this TOML file instead of the default search path.
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "convoy=debug,convoy_core=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = match args.config {
        Some(path) => config::Config::from_file(path)?,
        None => config::Config::load()?,
    };

    tracing::info!("Starting Convoy server on {}:{}", config.host, config.port);

    metrics::init_metrics();

    handlers::run_server(config).await?;

    Ok(())
}
