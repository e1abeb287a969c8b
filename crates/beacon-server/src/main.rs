//! # Beacon Server
//!
//! WebSocket bridge between browser clients and a Redis pub/sub bus.
//!
//! ## Usage
//!
//! ```bash
//! # Run with default settings
//! beacon
//!
//! # Run with a custom config file
//! BEACON_CONFIG=/path/to/beacon.toml beacon
//!
//! # Run with environment variables
//! BEACON_PORT=8080 BEACON_BUS__BACKEND=memory beacon
//! ```

mod config;
mod handlers;
mod metrics;

use anyhow::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "beacon=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = config::Config::load()?;

    tracing::info!(
        backend = ?config.bus.backend,
        prefix = %config.bus.prefix,
        "Starting Beacon server on {}:{}",
        config.host,
        config.port
    );

    metrics::init_metrics();

    handlers::run_server(config).await?;

    Ok(())
}
