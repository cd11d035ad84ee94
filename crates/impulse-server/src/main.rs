//! # Impulse Server
//!
//! Real-time signaling relay: senders emit actions for a username, and every
//! receiver registered under it gets them over its WebSocket.
//!
//! ## Usage
//!
//! ```bash
//! # Run with default settings
//! impulse
//!
//! # Run with a specific config file
//! IMPULSE_CONFIG=/path/to/impulse.toml impulse
//!
//! # Run with environment variables
//! IMPULSE_PORT=8080 IMPULSE_HOST=0.0.0.0 IMPULSE__ROUTING__MODE=broadcast impulse
//! ```

mod accounts;
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
                .unwrap_or_else(|_| "impulse=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = config::Config::load()?;

    tracing::info!(
        "Starting Impulse server on {}:{} ({} routing)",
        config.host,
        config.port,
        config.routing.routing_mode().name()
    );

    // Initialize metrics
    metrics::init_metrics();

    // Start the server
    handlers::run_server(config).await?;

    Ok(())
}
