//! # turfcast
//!
//! Live activity overlay server: follows one Turf player and pushes
//! their feed, stats, and presence to connected viewers over SSE.
//!
//! ## Usage
//!
//! ```bash
//! # Run, tracking a user
//! TURFCAST_USERNAME=alice turfcast
//!
//! # Run with a config file (turfcast.toml in the working directory,
//! # /etc/turfcast/, or ~/.config/turfcast/)
//! turfcast
//! ```

mod config;
mod handlers;
mod metrics;
mod tasks;

use anyhow::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "turfcast=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let mut config = config::Config::load()?;
    config.validate()?;

    tracing::info!(
        "Starting turfcast on {}:{}, tracking {}",
        config.host,
        config.port,
        config.tracked_user
    );

    // Initialize metrics
    metrics::init_metrics();

    // Start the server
    handlers::run_server(config).await?;

    Ok(())
}
