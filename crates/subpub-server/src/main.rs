//! # Subpub Server
//!
//! Streaming publish/subscribe server.
//!
//! ## Usage
//!
//! ```bash
//! # Run with default settings
//! subpub
//!
//! # Run with environment overrides
//! SUBPUB_PORT=8080 SUBPUB_HOST=0.0.0.0 subpub
//!
//! # Subscribe and publish
//! websocat ws://127.0.0.1:50051/subscribe/news
//! curl -X POST --data 'hello' http://127.0.0.1:50051/publish/news
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
                .unwrap_or_else(|_| "subpub=debug,subpub_core=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = config::Config::load()?;

    tracing::info!("Starting subpub server on {}:{}", config.host, config.port);

    // Run until shutdown
    handlers::run_server(config).await?;

    Ok(())
}
