//! Edge Shield
//!
//! Security front for HTTP services, built with Tokio and Axum.
//!
//! # Architecture Overview
//!
//! ```text
//!                   ┌──────────────────────────────────────────────────────────┐
//!                   │                       EDGE SHIELD                        │
//!                   │                                                          │
//!  Client Request   │  ┌──────────┐  ┌───────────┐  ┌────────────┐  ┌───────┐ │
//!  ─────────────────┼─▶│ security │─▶│ reporting │─▶│ rate limit │─▶│ body  │ │
//!                   │  │ headers  │  │ headers   │  │ (per key)  │  │parser │ │
//!                   │  └──────────┘  └───────────┘  └─────┬──────┘  └───┬───┘ │
//!                   │                                     │ 429         │     │
//!  Client Response  │                                     ▼             ▼     │
//!  ◀────────────────┼──────────── headers stamped ◀── rejection  report sink │
//!                   │                                              / 404     │
//!                   │  ┌────────────────────────────────────────────────────┐ │
//!                   │  │  config · observability · lifecycle · sweeper      │ │
//!                   │  └────────────────────────────────────────────────────┘ │
//!                   └──────────────────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;

use clap::Parser;

use edge_shield::config::loader::{self, CONFIG_PATH_ENV};
use edge_shield::lifecycle::startup;
use edge_shield::observability::logging;

#[derive(Parser, Debug)]
#[command(name = "edge-shield", version, about = "Rate limiting and security headers for HTTP services")]
struct Args {
    /// Path to a TOML configuration file
    #[arg(short, long, env = CONFIG_PATH_ENV)]
    config: Option<PathBuf>,

    /// Listen port (overrides the file and PORT)
    #[arg(short, long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let mut config = loader::load(args.config.as_deref())?;
    if let Some(port) = args.port {
        config.listener.port = port;
    }

    logging::init(&config.observability);
    tracing::info!("edge-shield v{} starting", env!("CARGO_PKG_VERSION"));
    tracing::info!(
        bind_address = %config.listener.bind_address(),
        window_ms = config.rate_limit.window_ms,
        max_requests = config.rate_limit.max_requests,
        request_timeout_secs = config.timeouts.request_secs,
        "Configuration loaded"
    );

    startup::run(config).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
