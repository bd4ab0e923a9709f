//! # beacon-server
//!
//! HTTP host for the beacon scan service.
//!
//! ## Running
//!
//! ```bash
//! # Development
//! cargo run --package beacon-server -- ./config.toml
//!
//! # Production
//! ./beacon-server /etc/beacon-scan/config.toml
//! ```
//!
//! A path given on the command line must exist. Without one the platform
//! default path is used, and a missing file there means built-in defaults.
//! `BEACON__*` variables override either.

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::Context;
use beacon_core::config::{self, Config};
use beacon_server::api;
use beacon_server::logging;
use beacon_server::state::AppState;
use tokio::net::TcpListener;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let explicit_path = std::env::args_os().nth(1).map(PathBuf::from);
    let config = match &explicit_path {
        Some(path) => Config::load_required(path),
        None => Config::load_or_default(),
    }
    .context("Failed to load configuration")?;
    let config_path = explicit_path.or_else(config::default_path);

    logging::init(config.server.production_logging)?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        config = ?config_path,
        "Starting beacon-server"
    );

    let addr: SocketAddr = config
        .server
        .bind_address
        .parse()
        .context("Invalid bind address")?;

    let (state, tasks) = AppState::start(config)?;
    let app = api::create_router(state.clone());

    let listener = TcpListener::bind(addr).await?;
    info!("Listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Shutting down");
    state.shutdown().await;
    tasks.abort();

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
}
