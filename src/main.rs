//! Validator registry tools - staking, unstaking and event bookkeeping
//!
//! Every transaction goes through one retrying sender that replaces stuck
//! submissions at the same nonce with boosted fees until they are included.

use anyhow::Result;
use clap::Parser;
use tokio::signal;
use tokio::sync::watch;
use tracing::{info, warn};

mod chain;
mod cli;
mod config;
mod error;
mod registry;
mod tx;

use cli::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    init_logging(cli.json_logs);

    info!("Starting registry-tools v{}", env!("CARGO_PKG_VERSION"));

    // Ctrl+C / SIGTERM abandon the current inclusion wait
    let (cancel_tx, cancel_rx) = watch::channel(false);
    let signal_handle = tokio::spawn(async move {
        shutdown_signal().await;
        warn!("Shutdown signal received, cancelling pending submission...");
        let _ = cancel_tx.send(true);
    });

    let result = cli.run(cancel_rx).await;
    signal_handle.abort();

    result
}

fn init_logging(json: bool) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,registry_tools=debug,hyper=warn"));

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(fmt::layer().json().with_target(true)).init();
    } else {
        registry
            .with(fmt::layer().with_target(true).with_thread_ids(true))
            .init();
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
