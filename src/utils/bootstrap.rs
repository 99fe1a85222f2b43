//! Bootstrap utilities for the truckfeed binary.
//!
//! Logging setup and the shutdown signal shared by entry points.

use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::LOG_ENV_VAR;

/// Initialize tracing with TRUCKFEED_LOG environment variable.
///
/// Defaults to "info" level if TRUCKFEED_LOG is not set.
pub fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_env(LOG_ENV_VAR)
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Spawn a Ctrl-C listener and return a receiver that flips to `true` on it.
///
/// Must be called from within a tokio runtime.
pub fn shutdown_signal() -> watch::Receiver<bool> {
    let (tx, rx) = watch::channel(false);

    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Shutdown requested, stopping after the current location");
                let _ = tx.send(true);
            }
            Err(e) => {
                // Keep the sender alive so the run is simply not cancellable.
                warn!(error = %e, "Failed to listen for Ctrl-C");
                std::future::pending::<()>().await;
            }
        }
    });

    rx
}
