//! OS signal handling.
//!
//! # Responsibilities
//! - Register signal handlers (SIGTERM, SIGINT, SIGHUP)
//! - Translate signals to internal events
//! - Trigger appropriate actions (shutdown, reload)
//!
//! # Design Decisions
//! - Uses Tokio's signal handling (async-safe)
//! - A second SIGTERM/SIGINT exits without waiting for the drain
//! - SIGHUP triggers config reload, not shutdown

use std::io;
#[cfg(unix)]
use std::path::PathBuf;

#[cfg(unix)]
use tokio::sync::mpsc;

#[cfg(unix)]
use crate::config::{load_config, ProxyConfig};
use crate::lifecycle::Shutdown;
#[cfg(unix)]
use crate::observability::metrics;

/// Exit status used when a second signal cuts the drain short.
const FORCED_EXIT_CODE: i32 = 130;

/// Resolve on SIGINT, or SIGTERM on Unix.
async fn termination_requested() -> io::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut terminate = signal(SignalKind::terminate())?;
        tokio::select! {
            result = tokio::signal::ctrl_c() => result,
            _ = terminate.recv() => Ok(()),
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await
    }
}

/// Trigger `shutdown` on the first termination signal; exit on the second.
pub fn spawn_shutdown_handler(shutdown: Shutdown) {
    tokio::spawn(async move {
        loop {
            if let Err(e) = termination_requested().await {
                tracing::error!(error = %e, "Failed to install shutdown signal handler");
                return;
            }
            if shutdown.trigger() {
                tracing::info!("Shutdown signal received");
            } else {
                tracing::warn!("Second shutdown signal received, exiting without drain");
                std::process::exit(FORCED_EXIT_CODE);
            }
        }
    });
}

/// Reload the config file on SIGHUP and publish it to the server.
#[cfg(unix)]
pub fn spawn_reload_handler(
    path: PathBuf,
    update_tx: mpsc::UnboundedSender<ProxyConfig>,
) -> io::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut hangup = signal(SignalKind::hangup())?;
    tokio::spawn(async move {
        while hangup.recv().await.is_some() {
            tracing::info!(path = %path.display(), "SIGHUP received, reloading config");
            match load_config(&path) {
                Ok(config) => {
                    if update_tx.send(config).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    metrics::record_reload(false);
                    tracing::error!(error = %e, "Failed to reload config, keeping current routes");
                }
            }
        }
    });
    Ok(())
}
