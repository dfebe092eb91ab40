//! Startup orchestration.
//!
//! # Responsibilities
//! - Load and validate configuration
//! - Initialize logging and metrics
//! - Start the config watcher and signal handlers
//! - Bind the listener and begin accepting traffic
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal
//! - Subsystems initialize in order, not concurrently
//! - The listener binds last (traffic only when ready)

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use tokio::sync::mpsc;

use crate::config::watcher::ConfigWatcher;
use crate::config::{load_config, validate_config, ConfigError, ProxyConfig};
use crate::http::HttpServer;
use crate::lifecycle::{signals, Shutdown};
use crate::net::{Listener, ListenerError};
use crate::observability::{logging, metrics};

/// Config file looked up when none is given on the command line.
pub const DEFAULT_CONFIG_PATH: &str = "route-proxy.toml";

#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("failed to initialize logging: {0}")]
    Logging(#[from] tracing_subscriber::util::TryInitError),

    #[error("failed to start metrics exporter: {0}")]
    Metrics(#[from] metrics_exporter_prometheus::BuildError),

    #[error("failed to watch config file: {0}")]
    Watch(#[from] notify::Error),

    #[error(transparent)]
    Listener(#[from] ListenerError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Command-line overrides.
#[derive(Debug, Clone, Default)]
pub struct StartupOptions {
    /// Explicit config file. Without one, [`DEFAULT_CONFIG_PATH`] is used if present.
    pub config_path: Option<PathBuf>,
    /// Overrides `listener.bind_address`.
    pub bind: Option<String>,
    /// Reload routes when the config file changes.
    pub watch: bool,
}

/// Resolve the effective configuration and the file it came from.
///
/// An explicitly named file must exist. When none is named and the default
/// file is absent, the built-in dev route set is used.
pub fn resolve_config(
    options: &StartupOptions,
) -> Result<(ProxyConfig, Option<PathBuf>), ConfigError> {
    let (mut config, source) = match &options.config_path {
        Some(path) => (load_config(path)?, Some(path.clone())),
        None => {
            let default = Path::new(DEFAULT_CONFIG_PATH);
            if default.exists() {
                (load_config(default)?, Some(default.to_path_buf()))
            } else {
                (ProxyConfig::dev_defaults(), None)
            }
        }
    };

    if let Some(bind) = &options.bind {
        config.listener.bind_address = bind.clone();
        validate_config(&config).map_err(ConfigError::Validation)?;
    }
    Ok((config, source))
}

/// Load and validate a config file without serving it.
pub fn check(path: &Path) -> Result<ProxyConfig, ConfigError> {
    load_config(path)
}

/// Start the proxy and run until shutdown completes.
pub async fn run(options: StartupOptions) -> Result<(), StartupError> {
    let (config, source) = resolve_config(&options)?;
    logging::init(&config.observability)?;

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "route-proxy starting");
    match &source {
        Some(path) => tracing::info!(path = %path.display(), "Configuration loaded"),
        None => tracing::info!("No config file found, using built-in dev routes"),
    }
    tracing::info!(
        bind_address = %config.listener.bind_address,
        max_connections = config.listener.max_connections,
        request_timeout_secs = config.timeouts.request_secs,
        routes = config.routes.len(),
        "Configuration ready"
    );

    let server = HttpServer::new(config.clone())?;

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse::<SocketAddr>() {
            Ok(addr) => metrics::init_metrics(addr)?,
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let shutdown = Shutdown::new();
    let (update_tx, update_rx) = mpsc::unbounded_channel();

    let _watcher = match (&source, options.watch) {
        (Some(path), true) => Some(ConfigWatcher::new(path, update_tx.clone()).run()?),
        _ => None,
    };
    #[cfg(unix)]
    {
        if let Some(path) = &source {
            signals::spawn_reload_handler(path.clone(), update_tx.clone())?;
        }
    }
    signals::spawn_shutdown_handler(shutdown.clone());

    let listener = Listener::bind(&config.listener).await?;
    server.serve(listener, update_rx, shutdown.subscribe()).await?;

    drop(update_tx);
    tracing::info!("Shutdown complete");
    Ok(())
}
