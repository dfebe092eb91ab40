//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the proxy.
//! All types derive Serde traits for deserialization from config files.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::routing::rewrite::RewriteSpec;

/// Root configuration for the proxy.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ProxyConfig {
    /// Listener configuration (bind address, connection limit).
    pub listener: ListenerConfig,

    /// Ordered route definitions. Declaration order is match order.
    pub routes: Vec<RouteSpec>,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Upstream connection pool settings.
    pub pool: PoolConfig,

    /// WebSocket relay settings.
    pub websocket: WebSocketConfig,

    /// Local handling for requests no route claims.
    pub fallback: FallbackConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

impl ProxyConfig {
    /// Config used when no file is present: the dev-server route set.
    pub fn dev_defaults() -> Self {
        Self {
            routes: RouteSpec::dev_defaults(),
            ..Self::default()
        }
    }
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "127.0.0.1:5173").
    pub bind_address: String,

    /// Maximum concurrent client connections (backpressure).
    pub max_connections: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1:5173".to_string(),
            max_connections: 1024,
        }
    }
}

/// A single forwarding rule as authored.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct RouteSpec {
    /// Optional display name for logs and metrics; defaults to the prefix.
    pub name: Option<String>,

    /// Literal path prefix to match.
    pub prefix: String,

    /// Upstream authority (`host:port`) or `http://` / `ws://` URL.
    pub upstream: String,

    /// Upgrade requests on this route are relayed as WebSocket pipes.
    pub websocket: bool,

    /// Replace the handshake `Origin` with the upstream's own origin.
    pub rewrite_ws_origin: bool,

    /// Forward the client's `Host` header instead of the upstream authority.
    pub preserve_host: bool,

    /// Optional path rewrite.
    pub rewrite: Option<RewriteSpec>,
}

impl Default for RouteSpec {
    fn default() -> Self {
        Self {
            name: None,
            prefix: String::new(),
            upstream: String::new(),
            websocket: false,
            rewrite_ws_origin: false,
            preserve_host: true,
            rewrite: None,
        }
    }
}

impl RouteSpec {
    /// The route set a front-end dev server uses against a backend on :8080.
    pub fn dev_defaults() -> Vec<RouteSpec> {
        vec![
            RouteSpec {
                prefix: "/server/ws".into(),
                upstream: "ws://localhost:8080".into(),
                websocket: true,
                rewrite_ws_origin: true,
                ..RouteSpec::default()
            },
            RouteSpec {
                prefix: "/server".into(),
                upstream: "http://localhost:8080".into(),
                preserve_host: false,
                rewrite: Some(RewriteSpec::StripPrefix("/server".into())),
                ..RouteSpec::default()
            },
            RouteSpec {
                prefix: "/result".into(),
                upstream: "http://localhost:8080".into(),
                preserve_host: false,
                ..RouteSpec::default()
            },
        ]
    }
}

/// Timeout configuration for various operations.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Upstream connection establishment timeout in seconds.
    pub connect_secs: u64,

    /// Time to wait for upstream response headers in seconds.
    pub request_secs: u64,

    /// Idle bound between body frames and for request headers, in seconds.
    pub idle_secs: u64,

    /// WebSocket pipe idle bound (no frame in either direction), in seconds.
    pub websocket_idle_secs: u64,

    /// How long shutdown waits for in-flight connections before forcing.
    pub shutdown_drain_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect_secs: 5,
            request_secs: 30,
            idle_secs: 60,
            websocket_idle_secs: 300,
            shutdown_drain_secs: 10,
        }
    }
}

impl TimeoutConfig {
    pub fn connect(&self) -> Duration {
        Duration::from_secs(self.connect_secs)
    }

    pub fn request(&self) -> Duration {
        Duration::from_secs(self.request_secs)
    }

    pub fn idle(&self) -> Duration {
        Duration::from_secs(self.idle_secs)
    }

    pub fn websocket_idle(&self) -> Duration {
        Duration::from_secs(self.websocket_idle_secs)
    }

    pub fn shutdown_drain(&self) -> Duration {
        Duration::from_secs(self.shutdown_drain_secs)
    }
}

/// Upstream connection pool configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Idle keep-alive connections kept per upstream.
    pub max_idle_per_host: usize,

    /// Idle connections older than this are closed, in seconds.
    pub idle_timeout_secs: u64,

    /// Maximum in-flight exchanges per upstream; excess requests get 503.
    pub max_connections_per_upstream: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_idle_per_host: 32,
            idle_timeout_secs: 90,
            max_connections_per_upstream: 256,
        }
    }
}

/// WebSocket relay configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct WebSocketConfig {
    /// Largest message accepted from either side, in bytes.
    pub max_message_size: usize,
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            max_message_size: 64 << 20,
        }
    }
}

/// Local fallback configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct FallbackConfig {
    /// Directory of built front-end assets served for unmatched paths.
    pub static_dir: Option<PathBuf>,

    /// Liveness endpoint answered locally with `ok`.
    pub health_path: Option<String>,
}

impl Default for FallbackConfig {
    fn default() -> Self {
        Self {
            static_dir: None,
            health_path: Some("/healthz".to_string()),
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Log output format.
    pub log_format: LogFormat,

    /// Enable the Prometheus metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9090".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Pretty,
    Compact,
    Json,
}
