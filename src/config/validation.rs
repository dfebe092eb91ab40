//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (timeouts > 0, limits > 0, parseable addresses)
//! - Detect conflicting routes and malformed rewrite rules
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ProxyConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::net::SocketAddr;

use crate::config::schema::ProxyConfig;
use crate::routing::rewrite::RewriteError;
use crate::routing::table::compile_routes;

/// A single semantic problem in the configuration.
#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    #[error("route #{index}: prefix must not be empty")]
    EmptyPrefix { index: usize },

    #[error("route prefix `{prefix}` is declared with conflicting websocket flags")]
    ConflictingWebSocket { prefix: String },

    #[error("route `{prefix}`: invalid upstream `{upstream}`: {reason}")]
    InvalidUpstream {
        prefix: String,
        upstream: String,
        reason: String,
    },

    #[error("route `{prefix}`: {source}")]
    Rewrite {
        prefix: String,
        #[source]
        source: RewriteError,
    },

    #[error("invalid address `{address}` for {field}")]
    InvalidAddress { field: &'static str, address: String },

    #[error("{field} must be greater than zero")]
    Zero { field: &'static str },

    #[error("fallback.health_path `{path}` must start with `/` and contain no `{{` or `*`")]
    InvalidHealthPath { path: String },
}

/// Validate a full configuration, collecting every error.
pub fn validate_config(config: &ProxyConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::InvalidAddress {
            field: "listener.bind_address",
            address: config.listener.bind_address.clone(),
        });
    }
    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::InvalidAddress {
            field: "observability.metrics_address",
            address: config.observability.metrics_address.clone(),
        });
    }

    let positive: [(&'static str, u64); 7] = [
        ("listener.max_connections", config.listener.max_connections as u64),
        ("timeouts.connect_secs", config.timeouts.connect_secs),
        ("timeouts.request_secs", config.timeouts.request_secs),
        ("timeouts.idle_secs", config.timeouts.idle_secs),
        ("timeouts.websocket_idle_secs", config.timeouts.websocket_idle_secs),
        (
            "pool.max_connections_per_upstream",
            config.pool.max_connections_per_upstream as u64,
        ),
        ("websocket.max_message_size", config.websocket.max_message_size as u64),
    ];
    for (field, value) in positive {
        if value == 0 {
            errors.push(ValidationError::Zero { field });
        }
    }

    if let Some(path) = &config.fallback.health_path {
        if !path.starts_with('/') || path.contains(['{', '*']) {
            errors.push(ValidationError::InvalidHealthPath { path: path.clone() });
        }
    }

    if let Err(route_errors) = compile_routes(&config.routes) {
        errors.extend(route_errors);
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
