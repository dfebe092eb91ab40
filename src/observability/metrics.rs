//! Metrics collection and exposition.
//!
//! # Metrics
//! - `proxy_requests_total` (counter): requests by route, mode, status
//! - `proxy_request_duration_seconds` (histogram): time to response headers
//! - `proxy_upstream_errors_total` (counter): upstream failures by kind
//! - `proxy_active_connections` (gauge): live connections by kind
//! - `proxy_route_reloads_total` (counter): route table swaps by outcome
//!
//! Recording is a no-op until a recorder is installed, so tests and the
//! `check` command pay nothing.

use std::net::SocketAddr;
use std::time::Instant;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

use crate::net::ConnectionKind;

/// Install the Prometheus recorder and its scrape endpoint.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Metrics endpoint listening");
    Ok(())
}

/// Record a proxied request.
pub fn record_request(route: &str, mode: &'static str, status: u16, start: Instant) {
    let labels = [
        ("route", route.to_string()),
        ("mode", mode.to_string()),
        ("status", status.to_string()),
    ];
    counter!("proxy_requests_total", &labels).increment(1);
    histogram!("proxy_request_duration_seconds", &labels[..2]).record(start.elapsed().as_secs_f64());
}

/// Record an upstream failure (`unreachable`, `timeout`, `busy`, ...).
pub fn record_upstream_error(kind: &'static str) {
    counter!("proxy_upstream_errors_total", "kind" => kind).increment(1);
}

pub fn record_reload(ok: bool) {
    let outcome = if ok { "ok" } else { "rejected" };
    counter!("proxy_route_reloads_total", "outcome" => outcome).increment(1);
}

pub fn connection_opened(kind: ConnectionKind) {
    gauge!("proxy_active_connections", "kind" => kind.as_str()).increment(1.0);
}

pub fn connection_closed(kind: ConnectionKind) {
    gauge!("proxy_active_connections", "kind" => kind.as_str()).decrement(1.0);
}
