//! Upstream connection pool.
//!
//! # Responsibilities
//! - Own the shared HTTP/1.1 client and its keep-alive pool
//! - Bound idle connections per upstream and their idle lifetime
//! - Hand out per-upstream slots that cap in-flight exchanges
//!
//! The pool outlives route table reloads, so counters survive a reload.

use std::sync::Arc;

use axum::body::Body;
use axum::http::uri::Authority;
use dashmap::DashMap;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;

use crate::config::{PoolConfig, TimeoutConfig};
use crate::error::ProxyError;
use crate::upstream::limit::{Upstream, UpstreamGuard};

pub type HttpClient = Client<HttpConnector, Body>;

/// Shared client plus per-upstream accounting.
#[derive(Debug)]
pub struct UpstreamPool {
    client: HttpClient,
    upstreams: DashMap<String, Arc<Upstream>>,
    max_connections_per_upstream: usize,
}

impl UpstreamPool {
    pub fn new(pool: &PoolConfig, timeouts: &TimeoutConfig) -> Self {
        let mut connector = HttpConnector::new();
        connector.set_connect_timeout(Some(timeouts.connect()));
        connector.set_nodelay(true);

        let client = Client::builder(TokioExecutor::new())
            .pool_max_idle_per_host(pool.max_idle_per_host)
            .pool_idle_timeout(std::time::Duration::from_secs(pool.idle_timeout_secs))
            .build(connector);

        Self {
            client,
            upstreams: DashMap::new(),
            max_connections_per_upstream: pool.max_connections_per_upstream,
        }
    }

    pub fn client(&self) -> &HttpClient {
        &self.client
    }

    /// Claim an in-flight slot on `authority`.
    pub fn checkout(&self, authority: &Authority) -> Result<UpstreamGuard, ProxyError> {
        let key = authority.as_str().to_ascii_lowercase();
        let upstream = self
            .upstreams
            .entry(key)
            .or_insert_with(|| Arc::new(Upstream::new(self.max_connections_per_upstream)))
            .clone();

        upstream.try_acquire().ok_or_else(|| {
            tracing::warn!(
                upstream = %authority,
                limit = self.max_connections_per_upstream,
                "Upstream connection limit reached"
            );
            ProxyError::UpstreamBusy {
                authority: authority.to_string(),
            }
        })
    }

    /// In-flight exchanges on `authority`.
    pub fn active(&self, authority: &Authority) -> usize {
        self.upstreams
            .get(&authority.as_str().to_ascii_lowercase())
            .map(|u| u.active())
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn checkout_is_bounded_per_upstream() {
        let pool = UpstreamPool::new(
            &PoolConfig {
                max_connections_per_upstream: 1,
                ..PoolConfig::default()
            },
            &TimeoutConfig::default(),
        );
        let a = Authority::from_static("localhost:8080");
        let b = Authority::from_static("localhost:9090");

        let guard = pool.checkout(&a).unwrap();
        assert!(matches!(
            pool.checkout(&a),
            Err(ProxyError::UpstreamBusy { .. })
        ));
        // Other upstreams are independent.
        let _other = pool.checkout(&b).unwrap();
        assert_eq!(pool.active(&a), 1);

        drop(guard);
        assert_eq!(pool.active(&a), 0);
        assert!(pool.checkout(&a).is_ok());
    }
}
