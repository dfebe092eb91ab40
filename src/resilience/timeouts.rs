//! Timeout enforcement.
//!
//! # Responsibilities
//! - Wrap upstream calls with a deadline
//! - Cancel the wrapped operation cleanly on timeout (drop, not poll)
//! - Report timeouts as a distinct error so clients get 504 / close 1013

use std::future::Future;
use std::time::Duration;

use axum::http::uri::Authority;

use crate::error::ProxyError;

/// Run `fut` against `authority`, failing with `UpstreamTimeout` after `after`.
pub async fn with_timeout<F, T>(authority: &Authority, after: Duration, fut: F) -> Result<T, ProxyError>
where
    F: Future<Output = Result<T, ProxyError>>,
{
    match tokio::time::timeout(after, fut).await {
        Ok(result) => result,
        Err(_) => Err(ProxyError::UpstreamTimeout {
            authority: authority.to_string(),
            after,
        }),
    }
}
