//! Per-upstream in-flight accounting.
//!
//! # Responsibilities
//! - Count exchanges currently using an upstream
//! - Enforce the per-upstream maximum
//! - Release the slot when the exchange ends, however it ends

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// In-flight count for one upstream authority.
#[derive(Debug)]
pub struct Upstream {
    /// Maximum concurrent exchanges allowed.
    pub max_connections: usize,
    active_connections: AtomicUsize,
}

impl Upstream {
    pub fn new(max_connections: usize) -> Self {
        Self {
            max_connections,
            active_connections: AtomicUsize::new(0),
        }
    }

    /// Current number of in-flight exchanges.
    pub fn active(&self) -> usize {
        self.active_connections.load(Ordering::Relaxed)
    }

    /// Claim a slot, or `None` when the upstream is saturated.
    pub fn try_acquire(self: &Arc<Self>) -> Option<UpstreamGuard> {
        let mut prev = self.active_connections.load(Ordering::Relaxed);
        loop {
            if prev >= self.max_connections {
                return None;
            }
            match self.active_connections.compare_exchange_weak(
                prev,
                prev + 1,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(x) => prev = x,
            }
        }
        Some(UpstreamGuard {
            upstream: Arc::clone(self),
        })
    }
}

/// RAII slot on an upstream; released on drop.
#[derive(Debug)]
pub struct UpstreamGuard {
    upstream: Arc<Upstream>,
}

impl Drop for UpstreamGuard {
    fn drop(&mut self) {
        self.upstream.active_connections.fetch_sub(1, Ordering::AcqRel);
    }
}
