//! Connection lifecycle tracking.
//!
//! # Responsibilities
//! - Generate unique connection IDs for tracing
//! - Count live client connections and WebSocket pipes
//! - Broadcast the shutdown phase (Serving → Draining → Forced)
//! - Let shutdown wait for the count to reach zero without polling

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::watch;

use crate::observability::metrics;

/// Global atomic counter for connection IDs.
/// Using relaxed ordering is sufficient since we only need uniqueness, not synchronization.
static CONNECTION_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Generate a new unique connection ID.
    pub fn new() -> Self {
        Self(CONNECTION_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// What a tracked connection is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionKind {
    /// An inbound HTTP/1.1 connection.
    Http,
    /// An upgraded client/upstream WebSocket pipe.
    WebSocket,
}

impl ConnectionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionKind::Http => "http",
            ConnectionKind::WebSocket => "websocket",
        }
    }
}

/// Server-wide shutdown phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ShutdownPhase {
    /// Accepting and serving normally.
    Serving,
    /// No new connections; in-flight work may finish.
    Draining,
    /// Drain deadline passed; everything still open must close now.
    Forced,
}

#[derive(Debug)]
struct TrackerInner {
    active: watch::Sender<u64>,
    phase: watch::Sender<ShutdownPhase>,
}

/// Tracks live connections and coordinates their shutdown.
#[derive(Debug, Clone)]
pub struct ConnectionTracker {
    inner: Arc<TrackerInner>,
}

impl ConnectionTracker {
    pub fn new() -> Self {
        let (active, _) = watch::channel(0);
        let (phase, _) = watch::channel(ShutdownPhase::Serving);
        Self {
            inner: Arc::new(TrackerInner { active, phase }),
        }
    }

    /// Record a new live connection. Returns a guard that releases it on drop.
    pub fn track(&self, kind: ConnectionKind) -> ConnectionGuard {
        self.inner.active.send_modify(|n| *n += 1);
        metrics::connection_opened(kind);
        ConnectionGuard {
            inner: Arc::clone(&self.inner),
            id: ConnectionId::new(),
            kind,
        }
    }

    /// Current live connection count (HTTP connections plus WebSocket pipes).
    pub fn active_count(&self) -> u64 {
        *self.inner.active.borrow()
    }

    /// Resolve once no connection is live.
    pub async fn wait_idle(&self) {
        let mut rx = self.inner.active.subscribe();
        let _ = rx.wait_for(|n| *n == 0).await;
    }

    pub fn phase(&self) -> ShutdownPhase {
        *self.inner.phase.borrow()
    }

    /// Stop taking new work; existing connections may finish.
    pub fn begin_drain(&self) {
        self.advance(ShutdownPhase::Draining);
    }

    /// Close everything still open.
    pub fn force_close(&self) {
        self.advance(ShutdownPhase::Forced);
    }

    fn advance(&self, to: ShutdownPhase) {
        self.inner.phase.send_if_modified(|phase| {
            if *phase < to {
                *phase = to;
                true
            } else {
                false
            }
        });
    }

    /// A receiver connection tasks select on.
    pub fn signal(&self) -> ShutdownSignal {
        ShutdownSignal {
            rx: self.inner.phase.subscribe(),
        }
    }
}

impl Default for ConnectionTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-task view of the shutdown phase.
#[derive(Debug, Clone)]
pub struct ShutdownSignal {
    rx: watch::Receiver<ShutdownPhase>,
}

impl ShutdownSignal {
    /// Resolve once the server starts draining (or is forced).
    pub async fn draining(&mut self) {
        let _ = self.rx.wait_for(|p| *p >= ShutdownPhase::Draining).await;
    }

    /// Resolve once the drain deadline has passed.
    pub async fn forced(&mut self) {
        let _ = self.rx.wait_for(|p| *p == ShutdownPhase::Forced).await;
    }
}

/// Guard that tracks a connection's lifetime.
/// Decrements active count when dropped.
#[derive(Debug)]
pub struct ConnectionGuard {
    inner: Arc<TrackerInner>,
    id: ConnectionId,
    kind: ConnectionKind,
}

impl ConnectionGuard {
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn kind(&self) -> ConnectionKind {
        self.kind
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.inner.active.send_modify(|n| *n = n.saturating_sub(1));
        metrics::connection_closed(self.kind);
        tracing::trace!(connection_id = %self.id, kind = self.kind.as_str(), "Connection closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn connection_id_unique() {
        let id1 = ConnectionId::new();
        let id2 = ConnectionId::new();
        assert_ne!(id1, id2);
    }

    #[test]
    fn connection_tracker_counts() {
        let tracker = ConnectionTracker::new();
        assert_eq!(tracker.active_count(), 0);

        let guard1 = tracker.track(ConnectionKind::Http);
        assert_eq!(tracker.active_count(), 1);

        let guard2 = tracker.track(ConnectionKind::WebSocket);
        assert_eq!(tracker.active_count(), 2);
        assert_eq!(guard2.kind(), ConnectionKind::WebSocket);

        drop(guard1);
        assert_eq!(tracker.active_count(), 1);

        drop(guard2);
        assert_eq!(tracker.active_count(), 0);
    }

    #[tokio::test]
    async fn wait_idle_resolves_when_last_guard_drops() {
        let tracker = ConnectionTracker::new();
        let guard = tracker.track(ConnectionKind::Http);

        let waiter = {
            let tracker = tracker.clone();
            tokio::spawn(async move { tracker.wait_idle().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        drop(guard);
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("wait_idle should resolve")
            .unwrap();
    }

    #[tokio::test]
    async fn phases_only_move_forward() {
        let tracker = ConnectionTracker::new();
        let mut signal = tracker.signal();
        assert_eq!(tracker.phase(), ShutdownPhase::Serving);

        tracker.begin_drain();
        tokio::time::timeout(Duration::from_secs(1), signal.draining())
            .await
            .unwrap();

        tracker.force_close();
        tracker.begin_drain();
        assert_eq!(tracker.phase(), ShutdownPhase::Forced);
        tokio::time::timeout(Duration::from_secs(1), signal.forced())
            .await
            .unwrap();
    }
}
