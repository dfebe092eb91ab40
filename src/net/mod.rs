//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming TCP connection
//!     → listener.rs (accept loop, connection limits)
//!     → connection.rs (lifecycle tracking, shutdown phase)
//!     → Hand off to HTTP layer
//!
//! Shutdown phases:
//!     Serving → Draining → Forced
//! ```
//!
//! # Design Decisions
//! - Bounded accept prevents resource exhaustion
//! - Each connection and WebSocket pipe is tracked for graceful shutdown
//! - Waiting for drain is event driven (watch channel), never polled

pub mod connection;
pub mod listener;

pub use connection::{ConnectionGuard, ConnectionKind, ConnectionTracker, ShutdownPhase, ShutdownSignal};
pub use listener::{ConnectionPermit, Listener, ListenerError};
