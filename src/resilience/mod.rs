//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Request to upstream:
//!     → timeouts.rs (enforce response-header / handshake deadline)
//!     → On failure: gateway error to the client, no retry
//! ```
//!
//! # Design Decisions
//! - Timeouts are non-negotiable; every upstream call has a deadline
//! - Single attempt per inbound request; a dev proxy surfaces failures

pub mod timeouts;
