//! Upstream access subsystem.
//!
//! # Data Flow
//! ```text
//! Matched route (authority)
//!     → pool.rs (claim slot, shared keep-alive client)
//!     → limit.rs (RAII guard held for the whole exchange)
//!     → http::forward / http::websocket use the slot
//! ```

pub mod limit;
pub mod pool;

pub use limit::{Upstream, UpstreamGuard};
pub use pool::{HttpClient, UpstreamPool};
