//! Path-prefix reverse proxy for local development.
//!
//! Requests are matched against an ordered route table, their path is
//! optionally rewritten, and they are forwarded to a local upstream over
//! HTTP or relayed as a WebSocket pipe. Unmatched requests go to a local
//! fallback.
//!
//! ```text
//!     Client ──▶ net (listener) ──▶ http (server) ──▶ routing (match, rewrite)
//!                                                        │
//!                          ┌─────────────────────────────┤
//!                          ▼                             ▼
//!                 http::forward / websocket        http::fallback
//!                          │
//!                          ▼
//!                 upstream (pool, limits) ──▶ Upstream
//! ```

// Core subsystems
pub mod config;
pub mod http;
pub mod net;
pub mod routing;
pub mod upstream;

// Cross-cutting concerns
pub mod error;
pub mod lifecycle;
pub mod observability;
pub mod resilience;

pub use config::schema::ProxyConfig;
pub use error::ProxyError;
pub use http::HttpServer;
pub use lifecycle::Shutdown;
pub use routing::{match_route, rewrite, Route, RouteTable};
