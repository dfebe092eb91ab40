//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (accept loop, hyper HTTP/1.1 with upgrades, middleware)
//!     → request.rs (request ID, upgrade detection)
//!     → [routing layer matches and rewrites]
//!     → forward.rs (HTTP mode) or websocket.rs (WebSocket mode)
//!     → fallback.rs when no route matches
//!     → Send to client
//! ```

pub mod fallback;
pub mod forward;
pub mod headers;
pub mod request;
pub mod server;
pub mod websocket;

pub use request::{is_websocket_upgrade, X_REQUEST_ID};
pub use server::HttpServer;
pub use websocket::WebSocketSettings;
