//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming request path
//!     → matcher.rs (first route whose prefix matches)
//!     → rewrite.rs (route's rewrite rule → outbound path)
//!     → Return: (Route, outbound path) or NoMatch
//!
//! Route Compilation (at startup and on reload):
//!     RouteSpec[]
//!     → table.rs (validate, parse upstream, compile rewrite)
//!     → Freeze as immutable RouteTable
//!     → Published through ArcSwap
//! ```
//!
//! # Design Decisions
//! - Routes compiled at startup, immutable at runtime
//! - No regex in the match path (prefix comparison only)
//! - Deterministic: same input always matches same route
//! - First match wins (declaration order)

pub mod matcher;
pub mod rewrite;
pub mod table;

pub use matcher::match_route;
pub use rewrite::{rewrite, PathRewrite, RewriteError, RewriteSpec};
pub use table::{Route, RouteSpec, RouteTable};
