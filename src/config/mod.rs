//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks, route compilation dry run)
//!     → ProxyConfig (validated, immutable)
//!
//! On reload (file change or SIGHUP):
//!     watcher.rs / lifecycle::signals detect the trigger
//!     → loader.rs loads new config
//!     → validation.rs validates
//!     → server rebuilds the RouteTable and swaps it atomically
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; changes require full reload
//! - All fields have defaults to allow minimal configs
//! - Only routes are hot-reloaded; listener and pool settings need a restart

pub mod loader;
pub mod schema;
pub mod validation;
pub mod watcher;

pub use loader::{load_config, parse_config, ConfigError};
pub use schema::{
    FallbackConfig, ListenerConfig, LogFormat, ObservabilityConfig, PoolConfig, ProxyConfig,
    RouteSpec, TimeoutConfig, WebSocketConfig,
};
pub use validation::{validate_config, ValidationError};
