//! Local handling for paths no route claims.
//!
//! The default fallback answers the health path and, when a static directory
//! is configured, serves the built front-end with `index.html` for unknown
//! paths (client-side routing). Everything else is a plain 404.

use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use tower_http::services::{ServeDir, ServeFile};

use crate::config::FallbackConfig;

/// Build the default fallback router.
pub fn local_router(config: &FallbackConfig) -> Router {
    let mut router = Router::new();
    if let Some(path) = &config.health_path {
        router = router.route(path, get(health));
    }

    match &config.static_dir {
        Some(dir) => {
            let index = ServeFile::new(dir.join("index.html"));
            router.fallback_service(ServeDir::new(dir).fallback(index))
        }
        None => router.fallback(not_found),
    }
}

async fn health() -> &'static str {
    "ok"
}

async fn not_found() -> impl IntoResponse {
    (StatusCode::NOT_FOUND, "No route for this path")
}
