//! Per-connection proxy errors and how clients see them.
//!
//! Configuration errors live in [`crate::config::ConfigError`] and are fatal
//! at startup. Everything here is scoped to one exchange and never takes the
//! server down.

use std::time::Duration;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use crate::routing::RewriteError;

/// Private-use close code for a failed upstream (the 4xxx mirror of HTTP 502).
///
/// Not 1014: tungstenite receivers reject it and report 1002 instead.
pub const CLOSE_BAD_GATEWAY: u16 = 4502;
/// RFC 6455 close code 1013: try again later.
pub const CLOSE_TRY_AGAIN_LATER: u16 = 1013;
/// RFC 6455 close code 1002: protocol error.
pub const CLOSE_PROTOCOL_ERROR: u16 = 1002;
/// RFC 6455 close code 1001: going away.
pub const CLOSE_GOING_AWAY: u16 = 1001;

#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    #[error("upstream {authority} unreachable: {reason}")]
    UpstreamUnreachable { authority: String, reason: String },

    #[error("upstream {authority} did not respond within {after:?}")]
    UpstreamTimeout { authority: String, after: Duration },

    #[error("upstream {authority} is at its connection limit")]
    UpstreamBusy { authority: String },

    #[error(transparent)]
    Rewrite(#[from] RewriteError),

    #[error("protocol error: {0}")]
    Protocol(String),
}

impl ProxyError {
    pub fn status(&self) -> StatusCode {
        match self {
            ProxyError::UpstreamUnreachable { .. } | ProxyError::Rewrite(_) => {
                StatusCode::BAD_GATEWAY
            }
            ProxyError::UpstreamTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            ProxyError::UpstreamBusy { .. } => StatusCode::SERVICE_UNAVAILABLE,
            ProxyError::Protocol(_) => StatusCode::BAD_REQUEST,
        }
    }

    /// Close code sent to a WebSocket client when the pipe cannot be set up.
    pub fn close_code(&self) -> u16 {
        match self {
            ProxyError::UpstreamUnreachable { .. } | ProxyError::Rewrite(_) => CLOSE_BAD_GATEWAY,
            ProxyError::UpstreamTimeout { .. } | ProxyError::UpstreamBusy { .. } => {
                CLOSE_TRY_AGAIN_LATER
            }
            ProxyError::Protocol(_) => CLOSE_PROTOCOL_ERROR,
        }
    }

    /// Short label for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            ProxyError::UpstreamUnreachable { .. } => "unreachable",
            ProxyError::UpstreamTimeout { .. } => "timeout",
            ProxyError::UpstreamBusy { .. } => "busy",
            ProxyError::Rewrite(_) => "rewrite",
            ProxyError::Protocol(_) => "protocol",
        }
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = match status {
            StatusCode::BAD_GATEWAY => "Upstream request failed",
            StatusCode::GATEWAY_TIMEOUT => "Upstream timed out",
            StatusCode::SERVICE_UNAVAILABLE => "Upstream busy",
            _ => "Bad request",
        };
        (status, body).into_response()
    }
}
