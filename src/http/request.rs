//! Inbound request classification and request IDs.
//!
//! # Responsibilities
//! - Detect WebSocket upgrade requests from the request headers
//! - Generate an `x-request-id` when the client did not send one
//! - Build the outbound URI from the rewritten path and original query

use axum::http::header::{self, HeaderMap, HeaderName};
use axum::http::uri::{Authority, Scheme, Uri};
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};

use crate::error::ProxyError;

pub const X_REQUEST_ID: HeaderName = HeaderName::from_static("x-request-id");

/// True when the request asks to switch to the WebSocket protocol.
pub fn is_websocket_upgrade(headers: &HeaderMap) -> bool {
    let connection_upgrade = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .any(|token| token.trim().eq_ignore_ascii_case("upgrade"));

    let upgrade_websocket = headers
        .get(header::UPGRADE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim().eq_ignore_ascii_case("websocket"))
        .unwrap_or(false);

    connection_upgrade && upgrade_websocket
}

/// The request ID assigned by [`request_id_layers`], or `"unknown"`.
pub fn request_id(headers: &HeaderMap) -> &str {
    headers
        .get(X_REQUEST_ID)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("unknown")
}

/// Layers that assign (when absent) and echo `x-request-id`.
pub fn request_id_layers() -> (SetRequestIdLayer<MakeRequestUuid>, PropagateRequestIdLayer) {
    (
        SetRequestIdLayer::new(X_REQUEST_ID, MakeRequestUuid),
        PropagateRequestIdLayer::new(X_REQUEST_ID),
    )
}

/// `scheme://authority{path}{?query}` for the upstream leg.
pub fn upstream_uri(
    scheme: Scheme,
    authority: &Authority,
    path: &str,
    query: Option<&str>,
) -> Result<Uri, ProxyError> {
    let path_and_query = match query {
        Some(query) => format!("{path}?{query}"),
        None => path.to_string(),
    };
    Uri::builder()
        .scheme(scheme)
        .authority(authority.clone())
        .path_and_query(path_and_query)
        .build()
        .map_err(|e| ProxyError::Protocol(format!("invalid upstream uri: {e}")))
}
