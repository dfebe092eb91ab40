//! HTTP-mode forwarding.
//!
//! # Responsibilities
//! - Rebuild the inbound request for the upstream leg (URI, Host, headers)
//! - Send it over the shared keep-alive pool under a response-header deadline
//! - Stream the upstream response back, holding the upstream slot until the
//!   body is finished
//!
//! Bodies are never buffered. Dropping the returned future (client went
//! away) drops the in-flight upstream request with it.

use std::error::Error as _;
use std::net::SocketAddr;
use std::time::Duration;

use axum::body::Body;
use axum::http::header::HOST;
use axum::http::uri::Scheme;
use axum::http::{Request, Version};
use axum::response::Response;
use http_body_util::BodyExt;

use crate::error::ProxyError;
use crate::http::headers::{append_forwarded, apply_host, strip_hop_by_hop};
use crate::http::request::upstream_uri;
use crate::resilience::timeouts::with_timeout;
use crate::routing::Route;
use crate::upstream::UpstreamPool;

/// Forward `request` to `route`'s upstream using the already rewritten `path`.
pub async fn forward_http(
    upstreams: &UpstreamPool,
    route: &Route,
    path: &str,
    request: Request<Body>,
    peer: Option<SocketAddr>,
    response_timeout: Duration,
) -> Result<Response, ProxyError> {
    let authority = route.authority();
    let (mut parts, body) = request.into_parts();

    let original_host = parts.headers.get(HOST).cloned();
    strip_hop_by_hop(&mut parts.headers);
    append_forwarded(&mut parts.headers, peer, original_host.as_ref());
    apply_host(&mut parts.headers, authority, route.preserve_host());

    parts.uri = upstream_uri(Scheme::HTTP, authority, path, parts.uri.query())?;
    parts.version = Version::HTTP_11;

    let slot = upstreams.checkout(authority)?;
    let outbound = Request::from_parts(parts, body);

    let response = with_timeout(authority, response_timeout, async {
        upstreams.client().request(outbound).await.map_err(|e| {
            let mut reason = e.to_string();
            let mut source = e.source();
            while let Some(cause) = source {
                reason.push_str(": ");
                reason.push_str(&cause.to_string());
                source = cause.source();
            }
            ProxyError::UpstreamUnreachable {
                authority: authority.to_string(),
                reason,
            }
        })
    })
    .await?;

    let (mut parts, body) = response.into_parts();
    strip_hop_by_hop(&mut parts.headers);

    // The slot is released when the client finishes reading (or drops) the body.
    let body = body.map_frame(move |frame| {
        let _slot = &slot;
        frame
    });

    Ok(Response::from_parts(parts, Body::new(body)))
}
