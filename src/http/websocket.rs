//! WebSocket-mode forwarding.
//!
//! # Responsibilities
//! - Perform the upstream handshake before answering the client
//! - Upgrade the client and relay frames in both directions, in order
//! - Close both sockets together when either side ends the pipe
//!
//! # Design Decisions
//! - A failed upstream handshake still upgrades the client so it receives a
//!   close frame with a distinguishing code (4502 / 1013) instead of a dropped
//!   connection. An upstream that answers with a non-101 status has its
//!   response relayed as-is.
//! - Idle pipes and pipes still open at the drain deadline are closed with
//!   1001 (Going Away) on both legs.

use std::net::SocketAddr;
use std::time::Duration;

use axum::body::Body;
use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::FromRequestParts;
use axum::http::header::{
    HeaderName, HeaderValue, CONTENT_LENGTH, HOST, ORIGIN, SEC_WEBSOCKET_ACCEPT,
    SEC_WEBSOCKET_EXTENSIONS, SEC_WEBSOCKET_KEY, SEC_WEBSOCKET_PROTOCOL, SEC_WEBSOCKET_VERSION,
};
use axum::http::request::Parts;
use axum::http::{Request, StatusCode};
use axum::response::{IntoResponse, Response};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Response as UpstreamResponse;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::{
    CloseFrame as UpstreamCloseFrame, Message as UpstreamMessage, WebSocketConfig,
};
use tokio_tungstenite::tungstenite::Error as WsError;
use tokio_tungstenite::{connect_async_with_config, MaybeTlsStream, WebSocketStream};

use crate::error::{ProxyError, CLOSE_BAD_GATEWAY, CLOSE_GOING_AWAY};
use crate::http::headers::{append_forwarded, is_hop_by_hop, strip_hop_by_hop};
use crate::net::{ConnectionKind, ConnectionPermit, ConnectionTracker, ShutdownSignal};
use crate::observability::metrics;
use crate::resilience::timeouts::with_timeout;
use crate::routing::Route;
use crate::upstream::{UpstreamGuard, UpstreamPool};

type UpstreamSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Bound on flushing close frames once a pipe has ended.
const CLOSE_GRACE: Duration = Duration::from_secs(2);

/// Handshake headers owned by each leg's own handshake.
static HANDSHAKE_HEADERS: [HeaderName; 5] = [
    HOST,
    SEC_WEBSOCKET_KEY,
    SEC_WEBSOCKET_VERSION,
    SEC_WEBSOCKET_EXTENSIONS,
    SEC_WEBSOCKET_ACCEPT,
];

/// Per-pipe limits.
#[derive(Debug, Clone, Copy)]
pub struct WebSocketSettings {
    /// Deadline for the upstream handshake.
    pub handshake_timeout: Duration,
    /// A pipe with no frame in either direction for this long is closed.
    pub idle_timeout: Duration,
    pub max_message_size: usize,
}

enum Handshake {
    Accepted {
        socket: UpstreamSocket,
        protocol: Option<HeaderValue>,
        slot: UpstreamGuard,
    },
    Rejected(Response),
}

/// Why a pipe ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PipeEnd {
    ClientClosed,
    ClientGone,
    UpstreamClosed,
    UpstreamFailed,
    Idle,
    Shutdown,
}

impl PipeEnd {
    fn as_str(&self) -> &'static str {
        match self {
            PipeEnd::ClientClosed => "client_closed",
            PipeEnd::ClientGone => "client_gone",
            PipeEnd::UpstreamClosed => "upstream_closed",
            PipeEnd::UpstreamFailed => "upstream_failed",
            PipeEnd::Idle => "idle",
            PipeEnd::Shutdown => "shutdown",
        }
    }
}

/// Forward an upgrade request on a WebSocket route.
///
/// Always produces a response: the 101 switching the client over, the
/// upstream's own refusal, or a rejection of a malformed handshake.
pub async fn forward_websocket(
    upstreams: &UpstreamPool,
    route: &Route,
    path: &str,
    request: Request<Body>,
    peer: Option<SocketAddr>,
    settings: WebSocketSettings,
    tracker: &ConnectionTracker,
    permit: Option<ConnectionPermit>,
) -> Response {
    let (mut parts, _body) = request.into_parts();
    let ws = match WebSocketUpgrade::from_request_parts(&mut parts, &()).await {
        Ok(ws) => ws.max_message_size(settings.max_message_size),
        Err(rejection) => return rejection.into_response(),
    };

    match open_upstream(upstreams, route, path, &parts, peer, settings).await {
        Ok(Handshake::Accepted {
            socket,
            protocol,
            slot,
        }) => {
            let ws = match protocol.as_ref().and_then(|p| p.to_str().ok()) {
                Some(protocol) => ws.protocols([protocol.to_owned()]),
                None => ws,
            };
            let pipe = tracker.track(ConnectionKind::WebSocket);
            let signal = tracker.signal();
            let route_name = route.name().to_owned();

            ws.on_upgrade(move |client| async move {
                tracing::debug!(connection_id = %pipe.id(), route = %route_name, "WebSocket pipe open");
                let end = relay(client, socket, settings.idle_timeout, signal).await;
                tracing::debug!(
                    connection_id = %pipe.id(),
                    route = %route_name,
                    end = end.as_str(),
                    "WebSocket pipe closed"
                );
                drop(slot);
                drop(pipe);
                drop(permit);
            })
        }
        Ok(Handshake::Rejected(response)) => {
            tracing::info!(
                route = route.name(),
                upstream = %route.authority(),
                status = response.status().as_u16(),
                "Upstream refused WebSocket upgrade"
            );
            response
        }
        Err(err) => {
            tracing::warn!(
                route = route.name(),
                upstream = %route.authority(),
                error = %err,
                "WebSocket upstream handshake failed"
            );
            metrics::record_upstream_error(err.kind());
            reject(ws, err)
        }
    }
}

/// Answer an upgrade request that cannot be forwarded at all.
pub async fn refuse_websocket(request: Request<Body>, err: ProxyError) -> Response {
    let (mut parts, _body) = request.into_parts();
    match WebSocketUpgrade::from_request_parts(&mut parts, &()).await {
        Ok(ws) => reject(ws, err),
        Err(rejection) => rejection.into_response(),
    }
}

async fn open_upstream(
    upstreams: &UpstreamPool,
    route: &Route,
    path: &str,
    parts: &Parts,
    peer: Option<SocketAddr>,
    settings: WebSocketSettings,
) -> Result<Handshake, ProxyError> {
    let authority = route.authority();

    let mut url = format!("ws://{authority}{path}");
    if let Some(query) = parts.uri.query() {
        url.push('?');
        url.push_str(query);
    }
    let mut outbound = url
        .into_client_request()
        .map_err(|e| ProxyError::Protocol(format!("invalid upstream handshake: {e}")))?;

    let mut forwarded = parts.headers.clone();
    strip_hop_by_hop(&mut forwarded);
    for name in &HANDSHAKE_HEADERS {
        forwarded.remove(name);
    }
    let original_host = parts.headers.get(HOST);
    append_forwarded(&mut forwarded, peer, original_host);

    let headers = outbound.headers_mut();
    for (name, value) in forwarded.iter() {
        headers.append(name.clone(), value.clone());
    }
    if route.preserve_host() {
        if let Some(host) = original_host {
            headers.insert(HOST, host.clone());
        }
    }
    if route.rewrite_ws_origin() {
        if let Ok(origin) = HeaderValue::from_str(&route.upstream_origin()) {
            headers.insert(ORIGIN, origin);
        }
    }

    let slot = upstreams.checkout(authority)?;

    let mut config = WebSocketConfig::default();
    config.max_message_size = Some(settings.max_message_size);

    with_timeout(authority, settings.handshake_timeout, async {
        match connect_async_with_config(outbound, Some(config), true).await {
            Ok((socket, response)) => Ok(Handshake::Accepted {
                socket,
                protocol: response.headers().get(SEC_WEBSOCKET_PROTOCOL).cloned(),
                slot,
            }),
            Err(WsError::Http(response)) => Ok(Handshake::Rejected(relay_refusal(&response))),
            Err(e) => Err(ProxyError::UpstreamUnreachable {
                authority: authority.to_string(),
                reason: e.to_string(),
            }),
        }
    })
    .await
}

/// Relay an upstream's non-101 handshake answer to the client.
fn relay_refusal(response: &UpstreamResponse) -> Response {
    let mut builder = Response::builder().status(response.status());
    for (name, value) in response.headers() {
        if !is_hop_by_hop(name) && name != CONTENT_LENGTH {
            builder = builder.header(name, value);
        }
    }
    let body = response.body().clone().unwrap_or_default();
    builder
        .body(Body::from(body))
        .unwrap_or_else(|_| StatusCode::BAD_GATEWAY.into_response())
}

/// Upgrade the client only to tell it why there is no pipe.
fn reject(ws: WebSocketUpgrade, err: ProxyError) -> Response {
    let code = err.close_code();
    let reason = err.kind();
    ws.on_upgrade(move |mut client| async move {
        let _ = client.send(client_close(code, reason)).await;
        let _ = tokio::time::timeout(CLOSE_GRACE, SinkExt::close(&mut client)).await;
    })
}

async fn relay(
    mut client: WebSocket,
    mut upstream: UpstreamSocket,
    idle_timeout: Duration,
    mut signal: ShutdownSignal,
) -> PipeEnd {
    let idle = tokio::time::sleep(idle_timeout);
    tokio::pin!(idle);

    let end = loop {
        tokio::select! {
            incoming = client.recv() => match incoming {
                Some(Ok(Message::Close(frame))) => {
                    let _ = upstream.send(to_upstream(Message::Close(frame))).await;
                    break PipeEnd::ClientClosed;
                }
                Some(Ok(message)) => {
                    if let Err(e) = upstream.send(to_upstream(message)).await {
                        tracing::debug!(error = %e, "Upstream write failed");
                        let _ = client.send(client_close(CLOSE_BAD_GATEWAY, "upstream error")).await;
                        break PipeEnd::UpstreamFailed;
                    }
                }
                Some(Err(e)) => {
                    tracing::debug!(error = %e, "Client read failed");
                    let _ = upstream.send(upstream_close(CLOSE_GOING_AWAY, "client gone")).await;
                    break PipeEnd::ClientGone;
                }
                None => {
                    let _ = upstream.send(upstream_close(CLOSE_GOING_AWAY, "client gone")).await;
                    break PipeEnd::ClientGone;
                }
            },
            incoming = upstream.next() => match incoming {
                Some(Ok(UpstreamMessage::Close(frame))) => {
                    if let Some(message) = to_client(UpstreamMessage::Close(frame)) {
                        let _ = client.send(message).await;
                    }
                    break PipeEnd::UpstreamClosed;
                }
                Some(Ok(message)) => {
                    let Some(message) = to_client(message) else { continue };
                    if let Err(e) = client.send(message).await {
                        tracing::debug!(error = %e, "Client write failed");
                        let _ = upstream.send(upstream_close(CLOSE_GOING_AWAY, "client gone")).await;
                        break PipeEnd::ClientGone;
                    }
                }
                Some(Err(e)) => {
                    tracing::debug!(error = %e, "Upstream read failed");
                    let _ = client.send(client_close(CLOSE_BAD_GATEWAY, "upstream error")).await;
                    break PipeEnd::UpstreamFailed;
                }
                None => {
                    let _ = client.send(client_close(CLOSE_BAD_GATEWAY, "upstream closed")).await;
                    break PipeEnd::UpstreamFailed;
                }
            },
            () = &mut idle => {
                let _ = client.send(client_close(CLOSE_GOING_AWAY, "idle timeout")).await;
                let _ = upstream.send(upstream_close(CLOSE_GOING_AWAY, "idle timeout")).await;
                break PipeEnd::Idle;
            }
            () = signal.forced() => {
                let _ = client.send(client_close(CLOSE_GOING_AWAY, "server shutting down")).await;
                let _ = upstream.send(upstream_close(CLOSE_GOING_AWAY, "server shutting down")).await;
                break PipeEnd::Shutdown;
            }
        }
        idle.as_mut().reset(Instant::now() + idle_timeout);
    };

    let _ = tokio::time::timeout(CLOSE_GRACE, async {
        let _ = SinkExt::close(&mut client).await;
        let _ = SinkExt::close(&mut upstream).await;
    })
    .await;

    end
}

fn to_upstream(message: Message) -> UpstreamMessage {
    match message {
        Message::Text(text) => UpstreamMessage::Text(text.as_str().to_owned().into()),
        Message::Binary(data) => UpstreamMessage::Binary(data),
        Message::Ping(data) => UpstreamMessage::Ping(data),
        Message::Pong(data) => UpstreamMessage::Pong(data),
        Message::Close(frame) => UpstreamMessage::Close(frame.map(|f| UpstreamCloseFrame {
            code: CloseCode::from(f.code),
            reason: f.reason.as_str().to_owned().into(),
        })),
    }
}

/// Raw frames never surface from a read; anything else maps one to one.
fn to_client(message: UpstreamMessage) -> Option<Message> {
    let message = match message {
        UpstreamMessage::Text(text) => Message::Text(text.as_str().to_owned().into()),
        UpstreamMessage::Binary(data) => Message::Binary(data),
        UpstreamMessage::Ping(data) => Message::Ping(data),
        UpstreamMessage::Pong(data) => Message::Pong(data),
        UpstreamMessage::Close(frame) => Message::Close(frame.map(|f| CloseFrame {
            code: u16::from(f.code),
            reason: f.reason.as_str().to_owned().into(),
        })),
        UpstreamMessage::Frame(_) => return None,
    };
    Some(message)
}

fn client_close(code: u16, reason: &str) -> Message {
    Message::Close(Some(CloseFrame {
        code,
        reason: reason.to_owned().into(),
    }))
}

fn upstream_close(code: u16, reason: &str) -> UpstreamMessage {
    UpstreamMessage::Close(Some(UpstreamCloseFrame {
        code: CloseCode::from(code),
        reason: reason.to_owned().into(),
    }))
}
