//! Shared utilities for integration tests.
//!
//! Every listener binds port 0 so tests can run in parallel.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::body::{Body, Bytes};
use axum::http::Request;
use axum::routing::get;
use axum::Router;
use futures_util::{SinkExt, StreamExt};
use route_proxy::config::{ProxyConfig, RouteSpec};
use route_proxy::lifecycle::Shutdown;
use route_proxy::HttpServer;
use tokio::io::AsyncReadExt;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::handshake::server::{
    ErrorResponse, Request as WsRequest, Response as WsResponse,
};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;

/// A proxy running on an ephemeral port.
pub struct TestProxy {
    pub addr: SocketAddr,
    pub shutdown: Shutdown,
    pub updates: mpsc::UnboundedSender<ProxyConfig>,
    pub handle: JoinHandle<Result<(), std::io::Error>>,
}

impl TestProxy {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub fn ws_url(&self, path: &str) -> String {
        format!("ws://{}{}", self.addr, path)
    }
}

/// Start the proxy with `config`, ignoring its bind address.
pub async fn start_proxy(config: ProxyConfig) -> TestProxy {
    start_server(HttpServer::new(config).expect("valid test config")).await
}

pub async fn start_server(server: HttpServer) -> TestProxy {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let shutdown = Shutdown::new();
    let (updates, config_updates) = mpsc::unbounded_channel();
    let server_shutdown = shutdown.subscribe();

    let handle = tokio::spawn(server.run(listener, config_updates, server_shutdown));

    TestProxy {
        addr,
        shutdown,
        updates,
        handle,
    }
}

pub fn route(prefix: &str, upstream: SocketAddr) -> RouteSpec {
    RouteSpec {
        prefix: prefix.to_string(),
        upstream: upstream.to_string(),
        ..RouteSpec::default()
    }
}

pub fn config_with(routes: Vec<RouteSpec>) -> ProxyConfig {
    ProxyConfig {
        routes,
        ..ProxyConfig::default()
    }
}

pub fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .pool_max_idle_per_host(0)
        .no_proxy()
        .build()
        .unwrap()
}

/// An address nothing listens on.
pub async fn refused_addr() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap()
}

async fn serve(router: Router) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = axum::serve(listener, router).await;
    });
    addr
}

/// HTTP backend answering every request with a plain-text description of it:
/// `backend`, `method`, `path`, `query`, then one line per header, then `body`.
pub async fn start_echo_backend(name: &'static str) -> SocketAddr {
    let router = Router::new().fallback(move |request: Request<Body>| async move {
        let (parts, body) = request.into_parts();
        let body = axum::body::to_bytes(body, usize::MAX).await.unwrap_or_default();

        let mut out = format!(
            "backend: {name}\nmethod: {}\npath: {}\nquery: {}\n",
            parts.method,
            parts.uri.path(),
            parts.uri.query().unwrap_or("")
        );
        for (header, value) in &parts.headers {
            out.push_str(&format!("{header}: {}\n", value.to_str().unwrap_or("?")));
        }
        out.push_str(&format!("body: {}\n", String::from_utf8_lossy(&body)));
        out
    });
    serve(router).await
}

/// Backend that waits `delay` before answering `slow`.
pub async fn start_slow_backend(delay: Duration) -> SocketAddr {
    let router = Router::new().fallback(move || async move {
        tokio::time::sleep(delay).await;
        "slow"
    });
    serve(router).await
}

/// Backend whose `/stream` response sends `first\n`, then `second\n` once
/// `release` is notified.
pub async fn start_streaming_backend(release: Arc<Notify>) -> SocketAddr {
    let router = Router::new().route(
        "/stream",
        get(move || {
            let release = release.clone();
            async move {
                let chunks = futures_util::stream::unfold(0u8, move |step| {
                    let release = release.clone();
                    async move {
                        match step {
                            0 => Some((Ok::<_, std::io::Error>(Bytes::from("first\n")), 1)),
                            1 => {
                                release.notified().await;
                                Some((Ok(Bytes::from("second\n")), 2))
                            }
                            _ => None,
                        }
                    }
                });
                Body::from_stream(chunks)
            }
        }),
    );
    serve(router).await
}

/// What a WebSocket backend saw in one upgrade handshake.
#[derive(Debug, Clone)]
pub struct SeenHandshake {
    pub path: String,
    pub host: Option<String>,
    pub origin: Option<String>,
}

pub struct WsBackend {
    pub addr: SocketAddr,
    pub seen: Arc<Mutex<Vec<SeenHandshake>>>,
    /// Close codes received from the proxy, in arrival order.
    pub closes: Arc<Mutex<Vec<u16>>>,
}

impl WsBackend {
    pub fn last(&self) -> SeenHandshake {
        self.seen
            .lock()
            .unwrap()
            .last()
            .cloned()
            .expect("no handshake seen")
    }

    /// Wait until the proxy has sent this backend a close frame.
    pub async fn close_code(&self) -> u16 {
        for _ in 0..100 {
            if let Some(code) = self.closes.lock().unwrap().last().copied() {
                return code;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        panic!("backend never received a close frame");
    }
}

/// WebSocket backend that echoes text and binary messages.
///
/// It accepts the first offered subprotocol. A path ending in `/close` is
/// answered with an immediate close (code 4000, reason `bye`); a path ending
/// in `/drop` echoes one message and then drops the socket without a close
/// handshake.
pub async fn start_ws_backend() -> WsBackend {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let record = seen.clone();
    let closes = Arc::new(Mutex::new(Vec::new()));
    let record_close = closes.clone();

    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            let record = record.clone();
            let record_close = record_close.clone();
            tokio::spawn(async move {
                let mut path = String::new();
                let callback = |request: &WsRequest,
                                mut response: WsResponse|
                 -> Result<WsResponse, ErrorResponse> {
                    path = request.uri().to_string();
                    let header = |name: &str| {
                        request
                            .headers()
                            .get(name)
                            .and_then(|v| v.to_str().ok())
                            .map(str::to_owned)
                    };
                    record.lock().unwrap().push(SeenHandshake {
                        path: path.clone(),
                        host: header("host"),
                        origin: header("origin"),
                    });
                    if let Some(protocol) = header("sec-websocket-protocol") {
                        let first = protocol.split(',').next().unwrap_or("").trim().to_owned();
                        response
                            .headers_mut()
                            .insert("sec-websocket-protocol", first.parse().unwrap());
                    }
                    Ok(response)
                };
                let Ok(mut ws) = tokio_tungstenite::accept_hdr_async(stream, callback).await else {
                    return;
                };

                if path.ends_with("/close") {
                    let _ = ws
                        .send(Message::Close(Some(CloseFrame {
                            code: CloseCode::from(4000),
                            reason: "bye".to_owned().into(),
                        })))
                        .await;
                    return;
                }

                let drop_after_echo = path.ends_with("/drop");
                while let Some(Ok(message)) = ws.next().await {
                    match message {
                        Message::Text(_) | Message::Binary(_) => {
                            if ws.send(message).await.is_err() || drop_after_echo {
                                break;
                            }
                        }
                        Message::Close(frame) => {
                            let code = frame.map(|f| u16::from(f.code)).unwrap_or(1005);
                            record_close.lock().unwrap().push(code);
                            break;
                        }
                        _ => {}
                    }
                }
            });
        }
    });

    WsBackend { addr, seen, closes }
}

/// Backend that accepts TCP connections and never writes a byte.
pub async fn start_silent_backend() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((stream, _)) = listener.accept().await {
            held.push(stream);
        }
    });
    addr
}

/// Backend that reads a request, never answers, and notifies `gone` once the
/// proxy closes the upstream connection.
pub async fn start_hanging_backend(gone: Arc<Notify>) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((mut stream, _)) = listener.accept().await {
            let gone = gone.clone();
            tokio::spawn(async move {
                let mut buf = [0u8; 1024];
                loop {
                    match stream.read(&mut buf).await {
                        Ok(0) | Err(_) => break,
                        Ok(_) => continue,
                    }
                }
                gone.notify_one();
            });
        }
    });
    addr
}
