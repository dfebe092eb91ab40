//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create the Axum Router with the proxy handler and middleware
//! - Run the accept loop (bounded listener, one task per connection)
//! - Serve HTTP/1.1 with upgrades and a header read timeout
//! - Dispatch requests: match route, rewrite, forward or fall back
//! - Swap the route table on reload
//! - Drain and then force-close connections on shutdown

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;
use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::Request,
    response::{IntoResponse, Response},
    routing::any,
    Router,
};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::{TokioIo, TokioTimer};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};
use tower::ServiceExt;
use tower_http::{
    timeout::{RequestBodyTimeoutLayer, ResponseBodyTimeoutLayer},
    trace::TraceLayer,
};

use crate::config::{validate_config, ConfigError, ProxyConfig};
use crate::error::ProxyError;
use crate::http::fallback::local_router;
use crate::http::forward::forward_http;
use crate::http::request::{is_websocket_upgrade, request_id, request_id_layers};
use crate::http::websocket::{forward_websocket, refuse_websocket, WebSocketSettings};
use crate::net::{ConnectionKind, ConnectionPermit, ConnectionTracker, Listener, ListenerError};
use crate::observability::metrics;
use crate::routing::{match_route, rewrite, RouteTable};
use crate::upstream::UpstreamPool;

/// How long force-closed connections get to finish their close handshake.
const FORCE_GRACE: Duration = Duration::from_secs(5);

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub routes: Arc<ArcSwap<RouteTable>>,
    pub upstreams: Arc<UpstreamPool>,
    pub fallback: Router,
    pub tracker: ConnectionTracker,
    pub response_timeout: Duration,
    pub websocket: WebSocketSettings,
}

/// HTTP server for the reverse proxy.
pub struct HttpServer {
    config: ProxyConfig,
    routes: Arc<ArcSwap<RouteTable>>,
    fallback: Router,
}

impl HttpServer {
    /// Validate `config` and compile its route table.
    ///
    /// Nothing is bound here; a config that fails validation never reaches
    /// the accept loop.
    pub fn new(config: ProxyConfig) -> Result<Self, ConfigError> {
        validate_config(&config).map_err(ConfigError::Validation)?;
        let table = RouteTable::load(&config.routes)?;
        let fallback = local_router(&config.fallback);

        Ok(Self {
            routes: Arc::new(ArcSwap::from_pointee(table)),
            fallback,
            config,
        })
    }

    /// Replace the local fallback invoked when no route matches.
    pub fn with_fallback(mut self, fallback: Router) -> Self {
        self.fallback = fallback;
        self
    }

    /// Build the Axum router with all middleware layers.
    fn build_router(config: &ProxyConfig, state: AppState) -> Router {
        let (set_request_id, propagate_request_id) = request_id_layers();
        let idle = config.timeouts.idle();

        Router::new()
            .route("/{*path}", any(proxy_handler))
            .route("/", any(proxy_handler))
            .with_state(state)
            .layer(RequestBodyTimeoutLayer::new(idle))
            .layer(ResponseBodyTimeoutLayer::new(idle))
            .layer(propagate_request_id)
            .layer(
                TraceLayer::new_for_http().make_span_with(|request: &Request<Body>| {
                    tracing::info_span!(
                        "request",
                        request_id = %request_id(request.headers()),
                        method = %request.method(),
                        path = %request.uri().path(),
                    )
                }),
            )
            .layer(set_request_id)
    }

    /// Run the server until `shutdown` fires, then drain.
    ///
    /// Every config received on `config_updates` replaces the route table;
    /// other sections take effect on restart.
    pub async fn run(
        self,
        listener: TcpListener,
        config_updates: mpsc::UnboundedReceiver<ProxyConfig>,
        shutdown: broadcast::Receiver<()>,
    ) -> Result<(), std::io::Error> {
        let listener = Listener::from_tcp(listener, self.config.listener.max_connections);
        self.serve(listener, config_updates, shutdown).await
    }

    /// Like [`HttpServer::run`], on an already bounded listener.
    pub async fn serve(
        self,
        listener: Listener,
        mut config_updates: mpsc::UnboundedReceiver<ProxyConfig>,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        let tracker = ConnectionTracker::new();

        let state = AppState {
            routes: Arc::clone(&self.routes),
            upstreams: Arc::new(UpstreamPool::new(&self.config.pool, &self.config.timeouts)),
            fallback: self.fallback.clone(),
            tracker: tracker.clone(),
            response_timeout: self.config.timeouts.request(),
            websocket: WebSocketSettings {
                handshake_timeout: self.config.timeouts.request(),
                idle_timeout: self.config.timeouts.websocket_idle(),
                max_message_size: self.config.websocket.max_message_size,
            },
        };
        let app = Self::build_router(&self.config, state);
        let header_read_timeout = self.config.timeouts.idle();

        tracing::info!(
            address = %addr,
            routes = self.routes.load().len(),
            "Proxy listening"
        );

        loop {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer, permit)) => {
                        serve_connection(stream, peer, permit, app.clone(), tracker.clone(), header_read_timeout);
                    }
                    Err(ListenerError::Closed) => break,
                    Err(e) => {
                        tracing::warn!(error = %e, "Accept failed");
                        tokio::time::sleep(Duration::from_millis(50)).await;
                    }
                },
                Some(update) = config_updates.recv() => {
                    reload_routes(&self.routes, &update);
                }
                _ = shutdown.recv() => {
                    tracing::info!("Shutdown requested, no longer accepting connections");
                    break;
                }
            }
        }
        drop(listener);

        tracker.begin_drain();
        let drain = self.config.timeouts.shutdown_drain();
        tracing::info!(
            active = tracker.active_count(),
            deadline = ?drain,
            "Draining connections"
        );

        if tokio::time::timeout(drain, tracker.wait_idle()).await.is_err() {
            tracing::warn!(
                remaining = tracker.active_count(),
                "Drain deadline passed, closing remaining connections"
            );
            tracker.force_close();
            let _ = tokio::time::timeout(FORCE_GRACE, tracker.wait_idle()).await;
        }

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

/// Swap in a new route table, keeping the old one if the update is invalid.
fn reload_routes(routes: &ArcSwap<RouteTable>, update: &ProxyConfig) {
    match RouteTable::load(&update.routes) {
        Ok(table) => {
            let count = table.len();
            routes.store(Arc::new(table));
            metrics::record_reload(true);
            tracing::info!(routes = count, "Route table reloaded");
        }
        Err(e) => {
            metrics::record_reload(false);
            tracing::warn!(error = %e, "Rejected route table update, keeping current routes");
        }
    }
}

/// One task per client connection.
fn serve_connection(
    stream: TcpStream,
    peer: SocketAddr,
    permit: ConnectionPermit,
    app: Router,
    tracker: ConnectionTracker,
    header_read_timeout: Duration,
) {
    tokio::spawn(async move {
        let connection = tracker.track(ConnectionKind::Http);
        let mut signal = tracker.signal();

        let service = service_fn(move |mut request: Request<Incoming>| {
            request.extensions_mut().insert(ConnectInfo(peer));
            request.extensions_mut().insert(permit.clone());
            app.clone().oneshot(request.map(Body::new))
        });

        let mut builder = http1::Builder::new();
        builder
            .timer(TokioTimer::new())
            .header_read_timeout(header_read_timeout);
        let conn = builder
            .serve_connection(TokioIo::new(stream), service)
            .with_upgrades();
        tokio::pin!(conn);

        let result = tokio::select! {
            result = conn.as_mut() => result,
            () = signal.draining() => {
                conn.as_mut().graceful_shutdown();
                tokio::select! {
                    result = conn.as_mut() => result,
                    () = signal.forced() => {
                        tracing::debug!(connection_id = %connection.id(), "Connection force-closed");
                        return;
                    }
                }
            }
        };

        if let Err(e) = result {
            tracing::debug!(
                connection_id = %connection.id(),
                peer_addr = %peer,
                error = %e,
                "Connection ended with error"
            );
        }
    });
}

/// Main proxy handler.
/// Looks up the route, rewrites the path and forwards the request.
async fn proxy_handler(State(state): State<AppState>, mut request: Request<Body>) -> Response {
    let start = Instant::now();
    let permit = request.extensions_mut().remove::<ConnectionPermit>();
    let table = state.routes.load_full();
    let path = request.uri().path().to_owned();

    let Some(route) = match_route(&table, &path) else {
        tracing::debug!(path = %path, "No route matched, using fallback");
        return match state.fallback.oneshot(request).await {
            Ok(response) => response,
            Err(never) => match never {},
        };
    };

    let websocket = route.is_websocket() && is_websocket_upgrade(request.headers());
    let mode = if websocket { "websocket" } else { "http" };
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);

    let target = rewrite(route, &path).map_err(ProxyError::from);
    if let Ok(target) = &target {
        tracing::debug!(
            route = route.name(),
            mode,
            upstream = %route.authority(),
            target = %target,
            "Proxying request"
        );
    }

    let response = if websocket {
        match target {
            Ok(target) => {
                forward_websocket(
                    &state.upstreams,
                    route,
                    &target,
                    request,
                    peer,
                    state.websocket,
                    &state.tracker,
                    permit,
                )
                .await
            }
            Err(e) => {
                tracing::warn!(route = route.name(), error = %e, "Path rewrite failed");
                metrics::record_upstream_error(e.kind());
                refuse_websocket(request, e).await
            }
        }
    } else {
        let result = match target {
            Ok(target) => {
                forward_http(
                    &state.upstreams,
                    route,
                    &target,
                    request,
                    peer,
                    state.response_timeout,
                )
                .await
            }
            Err(e) => Err(e),
        };
        match result {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!(
                    route = route.name(),
                    upstream = %route.authority(),
                    error = %e,
                    "Upstream request failed"
                );
                metrics::record_upstream_error(e.kind());
                e.into_response()
            }
        }
    };

    metrics::record_request(route.name(), mode, response.status().as_u16(), start);
    response
}
