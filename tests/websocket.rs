//! WebSocket-mode forwarding through a running proxy.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use route_proxy::config::{ListenerConfig, ProxyConfig, RouteSpec, TimeoutConfig};
use route_proxy::routing::RewriteSpec;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::Message;

mod common;

fn ws_route(prefix: &str, backend: std::net::SocketAddr) -> RouteSpec {
    RouteSpec {
        websocket: true,
        ..common::route(prefix, backend)
    }
}

#[tokio::test]
async fn upgrade_uses_rewritten_path_and_origin() {
    let backend = common::start_ws_backend().await;
    let proxy = common::start_proxy(common::config_with(vec![RouteSpec {
        rewrite: Some(RewriteSpec::StripPrefix("/server".into())),
        rewrite_ws_origin: true,
        ..ws_route("/server/ws", backend.addr)
    }]))
    .await;

    let mut request = proxy.ws_url("/server/ws?room=7").into_client_request().unwrap();
    request
        .headers_mut()
        .insert("origin", "http://localhost:5173".parse().unwrap());
    let (mut socket, _) = connect_async(request).await.unwrap();

    let seen = backend.last();
    assert_eq!(seen.path, "/ws?room=7");
    assert_eq!(seen.origin.as_deref(), Some(format!("http://{}", backend.addr).as_str()));

    socket.send(Message::Text("hello".to_owned().into())).await.unwrap();
    match socket.next().await {
        Some(Ok(Message::Text(text))) => assert_eq!(text.as_str(), "hello"),
        other => panic!("expected echo, got {other:?}"),
    }

    socket.send(Message::Binary(vec![1u8, 2, 3].into())).await.unwrap();
    match socket.next().await {
        Some(Ok(Message::Binary(data))) => assert_eq!(&data[..], &[1, 2, 3]),
        other => panic!("expected echo, got {other:?}"),
    }

    socket.close(None).await.unwrap();
}

#[tokio::test]
async fn origin_is_kept_without_rewrite() {
    let backend = common::start_ws_backend().await;
    let proxy = common::start_proxy(common::config_with(vec![ws_route("/live", backend.addr)])).await;

    let mut request = proxy.ws_url("/live").into_client_request().unwrap();
    request
        .headers_mut()
        .insert("origin", "http://localhost:5173".parse().unwrap());
    let (_socket, _) = connect_async(request).await.unwrap();

    let seen = backend.last();
    assert_eq!(seen.path, "/live");
    assert_eq!(seen.origin.as_deref(), Some("http://localhost:5173"));
    assert_eq!(seen.host, Some(proxy.addr.to_string()));
}

#[tokio::test]
async fn subprotocol_chosen_upstream_is_echoed() {
    let backend = common::start_ws_backend().await;
    let proxy = common::start_proxy(common::config_with(vec![ws_route("/live", backend.addr)])).await;

    let mut request = proxy.ws_url("/live").into_client_request().unwrap();
    request
        .headers_mut()
        .insert("sec-websocket-protocol", "chat.v2, chat.v1".parse().unwrap());
    let (_socket, response) = connect_async(request).await.unwrap();

    assert_eq!(response.headers()["sec-websocket-protocol"], "chat.v2");
}

#[tokio::test]
async fn upstream_close_code_reaches_client() {
    let backend = common::start_ws_backend().await;
    let proxy = common::start_proxy(common::config_with(vec![ws_route("/live", backend.addr)])).await;

    let (mut socket, _) = connect_async(proxy.ws_url("/live/close")).await.unwrap();
    match socket.next().await {
        Some(Ok(Message::Close(Some(frame)))) => {
            assert_eq!(u16::from(frame.code), 4000);
            assert_eq!(frame.reason.as_str(), "bye");
        }
        other => panic!("expected close frame, got {other:?}"),
    }
}

#[tokio::test]
async fn plain_request_on_websocket_route_is_forwarded_as_http() {
    let backend = common::start_echo_backend("api").await;
    let proxy = common::start_proxy(common::config_with(vec![ws_route("/live", backend)])).await;

    let response = common::client().get(proxy.url("/live/status")).send().await.unwrap();
    assert_eq!(response.status(), 200);
    assert!(response.text().await.unwrap().contains("path: /live/status"));
}

#[tokio::test]
async fn idle_pipe_is_closed_on_both_legs() {
    let backend = common::start_ws_backend().await;
    let proxy = common::start_proxy(ProxyConfig {
        timeouts: TimeoutConfig {
            websocket_idle_secs: 1,
            ..TimeoutConfig::default()
        },
        ..common::config_with(vec![ws_route("/live", backend.addr)])
    })
    .await;

    let (mut socket, _) = connect_async(proxy.ws_url("/live")).await.unwrap();
    let closed = tokio::time::timeout(Duration::from_secs(5), socket.next())
        .await
        .expect("idle pipe was not closed");
    match closed {
        Some(Ok(Message::Close(Some(frame)))) => assert_eq!(u16::from(frame.code), 1001),
        other => panic!("expected close frame, got {other:?}"),
    }
    assert_eq!(backend.close_code().await, 1001);
}

#[tokio::test]
async fn upgrade_on_plain_route_is_forwarded_without_upgrade_headers() {
    let backend = common::start_echo_backend("api").await;
    let proxy = common::start_proxy(common::config_with(vec![common::route("/api", backend)])).await;

    let response = common::client()
        .get(proxy.url("/api/socket"))
        .header("connection", "upgrade")
        .header("upgrade", "websocket")
        .header("sec-websocket-version", "13")
        .header("sec-websocket-key", "dGhlIHNhbXBsZSBub25jZQ==")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    let body = response.text().await.unwrap();
    assert!(body.contains("path: /api/socket"));
    assert!(!body.lines().any(|l| l.starts_with("upgrade:")));
    assert!(!body.lines().any(|l| l == "connection: upgrade"));
}

#[tokio::test]
async fn open_pipe_holds_its_listener_slot() {
    let backend = common::start_ws_backend().await;
    let proxy = common::start_proxy(ProxyConfig {
        listener: ListenerConfig {
            max_connections: 1,
            ..ListenerConfig::default()
        },
        ..common::config_with(vec![ws_route("/live", backend.addr)])
    })
    .await;
    let client = common::client();

    let (mut socket, _) = connect_async(proxy.ws_url("/live")).await.unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;

    // The only slot belongs to the pipe, so a new connection waits in the backlog.
    let blocked = tokio::time::timeout(
        Duration::from_millis(500),
        client.get(proxy.url("/healthz")).send(),
    )
    .await;
    assert!(blocked.is_err(), "request was served while the pipe was open");

    socket.close(None).await.unwrap();
    while let Some(Ok(_)) = socket.next().await {}

    let mut served = false;
    for _ in 0..20 {
        let attempt = tokio::time::timeout(
            Duration::from_secs(1),
            client.get(proxy.url("/healthz")).send(),
        )
        .await;
        if let Ok(Ok(response)) = attempt {
            assert_eq!(response.status(), 200);
            served = true;
            break;
        }
    }
    assert!(served, "slot was not released when the pipe closed");
}
