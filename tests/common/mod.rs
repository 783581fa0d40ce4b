//! Shared utilities for integration testing.
//!
//! A mock Emby upstream built from an axum router, and a relay pointed at it,
//! both on ephemeral loopback ports.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::time::Duration;

use axum::{
    body::{Body, Bytes},
    extract::{
        ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade},
        State,
    },
    http::{header, HeaderMap, Method, Uri},
    response::{IntoResponse, Redirect, Response},
    routing::{any, get, post},
    Json, Router,
};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use emby_relay::accounting::StreamAccounting;
use emby_relay::config::RelayConfig;
use emby_relay::http::RelayTracker;
use emby_relay::{HttpServer, Shutdown};

/// Bytes served by the mock media endpoint.
pub const VIDEO_CHUNK: usize = 4096;
pub const VIDEO_CHUNKS: usize = 16;

/// Serve `router` on an ephemeral port.
pub async fn spawn_upstream(router: Router) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    addr
}

/// An address with nothing listening on it.
pub async fn unused_addr() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap()
}

pub fn relay_config(upstream: SocketAddr) -> RelayConfig {
    let mut config = RelayConfig::default();
    config.listener.host = "127.0.0.1".to_string();
    config.listener.shutdown_grace_secs = 2;
    config.upstream.server = Some(format!("http://{}", upstream));
    config.upstream.allow_plaintext = true;
    config.timeouts.connect_secs = 2;
    config
}

pub struct TestRelay {
    pub addr: SocketAddr,
    pub shutdown: Shutdown,
    pub accounting: StreamAccounting,
    pub tracker: RelayTracker,
    pub task: JoinHandle<()>,
}

impl TestRelay {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub fn ws_url(&self, path: &str) -> String {
        format!("ws://{}{}", self.addr, path)
    }

    /// Wait until no WebSocket relays are open.
    pub async fn websockets_drained(&self) -> bool {
        for _ in 0..100 {
            if self.tracker.websocket_count() == 0 {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        false
    }
}

pub async fn spawn_relay(config: RelayConfig) -> TestRelay {
    let shutdown = Shutdown::new();
    let server = HttpServer::new(config, shutdown.clone()).unwrap();
    let accounting = server.accounting();
    let tracker = server.state().tracker.clone();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let task = tokio::spawn(async move {
        server.run(listener).await.unwrap();
    });

    TestRelay {
        addr,
        shutdown,
        accounting,
        tracker,
        task,
    }
}

/// HTTP client that surfaces redirects instead of following them.
pub fn http_client() -> reqwest::Client {
    reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .build()
        .unwrap()
}

/// Events observed by the mock upstream's WebSocket endpoints.
pub type UpstreamEvents = mpsc::UnboundedReceiver<String>;

/// A mock Emby server.
///
/// - `/echo` reflects method, URI, headers and body as JSON
/// - `/upload` returns the request body
/// - `/secure` sends headers the relay must strip
/// - `/Videos/{id}/stream.mp4` streams `video/mp4`
/// - `/LiveTv/stream.ts` streams forever and reports when its body is dropped
/// - `/redirect`, `/loop` redirect
/// - `/embywebsocket` echoes frames; `/closing` says bye and closes;
///   `/wsheaders` sends its handshake headers as the first frame
pub fn mock_emby() -> (Router, UpstreamEvents) {
    let (events_tx, events_rx) = mpsc::unbounded_channel();

    let router = Router::new()
        .route("/echo", any(echo))
        .route("/upload", post(upload))
        .route("/secure", get(secure))
        .route("/Videos/{id}/stream.mp4", get(video))
        .route("/LiveTv/stream.ts", get(live_video))
        .route("/redirect", get(|| async { Redirect::to("/echo?from=redirect") }))
        .route("/loop", get(|| async { Redirect::temporary("/loop") }))
        .route("/embywebsocket", get(ws_echo))
        .route("/closing", get(ws_closing))
        .route("/wsheaders", get(ws_headers))
        .with_state(events_tx);

    (router, events_rx)
}

fn header_map(headers: &HeaderMap) -> BTreeMap<String, String> {
    headers
        .iter()
        .map(|(k, v)| (k.to_string(), String::from_utf8_lossy(v.as_bytes()).into_owned()))
        .collect()
}

async fn echo(method: Method, uri: Uri, headers: HeaderMap, body: Bytes) -> Json<Value> {
    Json(json!({
        "method": method.as_str(),
        "uri": uri.to_string(),
        "headers": header_map(&headers),
        "body_len": body.len(),
    }))
}

async fn upload(body: Bytes) -> Bytes {
    body
}

async fn secure() -> impl IntoResponse {
    (
        [
            ("strict-transport-security", "max-age=63072000"),
            ("content-security-policy", "frame-ancestors 'none'"),
            ("access-control-allow-origin", "https://emby.example.com"),
            ("x-emby-server", "mock"),
        ],
        "ok",
    )
}

async fn video() -> impl IntoResponse {
    let chunks = (0..VIDEO_CHUNKS).map(|i| Ok::<_, std::io::Error>(Bytes::from(vec![i as u8; VIDEO_CHUNK])));
    (
        [(header::CONTENT_TYPE, "video/mp4")],
        Body::from_stream(futures_util::stream::iter(chunks)),
    )
}

/// Sends an event when dropped.
struct DropSignal {
    events: mpsc::UnboundedSender<String>,
    event: &'static str,
}

impl Drop for DropSignal {
    fn drop(&mut self) {
        let _ = self.events.send(self.event.to_string());
    }
}

async fn live_video(State(events): State<mpsc::UnboundedSender<String>>) -> impl IntoResponse {
    let signal = DropSignal {
        events,
        event: "media body dropped",
    };
    let chunks = futures_util::stream::unfold(signal, |signal| async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        Some((Ok::<_, std::io::Error>(Bytes::from(vec![9u8; VIDEO_CHUNK])), signal))
    });
    (
        [(header::CONTENT_TYPE, "video/mp2t")],
        Body::from_stream(chunks),
    )
}

/// A host that redirects every GET on `/elsewhere` to `target`.
pub fn redirecting_host(target: String) -> Router {
    Router::new().route(
        "/elsewhere",
        get(move || {
            let target = target.clone();
            async move { Redirect::temporary(&target) }
        }),
    )
}

async fn ws_echo(ws: WebSocketUpgrade, State(events): State<mpsc::UnboundedSender<String>>) -> Response {
    ws.on_upgrade(move |mut socket: WebSocket| async move {
        while let Some(Ok(message)) = socket.recv().await {
            match message {
                Message::Text(_) | Message::Binary(_) => {
                    if socket.send(message).await.is_err() {
                        break;
                    }
                }
                Message::Close(frame) => {
                    let code = frame.map(|f| f.code).unwrap_or_default();
                    let _ = events.send(format!("close {}", code));
                    return;
                }
                _ => {}
            }
        }
        let _ = events.send("gone".to_string());
    })
}

async fn ws_closing(ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(|mut socket: WebSocket| async move {
        let _ = socket.send(Message::Text("bye".to_string().into())).await;
        let _ = socket
            .send(Message::Close(Some(CloseFrame {
                code: 1000,
                reason: "done".to_string().into(),
            })))
            .await;
        // Drain until the peer acknowledges.
        while let Some(Ok(_)) = socket.recv().await {}
    })
}

async fn ws_headers(ws: WebSocketUpgrade, headers: HeaderMap) -> Response {
    let report = serde_json::to_string(&header_map(&headers)).unwrap_or_default();
    ws.on_upgrade(move |mut socket: WebSocket| async move {
        let _ = socket.send(Message::Text(report.into())).await;
        while let Some(Ok(_)) = socket.recv().await {}
    })
}
