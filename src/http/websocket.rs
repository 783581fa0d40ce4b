//! WebSocket proxy handling.
//!
//! # Responsibilities
//! - Complete upgrade handshake with client
//! - Establish WebSocket connection to the upstream at the same path and query
//! - Bidirectional message forwarding
//!
//! # Data Flow
//! ```text
//! Client ←──── WebSocket messages ────→ Relay ←──── WebSocket messages ────→ Upstream
//! ```
//!
//! # Design Decisions
//! - Text, Binary and Close are forwarded unmodified and in order
//! - Ping/pong is answered per hop, not forwarded
//! - Either side closing or failing tears down the pair; other relays are unaffected

use std::time::Duration;

use axum::extract::ws::{self, WebSocket};
use axum::http::HeaderMap;
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use tokio::sync::broadcast;
use tokio_tungstenite::tungstenite::{
    self,
    client::IntoClientRequest,
    handshake::client::Request as UpstreamRequest,
    protocol::{frame::coding::CloseCode, CloseFrame},
};

use crate::http::connection::{RelayGuard, RelayPhase};
use crate::http::request::websocket_headers;
use crate::observability::metrics;
use crate::upstream::UpstreamTarget;

/// Build the upstream handshake request for `path_and_query`.
///
/// The dialer generates `Host`, `Upgrade`, `Connection` and the key/version
/// headers; transformed inbound headers are layered on top.
pub fn upstream_request(
    upstream: &UpstreamTarget,
    path_and_query: &str,
    inbound: &HeaderMap,
) -> Result<UpstreamRequest, tungstenite::Error> {
    let url = upstream.websocket_url(path_and_query);
    let mut request = url.as_str().into_client_request()?;
    request.headers_mut().extend(websocket_headers(inbound, upstream));
    Ok(request)
}

/// Subprotocols offered by the client, in preference order.
pub fn offered_protocols(headers: &HeaderMap) -> Vec<String> {
    headers
        .get_all(axum::http::header::SEC_WEBSOCKET_PROTOCOL)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .map(|p| p.trim().to_string())
        .filter(|p| !p.is_empty())
        .collect()
}

/// Inputs for one WebSocket relay.
pub struct WebSocketRelay {
    pub guard: RelayGuard,
    pub request: UpstreamRequest,
    pub connect_timeout: Duration,
    pub shutdown: broadcast::Receiver<()>,
}

impl WebSocketRelay {
    /// Connect upstream and relay frames until either side finishes.
    pub async fn run(self, mut client: WebSocket) {
        let WebSocketRelay {
            mut guard,
            request,
            connect_timeout,
            mut shutdown,
        } = self;

        let relay_id = guard.id();
        let target = request.uri().to_string();
        guard.transition(RelayPhase::UpgradedToWebSocket);
        tracing::info!(relay_id = %relay_id, upstream_url = %target, "WebSocket connection established with client");

        let connect = tokio::time::timeout(connect_timeout, tokio_tungstenite::connect_async(request));
        let upstream = match connect.await {
            Ok(Ok((stream, _response))) => stream,
            Ok(Err(e)) => {
                tracing::warn!(relay_id = %relay_id, upstream_url = %target, error = %e, "WebSocket upstream connection failed");
                metrics::record_upstream_error("websocket_connect");
                let _ = client.send(ws::Message::Close(Some(going_away("upstream unavailable")))).await;
                guard.transition(RelayPhase::Errored);
                return;
            }
            Err(_) => {
                tracing::warn!(relay_id = %relay_id, upstream_url = %target, "WebSocket upstream connection timed out");
                metrics::record_upstream_error("websocket_timeout");
                let _ = client.send(ws::Message::Close(Some(going_away("upstream timeout")))).await;
                guard.transition(RelayPhase::Errored);
                return;
            }
        };

        metrics::websocket_opened();
        tracing::debug!(relay_id = %relay_id, "WebSocket upstream connected");

        let (client_tx, client_rx) = client.split();
        let (upstream_tx, upstream_rx) = upstream.split();

        let client_to_upstream = pump(client_rx, upstream_tx, to_upstream, is_upstream_close, "client", "upstream");
        let upstream_to_client = pump(upstream_rx, client_tx, to_client, is_client_close, "upstream", "client");

        let outcome = tokio::select! {
            outcome = client_to_upstream => outcome,
            outcome = upstream_to_client => outcome,
            _ = shutdown.recv() => {
                tracing::debug!(relay_id = %relay_id, "Closing WebSocket relay for shutdown");
                PumpOutcome::Closed("shutdown")
            }
        };

        metrics::websocket_closed();
        match outcome {
            PumpOutcome::Closed(by) => {
                tracing::info!(relay_id = %relay_id, closed_by = by, "WebSocket relay closed");
                guard.transition(RelayPhase::Closed);
            }
            PumpOutcome::Failed(side, error) => {
                tracing::warn!(relay_id = %relay_id, side = side, error = %error, "WebSocket relay error");
                guard.transition(RelayPhase::Errored);
            }
        }
    }
}

/// How one forwarding direction ended.
enum PumpOutcome {
    /// The named side closed.
    Closed(&'static str),
    /// The named side failed.
    Failed(&'static str, String),
}

/// Forward messages from `rx` to `tx` until a close or error.
///
/// The sink is closed on the way out so the peer sees the teardown.
async fn pump<Rx, Tx, In, Out, E1, E2>(
    mut rx: Rx,
    mut tx: Tx,
    convert: fn(In) -> Option<Out>,
    closes: fn(&Out) -> bool,
    from: &'static str,
    to: &'static str,
) -> PumpOutcome
where
    Rx: Stream<Item = Result<In, E1>> + Unpin,
    Tx: Sink<Out, Error = E2> + Unpin,
    E1: std::fmt::Display,
    E2: std::fmt::Display,
{
    let outcome = loop {
        let message = match rx.next().await {
            Some(Ok(message)) => message,
            Some(Err(e)) => break PumpOutcome::Failed(from, e.to_string()),
            None => break PumpOutcome::Closed(from),
        };

        let Some(message) = convert(message) else {
            continue;
        };

        let is_close = closes(&message);
        if let Err(e) = tx.send(message).await {
            break PumpOutcome::Failed(to, e.to_string());
        }
        metrics::record_websocket_message(if from == "client" { "upstream" } else { "downstream" });

        if is_close {
            break PumpOutcome::Closed(from);
        }
    };

    let _ = tx.close().await;
    outcome
}

fn is_upstream_close(message: &tungstenite::Message) -> bool {
    matches!(message, tungstenite::Message::Close(_))
}

fn is_client_close(message: &ws::Message) -> bool {
    matches!(message, ws::Message::Close(_))
}

fn going_away(reason: &str) -> ws::CloseFrame {
    ws::CloseFrame {
        code: ws::close_code::AWAY,
        reason: reason.to_string().into(),
    }
}

/// Map a client message onto the upstream socket. Ping/pong stay per hop.
fn to_upstream(message: ws::Message) -> Option<tungstenite::Message> {
    match message {
        ws::Message::Text(text) => Some(tungstenite::Message::text(text.as_str().to_string())),
        ws::Message::Binary(data) => Some(tungstenite::Message::binary(data)),
        ws::Message::Close(frame) => Some(tungstenite::Message::Close(frame.map(|f| CloseFrame {
            code: CloseCode::from(f.code),
            reason: f.reason.as_str().to_string().into(),
        }))),
        ws::Message::Ping(_) | ws::Message::Pong(_) => None,
    }
}

/// Map an upstream message onto the client socket. Ping/pong stay per hop.
fn to_client(message: tungstenite::Message) -> Option<ws::Message> {
    match message {
        tungstenite::Message::Text(text) => Some(ws::Message::Text(text.as_str().to_string().into())),
        tungstenite::Message::Binary(data) => Some(ws::Message::Binary(data)),
        tungstenite::Message::Close(frame) => Some(ws::Message::Close(frame.map(|f| ws::CloseFrame {
            code: u16::from(f.code),
            reason: f.reason.as_str().to_string().into(),
        }))),
        tungstenite::Message::Ping(_)
        | tungstenite::Message::Pong(_)
        | tungstenite::Message::Frame(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn upstream_request_carries_transformed_headers() {
        let upstream = UpstreamTarget::parse("https://emby.example.com").unwrap();
        let mut inbound = HeaderMap::new();
        inbound.insert("host", HeaderValue::from_static("relay.example.net"));
        inbound.insert("upgrade", HeaderValue::from_static("websocket"));
        inbound.insert("connection", HeaderValue::from_static("Upgrade"));
        inbound.insert("sec-websocket-key", HeaderValue::from_static("dGhlIHNhbXBsZSBub25jZQ=="));
        inbound.insert("sec-websocket-version", HeaderValue::from_static("13"));
        inbound.insert("sec-ch-ua-mobile", HeaderValue::from_static("?1"));
        inbound.insert("x-emby-authorization", HeaderValue::from_static("MediaBrowser Token=abc"));

        let request = upstream_request(&upstream, "/embywebsocket?api_key=abc", &inbound).unwrap();

        assert_eq!(request.uri(), "wss://emby.example.com/embywebsocket?api_key=abc");
        let headers = request.headers();
        assert_eq!(headers["host"], "emby.example.com");
        assert_eq!(headers["origin"], "https://emby.example.com");
        assert_eq!(headers["user-agent"], crate::http::request::MOBILE_USER_AGENT);
        assert_eq!(headers["x-emby-authorization"], "MediaBrowser Token=abc");
        // Handshake headers come from the dialer, exactly once.
        assert_eq!(headers.get_all("sec-websocket-key").iter().count(), 1);
        assert_ne!(headers["sec-websocket-key"], "dGhlIHNhbXBsZSBub25jZQ==");
        assert_eq!(headers["upgrade"], "websocket");
    }

    #[test]
    fn offered_protocols_are_split() {
        let mut headers = HeaderMap::new();
        headers.insert("sec-websocket-protocol", HeaderValue::from_static("emby, json"));
        assert_eq!(offered_protocols(&headers), vec!["emby".to_string(), "json".to_string()]);
        assert!(offered_protocols(&HeaderMap::new()).is_empty());
    }

    #[test]
    fn messages_convert_unmodified() {
        let text = to_upstream(ws::Message::Text("{\"MessageType\":\"KeepAlive\"}".to_string().into())).unwrap();
        assert_eq!(text, tungstenite::Message::text("{\"MessageType\":\"KeepAlive\"}".to_string()));

        let binary = to_client(tungstenite::Message::binary(vec![1u8, 2, 3])).unwrap();
        assert!(matches!(binary, ws::Message::Binary(ref b) if &b[..] == [1, 2, 3]));

        let close = to_client(tungstenite::Message::Close(Some(CloseFrame {
            code: CloseCode::Normal,
            reason: "bye".to_string().into(),
        })))
        .unwrap();
        assert!(matches!(close, ws::Message::Close(Some(ref f)) if f.code == 1000 && f.reason.as_str() == "bye"));

        assert!(to_upstream(ws::Message::Ping(vec![1u8].into())).is_none());
        assert!(is_upstream_close(&tungstenite::Message::Close(None)));
        assert!(!is_client_close(&ws::Message::Text("x".to_string().into())));
    }
}
