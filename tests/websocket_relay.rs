//! End-to-end tests for WebSocket relaying.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::protocol::{frame::coding::CloseCode, CloseFrame};
use tokio_tungstenite::tungstenite::Message;

use emby_relay::http::request::MOBILE_USER_AGENT;

mod common;

use common::{mock_emby, relay_config, spawn_relay, spawn_upstream, unused_addr};

const WAIT: Duration = Duration::from_secs(5);

#[tokio::test]
async fn frames_are_relayed_in_order() {
    let (router, _events) = mock_emby();
    let relay = spawn_relay(relay_config(spawn_upstream(router).await)).await;

    let (mut socket, _) = connect_async(relay.ws_url("/embywebsocket?api_key=abc&deviceId=test"))
        .await
        .unwrap();

    for i in 0..50 {
        socket.send(Message::text(format!("msg-{i}"))).await.unwrap();
    }
    socket.send(Message::binary(vec![0u8, 1, 2, 254, 255])).await.unwrap();

    for i in 0..50 {
        let message = tokio::time::timeout(WAIT, socket.next()).await.unwrap().unwrap().unwrap();
        assert_eq!(message.to_text().unwrap(), format!("msg-{i}"));
    }
    let message = tokio::time::timeout(WAIT, socket.next()).await.unwrap().unwrap().unwrap();
    assert!(message.is_binary());
    assert_eq!(&message.into_data()[..], &[0u8, 1, 2, 254, 255]);

    assert_eq!(relay.tracker.websocket_count(), 1);
    socket.close(None).await.unwrap();
    assert!(relay.websockets_drained().await);
}

#[tokio::test]
async fn upstream_handshake_carries_rewritten_headers() {
    let (router, _events) = mock_emby();
    let upstream = spawn_upstream(router).await;
    let relay = spawn_relay(relay_config(upstream)).await;

    let mut request = tokio_tungstenite::tungstenite::client::IntoClientRequest::into_client_request(
        relay.ws_url("/wsheaders"),
    )
    .unwrap();
    request.headers_mut().insert("sec-ch-ua-mobile", "?1".parse().unwrap());
    request.headers_mut().insert("x-emby-token", "abc123".parse().unwrap());

    let (mut socket, _) = connect_async(request).await.unwrap();
    let message = tokio::time::timeout(WAIT, socket.next()).await.unwrap().unwrap().unwrap();
    let headers: Value = serde_json::from_str(message.to_text().unwrap()).unwrap();

    assert_eq!(headers["host"], upstream.to_string());
    assert_eq!(headers["origin"], format!("http://{}", upstream));
    assert_eq!(headers["user-agent"], MOBILE_USER_AGENT);
    assert_eq!(headers["x-emby-token"], "abc123");
}

#[tokio::test]
async fn client_close_reaches_the_upstream() {
    let (router, mut events) = mock_emby();
    let relay = spawn_relay(relay_config(spawn_upstream(router).await)).await;

    let (mut socket, _) = connect_async(relay.ws_url("/embywebsocket")).await.unwrap();
    socket.send(Message::text("hello".to_string())).await.unwrap();
    let echoed = tokio::time::timeout(WAIT, socket.next()).await.unwrap().unwrap().unwrap();
    assert_eq!(echoed.to_text().unwrap(), "hello");

    socket
        .close(Some(CloseFrame {
            code: CloseCode::Normal,
            reason: "leaving".to_string().into(),
        }))
        .await
        .unwrap();

    let event = tokio::time::timeout(WAIT, events.recv()).await.unwrap().unwrap();
    assert_eq!(event, "close 1000");
    assert!(relay.websockets_drained().await);
}

#[tokio::test]
async fn upstream_close_reaches_the_client() {
    let (router, _events) = mock_emby();
    let relay = spawn_relay(relay_config(spawn_upstream(router).await)).await;

    let (mut socket, _) = connect_async(relay.ws_url("/closing")).await.unwrap();

    let first = tokio::time::timeout(WAIT, socket.next()).await.unwrap().unwrap().unwrap();
    assert_eq!(first.to_text().unwrap(), "bye");

    let close = tokio::time::timeout(WAIT, socket.next()).await.unwrap().unwrap().unwrap();
    match close {
        Message::Close(Some(frame)) => {
            assert_eq!(frame.code, CloseCode::Normal);
            assert_eq!(frame.reason.as_str(), "done");
        }
        other => panic!("expected close frame, got {other:?}"),
    }

    assert!(relay.websockets_drained().await);
}

#[tokio::test]
async fn unreachable_upstream_closes_the_client() {
    let relay = spawn_relay(relay_config(unused_addr().await)).await;

    let (mut socket, _) = connect_async(relay.ws_url("/embywebsocket")).await.unwrap();

    let message = tokio::time::timeout(WAIT, socket.next()).await.unwrap().unwrap().unwrap();
    match message {
        Message::Close(Some(frame)) => assert_eq!(frame.code, CloseCode::Away),
        other => panic!("expected close frame, got {other:?}"),
    }
}

#[tokio::test]
async fn independent_sessions_do_not_interfere() {
    let (router, _events) = mock_emby();
    let relay = spawn_relay(relay_config(spawn_upstream(router).await)).await;

    let (mut first, _) = connect_async(relay.ws_url("/embywebsocket")).await.unwrap();
    let (mut second, _) = connect_async(relay.ws_url("/embywebsocket")).await.unwrap();

    first.send(Message::text("one".to_string())).await.unwrap();
    second.send(Message::text("two".to_string())).await.unwrap();

    let reply = tokio::time::timeout(WAIT, second.next()).await.unwrap().unwrap().unwrap();
    assert_eq!(reply.to_text().unwrap(), "two");

    first.close(None).await.unwrap();

    second.send(Message::text("still here".to_string())).await.unwrap();
    let reply = tokio::time::timeout(WAIT, second.next()).await.unwrap().unwrap().unwrap();
    assert_eq!(reply.to_text().unwrap(), "still here");
}
