#![allow(clippy::unwrap_used)]
// Integration tests for the command-channel socket against an in-process
// WebSocket server.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use url::Url;

use simbridge_api::wire::{ChannelFrame, ChannelMessage};
use simbridge_api::ws::{CommandSocket, SocketEvent};

// ── Helpers ─────────────────────────────────────────────────────────

/// Bind a one-shot WebSocket server; `serve` gets the accepted stream.
async fn spawn_server<F, Fut>(serve: F) -> Url
where
    F: FnOnce(tokio_tungstenite::WebSocketStream<tokio::net::TcpStream>) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        serve(ws).await;
    });

    Url::parse(&format!("ws://{addr}/ws")).unwrap()
}

async fn next_event(
    events: &mut tokio::sync::mpsc::UnboundedReceiver<SocketEvent>,
) -> SocketEvent {
    tokio::time::timeout(Duration::from_secs(5), events.recv())
        .await
        .expect("timed out waiting for socket event")
        .expect("event channel ended unexpectedly")
}

// ── Tests ───────────────────────────────────────────────────────────

#[tokio::test]
async fn heartbeat_round_trip_and_server_close() {
    let url = spawn_server(|mut ws| async move {
        // Expect one heartbeat, echo the ack, then close.
        while let Some(Ok(msg)) = ws.next().await {
            if let Message::Text(text) = msg {
                let hb: serde_json::Value = serde_json::from_str(&text).unwrap();
                assert_eq!(hb["type"], "heartbeat");

                let ack = serde_json::json!({
                    "type": "heartbeat_ack",
                    "seq": hb["seq"],
                    "sentAtMs": hb["sentAtMs"],
                    "serverTimeMs": 1_700_000_000_500_i64
                });
                ws.send(Message::Text(ack.to_string().into())).await.unwrap();
                break;
            }
        }
        ws.close(None).await.ok();
    })
    .await;

    let cancel = CancellationToken::new();
    let (socket, mut events) = CommandSocket::connect(&url, None, &cancel).await.unwrap();

    assert!(socket.send(&ChannelMessage::Heartbeat {
        seq: 1,
        sent_at_ms: 1_700_000_000_000,
    }));

    match next_event(&mut events).await {
        SocketEvent::Frame(ChannelFrame::Message(ChannelMessage::HeartbeatAck {
            seq,
            sent_at_ms,
            server_time_ms,
        })) => {
            assert_eq!(seq, 1);
            assert_eq!(sent_at_ms, 1_700_000_000_000);
            assert_eq!(server_time_ms, Some(1_700_000_000_500));
        }
        other => panic!("expected heartbeat ack, got: {other:?}"),
    }

    match next_event(&mut events).await {
        SocketEvent::Closed { clean, .. } => assert!(clean, "server close is a clean shutdown"),
        other => panic!("expected Closed, got: {other:?}"),
    }
}

#[tokio::test]
async fn unknown_frames_pass_through() {
    let url = spawn_server(|mut ws| async move {
        let payload = r#"{"type":"risk_alert","severity":"high"}"#;
        ws.send(Message::Text(payload.into())).await.unwrap();
        ws.close(None).await.ok();
    })
    .await;

    let cancel = CancellationToken::new();
    let (_socket, mut events) = CommandSocket::connect(&url, None, &cancel).await.unwrap();

    match next_event(&mut events).await {
        SocketEvent::Frame(ChannelFrame::Unknown { kind, payload }) => {
            assert_eq!(kind, "risk_alert");
            assert_eq!(payload["severity"], "high");
        }
        other => panic!("expected Unknown frame, got: {other:?}"),
    }
}

#[tokio::test]
async fn local_close_ends_events_without_closed_event() {
    let url = spawn_server(|mut ws| async move {
        // Hold the connection open until the client closes.
        while let Some(Ok(msg)) = ws.next().await {
            if matches!(msg, Message::Close(_)) {
                break;
            }
        }
    })
    .await;

    let cancel = CancellationToken::new();
    let (socket, mut events) = CommandSocket::connect(&url, None, &cancel).await.unwrap();

    socket.close();

    // The pump exits without emitting Closed for a local close; the
    // channel just ends.
    let next = tokio::time::timeout(Duration::from_secs(5), events.recv())
        .await
        .expect("timed out waiting for channel end");
    assert!(next.is_none(), "local close should not emit an event, got: {next:?}");
}

#[tokio::test]
async fn send_after_close_is_dropped() {
    let url = spawn_server(|mut ws| async move {
        while let Some(Ok(msg)) = ws.next().await {
            if matches!(msg, Message::Close(_)) {
                break;
            }
        }
    })
    .await;

    let cancel = CancellationToken::new();
    let (socket, mut events) = CommandSocket::connect(&url, None, &cancel).await.unwrap();

    socket.close();
    while events.recv().await.is_some() {}

    assert!(
        !socket.send(&ChannelMessage::Heartbeat { seq: 9, sent_at_ms: 0 }),
        "send after close must report the drop"
    );
    assert!(!socket.is_open());
}

#[tokio::test]
async fn connect_refused_maps_to_channel_error() {
    // Bind and immediately drop to get a port nothing listens on.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let url = Url::parse(&format!("ws://{addr}/ws")).unwrap();
    let cancel = CancellationToken::new();

    let result = CommandSocket::connect(&url, None, &cancel).await;
    assert!(
        matches!(result, Err(simbridge_api::Error::ChannelConnect(_))),
        "expected ChannelConnect error"
    );
}
