//! Command-channel WebSocket transport.
//!
//! A single connection: handshake, then a pump task that reads frames and
//! writes queued outbound messages until the peer closes or the socket is
//! told to shut down. There is deliberately no reconnect loop here -- the
//! recovery engine in `simbridge-core` is the only component that decides
//! to redial, so a dropped socket just reports [`SocketEvent::Closed`] and
//! ends.
//!
//! # Example
//!
//! ```rust,ignore
//! use simbridge_api::ws::CommandSocket;
//! use tokio_util::sync::CancellationToken;
//! use url::Url;
//!
//! let cancel = CancellationToken::new();
//! let url = Url::parse("wss://gateway.example/ws")?;
//!
//! let (socket, mut events) = CommandSocket::connect(&url, None, &cancel).await?;
//! while let Some(event) = events.recv().await {
//!     println!("{event:?}");
//! }
//! socket.close();
//! ```

use futures_util::{SinkExt, StreamExt};
use secrecy::{ExposeSecret, SecretString};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::{self, ClientRequestBuilder};
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::error::Error;
use crate::wire::{ChannelFrame, ChannelMessage};

// ── Socket events ────────────────────────────────────────────────────

/// What the pump reports to the owner of the socket.
#[derive(Debug)]
pub enum SocketEvent {
    /// A parsed inbound frame.
    Frame(ChannelFrame),

    /// The connection ended. `clean` is true for a server close frame or
    /// a quiet stream end, false for a transport error. The pump emits
    /// this at most once and then stops; a locally requested close emits
    /// nothing (the event channel just ends).
    Closed {
        reason: Option<String>,
        clean: bool,
    },
}

// ── CommandSocket ────────────────────────────────────────────────────

/// Handle to one live command-channel connection.
///
/// Obtained from [`CommandSocket::connect`] together with the event
/// receiver. Dropping the handle or calling [`close`](Self::close) tears
/// down the pump task.
pub struct CommandSocket {
    outbound: mpsc::UnboundedSender<tungstenite::Message>,
    cancel: CancellationToken,
}

impl CommandSocket {
    /// Perform the WebSocket handshake and spawn the pump task.
    ///
    /// `bearer` is attached as an `Authorization` header on the upgrade
    /// request. The handshake itself is awaited, so an `Ok` return means
    /// the channel is up.
    pub async fn connect(
        url: &Url,
        bearer: Option<&SecretString>,
        cancel: &CancellationToken,
    ) -> Result<(Self, mpsc::UnboundedReceiver<SocketEvent>), Error> {
        tracing::info!(url = %url, "connecting command channel");

        let uri: tungstenite::http::Uri = url
            .as_str()
            .parse()
            .map_err(|e: tungstenite::http::uri::InvalidUri| Error::ChannelConnect(e.to_string()))?;

        let mut request = ClientRequestBuilder::new(uri);
        if let Some(token) = bearer {
            request =
                request.with_header("Authorization", format!("Bearer {}", token.expose_secret()));
        }

        let (ws_stream, _response) = tokio_tungstenite::connect_async(request)
            .await
            .map_err(|e| Error::ChannelConnect(e.to_string()))?;

        tracing::info!("command channel connected");

        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let socket_cancel = cancel.child_token();

        let pump_cancel = socket_cancel.clone();
        tokio::spawn(async move {
            pump(ws_stream, event_tx, outbound_rx, pump_cancel).await;
        });

        Ok((
            Self {
                outbound: outbound_tx,
                cancel: socket_cancel,
            },
            event_rx,
        ))
    }

    /// Queue a message for the writer. Returns `false` if the pump has
    /// already stopped or the message cannot be serialized -- the payload
    /// is dropped either way, never buffered for a later connection.
    pub fn send(&self, msg: &ChannelMessage) -> bool {
        let Some(json) = msg.to_wire() else {
            return false;
        };
        self.outbound
            .send(tungstenite::Message::Text(json.into()))
            .is_ok()
    }

    /// Request a graceful shutdown of the pump task. Idempotent.
    pub fn close(&self) {
        self.cancel.cancel();
    }

    /// Whether the pump is still running.
    pub fn is_open(&self) -> bool {
        !self.outbound.is_closed()
    }
}

// ── Pump ─────────────────────────────────────────────────────────────

/// Drive both directions of the socket until close, error, or cancel.
async fn pump<S>(
    ws_stream: tokio_tungstenite::WebSocketStream<S>,
    event_tx: mpsc::UnboundedSender<SocketEvent>,
    mut outbound_rx: mpsc::UnboundedReceiver<tungstenite::Message>,
    cancel: CancellationToken,
) where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
{
    let (mut write, mut read) = ws_stream.split();

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                // Locally requested close: best-effort close frame, no event.
                let _ = write.send(tungstenite::Message::Close(None)).await;
                tracing::debug!("command channel closed locally");
                return;
            }
            outgoing = outbound_rx.recv() => {
                let Some(msg) = outgoing else { return };
                if let Err(e) = write.send(msg).await {
                    let _ = event_tx.send(SocketEvent::Closed {
                        reason: Some(e.to_string()),
                        clean: false,
                    });
                    return;
                }
            }
            frame = read.next() => {
                match frame {
                    Some(Ok(tungstenite::Message::Text(text))) => {
                        match ChannelFrame::parse(&text) {
                            Some(parsed) => {
                                let _ = event_tx.send(SocketEvent::Frame(parsed));
                            }
                            None => {
                                tracing::debug!("dropping untyped command-channel frame");
                            }
                        }
                    }
                    Some(Ok(tungstenite::Message::Ping(_))) => {
                        // tungstenite replies with pong automatically
                        tracing::trace!("command channel ping");
                    }
                    Some(Ok(tungstenite::Message::Close(frame))) => {
                        let reason = frame.as_ref().map(|cf| cf.reason.to_string());
                        if let Some(ref cf) = frame {
                            tracing::info!(code = %cf.code, reason = %cf.reason, "close frame received");
                        } else {
                            tracing::info!("close frame received (no payload)");
                        }
                        let _ = event_tx.send(SocketEvent::Closed { reason, clean: true });
                        return;
                    }
                    Some(Err(e)) => {
                        let _ = event_tx.send(SocketEvent::Closed {
                            reason: Some(e.to_string()),
                            clean: false,
                        });
                        return;
                    }
                    None => {
                        // Stream ended without a close frame
                        tracing::info!("command channel stream ended");
                        let _ = event_tx.send(SocketEvent::Closed { reason: None, clean: true });
                        return;
                    }
                    _ => {
                        // Binary, Pong, Frame -- ignore
                    }
                }
            }
        }
    }
}
