//! Command channel supervision: dial, heartbeat, frame routing.
//!
//! Owns the WebSocket handle from `simbridge-api` and translates its
//! socket events into unified-state updates and gateway events. The
//! channel never redials on its own; a drop is reported and the
//! recovery engine decides what happens next.

use std::sync::Arc;

use chrono::Utc;
use simbridge_api::TokenManager;
use simbridge_api::wire::{ChannelFrame, ChannelMessage};
use simbridge_api::ws::{CommandSocket, SocketEvent};
use tokio::sync::{Mutex, broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::config::GatewayConfig;
use crate::error::CoreError;
use crate::event::GatewayEvent;
use crate::state::{ChannelId, ChannelStatus, ConnectionState};

#[derive(Default)]
struct Runtime {
    socket: Option<CommandSocket>,
    tasks: Vec<JoinHandle<()>>,
    conn_cancel: Option<CancellationToken>,
    connecting: bool,
}

struct CommandInner {
    config: GatewayConfig,
    tokens: TokenManager,
    unified: Arc<ConnectionState>,
    events: broadcast::Sender<GatewayEvent>,
    runtime: Mutex<Runtime>,
    cancel: CancellationToken,
}

/// One logical command channel, reconnected across many sockets.
#[derive(Clone)]
pub(crate) struct CommandChannel {
    inner: Arc<CommandInner>,
}

impl CommandChannel {
    pub(crate) fn new(
        config: GatewayConfig,
        tokens: TokenManager,
        unified: Arc<ConnectionState>,
        events: broadcast::Sender<GatewayEvent>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            inner: Arc::new(CommandInner {
                config,
                tokens,
                unified,
                events,
                runtime: Mutex::new(Runtime::default()),
                cancel,
            }),
        }
    }

    /// Establish the channel. Returns `Ok(false)` when a connection is
    /// already up or being dialled, `Ok(true)` once a fresh socket is
    /// connected and its pump and heartbeat tasks are running.
    pub(crate) async fn connect(&self, recovering: bool) -> Result<bool, CoreError> {
        {
            let mut rt = self.inner.runtime.lock().await;
            if rt.connecting {
                return Ok(false);
            }
            if rt.socket.as_ref().is_some_and(CommandSocket::is_open) {
                return Ok(false);
            }
            rt.connecting = true;
        }
        let result = self.connect_inner(recovering).await;
        self.inner.runtime.lock().await.connecting = false;
        result
    }

    async fn connect_inner(&self, recovering: bool) -> Result<bool, CoreError> {
        let inner = &self.inner;
        let status = if recovering {
            ChannelStatus::Recovering
        } else {
            ChannelStatus::Connecting
        };
        inner.unified.update_channel(ChannelId::Command, status, None);

        let url = match inner.config.channel_url() {
            Ok(url) => url,
            Err(e) => {
                inner.unified.update_channel(
                    ChannelId::Command,
                    ChannelStatus::Disconnected,
                    Some(e.to_string()),
                );
                return Err(e);
            }
        };

        let Some(token) = inner.tokens.access_token().await else {
            inner.unified.update_channel(
                ChannelId::Command,
                ChannelStatus::Disconnected,
                Some("not authenticated".into()),
            );
            return Err(CoreError::AuthenticationFailed {
                message: "no active session for the command channel".into(),
            });
        };

        let conn_cancel = inner.cancel.child_token();
        {
            let mut rt = inner.runtime.lock().await;
            if let Some(old) = rt.conn_cancel.replace(conn_cancel.clone()) {
                old.cancel();
            }
        }

        let dial = CommandSocket::connect(&url, Some(&token), &conn_cancel);
        let (socket, socket_events) = match tokio::time::timeout(inner.config.timeout, dial).await {
            Ok(Ok(pair)) => pair,
            Ok(Err(e)) => {
                let err = CoreError::from(e);
                inner.unified.update_channel(
                    ChannelId::Command,
                    ChannelStatus::Disconnected,
                    Some(err.to_string()),
                );
                return Err(err);
            }
            Err(_) => {
                conn_cancel.cancel();
                inner.unified.update_channel(
                    ChannelId::Command,
                    ChannelStatus::Disconnected,
                    Some("connection attempt timed out".into()),
                );
                return Err(CoreError::Timeout);
            }
        };

        let mut rt = inner.runtime.lock().await;
        if conn_cancel.is_cancelled() {
            // A disconnect raced the handshake; the new socket loses.
            socket.close();
            return Ok(false);
        }
        for task in rt.tasks.drain(..) {
            task.abort();
        }
        rt.socket = Some(socket);
        rt.tasks.push(tokio::spawn(pump_task(
            self.inner.clone(),
            socket_events,
            conn_cancel.clone(),
        )));
        rt.tasks.push(tokio::spawn(heartbeat_task(
            self.inner.clone(),
            conn_cancel,
        )));
        drop(rt);

        inner
            .unified
            .update_channel(ChannelId::Command, ChannelStatus::Connected, None);
        Ok(true)
    }

    /// Fire-and-forget send. `false` means the channel was not open and
    /// the payload was dropped; nothing is queued for later.
    pub(crate) async fn send(&self, msg: &ChannelMessage) -> bool {
        let rt = self.inner.runtime.lock().await;
        match rt.socket.as_ref() {
            Some(socket) if socket.is_open() => socket.send(msg),
            _ => {
                debug!("command channel not open; outbound message dropped");
                false
            }
        }
    }

    /// Tear the transport down and mark the channel disconnected.
    /// Idempotent; a second call with no live socket changes nothing.
    pub(crate) async fn disconnect(&self, error: Option<String>) {
        let mut rt = self.inner.runtime.lock().await;
        if let Some(cancel) = rt.conn_cancel.take() {
            cancel.cancel();
        }
        if let Some(socket) = rt.socket.take() {
            socket.close();
        }
        for task in rt.tasks.drain(..) {
            task.abort();
        }
        drop(rt);
        self.inner
            .unified
            .update_channel(ChannelId::Command, ChannelStatus::Disconnected, error);
    }
}

// ── Connection tasks ─────────────────────────────────────────────────

/// Route inbound socket events until the connection ends.
async fn pump_task(
    inner: Arc<CommandInner>,
    mut socket_events: mpsc::UnboundedReceiver<SocketEvent>,
    cancel: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            event = socket_events.recv() => match event {
                Some(event) => event,
                None => break,
            },
        };

        match event {
            SocketEvent::Frame(frame) => handle_frame(&inner, frame),
            SocketEvent::Closed { reason, clean } => {
                if clean {
                    info!(reason = reason.as_deref(), "command channel closed by gateway");
                } else {
                    warn!(reason = reason.as_deref(), "command channel dropped");
                }
                let error = reason.unwrap_or_else(|| "connection closed".to_owned());
                inner.unified.update_channel(
                    ChannelId::Command,
                    ChannelStatus::Disconnected,
                    Some(error),
                );
                break;
            }
        }
    }
}

fn handle_frame(inner: &Arc<CommandInner>, frame: ChannelFrame) {
    match frame {
        ChannelFrame::Message(ChannelMessage::HeartbeatAck { seq, sent_at_ms, .. }) => {
            let rtt = (Utc::now().timestamp_millis() - sent_at_ms).max(0) as u64;
            trace!(seq, rtt_ms = rtt, "heartbeat acknowledged");
            inner.unified.record_heartbeat(rtt);
        }
        ChannelFrame::Message(ChannelMessage::SessionExpired { reason }) => {
            warn!(reason = reason.as_deref(), "gateway expired the session");
            // Clearing the token store wakes the session watcher, which
            // owns the logout teardown and the ForcedLogout event.
            inner.tokens.clear();
        }
        ChannelFrame::Message(ChannelMessage::SessionKeepalive { .. })
        | ChannelFrame::Message(ChannelMessage::Heartbeat { .. }) => {
            trace!("ignoring client-direction frame echoed by gateway");
        }
        other => {
            let _ = inner.events.send(GatewayEvent::Message(Arc::new(other)));
        }
    }
}

/// Send a heartbeat every `heartbeat_interval` until the connection is
/// torn down or a send fails.
async fn heartbeat_task(inner: Arc<CommandInner>, cancel: CancellationToken) {
    let mut interval = tokio::time::interval(inner.config.heartbeat_interval);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    interval.tick().await; // consume the immediate first tick

    let mut seq: u64 = 0;
    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            _ = interval.tick() => {}
        }

        seq += 1;
        let msg = ChannelMessage::Heartbeat {
            seq,
            sent_at_ms: Utc::now().timestamp_millis(),
        };
        let sent = {
            let rt = inner.runtime.lock().await;
            rt.socket.as_ref().is_some_and(|socket| socket.send(&msg))
        };
        if !sent {
            debug!(seq, "heartbeat not sent; stopping probe");
            break;
        }
    }
}
