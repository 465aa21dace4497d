//! The gateway facade.
//!
//! One [`Gateway`] owns the REST client, the command channel, the push
//! stream, and the recovery engine, and exposes a single event stream
//! plus a watchable connection snapshot. Clones share the same
//! connection.
//!
//! # Example
//!
//! ```rust,ignore
//! use simbridge_core::{Gateway, GatewayConfig};
//!
//! let gateway = Gateway::new(GatewayConfig::default())?;
//! gateway.connect().await?;
//!
//! let mut events = gateway.events();
//! while let Ok(event) = events.recv().await {
//!     println!("{event:?}");
//! }
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use simbridge_api::rest::models::{OrderAck, OrderTicket, SimulatorOptions, SimulatorRun};
use simbridge_api::wire::ChannelMessage;
use simbridge_api::{RestClient, TokenManager, TransportConfig};
use tokio::sync::{Mutex, broadcast, watch};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::WatchStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::channel::command::CommandChannel;
use crate::channel::push::PushStream;
use crate::config::GatewayConfig;
use crate::error::CoreError;
use crate::event::GatewayEvent;
use crate::recovery::{RecoveryEngine, ResilienceMode};
use crate::state::{ChannelId, ChannelStatus, ConnectionSnapshot, ConnectionState};

const EVENT_CHANNEL_SIZE: usize = 256;

/// Why the connection is being taken down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum DisconnectReason {
    /// Go offline but keep the session: connection state survives for
    /// inspection and `connect` can resume without a fresh login.
    UserRequest,
    /// End the session: logs out of the gateway, clears the unified
    /// state and the push-data cache.
    UserLogout,
}

struct GatewayInner {
    config: GatewayConfig,
    tokens: TokenManager,
    rest: RestClient,
    unified: Arc<ConnectionState>,
    engine: RecoveryEngine,
    command: CommandChannel,
    push: PushStream,
    events: broadcast::Sender<GatewayEvent>,
    cancel: CancellationToken,
    disposed: AtomicBool,
    /// Intent flag: only unintentional drops trigger recovery. Cleared
    /// before any deliberate teardown so the supervisor can tell the
    /// difference.
    auto_recover: AtomicBool,
    task_handles: Mutex<Vec<JoinHandle<()>>>,
}

/// Handle to the gateway connection. Cheap to clone.
#[derive(Clone)]
pub struct Gateway {
    inner: Arc<GatewayInner>,
}

impl Gateway {
    /// Build a gateway client. Nothing connects until
    /// [`connect`](Self::connect) is called.
    pub fn new(config: GatewayConfig) -> Result<Self, CoreError> {
        let transport = TransportConfig {
            tls: config.tls.clone(),
            timeout: config.timeout,
        };
        let http = transport.build_client()?;
        let streaming = transport.build_streaming_client()?;

        let tokens = TokenManager::new(config.url.clone(), http.clone());
        let rest = RestClient::new(config.url.clone(), http, tokens.clone());

        let (events, _) = broadcast::channel(EVENT_CHANNEL_SIZE);
        let unified = Arc::new(ConnectionState::new(events.clone()));
        let cancel = CancellationToken::new();

        let engine = RecoveryEngine::new(config.recovery.clone(), unified.clone(), events.clone());
        let command = CommandChannel::new(
            config.clone(),
            tokens.clone(),
            unified.clone(),
            events.clone(),
            cancel.child_token(),
        );
        let push = PushStream::new(
            config.clone(),
            tokens.clone(),
            streaming,
            unified.clone(),
            events.clone(),
            cancel.child_token(),
        );

        Ok(Self {
            inner: Arc::new(GatewayInner {
                config,
                tokens,
                rest,
                unified,
                engine,
                command,
                push,
                events,
                cancel,
                disposed: AtomicBool::new(false),
                auto_recover: AtomicBool::new(false),
                task_handles: Mutex::new(Vec::new()),
            }),
        })
    }

    // ── Lifecycle ────────────────────────────────────────────────────

    /// Log in (when needed) and bring both channels up.
    ///
    /// Refused with [`CoreError::Suspended`] while the circuit breaker
    /// is open. An exhausted engine (`Failed`) is cleared first: a
    /// user-driven connect is a fresh start. The push stream is best
    /// effort; its failure is logged, not returned.
    pub async fn connect(&self) -> Result<(), CoreError> {
        self.ensure_live()?;
        let inner = &self.inner;

        match inner.engine.mode().await {
            ResilienceMode::Suspended => {
                let remaining = inner.engine.suspended_remaining().await.unwrap_or_default();
                return Err(CoreError::Suspended {
                    remaining_secs: remaining.as_secs(),
                });
            }
            ResilienceMode::Failed => {
                debug!("clearing exhausted recovery state for a fresh connect");
                inner.engine.reset().await;
            }
            ResilienceMode::Stable | ResilienceMode::Degraded | ResilienceMode::Recovering => {}
        }

        if !inner.tokens.is_authenticated() {
            let creds = &inner.config.credentials;
            inner.tokens.login(&creds.username, &creds.password).await?;
        }
        inner.engine.update_auth_state(true).await;

        inner.command.connect(false).await?;
        inner.auto_recover.store(true, Ordering::SeqCst);

        if inner.config.push_enabled
            && let Err(e) = inner.push.connect(false).await
        {
            warn!(error = %e, "push stream unavailable; continuing without it");
        }

        self.ensure_supervisor().await;
        info!(url = %inner.config.url, "gateway connected");
        Ok(())
    }

    /// Tear both channels down without triggering recovery.
    pub async fn disconnect(&self, reason: DisconnectReason) -> Result<(), CoreError> {
        self.ensure_live()?;
        let inner = &self.inner;
        info!(reason = %reason, "disconnecting from gateway");

        inner.auto_recover.store(false, Ordering::SeqCst);
        inner.engine.reset().await;
        inner.push.disconnect(None).await;
        inner.command.disconnect(None).await;

        if reason == DisconnectReason::UserLogout {
            inner.push.clear_cache();
            inner.unified.reset();
            inner.engine.update_auth_state(false).await;
            if let Err(e) = inner.tokens.logout().await {
                debug!(error = %e, "server-side logout failed; session cleared locally");
            }
        }
        Ok(())
    }

    /// Ask the recovery engine for an engine-paced reconnection.
    ///
    /// Returns `false` when the engine refuses (suspended, exhausted,
    /// unauthenticated, or a retry already pending).
    pub async fn reconnect(&self) -> Result<bool, CoreError> {
        self.ensure_live()?;
        let gateway = self.clone();
        Ok(self
            .inner
            .engine
            .attempt_reconnection(move || {
                let gateway = gateway.clone();
                async move { gateway.recover_channels().await }
            })
            .await)
    }

    /// Human-driven restart: drops everything, clears the resilience
    /// state (including an open breaker), and dials fresh.
    pub async fn manual_reconnect(&self) -> Result<(), CoreError> {
        self.ensure_live()?;
        info!("manual reconnect requested");
        let inner = &self.inner;
        inner.auto_recover.store(false, Ordering::SeqCst);
        inner.engine.reset().await;
        inner.push.disconnect(None).await;
        inner.command.disconnect(None).await;
        self.connect().await
    }

    /// Stop everything and release background tasks. Terminal and
    /// idempotent; every later call on this gateway fails with
    /// [`CoreError::Disposed`].
    pub async fn dispose(&self) {
        if self.inner.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("disposing gateway");
        let inner = &self.inner;
        inner.auto_recover.store(false, Ordering::SeqCst);
        inner.cancel.cancel();
        inner.engine.dispose().await;
        inner.push.disconnect(None).await;
        inner.command.disconnect(None).await;

        let mut handles = inner.task_handles.lock().await;
        for handle in handles.drain(..) {
            let _ = handle.await;
        }
    }

    // ── Orders ───────────────────────────────────────────────────────

    /// Submit an order. Requires a connected command channel; fills
    /// arrive later as `order_update` messages in the event stream.
    pub async fn submit_order(&self, ticket: &OrderTicket) -> Result<OrderAck, CoreError> {
        self.ensure_ready()?;
        match self.inner.rest.submit_order(ticket).await {
            Ok(ack) => Ok(ack),
            Err(e) => Err(self.note_api_failure(e).await),
        }
    }

    /// Cancel a working order by gateway order id.
    pub async fn cancel_order(&self, order_id: &str) -> Result<OrderAck, CoreError> {
        self.ensure_ready()?;
        match self.inner.rest.cancel_order(order_id).await {
            Ok(ack) => Ok(ack),
            Err(e) => Err(self.note_api_failure(e).await),
        }
    }

    // ── Simulator ────────────────────────────────────────────────────

    pub async fn start_simulator(
        &self,
        options: &SimulatorOptions,
    ) -> Result<SimulatorRun, CoreError> {
        self.ensure_ready()?;
        match self.inner.rest.start_simulator(options).await {
            Ok(run) => Ok(run),
            Err(e) => Err(self.note_api_failure(e).await),
        }
    }

    pub async fn stop_simulator(&self) -> Result<SimulatorRun, CoreError> {
        self.ensure_ready()?;
        match self.inner.rest.stop_simulator().await {
            Ok(run) => Ok(run),
            Err(e) => Err(self.note_api_failure(e).await),
        }
    }

    pub async fn simulator_status(&self) -> Result<SimulatorRun, CoreError> {
        self.ensure_ready()?;
        match self.inner.rest.simulator_status().await {
            Ok(run) => Ok(run),
            Err(e) => Err(self.note_api_failure(e).await),
        }
    }

    // ── Messaging ────────────────────────────────────────────────────

    /// Fire-and-forget send on the command channel. `false` means the
    /// channel was not open and the payload was dropped.
    pub async fn send(&self, msg: &ChannelMessage) -> bool {
        if self.is_disposed() {
            return false;
        }
        self.inner.command.send(msg).await
    }

    // ── Observation ──────────────────────────────────────────────────

    /// Current connection snapshot.
    pub fn state(&self) -> ConnectionSnapshot {
        self.inner.unified.snapshot()
    }

    /// Watch snapshot updates; the receiver always holds the latest.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionSnapshot> {
        self.inner.unified.watch()
    }

    /// Snapshot updates as a `Stream`, for `select!`-style consumers.
    pub fn state_stream(&self) -> WatchStream<ConnectionSnapshot> {
        WatchStream::new(self.inner.unified.watch())
    }

    /// Subscribe to the gateway event stream. Slow subscribers lose
    /// oldest events first (broadcast semantics).
    pub fn events(&self) -> broadcast::Receiver<GatewayEvent> {
        self.inner.events.subscribe()
    }

    /// Merged view of everything the push stream has delivered.
    pub fn push_data(&self) -> Arc<serde_json::Map<String, serde_json::Value>> {
        self.inner.push.latest()
    }

    pub fn is_authenticated(&self) -> bool {
        self.inner.tokens.is_authenticated()
    }

    pub fn session_id(&self) -> Option<String> {
        self.inner.tokens.session_id()
    }

    // ── Internals ────────────────────────────────────────────────────

    fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::SeqCst)
    }

    fn ensure_live(&self) -> Result<(), CoreError> {
        if self.is_disposed() {
            return Err(CoreError::Disposed);
        }
        Ok(())
    }

    fn ensure_ready(&self) -> Result<(), CoreError> {
        self.ensure_live()?;
        if self.inner.unified.snapshot().overall != ChannelStatus::Connected {
            return Err(CoreError::NotConnected);
        }
        Ok(())
    }

    /// Route an API error through the resilience bookkeeping before
    /// handing it to the caller.
    async fn note_api_failure(&self, error: simbridge_api::Error) -> CoreError {
        if error.is_auth_expired() {
            // Wakes the session watcher, which tears the channels down.
            self.inner.tokens.clear();
        } else if error.is_transient() {
            self.inner.engine.record_failure(&error.to_string()).await;
        }
        error.into()
    }

    /// Redial callback handed to the recovery engine.
    async fn recover_channels(&self) -> Result<bool, CoreError> {
        if self.is_disposed() {
            return Ok(false);
        }
        let inner = &self.inner;

        if let Err(e) = inner.command.connect(true).await {
            if e.is_auth_failure() {
                // Surface the dead session to the watcher.
                inner.tokens.clear();
            }
            return Err(e);
        }
        if inner.config.push_enabled
            && let Err(e) = inner.push.connect(true).await
        {
            warn!(error = %e, "push stream not restored; will follow the next cycle");
        }
        Ok(true)
    }

    async fn ensure_supervisor(&self) {
        let mut handles = self.inner.task_handles.lock().await;
        if !handles.is_empty() {
            return;
        }
        let gateway = self.clone();
        let cancel = self.inner.cancel.child_token();
        handles.push(tokio::spawn(supervisor_task(gateway, cancel)));
    }

    /// React to an unintentional command-channel drop.
    async fn handle_command_drop(&self, reason: Option<String>) {
        let inner = &self.inner;
        if self.is_disposed() || !inner.auto_recover.load(Ordering::SeqCst) {
            return;
        }
        if inner.unified.channel(ChannelId::Command).status != ChannelStatus::Disconnected {
            return; // stale event from a connection that already redialled
        }
        if !inner.tokens.is_authenticated() {
            debug!("command channel down without a session; not recovering");
            return;
        }

        // The reported push state was already cascaded by the unified
        // state; this stops the actual stream task.
        inner.push.disconnect(None).await;

        if inner.engine.mode().await == ResilienceMode::Recovering {
            return; // the retry cycle is already driving redials
        }

        let reason = reason.unwrap_or_else(|| "command channel dropped".to_owned());
        warn!(%reason, "command channel lost; starting recovery");
        inner.engine.record_failure(&reason).await;

        let gateway = self.clone();
        let started = inner
            .engine
            .attempt_reconnection(move || {
                let gateway = gateway.clone();
                async move { gateway.recover_channels().await }
            })
            .await;
        if !started {
            debug!("recovery engine declined to retry");
        }
    }

    /// React to the session dying underneath us (expiry frame, 401,
    /// failed refresh). Tears the channels down and reports a forced
    /// logout, exactly once per active session.
    async fn handle_forced_logout(&self) {
        let inner = &self.inner;
        let was_active = inner.auto_recover.swap(false, Ordering::SeqCst);
        if !was_active {
            return; // user-driven logout already tore everything down
        }

        warn!("session ended by the gateway; tearing down");
        inner.engine.update_auth_state(false).await;
        inner.push.disconnect(Some("session ended".into())).await;
        inner.command.disconnect(Some("session ended".into())).await;

        let _ = inner.events.send(GatewayEvent::ForcedLogout {
            reason: "session expired or revoked".to_owned(),
        });
    }
}

// ── Supervisor task ──────────────────────────────────────────────────

/// Watches the event stream and the session for things that demand a
/// reaction: unintentional channel drops start recovery, session loss
/// forces a logout teardown.
async fn supervisor_task(gateway: Gateway, cancel: CancellationToken) {
    let mut events = gateway.inner.events.subscribe();
    let mut session = gateway.inner.tokens.subscribe();
    session.mark_unchanged(); // only future session changes matter

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            changed = session.changed() => {
                if changed.is_err() {
                    break;
                }
                if session.borrow_and_update().is_none() {
                    gateway.handle_forced_logout().await;
                }
            }
            event = events.recv() => match event {
                Ok(GatewayEvent::ChannelChanged { channel: ChannelId::Command, state })
                    if state.status == ChannelStatus::Disconnected =>
                {
                    gateway.handle_command_drop(state.last_error).await;
                }
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    warn!(missed, "supervisor lagged behind the event stream");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
        }
    }
    debug!("supervisor stopped");
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use simbridge_api::rest::models::OrderSide;

    use super::*;

    fn gateway() -> Gateway {
        Gateway::new(GatewayConfig::default()).expect("default config builds")
    }

    #[tokio::test]
    async fn orders_require_a_connection() {
        let gateway = gateway();
        let ticket = OrderTicket::market("ACME", OrderSide::Buy, 10.0);
        let err = gateway.submit_order(&ticket).await.unwrap_err();
        assert!(matches!(err, CoreError::NotConnected));
    }

    #[tokio::test]
    async fn send_before_connect_drops_payload() {
        let gateway = gateway();
        let delivered = gateway
            .send(&ChannelMessage::SessionKeepalive {
                session_id: "s-1".into(),
            })
            .await;
        assert!(!delivered);
    }

    #[tokio::test]
    async fn fresh_gateway_reports_default_state() {
        let gateway = gateway();
        let state = gateway.state();
        assert_eq!(state, ConnectionSnapshot::default());
        assert!(!gateway.is_authenticated());
        assert!(gateway.push_data().is_empty());
    }

    #[tokio::test]
    async fn disposed_gateway_refuses_operations() {
        let gateway = gateway();
        gateway.dispose().await;
        gateway.dispose().await; // idempotent

        assert!(matches!(
            gateway.connect().await.unwrap_err(),
            CoreError::Disposed
        ));
        assert!(matches!(
            gateway.disconnect(DisconnectReason::UserRequest).await.unwrap_err(),
            CoreError::Disposed
        ));
        assert!(matches!(
            gateway.reconnect().await.unwrap_err(),
            CoreError::Disposed
        ));
    }

    #[tokio::test]
    async fn disconnect_before_connect_is_harmless() {
        let gateway = gateway();
        gateway
            .disconnect(DisconnectReason::UserRequest)
            .await
            .expect("nothing to tear down");
        assert_eq!(gateway.state().overall, ChannelStatus::Disconnected);
    }
}
