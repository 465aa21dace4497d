// ── Unified connection state ──
//
// Single source of truth for channel health. Channel managers write
// their own channel's sub-state, the recovery engine writes the
// recovery mirror, and the heartbeat path writes quality. Consumers
// observe through `watch()` or the shared gateway event stream.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{broadcast, watch};
use tracing::{debug, trace, warn};

use crate::event::GatewayEvent;

// ── Value types ──────────────────────────────────────────────────────

/// Identifies one of the two managed channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, strum::Display)]
#[serde(rename_all = "kebab-case")]
pub enum ChannelId {
    #[strum(serialize = "command")]
    Command,
    #[strum(serialize = "push-stream")]
    PushStream,
}

/// Lifecycle status of a single channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, strum::Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ChannelStatus {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Recovering,
}

/// Connection quality tier derived from heartbeat round-trip latency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, strum::Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Quality {
    Good,
    Degraded,
    Poor,
}

impl Quality {
    /// Map a round-trip latency sample to a tier.
    pub fn from_latency_ms(latency_ms: u64) -> Self {
        match latency_ms {
            0..=200 => Self::Good,
            201..=500 => Self::Degraded,
            _ => Self::Poor,
        }
    }
}

/// Observable state of one channel.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelState {
    pub status: ChannelStatus,
    pub last_connected_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    /// Retry cycles entered since the last successful connect.
    pub recovery_attempts: u32,
}

/// Immutable copy of the full unified state.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionSnapshot {
    pub command: ChannelState,
    pub push_stream: ChannelState,
    /// Derived from the command (primary) channel's status only.
    pub overall: ChannelStatus,
    /// `None` until the first heartbeat sample arrives.
    pub quality: Option<Quality>,
    pub recovering: bool,
    pub recovery_attempt: u32,
    pub last_heartbeat_at: Option<DateTime<Utc>>,
    pub heartbeat_latency_ms: Option<u64>,
}

impl ConnectionSnapshot {
    pub fn channel(&self, id: ChannelId) -> &ChannelState {
        match id {
            ChannelId::Command => &self.command,
            ChannelId::PushStream => &self.push_stream,
        }
    }

    fn channel_mut(&mut self, id: ChannelId) -> &mut ChannelState {
        match id {
            ChannelId::Command => &mut self.command,
            ChannelId::PushStream => &mut self.push_stream,
        }
    }
}

// ── Transition table ─────────────────────────────────────────────────

/// Channels pass through `Connecting` on a fresh dial or `Recovering`
/// on an engine-driven redial; `Disconnected` never jumps straight to
/// `Connected`. Same-status updates are allowed so error details can be
/// refreshed in place.
fn transition_allowed(from: ChannelStatus, to: ChannelStatus) -> bool {
    use ChannelStatus::{Connected, Connecting, Disconnected, Recovering};
    from == to
        || matches!(
            (from, to),
            (Disconnected, Connecting)
                | (Connecting, Connected | Disconnected)
                | (Connected, Disconnected)
                | (_, Recovering)
                | (Recovering, Connected | Disconnected)
        )
}

fn apply_status(channel: &mut ChannelState, status: ChannelStatus, error: Option<String>) {
    channel.status = status;
    match status {
        ChannelStatus::Connected => {
            channel.last_connected_at = Some(Utc::now());
            channel.last_error = None;
            channel.recovery_attempts = 0;
        }
        ChannelStatus::Recovering => {
            channel.recovery_attempts += 1;
            if let Some(error) = error {
                channel.last_error = Some(error);
            }
        }
        ChannelStatus::Disconnected | ChannelStatus::Connecting => {
            if let Some(error) = error {
                channel.last_error = Some(error);
            }
        }
    }
}

// ── ConnectionState ──────────────────────────────────────────────────

/// Holds the live [`ConnectionSnapshot`] behind a watch channel and
/// publishes change events on the shared gateway broadcast channel.
pub struct ConnectionState {
    snapshot: watch::Sender<ConnectionSnapshot>,
    events: broadcast::Sender<GatewayEvent>,
}

impl ConnectionState {
    pub fn new(events: broadcast::Sender<GatewayEvent>) -> Self {
        let (snapshot, _) = watch::channel(ConnectionSnapshot::default());
        Self { snapshot, events }
    }

    /// Merge a status update into the named channel.
    ///
    /// Invalid transitions are logged and dropped. A valid update emits
    /// a channel-scoped event plus a global state-changed event. When
    /// the command channel leaves `Connected`, the push stream is taken
    /// down in the same update: push data is meaningless without the
    /// command channel, and the snapshot must never show the push
    /// stream up while the primary is not.
    pub fn update_channel(&self, id: ChannelId, status: ChannelStatus, error: Option<String>) {
        let mut cascaded = false;
        let modified = self.snapshot.send_if_modified(|snap| {
            {
                let channel = snap.channel_mut(id);
                if !transition_allowed(channel.status, status) {
                    warn!(
                        channel = %id,
                        from = %channel.status,
                        to = %status,
                        "ignoring invalid channel transition"
                    );
                    return false;
                }
                apply_status(channel, status, error);
            }
            if id == ChannelId::Command {
                snap.overall = status;
                if status != ChannelStatus::Connected
                    && snap.push_stream.status != ChannelStatus::Disconnected
                {
                    apply_status(
                        &mut snap.push_stream,
                        ChannelStatus::Disconnected,
                        Some("command channel disconnected".into()),
                    );
                    cascaded = true;
                }
            }
            true
        });

        if !modified {
            return;
        }

        let snap = self.snapshot.borrow().clone();
        debug!(channel = %id, status = %status, "channel state updated");
        let _ = self.events.send(GatewayEvent::ChannelChanged {
            channel: id,
            state: snap.channel(id).clone(),
        });
        if cascaded {
            let _ = self.events.send(GatewayEvent::ChannelChanged {
                channel: ChannelId::PushStream,
                state: snap.push_stream.clone(),
            });
        }
        let _ = self.events.send(GatewayEvent::StateChanged(snap));
    }

    /// Store a heartbeat round-trip sample.
    ///
    /// The sample is always recorded; a quality event fires only when
    /// the tier changes.
    pub fn record_heartbeat(&self, latency_ms: u64) {
        let quality = Quality::from_latency_ms(latency_ms);
        let mut tier_changed = false;
        self.snapshot.send_modify(|snap| {
            tier_changed = snap.quality != Some(quality);
            snap.quality = Some(quality);
            snap.last_heartbeat_at = Some(Utc::now());
            snap.heartbeat_latency_ms = Some(latency_ms);
        });
        trace!(latency_ms, quality = %quality, "heartbeat sample");
        if tier_changed {
            debug!(quality = %quality, latency_ms, "connection quality changed");
            let _ = self
                .events
                .send(GatewayEvent::QualityChanged { quality, latency_ms });
        }
    }

    /// Mirror the recovery engine's progress. Emits on change only.
    pub fn update_recovery(&self, recovering: bool, attempt: u32) {
        let modified = self.snapshot.send_if_modified(|snap| {
            if snap.recovering == recovering && snap.recovery_attempt == attempt {
                return false;
            }
            snap.recovering = recovering;
            snap.recovery_attempt = attempt;
            true
        });
        if modified {
            let _ = self
                .events
                .send(GatewayEvent::StateChanged(self.snapshot.borrow().clone()));
        }
    }

    /// Immutable copy of the current state.
    pub fn snapshot(&self) -> ConnectionSnapshot {
        self.snapshot.borrow().clone()
    }

    /// Current state of one channel.
    pub fn channel(&self, id: ChannelId) -> ChannelState {
        self.snapshot.borrow().channel(id).clone()
    }

    /// Subscribe to snapshot updates.
    pub fn watch(&self) -> watch::Receiver<ConnectionSnapshot> {
        self.snapshot.subscribe()
    }

    /// Everything back to defaults; emits one state-changed event.
    pub fn reset(&self) {
        self.snapshot
            .send_modify(|snap| *snap = ConnectionSnapshot::default());
        let _ = self
            .events
            .send(GatewayEvent::StateChanged(self.snapshot.borrow().clone()));
    }
}
