// ── Gateway event stream ──
//
// One typed broadcast channel carries everything consumers can observe:
// state transitions, recovery lifecycle, push data, and channel
// messages. Subscribe through `Gateway::events()`.

use std::sync::Arc;
use std::time::Duration;

use simbridge_api::wire::ChannelFrame;

use crate::state::{ChannelId, ChannelState, ConnectionSnapshot, Quality};

/// Events published on the gateway's broadcast channel.
///
/// Every variant carries owned (or `Arc`-shared) data so receivers can
/// hold on to payloads without blocking the publisher.
#[derive(Debug, Clone)]
pub enum GatewayEvent {
    /// Full unified-state snapshot after a state mutation.
    StateChanged(ConnectionSnapshot),

    /// One channel's sub-state changed.
    ChannelChanged {
        channel: ChannelId,
        state: ChannelState,
    },

    /// The connection quality tier changed (emitted on tier change only,
    /// not per heartbeat sample).
    QualityChanged { quality: Quality, latency_ms: u64 },

    /// A reconnection attempt has been scheduled after a backoff delay.
    RecoveryScheduled { attempt: u32, delay: Duration },

    /// A reconnection attempt brought the command channel back.
    RecoverySucceeded { attempts: u32 },

    /// The circuit breaker tripped; no attempts until the cooldown ends.
    RecoverySuspended { cooldown: Duration },

    /// Reconnection attempts exhausted; only a manual reconnect recovers.
    RecoveryFailed { attempts: u32 },

    /// A push-stream payload was merged into the data cache. Carries the
    /// incoming delta, not the merged cache.
    Data(Arc<serde_json::Value>),

    /// A non-heartbeat frame arrived on the command channel. Unknown
    /// message types pass through here untouched.
    Message(Arc<ChannelFrame>),

    /// The session was invalidated; recovery has stopped.
    ForcedLogout { reason: String },
}
