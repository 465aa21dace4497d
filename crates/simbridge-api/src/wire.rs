//! Message envelope for the command channel.
//!
//! Every frame on the WebSocket is a JSON object keyed by a `type`
//! discriminator. Known types get strongly-typed variants; anything else
//! is passed through as [`ChannelFrame::Unknown`] rather than rejected,
//! since the gateway adds message types without versioning.

use serde::{Deserialize, Serialize};

/// A known message on the command channel, tagged by `type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ChannelMessage {
    /// Client liveness probe. `sent_at_ms` is echoed back in the ack so
    /// the sender can compute round-trip latency without clock agreement.
    Heartbeat { seq: u64, sent_at_ms: i64 },

    /// Gateway reply to a heartbeat.
    HeartbeatAck {
        seq: u64,
        sent_at_ms: i64,
        #[serde(default)]
        server_time_ms: Option<i64>,
    },

    /// Periodic session keep-alive sent by the client.
    SessionKeepalive { session_id: String },

    /// Gateway notice that the session was invalidated server-side.
    SessionExpired {
        #[serde(default)]
        reason: Option<String>,
    },

    /// Simulator run state pushed by the gateway.
    SimulatorStatus {
        running: bool,
        #[serde(default)]
        run_id: Option<String>,
    },

    /// Order lifecycle update pushed by the gateway.
    OrderUpdate {
        order_id: String,
        status: String,
        #[serde(default)]
        filled_quantity: Option<f64>,
    },
}

/// A parsed frame from the command channel: typed when the `type` value
/// is known, raw passthrough otherwise.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelFrame {
    Message(ChannelMessage),
    Unknown {
        kind: String,
        payload: serde_json::Value,
    },
}

impl ChannelFrame {
    /// Parse a text frame. Returns `None` for frames that are not JSON
    /// objects or carry no `type` field -- those are logged and dropped
    /// by the caller, never surfaced as errors.
    pub fn parse(text: &str) -> Option<Self> {
        match serde_json::from_str::<ChannelMessage>(text) {
            Ok(msg) => Some(Self::Message(msg)),
            Err(_) => {
                let value: serde_json::Value = serde_json::from_str(text).ok()?;
                let kind = value.get("type")?.as_str()?.to_owned();
                Some(Self::Unknown {
                    kind,
                    payload: value,
                })
            }
        }
    }
}

impl ChannelMessage {
    /// Serialize for the wire. Infallible for these shapes, so a failure
    /// is collapsed to `None` and the frame is simply not sent.
    pub fn to_wire(&self) -> Option<String> {
        serde_json::to_string(self).ok()
    }
}
