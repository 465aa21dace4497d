//! Watch command handler: stream gateway events until interrupted.

use std::time::Duration;

use owo_colors::OwoColorize;
use serde_json::json;
use simbridge_core::{
    ChannelFrame, ChannelMessage, ChannelStatus, Gateway, GatewayEvent, Quality,
};
use tokio::sync::broadcast::error::RecvError;

use crate::cli::{GlobalOpts, OutputFormat, WatchArgs};
use crate::error::CliError;
use crate::output;

pub async fn handle(
    gateway: &Gateway,
    args: WatchArgs,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    // Subscribe before dialing so the Connecting/Connected transitions
    // land in the stream instead of racing it.
    let mut events = gateway.events();
    let color = output::should_color(&global.color);

    gateway.connect().await?;

    loop {
        tokio::select! {
            biased;

            _ = tokio::signal::ctrl_c() => {
                tracing::debug!("interrupted, disconnecting");
                return Ok(());
            }

            event = events.recv() => match event {
                Ok(event) => {
                    print_event(&event, &args, global, color);
                    match event {
                        GatewayEvent::ForcedLogout { reason } => {
                            return Err(CliError::SessionEnded { reason });
                        }
                        GatewayEvent::RecoveryFailed { attempts } => {
                            return Err(CliError::RecoveryExhausted { attempts });
                        }
                        _ => {}
                    }
                }
                Err(RecvError::Lagged(missed)) => {
                    tracing::warn!(missed, "event stream lagged, events were dropped");
                }
                Err(RecvError::Closed) => return Ok(()),
            },
        }
    }
}

fn print_event(event: &GatewayEvent, args: &WatchArgs, global: &GlobalOpts, color: bool) {
    if args.no_data && matches!(event, GatewayEvent::Data(_)) {
        return;
    }
    let line = match global.output {
        OutputFormat::Text => render_text(event, color),
        OutputFormat::Json => Some(render_json(event)),
    };
    if let Some(line) = line {
        output::print_output(&line);
    }
}

// ── Text rendering ───────────────────────────────────────────────────

fn render_text(event: &GatewayEvent, color: bool) -> Option<String> {
    match event {
        // The per-channel lines below already cover everything the full
        // snapshot would repeat.
        GatewayEvent::StateChanged(_) => None,

        GatewayEvent::ChannelChanged { channel, state } => {
            let mut line = format!(
                "{:<12} {}",
                channel.to_string(),
                paint_status(state.status, color)
            );
            if state.status != ChannelStatus::Connected
                && let Some(error) = &state.last_error
            {
                line.push_str(&format!(" ({error})"));
            }
            Some(line)
        }

        GatewayEvent::QualityChanged {
            quality,
            latency_ms,
        } => Some(format!(
            "{:<12} {} ({latency_ms} ms)",
            "quality",
            paint_quality(*quality, color)
        )),

        GatewayEvent::RecoveryScheduled { attempt, delay } => Some(format!(
            "{:<12} attempt {attempt} in {:.1}s",
            "recovery",
            delay.as_secs_f64()
        )),

        GatewayEvent::RecoverySucceeded { attempts } => {
            Some(format!("{:<12} recovered on attempt {attempts}", "recovery"))
        }

        GatewayEvent::RecoverySuspended { cooldown } => Some(format!(
            "{:<12} suspended for {}s",
            "recovery",
            cooldown.as_secs()
        )),

        GatewayEvent::RecoveryFailed { attempts } => Some(format!(
            "{:<12} exhausted after attempt {attempts}",
            "recovery"
        )),

        GatewayEvent::Data(delta) => Some(format!(
            "{:<12} {}",
            "data",
            output::render_json_compact(&**delta)
        )),

        GatewayEvent::Message(frame) => render_frame(frame),

        GatewayEvent::ForcedLogout { reason } => {
            let label = format!("{:<12}", "session");
            let label = if color { label.red().to_string() } else { label };
            Some(format!("{label} forced logout: {reason}"))
        }
    }
}

fn render_frame(frame: &ChannelFrame) -> Option<String> {
    match frame {
        ChannelFrame::Message(ChannelMessage::OrderUpdate {
            order_id,
            status,
            filled_quantity,
        }) => {
            let fill = filled_quantity.map_or_else(String::new, |q| format!(" (filled {q})"));
            Some(format!("{:<12} {order_id} {status}{fill}", "order"))
        }

        ChannelFrame::Message(ChannelMessage::SimulatorStatus { running, run_id }) => {
            let run = run_id
                .as_deref()
                .map_or_else(String::new, |id| format!(" (run {id})"));
            let state = if *running { "running" } else { "stopped" };
            Some(format!("{:<12} {state}{run}", "simulator"))
        }

        ChannelFrame::Unknown { kind, payload } => Some(format!(
            "{:<12} {kind} {}",
            "message",
            output::render_json_compact(payload)
        )),

        // Heartbeat and session frames are consumed inside the gateway
        // and never reach the event stream.
        ChannelFrame::Message(_) => None,
    }
}

fn paint_status(status: ChannelStatus, color: bool) -> String {
    let label = status.to_string();
    if !color {
        return label;
    }
    match status {
        ChannelStatus::Connected => label.green().to_string(),
        ChannelStatus::Connecting | ChannelStatus::Recovering => label.yellow().to_string(),
        ChannelStatus::Disconnected => label.red().to_string(),
    }
}

fn paint_quality(quality: Quality, color: bool) -> String {
    let label = quality.to_string();
    if !color {
        return label;
    }
    match quality {
        Quality::Good => label.green().to_string(),
        Quality::Degraded => label.yellow().to_string(),
        Quality::Poor => label.red().to_string(),
    }
}

// ── JSON rendering ───────────────────────────────────────────────────

/// One compact JSON object per line, discriminated by `type` and
/// stamped with a `ts` field.
fn render_json(event: &GatewayEvent) -> String {
    let mut body = match event {
        GatewayEvent::StateChanged(snapshot) => json!({
            "type": "state",
            "state": snapshot,
        }),
        GatewayEvent::ChannelChanged { channel, state } => json!({
            "type": "channel",
            "channel": channel,
            "state": state,
        }),
        GatewayEvent::QualityChanged {
            quality,
            latency_ms,
        } => json!({
            "type": "quality",
            "quality": quality,
            "latencyMs": latency_ms,
        }),
        GatewayEvent::RecoveryScheduled { attempt, delay } => json!({
            "type": "recovery_scheduled",
            "attempt": attempt,
            "delayMs": millis(*delay),
        }),
        GatewayEvent::RecoverySucceeded { attempts } => json!({
            "type": "recovery_succeeded",
            "attempts": attempts,
        }),
        GatewayEvent::RecoverySuspended { cooldown } => json!({
            "type": "recovery_suspended",
            "cooldownMs": millis(*cooldown),
        }),
        GatewayEvent::RecoveryFailed { attempts } => json!({
            "type": "recovery_failed",
            "attempts": attempts,
        }),
        GatewayEvent::Data(delta) => json!({
            "type": "data",
            "delta": &**delta,
        }),
        GatewayEvent::Message(frame) => frame_json(frame),
        GatewayEvent::ForcedLogout { reason } => json!({
            "type": "forced_logout",
            "reason": reason,
        }),
    };
    if let serde_json::Value::Object(map) = &mut body {
        map.insert("ts".into(), json!(chrono::Utc::now().to_rfc3339()));
    }
    output::render_json_compact(&body)
}

fn frame_json(frame: &ChannelFrame) -> serde_json::Value {
    match frame {
        ChannelFrame::Message(ChannelMessage::OrderUpdate {
            order_id,
            status,
            filled_quantity,
        }) => json!({
            "type": "order_update",
            "orderId": order_id,
            "status": status,
            "filledQuantity": filled_quantity,
        }),
        ChannelFrame::Message(ChannelMessage::SimulatorStatus { running, run_id }) => json!({
            "type": "simulator_status",
            "running": running,
            "runId": run_id,
        }),
        ChannelFrame::Message(msg) => json!({
            "type": "message",
            "message": msg,
        }),
        ChannelFrame::Unknown { kind, payload } => json!({
            "type": "message",
            "kind": kind,
            "payload": payload,
        }),
    }
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}
