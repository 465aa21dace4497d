//! Push-stream transport: server-sent events over a streaming GET.
//!
//! The gateway pushes market and portfolio snapshots on a
//! `text/event-stream` response held open indefinitely. This module opens
//! the stream and yields parsed events; lifecycle (gating on the command
//! channel, reconnect decisions, the data cache) lives in
//! `simbridge-core`.

use async_stream::try_stream;
use futures_core::Stream;
use futures_util::StreamExt;
use secrecy::{ExposeSecret, SecretString};
use url::Url;

use crate::error::Error;

// ── Event shape ──────────────────────────────────────────────────────

/// One server-sent event, fields per the `text/event-stream` format.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SseEvent {
    /// `event:` field; `None` means the default `message` event.
    pub event: Option<String>,
    /// Concatenated `data:` lines, newline-joined.
    pub data: String,
    /// `id:` field, if the gateway sets one.
    pub id: Option<String>,
    /// `retry:` hint in milliseconds. Parsed but not acted on here;
    /// reconnect pacing belongs to the recovery engine.
    pub retry: Option<u64>,
}

// ── Incremental parser ───────────────────────────────────────────────

/// Incremental `text/event-stream` parser.
///
/// Feed raw chunks as they arrive; complete events (terminated by a blank
/// line) come back in order. Partial lines are buffered across chunks.
#[derive(Debug, Default)]
pub struct SseParser {
    buf: Vec<u8>,
    pending: SseEvent,
    has_data: bool,
}

impl SseParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Consume a chunk, returning every event completed by it.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        self.buf.extend_from_slice(chunk);

        let mut events = Vec::new();
        while let Some(line_end) = self.buf.iter().position(|&b| b == b'\n') {
            let raw: Vec<u8> = self.buf.drain(..=line_end).collect();
            let line = String::from_utf8_lossy(&raw);
            let line = line.trim_end_matches(['\n', '\r']);

            if line.is_empty() {
                if let Some(event) = self.take_pending() {
                    events.push(event);
                }
            } else {
                self.parse_line(line);
            }
        }
        events
    }

    /// Dispatch one non-blank line into the pending event.
    fn parse_line(&mut self, line: &str) {
        // Comment lines (used by gateways as keep-alive padding)
        if line.starts_with(':') {
            return;
        }

        let (field, value) = match line.split_once(':') {
            Some((f, v)) => (f, v.strip_prefix(' ').unwrap_or(v)),
            None => (line, ""),
        };

        match field {
            "event" => self.pending.event = Some(value.to_owned()),
            "data" => {
                if self.has_data {
                    self.pending.data.push('\n');
                }
                self.pending.data.push_str(value);
                self.has_data = true;
            }
            "id" => self.pending.id = Some(value.to_owned()),
            "retry" => self.pending.retry = value.parse().ok(),
            _ => tracing::trace!(field, "ignoring unknown SSE field"),
        }
    }

    /// A blank line terminates the pending event. Events with no `data`
    /// lines are discarded per the format.
    fn take_pending(&mut self) -> Option<SseEvent> {
        let event = std::mem::take(&mut self.pending);
        let had_data = std::mem::take(&mut self.has_data);
        had_data.then_some(event)
    }
}

// ── Stream connect ───────────────────────────────────────────────────

/// Open the push stream and return parsed events as they arrive.
///
/// Takes owned arguments so the returned stream is `'static` and can be
/// moved into a background task. The stream ends with `Ok` exhaustion
/// when the gateway closes the response cleanly, or yields an
/// [`Error::StreamInterrupted`] when the body errors mid-read. An `Err`
/// from this function itself means the stream never came up (bad status,
/// transport failure).
pub async fn connect(
    url: Url,
    bearer: Option<SecretString>,
    http: reqwest::Client,
) -> Result<impl Stream<Item = Result<SseEvent, Error>> + Send, Error> {
    tracing::info!(url = %url, "connecting push stream");

    let mut request = http.get(url).header("Accept", "text/event-stream");
    if let Some(token) = bearer {
        request = request.bearer_auth(token.expose_secret());
    }

    let resp = request.send().await.map_err(Error::Transport)?;

    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        return Err(Error::StreamConnect(format!("HTTP {status}: {body}")));
    }

    tracing::info!("push stream connected");

    let mut body = resp.bytes_stream();

    Ok(try_stream! {
        let mut parser = SseParser::new();
        while let Some(chunk) = body.next().await {
            let chunk = chunk.map_err(|e| Error::StreamInterrupted(e.to_string()))?;
            for event in parser.feed(&chunk) {
                yield event;
            }
        }
        tracing::debug!("push stream ended");
    })
}
