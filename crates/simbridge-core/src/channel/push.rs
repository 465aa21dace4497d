//! Push-stream supervision and the merged data cache.
//!
//! The push stream is strictly secondary: it may only be opened while
//! the command channel is connected, and the unified state tears its
//! reported status down whenever the command channel drops. Payloads
//! are JSON objects merged into a cache by top-level key, so late
//! subscribers can read the latest snapshot without replaying events.

use std::sync::Arc;

use arc_swap::ArcSwap;
use futures_util::StreamExt;
use simbridge_api::TokenManager;
use simbridge_api::sse::{self, SseEvent};
use tokio::sync::{Mutex, broadcast};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::GatewayConfig;
use crate::error::CoreError;
use crate::event::GatewayEvent;
use crate::state::{ChannelId, ChannelStatus, ConnectionState};

#[derive(Default)]
struct Runtime {
    task: Option<JoinHandle<()>>,
    conn_cancel: Option<CancellationToken>,
    connecting: bool,
}

struct PushInner {
    config: GatewayConfig,
    tokens: TokenManager,
    http: reqwest::Client,
    unified: Arc<ConnectionState>,
    events: broadcast::Sender<GatewayEvent>,
    cache: ArcSwap<serde_json::Map<String, serde_json::Value>>,
    runtime: Mutex<Runtime>,
    cancel: CancellationToken,
}

impl PushInner {
    /// Parse and merge one payload into the cache. Returns the parsed
    /// delta for event emission, or `None` for payloads that are not
    /// JSON objects (logged and dropped).
    fn absorb(&self, data: &str) -> Option<serde_json::Value> {
        let value: serde_json::Value = match serde_json::from_str(data) {
            Ok(value) => value,
            Err(e) => {
                debug!(error = %e, "dropping unparseable push payload");
                return None;
            }
        };
        let Some(delta) = value.as_object() else {
            debug!("dropping non-object push payload");
            return None;
        };

        let mut merged = serde_json::Map::clone(&self.cache.load());
        for (key, entry) in delta {
            merged.insert(key.clone(), entry.clone());
        }
        self.cache.store(Arc::new(merged));
        Some(value)
    }
}

/// One logical push stream, reconnected across many responses.
#[derive(Clone)]
pub(crate) struct PushStream {
    inner: Arc<PushInner>,
}

impl PushStream {
    pub(crate) fn new(
        config: GatewayConfig,
        tokens: TokenManager,
        http: reqwest::Client,
        unified: Arc<ConnectionState>,
        events: broadcast::Sender<GatewayEvent>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            inner: Arc::new(PushInner {
                config,
                tokens,
                http,
                unified,
                events,
                cache: ArcSwap::from_pointee(serde_json::Map::new()),
                runtime: Mutex::new(Runtime::default()),
                cancel,
            }),
        }
    }

    /// Open the stream. Refused outright while the command channel is
    /// not connected; the dependency is checked before any transport
    /// work happens. Returns `Ok(false)` when already connected or
    /// connecting.
    pub(crate) async fn connect(&self, recovering: bool) -> Result<bool, CoreError> {
        let inner = &self.inner;
        if inner.unified.channel(ChannelId::Command).status != ChannelStatus::Connected {
            return Err(CoreError::PushRequiresCommand);
        }

        {
            let mut rt = inner.runtime.lock().await;
            if rt.connecting {
                return Ok(false);
            }
            if rt.task.as_ref().is_some_and(|task| !task.is_finished()) {
                return Ok(false);
            }
            rt.connecting = true;
        }
        let result = self.connect_inner(recovering).await;
        inner.runtime.lock().await.connecting = false;
        result
    }

    async fn connect_inner(&self, recovering: bool) -> Result<bool, CoreError> {
        let inner = &self.inner;
        let status = if recovering {
            ChannelStatus::Recovering
        } else {
            ChannelStatus::Connecting
        };
        inner.unified.update_channel(ChannelId::PushStream, status, None);

        let url = match inner.config.stream_url() {
            Ok(url) => url,
            Err(e) => {
                inner.unified.update_channel(
                    ChannelId::PushStream,
                    ChannelStatus::Disconnected,
                    Some(e.to_string()),
                );
                return Err(e);
            }
        };

        let Some(token) = inner.tokens.access_token().await else {
            inner.unified.update_channel(
                ChannelId::PushStream,
                ChannelStatus::Disconnected,
                Some("not authenticated".into()),
            );
            return Err(CoreError::AuthenticationFailed {
                message: "no active session for the push stream".into(),
            });
        };

        let stream = match sse::connect(url, Some(token), inner.http.clone()).await {
            Ok(stream) => stream,
            Err(e) => {
                let err = CoreError::from(e);
                inner.unified.update_channel(
                    ChannelId::PushStream,
                    ChannelStatus::Disconnected,
                    Some(err.to_string()),
                );
                return Err(err);
            }
        };

        let conn_cancel = inner.cancel.child_token();
        {
            let mut rt = inner.runtime.lock().await;
            if let Some(old) = rt.conn_cancel.replace(conn_cancel.clone()) {
                old.cancel();
            }
            if let Some(old) = rt.task.take() {
                old.abort();
            }
            rt.task = Some(tokio::spawn(stream_task(
                self.inner.clone(),
                stream,
                conn_cancel,
            )));
        }

        inner
            .unified
            .update_channel(ChannelId::PushStream, ChannelStatus::Connected, None);
        Ok(true)
    }

    /// Merged view of everything pushed so far.
    pub(crate) fn latest(&self) -> Arc<serde_json::Map<String, serde_json::Value>> {
        self.inner.cache.load_full()
    }

    pub(crate) fn clear_cache(&self) {
        self.inner.cache.store(Arc::new(serde_json::Map::new()));
    }

    /// Stop the stream task and mark the channel disconnected.
    /// Idempotent.
    pub(crate) async fn disconnect(&self, error: Option<String>) {
        let mut rt = self.inner.runtime.lock().await;
        if let Some(cancel) = rt.conn_cancel.take() {
            cancel.cancel();
        }
        if let Some(task) = rt.task.take() {
            task.abort();
        }
        drop(rt);
        self.inner.unified.update_channel(
            ChannelId::PushStream,
            ChannelStatus::Disconnected,
            error,
        );
    }
}

// ── Stream task ──────────────────────────────────────────────────────

/// Read SSE events until the stream ends, errors, or is cancelled.
async fn stream_task<S>(inner: Arc<PushInner>, stream: S, cancel: CancellationToken)
where
    S: futures_util::Stream<Item = Result<SseEvent, simbridge_api::Error>> + Send,
{
    tokio::pin!(stream);
    loop {
        let item = tokio::select! {
            biased;
            () = cancel.cancelled() => return,
            item = stream.next() => item,
        };

        match item {
            Some(Ok(event)) => {
                if let Some(delta) = inner.absorb(&event.data) {
                    let _ = inner.events.send(GatewayEvent::Data(Arc::new(delta)));
                }
            }
            Some(Err(e)) => {
                warn!(error = %e, "push stream interrupted");
                inner.unified.update_channel(
                    ChannelId::PushStream,
                    ChannelStatus::Disconnected,
                    Some(e.to_string()),
                );
                return;
            }
            None => {
                info!("push stream closed by gateway");
                inner.unified.update_channel(
                    ChannelId::PushStream,
                    ChannelStatus::Disconnected,
                    Some("stream ended".into()),
                );
                return;
            }
        }
    }
}
