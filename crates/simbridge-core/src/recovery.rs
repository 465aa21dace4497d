// ── Resilience / recovery engine ──
//
// Observes connection failures and decides when to redial. Two
// independent thresholds: `failure_threshold` opens the circuit
// breaker for a cooldown window during sustained instability, and
// `max_attempts` stops an exhausted retry cycle entirely until the
// user reconnects manually.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::sync::{Mutex, broadcast};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::CoreError;
use crate::event::GatewayEvent;
use crate::state::ConnectionState;

// ── Options ──────────────────────────────────────────────────────────

/// Tuning for the recovery engine.
#[derive(Debug, Clone, PartialEq)]
pub struct RecoveryOptions {
    /// Failures before the circuit breaker opens.
    pub failure_threshold: u32,
    /// How long the breaker stays open.
    pub suspension_timeout: Duration,
    /// Backoff delay for the first reconnection attempt.
    pub initial_delay: Duration,
    /// Backoff delay ceiling.
    pub max_delay: Duration,
    /// Uniform jitter applied to each delay, as a fraction of the base
    /// delay. Zero makes the backoff sequence deterministic.
    pub jitter_factor: f64,
    /// Reconnection attempts before giving up entirely.
    pub max_attempts: u32,
}

impl Default for RecoveryOptions {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            suspension_timeout: Duration::from_secs(60),
            initial_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(30_000),
            jitter_factor: 0.3,
            max_attempts: 10,
        }
    }
}

/// Engine mode, distinct from per-channel status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, strum::Display)]
pub enum ResilienceMode {
    #[default]
    Stable,
    Degraded,
    Recovering,
    Suspended,
    Failed,
}

// ── Backoff ──────────────────────────────────────────────────────────

/// Exponential backoff with uniform jitter.
///
/// `attempt` is 1-based: `min(max_delay, initial * 2^(attempt-1))`,
/// then plus or minus up to `jitter_factor` of the base, floored at
/// zero.
pub(crate) fn backoff_delay(opts: &RecoveryOptions, attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1).min(31);
    let base = opts
        .initial_delay
        .saturating_mul(2u32.saturating_pow(exponent))
        .min(opts.max_delay);
    if opts.jitter_factor <= 0.0 {
        return base;
    }
    let base_ms = base.as_millis() as f64;
    let spread = base_ms * opts.jitter_factor;
    let jittered = base_ms + rand::thread_rng().gen_range(-spread..=spread);
    Duration::from_millis(jittered.max(0.0) as u64)
}

// ── Engine ───────────────────────────────────────────────────────────

#[derive(Debug)]
struct EngineState {
    mode: ResilienceMode,
    failure_count: u32,
    reconnect_attempt: u32,
    suspended_until: Option<tokio::time::Instant>,
    retry_pending: bool,
    authenticated: bool,
    disposed: bool,
    cycle_cancel: Option<CancellationToken>,
    retry_task: Option<JoinHandle<()>>,
    suspension_task: Option<JoinHandle<()>>,
}

impl EngineState {
    fn new() -> Self {
        Self {
            mode: ResilienceMode::Stable,
            failure_count: 0,
            reconnect_attempt: 0,
            suspended_until: None,
            retry_pending: false,
            authenticated: false,
            disposed: false,
            cycle_cancel: None,
            retry_task: None,
            suspension_task: None,
        }
    }
}

struct EngineInner {
    opts: RecoveryOptions,
    state: Mutex<EngineState>,
    unified: Arc<ConnectionState>,
    events: broadcast::Sender<GatewayEvent>,
    cancel: CancellationToken,
}

/// Drives reconnection with backoff and the circuit breaker.
///
/// Cheaply cloneable; all mutation goes through the internal mutex.
/// The engine mirrors its progress into the unified state but never
/// touches per-channel statuses -- the connect callback owns those.
#[derive(Clone)]
pub(crate) struct RecoveryEngine {
    inner: Arc<EngineInner>,
}

impl RecoveryEngine {
    pub(crate) fn new(
        opts: RecoveryOptions,
        unified: Arc<ConnectionState>,
        events: broadcast::Sender<GatewayEvent>,
    ) -> Self {
        Self {
            inner: Arc::new(EngineInner {
                opts,
                state: Mutex::new(EngineState::new()),
                unified,
                events,
                cancel: CancellationToken::new(),
            }),
        }
    }

    // ── Failure accounting ───────────────────────────────────────────

    /// Count one connection failure.
    ///
    /// No-op while suspended, failed, or disposed. Crossing
    /// `failure_threshold` outside a retry cycle opens the breaker
    /// exactly once; the breaker closes itself after
    /// `suspension_timeout` with counters reset.
    pub(crate) async fn record_failure(&self, reason: &str) {
        let mut st = self.inner.state.lock().await;
        if st.disposed
            || matches!(st.mode, ResilienceMode::Suspended | ResilienceMode::Failed)
        {
            return;
        }

        st.failure_count += 1;
        debug!(failures = st.failure_count, reason, "connection failure recorded");

        if st.mode == ResilienceMode::Stable {
            st.mode = ResilienceMode::Degraded;
        }

        if st.failure_count >= self.inner.opts.failure_threshold
            && st.mode != ResilienceMode::Recovering
        {
            self.trip_breaker(&mut st);
        }
    }

    fn trip_breaker(&self, st: &mut EngineState) {
        if let Some(cycle) = st.cycle_cancel.take() {
            cycle.cancel();
        }
        st.retry_pending = false;
        st.retry_task = None;
        st.mode = ResilienceMode::Suspended;

        let cooldown = self.inner.opts.suspension_timeout;
        st.suspended_until = Some(tokio::time::Instant::now() + cooldown);
        warn!(
            failures = st.failure_count,
            cooldown_secs = cooldown.as_secs(),
            "circuit breaker tripped; reconnection suspended"
        );
        let _ = self
            .inner
            .events
            .send(GatewayEvent::RecoverySuspended { cooldown });
        self.inner.unified.update_recovery(false, st.reconnect_attempt);

        if let Some(old) = st.suspension_task.take() {
            old.abort();
        }
        let engine = self.clone();
        st.suspension_task = Some(tokio::spawn(async move {
            tokio::time::sleep(cooldown).await;
            engine.exit_suspension().await;
        }));
    }

    async fn exit_suspension(&self) {
        let mut st = self.inner.state.lock().await;
        if st.disposed || st.mode != ResilienceMode::Suspended {
            return;
        }
        st.mode = ResilienceMode::Stable;
        st.failure_count = 0;
        st.reconnect_attempt = 0;
        st.suspended_until = None;
        st.suspension_task = None;
        info!("suspension elapsed; breaker closed");
        self.inner.unified.update_recovery(false, 0);
    }

    // ── Reconnection ─────────────────────────────────────────────────

    /// Start a retry cycle driving `connect` with backoff.
    ///
    /// Returns `false` without scheduling anything when disposed,
    /// suspended, failed, unauthenticated, or when a retry is already
    /// in flight -- there is never more than one cycle at a time. The
    /// callback reports `Ok(true)` for success; `Ok(false)` and
    /// transient errors count as failures and schedule the next
    /// attempt until `max_attempts` is reached.
    pub(crate) async fn attempt_reconnection<F, Fut>(&self, connect: F) -> bool
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<bool, CoreError>> + Send,
    {
        let mut st = self.inner.state.lock().await;
        if st.disposed {
            return false;
        }
        match st.mode {
            ResilienceMode::Suspended => {
                debug!("reconnection refused; breaker is open");
                return false;
            }
            ResilienceMode::Failed => {
                debug!("reconnection refused; attempts exhausted");
                return false;
            }
            ResilienceMode::Stable | ResilienceMode::Degraded | ResilienceMode::Recovering => {}
        }
        if !st.authenticated {
            debug!("reconnection refused; not authenticated");
            return false;
        }
        if st.retry_pending {
            return false;
        }

        st.retry_pending = true;
        st.mode = ResilienceMode::Recovering;
        let cycle = self.inner.cancel.child_token();
        st.cycle_cancel = Some(cycle.clone());

        let engine = self.clone();
        st.retry_task = Some(tokio::spawn(async move {
            engine.retry_loop(cycle, connect).await;
        }));
        true
    }

    async fn retry_loop<F, Fut>(&self, cycle: CancellationToken, connect: F)
    where
        F: Fn() -> Fut + Send + Sync,
        Fut: Future<Output = Result<bool, CoreError>> + Send,
    {
        loop {
            let (attempt, delay) = {
                let mut st = self.inner.state.lock().await;
                if cycle.is_cancelled() || st.mode != ResilienceMode::Recovering {
                    return;
                }
                st.reconnect_attempt += 1;
                let attempt = st.reconnect_attempt;
                (attempt, backoff_delay(&self.inner.opts, attempt))
            };

            info!(
                attempt,
                delay_ms = delay.as_millis() as u64,
                "reconnection attempt scheduled"
            );
            let _ = self
                .inner
                .events
                .send(GatewayEvent::RecoveryScheduled { attempt, delay });
            self.inner.unified.update_recovery(true, attempt);

            tokio::select! {
                biased;
                () = cycle.cancelled() => return,
                () = tokio::time::sleep(delay) => {}
            }

            let outcome = connect().await;

            // A reset or dispose during the callback supersedes this
            // cycle; whoever cancelled already cleaned the flags up.
            if cycle.is_cancelled() {
                return;
            }

            match outcome {
                Ok(true) => {
                    self.finish_success(attempt).await;
                    return;
                }
                Ok(false) => {
                    self.record_failure("reconnect attempt failed").await;
                    if self.finish_if_exhausted(attempt).await {
                        return;
                    }
                }
                Err(e) if e.is_auth_failure() => {
                    // The session watcher owns the logout teardown and
                    // its event; the cycle just stops dead here.
                    warn!(error = %e, "session lost during recovery; stopping");
                    self.update_auth_state(false).await;
                    return;
                }
                Err(e) => {
                    self.record_failure(&e.to_string()).await;
                    if self.finish_if_exhausted(attempt).await {
                        return;
                    }
                }
            }
        }
    }

    async fn finish_success(&self, attempt: u32) {
        {
            let mut st = self.inner.state.lock().await;
            st.mode = ResilienceMode::Stable;
            st.failure_count = 0;
            st.reconnect_attempt = 0;
            st.retry_pending = false;
            st.retry_task = None;
            st.cycle_cancel = None;
        }
        info!(attempt, "reconnection succeeded");
        let _ = self
            .inner
            .events
            .send(GatewayEvent::RecoverySucceeded { attempts: attempt });
        self.inner.unified.update_recovery(false, 0);
    }

    /// Returns `true` when the cycle must stop.
    async fn finish_if_exhausted(&self, attempt: u32) -> bool {
        let mut st = self.inner.state.lock().await;
        if st.disposed || st.mode != ResilienceMode::Recovering {
            return true;
        }
        if attempt < self.inner.opts.max_attempts {
            return false;
        }
        st.mode = ResilienceMode::Failed;
        st.retry_pending = false;
        st.retry_task = None;
        st.cycle_cancel = None;
        drop(st);

        error!(attempts = attempt, "reconnection attempts exhausted");
        let _ = self
            .inner
            .events
            .send(GatewayEvent::RecoveryFailed { attempts: attempt });
        self.inner.unified.update_recovery(false, attempt);
        true
    }

    // ── Manual control ───────────────────────────────────────────────

    /// Escape hatch: cancel timers, clear counters, force `Stable`.
    pub(crate) async fn reset(&self) {
        let mut st = self.inner.state.lock().await;
        if st.disposed {
            return;
        }
        if let Some(cycle) = st.cycle_cancel.take() {
            cycle.cancel();
        }
        if let Some(task) = st.suspension_task.take() {
            task.abort();
        }
        st.retry_task = None;
        st.retry_pending = false;
        st.mode = ResilienceMode::Stable;
        st.failure_count = 0;
        st.reconnect_attempt = 0;
        st.suspended_until = None;
        drop(st);

        debug!("resilience state reset");
        self.inner.unified.update_recovery(false, 0);
    }

    /// Track session validity. Losing authentication abandons any
    /// in-flight recovery: retrying an invalid session cannot succeed.
    pub(crate) async fn update_auth_state(&self, authenticated: bool) {
        {
            let mut st = self.inner.state.lock().await;
            if st.disposed {
                return;
            }
            st.authenticated = authenticated;
            if authenticated || st.mode == ResilienceMode::Stable {
                return;
            }
        }
        info!("authentication lost; abandoning recovery");
        self.reset().await;
    }

    pub(crate) async fn dispose(&self) {
        let mut st = self.inner.state.lock().await;
        if st.disposed {
            return;
        }
        st.disposed = true;
        self.inner.cancel.cancel();
        if let Some(task) = st.suspension_task.take() {
            task.abort();
        }
        if let Some(task) = st.retry_task.take() {
            task.abort();
        }
        st.retry_pending = false;
        st.cycle_cancel = None;
    }

    // ── Observation ──────────────────────────────────────────────────

    pub(crate) async fn mode(&self) -> ResilienceMode {
        self.inner.state.lock().await.mode
    }

    pub(crate) async fn failure_count(&self) -> u32 {
        self.inner.state.lock().await.failure_count
    }

    pub(crate) async fn reconnect_attempt(&self) -> u32 {
        self.inner.state.lock().await.reconnect_attempt
    }

    /// Remaining cooldown while the breaker is open.
    pub(crate) async fn suspended_remaining(&self) -> Option<Duration> {
        let st = self.inner.state.lock().await;
        st.suspended_until
            .map(|deadline| deadline.saturating_duration_since(tokio::time::Instant::now()))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    fn fast_opts() -> RecoveryOptions {
        RecoveryOptions {
            failure_threshold: 3,
            suspension_timeout: Duration::from_secs(60),
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(80),
            jitter_factor: 0.0,
            max_attempts: 10,
        }
    }

    fn engine_with(opts: RecoveryOptions) -> (RecoveryEngine, broadcast::Receiver<GatewayEvent>) {
        let (events, rx) = broadcast::channel(256);
        let unified = Arc::new(ConnectionState::new(events.clone()));
        (RecoveryEngine::new(opts, unified, events), rx)
    }

    fn drain(rx: &mut broadcast::Receiver<GatewayEvent>) -> Vec<GatewayEvent> {
        let mut out = Vec::new();
        while let Ok(event) = rx.try_recv() {
            out.push(event);
        }
        out
    }

    /// Let every pending timer in the paused clock fire.
    async fn settle() {
        tokio::time::sleep(Duration::from_secs(600)).await;
    }

    // ── Backoff math ─────────────────────────────────────────────────

    #[test]
    fn backoff_is_deterministic_without_jitter() {
        let opts = RecoveryOptions {
            initial_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(30_000),
            jitter_factor: 0.0,
            ..RecoveryOptions::default()
        };
        let delays: Vec<u64> = (1..=10)
            .map(|n| backoff_delay(&opts, n).as_millis() as u64)
            .collect();
        assert_eq!(
            delays,
            vec![1000, 2000, 4000, 8000, 16000, 30000, 30000, 30000, 30000, 30000]
        );
    }

    #[test]
    fn backoff_jitter_stays_in_bounds() {
        let opts = RecoveryOptions {
            initial_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(30_000),
            jitter_factor: 0.3,
            ..RecoveryOptions::default()
        };
        for attempt in 1..=10 {
            let base = backoff_delay(
                &RecoveryOptions {
                    jitter_factor: 0.0,
                    ..opts.clone()
                },
                attempt,
            )
            .as_millis() as f64;
            for _ in 0..20 {
                let delay = backoff_delay(&opts, attempt).as_millis() as f64;
                assert!(delay >= base * 0.7 - 1.0, "attempt {attempt}: {delay} too low");
                assert!(delay <= base * 1.3 + 1.0, "attempt {attempt}: {delay} too high");
            }
        }
    }

    #[test]
    fn backoff_never_overflows_on_large_attempts() {
        let opts = RecoveryOptions::default();
        assert_eq!(backoff_delay(&opts, 1000), Duration::from_millis(30_000));
    }

    // ── Breaker ──────────────────────────────────────────────────────

    #[tokio::test(start_paused = true)]
    async fn threshold_crossing_trips_breaker_once() {
        let (engine, mut rx) = engine_with(fast_opts());

        engine.record_failure("drop 1").await;
        engine.record_failure("drop 2").await;
        assert_eq!(engine.mode().await, ResilienceMode::Degraded);

        engine.record_failure("drop 3").await;
        assert_eq!(engine.mode().await, ResilienceMode::Suspended);
        assert!(engine.suspended_remaining().await.is_some());

        // Failures while suspended must not count or re-trip.
        engine.record_failure("drop 4").await;
        assert_eq!(engine.failure_count().await, 3);

        let suspended_events = drain(&mut rx)
            .iter()
            .filter(|e| matches!(e, GatewayEvent::RecoverySuspended { .. }))
            .count();
        assert_eq!(suspended_events, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn suspension_expires_back_to_stable() {
        let (engine, _rx) = engine_with(fast_opts());
        for n in 0..3 {
            engine.record_failure(&format!("drop {n}")).await;
        }
        assert_eq!(engine.mode().await, ResilienceMode::Suspended);

        settle().await;

        assert_eq!(engine.mode().await, ResilienceMode::Stable);
        assert_eq!(engine.failure_count().await, 0);
        assert_eq!(engine.reconnect_attempt().await, 0);
        assert!(engine.suspended_remaining().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn reconnection_refused_while_suspended() {
        let (engine, _rx) = engine_with(fast_opts());
        engine.update_auth_state(true).await;
        for n in 0..3 {
            engine.record_failure(&format!("drop {n}")).await;
        }

        let started = engine.attempt_reconnection(|| async { Ok(true) }).await;
        assert!(!started);
    }

    #[tokio::test(start_paused = true)]
    async fn reconnection_refused_without_auth() {
        let (engine, _rx) = engine_with(fast_opts());
        let started = engine.attempt_reconnection(|| async { Ok(true) }).await;
        assert!(!started);
    }

    // ── Retry cycle ──────────────────────────────────────────────────

    #[tokio::test(start_paused = true)]
    async fn single_retry_cycle_in_flight() {
        let (engine, _rx) = engine_with(fast_opts());
        engine.update_auth_state(true).await;

        let calls = Arc::new(AtomicU32::new(0));
        let cb = calls.clone();
        let first = engine
            .attempt_reconnection(move || {
                let calls = cb.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(true)
                }
            })
            .await;
        let second = engine.attempt_reconnection(|| async { Ok(true) }).await;

        assert!(first);
        assert!(!second, "second call while one is pending is a no-op");

        settle().await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(engine.mode().await, ResilienceMode::Stable);
    }

    #[tokio::test(start_paused = true)]
    async fn success_resets_counters_and_emits() {
        let (engine, mut rx) = engine_with(fast_opts());
        engine.update_auth_state(true).await;
        engine.record_failure("drop").await;
        engine.record_failure("drop").await;

        assert!(engine.attempt_reconnection(|| async { Ok(true) }).await);
        settle().await;

        assert_eq!(engine.mode().await, ResilienceMode::Stable);
        assert_eq!(engine.failure_count().await, 0);
        assert_eq!(engine.reconnect_attempt().await, 0);

        let events = drain(&mut rx);
        assert!(events
            .iter()
            .any(|e| matches!(e, GatewayEvent::RecoveryScheduled { attempt: 1, .. })));
        assert!(events
            .iter()
            .any(|e| matches!(e, GatewayEvent::RecoverySucceeded { attempts: 1 })));
    }

    #[tokio::test(start_paused = true)]
    async fn exhaustion_enters_failed() {
        let opts = RecoveryOptions {
            max_attempts: 3,
            ..fast_opts()
        };
        let (engine, mut rx) = engine_with(opts);
        engine.update_auth_state(true).await;

        let calls = Arc::new(AtomicU32::new(0));
        let cb = calls.clone();
        assert!(
            engine
                .attempt_reconnection(move || {
                    let calls = cb.clone();
                    async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        Ok(false)
                    }
                })
                .await
        );
        settle().await;

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(engine.mode().await, ResilienceMode::Failed);
        assert!(drain(&mut rx)
            .iter()
            .any(|e| matches!(e, GatewayEvent::RecoveryFailed { attempts: 3 })));

        // Failed is terminal for automatic recovery.
        assert!(!engine.attempt_reconnection(|| async { Ok(true) }).await);
        engine.record_failure("late drop").await;
        assert_eq!(engine.failure_count().await, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn reset_cancels_pending_retry() {
        let (engine, _rx) = engine_with(fast_opts());
        engine.update_auth_state(true).await;

        let calls = Arc::new(AtomicU32::new(0));
        let cb = calls.clone();
        assert!(
            engine
                .attempt_reconnection(move || {
                    let calls = cb.clone();
                    async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        Ok(true)
                    }
                })
                .await
        );
        engine.reset().await;
        settle().await;

        assert_eq!(calls.load(Ordering::SeqCst), 0, "cancelled before the delay elapsed");
        assert_eq!(engine.mode().await, ResilienceMode::Stable);
        assert!(engine.attempt_reconnection(|| async { Ok(true) }).await);
    }

    #[tokio::test(start_paused = true)]
    async fn auth_loss_resets_from_suspended_and_failed() {
        let (engine, _rx) = engine_with(fast_opts());
        for n in 0..3 {
            engine.record_failure(&format!("drop {n}")).await;
        }
        assert_eq!(engine.mode().await, ResilienceMode::Suspended);

        engine.update_auth_state(false).await;
        assert_eq!(engine.mode().await, ResilienceMode::Stable);
        assert_eq!(engine.failure_count().await, 0);
        assert!(engine.suspended_remaining().await.is_none());

        let opts = RecoveryOptions {
            max_attempts: 1,
            ..fast_opts()
        };
        let (engine, _rx) = engine_with(opts);
        engine.update_auth_state(true).await;
        assert!(engine.attempt_reconnection(|| async { Ok(false) }).await);
        settle().await;
        assert_eq!(engine.mode().await, ResilienceMode::Failed);

        engine.update_auth_state(false).await;
        assert_eq!(engine.mode().await, ResilienceMode::Stable);
        assert_eq!(engine.reconnect_attempt().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn auth_error_during_callback_stops_recovery() {
        let (engine, _rx) = engine_with(fast_opts());
        engine.update_auth_state(true).await;

        let calls = Arc::new(AtomicU32::new(0));
        let cb = calls.clone();
        assert!(
            engine
                .attempt_reconnection(move || {
                    let calls = cb.clone();
                    async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        Err(CoreError::AuthenticationFailed {
                            message: "session revoked".into(),
                        })
                    }
                })
                .await
        );
        settle().await;

        assert_eq!(calls.load(Ordering::SeqCst), 1, "auth failures are never retried");
        assert_eq!(engine.mode().await, ResilienceMode::Stable);

        // The engine now refuses attempts until auth is restored.
        assert!(!engine.attempt_reconnection(|| async { Ok(true) }).await);
    }

    #[tokio::test(start_paused = true)]
    async fn disposed_engine_refuses_everything() {
        let (engine, _rx) = engine_with(fast_opts());
        engine.update_auth_state(true).await;
        engine.dispose().await;

        assert!(!engine.attempt_reconnection(|| async { Ok(true) }).await);
        engine.record_failure("late").await;
        assert_eq!(engine.failure_count().await, 0);
    }
}
