//! Live feed client.
//!
//! Owns the connection state machine, the reconnect/backfill policy and the
//! per-stream pipeline (normalizer, streaming aggregator, streaming checker).
//!
//! ```text
//! DISCONNECTED --connect--> CONNECTING --ok--> CONNECTED
//! CONNECTED --lost--> DISCONNECTED --reconnect enabled--> RECONNECTING
//! RECONNECTING --ok--> CONNECTED
//! RECONNECTING --attempts exhausted--> FAILED (terminal)
//! any --disconnect--> DISCONNECTED
//! ```
//!
//! The wire socket is external: a [`Connector`] opens the exchange session and
//! the host feeds decoded messages into [`LiveFeedClient::process_message`].
//! The client is confined to one logical tick stream; share it across tasks
//! only behind explicit synchronization.

use crate::backfill::{BackfillRequest, BackfillSink, NoopBackfill};
use crate::metrics::{self, MetricsSink, NoopMetrics, ERRORS_TOTAL, LATENCY_MS, RECONNECTS_TOTAL};
use crate::reconnect::ReconnectPolicy;
use serde::Serialize;
use serde_json::Value;
use shadow_core::{
    Bar, Clock, ConnectionState, Error, FeedConfig, QualityConfig, QualityEvent, Result, Severity,
    SystemClock, Tick, Timeframe, TimestampMs,
};
use shadow_ingestion::{BarAggregator, TickNormalizer};
use shadow_quality::QualityChecker;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Opens an exchange session. Implemented by the transport layer.
pub trait Connector: Send {
    /// Connect and subscribe to `symbols`. An error is a transport failure and
    /// feeds the reconnect state machine.
    fn connect(
        &mut self,
        exchange: &str,
        symbols: &[String],
    ) -> impl Future<Output = Result<()>> + Send;

    /// Tear down the session after a user-initiated disconnect.
    fn close(&mut self) {}
}

type StateCallback = Box<dyn FnMut(ConnectionState, ConnectionState) + Send>;
type TickCallback = Box<dyn FnMut(&Tick) + Send>;
type BarCallback = Box<dyn FnMut(&Bar) + Send>;
type EventCallback = Box<dyn FnMut(&QualityEvent) + Send>;

/// Message and tick counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FeedStats {
    pub messages_received: u64,
    pub messages_parsed: u64,
    pub messages_failed: u64,
    pub ticks_emitted: u64,
    pub latency_samples: u64,
    /// Ticks stamped after their arrival (clock skew, replay).
    pub negative_latency_dropped: u64,
}

/// Requests a user disconnect from outside the task driving the client.
#[derive(Debug, Clone)]
pub struct DisconnectHandle {
    cancel: Arc<watch::Sender<bool>>,
}

impl DisconnectHandle {
    /// Abort any backoff wait or in-flight connect attempt; the client moves
    /// straight to DISCONNECTED. With nothing pending, the request is applied
    /// on the client's next call (see
    /// [`LiveFeedClient::apply_pending_disconnect`]). Only a later
    /// [`LiveFeedClient::connect`] clears it.
    pub fn disconnect(&self) {
        self.cancel.send_replace(true);
    }
}

enum Attempt {
    Connected,
    Failed(Error),
    Cancelled,
}

/// Feed client for one exchange session.
pub struct LiveFeedClient<C> {
    config: FeedConfig,
    timeframe: Timeframe,
    connector: C,
    state: ConnectionState,
    reconnect: ReconnectPolicy,
    reconnect_count: u32,
    normalizer: TickNormalizer,
    aggregator: BarAggregator,
    checker: QualityChecker,
    clock: Arc<dyn Clock>,
    metrics: Arc<dyn MetricsSink>,
    backfill: Arc<dyn BackfillSink>,
    cancel: Arc<watch::Sender<bool>>,
    stats: FeedStats,
    on_state_change: Option<StateCallback>,
    on_tick: Option<TickCallback>,
    on_bar: Option<BarCallback>,
    on_quality_event: Option<EventCallback>,
}

impl<C: Connector> LiveFeedClient<C> {
    /// Create a client in the DISCONNECTED state. Fails on invalid config.
    pub fn new(config: FeedConfig, quality: &QualityConfig, connector: C) -> Result<Self> {
        config.validate()?;
        let timeframe = config.parsed_timeframe()?;
        let checker = QualityChecker::from_config(quality)?;
        let (cancel, _) = watch::channel(false);

        Ok(Self {
            timeframe,
            connector,
            state: ConnectionState::Disconnected,
            reconnect: ReconnectPolicy::from_config(&config),
            reconnect_count: 0,
            normalizer: TickNormalizer::new(config.exchange.as_str()),
            aggregator: BarAggregator::new(timeframe),
            checker,
            clock: Arc::new(SystemClock),
            metrics: Arc::new(NoopMetrics),
            backfill: Arc::new(NoopBackfill),
            cancel: Arc::new(cancel),
            stats: FeedStats::default(),
            on_state_change: None,
            on_tick: None,
            on_bar: None,
            on_quality_event: None,
            config,
        })
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn with_backfill(mut self, backfill: Arc<dyn BackfillSink>) -> Self {
        self.backfill = backfill;
        self
    }

    /// Called with `(from, to)` on every state transition.
    pub fn on_state_change(
        mut self,
        callback: impl FnMut(ConnectionState, ConnectionState) + Send + 'static,
    ) -> Self {
        self.on_state_change = Some(Box::new(callback));
        self
    }

    /// Called for every normalized tick.
    pub fn on_tick(mut self, callback: impl FnMut(&Tick) + Send + 'static) -> Self {
        self.on_tick = Some(Box::new(callback));
        self
    }

    /// Called for every completed bar.
    pub fn on_bar(mut self, callback: impl FnMut(&Bar) + Send + 'static) -> Self {
        self.on_bar = Some(Box::new(callback));
        self
    }

    /// Called for every quality event raised by the streaming checker.
    pub fn on_quality_event(
        mut self,
        callback: impl FnMut(&QualityEvent) + Send + 'static,
    ) -> Self {
        self.on_quality_event = Some(Box::new(callback));
        self
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Successful reconnects since construction.
    pub fn reconnect_count(&self) -> u32 {
        self.reconnect_count
    }

    pub fn stats(&self) -> &FeedStats {
        &self.stats
    }

    pub fn config(&self) -> &FeedConfig {
        &self.config
    }

    pub fn timeframe(&self) -> Timeframe {
        self.timeframe
    }

    pub fn connector(&self) -> &C {
        &self.connector
    }

    pub fn connector_mut(&mut self) -> &mut C {
        &mut self.connector
    }

    /// Handle for aborting a pending reconnect from another task.
    pub fn disconnect_handle(&self) -> DisconnectHandle {
        DisconnectHandle {
            cancel: Arc::clone(&self.cancel),
        }
    }

    /// Open the session. On transport failure the reconnect loop takes over
    /// (when enabled); otherwise the client ends FAILED. Never returns an error:
    /// the outcome is the returned state.
    pub async fn connect(&mut self) -> ConnectionState {
        self.cancel.send_replace(false);
        self.transition(ConnectionState::Connecting);

        match self.attempt().await {
            Attempt::Connected => {
                self.reconnect.reset();
                self.transition(ConnectionState::Connected);
            }
            Attempt::Cancelled => self.disconnect(),
            Attempt::Failed(e) => {
                warn!(exchange = %self.config.exchange, error = %e, "connect failed");
                self.record_error("connect_failed");
                if self.config.reconnect_enabled {
                    self.transition(ConnectionState::Disconnected);
                    self.reconnect_loop().await;
                } else {
                    self.transition(ConnectionState::Failed);
                }
            }
        }
        self.state
    }

    /// User-initiated disconnect. Aborts any pending retry and never triggers
    /// a reconnect.
    pub fn disconnect(&mut self) {
        self.cancel.send_replace(true);
        self.connector.close();
        self.reconnect.reset();
        self.transition(ConnectionState::Disconnected);
    }

    /// Carry out a disconnect requested through a [`DisconnectHandle`] while
    /// no retry was pending. Returns whether a request is outstanding.
    pub fn apply_pending_disconnect(&mut self) -> bool {
        if !*self.cancel.borrow() {
            return false;
        }
        if matches!(
            self.state,
            ConnectionState::Connected | ConnectionState::Connecting | ConnectionState::Reconnecting
        ) {
            info!(exchange = %self.config.exchange, state = %self.state, "applying requested disconnect");
            self.disconnect();
        }
        true
    }

    /// Report an unexpected loss of the session. Ignored unless CONNECTED, and
    /// never reconnects once a disconnect has been requested.
    pub async fn connection_lost(&mut self, reason: &str) -> ConnectionState {
        if self.apply_pending_disconnect() {
            debug!(reason, "connection loss after requested disconnect");
            return self.state;
        }
        if self.state != ConnectionState::Connected {
            debug!(state = %self.state, reason, "ignoring connection loss outside CONNECTED");
            return self.state;
        }

        warn!(exchange = %self.config.exchange, reason, "connection lost");
        self.transition(ConnectionState::Disconnected);
        if self.config.reconnect_enabled {
            self.reconnect_loop().await;
        }
        self.state
    }

    async fn reconnect_loop(&mut self) {
        self.transition(ConnectionState::Reconnecting);
        let mut cancel_rx = self.cancel.subscribe();

        loop {
            let Some(delay) = self.reconnect.next_delay() else {
                error!(
                    exchange = %self.config.exchange,
                    max_attempts = self.reconnect.max_attempts(),
                    "reconnect attempts exhausted"
                );
                self.record_error("reconnect_exhausted");
                self.transition(ConnectionState::Failed);
                return;
            };

            info!(
                exchange = %self.config.exchange,
                attempt = self.reconnect.attempt_count(),
                delay_ms = delay.as_millis() as u64,
                "reconnect scheduled"
            );
            let cancelled = tokio::select! {
                biased;
                _ = cancel_rx.wait_for(|cancelled| *cancelled) => true,
                _ = tokio::time::sleep(delay) => false,
            };
            if cancelled {
                info!(exchange = %self.config.exchange, "pending reconnect cancelled");
                self.disconnect();
                return;
            }

            match self.attempt().await {
                Attempt::Connected => {
                    self.reconnect.reset();
                    self.reconnect_count += 1;
                    self.metrics.inc_counter(
                        RECONNECTS_TOTAL,
                        &metrics::labels(&[("exchange", &self.config.exchange)]),
                        1,
                    );
                    self.transition(ConnectionState::Connected);
                    if self.config.backfill_enabled {
                        self.request_backfill();
                    }
                    return;
                }
                Attempt::Cancelled => {
                    self.disconnect();
                    return;
                }
                Attempt::Failed(e) => {
                    warn!(
                        exchange = %self.config.exchange,
                        attempt = self.reconnect.attempt_count(),
                        error = %e,
                        "reconnect attempt failed"
                    );
                    self.record_error("reconnect_failed");
                }
            }
        }
    }

    /// One connect call, abandoned as soon as a disconnect is requested.
    async fn attempt(&mut self) -> Attempt {
        let mut cancel_rx = self.cancel.subscribe();
        let connect = self
            .connector
            .connect(&self.config.exchange, &self.config.symbols);

        tokio::select! {
            biased;
            _ = cancel_rx.wait_for(|cancelled| *cancelled) => Attempt::Cancelled,
            result = connect => match result {
                Ok(()) => Attempt::Connected,
                Err(e) => Attempt::Failed(e),
            },
        }
    }

    fn request_backfill(&self) {
        let now = self.clock.now_ms();
        let request = BackfillRequest {
            exchange: self.config.exchange.clone(),
            symbols: self.config.symbols.clone(),
            start_ts_ms: now - self.config.backfill_lookback_ms,
            end_ts_ms: now,
        };
        info!(
            exchange = %request.exchange,
            start_ts_ms = request.start_ts_ms,
            end_ts_ms = request.end_ts_ms,
            "requesting backfill"
        );
        self.backfill.request_backfill(request);
    }

    fn transition(&mut self, next: ConnectionState) {
        if self.state == next {
            return;
        }
        let previous = std::mem::replace(&mut self.state, next);
        info!(exchange = %self.config.exchange, from = %previous, to = %next, "connection state changed");
        if let Some(callback) = self.on_state_change.as_mut() {
            callback(previous, next);
        }
    }

    fn record_error(&self, reason: &str) {
        self.metrics.inc_counter(
            ERRORS_TOTAL,
            &metrics::labels(&[("exchange", &self.config.exchange), ("reason", reason)]),
            1,
        );
    }

    /// Normalize one decoded message and push its ticks through the pipeline.
    ///
    /// A disconnect requested through a handle is applied first. A message
    /// that yields no ticks counts as failed; message content never changes
    /// the connection state. Errors only surface for bar invariant violations.
    pub fn process_message(&mut self, raw: &Value) -> Result<Vec<Tick>> {
        self.apply_pending_disconnect();
        self.stats.messages_received += 1;
        let ticks = self.normalizer.normalize(raw);
        if ticks.is_empty() {
            self.stats.messages_failed += 1;
            return Ok(ticks);
        }
        self.stats.messages_parsed += 1;

        let arrival_ms = self.clock.now_ms();
        for tick in &ticks {
            self.record_latency(arrival_ms, tick);
            self.stats.ticks_emitted += 1;
            if let Some(callback) = self.on_tick.as_mut() {
                callback(tick);
            }
            self.run_pipeline(tick)?;
        }
        Ok(ticks)
    }

    /// [`Self::process_message`] for JSON text. Unparsable text counts as a
    /// failed message.
    pub fn process_text(&mut self, raw: &str) -> Result<Vec<Tick>> {
        match serde_json::from_str::<Value>(raw) {
            Ok(value) => self.process_message(&value),
            Err(e) => {
                warn!(error = %e, "discarding unparsable message");
                self.stats.messages_received += 1;
                self.stats.messages_failed += 1;
                Ok(Vec::new())
            }
        }
    }

    fn record_latency(&mut self, arrival_ms: TimestampMs, tick: &Tick) {
        let latency_ms = arrival_ms - tick.ts_ms();
        if latency_ms < 0 {
            self.stats.negative_latency_dropped += 1;
            return;
        }
        self.stats.latency_samples += 1;
        self.metrics.observe(
            LATENCY_MS,
            &metrics::labels(&[("exchange", &self.config.exchange), ("symbol", tick.symbol())]),
            latency_ms as f64,
        );
    }

    fn run_pipeline(&mut self, tick: &Tick) -> Result<()> {
        if let Some(event) = self.checker.check_tick(tick) {
            self.emit_event(&event);
        }
        if let Some(bar) = self.aggregator.ingest(tick)? {
            self.emit_bar(&bar);
        }
        Ok(())
    }

    fn emit_bar(&mut self, bar: &Bar) {
        for event in self.checker.check_bar(bar, Some(self.timeframe.as_ms())) {
            self.emit_event(&event);
        }
        if let Some(callback) = self.on_bar.as_mut() {
            callback(bar);
        }
    }

    fn emit_event(&mut self, event: &QualityEvent) {
        if event.severity == Severity::Block {
            warn!(kind = %event.kind, symbol = %event.symbol, ts_ms = event.ts_ms, "blocking quality event");
        } else {
            debug!(kind = %event.kind, symbol = %event.symbol, ts_ms = event.ts_ms, "quality event");
        }
        if let Some(callback) = self.on_quality_event.as_mut() {
            callback(event);
        }
    }

    /// Force-emit every open bar (e.g., at shutdown).
    pub fn flush(&mut self) -> Result<Vec<Bar>> {
        let bars = self.aggregator.flush()?;
        for bar in &bars {
            self.emit_bar(bar);
        }
        Ok(bars)
    }

    /// STALE_DATA events for every symbol silent past the threshold.
    pub fn check_staleness(&mut self, now_ms: TimestampMs) -> Vec<QualityEvent> {
        let events = self.checker.check_staleness_all(now_ms);
        for event in &events {
            self.emit_event(event);
        }
        events
    }

    /// [`Self::check_staleness`] at the client's clock.
    pub fn check_staleness_now(&mut self) -> Vec<QualityEvent> {
        let now_ms = self.clock.now_ms();
        self.check_staleness(now_ms)
    }
}
