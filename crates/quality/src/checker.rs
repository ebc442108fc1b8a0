//! Streaming quality checker for live ticks and bars.
//!
//! Keeps the last tick timestamp and last bar start per symbol. The stored
//! value is overwritten on every call, in or out of order, so a stream that
//! jumps back once and then continues forward raises one alert, not one per
//! tick.

use shadow_core::{Bar, QualityConfig, QualityEvent, QualityKind, Result, Severity, Tick, TimestampMs};
use std::collections::HashMap;
use tracing::warn;

/// MISSING_BAR escalates from WARN to BLOCK at this many missing bars.
pub const MISSING_BAR_BLOCK_THRESHOLD: i64 = 5;

/// Per-symbol ordering, continuity and staleness checks.
#[derive(Debug, Clone)]
pub struct QualityChecker {
    stale_threshold_ms: i64,
    last_tick_ts: HashMap<String, TimestampMs>,
    last_bar_start: HashMap<String, TimestampMs>,
}

impl QualityChecker {
    /// Create a checker with the given staleness threshold.
    pub fn new(stale_threshold_ms: i64) -> Self {
        Self {
            stale_threshold_ms,
            last_tick_ts: HashMap::new(),
            last_bar_start: HashMap::new(),
        }
    }

    /// Create a checker from validated quality config.
    pub fn from_config(config: &QualityConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::new(config.stale_threshold_ms))
    }

    /// NON_MONOTONIC_TICK if the tick is older than the last one seen for its
    /// symbol.
    pub fn check_tick(&mut self, tick: &Tick) -> Option<QualityEvent> {
        let previous = self
            .last_tick_ts
            .insert(tick.symbol().to_string(), tick.ts_ms());

        match previous {
            Some(last_ts) if tick.ts_ms() < last_ts => Some(
                QualityEvent::new(
                    QualityKind::NonMonotonicTick,
                    Severity::Warn,
                    tick.ts_ms(),
                    tick.symbol(),
                )
                .with_detail("previous_ts_ms", last_ts)
                .with_detail("backwards_ms", last_ts - tick.ts_ms()),
            ),
            _ => None,
        }
    }

    /// NON_MONOTONIC_BAR if the bar starts before the last bar seen for its
    /// symbol. With a timeframe, also MISSING_BAR when bars were skipped.
    pub fn check_bar(&mut self, bar: &Bar, timeframe_ms: Option<i64>) -> Vec<QualityEvent> {
        let mut events = Vec::new();
        let previous = self
            .last_bar_start
            .insert(bar.symbol().to_string(), bar.start_ts_ms());
        let Some(last_start) = previous else {
            return events;
        };

        if bar.start_ts_ms() < last_start {
            events.push(
                QualityEvent::new(
                    QualityKind::NonMonotonicBar,
                    Severity::Warn,
                    bar.start_ts_ms(),
                    bar.symbol(),
                )
                .with_detail("previous_start_ts_ms", last_start),
            );
        }

        if let Some(tf_ms) = timeframe_ms.filter(|tf| *tf > 0) {
            let expected_next = last_start + tf_ms;
            if bar.start_ts_ms() > expected_next {
                let missing_bars = (bar.start_ts_ms() - expected_next) / tf_ms;
                if missing_bars > 0 {
                    let severity = if missing_bars >= MISSING_BAR_BLOCK_THRESHOLD {
                        warn!(symbol = bar.symbol(), missing_bars, "bar stream missing too many bars");
                        Severity::Block
                    } else {
                        Severity::Warn
                    };
                    events.push(
                        QualityEvent::new(
                            QualityKind::MissingBar,
                            severity,
                            bar.start_ts_ms(),
                            bar.symbol(),
                        )
                        .with_detail("expected_start_ts_ms", expected_next)
                        .with_detail("missing_bars", missing_bars),
                    );
                }
            }
        }

        events
    }

    /// STALE_DATA if more than the threshold has passed since the symbol's last
    /// tick. Symbols never seen are not checked.
    pub fn check_staleness(&self, current_ts_ms: TimestampMs, symbol: &str) -> Option<QualityEvent> {
        let last_ts = *self.last_tick_ts.get(symbol)?;
        let age_ms = current_ts_ms - last_ts;
        (age_ms > self.stale_threshold_ms).then(|| {
            QualityEvent::new(QualityKind::StaleData, Severity::Warn, current_ts_ms, symbol)
                .with_detail("last_tick_ts_ms", last_ts)
                .with_detail("age_ms", age_ms)
                .with_detail("threshold_ms", self.stale_threshold_ms)
        })
    }

    /// Staleness check for every symbol seen so far, ordered by symbol.
    pub fn check_staleness_all(&self, current_ts_ms: TimestampMs) -> Vec<QualityEvent> {
        let mut symbols: Vec<&String> = self.last_tick_ts.keys().collect();
        symbols.sort();
        symbols
            .into_iter()
            .filter_map(|symbol| self.check_staleness(current_ts_ms, symbol))
            .collect()
    }

    pub fn last_tick_ts(&self, symbol: &str) -> Option<TimestampMs> {
        self.last_tick_ts.get(symbol).copied()
    }

    pub fn last_bar_start(&self, symbol: &str) -> Option<TimestampMs> {
        self.last_bar_start.get(symbol).copied()
    }

    pub fn stale_threshold_ms(&self) -> i64 {
        self.stale_threshold_ms
    }

    /// Forget all per-symbol state.
    pub fn reset(&mut self) {
        self.last_tick_ts.clear();
        self.last_bar_start.clear();
    }
}

impl Default for QualityChecker {
    fn default() -> Self {
        Self::new(QualityConfig::default().stale_threshold_ms)
    }
}
