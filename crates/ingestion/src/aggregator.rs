//! OHLCV bar aggregation from ticks.
//!
//! One engine serves both call patterns:
//! - batch: [`BarAggregator::ingest_batch`] over a full tick set
//! - streaming: [`BarAggregator::ingest`] one tick at a time, with
//!   [`BarAggregator::flush`] at shutdown
//!
//! Both fold ticks through [`BarBuffer::update`], so the OHLC rules cannot
//! drift apart.
//!
//! Streaming bars are emitted lazily: a window closes only when a tick from a
//! later window arrives for the same symbol. There is no wall-clock timer.
//! A tick older than the open buffer's start is not rejected; it updates the
//! open buffer in place. Callers must feed ticks in timestamp order (see
//! [`crate::normalizer::sort_ticks`]).

use crate::normalizer::sort_ticks;
use shadow_core::{Bar, BarBuffer, Result, Tick, Timeframe, TimestampMs};
use std::collections::{BTreeMap, HashMap};
use tracing::debug;

/// Bar aggregator for a single timeframe across any number of symbols.
pub struct BarAggregator {
    timeframe: Timeframe,
    /// Open streaming buffer per symbol.
    buffers: HashMap<String, BarBuffer>,
}

impl BarAggregator {
    /// Create an aggregator for the given timeframe.
    pub fn new(timeframe: Timeframe) -> Self {
        Self {
            timeframe,
            buffers: HashMap::new(),
        }
    }

    /// Create an aggregator from a timeframe label such as `"1m"`.
    pub fn from_label(label: &str) -> Result<Self> {
        Ok(Self::new(Timeframe::parse(label)?))
    }

    pub fn timeframe(&self) -> Timeframe {
        self.timeframe
    }

    /// Aggregate a complete tick set into bars sorted by window start (then
    /// symbol). Streaming state is untouched.
    pub fn ingest_batch(&self, ticks: &[Tick]) -> Result<Vec<Bar>> {
        let mut batch = TickBatch::new(self.timeframe);
        batch.add_ticks(ticks.iter().cloned());
        batch.finalize()
    }

    /// Feed one tick. Returns the previous bar for the tick's symbol when the
    /// tick opens a later window.
    pub fn ingest(&mut self, tick: &Tick) -> Result<Option<Bar>> {
        if let Some(buffer) = self.buffers.get_mut(tick.symbol()) {
            if buffer.accepts(tick.ts_ms()) {
                if tick.ts_ms() < buffer.start_ts_ms() {
                    debug!(
                        symbol = tick.symbol(),
                        ts_ms = tick.ts_ms(),
                        buffer_start = buffer.start_ts_ms(),
                        "late tick folded into open buffer"
                    );
                }
                buffer.update(tick);
                return Ok(None);
            }

            let completed = buffer.to_bar()?;
            let mut next = BarBuffer::new(tick.symbol(), self.timeframe, tick.ts_ms())?;
            next.update(tick);
            *buffer = next;
            return Ok(Some(completed));
        }

        let mut buffer = BarBuffer::new(tick.symbol(), self.timeframe, tick.ts_ms())?;
        buffer.update(tick);
        self.buffers.insert(tick.symbol().to_string(), buffer);
        Ok(None)
    }

    /// Feed several ticks in order, collecting every emitted bar.
    pub fn ingest_all<'a>(&mut self, ticks: impl IntoIterator<Item = &'a Tick>) -> Result<Vec<Bar>> {
        let mut bars = Vec::new();
        for tick in ticks {
            if let Some(bar) = self.ingest(tick)? {
                bars.push(bar);
            }
        }
        Ok(bars)
    }

    /// Force-emit every open buffer, sorted by window start then symbol.
    pub fn flush(&mut self) -> Result<Vec<Bar>> {
        let mut bars = self
            .buffers
            .drain()
            .map(|(_, buffer)| buffer.to_bar())
            .collect::<Result<Vec<_>>>()?;
        bars.sort_by(|a, b| {
            a.start_ts_ms()
                .cmp(&b.start_ts_ms())
                .then_with(|| a.symbol().cmp(b.symbol()))
        });
        Ok(bars)
    }

    /// Force-emit the open buffer for one symbol.
    pub fn flush_symbol(&mut self, symbol: &str) -> Result<Option<Bar>> {
        self.buffers
            .remove(symbol)
            .map(|buffer| buffer.to_bar())
            .transpose()
    }

    /// The open buffer for a symbol, if any.
    pub fn open_buffer(&self, symbol: &str) -> Option<&BarBuffer> {
        self.buffers.get(symbol)
    }

    /// Number of open streaming buffers.
    pub fn pending_bar_count(&self) -> usize {
        self.buffers.len()
    }

    /// Drop all streaming state without emitting.
    pub fn clear(&mut self) {
        self.buffers.clear();
    }
}

/// Batch accumulator: buckets ticks by (symbol, window) and builds bars on
/// demand. `finalize` can be called any number of times.
#[derive(Debug, Clone)]
pub struct TickBatch {
    timeframe: Timeframe,
    buckets: BTreeMap<(TimestampMs, String), Vec<Tick>>,
}

impl TickBatch {
    pub fn new(timeframe: Timeframe) -> Self {
        Self {
            timeframe,
            buckets: BTreeMap::new(),
        }
    }

    pub fn add_tick(&mut self, tick: Tick) {
        let key = (
            self.timeframe.window_start(tick.ts_ms()),
            tick.symbol().to_string(),
        );
        self.buckets.entry(key).or_default().push(tick);
    }

    pub fn add_ticks(&mut self, ticks: impl IntoIterator<Item = Tick>) {
        for tick in ticks {
            self.add_tick(tick);
        }
    }

    /// Number of tick buckets (one per future bar).
    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    /// Build one bar per bucket, sorted by window start then symbol.
    pub fn finalize(&self) -> Result<Vec<Bar>> {
        self.buckets
            .iter()
            .map(|((start, symbol), ticks)| {
                let mut sorted = ticks.clone();
                sort_ticks(&mut sorted);

                let mut buffer = BarBuffer::new(symbol.as_str(), self.timeframe, *start)?;
                for tick in &sorted {
                    buffer.update(tick);
                }
                buffer.to_bar()
            })
            .collect()
    }
}
