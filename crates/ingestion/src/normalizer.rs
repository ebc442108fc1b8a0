//! Trade message normalization.
//!
//! Turns raw exchange trade messages shaped as
//! `[channel_id, [[price, volume, time, side, order_type, misc, ...], ...], "trade", symbol]`
//! into canonical ticks. Malformed input never errors: the message (or the bad
//! entry) is logged and skipped.

use ordered_float::OrderedFloat;
use serde_json::Value;
use shadow_core::{Tick, MAX_TIMESTAMP_MS};
use tracing::{debug, warn};

/// Channel name carried by trade messages.
pub const TRADE_CHANNEL: &str = "trade";

/// Converts raw trade messages into ticks tagged with a fixed source.
#[derive(Debug, Clone)]
pub struct TickNormalizer {
    source: String,
}

impl TickNormalizer {
    /// Create a normalizer; `source` is stamped on every tick (usually the
    /// exchange name).
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Normalize one raw message. Returns an empty list for anything that is not
    /// a well-formed trade message.
    pub fn normalize(&self, raw: &Value) -> Vec<Tick> {
        let Some(fields) = raw.as_array() else {
            debug!("rejecting non-array message");
            return Vec::new();
        };
        if fields.len() < 4 {
            debug!(len = fields.len(), "rejecting message with too few fields");
            return Vec::new();
        }
        if fields[2].as_str() != Some(TRADE_CHANNEL) {
            debug!(channel = %fields[2], "ignoring non-trade channel");
            return Vec::new();
        }
        let Some(trades) = fields[1].as_array() else {
            warn!("trade message payload is not a list");
            return Vec::new();
        };
        let Some(symbol) = fields[3].as_str() else {
            warn!(symbol = %fields[3], "trade message symbol is not a string");
            return Vec::new();
        };

        trades
            .iter()
            .enumerate()
            .filter_map(|(index, entry)| match self.normalize_entry(entry, symbol) {
                Ok(tick) => Some(tick),
                Err(reason) => {
                    debug!(symbol, index, %reason, "dropping trade entry");
                    None
                }
            })
            .collect()
    }

    /// Normalize a message given as JSON text.
    pub fn normalize_str(&self, raw: &str) -> Vec<Tick> {
        match serde_json::from_str::<Value>(raw) {
            Ok(value) => self.normalize(&value),
            Err(e) => {
                warn!(error = %e, "discarding unparsable message");
                Vec::new()
            }
        }
    }

    /// Normalize a sequence of messages into one list sorted by `ts_ms`.
    ///
    /// The sort is the ordering contract the aggregator relies on.
    pub fn normalize_batch<'a>(&self, raws: impl IntoIterator<Item = &'a Value>) -> Vec<Tick> {
        let mut ticks: Vec<Tick> = raws
            .into_iter()
            .flat_map(|raw| self.normalize(raw))
            .collect();
        sort_ticks(&mut ticks);
        ticks
    }

    fn normalize_entry(&self, entry: &Value, symbol: &str) -> Result<Tick, String> {
        let fields = entry
            .as_array()
            .ok_or_else(|| "entry is not a list".to_string())?;
        if fields.len() < 3 {
            return Err(format!("entry has {} fields, need 3", fields.len()));
        }

        let price = coerce_f64(&fields[0]).ok_or_else(|| format!("bad price {}", fields[0]))?;
        let volume = coerce_f64(&fields[1]).ok_or_else(|| format!("bad volume {}", fields[1]))?;
        let time_s = coerce_f64(&fields[2]).ok_or_else(|| format!("bad time {}", fields[2]))?;
        let ts_ms_f = (time_s * 1000.0).floor();
        if !(0.0..=MAX_TIMESTAMP_MS as f64).contains(&ts_ms_f) {
            return Err(format!("time {time_s} out of range"));
        }
        let ts_ms = ts_ms_f as i64;

        Tick::new(ts_ms, price, volume, symbol, self.source.as_str()).map_err(|e| e.to_string())
    }
}

/// Read a JSON number or numeric string as a finite float.
fn coerce_f64(value: &Value) -> Option<f64> {
    let parsed = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }?;
    parsed.is_finite().then_some(parsed)
}

/// Sort ticks by timestamp. Equal timestamps are ordered by price, then volume,
/// so the result does not depend on arrival order.
pub fn sort_ticks(ticks: &mut [Tick]) {
    ticks.sort_by_key(|t| (t.ts_ms(), OrderedFloat(t.price()), OrderedFloat(t.volume())));
}
