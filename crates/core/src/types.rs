//! Core data types for the shadow feed system.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Timestamp in milliseconds since Unix epoch (UTC).
pub type TimestampMs = i64;

/// Latest accepted tick timestamp: 9999-12-31T23:59:59.999Z.
pub const MAX_TIMESTAMP_MS: TimestampMs = 253_402_300_799_999;

/// Unit suffix of a timeframe string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimeUnit {
    Second,
    Minute,
    Hour,
    Day,
}

impl TimeUnit {
    fn from_suffix(c: char) -> Option<Self> {
        match c {
            's' => Some(TimeUnit::Second),
            'm' => Some(TimeUnit::Minute),
            'h' => Some(TimeUnit::Hour),
            'd' => Some(TimeUnit::Day),
            _ => None,
        }
    }

    fn suffix(self) -> char {
        match self {
            TimeUnit::Second => 's',
            TimeUnit::Minute => 'm',
            TimeUnit::Hour => 'h',
            TimeUnit::Day => 'd',
        }
    }

    /// Milliseconds in one unit.
    pub fn ms(self) -> i64 {
        match self {
            TimeUnit::Second => 1_000,
            TimeUnit::Minute => 60_000,
            TimeUnit::Hour => 3_600_000,
            TimeUnit::Day => 86_400_000,
        }
    }
}

/// A fixed bar-window duration such as `1m` or `4h`.
///
/// Parsed from `<int><unit>` with unit in `{s, m, h, d}`. Serializes back to the
/// same label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Timeframe {
    count: i64,
    unit: TimeUnit,
}

impl Timeframe {
    /// Parse a timeframe label. Fails on empty input, an unknown unit, a
    /// non-integer prefix or a zero count.
    pub fn parse(label: &str) -> Result<Self> {
        let mut chars = label.chars();
        let suffix = chars
            .next_back()
            .ok_or_else(|| Error::config("empty timeframe"))?;
        let unit = TimeUnit::from_suffix(suffix)
            .ok_or_else(|| Error::config(format!("unknown timeframe unit in {label:?}")))?;

        let prefix = chars.as_str();
        if prefix.is_empty() || !prefix.chars().all(|c| c.is_ascii_digit()) {
            return Err(Error::config(format!(
                "timeframe {label:?} must be <int><unit>"
            )));
        }
        let count: i64 = prefix
            .parse()
            .map_err(|_| Error::config(format!("timeframe count out of range in {label:?}")))?;
        if count == 0 {
            return Err(Error::config(format!("timeframe {label:?} must be positive")));
        }
        count
            .checked_mul(unit.ms())
            .ok_or_else(|| Error::config(format!("timeframe {label:?} overflows")))?;

        Ok(Self { count, unit })
    }

    /// Window length in milliseconds.
    #[inline]
    pub fn as_ms(&self) -> i64 {
        self.count * self.unit.ms()
    }

    /// Start of the window containing `ts_ms`.
    #[inline]
    pub fn window_start(&self, ts_ms: TimestampMs) -> TimestampMs {
        ts_ms.div_euclid(self.as_ms()) * self.as_ms()
    }

    /// Exclusive end of the window containing `ts_ms`, or `None` past
    /// `i64::MAX`.
    #[inline]
    pub fn window_end(&self, ts_ms: TimestampMs) -> Option<TimestampMs> {
        self.window_start(ts_ms).checked_add(self.as_ms())
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.count, self.unit.suffix())
    }
}

impl FromStr for Timeframe {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Timeframe {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<Timeframe> for String {
    fn from(tf: Timeframe) -> Self {
        tf.to_string()
    }
}

/// Convert a timeframe label to milliseconds.
pub fn tf_to_ms(label: &str) -> Result<i64> {
    Timeframe::parse(label).map(|tf| tf.as_ms())
}

/// A single trade execution, normalized from an exchange message.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Tick {
    ts_ms: TimestampMs,
    price: f64,
    volume: f64,
    symbol: String,
    source: String,
}

impl Tick {
    /// Create a tick. Price and volume must be finite and positive, the
    /// timestamp within `[0, MAX_TIMESTAMP_MS]` and the symbol non-empty.
    pub fn new(
        ts_ms: TimestampMs,
        price: f64,
        volume: f64,
        symbol: impl Into<String>,
        source: impl Into<String>,
    ) -> Result<Self> {
        let symbol = symbol.into();
        if !(0..=MAX_TIMESTAMP_MS).contains(&ts_ms) {
            return Err(Error::validation(format!(
                "tick ts_ms must be in [0, {MAX_TIMESTAMP_MS}], got {ts_ms}"
            )));
        }
        if !price.is_finite() || price <= 0.0 {
            return Err(Error::validation(format!("tick price must be > 0, got {price}")));
        }
        if !volume.is_finite() || volume <= 0.0 {
            return Err(Error::validation(format!("tick volume must be > 0, got {volume}")));
        }
        if symbol.is_empty() {
            return Err(Error::validation("tick symbol must not be empty"));
        }
        Ok(Self {
            ts_ms,
            price,
            volume,
            symbol,
            source: source.into(),
        })
    }

    #[inline]
    pub fn ts_ms(&self) -> TimestampMs {
        self.ts_ms
    }

    #[inline]
    pub fn price(&self) -> f64 {
        self.price
    }

    #[inline]
    pub fn volume(&self) -> f64 {
        self.volume
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn source(&self) -> &str {
        &self.source
    }
}

fn window_end_checked(
    symbol: &str,
    timeframe: Timeframe,
    start_ts_ms: TimestampMs,
) -> Result<TimestampMs> {
    start_ts_ms.checked_add(timeframe.as_ms()).ok_or_else(|| {
        Error::validation(format!(
            "{timeframe} window for {symbol} starting at {start_ts_ms} overflows"
        ))
    })
}

/// Immutable OHLCV bar over `[start_ts_ms, end_ts_ms)` for one symbol.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Bar {
    symbol: String,
    timeframe: Timeframe,
    start_ts_ms: TimestampMs,
    end_ts_ms: TimestampMs,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    volume: f64,
    vwap: Option<f64>,
    trade_count: u32,
}

impl Bar {
    /// Create a bar for the window starting at `start_ts_ms`. The end is
    /// `start_ts_ms + timeframe`.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        symbol: impl Into<String>,
        timeframe: Timeframe,
        start_ts_ms: TimestampMs,
        open: f64,
        high: f64,
        low: f64,
        close: f64,
        volume: f64,
    ) -> Result<Self> {
        let symbol = symbol.into();
        let end_ts_ms = window_end_checked(&symbol, timeframe, start_ts_ms)?;
        let bar = Self {
            symbol,
            timeframe,
            start_ts_ms,
            end_ts_ms,
            open,
            high,
            low,
            close,
            volume,
            vwap: None,
            trade_count: 0,
        };
        bar.validate()?;
        Ok(bar)
    }

    fn validate(&self) -> Result<()> {
        if self.start_ts_ms >= self.end_ts_ms {
            return Err(Error::validation(format!(
                "bar start {} must be before end {}",
                self.start_ts_ms, self.end_ts_ms
            )));
        }
        for (name, px) in [
            ("open", self.open),
            ("high", self.high),
            ("low", self.low),
            ("close", self.close),
        ] {
            if !px.is_finite() || px <= 0.0 {
                return Err(Error::validation(format!("bar {name} must be > 0, got {px}")));
            }
        }
        if self.low > self.open.min(self.close) || self.high < self.open.max(self.close) {
            return Err(Error::validation(format!(
                "bar range [{}, {}] does not contain open {} / close {}",
                self.low, self.high, self.open, self.close
            )));
        }
        if !self.volume.is_finite() || self.volume < 0.0 {
            return Err(Error::validation(format!(
                "bar volume must be >= 0, got {}",
                self.volume
            )));
        }
        if let Some(vwap) = self.vwap {
            if !vwap.is_finite() || vwap <= 0.0 {
                return Err(Error::validation(format!("bar vwap must be > 0, got {vwap}")));
            }
        }
        Ok(())
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    #[inline]
    pub fn timeframe(&self) -> Timeframe {
        self.timeframe
    }

    #[inline]
    pub fn start_ts_ms(&self) -> TimestampMs {
        self.start_ts_ms
    }

    /// Exclusive window end.
    #[inline]
    pub fn end_ts_ms(&self) -> TimestampMs {
        self.end_ts_ms
    }

    #[inline]
    pub fn open(&self) -> f64 {
        self.open
    }

    #[inline]
    pub fn high(&self) -> f64 {
        self.high
    }

    #[inline]
    pub fn low(&self) -> f64 {
        self.low
    }

    #[inline]
    pub fn close(&self) -> f64 {
        self.close
    }

    #[inline]
    pub fn volume(&self) -> f64 {
        self.volume
    }

    /// Volume-weighted average price, absent when the bar has no volume.
    #[inline]
    pub fn vwap(&self) -> Option<f64> {
        self.vwap
    }

    /// Number of ticks folded into this bar.
    #[inline]
    pub fn trade_count(&self) -> u32 {
        self.trade_count
    }
}

/// Mutable accumulator for the bar currently being built.
#[derive(Debug, Clone)]
pub struct BarBuffer {
    symbol: String,
    timeframe: Timeframe,
    start_ts_ms: TimestampMs,
    end_ts_ms: TimestampMs,
    open: Option<f64>,
    high: f64,
    low: f64,
    close: f64,
    volume: f64,
    pv_sum: f64,
    tick_count: u32,
}

impl BarBuffer {
    /// Open an empty buffer for the window containing `ts_ms`. Fails if the
    /// window end does not fit in a timestamp.
    pub fn new(
        symbol: impl Into<String>,
        timeframe: Timeframe,
        ts_ms: TimestampMs,
    ) -> Result<Self> {
        let symbol = symbol.into();
        let start_ts_ms = timeframe.window_start(ts_ms);
        let end_ts_ms = window_end_checked(&symbol, timeframe, start_ts_ms)?;
        Ok(Self {
            symbol,
            timeframe,
            start_ts_ms,
            end_ts_ms,
            open: None,
            high: f64::NEG_INFINITY,
            low: f64::INFINITY,
            close: 0.0,
            volume: 0.0,
            pv_sum: 0.0,
            tick_count: 0,
        })
    }

    /// Fold one tick into the buffer. The first tick sets the open, every tick
    /// moves the close.
    pub fn update(&mut self, tick: &Tick) {
        let price = tick.price();
        if self.open.is_none() {
            self.open = Some(price);
        }
        self.high = self.high.max(price);
        self.low = self.low.min(price);
        self.close = price;
        self.volume += tick.volume();
        self.pv_sum += price * tick.volume();
        self.tick_count += 1;
    }

    /// Whether `ts_ms` falls before this buffer's exclusive end.
    #[inline]
    pub fn accepts(&self, ts_ms: TimestampMs) -> bool {
        ts_ms < self.end_ts_ms
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    #[inline]
    pub fn start_ts_ms(&self) -> TimestampMs {
        self.start_ts_ms
    }

    #[inline]
    pub fn end_ts_ms(&self) -> TimestampMs {
        self.end_ts_ms
    }

    #[inline]
    pub fn tick_count(&self) -> u32 {
        self.tick_count
    }

    #[inline]
    pub fn volume(&self) -> f64 {
        self.volume
    }

    pub fn vwap(&self) -> Option<f64> {
        if self.volume > 0.0 {
            Some(self.pv_sum / self.volume)
        } else {
            None
        }
    }

    /// Snapshot the buffer as an immutable bar. Fails on an empty buffer.
    pub fn to_bar(&self) -> Result<Bar> {
        let open = self.open.ok_or_else(|| {
            Error::validation(format!(
                "cannot build bar for {} at {} from an empty buffer",
                self.symbol, self.start_ts_ms
            ))
        })?;

        let bar = Bar {
            symbol: self.symbol.clone(),
            timeframe: self.timeframe,
            start_ts_ms: self.start_ts_ms,
            end_ts_ms: self.end_ts_ms,
            open,
            high: self.high,
            low: self.low,
            close: self.close,
            volume: self.volume,
            vwap: self.vwap(),
            trade_count: self.tick_count,
        };
        bar.validate()?;
        Ok(bar)
    }
}

/// Severity attached to a quality event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Info,
    Warn,
    Block,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "INFO",
            Severity::Warn => "WARN",
            Severity::Block => "BLOCK",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a quality event is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QualityKind {
    Gap,
    Spike,
    NonMonotonicTick,
    NonMonotonicBar,
    MissingBar,
    StaleData,
}

impl QualityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            QualityKind::Gap => "GAP",
            QualityKind::Spike => "SPIKE",
            QualityKind::NonMonotonicTick => "NON_MONOTONIC_TICK",
            QualityKind::NonMonotonicBar => "NON_MONOTONIC_BAR",
            QualityKind::MissingBar => "MISSING_BAR",
            QualityKind::StaleData => "STALE_DATA",
        }
    }
}

impl fmt::Display for QualityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A data quality finding, handed to alerting/governance consumers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityEvent {
    pub kind: QualityKind,
    pub severity: Severity,
    pub ts_ms: TimestampMs,
    pub symbol: String,
    #[serde(default)]
    pub details: BTreeMap<String, serde_json::Value>,
}

impl QualityEvent {
    /// Create an event with no details.
    pub fn new(
        kind: QualityKind,
        severity: Severity,
        ts_ms: TimestampMs,
        symbol: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            severity,
            ts_ms,
            symbol: symbol.into(),
            details: BTreeMap::new(),
        }
    }

    /// Attach a detail entry.
    pub fn with_detail(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.details.insert(key.to_string(), value.into());
        self
    }

    /// Look up a detail entry.
    pub fn detail(&self, key: &str) -> Option<&serde_json::Value> {
        self.details.get(key)
    }
}

/// Feed connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    /// Reconnection exhausted. No automatic recovery.
    Failed,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "DISCONNECTED",
            ConnectionState::Connecting => "CONNECTING",
            ConnectionState::Connected => "CONNECTED",
            ConnectionState::Reconnecting => "RECONNECTING",
            ConnectionState::Failed => "FAILED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ConnectionState::Failed)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn tf(label: &str) -> Timeframe {
        Timeframe::parse(label).unwrap()
    }

    #[test]
    fn test_tf_to_ms() {
        assert_eq!(tf_to_ms("1m").unwrap(), 60_000);
        assert_eq!(tf_to_ms("5m").unwrap(), 300_000);
        assert_eq!(tf_to_ms("1h").unwrap(), 3_600_000);
        assert_eq!(tf_to_ms("30s").unwrap(), 30_000);
        assert_eq!(tf_to_ms("1d").unwrap(), 86_400_000);
    }

    #[test]
    fn test_tf_rejects_bad_labels() {
        for label in ["", "5x", "abc", "m", "0m", "-1m", "1.5m", " 1m", "+1m"] {
            let err = tf_to_ms(label).unwrap_err();
            assert!(matches!(err, Error::Config(_)), "{label:?} -> {err:?}");
        }
    }

    #[test]
    fn test_timeframe_display_roundtrips_label() {
        assert_eq!(tf("15m").to_string(), "15m");
        let json = serde_json::to_string(&tf("4h")).unwrap();
        assert_eq!(json, "\"4h\"");
        let back: Timeframe = serde_json::from_str(&json).unwrap();
        assert_eq!(back, tf("4h"));
        assert!(serde_json::from_str::<Timeframe>("\"7w\"").is_err());
    }

    #[test]
    fn test_window_assignment() {
        let one_min = tf("1m");
        // 2024-01-01 00:01:30.500 -> 2024-01-01 00:01:00.000
        assert_eq!(one_min.window_start(1704067290500), 1704067260000);
        assert_eq!(one_min.window_end(1704067290500), Some(1704067320000));
        assert_eq!(one_min.window_end(i64::MAX), None);
        assert_eq!(one_min.window_start(60_000), 60_000);
        assert_eq!(one_min.window_start(59_999), 0);
    }

    #[test]
    fn test_tick_invariants() {
        assert!(Tick::new(1, 100.0, 1.0, "XBT/USD", "kraken").is_ok());
        assert!(Tick::new(0, 100.0, 1.0, "XBT/USD", "kraken").is_ok());
        assert!(Tick::new(-1, 100.0, 1.0, "XBT/USD", "kraken").is_err());
        assert!(Tick::new(1, 0.0, 1.0, "XBT/USD", "kraken").is_err());
        assert!(Tick::new(1, 100.0, -1.0, "XBT/USD", "kraken").is_err());
        assert!(Tick::new(1, f64::NAN, 1.0, "XBT/USD", "kraken").is_err());
        assert!(Tick::new(1, 100.0, 1.0, "", "kraken").is_err());
        assert!(Tick::new(MAX_TIMESTAMP_MS, 100.0, 1.0, "XBT/USD", "kraken").is_ok());
        assert!(Tick::new(MAX_TIMESTAMP_MS + 1, 100.0, 1.0, "XBT/USD", "kraken").is_err());
        assert!(Tick::new(i64::MAX, 100.0, 1.0, "XBT/USD", "kraken").is_err());
    }

    #[test]
    fn test_window_end_overflow_is_validation_error() {
        let near_max = i64::MAX - 1_000;
        let err = BarBuffer::new("XBT/USD", tf("1m"), near_max).unwrap_err();
        assert!(matches!(err, Error::Validation(_)), "{err:?}");

        let start = tf("1m").window_start(near_max);
        let err = Bar::new("XBT/USD", tf("1m"), start, 100.0, 100.0, 100.0, 100.0, 1.0)
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)), "{err:?}");

        // the last accepted tick still gets a bar
        assert!(BarBuffer::new("XBT/USD", tf("1d"), MAX_TIMESTAMP_MS).is_ok());
    }

    #[test]
    fn test_bar_invariants() {
        let ok = Bar::new("XBT/USD", tf("1m"), 0, 100.0, 110.0, 90.0, 105.0, 0.0);
        assert!(ok.is_ok());
        assert_eq!(ok.unwrap().end_ts_ms(), 60_000);

        assert!(Bar::new("XBT/USD", tf("1m"), 0, 0.0, 110.0, 90.0, 105.0, 1.0).is_err());
        assert!(Bar::new("XBT/USD", tf("1m"), 0, 100.0, 110.0, 90.0, 105.0, -1.0).is_err());
        // high below close
        assert!(Bar::new("XBT/USD", tf("1m"), 0, 100.0, 101.0, 90.0, 105.0, 1.0).is_err());
    }

    #[test]
    fn test_buffer_to_bar() {
        let mut buffer = BarBuffer::new("XBT/USD", tf("1m"), 10_000).unwrap();
        assert_eq!(buffer.start_ts_ms(), 0);
        assert!(buffer.to_bar().is_err());

        buffer.update(&Tick::new(10_000, 50000.0, 100.0, "XBT/USD", "test").unwrap());
        buffer.update(&Tick::new(20_000, 50010.0, 200.0, "XBT/USD", "test").unwrap());
        let bar = buffer.to_bar().unwrap();

        assert_eq!(bar.trade_count(), 2);
        assert_relative_eq!(bar.open(), 50000.0);
        assert_relative_eq!(bar.close(), 50010.0);
        assert_relative_eq!(bar.volume(), 300.0);
        let expected_vwap = (100.0 * 50000.0 + 200.0 * 50010.0) / 300.0;
        assert_relative_eq!(bar.vwap().unwrap(), expected_vwap, epsilon = 1e-6);
        assert!(buffer.accepts(59_999));
        assert!(!buffer.accepts(60_000));
    }

    #[test]
    fn test_severity_ordering_and_serde() {
        assert!(Severity::Block > Severity::Warn);
        assert!(Severity::Warn > Severity::Info);
        assert_eq!(serde_json::to_string(&Severity::Block).unwrap(), "\"BLOCK\"");
        assert_eq!(
            serde_json::to_string(&QualityKind::NonMonotonicTick).unwrap(),
            "\"NON_MONOTONIC_TICK\""
        );
        assert_eq!(ConnectionState::Reconnecting.to_string(), "RECONNECTING");
        assert!(ConnectionState::Failed.is_terminal());
    }

    #[test]
    fn test_quality_event_details() {
        let event = QualityEvent::new(QualityKind::Gap, Severity::Warn, 0, "XBT/USD")
            .with_detail("missing_bars", 2);
        assert_eq!(event.detail("missing_bars").and_then(|v| v.as_i64()), Some(2));
    }
}
