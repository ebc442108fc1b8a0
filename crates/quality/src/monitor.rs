//! Batch quality monitor over finalized bars.
//!
//! Input is one symbol's bar sequence for one timeframe. Bars are re-sorted by
//! start before any check runs.

use shadow_core::{Bar, QualityConfig, QualityEvent, QualityKind, Result};
use statrs::statistics::{Data, Median};

/// `details["type"]` of a close-to-close price spike.
pub const PRICE_SPIKE: &str = "price_spike";
/// `details["type"]` of a single-bar volume spike.
pub const VOLUME_SPIKE: &str = "volume_spike";

/// Minimum bar count for the volume median to mean anything.
const MIN_BARS_FOR_VOLUME: usize = 3;

/// Gap and spike detector for finalized bars.
#[derive(Debug, Clone)]
pub struct QualityMonitor {
    config: QualityConfig,
}

impl QualityMonitor {
    /// Create a monitor. Fails if the thresholds are invalid.
    pub fn new(config: QualityConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &QualityConfig {
        &self.config
    }

    /// Run every check: gaps, then price spikes, then volume spikes.
    pub fn check(&self, bars: &[Bar]) -> Vec<QualityEvent> {
        let sorted = sorted_by_start(bars);
        let mut events = self.gaps(&sorted);
        events.extend(self.price_spikes(&sorted));
        events.extend(self.volume_spikes(&sorted));
        events
    }

    /// GAP events where the next bar does not start one timeframe after the
    /// current one.
    pub fn detect_gaps(&self, bars: &[Bar]) -> Vec<QualityEvent> {
        self.gaps(&sorted_by_start(bars))
    }

    /// SPIKE events for close-to-close log returns beyond the threshold.
    pub fn detect_price_spikes(&self, bars: &[Bar]) -> Vec<QualityEvent> {
        self.price_spikes(&sorted_by_start(bars))
    }

    /// SPIKE events for bars whose volume exceeds the median by the spike
    /// factor.
    pub fn detect_volume_spikes(&self, bars: &[Bar]) -> Vec<QualityEvent> {
        self.volume_spikes(&sorted_by_start(bars))
    }

    fn gaps(&self, bars: &[&Bar]) -> Vec<QualityEvent> {
        bars.windows(2)
            .filter_map(|pair| {
                let (current, next) = (pair[0], pair[1]);
                let tf_ms = current.timeframe().as_ms();
                let expected = current.start_ts_ms() + tf_ms;
                let actual = next.start_ts_ms();
                if actual == expected {
                    return None;
                }

                let missing_bars = (actual - expected) / tf_ms;
                Some(
                    QualityEvent::new(
                        QualityKind::Gap,
                        self.config.gap_severity,
                        current.start_ts_ms(),
                        current.symbol(),
                    )
                    .with_detail("expected_ts_ms", expected)
                    .with_detail("actual_ts_ms", actual)
                    .with_detail("missing_bars", missing_bars)
                    .with_detail("timeframe", current.timeframe().to_string()),
                )
            })
            .collect()
    }

    fn price_spikes(&self, bars: &[&Bar]) -> Vec<QualityEvent> {
        let threshold = self.config.max_abs_log_return;
        bars.windows(2)
            .filter_map(|pair| {
                let (prev, bar) = (pair[0], pair[1]);
                let log_return = (bar.close() / prev.close()).ln();
                if log_return.abs() <= threshold {
                    return None;
                }

                Some(
                    QualityEvent::new(
                        QualityKind::Spike,
                        self.config.spike_severity,
                        bar.start_ts_ms(),
                        bar.symbol(),
                    )
                    .with_detail("type", PRICE_SPIKE)
                    .with_detail("log_return", log_return)
                    .with_detail("threshold", threshold)
                    .with_detail("prev_close", prev.close())
                    .with_detail("close", bar.close()),
                )
            })
            .collect()
    }

    fn volume_spikes(&self, bars: &[&Bar]) -> Vec<QualityEvent> {
        if bars.len() < MIN_BARS_FOR_VOLUME {
            return Vec::new();
        }

        let volumes: Vec<f64> = bars.iter().map(|b| b.volume()).collect();
        let median_volume = Data::new(volumes).median();
        // all-zero (or mostly zero) volume: nothing to compare against
        if median_volume <= 0.0 {
            return Vec::new();
        }

        let factor = self.config.volume_spike_factor;
        let limit = median_volume * factor;
        bars.iter()
            .filter(|bar| bar.volume() > limit)
            .map(|bar| {
                QualityEvent::new(
                    QualityKind::Spike,
                    self.config.spike_severity,
                    bar.start_ts_ms(),
                    bar.symbol(),
                )
                .with_detail("type", VOLUME_SPIKE)
                .with_detail("volume", bar.volume())
                .with_detail("median_volume", median_volume)
                .with_detail("factor", factor)
                .with_detail("ratio", bar.volume() / median_volume)
            })
            .collect()
    }
}

fn sorted_by_start(bars: &[Bar]) -> Vec<&Bar> {
    let mut sorted: Vec<&Bar> = bars.iter().collect();
    sorted.sort_by_key(|b| b.start_ts_ms());
    sorted
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use shadow_core::{Severity, Timeframe};

    const MIN: i64 = 60_000;

    fn bar(start: i64, close: f64, volume: f64) -> Bar {
        let tf = Timeframe::parse("1m").unwrap();
        Bar::new("XBT/USD", tf, start, close, close, close, close, volume).unwrap()
    }

    fn monitor() -> QualityMonitor {
        QualityMonitor::new(QualityConfig::default()).unwrap()
    }

    fn monitor_with(max_abs_log_return: f64) -> QualityMonitor {
        QualityMonitor::new(QualityConfig {
            max_abs_log_return,
            ..QualityConfig::default()
        })
        .unwrap()
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = QualityConfig {
            volume_spike_factor: -1.0,
            ..QualityConfig::default()
        };
        assert!(QualityMonitor::new(config).is_err());
    }

    #[test]
    fn test_contiguous_bars_no_gap() {
        let bars: Vec<Bar> = (0..5).map(|i| bar(i * MIN, 100.0, 1.0)).collect();
        assert!(monitor().detect_gaps(&bars).is_empty());
    }

    #[test]
    fn test_single_missing_bar() {
        let bars = vec![bar(0, 100.0, 1.0), bar(2 * MIN, 100.0, 1.0)];

        let gaps = monitor().detect_gaps(&bars);

        assert_eq!(gaps.len(), 1);
        assert_eq!(gaps[0].kind, QualityKind::Gap);
        assert_eq!(gaps[0].severity, Severity::Warn);
        assert_eq!(gaps[0].ts_ms, 0);
        assert_eq!(gaps[0].detail("missing_bars").and_then(|v| v.as_i64()), Some(1));
    }

    #[test]
    fn test_gap_detection_resorts_input() {
        let bars = vec![bar(5 * MIN, 100.0, 1.0), bar(0, 100.0, 1.0), bar(MIN, 100.0, 1.0)];

        let gaps = monitor().detect_gaps(&bars);

        assert_eq!(gaps.len(), 1);
        assert_eq!(gaps[0].ts_ms, MIN);
        assert_eq!(gaps[0].detail("missing_bars").and_then(|v| v.as_i64()), Some(3));
    }

    #[test]
    fn test_gap_severity_from_config() {
        let monitor = QualityMonitor::new(QualityConfig {
            gap_severity: Severity::Block,
            ..QualityConfig::default()
        })
        .unwrap();
        let gaps = monitor.detect_gaps(&[bar(0, 100.0, 1.0), bar(3 * MIN, 100.0, 1.0)]);
        assert_eq!(gaps[0].severity, Severity::Block);
    }

    #[test]
    fn test_price_spike_threshold() {
        let bars = vec![bar(0, 50000.0, 1.0), bar(MIN, 60000.0, 1.0)];

        let spikes = monitor_with(0.10).detect_price_spikes(&bars);
        assert_eq!(spikes.len(), 1);
        assert_eq!(spikes[0].ts_ms, MIN);
        assert_eq!(spikes[0].detail("type").and_then(|v| v.as_str()), Some(PRICE_SPIKE));
        let log_return = spikes[0].detail("log_return").and_then(|v| v.as_f64()).unwrap();
        assert_relative_eq!(log_return, 0.1823, epsilon = 1e-4);

        assert!(monitor_with(0.20).detect_price_spikes(&bars).is_empty());
    }

    #[test]
    fn test_price_drop_is_spike_too() {
        let bars = vec![bar(0, 60000.0, 1.0), bar(MIN, 50000.0, 1.0)];
        assert_eq!(monitor_with(0.10).detect_price_spikes(&bars).len(), 1);
    }

    #[test]
    fn test_volume_spike() {
        let bars = vec![bar(0, 100.0, 1.0), bar(MIN, 100.0, 1.0), bar(2 * MIN, 100.0, 20.0)];

        let spikes = monitor().detect_volume_spikes(&bars);

        assert_eq!(spikes.len(), 1);
        assert_eq!(spikes[0].ts_ms, 2 * MIN);
        assert_eq!(spikes[0].detail("type").and_then(|v| v.as_str()), Some(VOLUME_SPIKE));
        assert_relative_eq!(
            spikes[0].detail("median_volume").and_then(|v| v.as_f64()).unwrap(),
            1.0
        );
    }

    #[test]
    fn test_volume_spike_needs_three_bars() {
        let bars = vec![bar(0, 100.0, 1.0), bar(MIN, 100.0, 50.0)];
        assert!(monitor().detect_volume_spikes(&bars).is_empty());
    }

    #[test]
    fn test_zero_median_volume_skipped() {
        let bars = vec![bar(0, 100.0, 0.0), bar(MIN, 100.0, 0.0), bar(2 * MIN, 100.0, 5.0)];
        assert!(monitor().detect_volume_spikes(&bars).is_empty());
    }

    #[test]
    fn test_check_combines_detectors() {
        let bars = vec![
            bar(0, 100.0, 1.0),
            bar(MIN, 100.0, 1.0),
            bar(3 * MIN, 150.0, 1.0),
            bar(4 * MIN, 150.0, 30.0),
        ];

        let events = monitor().check(&bars);

        let kinds: Vec<(QualityKind, Option<&str>)> = events
            .iter()
            .map(|e| (e.kind, e.detail("type").and_then(|v| v.as_str())))
            .collect();
        assert_eq!(
            kinds,
            vec![
                (QualityKind::Gap, None),
                (QualityKind::Spike, Some(PRICE_SPIKE)),
                (QualityKind::Spike, Some(VOLUME_SPIKE)),
            ]
        );
    }

    #[test]
    fn test_empty_input() {
        assert!(monitor().check(&[]).is_empty());
    }
}
