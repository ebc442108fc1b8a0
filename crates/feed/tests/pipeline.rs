//! End-to-end: raw exchange messages through the live client and the batch path.

use parking_lot::Mutex;
use serde_json::{json, Value};
use shadow_core::{
    Bar, ConnectionState, FeedConfig, ManualClock, QualityConfig, QualityEvent, QualityKind,
    Result, Severity,
};
use shadow_feed::{Connector, InMemoryMetrics, LiveFeedClient};
use shadow_ingestion::{BarAggregator, TickNormalizer};
use shadow_quality::QualityMonitor;
use std::sync::Arc;

const MIN: i64 = 60_000;

struct AlwaysUp;

impl Connector for AlwaysUp {
    async fn connect(&mut self, _exchange: &str, _symbols: &[String]) -> Result<()> {
        Ok(())
    }
}

fn trade_msg(symbol: &str, trades: &[(&str, &str, f64)]) -> Value {
    let entries: Vec<Value> = trades
        .iter()
        .map(|(price, volume, time_s)| json!([price, volume, time_s.to_string(), "b", "l", ""]))
        .collect();
    json!([42, entries, "trade", symbol])
}

fn session() -> Vec<Value> {
    vec![
        json!({"event": "heartbeat"}),
        trade_msg("XBT/USD", &[("50000.0", "0.10", 1.0), ("50010.0", "0.20", 20.0)]),
        trade_msg("ETH/USD", &[("3000.0", "1.0", 5.0)]),
        trade_msg("XBT/USD", &[("49990.0", "0.15", 50.0)]),
        trade_msg("XBT/USD", &[("50020.0", "0.30", 61.0)]),
        // next XBT window after a 7-minute silence
        trade_msg("XBT/USD", &[("50100.0", "0.50", 480.0)]),
        trade_msg("ETH/USD", &[("3010.0", "2.0", 65.0)]),
    ]
}

#[tokio::test]
async fn test_live_session_end_to_end() {
    let bars: Arc<Mutex<Vec<Bar>>> = Arc::default();
    let events: Arc<Mutex<Vec<QualityEvent>>> = Arc::default();
    let (bar_sink, event_sink) = (Arc::clone(&bars), Arc::clone(&events));
    let metrics = Arc::new(InMemoryMetrics::new());

    let config = FeedConfig {
        symbols: vec!["XBT/USD".to_string(), "ETH/USD".to_string()],
        ..FeedConfig::default()
    };
    let mut client = LiveFeedClient::new(config, &QualityConfig::default(), AlwaysUp)
        .unwrap()
        .with_clock(Arc::new(ManualClock::new(600_000)))
        .with_metrics(metrics.clone())
        .on_bar(move |bar| bar_sink.lock().push(bar.clone()))
        .on_quality_event(move |event| event_sink.lock().push(event.clone()));

    assert_eq!(client.connect().await, ConnectionState::Connected);
    for message in session() {
        client.process_message(&message).unwrap();
    }
    client.flush().unwrap();

    let stats = client.stats();
    assert_eq!(stats.messages_received, 7);
    assert_eq!(stats.messages_failed, 1);
    assert_eq!(stats.ticks_emitted, 7);
    assert_eq!(metrics.snapshot().derived.latency_count, 7);

    let bars = bars.lock();
    let xbt: Vec<&Bar> = bars.iter().filter(|b| b.symbol() == "XBT/USD").collect();
    assert_eq!(
        xbt.iter().map(|b| b.start_ts_ms()).collect::<Vec<_>>(),
        vec![0, MIN, 8 * MIN]
    );
    let first = xbt[0];
    assert_eq!(first.open(), 50000.0);
    assert_eq!(first.high(), 50010.0);
    assert_eq!(first.low(), 49990.0);
    assert_eq!(first.close(), 49990.0);
    assert_eq!(first.trade_count(), 3);

    // XBT skipped windows 2..=7: six missing bars is a BLOCK
    let events = events.lock();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].kind, QualityKind::MissingBar);
    assert_eq!(events[0].severity, Severity::Block);
    assert_eq!(events[0].symbol, "XBT/USD");
    assert_eq!(events[0].detail("missing_bars").and_then(|v| v.as_i64()), Some(6));
}

#[test]
fn test_batch_replay_matches_live() {
    let normalizer = TickNormalizer::new("kraken");
    let aggregator = BarAggregator::from_label("1m").unwrap();
    let messages = session();

    let ticks = normalizer.normalize_batch(&messages);
    let batch_bars = aggregator.ingest_batch(&ticks).unwrap();

    let mut streaming = BarAggregator::from_label("1m").unwrap();
    let mut live_bars = streaming.ingest_all(&ticks).unwrap();
    live_bars.extend(streaming.flush().unwrap());
    live_bars.sort_by(|a, b| (a.start_ts_ms(), a.symbol()).cmp(&(b.start_ts_ms(), b.symbol())));

    assert_eq!(batch_bars, live_bars);

    let monitor = QualityMonitor::new(QualityConfig::default()).unwrap();
    let xbt: Vec<Bar> = batch_bars
        .iter()
        .filter(|b| b.symbol() == "XBT/USD")
        .cloned()
        .collect();
    let gaps = monitor.detect_gaps(&xbt);
    assert_eq!(gaps.len(), 1);
    assert_eq!(gaps[0].ts_ms, MIN);
    assert_eq!(gaps[0].detail("missing_bars").and_then(|v| v.as_i64()), Some(6));
}
