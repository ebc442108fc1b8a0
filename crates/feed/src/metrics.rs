//! Feed metrics.
//!
//! The client only produces metrics; storage and export belong to whoever
//! implements [`MetricsSink`]. [`InMemoryMetrics`] keeps raw series for tests
//! and replay runs.

use parking_lot::Mutex;
use serde::Serialize;
use statrs::statistics::{Data, OrderStatistics, Statistics};
use std::collections::BTreeMap;

/// Counter: orders placed by the paper-trading layer.
pub const ORDERS_TOTAL: &str = "orders_total";
/// Counter: connection and processing errors.
pub const ERRORS_TOTAL: &str = "errors_total";
/// Counter: successful reconnects.
pub const RECONNECTS_TOTAL: &str = "reconnects_total";
/// Histogram: tick arrival latency (ms).
pub const LATENCY_MS: &str = "latency_ms";

/// String-keyed metric labels.
pub type Labels = BTreeMap<String, String>;

/// Build labels from key/value pairs.
pub fn labels(pairs: &[(&str, &str)]) -> Labels {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

/// Destination for counters and histogram observations.
pub trait MetricsSink: Send + Sync {
    fn inc_counter(&self, name: &str, labels: &Labels, value: u64);
    fn observe(&self, name: &str, labels: &Labels, value: f64);
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetrics;

impl MetricsSink for NoopMetrics {
    fn inc_counter(&self, _name: &str, _labels: &Labels, _value: u64) {}

    fn observe(&self, _name: &str, _labels: &Labels, _value: f64) {}
}

type SeriesKey = (String, Labels);

#[derive(Debug, Default)]
struct MetricsStore {
    counters: BTreeMap<SeriesKey, u64>,
    histograms: BTreeMap<SeriesKey, Vec<f64>>,
}

/// In-process metrics store.
#[derive(Debug, Default)]
pub struct InMemoryMetrics {
    store: Mutex<MetricsStore>,
}

impl InMemoryMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sum of a counter across all label sets.
    pub fn counter_total(&self, name: &str) -> u64 {
        self.store
            .lock()
            .counters
            .iter()
            .filter(|((n, _), _)| n == name)
            .map(|(_, v)| *v)
            .sum()
    }

    /// Every observation of a histogram across all label sets.
    pub fn histogram_values(&self, name: &str) -> Vec<f64> {
        self.store
            .lock()
            .histograms
            .iter()
            .filter(|((n, _), _)| n == name)
            .flat_map(|(_, values)| values.iter().copied())
            .collect()
    }

    /// Raw series plus derived rate and percentile fields.
    pub fn snapshot(&self) -> MetricsSnapshot {
        let (counters, histograms) = {
            let store = self.store.lock();
            let counters = store
                .counters
                .iter()
                .map(|((name, labels), value)| CounterSeries {
                    name: name.clone(),
                    labels: labels.clone(),
                    value: *value,
                })
                .collect::<Vec<_>>();
            let histograms = store
                .histograms
                .iter()
                .map(|((name, labels), values)| HistogramSeries {
                    name: name.clone(),
                    labels: labels.clone(),
                    count: values.len(),
                    sum: values.iter().sum(),
                    values: values.clone(),
                })
                .collect::<Vec<_>>();
            (counters, histograms)
        };

        let orders_total = self.counter_total(ORDERS_TOTAL);
        let errors_total = self.counter_total(ERRORS_TOTAL);
        let latencies = self.histogram_values(LATENCY_MS);

        let derived = DerivedMetrics {
            orders_total,
            errors_total,
            reconnects_total: self.counter_total(RECONNECTS_TOTAL),
            error_rate: if orders_total > 0 {
                errors_total as f64 / orders_total as f64
            } else {
                0.0
            },
            latency_count: latencies.len(),
            latency_mean_ms: (!latencies.is_empty()).then(|| latencies.iter().mean()),
            latency_p50_ms: percentile(&latencies, 50),
            latency_p95_ms: percentile(&latencies, 95),
            latency_p99_ms: percentile(&latencies, 99),
        };

        MetricsSnapshot {
            counters,
            histograms,
            derived,
        }
    }

    /// Drop every series.
    pub fn reset(&self) {
        let mut store = self.store.lock();
        store.counters.clear();
        store.histograms.clear();
    }
}

impl MetricsSink for InMemoryMetrics {
    fn inc_counter(&self, name: &str, labels: &Labels, value: u64) {
        *self
            .store
            .lock()
            .counters
            .entry((name.to_string(), labels.clone()))
            .or_insert(0) += value;
    }

    fn observe(&self, name: &str, labels: &Labels, value: f64) {
        self.store
            .lock()
            .histograms
            .entry((name.to_string(), labels.clone()))
            .or_default()
            .push(value);
    }
}

fn percentile(values: &[f64], p: usize) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut data = Data::new(values.to_vec());
    Some(data.percentile(p))
}

/// Point-in-time view of all metrics.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub counters: Vec<CounterSeries>,
    pub histograms: Vec<HistogramSeries>,
    pub derived: DerivedMetrics,
}

#[derive(Debug, Clone, Serialize)]
pub struct CounterSeries {
    pub name: String,
    pub labels: Labels,
    pub value: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct HistogramSeries {
    pub name: String,
    pub labels: Labels,
    pub count: usize,
    pub sum: f64,
    pub values: Vec<f64>,
}

/// Aggregates computed over all label sets.
#[derive(Debug, Clone, Serialize)]
pub struct DerivedMetrics {
    pub orders_total: u64,
    pub errors_total: u64,
    pub reconnects_total: u64,
    /// errors_total / orders_total, 0 with no orders.
    pub error_rate: f64,
    pub latency_count: usize,
    pub latency_mean_ms: Option<f64>,
    pub latency_p50_ms: Option<f64>,
    pub latency_p95_ms: Option<f64>,
    pub latency_p99_ms: Option<f64>,
}
