//! Exchange feed client for the shadow feed system.
//!
//! This crate provides:
//! - The live feed client and its connection state machine
//! - Exponential reconnect backoff
//! - Metrics and backfill sinks for external collaborators

pub mod backfill;
pub mod client;
pub mod metrics;
pub mod reconnect;

pub use backfill::{BackfillRequest, BackfillSink, NoopBackfill};
pub use client::{Connector, DisconnectHandle, FeedStats, LiveFeedClient};
pub use metrics::{InMemoryMetrics, Labels, MetricsSink, MetricsSnapshot, NoopMetrics};
pub use reconnect::ReconnectPolicy;
