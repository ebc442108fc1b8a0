//! Data ingestion and normalization for the shadow feed system.
//!
//! This crate handles:
//! - Raw trade message normalization into ticks
//! - Canonical tick ordering
//! - OHLCV bar aggregation (batch and streaming)

pub mod aggregator;
pub mod normalizer;

pub use aggregator::{BarAggregator, TickBatch};
pub use normalizer::{sort_ticks, TickNormalizer, TRADE_CHANNEL};
