//! Data quality checks for the shadow feed system.
//!
//! This crate handles:
//! - Batch monitoring of finalized bars (gaps, price spikes, volume spikes)
//! - Streaming checks on live ticks and bars (ordering, missing bars, staleness)
//!
//! Findings are returned as [`shadow_core::QualityEvent`] values, never as errors.

pub mod checker;
pub mod monitor;

pub use checker::{QualityChecker, MISSING_BAR_BLOCK_THRESHOLD};
pub use monitor::{QualityMonitor, PRICE_SPIKE, VOLUME_SPIKE};
