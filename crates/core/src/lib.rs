//! Core types and configuration for the shadow feed system.
//!
//! This crate provides shared types used across all other crates:
//! - Market data types (ticks, bars, bar buffers, timeframes)
//! - Quality events and connection states
//! - Configuration structures
//! - Common error types
//! - Fail-closed startup guards

pub mod clock;
pub mod config;
pub mod error;
pub mod guard;
pub mod logging;
pub mod types;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{Config, FeedConfig, LiveConfig, PipelineConfig, QualityConfig, ShadowConfig};
pub use error::{Error, Result, SafetyViolation};
pub use guard::{
    assert_not_live_mode, assert_pipeline_enabled, assert_startup_allowed, EnvSource, ProcessEnv,
    LIVE_MODE_ENV_VAR,
};
pub use types::*;
