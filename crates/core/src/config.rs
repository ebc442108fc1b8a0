//! Configuration structures for the shadow feed system.
//!
//! Every section has documented defaults, so a partial JSON document is enough.
//! Configs are parsed and validated once at startup; components receive the
//! typed section they need.

use crate::error::{Error, Result};
use crate::types::{Severity, Timeframe};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Main configuration for the shadow feed system.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Shadow (paper trading) pipeline configuration.
    pub shadow: ShadowConfig,
    /// Live trading switch. Must stay off for this system to run.
    pub live: LiveConfig,
    /// Exchange feed configuration.
    pub feed: FeedConfig,
}

impl Config {
    /// Parse and validate a JSON configuration document.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Config = serde_json::from_str(json)
            .map_err(|e| Error::config(format!("invalid configuration: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a JSON configuration file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    /// Validate every section.
    pub fn validate(&self) -> Result<()> {
        self.shadow.quality.validate()?;
        self.feed.validate()
    }
}

/// Shadow pipeline configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ShadowConfig {
    /// Data quality thresholds.
    pub quality: QualityConfig,
    /// Pipeline on/off switch.
    pub pipeline: PipelineConfig,
}

/// Data quality thresholds shared by the batch monitor and streaming checker.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QualityConfig {
    /// Severity for GAP events.
    pub gap_severity: Severity,
    /// Severity for SPIKE events.
    pub spike_severity: Severity,
    /// Absolute close-to-close log return above which a price spike fires.
    pub max_abs_log_return: f64,
    /// Multiple of the median volume above which a volume spike fires.
    pub volume_spike_factor: f64,
    /// Silence after the last tick before STALE_DATA fires (ms).
    pub stale_threshold_ms: i64,
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            gap_severity: Severity::Warn,
            spike_severity: Severity::Warn,
            max_abs_log_return: 0.10,
            volume_spike_factor: 10.0,
            stale_threshold_ms: 10_000,
        }
    }
}

impl QualityConfig {
    pub fn validate(&self) -> Result<()> {
        if !self.max_abs_log_return.is_finite() || self.max_abs_log_return <= 0.0 {
            return Err(Error::config(format!(
                "shadow.quality.max_abs_log_return must be > 0, got {}",
                self.max_abs_log_return
            )));
        }
        if !self.volume_spike_factor.is_finite() || self.volume_spike_factor <= 0.0 {
            return Err(Error::config(format!(
                "shadow.quality.volume_spike_factor must be > 0, got {}",
                self.volume_spike_factor
            )));
        }
        if self.stale_threshold_ms <= 0 {
            return Err(Error::config(format!(
                "shadow.quality.stale_threshold_ms must be > 0, got {}",
                self.stale_threshold_ms
            )));
        }
        Ok(())
    }
}

/// Pipeline switch. Off unless explicitly enabled.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub enabled: bool,
}

/// Live trading switch.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LiveConfig {
    pub enabled: bool,
}

/// Exchange feed configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedConfig {
    /// Exchange name, also used as the tick source.
    pub exchange: String,
    /// Symbols to subscribe to (e.g., "XBT/USD").
    pub symbols: Vec<String>,
    /// Bar timeframe for the streaming aggregator.
    pub timeframe: String,
    /// Reconnect automatically after an unexpected disconnect.
    pub reconnect_enabled: bool,
    /// Maximum reconnect attempts before giving up.
    pub reconnect_max_attempts: u32,
    /// Backoff base; attempt `n` waits `base^n` seconds.
    pub reconnect_backoff_base: f64,
    /// Request a backfill after a successful reconnect.
    pub backfill_enabled: bool,
    /// Backfill window length (ms).
    pub backfill_lookback_ms: i64,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            exchange: "kraken".to_string(),
            symbols: Vec::new(),
            timeframe: "1m".to_string(),
            reconnect_enabled: true,
            reconnect_max_attempts: 5,
            reconnect_backoff_base: 2.0,
            backfill_enabled: true,
            backfill_lookback_ms: 300_000,
        }
    }
}

impl FeedConfig {
    pub fn validate(&self) -> Result<()> {
        if self.exchange.is_empty() {
            return Err(Error::config("feed.exchange must not be empty"));
        }
        self.parsed_timeframe()?;
        if !self.reconnect_backoff_base.is_finite() || self.reconnect_backoff_base < 1.0 {
            return Err(Error::config(format!(
                "feed.reconnect_backoff_base must be >= 1.0, got {}",
                self.reconnect_backoff_base
            )));
        }
        if self.backfill_lookback_ms < 0 {
            return Err(Error::config(format!(
                "feed.backfill_lookback_ms must be >= 0, got {}",
                self.backfill_lookback_ms
            )));
        }
        Ok(())
    }

    /// The configured timeframe, parsed.
    pub fn parsed_timeframe(&self) -> Result<Timeframe> {
        Timeframe::parse(&self.timeframe)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.shadow.quality.max_abs_log_return, 0.10);
        assert_eq!(config.shadow.quality.volume_spike_factor, 10.0);
        assert_eq!(config.shadow.quality.gap_severity, Severity::Warn);
        assert_eq!(config.shadow.quality.stale_threshold_ms, 10_000);
        assert!(!config.shadow.pipeline.enabled);
        assert!(!config.live.enabled);
        assert_eq!(config.feed.reconnect_max_attempts, 5);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json() {
        let config = Config::from_json_str(
            r#"{
                "shadow": {
                    "quality": { "gap_severity": "BLOCK", "max_abs_log_return": 0.2 },
                    "pipeline": { "enabled": true }
                },
                "feed": { "symbols": ["XBT/USD", "ETH/USD"], "timeframe": "5m" }
            }"#,
        )
        .unwrap();

        assert_eq!(config.shadow.quality.gap_severity, Severity::Block);
        assert_eq!(config.shadow.quality.spike_severity, Severity::Warn);
        assert_eq!(config.shadow.quality.max_abs_log_return, 0.2);
        assert!(config.shadow.pipeline.enabled);
        assert_eq!(config.feed.symbols.len(), 2);
        assert_eq!(config.feed.parsed_timeframe().unwrap().as_ms(), 300_000);
        assert_eq!(config.feed.exchange, "kraken");
    }

    #[test]
    fn test_bad_severity_is_config_error() {
        let err = Config::from_json_str(r#"{"shadow": {"quality": {"gap_severity": "LOUD"}}}"#)
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_bad_thresholds_rejected() {
        let mut quality = QualityConfig::default();
        quality.max_abs_log_return = 0.0;
        assert!(quality.validate().is_err());

        let mut quality = QualityConfig::default();
        quality.volume_spike_factor = f64::NAN;
        assert!(quality.validate().is_err());

        let err = Config::from_json_str(r#"{"feed": {"timeframe": "5x"}}"#).unwrap_err();
        assert!(matches!(err, Error::Config(_)));

        let mut feed = FeedConfig::default();
        feed.reconnect_backoff_base = 0.5;
        assert!(feed.validate().is_err());
    }
}
