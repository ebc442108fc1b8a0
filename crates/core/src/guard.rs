//! Fail-closed startup guards.
//!
//! The process entry point calls these before constructing any pipeline
//! component. Nothing here runs implicitly.

use crate::config::Config;
use crate::error::{Result, SafetyViolation};
use std::collections::HashMap;

/// Environment variable that requests live trading. Any truthy value is
/// refused.
pub const LIVE_MODE_ENV_VAR: &str = "LIVE_TRADING";

/// Read access to environment variables.
pub trait EnvSource {
    fn var(&self, key: &str) -> Option<String>;
}

/// The real process environment.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessEnv;

impl EnvSource for ProcessEnv {
    fn var(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }
}

impl EnvSource for HashMap<String, String> {
    fn var(&self, key: &str) -> Option<String> {
        self.get(key).cloned()
    }
}

/// `"1"`, `"true"` or `"yes"`, case-insensitive, surrounding whitespace ignored.
pub fn is_truthy(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes"
    )
}

/// Refuse to run if the live-mode environment variable is truthy.
pub fn check_env_not_live(env: &impl EnvSource) -> Result<()> {
    match env.var(LIVE_MODE_ENV_VAR) {
        Some(value) if is_truthy(&value) => {
            tracing::error!(var = LIVE_MODE_ENV_VAR, %value, "live mode requested via environment");
            Err(SafetyViolation::LiveModeEnv {
                var: LIVE_MODE_ENV_VAR.to_string(),
                value,
            }
            .into())
        }
        _ => Ok(()),
    }
}

/// Refuse to run if `live.enabled` is set.
pub fn check_config_not_live(config: &Config) -> Result<()> {
    if config.live.enabled {
        tracing::error!("live mode requested via live.enabled");
        return Err(SafetyViolation::LiveModeConfig.into());
    }
    Ok(())
}

/// Both live-mode checks. The environment is checked first.
pub fn assert_not_live_mode(env: &impl EnvSource, config: &Config) -> Result<()> {
    check_env_not_live(env)?;
    check_config_not_live(config)
}

/// Refuse to run unless `shadow.pipeline.enabled` is set.
pub fn assert_pipeline_enabled(config: &Config) -> Result<()> {
    if !config.shadow.pipeline.enabled {
        tracing::warn!("shadow pipeline disabled");
        return Err(SafetyViolation::PipelineDisabled.into());
    }
    Ok(())
}

/// Every startup guard, in order: live mode (env, then config), then the
/// pipeline switch.
pub fn assert_startup_allowed(env: &impl EnvSource, config: &Config) -> Result<()> {
    assert_not_live_mode(env, config)?;
    assert_pipeline_enabled(config)
}
