//! Error types for the shadow feed system.
//!
//! Quality issues are data, not errors. Only structural problems (bad config,
//! invalid records) and safety violations surface here.

use thiserror::Error;

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the shadow feed system.
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error (bad timeframe, bad thresholds, unreadable config).
    #[error("Configuration error: {0}")]
    Config(String),

    /// Record invariant violated at construction.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Transport failure while opening an exchange session.
    #[error("Connection error: {0}")]
    Connection(String),

    /// A fail-closed guard refused to let the pipeline run.
    #[error("Safety violation: {0}")]
    Safety(#[from] SafetyViolation),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// The guard that tripped. Each guard has its own kind so callers can tell
/// "live mode requested" apart from "pipeline switched off".
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SafetyViolation {
    /// The live-mode environment variable is set to a truthy value.
    #[error("live mode forbidden: environment variable {var}={value:?}")]
    LiveModeEnv { var: String, value: String },

    /// `live.enabled` is true in the configuration.
    #[error("live mode forbidden: live.enabled=true in configuration")]
    LiveModeConfig,

    /// `shadow.pipeline.enabled` is false.
    #[error("shadow pipeline disabled: shadow.pipeline.enabled=false")]
    PipelineDisabled,
}

impl Error {
    /// Create a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }

    /// Create a validation error.
    pub fn validation(msg: impl Into<String>) -> Self {
        Error::Validation(msg.into())
    }

    /// Create a connection error.
    pub fn connection(msg: impl Into<String>) -> Self {
        Error::Connection(msg.into())
    }

    /// Whether this error came from a safety guard.
    pub fn is_safety_violation(&self) -> bool {
        matches!(self, Error::Safety(_))
    }

    /// The tripped guard, if any.
    pub fn safety_violation(&self) -> Option<&SafetyViolation> {
        match self {
            Error::Safety(violation) => Some(violation),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_safety_kinds_are_distinct() {
        let forbidden: Error = SafetyViolation::LiveModeConfig.into();
        let disabled: Error = SafetyViolation::PipelineDisabled.into();

        assert!(forbidden.is_safety_violation());
        assert!(disabled.is_safety_violation());
        assert_ne!(forbidden.safety_violation(), disabled.safety_violation());
        assert!(!Error::config("bad").is_safety_violation());
    }

    #[test]
    fn test_display() {
        let err = Error::Safety(SafetyViolation::LiveModeEnv {
            var: "LIVE_TRADING".to_string(),
            value: "yes".to_string(),
        });
        assert!(err.to_string().contains("LIVE_TRADING"));
        assert_eq!(Error::config("x").to_string(), "Configuration error: x");
    }
}
