//! Tracing subscriber setup for process entry points.

use crate::error::{Error, Result};
use tracing_subscriber::EnvFilter;

/// Install a global `fmt` subscriber. `RUST_LOG` overrides `default_directive`.
///
/// Fails if the directive does not parse or a subscriber is already installed.
pub fn init_tracing(default_directive: &str) -> Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(default_directive)
            .map_err(|e| Error::config(format!("invalid log directive {default_directive:?}: {e}")))?,
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init()
        .map_err(|e| Error::config(format!("tracing already initialised: {e}")))
}
