//! Reconnection policy.
//!
//! Exponential backoff without jitter: attempt `n` (starting at 1) waits
//! `backoff_base^n` seconds. Attempts are bounded; once they run out the
//! caller gives up for good.

use shadow_core::FeedConfig;
use std::time::Duration;

/// Bounded exponential backoff.
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    max_attempts: u32,
    backoff_base: f64,
    attempt_count: u32,
}

impl ReconnectPolicy {
    /// Create a policy. `max_attempts == 0` means never retry.
    pub fn new(max_attempts: u32, backoff_base: f64) -> Self {
        Self {
            max_attempts,
            backoff_base,
            attempt_count: 0,
        }
    }

    pub fn from_config(config: &FeedConfig) -> Self {
        Self::new(config.reconnect_max_attempts, config.reconnect_backoff_base)
    }

    /// Delay before the next attempt, or `None` once attempts are exhausted.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if !self.should_retry() {
            return None;
        }
        self.attempt_count += 1;
        Some(self.delay_for(self.attempt_count))
    }

    /// Backoff for a given 1-based attempt.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let secs = self.backoff_base.powi(exponent);
        Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX)
    }

    /// Reset after a successful connection.
    pub fn reset(&mut self) {
        self.attempt_count = 0;
    }

    pub fn attempt_count(&self) -> u32 {
        self.attempt_count
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn should_retry(&self) -> bool {
        self.attempt_count < self.max_attempts
    }
}
