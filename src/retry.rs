//! Exponential backoff shared by RPC reconnects and relay submission retries

use crate::config::RelayerConfig;

use std::time::Duration;

#[derive(Debug, Clone, PartialEq)]
pub struct Backoff {
    /// Attempts allowed before giving up
    pub max_attempts: u32,
    pub initial: Duration,
    pub max: Duration,
    pub multiplier: f64,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial: Duration::from_secs(2),
            max: Duration::from_secs(60),
            multiplier: 2.0,
        }
    }
}

impl Backoff {
    /// Budget for relay submissions
    pub fn relay(config: &RelayerConfig) -> Self {
        Self {
            max_attempts: config.max_retries.max(1),
            initial: Duration::from_millis(config.retry_initial_backoff_ms),
            max: Duration::from_millis(config.retry_max_backoff_ms),
            ..Default::default()
        }
    }

    /// Budget for consecutive subscription failures before a chain is degraded
    pub fn reconnect(config: &RelayerConfig) -> Self {
        Self {
            max_attempts: config.max_reconnect_attempts.max(1),
            initial: Duration::from_millis(config.retry_initial_backoff_ms),
            max: Duration::from_millis(config.retry_max_backoff_ms),
            ..Default::default()
        }
    }

    /// Delay before the retry following failed attempt `attempt` (0-indexed)
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let secs = self.initial.as_secs_f64() * self.multiplier.powi(attempt as i32);
        Duration::from_secs_f64(secs.min(self.max.as_secs_f64()))
    }

    /// Whether another attempt is allowed after `attempts` have been made
    pub fn should_retry(&self, attempts: u32) -> bool {
        attempts < self.max_attempts
    }
}
