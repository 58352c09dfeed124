//! Retry policy for failed render attempts.
//!
//! Implements exponential backoff with configurable parameters.

use crate::config::RenderWorkerSettings;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts allowed per job, the first one included.
    pub max_attempts: u32,
    pub initial_backoff_secs: u64,
    /// Cap for exponential growth.
    pub max_backoff_secs: u64,
    pub backoff_multiplier: f64,
}

impl RetryPolicy {
    pub fn new(settings: &RenderWorkerSettings) -> Self {
        Self {
            max_attempts: settings.max_attempts.max(1),
            initial_backoff_secs: settings.initial_backoff_secs,
            max_backoff_secs: settings.max_backoff_secs,
            backoff_multiplier: settings.backoff_multiplier,
        }
    }

    /// Whether a job that has used `attempts_made` attempts gets another one.
    pub fn should_retry(&self, attempts_made: u32) -> bool {
        attempts_made < self.max_attempts
    }

    /// Delay before the attempt following `attempts_made`.
    ///
    /// `initial_backoff * multiplier^(attempts_made - 1)`, capped at
    /// `max_backoff_secs`.
    pub fn backoff_secs(&self, attempts_made: u32) -> u64 {
        let exponent = attempts_made.saturating_sub(1) as i32;
        let backoff = self.initial_backoff_secs as f64 * self.backoff_multiplier.powi(exponent);
        backoff.min(self.max_backoff_secs as f64) as u64
    }

    /// Epoch millis at which the next attempt may start.
    pub fn next_run_after(&self, attempts_made: u32, now_ms: i64) -> i64 {
        now_ms + (self.backoff_secs(attempts_made) as i64) * 1000
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(&RenderWorkerSettings::default())
    }
}
