//! Linear reconnection backoff.

use crate::config::RetryConfig;
use std::time::Duration;

/// Current position in the reconnection backoff.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetrySchedule {
    current: Duration,
    max: Duration,
    increment: Duration,
}

impl RetrySchedule {
    /// Creates a schedule starting at the configured base delay.
    pub fn new(config: &RetryConfig) -> Self {
        Self {
            current: config.base_delay.min(config.max_delay),
            max: config.max_delay,
            increment: config.increment,
        }
    }

    /// The current delay.
    pub fn current(&self) -> Duration {
        self.current
    }

    /// The upper bound.
    pub fn max(&self) -> Duration {
        self.max
    }

    /// The per-attempt increment.
    pub fn increment(&self) -> Duration {
        self.increment
    }

    /// Sets the current delay, capped at the maximum.
    pub fn reset(&mut self, delay: Duration) {
        self.current = delay.min(self.max);
    }

    /// Grows the delay by one increment and returns the new value.
    pub fn advance(&mut self) -> Duration {
        self.current = self.current.saturating_add(self.increment).min(self.max);
        self.current
    }
}
