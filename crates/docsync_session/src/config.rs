//! Configuration for the sync session.

use std::time::Duration;

/// Name of the local store when none is configured.
pub const DEFAULT_LOCAL_NAME: &str = "LocalDB";

/// Configuration for a sync session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Name of the local store.
    pub local_name: String,
    /// Reconnection backoff.
    pub retry: RetryConfig,
    /// How long a flashed status is shown before reverting.
    pub flash_duration: Duration,
    /// Delay before a replication outcome settles into `idle` or `offline`.
    pub settle_delay: Duration,
}

impl SessionConfig {
    /// Creates a configuration for the named local store.
    pub fn new(local_name: impl Into<String>) -> Self {
        Self {
            local_name: local_name.into(),
            retry: RetryConfig::default(),
            flash_duration: Duration::from_millis(2000),
            settle_delay: Duration::from_millis(800),
        }
    }

    /// Sets the retry configuration.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Sets the status flash duration.
    pub fn with_flash_duration(mut self, duration: Duration) -> Self {
        self.flash_duration = duration;
        self
    }

    /// Sets the settle delay.
    pub fn with_settle_delay(mut self, delay: Duration) -> Self {
        self.settle_delay = delay;
        self
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::new(DEFAULT_LOCAL_NAME)
    }
}

/// Configuration for the progressive reconnection backoff.
///
/// The delay grows linearly by `increment` on every attempt and never
/// exceeds `max_delay`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryConfig {
    /// Upper bound of the delay.
    pub max_delay: Duration,
    /// Amount added on every attempt.
    pub increment: Duration,
    /// Delay the backoff starts from, and restarts from after a settings
    /// change or an error.
    pub base_delay: Duration,
}

impl RetryConfig {
    /// Creates the default backoff.
    pub fn new() -> Self {
        Self {
            max_delay: Duration::from_secs(10 * 60),
            increment: Duration::from_millis(1000),
            base_delay: Duration::from_millis(1000),
        }
    }

    /// Sets the maximum delay.
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Sets the increment.
    pub fn with_increment(mut self, increment: Duration) -> Self {
        self.increment = increment;
        self
    }

    /// Sets the base delay.
    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::new()
    }
}
