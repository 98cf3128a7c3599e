//! Reconnection Policy
//!
//! Delay schedule for the feed retry cycle:
//!
//! - first attempt after a drop waits `initial_delay`
//! - every further attempt waits `failure_delay`, multiplied by `multiplier`
//!   after each failure and capped at `max_delay`
//!
//! With the default multiplier of 1.0 the schedule is fixed (1s, 2s, 2s, ..).

use std::time::Duration;

use rand::Rng;

/// Configuration for reconnection behavior.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectConfig {
    /// Delay before the first attempt after the connection drops.
    pub initial_delay: Duration,
    /// Delay before each attempt after a failed one.
    pub failure_delay: Duration,
    /// Growth factor for the failure delay.
    pub multiplier: f64,
    /// Cap for the grown failure delay.
    pub max_delay: Duration,
    /// Jitter as a fraction (0.1 = ±10%). Zero disables jitter.
    pub jitter_factor: f64,
    /// Maximum attempts before giving up (0 = unlimited).
    pub max_attempts: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            failure_delay: Duration::from_secs(2),
            multiplier: 1.0,
            max_delay: Duration::from_secs(30),
            jitter_factor: 0.0,
            max_attempts: 0,
        }
    }
}

/// Reconnection policy with optional growth and jitter.
///
/// # Example
///
/// ```rust
/// use deribit_stream_hub::infrastructure::deribit::reconnect::{ReconnectConfig, ReconnectPolicy};
/// use std::time::Duration;
///
/// let mut policy = ReconnectPolicy::new(ReconnectConfig::default());
///
/// assert_eq!(policy.next_delay(), Some(Duration::from_secs(1)));
/// assert_eq!(policy.next_delay(), Some(Duration::from_secs(2)));
///
/// // Connected again
/// policy.reset();
/// assert_eq!(policy.next_delay(), Some(Duration::from_secs(1)));
/// ```
#[derive(Debug)]
pub struct ReconnectPolicy {
    config: ReconnectConfig,
    failure_delay: Duration,
    attempt_count: u32,
}

impl ReconnectPolicy {
    /// Create a new reconnection policy.
    #[must_use]
    pub fn new(config: ReconnectConfig) -> Self {
        let failure_delay = config.failure_delay.min(config.max_delay);
        Self {
            config,
            failure_delay,
            attempt_count: 0,
        }
    }

    /// Delay before the next attempt.
    ///
    /// Returns `None` once `max_attempts` is reached.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if !self.should_retry() {
            return None;
        }

        let delay = if self.attempt_count == 0 {
            self.config.initial_delay
        } else {
            let current = self.failure_delay;
            self.failure_delay = self.grow(current);
            current
        };

        self.attempt_count += 1;
        Some(self.apply_jitter(delay))
    }

    /// Reset the policy after a successful connection.
    pub fn reset(&mut self) {
        self.failure_delay = self.config.failure_delay.min(self.config.max_delay);
        self.attempt_count = 0;
    }

    /// Attempts since the last successful connection.
    #[must_use]
    pub const fn attempt_count(&self) -> u32 {
        self.attempt_count
    }

    /// Check if reconnection should continue.
    #[must_use]
    pub const fn should_retry(&self) -> bool {
        self.config.max_attempts == 0 || self.attempt_count < self.config.max_attempts
    }

    fn grow(&self, delay: Duration) -> Duration {
        #[allow(clippy::cast_precision_loss)]
        let scaled = (delay.as_millis() as f64 * self.config.multiplier).round();
        if !scaled.is_finite() || scaled <= 0.0 {
            return delay;
        }

        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let millis = scaled as u64;
        Duration::from_millis(millis).min(self.config.max_delay)
    }

    fn apply_jitter(&self, duration: Duration) -> Duration {
        if self.config.jitter_factor <= 0.0 {
            return duration;
        }

        #[allow(clippy::cast_precision_loss)]
        let base_millis = duration.as_millis() as f64;
        let jitter_range = base_millis * self.config.jitter_factor;
        let jitter: f64 = rand::rng().random_range(-jitter_range..=jitter_range);
        let adjusted_millis = (base_millis + jitter).max(1.0);

        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let adjusted = adjusted_millis as u64;
        Duration::from_millis(adjusted)
    }
}
