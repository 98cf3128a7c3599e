//! Heartbeat Watchdog
//!
//! The feed is asked to send heartbeats every `interval`. Any inbound frame
//! counts as proof of life; if nothing arrives for `timeout` the connection
//! is considered dead.

use std::time::Duration;

use tokio::time::Instant;

/// Heartbeat settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeartbeatConfig {
    /// Interval requested via `public/set_heartbeat`.
    pub interval: Duration,
    /// Silence tolerated before the connection is declared dead.
    pub timeout: Duration,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            timeout: Duration::from_secs(90),
        }
    }
}

/// Tracks the last inbound frame on one connection.
#[derive(Debug)]
pub struct HeartbeatState {
    last_frame: Instant,
    timeout: Duration,
}

impl HeartbeatState {
    /// Start watching a fresh connection.
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        Self {
            last_frame: Instant::now(),
            timeout,
        }
    }

    /// Record that a frame arrived.
    pub fn record_frame(&mut self) {
        self.last_frame = Instant::now();
    }

    /// Instant after which the connection is dead.
    #[must_use]
    pub fn deadline(&self) -> Instant {
        self.last_frame + self.timeout
    }

    /// Configured timeout.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        self.timeout
    }
}

/// Errors from the heartbeat watchdog.
#[derive(Debug, Clone, thiserror::Error)]
pub enum HeartbeatError {
    /// No frame within the timeout.
    #[error("no frame received for {0:?}")]
    Timeout(Duration),
}
