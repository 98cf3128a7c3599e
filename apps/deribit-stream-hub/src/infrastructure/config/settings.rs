//! Hub Configuration Settings
//!
//! Loaded from environment variables. Unparseable numbers fall back to their
//! defaults; values that parse but make no sense are a `ConfigError`.

use std::time::Duration;

use crate::domain::channel::ChannelPolicy;
use crate::infrastructure::deribit::{HeartbeatConfig, ReconnectConfig, UpstreamConfig};

/// Public Deribit streaming endpoint.
pub const DEFAULT_FEED_URL: &str = "wss://streams.deribit.com/ws/api/v2";

/// Smallest heartbeat interval the feed accepts.
pub const MIN_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(10);

/// Feed connection settings.
#[derive(Debug, Clone, PartialEq)]
pub struct FeedSettings {
    /// Feed WebSocket URL.
    pub url: String,
    /// Interval requested via `public/set_heartbeat`.
    pub heartbeat_interval: Duration,
    /// Silence tolerated before reconnecting.
    pub heartbeat_timeout: Duration,
    /// Delay before the first reconnect attempt.
    pub reconnect_delay: Duration,
    /// Delay before each attempt after a failed reconnect.
    pub reconnect_failure_delay: Duration,
    /// Growth factor for the failure delay.
    pub reconnect_multiplier: f64,
    /// Cap for the failure delay.
    pub reconnect_max_delay: Duration,
    /// Jitter fraction applied to each delay, in `0.0..=1.0`.
    pub reconnect_jitter: f64,
    /// Consecutive failed attempts before giving up (0 = unlimited).
    pub reconnect_max_attempts: u32,
}

impl Default for FeedSettings {
    fn default() -> Self {
        Self {
            url: DEFAULT_FEED_URL.to_string(),
            heartbeat_interval: Duration::from_secs(30),
            heartbeat_timeout: Duration::from_secs(90),
            reconnect_delay: Duration::from_millis(1000),
            reconnect_failure_delay: Duration::from_millis(2000),
            reconnect_multiplier: 1.0,
            reconnect_max_delay: Duration::from_millis(30_000),
            reconnect_jitter: 0.0,
            reconnect_max_attempts: 0,
        }
    }
}

/// Listener settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerSettings {
    /// HTTP and WebSocket port.
    pub port: u16,
    /// Outbound queue capacity per session, in frames.
    pub client_buffer: usize,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            port: 8000,
            client_buffer: 1024,
        }
    }
}

/// Complete hub configuration.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct HubConfig {
    /// Feed connection settings.
    pub feed: FeedSettings,
    /// Listener settings.
    pub server: ServerSettings,
    /// Prefixes accepted in addition to the built-in allow-list.
    pub extra_channel_prefixes: Vec<String>,
}

impl HubConfig {
    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a value is out of range.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary key lookup.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a value is out of range.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let feed_defaults = FeedSettings::default();
        let server_defaults = ServerSettings::default();

        let feed = FeedSettings {
            url: lookup("DERIBIT_WS_URL")
                .filter(|v| !v.trim().is_empty())
                .unwrap_or(feed_defaults.url),
            heartbeat_interval: parse_secs(
                &lookup,
                "HUB_HEARTBEAT_INTERVAL_SECS",
                feed_defaults.heartbeat_interval,
            ),
            heartbeat_timeout: parse_secs(
                &lookup,
                "HUB_HEARTBEAT_TIMEOUT_SECS",
                feed_defaults.heartbeat_timeout,
            ),
            reconnect_delay: parse_millis(
                &lookup,
                "HUB_RECONNECT_DELAY_MS",
                feed_defaults.reconnect_delay,
            ),
            reconnect_failure_delay: parse_millis(
                &lookup,
                "HUB_RECONNECT_FAILURE_DELAY_MS",
                feed_defaults.reconnect_failure_delay,
            ),
            reconnect_multiplier: parse(
                &lookup,
                "HUB_RECONNECT_MULTIPLIER",
                feed_defaults.reconnect_multiplier,
            ),
            reconnect_max_delay: parse_millis(
                &lookup,
                "HUB_RECONNECT_MAX_DELAY_MS",
                feed_defaults.reconnect_max_delay,
            ),
            reconnect_jitter: parse(
                &lookup,
                "HUB_RECONNECT_JITTER",
                feed_defaults.reconnect_jitter,
            ),
            reconnect_max_attempts: parse(
                &lookup,
                "HUB_RECONNECT_MAX_ATTEMPTS",
                feed_defaults.reconnect_max_attempts,
            ),
        };

        let server = ServerSettings {
            port: parse(&lookup, "HUB_PORT", server_defaults.port),
            client_buffer: parse(&lookup, "HUB_CLIENT_BUFFER", server_defaults.client_buffer),
        };

        let extra_channel_prefixes = lookup("HUB_EXTRA_CHANNEL_PREFIXES")
            .map(|v| {
                v.split(',')
                    .map(str::trim)
                    .filter(|p| !p.is_empty())
                    .map(ToString::to_string)
                    .collect()
            })
            .unwrap_or_default();

        let config = Self {
            feed,
            server,
            extra_channel_prefixes,
        };
        config.validate()?;
        Ok(config)
    }

    /// Check semantic constraints.
    ///
    /// # Errors
    ///
    /// Returns the first violated constraint.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.feed.url.starts_with("ws://") || self.feed.url.starts_with("wss://")) {
            return Err(ConfigError::InvalidFeedUrl(self.feed.url.clone()));
        }
        if self.feed.heartbeat_interval < MIN_HEARTBEAT_INTERVAL {
            return Err(ConfigError::HeartbeatTooShort(
                self.feed.heartbeat_interval.as_secs(),
            ));
        }
        if !(0.0..=1.0).contains(&self.feed.reconnect_jitter) {
            return Err(ConfigError::InvalidJitter(self.feed.reconnect_jitter));
        }
        if self.server.client_buffer == 0 {
            return Err(ConfigError::ZeroClientBuffer);
        }
        Ok(())
    }

    /// Feed connection settings for the upstream task.
    #[must_use]
    pub fn upstream_config(&self) -> UpstreamConfig {
        UpstreamConfig {
            url: self.feed.url.clone(),
            heartbeat: HeartbeatConfig {
                interval: self.feed.heartbeat_interval,
                timeout: self.feed.heartbeat_timeout,
            },
            reconnect: ReconnectConfig {
                initial_delay: self.feed.reconnect_delay,
                failure_delay: self.feed.reconnect_failure_delay,
                multiplier: self.feed.reconnect_multiplier,
                max_delay: self.feed.reconnect_max_delay,
                jitter_factor: self.feed.reconnect_jitter,
                max_attempts: self.feed.reconnect_max_attempts,
            },
        }
    }

    /// Channel allow-list including configured extras.
    #[must_use]
    pub fn channel_policy(&self) -> ChannelPolicy {
        ChannelPolicy::with_extra_prefixes(self.extra_channel_prefixes.iter().cloned())
    }
}

/// Configuration error.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    /// Feed URL is not a WebSocket URL.
    #[error("DERIBIT_WS_URL must start with ws:// or wss://, got {0:?}")]
    InvalidFeedUrl(String),

    /// Heartbeat interval below the feed minimum.
    #[error("heartbeat interval must be at least 10 seconds, got {0}")]
    HeartbeatTooShort(u64),

    /// Jitter fraction outside `0.0..=1.0`.
    #[error("HUB_RECONNECT_JITTER must be between 0.0 and 1.0, got {0}")]
    InvalidJitter(f64),

    /// Session queue would hold nothing.
    #[error("HUB_CLIENT_BUFFER must be greater than zero")]
    ZeroClientBuffer,
}

fn parse<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> T {
    lookup(key)
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn parse_secs(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: Duration) -> Duration {
    lookup(key)
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map_or(default, Duration::from_secs)
}

fn parse_millis(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: Duration,
) -> Duration {
    lookup(key)
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map_or(default, Duration::from_millis)
}
