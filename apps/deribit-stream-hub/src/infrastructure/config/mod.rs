//! Configuration Module
//!
//! Configuration loading for the hub service.

mod settings;

pub use settings::{
    ConfigError, DEFAULT_FEED_URL, FeedSettings, HubConfig, MIN_HEARTBEAT_INTERVAL, ServerSettings,
};
