#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::needless_pass_by_value,
        clippy::items_after_statements
    )
)]

//! Deribit Stream Hub - Market Data Fan-out
//!
//! Keeps one JSON-RPC WebSocket connection to the Deribit public feed and
//! multiplexes channel subscriptions from many downstream WebSocket clients
//! onto it. A channel is subscribed upstream exactly while at least one
//! client wants it.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: channel validation, subscription registry, client protocol
//! - **Application**: ports towards the feed and the clients, the hub
//!   service, per-client sessions, fan-out
//! - **Infrastructure**: Deribit connection task, downstream WebSocket
//!   endpoint, HTTP listener, health, metrics, telemetry, configuration
//!
//! # Data Flow
//!
//! ```text
//!                      ┌──────────────┐   subscribe/unsubscribe   ┌────────────┐
//! Client 1 ── /ws ───► │  MarketHub   │ ────── command queue ───► │  Upstream  │ ◄──► Deribit
//! Client N ── /ws ───► │  + Registry  │                           │ Connection │
//!                      └──────────────┘                           └─────┬──────┘
//!        ▲                                                              │ frames
//!        └────────────── per-session queue ◄──── Dispatcher ◄───────────┘
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Pure types with no I/O.
pub mod domain;

/// Application layer - Services and port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::channel::{Channel, ChannelError, ChannelPolicy};
pub use domain::protocol::{ClientRequest, Operation, ServerMessage};
pub use domain::subscription::{RegistryStats, SubscriptionChanges, SubscriptionRegistry};

// Application layer
pub use application::ports::{
    ClientHandle, ClientId, ClientSink, DeliveryError, UpstreamPort, UpstreamPortError,
};
pub use application::services::{ClientSession, DispatchReport, Dispatcher, MarketHub};

// Infrastructure
pub use infrastructure::config::{ConfigError, HubConfig};
pub use infrastructure::deribit::{
    ConnectionState, FeedState, UpstreamConfig, UpstreamConnection, UpstreamError, UpstreamHandle,
};
pub use infrastructure::metrics::init_metrics;
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
