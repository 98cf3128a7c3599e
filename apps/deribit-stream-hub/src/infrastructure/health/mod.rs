//! Health Check and Metrics Endpoints
//!
//! # Endpoints
//!
//! - `GET /health` - JSON health status
//! - `GET /healthz` - Kubernetes liveness check (simple OK)
//! - `GET /readyz` - Kubernetes readiness check (feed connected)
//! - `GET /metrics` - Prometheus metrics in text format

use std::sync::Arc;
use std::time::Instant;

use axum::{Json, Router, extract::State, http::StatusCode, response::IntoResponse, routing::get};
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::application::services::MarketHub;
use crate::infrastructure::deribit::{ConnectionState, FeedState};
use crate::infrastructure::metrics::get_metrics_handle;
use crate::infrastructure::websocket::SessionTracker;

// =============================================================================
// Health Response Types
// =============================================================================

/// Health check response.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Overall status.
    pub status: HealthStatus,
    /// Hub version.
    pub version: String,
    /// Server uptime in seconds.
    pub uptime_secs: u64,
    /// Current time.
    pub current_time: DateTime<Utc>,
    /// Feed connection status.
    pub upstream: UpstreamInfo,
    /// Subscription statistics.
    pub subscriptions: SubscriptionStatus,
    /// Open downstream sessions.
    pub sessions: usize,
}

/// Overall health status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Feed connected.
    Healthy,
    /// Feed connecting.
    Degraded,
    /// Feed disconnected.
    Unhealthy,
}

impl From<ConnectionState> for HealthStatus {
    fn from(state: ConnectionState) -> Self {
        match state {
            ConnectionState::Connected => Self::Healthy,
            ConnectionState::Connecting => Self::Degraded,
            ConnectionState::Disconnected => Self::Unhealthy,
        }
    }
}

/// Feed connection status.
#[derive(Debug, Clone, Serialize)]
pub struct UpstreamInfo {
    /// Connection state.
    pub state: ConnectionState,
    /// Frames received.
    pub messages_received: u64,
    /// Reconnect attempts since the last successful connect.
    pub reconnect_attempts: u32,
    /// When the feed last connected.
    pub last_connected_at: Option<DateTime<Utc>>,
    /// Most recent connection error.
    pub last_error: Option<String>,
}

/// Subscription statistics.
#[derive(Debug, Clone, Serialize)]
pub struct SubscriptionStatus {
    /// Channels with at least one subscriber.
    pub live_channels: usize,
    /// Clients holding at least one subscription.
    pub subscribed_clients: usize,
}

// =============================================================================
// Health State
// =============================================================================

/// Shared state for the health endpoints.
pub struct HealthState {
    version: String,
    started_at: Instant,
    feed: Arc<FeedState>,
    hub: Arc<MarketHub>,
    sessions: Arc<SessionTracker>,
}

impl HealthState {
    /// Create health state.
    #[must_use]
    pub fn new(
        version: String,
        feed: Arc<FeedState>,
        hub: Arc<MarketHub>,
        sessions: Arc<SessionTracker>,
    ) -> Self {
        Self {
            version,
            started_at: Instant::now(),
            feed,
            hub,
            sessions,
        }
    }
}

/// Routes for the health and metrics endpoints.
pub fn router(state: Arc<HealthState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/healthz", get(liveness_handler))
        .route("/readyz", get(readiness_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}

// =============================================================================
// HTTP Handlers
// =============================================================================

async fn health_handler(State(state): State<Arc<HealthState>>) -> impl IntoResponse {
    let response = build_health_response(&state);
    let status_code = match response.status {
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };
    (status_code, Json(response))
}

async fn liveness_handler() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

async fn readiness_handler(State(state): State<Arc<HealthState>>) -> impl IntoResponse {
    if state.feed.state() == ConnectionState::Connected {
        (StatusCode::OK, "READY")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "NOT READY")
    }
}

async fn metrics_handler() -> impl IntoResponse {
    get_metrics_handle().map_or_else(
        || {
            (
                StatusCode::SERVICE_UNAVAILABLE,
                [("content-type", "text/plain")],
                "Metrics not initialized".to_string(),
            )
        },
        |handle| {
            (
                StatusCode::OK,
                [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
                handle.render(),
            )
        },
    )
}

fn build_health_response(state: &HealthState) -> HealthResponse {
    let connection_state = state.feed.state();
    let stats = state.hub.stats();

    HealthResponse {
        status: connection_state.into(),
        version: state.version.clone(),
        uptime_secs: state.started_at.elapsed().as_secs(),
        current_time: Utc::now(),
        upstream: UpstreamInfo {
            state: connection_state,
            messages_received: state.feed.messages_received(),
            reconnect_attempts: state.feed.reconnect_attempts(),
            last_connected_at: state.feed.last_connected_at(),
            last_error: state.feed.last_error(),
        },
        subscriptions: SubscriptionStatus {
            live_channels: stats.channel_count,
            subscribed_clients: stats.client_count,
        },
        sessions: state.sessions.active(),
    }
}

// =============================================================================
// Tests
// =============================================================================
