//! Deribit Stream Hub Binary
//!
//! Starts the feed connection and the downstream WebSocket listener.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin deribit-stream-hub
//! ```
//!
//! # Environment Variables
//!
//! All optional:
//! - `DERIBIT_WS_URL`: Feed URL (default: wss://streams.deribit.com/ws/api/v2)
//! - `HUB_PORT`: HTTP/WebSocket port (default: 8000)
//! - `HUB_HEARTBEAT_INTERVAL_SECS` / `HUB_HEARTBEAT_TIMEOUT_SECS`: 30 / 90
//! - `HUB_RECONNECT_DELAY_MS` / `HUB_RECONNECT_FAILURE_DELAY_MS`: 1000 / 2000
//! - `HUB_RECONNECT_MULTIPLIER` / `HUB_RECONNECT_MAX_DELAY_MS`: 1.0 / 30000
//! - `HUB_RECONNECT_JITTER`: Delay jitter fraction, 0.0 to 1.0 (default: 0.0)
//! - `HUB_RECONNECT_MAX_ATTEMPTS`: Failed attempts before exiting (default: 0, unlimited)
//! - `HUB_EXTRA_CHANNEL_PREFIXES`: Comma-separated extra channel prefixes
//! - `HUB_CLIENT_BUFFER`: Outbound frames queued per client (default: 1024)
//! - `OTEL_ENABLED`, `OTEL_EXPORTER_OTLP_ENDPOINT`, `OTEL_SERVICE_NAME`
//! - `RUST_LOG`: Log filter

use std::sync::Arc;
use std::time::Duration;

use deribit_stream_hub::infrastructure::deribit::{FeedState, UpstreamConnection, UpstreamHandle};
use deribit_stream_hub::infrastructure::health::{self, HealthState};
use deribit_stream_hub::infrastructure::server::HubServer;
use deribit_stream_hub::infrastructure::telemetry;
use deribit_stream_hub::infrastructure::websocket::{self, SessionTracker, WsState};
use deribit_stream_hub::{HubConfig, MarketHub, SubscriptionRegistry, init_metrics};
use tokio::signal;
use tokio_util::sync::CancellationToken;

/// How long to wait for tasks to wind down after a shutdown signal.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::main]
#[allow(clippy::expect_used)]
async fn main() -> anyhow::Result<()> {
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    load_dotenv();

    let _telemetry_guard = telemetry::init();

    tracing::info!("Starting Deribit Stream Hub");

    let _metrics_handle = init_metrics();

    let config = HubConfig::from_env()?;
    log_config(&config);

    let shutdown_token = CancellationToken::new();

    // Shared subscription state
    let registry = Arc::new(SubscriptionRegistry::new());
    let (upstream, commands) = UpstreamHandle::channel();
    let hub = Arc::new(MarketHub::new(
        config.channel_policy(),
        Arc::clone(&registry),
        Arc::new(upstream),
    ));
    let feed_state = Arc::new(FeedState::new());
    let sessions = Arc::new(SessionTracker::new());

    // Feed connection
    let connection = UpstreamConnection::new(
        config.upstream_config(),
        commands,
        registry,
        Arc::clone(&feed_state),
        shutdown_token.clone(),
    );
    let feed_token = shutdown_token.clone();
    let upstream_task = tokio::spawn(async move {
        if let Err(e) = connection.run().await {
            tracing::error!(error = %e, "Feed connection stopped");
            feed_token.cancel();
        }
    });

    // Downstream listener
    let app = websocket::router(Arc::new(WsState::new(
        Arc::clone(&hub),
        Arc::clone(&sessions),
        config.server.client_buffer,
    )))
    .merge(health::router(Arc::new(HealthState::new(
        env!("CARGO_PKG_VERSION").to_string(),
        feed_state,
        hub,
        sessions,
    ))));
    let server = HubServer::new(config.server.port, app, shutdown_token.clone());
    let server_task = tokio::spawn(async move {
        if let Err(e) = server.run().await {
            tracing::error!(error = %e, "Hub server error");
        }
    });

    tracing::info!("Stream hub ready");

    await_shutdown(shutdown_token).await;

    let drained = tokio::time::timeout(SHUTDOWN_TIMEOUT, async {
        let _ = tokio::join!(upstream_task, server_task);
    })
    .await;
    if drained.is_err() {
        tracing::warn!(
            timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
            "Shutdown timed out"
        );
    }

    tracing::info!("Stream hub stopped");
    Ok(())
}

/// Log the parsed configuration.
fn log_config(config: &HubConfig) {
    tracing::info!(
        feed_url = %config.feed.url,
        port = config.server.port,
        heartbeat_secs = config.feed.heartbeat_interval.as_secs(),
        client_buffer = config.server.client_buffer,
        "Configuration loaded"
    );
    if !config.extra_channel_prefixes.is_empty() {
        tracing::info!(
            prefixes = ?config.extra_channel_prefixes,
            "Extra channel prefixes allowed"
        );
    }
}

/// Load .env from the current directory or the nearest ancestor holding one.
fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    if let Ok(cwd) = std::env::current_dir() {
        for dir in cwd.ancestors().skip(1) {
            let env_path = dir.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
        }
    }
}

/// Wait for SIGTERM, SIGINT or an internal stop, then cancel the token.
#[allow(clippy::expect_used)]
async fn await_shutdown(shutdown_token: CancellationToken) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("signal handler installation is critical for graceful shutdown");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("SIGTERM handler installation is critical for graceful shutdown")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
        () = shutdown_token.cancelled() => {
            tracing::info!("Feed gave up, initiating shutdown");
        }
    }

    shutdown_token.cancel();
}
