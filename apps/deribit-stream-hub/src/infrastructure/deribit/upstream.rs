//! Feed Connection Task
//!
//! One task owns the feed WebSocket. It is the only reader and the only
//! writer; sessions reach it through `UpstreamHandle`, which queues
//! subscribe/unsubscribe commands.
//!
//! # Lifecycle
//!
//! 1. Connect, send `public/set_heartbeat`
//! 2. Subscribe to the whole live channel set in one request
//! 3. Serve commands and inbound frames until the connection fails
//! 4. Wait out the reconnect delay and start again
//!
//! Commands queued while disconnected stay in the queue and are sent after
//! step 2 of the next connection.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Instant;

use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

use super::codec::{self, CodecError, FeedMessage};
use super::heartbeat::{HeartbeatConfig, HeartbeatError, HeartbeatState};
use super::messages::{RequestIds, RpcRequest};
use super::reconnect::{ReconnectConfig, ReconnectPolicy};
use super::state::{ConnectionState, FeedState};
use crate::application::ports::{ClientHandle, UpstreamPort, UpstreamPortError};
use crate::application::services::Dispatcher;
use crate::domain::channel::Channel;
use crate::domain::subscription::SubscriptionRegistry;
use crate::infrastructure::metrics;

type FeedSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;

// =============================================================================
// Error Type
// =============================================================================

/// Errors that end one feed connection.
#[derive(Debug, thiserror::Error)]
pub enum UpstreamError {
    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// Connect did not complete in time.
    #[error("connect timed out")]
    ConnectTimeout,

    /// Inbound frame could not be decoded.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// Feed went silent.
    #[error("heartbeat error: {0}")]
    Heartbeat(#[from] HeartbeatError),

    /// Outbound request could not be encoded.
    #[error("failed to encode request: {0}")]
    Encode(#[from] serde_json::Error),

    /// Feed closed the connection.
    #[error("connection closed by feed")]
    ConnectionClosed,

    /// Maximum reconnection attempts exceeded.
    #[error("maximum reconnection attempts exceeded")]
    MaxReconnectAttemptsExceeded,
}

// =============================================================================
// Configuration
// =============================================================================

/// Feed connection settings.
#[derive(Debug, Clone, PartialEq)]
pub struct UpstreamConfig {
    /// Feed WebSocket URL.
    pub url: String,
    /// Heartbeat settings.
    pub heartbeat: HeartbeatConfig,
    /// Reconnection schedule.
    pub reconnect: ReconnectConfig,
}

impl UpstreamConfig {
    /// Settings with default heartbeat and reconnect schedule.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            heartbeat: HeartbeatConfig::default(),
            reconnect: ReconnectConfig::default(),
        }
    }
}

// =============================================================================
// Command Handle
// =============================================================================

/// Work for the connection task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpstreamCommand {
    /// Send `public/subscribe`.
    Subscribe(BTreeSet<Channel>),
    /// Send `public/unsubscribe`.
    Unsubscribe(BTreeSet<Channel>),
}

/// Receiving end of the command queue, owned by `UpstreamConnection`.
pub type CommandReceiver = mpsc::UnboundedReceiver<UpstreamCommand>;

/// Cloneable `UpstreamPort` backed by the connection task's queue.
#[derive(Debug, Clone)]
pub struct UpstreamHandle {
    commands: mpsc::UnboundedSender<UpstreamCommand>,
}

impl UpstreamHandle {
    /// Create a handle and the queue the connection task reads.
    #[must_use]
    pub fn channel() -> (Self, CommandReceiver) {
        let (commands, rx) = mpsc::unbounded_channel();
        (Self { commands }, rx)
    }

    fn enqueue(&self, command: UpstreamCommand) -> Result<(), UpstreamPortError> {
        self.commands
            .send(command)
            .map_err(|_| UpstreamPortError::Closed)
    }
}

impl UpstreamPort for UpstreamHandle {
    fn subscribe(&self, channels: &BTreeSet<Channel>) -> Result<(), UpstreamPortError> {
        if channels.is_empty() {
            return Ok(());
        }
        self.enqueue(UpstreamCommand::Subscribe(channels.clone()))
    }

    fn unsubscribe(&self, channels: &BTreeSet<Channel>) -> Result<(), UpstreamPortError> {
        if channels.is_empty() {
            return Ok(());
        }
        self.enqueue(UpstreamCommand::Unsubscribe(channels.clone()))
    }
}

// =============================================================================
// Connection Task
// =============================================================================

/// The single feed connection.
pub struct UpstreamConnection {
    config: UpstreamConfig,
    commands: CommandReceiver,
    registry: Arc<SubscriptionRegistry<ClientHandle>>,
    dispatcher: Dispatcher,
    state: Arc<FeedState>,
    cancel: CancellationToken,
    request_ids: RequestIds,
}

impl UpstreamConnection {
    /// Create the connection task.
    #[must_use]
    pub fn new(
        config: UpstreamConfig,
        commands: CommandReceiver,
        registry: Arc<SubscriptionRegistry<ClientHandle>>,
        state: Arc<FeedState>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            config,
            commands,
            dispatcher: Dispatcher::new(Arc::clone(&registry)),
            registry,
            state,
            cancel,
            request_ids: RequestIds::new(),
        }
    }

    /// Run the connection loop until cancelled.
    ///
    /// A failed initial connect enters the same retry cycle as a dropped
    /// connection.
    ///
    /// # Errors
    ///
    /// Returns `MaxReconnectAttemptsExceeded` only when the reconnect policy
    /// has a finite attempt budget.
    pub async fn run(mut self) -> Result<(), UpstreamError> {
        let mut policy = ReconnectPolicy::new(self.config.reconnect.clone());

        let result = loop {
            if self.cancel.is_cancelled() {
                break Ok(());
            }

            match self.connect_and_run(&mut policy).await {
                Ok(()) => {
                    tracing::info!("Feed connection closed");
                    break Ok(());
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Feed connection error");
                    self.state.set_disconnected(e.to_string());
                    metrics::set_upstream_connected(false);

                    let Some(delay) = policy.next_delay() else {
                        break Err(UpstreamError::MaxReconnectAttemptsExceeded);
                    };
                    self.state.increment_reconnect_attempts();
                    metrics::record_reconnect();
                    tracing::info!(
                        attempt = policy.attempt_count(),
                        delay_ms = delay.as_millis(),
                        "Reconnecting to feed"
                    );

                    let cancelled = tokio::select! {
                        () = self.cancel.cancelled() => true,
                        () = tokio::time::sleep(delay) => false,
                    };
                    if cancelled {
                        break Ok(());
                    }
                }
            }
        };

        self.state.set_state(ConnectionState::Disconnected);
        metrics::set_upstream_connected(false);
        result
    }

    /// Connect and serve until error, cancellation or all handles dropped.
    async fn connect_and_run(&mut self, policy: &mut ReconnectPolicy) -> Result<(), UpstreamError> {
        self.state.set_state(ConnectionState::Connecting);
        tracing::info!(url = %self.config.url, "Connecting to feed");

        let connect = tokio::time::timeout(
            self.config.heartbeat.timeout,
            tokio_tungstenite::connect_async(self.config.url.as_str()),
        );
        let (ws_stream, _response) = tokio::select! {
            () = self.cancel.cancelled() => return Ok(()),
            result = connect => result.map_err(|_| UpstreamError::ConnectTimeout)??,
        };
        let (mut write, mut read) = ws_stream.split();

        let id = self.request_ids.next_id();
        self.send(&mut write, &RpcRequest::set_heartbeat(id, self.config.heartbeat.interval))
            .await?;

        let live = self.registry.live_channels();
        if !live.is_empty() {
            let id = self.request_ids.next_id();
            self.send(&mut write, &RpcRequest::subscribe(id, &live))
                .await?;
            tracing::info!(channels = live.len(), "Resubscribed live channels");
        }

        self.state.set_state(ConnectionState::Connected);
        metrics::set_upstream_connected(true);
        metrics::set_live_channels(live.len());
        policy.reset();
        tracing::info!("Feed connected");

        let mut heartbeat = HeartbeatState::new(self.config.heartbeat.timeout);

        loop {
            tokio::select! {
                () = self.cancel.cancelled() => {
                    tracing::info!("Closing feed connection");
                    let _ = write.send(Message::Close(None)).await;
                    return Ok(());
                }
                () = tokio::time::sleep_until(heartbeat.deadline()) => {
                    tracing::warn!(
                        timeout_secs = heartbeat.timeout().as_secs(),
                        "Feed heartbeat timeout"
                    );
                    return Err(HeartbeatError::Timeout(heartbeat.timeout()).into());
                }
                command = self.commands.recv() => {
                    let Some(command) = command else {
                        tracing::info!("All upstream handles dropped");
                        let _ = write.send(Message::Close(None)).await;
                        return Ok(());
                    };
                    self.apply_command(&mut write, command).await?;
                }
                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            heartbeat.record_frame();
                            self.handle_text(&mut write, &text).await?;
                        }
                        Some(Ok(Message::Ping(data))) => {
                            heartbeat.record_frame();
                            write.send(Message::Pong(data)).await?;
                        }
                        Some(Ok(Message::Close(frame))) => {
                            tracing::info!(?frame, "Feed sent close frame");
                            return Err(UpstreamError::ConnectionClosed);
                        }
                        Some(Ok(_)) => {
                            heartbeat.record_frame();
                        }
                        Some(Err(e)) => return Err(e.into()),
                        None => {
                            tracing::info!("Feed stream ended");
                            return Err(UpstreamError::ConnectionClosed);
                        }
                    }
                }
            }
        }
    }

    async fn handle_text(&mut self, write: &mut FeedSink, text: &str) -> Result<(), UpstreamError> {
        self.state.increment_messages();

        let message = codec::decode(text)?;
        metrics::record_upstream_frame(message.kind());

        match message {
            FeedMessage::TestRequest => {
                let id = self.request_ids.next_id();
                self.send(write, &RpcRequest::test(id)).await?;
            }
            FeedMessage::Subscription { channel } => {
                let frame: Arc<str> = Arc::from(text);
                let started = Instant::now();
                let report = self.dispatcher.dispatch(&channel, &frame);
                metrics::record_fanout(&report, started.elapsed());
                tracing::trace!(channel = %channel, recipients = report.recipients(), "Dispatched frame");
            }
            FeedMessage::Response {
                id,
                error: Some(error),
            } => {
                tracing::warn!(id = ?id, error = %error, "Feed rejected request");
            }
            FeedMessage::Heartbeat | FeedMessage::Response { .. } | FeedMessage::Other => {}
        }

        Ok(())
    }

    async fn apply_command(
        &mut self,
        write: &mut FeedSink,
        command: UpstreamCommand,
    ) -> Result<(), UpstreamError> {
        let request = match &command {
            UpstreamCommand::Subscribe(channels) if !channels.is_empty() => {
                RpcRequest::subscribe(self.request_ids.next_id(), channels)
            }
            UpstreamCommand::Unsubscribe(channels) if !channels.is_empty() => {
                RpcRequest::unsubscribe(self.request_ids.next_id(), channels)
            }
            _ => return Ok(()),
        };

        self.send(write, &request).await?;
        metrics::set_live_channels(self.registry.stats().channel_count);
        Ok(())
    }

    async fn send(&self, write: &mut FeedSink, request: &RpcRequest) -> Result<(), UpstreamError> {
        let json = request.to_json()?;

        tracing::debug!(
            id = request.id,
            method = request.method.as_str(),
            "Sending feed request"
        );

        write.send(Message::Text(json.into())).await?;
        metrics::record_upstream_request(request.method.as_str());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(channels: &[&str]) -> BTreeSet<Channel> {
        channels.iter().map(ToString::to_string).collect()
    }

    #[tokio::test]
    async fn handle_queues_commands_in_order() {
        let (handle, mut rx) = UpstreamHandle::channel();

        handle.subscribe(&set(&["ticker.x", "book.x"])).unwrap();
        handle.unsubscribe(&set(&["book.x"])).unwrap();

        assert_eq!(
            rx.recv().await,
            Some(UpstreamCommand::Subscribe(set(&["book.x", "ticker.x"])))
        );
        assert_eq!(
            rx.recv().await,
            Some(UpstreamCommand::Unsubscribe(set(&["book.x"])))
        );
    }

    #[tokio::test]
    async fn empty_sets_are_not_queued() {
        let (handle, mut rx) = UpstreamHandle::channel();

        handle.subscribe(&BTreeSet::new()).unwrap();
        handle.unsubscribe(&BTreeSet::new()).unwrap();
        drop(handle);

        assert_eq!(rx.recv().await, None);
    }

    #[test]
    fn closed_task_is_reported() {
        let (handle, rx) = UpstreamHandle::channel();
        drop(rx);

        assert_eq!(
            handle.subscribe(&set(&["ticker.x"])),
            Err(UpstreamPortError::Closed)
        );
    }

    #[test]
    fn config_defaults() {
        let config = UpstreamConfig::new("wss://streams.deribit.com/ws/api/v2");
        assert_eq!(config.heartbeat, HeartbeatConfig::default());
        assert_eq!(config.reconnect, ReconnectConfig::default());
    }
}
