//! Downstream WebSocket Endpoint
//!
//! `GET /ws/market` upgrades to a WebSocket session. Each session has:
//!
//! - a reader loop feeding client frames to its `ClientSession`
//! - a writer task draining a bounded outbound queue to the socket
//!
//! Replies wait for queue space; fan-out frames never do (`try_send`), so a
//! slow client loses feed frames instead of stalling the feed.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use axum::Router;
use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::Response;
use axum::routing::get;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use crate::application::ports::{ClientSink, DeliveryError};
use crate::application::services::MarketHub;
use crate::domain::protocol::ServerMessage;
use crate::infrastructure::metrics;

/// Path of the market data endpoint.
pub const WS_PATH: &str = "/ws/market";

// =============================================================================
// Outbound Queue
// =============================================================================

/// `ClientSink` over a session's bounded outbound queue.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::Sender<Arc<str>>,
}

impl ChannelSink {
    /// Wrap the sending half of a session queue.
    #[must_use]
    pub const fn new(tx: mpsc::Sender<Arc<str>>) -> Self {
        Self { tx }
    }
}

impl ClientSink for ChannelSink {
    fn deliver(&self, frame: &Arc<str>) -> Result<(), DeliveryError> {
        self.tx.try_send(Arc::clone(frame)).map_err(|e| match e {
            TrySendError::Full(_) => DeliveryError::Backpressure,
            TrySendError::Closed(_) => DeliveryError::Closed,
        })
    }
}

// =============================================================================
// Session Tracking
// =============================================================================

/// Count of open sessions.
#[derive(Debug, Default)]
pub struct SessionTracker {
    active: AtomicUsize,
}

impl SessionTracker {
    /// Create a tracker with no sessions.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Open sessions.
    #[must_use]
    pub fn active(&self) -> usize {
        self.active.load(Ordering::Relaxed)
    }

    /// Count a session until the guard is dropped.
    #[must_use]
    pub fn enter(self: &Arc<Self>) -> SessionGuard {
        let active = self.active.fetch_add(1, Ordering::Relaxed) + 1;
        metrics::set_active_sessions(active);
        SessionGuard {
            tracker: Arc::clone(self),
        }
    }
}

/// Decrements the session count on drop.
#[derive(Debug)]
pub struct SessionGuard {
    tracker: Arc<SessionTracker>,
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        let active = self.tracker.active.fetch_sub(1, Ordering::Relaxed) - 1;
        metrics::set_active_sessions(active);
    }
}

// =============================================================================
// Endpoint
// =============================================================================

/// Shared state for the WebSocket endpoint.
pub struct WsState {
    hub: Arc<MarketHub>,
    sessions: Arc<SessionTracker>,
    client_buffer: usize,
}

impl WsState {
    /// Create endpoint state.
    #[must_use]
    pub const fn new(
        hub: Arc<MarketHub>,
        sessions: Arc<SessionTracker>,
        client_buffer: usize,
    ) -> Self {
        Self {
            hub,
            sessions,
            client_buffer,
        }
    }
}

/// Routes for the WebSocket endpoint.
pub fn router(state: Arc<WsState>) -> Router {
    Router::new()
        .route(WS_PATH, get(ws_handler))
        .with_state(state)
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<WsState>>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: Arc<WsState>) {
    let _active = state.sessions.enter();
    let (mut sender, mut receiver) = socket.split();
    let (tx, mut rx) = mpsc::channel::<Arc<str>>(state.client_buffer);

    let session = state.hub.open_session(Arc::new(ChannelSink::new(tx.clone())));
    let client_id = session.client().id();
    tracing::info!(client_id, "Client connected");

    let mut send_task = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            if sender
                .send(Message::Text(frame.to_string().into()))
                .await
                .is_err()
            {
                break;
            }
        }
    });
    let mut writer_done = false;

    loop {
        tokio::select! {
            _ = &mut send_task => {
                writer_done = true;
                tracing::debug!(client_id, "Client writer stopped");
                break;
            }
            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        let reply = match session.handle_text(text.as_str()) {
                            Ok(reply) => reply,
                            Err(e) => {
                                tracing::warn!(client_id, error = %e, "Malformed client frame");
                                metrics::record_rejected_request("protocol");
                                break;
                            }
                        };
                        if let ServerMessage::Error { error } = &reply {
                            metrics::record_rejected_request(error);
                        }
                        if tx.send(Arc::from(reply.to_json())).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Binary(_))) => {
                        tracing::warn!(client_id, "Binary client frame");
                        metrics::record_rejected_request("protocol");
                        break;
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        tracing::debug!(client_id, error = %e, "Client socket error");
                        break;
                    }
                }
            }
        }
    }

    session.close();
    drop(tx);
    if !writer_done {
        let _ = send_task.await;
    }

    tracing::info!(client_id, "Client disconnected");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn sink_reports_backpressure_and_closed() {
        let (tx, mut rx) = mpsc::channel(1);
        let sink = ChannelSink::new(tx);
        let frame: Arc<str> = Arc::from("frame");

        assert_eq!(sink.deliver(&frame), Ok(()));
        assert_eq!(sink.deliver(&frame), Err(DeliveryError::Backpressure));

        assert_eq!(rx.recv().await.as_deref(), Some("frame"));
        drop(rx);
        assert_eq!(sink.deliver(&frame), Err(DeliveryError::Closed));
    }

    #[test]
    fn tracker_counts_guards() {
        let tracker = Arc::new(SessionTracker::new());

        let a = tracker.enter();
        let b = tracker.enter();
        assert_eq!(tracker.active(), 2);

        drop(a);
        assert_eq!(tracker.active(), 1);
        drop(b);
        assert_eq!(tracker.active(), 0);
    }
}
