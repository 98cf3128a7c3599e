//! HTTP Listener
//!
//! Serves the WebSocket endpoint and the health routes on one port until
//! the cancellation token fires.

use std::net::SocketAddr;

use axum::Router;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

/// Hub HTTP server.
pub struct HubServer {
    addr: SocketAddr,
    app: Router,
    cancel: CancellationToken,
}

impl HubServer {
    /// Listen on all interfaces at `port`.
    #[must_use]
    pub fn new(port: u16, app: Router, cancel: CancellationToken) -> Self {
        Self::with_addr(SocketAddr::from(([0, 0, 0, 0], port)), app, cancel)
    }

    /// Listen on a specific address.
    #[must_use]
    pub const fn with_addr(addr: SocketAddr, app: Router, cancel: CancellationToken) -> Self {
        Self { addr, app, cancel }
    }

    /// Bind and serve until cancelled.
    ///
    /// # Errors
    ///
    /// Returns `ServerError` if binding fails or the server stops with an
    /// I/O error.
    pub async fn run(self) -> Result<(), ServerError> {
        let listener = TcpListener::bind(self.addr)
            .await
            .map_err(|e| ServerError::BindFailed(self.addr, e.to_string()))?;

        self.serve(listener).await
    }

    /// Serve on an already bound listener until cancelled.
    ///
    /// # Errors
    ///
    /// Returns `ServerError` if the server stops with an I/O error.
    pub async fn serve(self, listener: TcpListener) -> Result<(), ServerError> {
        let addr = listener.local_addr().unwrap_or(self.addr);
        tracing::info!(%addr, "Hub server listening");

        axum::serve(listener, self.app)
            .with_graceful_shutdown(self.cancel.cancelled_owned())
            .await
            .map_err(|e| ServerError::ServerFailed(e.to_string()))?;

        tracing::info!("Hub server stopped");
        Ok(())
    }
}

/// Server errors.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Failed to bind.
    #[error("failed to bind to {0}: {1}")]
    BindFailed(SocketAddr, String),

    /// Server error.
    #[error("server error: {0}")]
    ServerFailed(String),
}
