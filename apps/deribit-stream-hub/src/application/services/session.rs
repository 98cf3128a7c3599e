//! One downstream connection's view of the hub.

use std::sync::Arc;

use crate::application::ports::ClientHandle;
use crate::domain::protocol::{ClientRequest, ProtocolError, ServerMessage};

use super::hub::MarketHub;

/// A client session.
///
/// Subscriptions are released when the session is closed or dropped, so
/// cleanup also runs when the connection task errors, panics or is aborted.
pub struct ClientSession {
    hub: Arc<MarketHub>,
    client: ClientHandle,
    released: bool,
}

impl ClientSession {
    pub(super) const fn new(hub: Arc<MarketHub>, client: ClientHandle) -> Self {
        Self {
            hub,
            client,
            released: false,
        }
    }

    /// The client handle registered for this session.
    #[must_use]
    pub const fn client(&self) -> &ClientHandle {
        &self.client
    }

    /// Handle one text frame from the client.
    ///
    /// # Errors
    ///
    /// Returns `ProtocolError` if the frame is not a JSON object. The caller
    /// should end the session.
    pub fn handle_text(&self, text: &str) -> Result<ServerMessage, ProtocolError> {
        let request = ClientRequest::parse(text)?;
        Ok(self.hub.handle_request(&self.client, request))
    }

    /// Release every subscription and unsubscribe channels left empty.
    pub fn close(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        self.hub.release_client(&self.client);
    }
}

impl Drop for ClientSession {
    fn drop(&mut self) {
        self.release();
    }
}
