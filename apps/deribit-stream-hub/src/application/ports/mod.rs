//! Port Interfaces
//!
//! Contracts between the hub's services and the transports around them.
//!
//! ## Driven Ports (Outbound)
//!
//! - `UpstreamPort`: subscribe/unsubscribe requests towards the feed
//! - `ClientSink`: best-effort delivery of one frame to one client

use std::collections::BTreeSet;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use crate::domain::channel::Channel;

// =============================================================================
// Upstream
// =============================================================================

/// Error from the upstream port.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum UpstreamPortError {
    /// The connection task has shut down and accepts no more requests.
    #[error("upstream connection task is not running")]
    Closed,
}

/// Outbound side of the single feed connection.
///
/// Calls are made while the subscription registry is locked, so the order of
/// requests matches the order of liveness transitions. Implementations must
/// hand the request off without blocking, treat an empty set as a no-op and
/// send channels in sorted order.
#[cfg_attr(test, mockall::automock)]
pub trait UpstreamPort: Send + Sync {
    /// Request a subscribe for channels that just became live.
    ///
    /// # Errors
    ///
    /// Returns `UpstreamPortError` if the request cannot be queued.
    fn subscribe(&self, channels: &BTreeSet<Channel>) -> Result<(), UpstreamPortError>;

    /// Request an unsubscribe for channels that lost their last subscriber.
    ///
    /// # Errors
    ///
    /// Returns `UpstreamPortError` if the request cannot be queued.
    fn unsubscribe(&self, channels: &BTreeSet<Channel>) -> Result<(), UpstreamPortError>;
}

// =============================================================================
// Downstream
// =============================================================================

/// Unique identifier for a downstream session.
pub type ClientId = u64;

/// Why a frame could not be handed to a client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum DeliveryError {
    /// The client's connection is gone.
    #[error("client connection closed")]
    Closed,

    /// The client's outbound queue is full.
    #[error("client outbound queue full")]
    Backpressure,
}

impl DeliveryError {
    /// Label for metrics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Backpressure => "backpressure",
        }
    }
}

/// Non-blocking delivery of text frames to one client.
pub trait ClientSink: Send + Sync {
    /// Queue a frame for the client without waiting.
    ///
    /// # Errors
    ///
    /// Returns `DeliveryError` if the frame cannot be queued.
    fn deliver(&self, frame: &Arc<str>) -> Result<(), DeliveryError>;
}

/// Reference to one downstream connection.
///
/// Equality and hashing use only the id, so clones of a handle are the same
/// subscriber.
#[derive(Clone)]
pub struct ClientHandle {
    id: ClientId,
    sink: Arc<dyn ClientSink>,
}

impl ClientHandle {
    /// Create a handle.
    #[must_use]
    pub fn new(id: ClientId, sink: Arc<dyn ClientSink>) -> Self {
        Self { id, sink }
    }

    /// Create a handle with a fresh random id.
    #[must_use]
    pub fn with_random_id(sink: Arc<dyn ClientSink>) -> Self {
        Self::new(uuid::Uuid::new_v4().as_u64_pair().0, sink)
    }

    /// Session id.
    #[must_use]
    pub const fn id(&self) -> ClientId {
        self.id
    }

    /// Queue a frame for this client.
    ///
    /// # Errors
    ///
    /// Returns `DeliveryError` if the client is gone or saturated.
    pub fn deliver(&self, frame: &Arc<str>) -> Result<(), DeliveryError> {
        self.sink.deliver(frame)
    }
}

impl PartialEq for ClientHandle {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for ClientHandle {}

impl Hash for ClientHandle {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for ClientHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientHandle").field("id", &self.id).finish()
    }
}
