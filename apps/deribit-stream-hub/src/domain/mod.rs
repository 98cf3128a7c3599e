//! Domain Layer - Channels, subscriptions and the client protocol.
//!
//! Pure types with no I/O. The registry is generic over the client handle so
//! it can be exercised without any transport.

/// Channel name validation.
pub mod channel;

/// Downstream request and reply types.
pub mod protocol;

/// Channel → subscriber tracking and liveness transitions.
pub mod subscription;
