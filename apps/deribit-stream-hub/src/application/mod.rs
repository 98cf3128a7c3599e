//! Application Layer - Use cases and port definitions.
//!
//! Services here drive the domain registry and talk to the outside world
//! only through the ports.

/// Port interfaces for the feed connection and client delivery.
pub mod ports;

/// Hub, session and dispatch services.
pub mod services;
