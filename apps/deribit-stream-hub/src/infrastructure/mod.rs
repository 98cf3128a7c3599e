//! Infrastructure Layer - Adapters and external integrations.
//!
//! Concrete implementations of the application ports plus the process-level
//! concerns: configuration, listeners, telemetry.

/// Configuration loading.
pub mod config;

/// Deribit feed connection (JSON-RPC over WebSocket).
pub mod deribit;

/// Health check and metrics HTTP routes.
pub mod health;

/// Prometheus metrics instrumentation.
pub mod metrics;

/// HTTP listener with graceful shutdown.
pub mod server;

/// Logging and OpenTelemetry tracing.
pub mod telemetry;

/// Downstream WebSocket endpoint.
pub mod websocket;
