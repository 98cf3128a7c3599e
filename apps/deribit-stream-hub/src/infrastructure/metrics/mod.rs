//! Prometheus Metrics Module
//!
//! # Metrics Categories
//!
//! - **Upstream**: frames received, requests sent, reconnects, connection
//! - **Subscriptions**: live channel count
//! - **Sessions**: active downstream sessions, rejected requests
//! - **Fan-out**: frames delivered, delivery failures, dispatch latency
//!
//! Exposed at `/metrics` on the hub port.

use std::sync::OnceLock;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use crate::application::services::DispatchReport;

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize the Prometheus metrics recorder.
///
/// # Panics
///
/// Panics if another global recorder is already installed.
#[allow(clippy::expect_used)]
pub fn init_metrics() -> PrometheusHandle {
    PROMETHEUS_HANDLE
        .get_or_init(|| {
            let handle = PrometheusBuilder::new()
                .install_recorder()
                .expect("failed to install Prometheus recorder");

            register_metrics();
            handle
        })
        .clone()
}

/// Get the Prometheus handle for rendering metrics.
///
/// Returns `None` if metrics have not been initialized.
#[must_use]
pub fn get_metrics_handle() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE.get().cloned()
}

// =============================================================================
// Metric Registration
// =============================================================================

fn register_metrics() {
    describe_counter!(
        "deribit_hub_upstream_frames_total",
        "Frames received from the feed by kind"
    );
    describe_counter!(
        "deribit_hub_upstream_requests_total",
        "JSON-RPC requests sent to the feed by method"
    );
    describe_counter!(
        "deribit_hub_upstream_reconnects_total",
        "Feed reconnection attempts"
    );
    describe_gauge!(
        "deribit_hub_upstream_connected",
        "1 while the feed connection is up"
    );

    describe_gauge!(
        "deribit_hub_live_channels",
        "Channels with at least one subscriber"
    );
    describe_gauge!(
        "deribit_hub_active_sessions",
        "Open downstream WebSocket sessions"
    );
    describe_counter!(
        "deribit_hub_requests_rejected_total",
        "Client requests rejected by reason"
    );

    describe_counter!(
        "deribit_hub_frames_delivered_total",
        "Feed frames queued to downstream clients"
    );
    describe_counter!(
        "deribit_hub_delivery_failures_total",
        "Frames not delivered by reason"
    );
    describe_histogram!(
        "deribit_hub_fanout_seconds",
        "Time to fan one feed frame out to its subscribers"
    );
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Record a frame received from the feed.
pub fn record_upstream_frame(kind: &'static str) {
    counter!("deribit_hub_upstream_frames_total", "kind" => kind).increment(1);
}

/// Record a request sent to the feed.
pub fn record_upstream_request(method: &'static str) {
    counter!("deribit_hub_upstream_requests_total", "method" => method).increment(1);
}

/// Record a reconnection attempt.
pub fn record_reconnect() {
    counter!("deribit_hub_upstream_reconnects_total").increment(1);
}

/// Update the feed connection gauge.
pub fn set_upstream_connected(connected: bool) {
    gauge!("deribit_hub_upstream_connected").set(if connected { 1.0 } else { 0.0 });
}

/// Update the live channel gauge.
#[allow(clippy::cast_precision_loss)]
pub fn set_live_channels(count: usize) {
    gauge!("deribit_hub_live_channels").set(count as f64);
}

/// Update the active session gauge.
#[allow(clippy::cast_precision_loss)]
pub fn set_active_sessions(count: usize) {
    gauge!("deribit_hub_active_sessions").set(count as f64);
}

/// Record a rejected client request.
pub fn record_rejected_request(reason: &str) {
    counter!(
        "deribit_hub_requests_rejected_total",
        "reason" => reason.to_string()
    )
    .increment(1);
}

/// Record the outcome of one fan-out.
pub fn record_fanout(report: &DispatchReport, duration: Duration) {
    if report.delivered > 0 {
        counter!("deribit_hub_frames_delivered_total").increment(report.delivered as u64);
    }
    if report.closed > 0 {
        counter!("deribit_hub_delivery_failures_total", "reason" => "closed")
            .increment(report.closed as u64);
    }
    if report.backpressure > 0 {
        counter!("deribit_hub_delivery_failures_total", "reason" => "backpressure")
            .increment(report.backpressure as u64);
    }
    histogram!("deribit_hub_fanout_seconds").record(duration.as_secs_f64());
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recording_without_recorder_is_noop() {
        record_upstream_frame("subscription");
        record_upstream_request("public/subscribe");
        record_reconnect();
        set_upstream_connected(true);
        set_live_channels(3);
        set_active_sessions(2);
        record_rejected_request("no valid channels");
        record_fanout(
            &DispatchReport {
                delivered: 2,
                closed: 1,
                backpressure: 1,
            },
            Duration::from_micros(40),
        );
    }
}
