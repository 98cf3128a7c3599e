//! Fan-out of feed frames to channel subscribers.

use std::sync::Arc;

use crate::application::ports::{ClientHandle, DeliveryError};
use crate::domain::subscription::SubscriptionRegistry;

/// Per-frame delivery outcome.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// Recipients that accepted the frame.
    pub delivered: usize,
    /// Recipients whose connection was gone.
    pub closed: usize,
    /// Recipients whose outbound queue was full.
    pub backpressure: usize,
}

impl DispatchReport {
    /// Recipients that did not get the frame.
    #[must_use]
    pub const fn failed(&self) -> usize {
        self.closed + self.backpressure
    }

    /// Total recipients attempted.
    #[must_use]
    pub const fn recipients(&self) -> usize {
        self.delivered + self.failed()
    }

    fn record(&mut self, result: Result<(), DeliveryError>) {
        match result {
            Ok(()) => self.delivered += 1,
            Err(DeliveryError::Closed) => self.closed += 1,
            Err(DeliveryError::Backpressure) => self.backpressure += 1,
        }
    }
}

/// Routes feed frames to the current subscribers of their channel.
///
/// Works on a copy of the subscriber set, so delivery never holds the
/// registry lock. A failing recipient is logged and skipped.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    registry: Arc<SubscriptionRegistry<ClientHandle>>,
}

impl Dispatcher {
    /// Create a dispatcher over a registry.
    #[must_use]
    pub const fn new(registry: Arc<SubscriptionRegistry<ClientHandle>>) -> Self {
        Self { registry }
    }

    /// Deliver `frame` unmodified to every subscriber of `channel`.
    pub fn dispatch(&self, channel: &str, frame: &Arc<str>) -> DispatchReport {
        let mut report = DispatchReport::default();

        for client in self.registry.subscribers(channel) {
            let result = client.deliver(frame);
            if let Err(e) = result {
                tracing::debug!(
                    client_id = client.id(),
                    channel,
                    error = %e,
                    "Dropped frame for client"
                );
            }
            report.record(result);
        }

        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::ports::ClientSink;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct RecordingSink {
        frames: Mutex<Vec<String>>,
    }

    impl ClientSink for RecordingSink {
        fn deliver(&self, frame: &Arc<str>) -> Result<(), DeliveryError> {
            self.frames.lock().push(frame.to_string());
            Ok(())
        }
    }

    struct FailingSink(DeliveryError);

    impl ClientSink for FailingSink {
        fn deliver(&self, _frame: &Arc<str>) -> Result<(), DeliveryError> {
            Err(self.0)
        }
    }

    fn frame(text: &str) -> Arc<str> {
        Arc::from(text)
    }

    #[test]
    fn delivers_to_each_subscriber() {
        let registry = Arc::new(SubscriptionRegistry::new());
        let a = Arc::new(RecordingSink::default());
        let b = Arc::new(RecordingSink::default());
        registry.add_subscriptions(&ClientHandle::new(1, a.clone()), &["ticker.x".into()]);
        registry.add_subscriptions(&ClientHandle::new(2, b.clone()), &["ticker.x".into()]);

        let raw = r#"{"jsonrpc":"2.0","method":"subscription","params":{"channel":"ticker.x","data":{}}}"#;
        let report = Dispatcher::new(registry).dispatch("ticker.x", &frame(raw));

        assert_eq!(report.delivered, 2);
        assert_eq!(a.frames.lock().as_slice(), [raw.to_string()]);
        assert_eq!(b.frames.lock().as_slice(), [raw.to_string()]);
    }

    #[test]
    fn skips_other_channels() {
        let registry = Arc::new(SubscriptionRegistry::new());
        let a = Arc::new(RecordingSink::default());
        registry.add_subscriptions(&ClientHandle::new(1, a.clone()), &["ticker.x".into()]);

        let report = Dispatcher::new(registry).dispatch("ticker.y", &frame("{}"));

        assert_eq!(report, DispatchReport::default());
        assert!(a.frames.lock().is_empty());
    }

    #[test]
    fn failing_recipient_does_not_block_others() {
        let registry = Arc::new(SubscriptionRegistry::new());
        let healthy = Arc::new(RecordingSink::default());
        registry.add_subscriptions(
            &ClientHandle::new(1, Arc::new(FailingSink(DeliveryError::Closed))),
            &["book.x".into()],
        );
        registry.add_subscriptions(
            &ClientHandle::new(2, Arc::new(FailingSink(DeliveryError::Backpressure))),
            &["book.x".into()],
        );
        registry.add_subscriptions(&ClientHandle::new(3, healthy.clone()), &["book.x".into()]);

        let report = Dispatcher::new(registry).dispatch("book.x", &frame("payload"));

        assert_eq!(report.delivered, 1);
        assert_eq!(report.closed, 1);
        assert_eq!(report.backpressure, 1);
        assert_eq!(report.failed(), 2);
        assert_eq!(report.recipients(), 3);
        assert_eq!(healthy.frames.lock().len(), 1);
    }
}
