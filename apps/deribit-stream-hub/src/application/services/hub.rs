//! Market Hub Service
//!
//! Applies client subscribe/unsubscribe requests to the registry and
//! forwards only liveness transitions to the feed.
//!
//! Flow for one request:
//!
//! 1. Keep string channels that pass the `ChannelPolicy`
//! 2. Mutate the registry and, still under its lock, queue the transitions
//!    on the upstream port
//! 3. Acknowledge every valid channel the client asked for
//!
//! Queueing under the lock keeps the feed's request order identical to the
//! registry's transition order across concurrent sessions. The port only
//! enqueues; network I/O happens on the connection task.

use std::collections::BTreeSet;
use std::sync::Arc;

use crate::application::ports::{ClientHandle, ClientSink, UpstreamPort, UpstreamPortError};
use crate::domain::channel::{Channel, ChannelPolicy};
use crate::domain::protocol::{
    ClientRequest, NO_VALID_CHANNELS, Operation, ServerMessage, UNKNOWN_OP,
};
use crate::domain::subscription::{RegistryStats, SubscriptionChanges, SubscriptionRegistry};

use super::session::ClientSession;

/// Shared service behind every downstream session.
pub struct MarketHub {
    policy: ChannelPolicy,
    registry: Arc<SubscriptionRegistry<ClientHandle>>,
    upstream: Arc<dyn UpstreamPort>,
}

impl MarketHub {
    /// Create a hub.
    #[must_use]
    pub fn new(
        policy: ChannelPolicy,
        registry: Arc<SubscriptionRegistry<ClientHandle>>,
        upstream: Arc<dyn UpstreamPort>,
    ) -> Self {
        Self {
            policy,
            registry,
            upstream,
        }
    }

    /// Start a session for a new downstream connection.
    #[must_use]
    pub fn open_session(self: &Arc<Self>, sink: Arc<dyn ClientSink>) -> ClientSession {
        let client = ClientHandle::with_random_id(sink);
        tracing::debug!(client_id = client.id(), "Session opened");
        ClientSession::new(Arc::clone(self), client)
    }

    /// The subscription registry.
    #[must_use]
    pub const fn registry(&self) -> &Arc<SubscriptionRegistry<ClientHandle>> {
        &self.registry
    }

    /// Registry statistics.
    #[must_use]
    pub fn stats(&self) -> RegistryStats {
        self.registry.stats()
    }

    /// Validate and apply one client request.
    pub fn handle_request(&self, client: &ClientHandle, request: ClientRequest) -> ServerMessage {
        let valid = self.policy.filter_valid(&request.channels);
        if valid.is_empty() {
            tracing::debug!(
                client_id = client.id(),
                requested = ?request.channels,
                "Rejected request with no valid channels"
            );
            return ServerMessage::error(NO_VALID_CHANNELS);
        }

        match request.op {
            Some(Operation::Subscribe) => self.subscribe(client, valid),
            Some(Operation::Unsubscribe) => self.unsubscribe(client, valid),
            None => ServerMessage::error(UNKNOWN_OP),
        }
    }

    /// Subscribe a client to already-validated channels.
    pub fn subscribe(&self, client: &ClientHandle, channels: Vec<Channel>) -> ServerMessage {
        let (changes, queued) = self.registry.add_subscriptions_then(client, &channels, |c| {
            queue(&c.subscribe, |set| self.upstream.subscribe(set))
        });

        tracing::debug!(
            client_id = client.id(),
            channels = ?channels,
            newly_live = ?changes.subscribe,
            "Client subscribed"
        );
        if let Err(e) = queued {
            tracing::warn!(error = %e, channels = ?changes.subscribe, "Upstream subscribe not queued");
        }

        ServerMessage::ok(Operation::Subscribe, channels)
    }

    /// Unsubscribe a client from already-validated channels.
    pub fn unsubscribe(&self, client: &ClientHandle, channels: Vec<Channel>) -> ServerMessage {
        let (changes, queued) =
            self.registry
                .remove_subscriptions_then(client, &channels, |c| {
                    queue(&c.unsubscribe, |set| self.upstream.unsubscribe(set))
                });

        tracing::debug!(
            client_id = client.id(),
            channels = ?channels,
            emptied = ?changes.unsubscribe,
            "Client unsubscribed"
        );
        if let Err(e) = queued {
            tracing::warn!(error = %e, channels = ?changes.unsubscribe, "Upstream unsubscribe not queued");
        }

        ServerMessage::ok(Operation::Unsubscribe, channels)
    }

    /// Drop every subscription a client holds and unsubscribe the channels
    /// that went dark.
    pub fn release_client(&self, client: &ClientHandle) -> SubscriptionChanges {
        let (changes, queued) = self.registry.remove_client_then(client, |c| {
            queue(&c.unsubscribe, |set| self.upstream.unsubscribe(set))
        });

        tracing::debug!(
            client_id = client.id(),
            emptied = ?changes.unsubscribe,
            "Client released"
        );
        if let Err(e) = queued {
            tracing::warn!(error = %e, channels = ?changes.unsubscribe, "Upstream unsubscribe not queued");
        }

        changes
    }
}

fn queue(
    channels: &BTreeSet<Channel>,
    send: impl FnOnce(&BTreeSet<Channel>) -> Result<(), UpstreamPortError>,
) -> Result<(), UpstreamPortError> {
    if channels.is_empty() {
        return Ok(());
    }
    send(channels)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::ports::{DeliveryError, MockUpstreamPort, UpstreamPortError};
    use mockall::predicate::eq;

    struct NullSink;

    impl ClientSink for NullSink {
        fn deliver(&self, _frame: &Arc<str>) -> Result<(), DeliveryError> {
            Ok(())
        }
    }

    fn hub_with(upstream: MockUpstreamPort) -> MarketHub {
        MarketHub::new(
            ChannelPolicy::default(),
            Arc::new(SubscriptionRegistry::new()),
            Arc::new(upstream),
        )
    }

    fn client(id: u64) -> ClientHandle {
        ClientHandle::new(id, Arc::new(NullSink))
    }

    fn request(op: Option<Operation>, channels: &[&str]) -> ClientRequest {
        ClientRequest {
            op,
            channels: channels.iter().map(ToString::to_string).collect(),
        }
    }

    fn set(channels: &[&str]) -> BTreeSet<Channel> {
        channels.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn subscribe_sends_newly_live_channels_once() {
        let mut upstream = MockUpstreamPort::new();
        upstream
            .expect_subscribe()
            .with(eq(set(&["ticker.BTC-PERPETUAL.100ms"])))
            .times(1)
            .returning(|_| Ok(()));
        let hub = hub_with(upstream);

        let reply = hub
            .handle_request(
                &client(1),
                request(Some(Operation::Subscribe), &["ticker.BTC-PERPETUAL.100ms"]),
            );
        assert_eq!(
            reply,
            ServerMessage::ok(
                Operation::Subscribe,
                vec!["ticker.BTC-PERPETUAL.100ms".to_string()]
            )
        );

        // Second client shares the channel; the mock would panic on a second call
        let reply = hub
            .handle_request(
                &client(2),
                request(Some(Operation::Subscribe), &["ticker.BTC-PERPETUAL.100ms"]),
            );
        assert!(matches!(reply, ServerMessage::Ok { .. }));
    }

    #[test]
    fn invalid_channels_are_filtered_from_ack() {
        let mut upstream = MockUpstreamPort::new();
        upstream
            .expect_subscribe()
            .with(eq(set(&["ticker.BTC-PERPETUAL.100ms"])))
            .times(1)
            .returning(|_| Ok(()));
        let hub = hub_with(upstream);

        let reply = hub
            .handle_request(
                &client(1),
                request(
                    Some(Operation::Subscribe),
                    &["not a channel!", "ticker.BTC-PERPETUAL.100ms"],
                ),
            );

        assert_eq!(
            reply,
            ServerMessage::ok(
                Operation::Subscribe,
                vec!["ticker.BTC-PERPETUAL.100ms".to_string()]
            )
        );
    }

    #[test]
    fn no_valid_channels_is_rejected_without_upstream_call() {
        let hub = hub_with(MockUpstreamPort::new());

        let reply = hub
            .handle_request(
                &client(1),
                request(Some(Operation::Subscribe), &["not a channel!", "user.orders.x"]),
            );

        assert_eq!(reply, ServerMessage::error(NO_VALID_CHANNELS));
        assert!(hub.registry().live_channels().is_empty());
    }

    #[test]
    fn unknown_op_is_rejected() {
        let hub = hub_with(MockUpstreamPort::new());

        let reply = hub
            .handle_request(&client(1), request(None, &["ticker.BTC-PERPETUAL.100ms"]));

        assert_eq!(reply, ServerMessage::error(UNKNOWN_OP));
        assert!(hub.registry().live_channels().is_empty());
    }

    #[test]
    fn validation_runs_before_op_check() {
        let hub = hub_with(MockUpstreamPort::new());

        let reply = hub.handle_request(&client(1), request(None, &["bad channel"]));

        assert_eq!(reply, ServerMessage::error(NO_VALID_CHANNELS));
    }

    #[test]
    fn unsubscribe_only_on_last_interest() {
        let mut upstream = MockUpstreamPort::new();
        upstream.expect_subscribe().times(1).returning(|_| Ok(()));
        upstream
            .expect_unsubscribe()
            .with(eq(set(&["book.ETH-PERPETUAL.100ms"])))
            .times(1)
            .returning(|_| Ok(()));
        let hub = hub_with(upstream);
        let channels = ["book.ETH-PERPETUAL.100ms"];

        hub.handle_request(&client(1), request(Some(Operation::Subscribe), &channels));
        hub.handle_request(&client(2), request(Some(Operation::Subscribe), &channels));

        let reply = hub
            .handle_request(&client(1), request(Some(Operation::Unsubscribe), &channels));
        assert_eq!(
            reply,
            ServerMessage::ok(
                Operation::Unsubscribe,
                vec!["book.ETH-PERPETUAL.100ms".to_string()]
            )
        );
        assert!(hub.registry().is_live("book.ETH-PERPETUAL.100ms"));

        hub.handle_request(&client(2), request(Some(Operation::Unsubscribe), &channels));
        assert!(!hub.registry().is_live("book.ETH-PERPETUAL.100ms"));
    }

    #[test]
    fn release_unsubscribes_emptied_channels() {
        let mut upstream = MockUpstreamPort::new();
        upstream.expect_subscribe().returning(|_| Ok(()));
        upstream
            .expect_unsubscribe()
            .with(eq(set(&["quote.BTC-PERPETUAL"])))
            .times(1)
            .returning(|_| Ok(()));
        let hub = hub_with(upstream);

        hub.handle_request(
            &client(1),
            request(
                Some(Operation::Subscribe),
                &["quote.BTC-PERPETUAL", "trades.BTC-PERPETUAL.raw"],
            ),
        );
        hub.handle_request(
            &client(2),
            request(Some(Operation::Subscribe), &["trades.BTC-PERPETUAL.raw"]),
        );

        hub.release_client(&client(1));

        assert!(hub.registry().client_channels(&client(1)).is_empty());
        assert_eq!(
            hub.registry().live_channels(),
            set(&["trades.BTC-PERPETUAL.raw"])
        );
    }

    #[test]
    fn upstream_failure_still_acknowledges() {
        let mut upstream = MockUpstreamPort::new();
        upstream
            .expect_subscribe()
            .returning(|_| Err(UpstreamPortError::Closed));
        let hub = hub_with(upstream);

        let reply = hub
            .handle_request(
                &client(1),
                request(Some(Operation::Subscribe), &["ticker.BTC-PERPETUAL.100ms"]),
            );

        assert!(matches!(reply, ServerMessage::Ok { .. }));
        assert!(hub.registry().is_live("ticker.BTC-PERPETUAL.100ms"));
    }

    #[test]
    fn unsubscribe_of_unheld_channel_is_acknowledged() {
        let hub = hub_with(MockUpstreamPort::new());

        let reply = hub
            .handle_request(
                &client(1),
                request(Some(Operation::Unsubscribe), &["ticker.BTC-PERPETUAL.100ms"]),
            );

        assert_eq!(
            reply,
            ServerMessage::ok(
                Operation::Unsubscribe,
                vec!["ticker.BTC-PERPETUAL.100ms".to_string()]
            )
        );
    }
}
