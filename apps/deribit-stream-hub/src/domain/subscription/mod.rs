//! Subscription Registry
//!
//! Tracks which downstream clients want which feed channels and derives the
//! live channel set (channels with at least one subscriber).
//!
//! # Design
//!
//! Every mutation reports the channels whose liveness changed:
//! - `add_subscriptions` returns channels that went from 0 to 1 subscriber
//! - `remove_subscriptions` / `remove_client` return channels that went to 0
//!
//! Those transitions are exactly what must be sent upstream, so many clients
//! can share a channel while the feed sees one subscription. All operations
//! run under a single mutex and never await, so the lock is never held
//! across network I/O.
//!
//! The `*_then` variants hand the transitions to a closure before the lock
//! is released. Callers queue upstream requests there so that the queue
//! order matches the order in which channels went live or dark.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::hash::Hash;

use parking_lot::Mutex;

use super::channel::Channel;

// =============================================================================
// Subscription Changes
// =============================================================================

/// Changes to upstream subscriptions.
///
/// Sets are ordered so upstream requests list channels deterministically.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubscriptionChanges {
    /// Channels that became live.
    pub subscribe: BTreeSet<Channel>,
    /// Channels that are no longer live.
    pub unsubscribe: BTreeSet<Channel>,
}

impl SubscriptionChanges {
    /// Check if there are any changes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.subscribe.is_empty() && self.unsubscribe.is_empty()
    }

    /// Create changes with only subscribes.
    #[must_use]
    pub fn subscribe_only(channels: impl IntoIterator<Item = Channel>) -> Self {
        Self {
            subscribe: channels.into_iter().collect(),
            unsubscribe: BTreeSet::new(),
        }
    }

    /// Create changes with only unsubscribes.
    #[must_use]
    pub fn unsubscribe_only(channels: impl IntoIterator<Item = Channel>) -> Self {
        Self {
            subscribe: BTreeSet::new(),
            unsubscribe: channels.into_iter().collect(),
        }
    }
}

// =============================================================================
// Registry
// =============================================================================

/// Channel → subscriber set, guarded by one mutex.
///
/// Generic over the client handle so the domain stays free of transport
/// types; handles compare by identity.
///
/// # Example
///
/// ```rust
/// use deribit_stream_hub::domain::subscription::SubscriptionRegistry;
///
/// let registry = SubscriptionRegistry::<u64>::new();
/// let ticker = "ticker.BTC-PERPETUAL.100ms".to_string();
///
/// // First interest makes the channel live
/// let changes = registry.add_subscriptions(&1, std::slice::from_ref(&ticker));
/// assert!(changes.subscribe.contains(&ticker));
///
/// // Second client shares it, nothing to tell upstream
/// let changes = registry.add_subscriptions(&2, std::slice::from_ref(&ticker));
/// assert!(changes.is_empty());
///
/// // Client 1 leaves, client 2 still holds it
/// let changes = registry.remove_client(&1);
/// assert!(changes.is_empty());
///
/// // Last subscriber leaves, unsubscribe upstream
/// let changes = registry.remove_subscriptions(&2, std::slice::from_ref(&ticker));
/// assert!(changes.unsubscribe.contains(&ticker));
/// ```
#[derive(Debug)]
pub struct SubscriptionRegistry<H> {
    channels: Mutex<HashMap<Channel, HashSet<H>>>,
}

impl<H> Default for SubscriptionRegistry<H> {
    fn default() -> Self {
        Self {
            channels: Mutex::new(HashMap::new()),
        }
    }
}

impl<H: Clone + Eq + Hash> SubscriptionRegistry<H> {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `client` to each channel's subscriber set.
    ///
    /// Returns the channels that became live and must be subscribed upstream.
    pub fn add_subscriptions(&self, client: &H, channels: &[Channel]) -> SubscriptionChanges {
        self.add_subscriptions_then(client, channels, |_| ()).0
    }

    /// `add_subscriptions`, running `then` on the changes before the lock is
    /// released.
    ///
    /// Anything `then` records is ordered exactly like the registry
    /// mutations. It must not block.
    pub fn add_subscriptions_then<R>(
        &self,
        client: &H,
        channels: &[Channel],
        then: impl FnOnce(&SubscriptionChanges) -> R,
    ) -> (SubscriptionChanges, R) {
        let mut map = self.channels.lock();
        let mut newly_live = BTreeSet::new();

        for channel in channels {
            let subscribers = map.entry(channel.clone()).or_default();
            if subscribers.is_empty() {
                newly_live.insert(channel.clone());
            }
            subscribers.insert(client.clone());
        }

        let changes = SubscriptionChanges::subscribe_only(newly_live);
        let result = then(&changes);
        (changes, result)
    }

    /// Remove `client` from each channel's subscriber set.
    ///
    /// Returns the channels left without subscribers, which must be
    /// unsubscribed upstream. Channels the client never held are ignored.
    pub fn remove_subscriptions(&self, client: &H, channels: &[Channel]) -> SubscriptionChanges {
        self.remove_subscriptions_then(client, channels, |_| ()).0
    }

    /// `remove_subscriptions`, running `then` under the lock.
    pub fn remove_subscriptions_then<R>(
        &self,
        client: &H,
        channels: &[Channel],
        then: impl FnOnce(&SubscriptionChanges) -> R,
    ) -> (SubscriptionChanges, R) {
        let mut map = self.channels.lock();
        let mut emptied = BTreeSet::new();

        for channel in channels {
            let Some(subscribers) = map.get_mut(channel) else {
                continue;
            };

            if subscribers.remove(client) && subscribers.is_empty() {
                map.remove(channel);
                emptied.insert(channel.clone());
            }
        }

        let changes = SubscriptionChanges::unsubscribe_only(emptied);
        let result = then(&changes);
        (changes, result)
    }

    /// Remove `client` from every channel.
    ///
    /// Used when a session ends for any reason.
    pub fn remove_client(&self, client: &H) -> SubscriptionChanges {
        self.remove_client_then(client, |_| ()).0
    }

    /// `remove_client`, running `then` under the lock.
    pub fn remove_client_then<R>(
        &self,
        client: &H,
        then: impl FnOnce(&SubscriptionChanges) -> R,
    ) -> (SubscriptionChanges, R) {
        let mut map = self.channels.lock();
        let mut emptied = BTreeSet::new();

        map.retain(|channel, subscribers| {
            if subscribers.remove(client) && subscribers.is_empty() {
                emptied.insert(channel.clone());
                return false;
            }
            true
        });

        let changes = SubscriptionChanges::unsubscribe_only(emptied);
        let result = then(&changes);
        (changes, result)
    }

    /// Copy of a channel's subscribers, safe to use after the lock is gone.
    #[must_use]
    pub fn subscribers(&self, channel: &str) -> Vec<H> {
        self.channels
            .lock()
            .get(channel)
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Channels with at least one subscriber, sorted.
    #[must_use]
    pub fn live_channels(&self) -> BTreeSet<Channel> {
        self.channels.lock().keys().cloned().collect()
    }

    /// Channels held by one client, sorted.
    #[must_use]
    pub fn client_channels(&self, client: &H) -> BTreeSet<Channel> {
        self.channels
            .lock()
            .iter()
            .filter(|(_, subscribers)| subscribers.contains(client))
            .map(|(channel, _)| channel.clone())
            .collect()
    }

    /// Whether a channel currently has subscribers.
    #[must_use]
    pub fn is_live(&self, channel: &str) -> bool {
        self.channels.lock().contains_key(channel)
    }

    /// Snapshot statistics.
    #[must_use]
    pub fn stats(&self) -> RegistryStats {
        let map = self.channels.lock();
        let clients: HashSet<&H> = map.values().flatten().collect();

        RegistryStats {
            channel_count: map.len(),
            client_count: clients.len(),
            subscription_count: map.values().map(HashSet::len).sum(),
        }
    }
}

// =============================================================================
// Statistics
// =============================================================================

/// Registry statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegistryStats {
    /// Number of live channels.
    pub channel_count: usize,
    /// Number of distinct clients holding at least one channel.
    pub client_count: usize,
    /// Total (client, channel) pairs.
    pub subscription_count: usize,
}

// =============================================================================
// Tests
// =============================================================================
