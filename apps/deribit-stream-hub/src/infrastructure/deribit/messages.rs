//! Outbound JSON-RPC Requests
//!
//! Every request carries a fresh id from `RequestIds`. Replies are not
//! awaited, so ids only need to be unique per connection task.

use std::collections::BTreeSet;
use std::time::Duration;

use serde::{Serialize, Serializer};

use crate::domain::channel::Channel;

/// JSON-RPC protocol version sent with every request.
pub const JSONRPC_VERSION: &str = "2.0";

// =============================================================================
// Methods
// =============================================================================

/// Feed methods the hub calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RpcMethod {
    /// Ask the feed to send heartbeats at a fixed interval.
    SetHeartbeat,
    /// Subscribe to channels.
    Subscribe,
    /// Unsubscribe from channels.
    Unsubscribe,
    /// Answer a heartbeat test request.
    Test,
}

impl RpcMethod {
    /// Wire name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::SetHeartbeat => "public/set_heartbeat",
            Self::Subscribe => "public/subscribe",
            Self::Unsubscribe => "public/unsubscribe",
            Self::Test => "public/test",
        }
    }
}

impl Serialize for RpcMethod {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

// =============================================================================
// Request
// =============================================================================

/// Request parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum RpcParams {
    /// `public/set_heartbeat`
    Heartbeat {
        /// Interval in seconds.
        interval: u64,
    },
    /// `public/subscribe` and `public/unsubscribe`
    Channels {
        /// Channels in sorted order.
        channels: Vec<Channel>,
    },
    /// `public/test`
    Empty {},
}

/// A JSON-RPC 2.0 request to the feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RpcRequest {
    jsonrpc: &'static str,
    /// Correlation id.
    pub id: u64,
    /// Method name.
    pub method: RpcMethod,
    /// Method parameters.
    pub params: RpcParams,
}

impl RpcRequest {
    const fn new(id: u64, method: RpcMethod, params: RpcParams) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            id,
            method,
            params,
        }
    }

    /// `public/set_heartbeat` with the interval in whole seconds.
    #[must_use]
    pub const fn set_heartbeat(id: u64, interval: Duration) -> Self {
        Self::new(
            id,
            RpcMethod::SetHeartbeat,
            RpcParams::Heartbeat {
                interval: interval.as_secs(),
            },
        )
    }

    /// `public/subscribe` listing `channels` in sorted order.
    #[must_use]
    pub fn subscribe(id: u64, channels: &BTreeSet<Channel>) -> Self {
        Self::new(
            id,
            RpcMethod::Subscribe,
            RpcParams::Channels {
                channels: channels.iter().cloned().collect(),
            },
        )
    }

    /// `public/unsubscribe` listing `channels` in sorted order.
    #[must_use]
    pub fn unsubscribe(id: u64, channels: &BTreeSet<Channel>) -> Self {
        Self::new(
            id,
            RpcMethod::Unsubscribe,
            RpcParams::Channels {
                channels: channels.iter().cloned().collect(),
            },
        )
    }

    /// `public/test` with empty params.
    #[must_use]
    pub const fn test(id: u64) -> Self {
        Self::new(id, RpcMethod::Test, RpcParams::Empty {})
    }

    /// Serialize to a JSON text frame.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

// =============================================================================
// Request Ids
// =============================================================================

/// Monotonically increasing request id source.
///
/// The first id handed out is 2.
#[derive(Debug)]
pub struct RequestIds {
    last: u64,
}

impl Default for RequestIds {
    fn default() -> Self {
        Self { last: 1 }
    }
}

impl RequestIds {
    /// Create a new id source.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Next unused id.
    pub const fn next_id(&mut self) -> u64 {
        self.last += 1;
        self.last
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Value, json};

    fn wire(request: &RpcRequest) -> Value {
        serde_json::from_str(&request.to_json().unwrap()).unwrap()
    }

    #[test]
    fn set_heartbeat_format() {
        let request = RpcRequest::set_heartbeat(2, Duration::from_secs(30));
        assert_eq!(
            wire(&request),
            json!({
                "jsonrpc": "2.0",
                "id": 2,
                "method": "public/set_heartbeat",
                "params": {"interval": 30}
            })
        );
    }

    #[test]
    fn subscribe_lists_sorted_channels() {
        let channels: BTreeSet<Channel> = ["trades.BTC-PERPETUAL.raw", "book.BTC-PERPETUAL.100ms"]
            .into_iter()
            .map(String::from)
            .collect();

        let request = RpcRequest::subscribe(7, &channels);
        assert_eq!(
            wire(&request),
            json!({
                "jsonrpc": "2.0",
                "id": 7,
                "method": "public/subscribe",
                "params": {"channels": ["book.BTC-PERPETUAL.100ms", "trades.BTC-PERPETUAL.raw"]}
            })
        );
    }

    #[test]
    fn unsubscribe_format() {
        let channels = BTreeSet::from(["quote.ETH-PERPETUAL".to_string()]);
        let json = wire(&RpcRequest::unsubscribe(3, &channels));

        assert_eq!(json["method"], "public/unsubscribe");
        assert_eq!(json["params"]["channels"], json!(["quote.ETH-PERPETUAL"]));
    }

    #[test]
    fn test_request_has_empty_params() {
        assert_eq!(
            wire(&RpcRequest::test(9)),
            json!({"jsonrpc": "2.0", "id": 9, "method": "public/test", "params": {}})
        );
    }

    #[test]
    fn ids_increase() {
        let mut ids = RequestIds::new();
        assert_eq!(ids.next_id(), 2);
        assert_eq!(ids.next_id(), 3);
        assert_eq!(ids.next_id(), 4);
    }
}
