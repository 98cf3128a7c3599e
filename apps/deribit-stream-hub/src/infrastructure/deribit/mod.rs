//! Deribit Feed Adapter
//!
//! JSON-RPC 2.0 over one public WebSocket connection:
//!
//! - `messages`: outbound requests and request ids
//! - `codec`: inbound frame classification
//! - `heartbeat` / `reconnect`: liveness and retry schedule
//! - `state`: connection state for health reporting
//! - `upstream`: the connection task and its command handle

pub mod codec;
pub mod heartbeat;
pub mod messages;
pub mod reconnect;
pub mod state;
pub mod upstream;

pub use codec::{CodecError, FeedMessage};
pub use heartbeat::{HeartbeatConfig, HeartbeatError, HeartbeatState};
pub use messages::{RequestIds, RpcMethod, RpcRequest};
pub use reconnect::{ReconnectConfig, ReconnectPolicy};
pub use state::{ConnectionState, FeedState};
pub use upstream::{
    CommandReceiver, UpstreamCommand, UpstreamConfig, UpstreamConnection, UpstreamError,
    UpstreamHandle,
};
