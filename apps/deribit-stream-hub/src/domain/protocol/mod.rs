//! Downstream Session Protocol
//!
//! One JSON text frame per message.
//!
//! - Client → hub: `{"op": "subscribe" | "unsubscribe", "channels": [..]}`
//! - Hub → client: `{"type": "ok", "op": .., "channels": [..]}`,
//!   `{"type": "error", "error": ..}`, or a raw feed `subscription` frame
//!   passed through byte-for-byte.

use serde::Serialize;
use serde_json::Value;

/// Error text when no requested channel passed validation.
pub const NO_VALID_CHANNELS: &str = "no valid channels";

/// Error text for an `op` other than subscribe/unsubscribe.
pub const UNKNOWN_OP: &str = "unknown op";

/// Subscription operation requested by a client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    /// Start receiving channels.
    Subscribe,
    /// Stop receiving channels.
    Unsubscribe,
}

impl Operation {
    /// Parse the `op` field.
    #[must_use]
    pub fn parse(op: &str) -> Option<Self> {
        match op {
            "subscribe" => Some(Self::Subscribe),
            "unsubscribe" => Some(Self::Unsubscribe),
            _ => None,
        }
    }

    /// Wire name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Subscribe => "subscribe",
            Self::Unsubscribe => "unsubscribe",
        }
    }
}

/// A decoded client request.
///
/// Parsing is lenient about content: a missing or non-string `op` becomes
/// `None`, and only string entries of `channels` are kept.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientRequest {
    /// Requested operation, if recognised.
    pub op: Option<Operation>,
    /// String entries of the `channels` array, in request order.
    pub channels: Vec<String>,
}

/// A frame that is not a JSON object.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// Not valid JSON.
    #[error("malformed JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// Valid JSON but not an object.
    #[error("request must be a JSON object")]
    NotAnObject,
}

impl ClientRequest {
    /// Decode a client text frame.
    ///
    /// # Errors
    ///
    /// Returns `ProtocolError` if the frame is not a JSON object. Such a
    /// frame ends the session.
    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        let value: Value = serde_json::from_str(text)?;
        let Value::Object(fields) = value else {
            return Err(ProtocolError::NotAnObject);
        };

        let op = fields
            .get("op")
            .and_then(Value::as_str)
            .and_then(Operation::parse);

        let channels = match fields.get("channels") {
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(|v| v.as_str().map(ToString::to_string))
                .collect(),
            _ => Vec::new(),
        };

        Ok(Self { op, channels })
    }
}

/// A reply sent to a client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ServerMessage {
    /// Request accepted.
    Ok {
        /// Operation that was applied.
        op: Operation,
        /// Validated channels from the request.
        channels: Vec<String>,
    },
    /// Request rejected; the session stays open.
    Error {
        /// Human-readable reason.
        error: String,
    },
}

impl ServerMessage {
    /// Acknowledge an operation.
    #[must_use]
    pub const fn ok(op: Operation, channels: Vec<String>) -> Self {
        Self::Ok { op, channels }
    }

    /// Reject a request.
    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            error: message.into(),
        }
    }

    /// Encode as a JSON text frame.
    #[must_use]
    pub fn to_json(&self) -> String {
        // Only string and enum fields, serialization cannot fail
        serde_json::to_string(self).unwrap_or_default()
    }
}
