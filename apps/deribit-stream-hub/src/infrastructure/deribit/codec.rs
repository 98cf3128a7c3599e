//! Inbound Frame Codec
//!
//! Classifies feed text frames. Only the fields needed for routing are
//! inspected; subscription payloads are never parsed beyond `params.channel`
//! so the original text can be forwarded byte-for-byte.

use serde_json::{Map, Value};

/// Errors decoding an inbound frame. Both are fatal to the connection.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// Not valid JSON.
    #[error("malformed JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// Valid JSON but not an object.
    #[error("frame is not a JSON object")]
    NotAnObject,
}

/// A classified feed frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedMessage {
    /// Heartbeat asking for a `public/test` reply.
    TestRequest,
    /// Any other heartbeat notification.
    Heartbeat,
    /// Channel data to fan out.
    Subscription {
        /// Channel the data belongs to.
        channel: String,
    },
    /// Reply to one of our requests.
    Response {
        /// Correlation id, if present.
        id: Option<u64>,
        /// Error message if the feed rejected the request.
        error: Option<String>,
    },
    /// Anything else, including subscription frames without a channel.
    Other,
}

impl FeedMessage {
    /// Label for metrics.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::TestRequest => "test_request",
            Self::Heartbeat => "heartbeat",
            Self::Subscription { .. } => "subscription",
            Self::Response { .. } => "response",
            Self::Other => "other",
        }
    }
}

/// Classify a feed text frame.
///
/// # Errors
///
/// Returns `CodecError` if the frame is not a JSON object.
pub fn decode(text: &str) -> Result<FeedMessage, CodecError> {
    let Value::Object(frame) = serde_json::from_str::<Value>(text)? else {
        return Err(CodecError::NotAnObject);
    };

    let message = match frame.get("method").and_then(Value::as_str) {
        Some("heartbeat") => decode_heartbeat(&frame),
        Some("subscription") => decode_subscription(&frame),
        Some(_) => FeedMessage::Other,
        None if frame.contains_key("result") || frame.contains_key("error") => {
            decode_response(&frame)
        }
        None => FeedMessage::Other,
    };

    Ok(message)
}

fn params(frame: &Map<String, Value>) -> Option<&Map<String, Value>> {
    frame.get("params").and_then(Value::as_object)
}

fn decode_heartbeat(frame: &Map<String, Value>) -> FeedMessage {
    let kind = params(frame)
        .and_then(|p| p.get("type"))
        .and_then(Value::as_str);

    if kind == Some("test_request") {
        FeedMessage::TestRequest
    } else {
        FeedMessage::Heartbeat
    }
}

fn decode_subscription(frame: &Map<String, Value>) -> FeedMessage {
    match params(frame)
        .and_then(|p| p.get("channel"))
        .and_then(Value::as_str)
    {
        Some(channel) if !channel.is_empty() => FeedMessage::Subscription {
            channel: channel.to_string(),
        },
        _ => FeedMessage::Other,
    }
}

fn decode_response(frame: &Map<String, Value>) -> FeedMessage {
    let id = frame.get("id").and_then(Value::as_u64);
    let error = frame.get("error").map(|e| {
        e.get("message")
            .and_then(Value::as_str)
            .map_or_else(|| e.to_string(), ToString::to_string)
    });

    FeedMessage::Response { id, error }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test]
    fn test_request_heartbeat() {
        let msg = decode(
            r#"{"jsonrpc":"2.0","method":"heartbeat","params":{"type":"test_request"}}"#,
        )
        .unwrap();
        assert_eq!(msg, FeedMessage::TestRequest);
        assert_eq!(msg.kind(), "test_request");
    }

    #[test_case(r#"{"jsonrpc":"2.0","method":"heartbeat","params":{"type":"heartbeat"}}"# ; "plain heartbeat")]
    #[test_case(r#"{"jsonrpc":"2.0","method":"heartbeat"}"# ; "no params")]
    #[test_case(r#"{"jsonrpc":"2.0","method":"heartbeat","params":[1]}"# ; "params not object")]
    fn other_heartbeats(frame: &str) {
        assert_eq!(decode(frame).unwrap(), FeedMessage::Heartbeat);
    }

    #[test]
    fn subscription_channel() {
        let msg = decode(
            r#"{"jsonrpc":"2.0","method":"subscription","params":{"channel":"ticker.BTC-PERPETUAL.100ms","data":{"best_bid_price":1.0}}}"#,
        )
        .unwrap();
        assert_eq!(
            msg,
            FeedMessage::Subscription {
                channel: "ticker.BTC-PERPETUAL.100ms".to_string()
            }
        );
    }

    #[test_case(r#"{"jsonrpc":"2.0","method":"subscription","params":{"data":{}}}"# ; "missing channel")]
    #[test_case(r#"{"jsonrpc":"2.0","method":"subscription","params":{"channel":""}}"# ; "empty channel")]
    #[test_case(r#"{"jsonrpc":"2.0","method":"subscription","params":{"channel":42}}"# ; "numeric channel")]
    #[test_case(r#"{"jsonrpc":"2.0","method":"subscription"}"# ; "no params")]
    fn subscription_without_channel_is_other(frame: &str) {
        assert_eq!(decode(frame).unwrap(), FeedMessage::Other);
    }

    #[test]
    fn success_response() {
        let msg = decode(r#"{"jsonrpc":"2.0","id":3,"result":["ticker.BTC-PERPETUAL.100ms"]}"#)
            .unwrap();
        assert_eq!(
            msg,
            FeedMessage::Response {
                id: Some(3),
                error: None
            }
        );
    }

    #[test]
    fn error_response() {
        let msg = decode(
            r#"{"jsonrpc":"2.0","id":4,"error":{"code":10001,"message":"invalid_params"}}"#,
        )
        .unwrap();
        assert_eq!(
            msg,
            FeedMessage::Response {
                id: Some(4),
                error: Some("invalid_params".to_string())
            }
        );
    }

    #[test]
    fn unknown_method_is_other() {
        let msg = decode(r#"{"jsonrpc":"2.0","method":"announcement","params":{}}"#).unwrap();
        assert_eq!(msg, FeedMessage::Other);
        assert_eq!(decode("{}").unwrap(), FeedMessage::Other);
    }

    #[test]
    fn non_object_frames_fail() {
        assert!(matches!(decode("not json"), Err(CodecError::Json(_))));
        assert!(matches!(decode("[1,2]"), Err(CodecError::NotAnObject)));
        assert!(matches!(decode("\"text\""), Err(CodecError::NotAnObject)));
    }
}
