//! JSON codec for signaling messages.
//!
//! Each message is one JSON document, carried in one WebSocket text frame.

use crate::message::{SignalReply, SignalRequest};

/// Error type for codec operations
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// Frame is empty
    #[error("Empty message")]
    Empty,

    /// Frame is not a valid message
    #[error("Invalid message format: {0}")]
    InvalidFormat(String),

    /// Message could not be serialized
    #[error("Encoding failed: {0}")]
    Encode(String),
}

/// Decode a client message.
///
/// # Errors
///
/// Returns an error if the frame is empty or is not a known message.
pub fn decode_request(text: &str) -> Result<SignalRequest, CodecError> {
    decode(text)
}

/// Encode a client message.
///
/// # Errors
///
/// Returns an error if serialization fails.
pub fn encode_request(request: &SignalRequest) -> Result<String, CodecError> {
    serde_json::to_string(request).map_err(|e| CodecError::Encode(e.to_string()))
}

/// Decode a service message.
///
/// # Errors
///
/// Returns an error if the frame is empty or is not a known message.
pub fn decode_reply(text: &str) -> Result<SignalReply, CodecError> {
    decode(text)
}

/// Encode a service message.
///
/// # Errors
///
/// Returns an error if serialization fails.
pub fn encode_reply(reply: &SignalReply) -> Result<String, CodecError> {
    serde_json::to_string(reply).map_err(|e| CodecError::Encode(e.to_string()))
}

fn decode<T: serde::de::DeserializeOwned>(text: &str) -> Result<T, CodecError> {
    if text.trim().is_empty() {
        return Err(CodecError::Empty);
    }
    serde_json::from_str(text).map_err(|e| CodecError::InvalidFormat(e.to_string()))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::message::{JoinRequest, Target, Trickle};
    use crate::stream::StreamEvent;

    #[test]
    fn test_decode_empty_frame() {
        assert!(matches!(decode_request(""), Err(CodecError::Empty)));
        assert!(matches!(decode_request("  \n"), Err(CodecError::Empty)));
    }

    #[test]
    fn test_decode_unknown_message() {
        let result = decode_request(r#"{"leave":{}}"#);
        assert!(matches!(result, Err(CodecError::InvalidFormat(_))));
    }

    #[test]
    fn test_decode_not_json() {
        let result = decode_request("join room-1");
        assert!(matches!(result, Err(CodecError::InvalidFormat(_))));
    }

    #[test]
    fn test_request_encodes_to_tagged_json() {
        let request = SignalRequest::Join(JoinRequest {
            room_id: "room-1".into(),
            participant_id: "alice".into(),
        });
        let text = encode_request(&request).unwrap();

        assert_eq!(
            text,
            r#"{"join":{"room_id":"room-1","participant_id":"alice"}}"#
        );
        assert_eq!(decode_request(&text).unwrap(), request);
    }

    #[test]
    fn test_trickle_keeps_candidate_opaque() {
        let reply = SignalReply::Trickle(Trickle {
            target: Target::Subscriber,
            init: r#"{"candidate":"candidate:1"}"#.to_string(),
        });
        let text = encode_reply(&reply).unwrap();
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();

        assert!(value["trickle"]["init"].is_string());
        assert_eq!(value["trickle"]["target"], "subscriber");
    }

    #[test]
    fn test_decode_stream_event_reply() {
        let text = r#"{"stream_event":{"state":"REMOVE","streams":[]}}"#;
        assert_eq!(
            decode_reply(text).unwrap(),
            SignalReply::StreamEvent(StreamEvent::remove(Vec::new()))
        );
    }
}
