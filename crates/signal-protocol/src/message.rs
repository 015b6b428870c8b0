//! Inbound and outbound control messages.

use crate::error_code::ErrorCode;
use crate::stream::StreamEvent;
use crate::types::{ParticipantId, RoomId};
use serde::{Deserialize, Serialize};

/// Which of a participant's two transports a message refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Target {
    /// Transport carrying the participant's own media to the service.
    Publisher,
    /// Transport carrying other participants' media to the participant.
    Subscriber,
}

impl Target {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Target::Publisher => "publisher",
            Target::Subscriber => "subscriber",
        }
    }
}

/// SDP type of a session description.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SdpType {
    Offer,
    Answer,
}

/// Join a room as a participant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinRequest {
    pub room_id: RoomId,
    pub participant_id: ParticipantId,
}

/// A session description for one of the two transports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    pub target: Target,
    #[serde(rename = "type")]
    pub sdp_type: SdpType,
    pub sdp: String,
}

/// An ICE candidate for one of the two transports.
///
/// `init` is the JSON serialization of an [`IceCandidateInit`]; it is kept
/// opaque on the wire and parsed by the service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trickle {
    pub target: Target,
    pub init: String,
}

/// The `RTCIceCandidateInit` dictionary as browsers serialize it.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct IceCandidateInit {
    pub candidate: String,
    #[serde(rename = "sdpMid", default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
    #[serde(
        rename = "sdpMLineIndex",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub sdp_mline_index: Option<u16>,
    #[serde(
        rename = "usernameFragment",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub username_fragment: Option<String>,
}

/// Subscribe to or unsubscribe from tracks published by other participants.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    pub track_ids: Vec<String>,
    pub subscribe: bool,
}

/// Settings updates sent after joining.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateSettings {
    Subscription(Subscription),
}

/// Messages sent by a client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalRequest {
    Join(JoinRequest),
    Description(SessionDescription),
    Trickle(Trickle),
    UpdateSettings(UpdateSettings),
}

impl SignalRequest {
    /// Bounded message type label for logs and metrics.
    #[must_use]
    pub const fn message_type(&self) -> &'static str {
        match self {
            SignalRequest::Join(_) => "join",
            SignalRequest::Description(_) => "description",
            SignalRequest::Trickle(_) => "trickle",
            SignalRequest::UpdateSettings(_) => "update_settings",
        }
    }
}

/// A structured error reported to the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolError {
    pub code: ErrorCode,
    pub reason: String,
}

impl ProtocolError {
    #[must_use]
    pub fn new(code: ErrorCode, reason: impl Into<String>) -> Self {
        Self {
            code,
            reason: reason.into(),
        }
    }
}

/// Outcome of a join.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinReply {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ProtocolError>,
}

/// Messages sent by the service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalReply {
    Reply(JoinReply),
    StreamEvent(StreamEvent),
    Description(SessionDescription),
    Trickle(Trickle),
    Error(ProtocolError),
}

impl SignalReply {
    /// Shorthand for an `Error` message.
    #[must_use]
    pub fn error(code: ErrorCode, reason: impl Into<String>) -> Self {
        SignalReply::Error(ProtocolError::new(code, reason))
    }

    /// Bounded message type label for logs and metrics.
    #[must_use]
    pub const fn message_type(&self) -> &'static str {
        match self {
            SignalReply::Reply(_) => "reply",
            SignalReply::StreamEvent(_) => "stream_event",
            SignalReply::Description(_) => "description",
            SignalReply::Trickle(_) => "trickle",
            SignalReply::Error(_) => "error",
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn test_join_request_json_shape() {
        let json = r#"{"join":{"room_id":"room-1","participant_id":"alice"}}"#;
        let request: SignalRequest = serde_json::from_str(json).unwrap();

        assert_eq!(
            request,
            SignalRequest::Join(JoinRequest {
                room_id: RoomId::from("room-1"),
                participant_id: ParticipantId::from("alice"),
            })
        );
        assert_eq!(request.message_type(), "join");
    }

    #[test]
    fn test_description_uses_type_field() {
        let json = r#"{"description":{"target":"publisher","type":"offer","sdp":"v=0"}}"#;
        let request: SignalRequest = serde_json::from_str(json).unwrap();

        match request {
            SignalRequest::Description(desc) => {
                assert_eq!(desc.target, Target::Publisher);
                assert_eq!(desc.sdp_type, SdpType::Offer);
                assert_eq!(desc.sdp, "v=0");
            }
            other => panic!("unexpected request: {other:?}"),
        }
    }

    #[test]
    fn test_subscription_json_shape() {
        let json = r#"{"update_settings":{"subscription":{"track_ids":["t1","t2"],"subscribe":false}}}"#;
        let request: SignalRequest = serde_json::from_str(json).unwrap();

        assert_eq!(
            request,
            SignalRequest::UpdateSettings(UpdateSettings::Subscription(Subscription {
                track_ids: vec!["t1".to_string(), "t2".to_string()],
                subscribe: false,
            }))
        );
    }

    #[test]
    fn test_unknown_sdp_type_rejected() {
        let json = r#"{"description":{"target":"publisher","type":"rollback","sdp":""}}"#;
        assert!(serde_json::from_str::<SignalRequest>(json).is_err());
    }

    #[test]
    fn test_ice_candidate_browser_field_names() {
        let json = r#"{"candidate":"candidate:1 1 udp 2122260223 10.0.0.1 5000 typ host","sdpMid":"0","sdpMLineIndex":0}"#;
        let candidate: IceCandidateInit = serde_json::from_str(json).unwrap();

        assert_eq!(candidate.sdp_mid.as_deref(), Some("0"));
        assert_eq!(candidate.sdp_mline_index, Some(0));
        assert_eq!(candidate.username_fragment, None);

        let encoded = serde_json::to_string(&candidate).unwrap();
        assert!(encoded.contains("\"sdpMLineIndex\":0"));
        assert!(!encoded.contains("usernameFragment"));
    }

    #[test]
    fn test_error_reply_json_shape() {
        let reply = SignalReply::error(ErrorCode::UnsupportedMediaType, "no transport");
        let value = serde_json::to_value(&reply).unwrap();

        assert_eq!(value["error"]["code"], 415);
        assert_eq!(value["error"]["reason"], "no transport");
        assert_eq!(reply.message_type(), "error");
    }

    #[test]
    fn test_join_reply_omits_missing_error() {
        let reply = SignalReply::Reply(JoinReply {
            success: true,
            error: None,
        });
        assert_eq!(
            serde_json::to_string(&reply).unwrap(),
            r#"{"reply":{"success":true}}"#
        );
    }
}
