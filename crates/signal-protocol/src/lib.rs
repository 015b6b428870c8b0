//! Signaling wire protocol for the SFU signal service.
//!
//! This crate defines the control messages exchanged between a client and the
//! signal service over a bidirectional stream, and the JSON codec used to put
//! them on the wire.
//!
//! Inbound messages ([`SignalRequest`]) and outbound messages ([`SignalReply`])
//! are closed, externally tagged enums:
//!
//! ```text
//! {"join":{"room_id":"room-1","participant_id":"alice"}}
//! {"description":{"target":"publisher","type":"offer","sdp":"v=0..."}}
//! {"stream_event":{"state":"ADD","streams":[...]}}
//! ```

#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod codec;
pub mod error_code;
pub mod message;
pub mod stream;
pub mod types;

// Re-export primary types
pub use codec::{decode_reply, decode_request, encode_reply, encode_request, CodecError};
pub use error_code::ErrorCode;
pub use message::{
    IceCandidateInit, JoinReply, JoinRequest, ProtocolError, SdpType, SessionDescription,
    SignalReply, SignalRequest, Subscription, Target, Trickle, UpdateSettings,
};
pub use stream::{Stream, StreamEvent, StreamState, Track, TrackKind};
pub use types::{ParticipantId, RoomId};
