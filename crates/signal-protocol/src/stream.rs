//! Media stream descriptions carried by stream events.

use crate::types::ParticipantId;
use serde::{Deserialize, Serialize};

/// Kind of media carried by a track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackKind {
    /// Audio track
    Audio,
    /// Video track
    Video,
}

impl TrackKind {
    /// Parse an SDP media type (`audio`/`video`).
    #[must_use]
    pub fn from_media(media: &str) -> Option<Self> {
        match media {
            "audio" => Some(TrackKind::Audio),
            "video" => Some(TrackKind::Video),
            _ => None,
        }
    }

    /// Returns the SDP media type for this kind.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            TrackKind::Audio => "audio",
            TrackKind::Video => "video",
        }
    }
}

/// One media track within a stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Track {
    /// Track identifier
    pub id: String,
    /// Audio or video
    pub kind: TrackKind,
    /// Forwarding identifier (simulcast rid, empty when not simulcast)
    #[serde(default)]
    pub rid: String,
    /// Mute state (always false when announced by the signal service)
    #[serde(default)]
    pub muted: bool,
}

impl Track {
    /// Create an unmuted track.
    #[must_use]
    pub fn new(id: impl Into<String>, kind: TrackKind, rid: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind,
            rid: rid.into(),
            muted: false,
        }
    }
}

/// A named bundle of tracks published together by one participant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stream {
    /// Participant that publishes this stream
    pub participant_id: ParticipantId,
    /// Stream identifier (msid), unique per room
    pub stream_id: String,
    /// Tracks in declaration order
    pub tracks: Vec<Track>,
}

impl Stream {
    /// Create an empty stream owned by `participant_id`.
    #[must_use]
    pub fn new(participant_id: ParticipantId, stream_id: impl Into<String>) -> Self {
        Self {
            participant_id,
            stream_id: stream_id.into(),
            tracks: Vec::new(),
        }
    }
}

/// Whether a stream event announces streams appearing or disappearing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StreamState {
    Add,
    Remove,
}

impl StreamState {
    /// Returns a bounded label for logs and metrics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            StreamState::Add => "add",
            StreamState::Remove => "remove",
        }
    }
}

/// Stream membership notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamEvent {
    pub state: StreamState,
    pub streams: Vec<Stream>,
}

impl StreamEvent {
    /// Announce streams that were added.
    #[must_use]
    pub fn add(streams: Vec<Stream>) -> Self {
        Self {
            state: StreamState::Add,
            streams,
        }
    }

    /// Announce streams that were removed.
    #[must_use]
    pub fn remove(streams: Vec<Stream>) -> Self {
        Self {
            state: StreamState::Remove,
            streams,
        }
    }

    /// Stream identifiers in this event, in order.
    #[must_use]
    pub fn stream_ids(&self) -> Vec<&str> {
        self.streams.iter().map(|s| s.stream_id.as_str()).collect()
    }
}
