//! Media engine interface.
//!
//! The media engine owns transports, track forwarding and the room registry.
//! The signal service drives it through [`MediaPeer`], one peer per client
//! connection, and receives its negotiation events through [`PeerObserver`].
//!
//! # Modules
//!
//! - [`registry`] - Room registry (participants and their published tracks)
//! - [`loopback`] - In-process engine backed by the registry; moves no media

pub mod loopback;
pub mod registry;

pub use loopback::LoopbackEngine;
pub use registry::RoomRegistry;

use async_trait::async_trait;
use signal_protocol::{IceCandidateInit, ParticipantId, RoomId, Target, TrackKind};
use std::sync::Arc;
use thiserror::Error;

/// Errors raised by the media engine.
///
/// The first three variants are conditions the signal service reacts to
/// specifically; everything else is treated as unclassified.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    /// The peer already has a transport (duplicate join).
    #[error("transport already exists")]
    TransportExists,

    /// An offer arrived while the engine was not expecting one.
    #[error("offer ignored")]
    OfferIgnored,

    /// The operation needs a transport that has not been established.
    #[error("no transport established")]
    NoTransportEstablished,

    /// A session description could not be processed.
    #[error("invalid session description: {0}")]
    InvalidDescription(String),

    /// A referenced track does not exist.
    #[error("track not found: {0}")]
    TrackNotFound(String),

    /// Any other engine failure.
    #[error("media engine failure: {0}")]
    Internal(String),
}

/// Join options passed to the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct JoinConfig {
    /// Do not create a publisher transport.
    pub no_publish: bool,
    /// Do not create a subscriber transport.
    pub no_subscribe: bool,
    /// Do not forward existing publishers' tracks automatically.
    pub no_auto_subscribe: bool,
}

/// A track published by a participant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedTrack {
    pub track_id: String,
    pub stream_id: String,
    pub kind: TrackKind,
    pub rid: String,
}

/// A participant in a room and the tracks it publishes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParticipantTracks {
    pub participant_id: ParticipantId,
    pub tracks: Vec<PublishedTrack>,
}

/// A track currently forwarded to a peer's subscriber transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForwardedTrack {
    /// Participant that publishes the track.
    pub publisher_id: ParticipantId,
    pub stream_id: String,
    pub track_id: String,
    pub kind: TrackKind,
}

/// Negotiation events raised by a peer.
///
/// Invoked from the engine's own tasks, concurrently with the session loop.
#[async_trait]
pub trait PeerObserver: Send + Sync {
    /// A local ICE candidate was gathered for `target`.
    async fn on_ice_candidate(&self, candidate: IceCandidateInit, target: Target);

    /// The subscriber transport produced a new local offer.
    async fn on_offer(&self, sdp: String);
}

/// Creates peers. One peer is created per client connection.
pub trait MediaEngine: Send + Sync + 'static {
    fn new_peer(&self) -> Arc<dyn MediaPeer>;
}

/// Peer lifecycle API for one client connection.
#[async_trait]
pub trait MediaPeer: Send + Sync {
    /// Bind the peer to `(room_id, participant_id)` and create its transports.
    ///
    /// `observer` receives the peer's ICE candidates and subscriber offers.
    async fn join(
        &self,
        room_id: &RoomId,
        participant_id: &ParticipantId,
        config: JoinConfig,
        observer: Arc<dyn PeerObserver>,
    ) -> Result<(), EngineError>;

    /// Apply a publisher offer and return the answer SDP.
    async fn answer(&self, offer: &str) -> Result<String, EngineError>;

    /// Apply the client's answer to the last subscriber offer.
    async fn set_remote_description(&self, answer: &str) -> Result<(), EngineError>;

    /// Add a remote ICE candidate to the `target` transport.
    async fn trickle(&self, candidate: IceCandidateInit, target: Target)
        -> Result<(), EngineError>;

    /// Participants currently in this peer's room, including this peer.
    async fn room_participants(&self) -> Vec<ParticipantTracks>;

    /// Forward `track_id` published by `publisher_id` to this peer's subscriber.
    async fn add_forwarding(
        &self,
        publisher_id: &ParticipantId,
        track_id: &str,
    ) -> Result<(), EngineError>;

    /// Tracks currently forwarded to this peer's subscriber.
    async fn forwarded_tracks(&self) -> Vec<ForwardedTrack>;

    /// Remove and stop a forwarding path.
    async fn remove_forwarding(&self, stream_id: &str, track_id: &str)
        -> Result<(), EngineError>;

    /// Renegotiate the subscriber transport; the offer arrives via the observer.
    async fn negotiate(&self) -> Result<(), EngineError>;

    /// Close the peer and release its transports.
    async fn close(&self);
}
