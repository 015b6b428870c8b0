//! Loopback media engine.
//!
//! An in-process engine backed by [`RoomRegistry`]. It tracks peers, published
//! tracks and forwarding paths, answers publisher offers and renegotiates
//! subscriber transports with structurally valid SDP, but it never gathers
//! ICE candidates or moves media. The service runs on it for local
//! development and end-to-end signaling tests.

use super::{
    EngineError, ForwardedTrack, JoinConfig, MediaEngine, MediaPeer, ParticipantTracks,
    PeerObserver, PublishedTrack, RoomRegistry,
};
use crate::extractor::{extract_streams, parse_description};
use async_trait::async_trait;
use sdp::description::common::Attribute;
use signal_protocol::{IceCandidateInit, ParticipantId, RoomId, Target, TrackKind};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

/// Media-section attributes that describe the offerer's side and are not
/// carried into the answer.
const OFFER_ONLY_ATTRIBUTES: [&str; 12] = [
    "msid",
    "ssrc",
    "ssrc-group",
    "sendrecv",
    "sendonly",
    "recvonly",
    "inactive",
    "setup",
    "rid",
    "simulcast",
    "candidate",
    "end-of-candidates",
];

/// Engine whose peers share one room registry.
#[derive(Debug, Clone)]
pub struct LoopbackEngine {
    registry: Arc<RoomRegistry>,
}

impl LoopbackEngine {
    #[must_use]
    pub fn new(registry: Arc<RoomRegistry>) -> Self {
        Self { registry }
    }

    /// The registry shared by this engine's peers.
    #[must_use]
    pub fn registry(&self) -> &Arc<RoomRegistry> {
        &self.registry
    }
}

impl MediaEngine for LoopbackEngine {
    fn new_peer(&self) -> Arc<dyn MediaPeer> {
        Arc::new(LoopbackPeer::new(Arc::clone(&self.registry)))
    }
}

struct Binding {
    room_id: RoomId,
    participant_id: ParticipantId,
}

struct PeerState {
    binding: Option<Binding>,
    observer: Option<Arc<dyn PeerObserver>>,
    forwarded: Vec<ForwardedTrack>,
    session_id: u64,
    offer_version: u64,
    awaiting_answer: bool,
    remote_candidates: usize,
    closed: bool,
}

struct LoopbackPeer {
    registry: Arc<RoomRegistry>,
    state: Mutex<PeerState>,
}

impl LoopbackPeer {
    fn new(registry: Arc<RoomRegistry>) -> Self {
        let (high, _) = uuid::Uuid::new_v4().as_u64_pair();
        Self {
            registry,
            state: Mutex::new(PeerState {
                binding: None,
                observer: None,
                forwarded: Vec::new(),
                // SDP session ids must fit in a signed 63-bit integer
                session_id: high >> 1,
                offer_version: 0,
                awaiting_answer: false,
                remote_candidates: 0,
                closed: false,
            }),
        }
    }
}

#[async_trait]
impl MediaPeer for LoopbackPeer {
    async fn join(
        &self,
        room_id: &RoomId,
        participant_id: &ParticipantId,
        config: JoinConfig,
        observer: Arc<dyn PeerObserver>,
    ) -> Result<(), EngineError> {
        let mut state = self.state.lock().await;
        if state.closed {
            return Err(EngineError::Internal("peer is closed".to_string()));
        }
        if state.binding.is_some() {
            return Err(EngineError::TransportExists);
        }
        self.registry.join(room_id, participant_id).await?;

        debug!(
            target: "signal.engine.loopback",
            room_id = %room_id,
            participant_id = %participant_id,
            no_auto_subscribe = config.no_auto_subscribe,
            "Peer joined"
        );

        state.binding = Some(Binding {
            room_id: room_id.clone(),
            participant_id: participant_id.clone(),
        });
        state.observer = Some(observer);
        Ok(())
    }

    async fn answer(&self, offer: &str) -> Result<String, EngineError> {
        let state = self.state.lock().await;
        let binding = state
            .binding
            .as_ref()
            .ok_or(EngineError::NoTransportEstablished)?;

        let streams = extract_streams(&binding.participant_id, offer)
            .map_err(|e| EngineError::InvalidDescription(e.to_string()))?;
        let tracks: Vec<PublishedTrack> = streams
            .iter()
            .flat_map(|stream| {
                stream.tracks.iter().map(|track| PublishedTrack {
                    track_id: track.id.clone(),
                    stream_id: stream.stream_id.clone(),
                    kind: track.kind,
                    rid: track.rid.clone(),
                })
            })
            .collect();
        let track_count = tracks.len();
        self.registry
            .publish(&binding.room_id, &binding.participant_id, tracks)
            .await?;

        debug!(
            target: "signal.engine.loopback",
            participant_id = %binding.participant_id,
            tracks = track_count,
            "Publisher offer applied"
        );

        mirror_answer(offer)
    }

    async fn set_remote_description(&self, answer: &str) -> Result<(), EngineError> {
        let mut state = self.state.lock().await;
        if state.binding.is_none() || !state.awaiting_answer {
            return Err(EngineError::NoTransportEstablished);
        }
        parse_description(answer).map_err(|e| EngineError::InvalidDescription(e.to_string()))?;
        state.awaiting_answer = false;
        Ok(())
    }

    async fn trickle(
        &self,
        candidate: IceCandidateInit,
        target: Target,
    ) -> Result<(), EngineError> {
        let mut state = self.state.lock().await;
        if state.binding.is_none() {
            return Err(EngineError::NoTransportEstablished);
        }
        state.remote_candidates += 1;

        debug!(
            target: "signal.engine.loopback",
            target_transport = target.as_str(),
            candidate = %candidate.candidate,
            remote_candidates = state.remote_candidates,
            "Remote candidate added"
        );
        Ok(())
    }

    async fn room_participants(&self) -> Vec<ParticipantTracks> {
        let room_id = {
            let state = self.state.lock().await;
            match &state.binding {
                Some(binding) => binding.room_id.clone(),
                None => return Vec::new(),
            }
        };
        self.registry.participants(&room_id).await
    }

    async fn add_forwarding(
        &self,
        publisher_id: &ParticipantId,
        track_id: &str,
    ) -> Result<(), EngineError> {
        let mut state = self.state.lock().await;
        let room_id = state
            .binding
            .as_ref()
            .map(|b| b.room_id.clone())
            .ok_or(EngineError::NoTransportEstablished)?;

        let track = self
            .registry
            .find_track(&room_id, publisher_id, track_id)
            .await
            .ok_or_else(|| EngineError::TrackNotFound(track_id.to_string()))?;

        let already_forwarded = state.forwarded.iter().any(|f| {
            f.publisher_id == *publisher_id
                && f.stream_id == track.stream_id
                && f.track_id == track.track_id
        });
        if !already_forwarded {
            state.forwarded.push(ForwardedTrack {
                publisher_id: publisher_id.clone(),
                stream_id: track.stream_id,
                track_id: track.track_id,
                kind: track.kind,
            });
        }
        Ok(())
    }

    async fn forwarded_tracks(&self) -> Vec<ForwardedTrack> {
        self.state.lock().await.forwarded.clone()
    }

    async fn remove_forwarding(&self, stream_id: &str, track_id: &str) -> Result<(), EngineError> {
        let mut state = self.state.lock().await;
        let position = state
            .forwarded
            .iter()
            .position(|f| f.stream_id == stream_id && f.track_id == track_id)
            .ok_or_else(|| EngineError::TrackNotFound(track_id.to_string()))?;
        state.forwarded.remove(position);
        Ok(())
    }

    async fn negotiate(&self) -> Result<(), EngineError> {
        let (offer, observer) = {
            let mut state = self.state.lock().await;
            let room_id = state
                .binding
                .as_ref()
                .map(|b| b.room_id.clone())
                .ok_or(EngineError::NoTransportEstablished)?;

            // Drop paths whose publisher has since left or unpublished.
            let mut live = Vec::with_capacity(state.forwarded.len());
            for track in std::mem::take(&mut state.forwarded) {
                if self
                    .registry
                    .find_track(&room_id, &track.publisher_id, &track.track_id)
                    .await
                    .is_some()
                {
                    live.push(track);
                }
            }
            state.forwarded = live;

            state.offer_version += 1;
            state.awaiting_answer = true;
            let offer = subscriber_offer(state.session_id, state.offer_version, &state.forwarded);
            (offer, state.observer.clone())
        };

        if let Some(observer) = observer {
            observer.on_offer(offer).await;
        }
        Ok(())
    }

    async fn close(&self) {
        let binding = {
            let mut state = self.state.lock().await;
            state.closed = true;
            state.forwarded.clear();
            state.observer = None;
            state.binding.take()
        };
        if let Some(binding) = binding {
            self.registry
                .leave(&binding.room_id, &binding.participant_id)
                .await;
            debug!(
                target: "signal.engine.loopback",
                room_id = %binding.room_id,
                participant_id = %binding.participant_id,
                "Peer closed"
            );
        }
    }
}

/// Answer a publisher offer by accepting every media section as receive-only.
fn mirror_answer(offer: &str) -> Result<String, EngineError> {
    let mut description =
        parse_description(offer).map_err(|e| EngineError::InvalidDescription(e.to_string()))?;

    for media in &mut description.media_descriptions {
        media
            .attributes
            .retain(|a| !OFFER_ONLY_ATTRIBUTES.contains(&a.key.as_str()));
        if media.media_name.media != "application" {
            media.attributes.push(Attribute {
                key: "recvonly".to_string(),
                value: None,
            });
        }
        media.attributes.push(Attribute {
            key: "setup".to_string(),
            value: Some("active".to_string()),
        });
    }

    Ok(description.marshal())
}

/// Offer for a subscriber transport carrying `tracks`, one section each.
fn subscriber_offer(session_id: u64, version: u64, tracks: &[ForwardedTrack]) -> String {
    let mut sdp = format!("v=0\r\no=- {session_id} {version} IN IP4 0.0.0.0\r\ns=-\r\nt=0 0\r\n");

    if !tracks.is_empty() {
        let mids: Vec<String> = (0..tracks.len()).map(|mid| mid.to_string()).collect();
        sdp.push_str(&format!("a=group:BUNDLE {}\r\n", mids.join(" ")));
    }

    for (mid, track) in tracks.iter().enumerate() {
        let (payload_type, rtpmap) = match track.kind {
            TrackKind::Audio => (111, "opus/48000/2"),
            TrackKind::Video => (96, "VP8/90000"),
        };
        sdp.push_str(&format!(
            "m={kind} 9 UDP/TLS/RTP/SAVPF {payload_type}\r\n\
             c=IN IP4 0.0.0.0\r\n\
             a=mid:{mid}\r\n\
             a=sendonly\r\n\
             a=setup:actpass\r\n\
             a=msid:{stream_id} {track_id}\r\n\
             a=rtpmap:{payload_type} {rtpmap}\r\n",
            kind = track.kind.as_str(),
            stream_id = track.stream_id,
            track_id = track.track_id,
        ));
    }

    sdp
}
