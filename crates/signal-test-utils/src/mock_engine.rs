//! Mock media engine.
//!
//! `MockEngine` keeps room membership and published tracks in memory, records
//! every call its peers receive and lets tests script engine failures. Peers
//! answer offers by publishing the streams found in the offer, so sessions
//! driven by the mock behave like sessions on a real engine.

use async_trait::async_trait;
use signal_protocol::{IceCandidateInit, ParticipantId, RoomId, Target};
use signal_service::engine::{
    EngineError, ForwardedTrack, JoinConfig, MediaEngine, MediaPeer, ParticipantTracks,
    PeerObserver, PublishedTrack,
};
use signal_service::extractor::extract_streams;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex};

/// Engine operations that can be scripted to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EngineOp {
    Join,
    Answer,
    SetRemoteDescription,
    Trickle,
    AddForwarding,
    RemoveForwarding,
    Negotiate,
}

/// A call received by one of the mock's peers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineCall {
    Join {
        room_id: RoomId,
        participant_id: ParticipantId,
        config: JoinConfig,
    },
    Answer {
        participant_id: Option<ParticipantId>,
    },
    SetRemoteDescription {
        participant_id: Option<ParticipantId>,
    },
    Trickle {
        participant_id: Option<ParticipantId>,
        target: Target,
        candidate: IceCandidateInit,
    },
    AddForwarding {
        subscriber_id: Option<ParticipantId>,
        publisher_id: ParticipantId,
        track_id: String,
    },
    RemoveForwarding {
        subscriber_id: Option<ParticipantId>,
        stream_id: String,
        track_id: String,
    },
    Negotiate {
        participant_id: Option<ParticipantId>,
    },
    Close {
        participant_id: Option<ParticipantId>,
    },
}

type Room = BTreeMap<ParticipantId, Vec<PublishedTrack>>;

#[derive(Default)]
struct Shared {
    rooms: HashMap<RoomId, Room>,
    calls: Vec<EngineCall>,
    scripted: HashMap<EngineOp, VecDeque<EngineError>>,
    observers: HashMap<(RoomId, ParticipantId), Arc<dyn PeerObserver>>,
    peers_created: usize,
}

impl Shared {
    fn take_scripted(&mut self, op: EngineOp) -> Option<EngineError> {
        self.scripted.get_mut(&op).and_then(VecDeque::pop_front)
    }
}

/// In-memory media engine for session tests.
#[derive(Clone, Default)]
pub struct MockEngine {
    shared: Arc<Mutex<Shared>>,
}

impl MockEngine {
    /// Create an engine with no rooms and no scripted failures.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next call of `op` (across all peers) with `error`.
    ///
    /// Errors scripted for the same operation are returned in order.
    pub fn fail_next(&self, op: EngineOp, error: EngineError) -> &Self {
        self.lock()
            .scripted
            .entry(op)
            .or_default()
            .push_back(error);
        self
    }

    /// Add a participant with published tracks directly, bypassing any session.
    pub fn publish(&self, room_id: &str, participant_id: &str, tracks: Vec<PublishedTrack>) {
        self.lock()
            .rooms
            .entry(RoomId::from(room_id))
            .or_default()
            .insert(ParticipantId::from(participant_id), tracks);
    }

    /// Every call received so far, in order.
    pub fn calls(&self) -> Vec<EngineCall> {
        self.lock().calls.clone()
    }

    /// Number of `negotiate` calls received.
    pub fn negotiations(&self) -> usize {
        self.lock()
            .calls
            .iter()
            .filter(|call| matches!(call, EngineCall::Negotiate { .. }))
            .count()
    }

    /// Number of peers created.
    pub fn peers_created(&self) -> usize {
        self.lock().peers_created
    }

    /// Participants of a room in identifier order.
    pub fn participants(&self, room_id: &str) -> Vec<ParticipantId> {
        self.lock()
            .rooms
            .get(&RoomId::from(room_id))
            .map(|room| room.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// The observer registered when `participant_id` joined `room_id`.
    pub fn observer(&self, room_id: &str, participant_id: &str) -> Option<Arc<dyn PeerObserver>> {
        self.lock()
            .observers
            .get(&(RoomId::from(room_id), ParticipantId::from(participant_id)))
            .cloned()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Shared> {
        self.shared.lock().expect("mock engine lock poisoned")
    }
}

impl MediaEngine for MockEngine {
    fn new_peer(&self) -> Arc<dyn MediaPeer> {
        self.lock().peers_created += 1;
        Arc::new(MockPeer {
            shared: Arc::clone(&self.shared),
            state: Mutex::new(PeerState::default()),
        })
    }
}

#[derive(Default)]
struct PeerState {
    binding: Option<(RoomId, ParticipantId)>,
    forwarded: Vec<ForwardedTrack>,
    offers: usize,
}

struct MockPeer {
    shared: Arc<Mutex<Shared>>,
    state: Mutex<PeerState>,
}

impl MockPeer {
    fn shared(&self) -> std::sync::MutexGuard<'_, Shared> {
        self.shared.lock().expect("mock engine lock poisoned")
    }

    fn state(&self) -> std::sync::MutexGuard<'_, PeerState> {
        self.state.lock().expect("mock peer lock poisoned")
    }

    fn binding(&self) -> Option<(RoomId, ParticipantId)> {
        self.state().binding.clone()
    }

    fn participant_id(&self) -> Option<ParticipantId> {
        self.binding().map(|(_, participant_id)| participant_id)
    }

    /// Record `call` and return the scripted failure for `op`, if any.
    fn record(&self, op: EngineOp, call: EngineCall) -> Result<(), EngineError> {
        let mut shared = self.shared();
        shared.calls.push(call);
        match shared.take_scripted(op) {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl MediaPeer for MockPeer {
    async fn join(
        &self,
        room_id: &RoomId,
        participant_id: &ParticipantId,
        config: JoinConfig,
        observer: Arc<dyn PeerObserver>,
    ) -> Result<(), EngineError> {
        self.record(
            EngineOp::Join,
            EngineCall::Join {
                room_id: room_id.clone(),
                participant_id: participant_id.clone(),
                config,
            },
        )?;
        if self.binding().is_some() {
            return Err(EngineError::TransportExists);
        }

        {
            let mut shared = self.shared();
            shared
                .rooms
                .entry(room_id.clone())
                .or_default()
                .insert(participant_id.clone(), Vec::new());
            shared
                .observers
                .insert((room_id.clone(), participant_id.clone()), observer);
        }
        self.state().binding = Some((room_id.clone(), participant_id.clone()));
        Ok(())
    }

    async fn answer(&self, offer: &str) -> Result<String, EngineError> {
        let participant_id = self.participant_id();
        self.record(
            EngineOp::Answer,
            EngineCall::Answer {
                participant_id: participant_id.clone(),
            },
        )?;
        let (room_id, participant_id) = self.binding().ok_or(EngineError::NoTransportEstablished)?;

        let tracks: Vec<PublishedTrack> = extract_streams(&participant_id, offer)
            .unwrap_or_default()
            .into_iter()
            .flat_map(|stream| {
                let stream_id = stream.stream_id;
                stream.tracks.into_iter().map(move |track| PublishedTrack {
                    track_id: track.id,
                    stream_id: stream_id.clone(),
                    kind: track.kind,
                    rid: track.rid,
                })
            })
            .collect();

        if let Some(published) = self
            .shared()
            .rooms
            .get_mut(&room_id)
            .and_then(|room| room.get_mut(&participant_id))
        {
            *published = tracks;
        }
        Ok(format!("mock-answer-for-{participant_id}"))
    }

    async fn set_remote_description(&self, _answer: &str) -> Result<(), EngineError> {
        self.record(
            EngineOp::SetRemoteDescription,
            EngineCall::SetRemoteDescription {
                participant_id: self.participant_id(),
            },
        )
    }

    async fn trickle(
        &self,
        candidate: IceCandidateInit,
        target: Target,
    ) -> Result<(), EngineError> {
        self.record(
            EngineOp::Trickle,
            EngineCall::Trickle {
                participant_id: self.participant_id(),
                target,
                candidate,
            },
        )
    }

    async fn room_participants(&self) -> Vec<ParticipantTracks> {
        let Some((room_id, _)) = self.binding() else {
            return Vec::new();
        };
        self.shared()
            .rooms
            .get(&room_id)
            .map(|room| {
                room.iter()
                    .map(|(participant_id, tracks)| ParticipantTracks {
                        participant_id: participant_id.clone(),
                        tracks: tracks.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    async fn add_forwarding(
        &self,
        publisher_id: &ParticipantId,
        track_id: &str,
    ) -> Result<(), EngineError> {
        self.record(
            EngineOp::AddForwarding,
            EngineCall::AddForwarding {
                subscriber_id: self.participant_id(),
                publisher_id: publisher_id.clone(),
                track_id: track_id.to_string(),
            },
        )?;
        let (room_id, _) = self.binding().ok_or(EngineError::NoTransportEstablished)?;

        let track = self
            .shared()
            .rooms
            .get(&room_id)
            .and_then(|room| room.get(publisher_id))
            .and_then(|tracks| tracks.iter().find(|t| t.track_id == track_id).cloned())
            .ok_or_else(|| EngineError::TrackNotFound(track_id.to_string()))?;

        self.state().forwarded.push(ForwardedTrack {
            publisher_id: publisher_id.clone(),
            stream_id: track.stream_id,
            track_id: track.track_id,
            kind: track.kind,
        });
        Ok(())
    }

    async fn forwarded_tracks(&self) -> Vec<ForwardedTrack> {
        self.state().forwarded.clone()
    }

    async fn remove_forwarding(&self, stream_id: &str, track_id: &str) -> Result<(), EngineError> {
        self.record(
            EngineOp::RemoveForwarding,
            EngineCall::RemoveForwarding {
                subscriber_id: self.participant_id(),
                stream_id: stream_id.to_string(),
                track_id: track_id.to_string(),
            },
        )?;
        let mut state = self.state();
        let position = state
            .forwarded
            .iter()
            .position(|f| f.stream_id == stream_id && f.track_id == track_id)
            .ok_or_else(|| EngineError::TrackNotFound(track_id.to_string()))?;
        state.forwarded.remove(position);
        Ok(())
    }

    async fn negotiate(&self) -> Result<(), EngineError> {
        let participant_id = self.participant_id();
        self.record(
            EngineOp::Negotiate,
            EngineCall::Negotiate {
                participant_id: participant_id.clone(),
            },
        )?;
        let (room_id, participant_id) = self.binding().ok_or(EngineError::NoTransportEstablished)?;

        let offer_number = {
            let mut state = self.state();
            state.offers += 1;
            state.offers
        };
        let observer = self
            .shared()
            .observers
            .get(&(room_id, participant_id))
            .cloned();
        if let Some(observer) = observer {
            observer.on_offer(format!("mock-offer-{offer_number}")).await;
        }
        Ok(())
    }

    async fn close(&self) {
        let binding = self.state().binding.take();
        let participant_id = binding.as_ref().map(|(_, p)| p.clone());
        let mut shared = self.shared();
        shared.calls.push(EngineCall::Close { participant_id });
        if let Some((room_id, participant_id)) = binding {
            shared
                .observers
                .remove(&(room_id.clone(), participant_id.clone()));
            if let Some(room) = shared.rooms.get_mut(&room_id) {
                room.remove(&participant_id);
                if room.is_empty() {
                    shared.rooms.remove(&room_id);
                }
            }
        }
    }
}
