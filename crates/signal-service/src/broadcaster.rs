//! Stream event broadcaster.
//!
//! Holds the outbound sink of every joined session, grouped by room, and fans
//! stream events out to them. One broadcaster is shared by all sessions of a
//! service instance.
//!
//! The map is guarded by a single async mutex. `broadcast` copies the target
//! sinks under the lock and sends outside it, so a slow session never blocks
//! `register`/`unregister` and never observes a half-iterated fan-out.
//! Deliveries never wait for channel capacity: an event for a session whose
//! outbound buffer is full is dropped for that session only.

use crate::observability::metrics;
use signal_protocol::{ParticipantId, RoomId, SignalReply, StreamEvent};
use std::collections::HashMap;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, warn};

/// Outbound channel of one session.
pub type Sink = mpsc::Sender<SignalReply>;

/// Room-scoped registry of session sinks.
#[derive(Debug, Default)]
pub struct StreamBroadcaster {
    rooms: Mutex<HashMap<RoomId, HashMap<ParticipantId, Sink>>>,
}

impl StreamBroadcaster {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `sink` for `participant_id` in `room_id`.
    ///
    /// Returns the sink it displaced when the same participant id was already
    /// registered in the room.
    pub async fn register(
        &self,
        room_id: &RoomId,
        participant_id: &ParticipantId,
        sink: Sink,
    ) -> Option<Sink> {
        let mut rooms = self.rooms.lock().await;
        let displaced = rooms
            .entry(room_id.clone())
            .or_default()
            .insert(participant_id.clone(), sink);

        if displaced.is_some() {
            warn!(
                target: "signal.broadcaster",
                room_id = %room_id,
                participant_id = %participant_id,
                "Participant re-registered, previous sink displaced"
            );
        } else {
            debug!(
                target: "signal.broadcaster",
                room_id = %room_id,
                participant_id = %participant_id,
                "Session registered"
            );
        }
        displaced
    }

    /// Remove `participant_id` from `room_id` if its registered sink is `sink`.
    ///
    /// A session that was displaced by a newer registration must not remove
    /// its successor. Returns whether an entry was removed.
    pub async fn unregister(
        &self,
        room_id: &RoomId,
        participant_id: &ParticipantId,
        sink: &Sink,
    ) -> bool {
        let mut rooms = self.rooms.lock().await;
        let Some(room) = rooms.get_mut(room_id) else {
            return false;
        };
        let owned = room
            .get(participant_id)
            .is_some_and(|registered| registered.same_channel(sink));
        if !owned {
            return false;
        }

        room.remove(participant_id);
        if room.is_empty() {
            rooms.remove(room_id);
        }

        debug!(
            target: "signal.broadcaster",
            room_id = %room_id,
            participant_id = %participant_id,
            "Session unregistered"
        );
        true
    }

    /// Deliver `event` to every session of `room_id` except `exclude`.
    ///
    /// Returns the number of successful deliveries. Full or closed sinks are
    /// logged and skipped.
    pub async fn broadcast(
        &self,
        room_id: &RoomId,
        event: &StreamEvent,
        exclude: Option<&ParticipantId>,
    ) -> usize {
        let targets: Vec<(ParticipantId, Sink)> = {
            let rooms = self.rooms.lock().await;
            rooms
                .get(room_id)
                .map(|room| {
                    room.iter()
                        .filter(|(participant_id, _)| Some(*participant_id) != exclude)
                        .map(|(participant_id, sink)| (participant_id.clone(), sink.clone()))
                        .collect()
                })
                .unwrap_or_default()
        };

        let mut delivered = 0;
        for (participant_id, sink) in targets {
            match sink.try_send(SignalReply::StreamEvent(event.clone())) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(_)) => {
                    metrics::record_stream_event_dropped("full");
                    warn!(
                        target: "signal.broadcaster",
                        room_id = %room_id,
                        participant_id = %participant_id,
                        "Dropped stream event, sink full"
                    );
                }
                Err(TrySendError::Closed(_)) => {
                    metrics::record_stream_event_dropped("closed");
                    warn!(
                        target: "signal.broadcaster",
                        room_id = %room_id,
                        participant_id = %participant_id,
                        "Failed to deliver stream event, sink closed"
                    );
                }
            }
        }

        metrics::record_stream_event(event.state.as_str());
        debug!(
            target: "signal.broadcaster",
            room_id = %room_id,
            state = event.state.as_str(),
            streams = event.streams.len(),
            delivered,
            "Stream event broadcast"
        );
        delivered
    }

    /// The sink registered for `participant_id` in `room_id`.
    pub async fn sink_for(&self, room_id: &RoomId, participant_id: &ParticipantId) -> Option<Sink> {
        self.rooms
            .lock()
            .await
            .get(room_id)
            .and_then(|room| room.get(participant_id))
            .cloned()
    }

    /// Number of registered sessions across all rooms.
    pub async fn session_count(&self) -> usize {
        self.rooms.lock().await.values().map(HashMap::len).sum()
    }
}
