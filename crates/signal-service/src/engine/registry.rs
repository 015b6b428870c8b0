//! Room registry.
//!
//! Maps a room to its participants and the tracks each participant publishes.
//! Shared by every peer of an engine instance; rooms are created on first
//! join and dropped when their last participant leaves.

use super::{EngineError, ParticipantTracks, PublishedTrack};
use signal_protocol::{ParticipantId, RoomId};
use std::collections::{BTreeMap, HashMap};
use tokio::sync::RwLock;
use tracing::debug;

type Room = BTreeMap<ParticipantId, Vec<PublishedTrack>>;

/// Registry of active rooms.
#[derive(Debug, Default)]
pub struct RoomRegistry {
    rooms: RwLock<HashMap<RoomId, Room>>,
}

impl RoomRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a participant to a room.
    ///
    /// # Errors
    ///
    /// `TransportExists` if the participant is already in the room.
    pub async fn join(
        &self,
        room_id: &RoomId,
        participant_id: &ParticipantId,
    ) -> Result<(), EngineError> {
        let mut rooms = self.rooms.write().await;
        let room = rooms.entry(room_id.clone()).or_default();
        if room.contains_key(participant_id) {
            return Err(EngineError::TransportExists);
        }
        room.insert(participant_id.clone(), Vec::new());

        debug!(
            target: "signal.engine.registry",
            room_id = %room_id,
            participant_id = %participant_id,
            participants = room.len(),
            "Participant added to room"
        );
        Ok(())
    }

    /// Remove a participant; drops the room when it becomes empty.
    ///
    /// Returns whether the participant was present.
    pub async fn leave(&self, room_id: &RoomId, participant_id: &ParticipantId) -> bool {
        let mut rooms = self.rooms.write().await;
        let Some(room) = rooms.get_mut(room_id) else {
            return false;
        };
        let removed = room.remove(participant_id).is_some();
        if room.is_empty() {
            rooms.remove(room_id);
            debug!(
                target: "signal.engine.registry",
                room_id = %room_id,
                "Room closed"
            );
        }
        removed
    }

    /// Replace the tracks a participant publishes.
    ///
    /// # Errors
    ///
    /// `NoTransportEstablished` if the participant is not in the room.
    pub async fn publish(
        &self,
        room_id: &RoomId,
        participant_id: &ParticipantId,
        tracks: Vec<PublishedTrack>,
    ) -> Result<(), EngineError> {
        let mut rooms = self.rooms.write().await;
        let published = rooms
            .get_mut(room_id)
            .and_then(|room| room.get_mut(participant_id))
            .ok_or(EngineError::NoTransportEstablished)?;
        *published = tracks;
        Ok(())
    }

    /// Participants of a room in identifier order.
    pub async fn participants(&self, room_id: &RoomId) -> Vec<ParticipantTracks> {
        let rooms = self.rooms.read().await;
        rooms
            .get(room_id)
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

    /// Look up a track published by a participant.
    pub async fn find_track(
        &self,
        room_id: &RoomId,
        publisher_id: &ParticipantId,
        track_id: &str,
    ) -> Option<PublishedTrack> {
        let rooms = self.rooms.read().await;
        rooms
            .get(room_id)?
            .get(publisher_id)?
            .iter()
            .find(|track| track.track_id == track_id)
            .cloned()
    }

    /// Number of active rooms.
    pub async fn room_count(&self) -> usize {
        self.rooms.read().await.len()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use signal_protocol::TrackKind;

    fn audio(track_id: &str, stream_id: &str) -> PublishedTrack {
        PublishedTrack {
            track_id: track_id.to_string(),
            stream_id: stream_id.to_string(),
            kind: TrackKind::Audio,
            rid: String::new(),
        }
    }

    #[tokio::test]
    async fn test_join_twice_is_transport_exists() {
        let registry = RoomRegistry::new();
        let room = RoomId::from("room-1");
        let alice = ParticipantId::from("alice");

        registry.join(&room, &alice).await.unwrap();
        assert_eq!(
            registry.join(&room, &alice).await,
            Err(EngineError::TransportExists)
        );
    }

    #[tokio::test]
    async fn test_same_participant_id_in_different_rooms() {
        let registry = RoomRegistry::new();
        let alice = ParticipantId::from("alice");

        registry.join(&RoomId::from("a"), &alice).await.unwrap();
        registry.join(&RoomId::from("b"), &alice).await.unwrap();
        assert_eq!(registry.room_count().await, 2);
    }

    #[tokio::test]
    async fn test_publish_requires_membership() {
        let registry = RoomRegistry::new();
        let result = registry
            .publish(
                &RoomId::from("room-1"),
                &ParticipantId::from("ghost"),
                vec![audio("a1", "s1")],
            )
            .await;
        assert_eq!(result, Err(EngineError::NoTransportEstablished));
    }

    #[tokio::test]
    async fn test_publish_replaces_tracks() {
        let registry = RoomRegistry::new();
        let room = RoomId::from("room-1");
        let alice = ParticipantId::from("alice");
        registry.join(&room, &alice).await.unwrap();

        registry
            .publish(&room, &alice, vec![audio("a1", "s1")])
            .await
            .unwrap();
        registry
            .publish(&room, &alice, vec![audio("a2", "s2")])
            .await
            .unwrap();

        let participants = registry.participants(&room).await;
        assert_eq!(participants.len(), 1);
        assert_eq!(participants[0].tracks, vec![audio("a2", "s2")]);
        assert!(registry.find_track(&room, &alice, "a1").await.is_none());
        assert!(registry.find_track(&room, &alice, "a2").await.is_some());
    }

    #[tokio::test]
    async fn test_last_leave_drops_room() {
        let registry = RoomRegistry::new();
        let room = RoomId::from("room-1");
        let alice = ParticipantId::from("alice");
        let bob = ParticipantId::from("bob");
        registry.join(&room, &alice).await.unwrap();
        registry.join(&room, &bob).await.unwrap();

        assert!(registry.leave(&room, &alice).await);
        assert_eq!(registry.room_count().await, 1);
        assert!(registry.leave(&room, &bob).await);
        assert_eq!(registry.room_count().await, 0);
        assert!(!registry.leave(&room, &bob).await);
    }
}
