//! Signaling session.
//!
//! One `SignalSession` per client connection. It consumes the connection's
//! inbound message stream, drives one media engine peer, and writes replies
//! to the connection's outbound sink.
//!
//! # Lifecycle
//!
//! `Unjoined -> Joined -> Closed`. Only `Join` is accepted before the session
//! has joined; anything else is rejected with `BadRequest` and never reaches
//! the engine. Messages are handled strictly in arrival order. The session
//! ends when the inbound stream ends or fails, when a fatal engine error
//! occurs, or when its cancellation token fires; teardown then closes the
//! peer, unregisters the sink and retracts the streams the session announced.

pub mod bridge;

pub use bridge::SignalObserver;

use crate::broadcaster::{Sink, StreamBroadcaster};
use crate::engine::{EngineError, JoinConfig, MediaEngine, MediaPeer, ParticipantTracks};
use crate::errors::{SignalError, TransportError};
use crate::extractor::extract_streams;
use crate::observability::metrics;
use futures::StreamExt;
use signal_protocol::{
    ErrorCode, IceCandidateInit, JoinReply, JoinRequest, ParticipantId, RoomId, SdpType,
    SessionDescription, SignalReply, SignalRequest, Stream, StreamEvent, Subscription, Target,
    Track, Trickle, UpdateSettings,
};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Where the session is in its lifecycle.
#[derive(Debug)]
enum SessionState {
    Unjoined,
    Joined {
        room_id: RoomId,
        participant_id: ParticipantId,
    },
    Closed,
}

/// What a joined session needs to handle a message.
struct Joined {
    peer: Arc<dyn MediaPeer>,
    room_id: RoomId,
    participant_id: ParticipantId,
}

/// Per-connection signaling state machine.
pub struct SignalSession {
    connection_id: String,
    engine: Arc<dyn MediaEngine>,
    broadcaster: Arc<StreamBroadcaster>,
    sink: Sink,
    /// Created on the first Join and reused by later ones.
    peer: Option<Arc<dyn MediaPeer>>,
    state: SessionState,
    /// Streams announced with ADD, in announcement order, unique by stream id.
    contributed: Vec<Stream>,
}

impl SignalSession {
    #[must_use]
    pub fn new(
        connection_id: impl Into<String>,
        engine: Arc<dyn MediaEngine>,
        broadcaster: Arc<StreamBroadcaster>,
        sink: Sink,
    ) -> Self {
        Self {
            connection_id: connection_id.into(),
            engine,
            broadcaster,
            sink,
            peer: None,
            state: SessionState::Unjoined,
            contributed: Vec::new(),
        }
    }

    /// Run the session until the inbound stream ends, fails, or `cancel` fires.
    ///
    /// End of input and cancellation are clean terminations.
    ///
    /// # Errors
    ///
    /// - `SignalError::Internal` - join or answer failed, or a Join reply could not be sent
    /// - `SignalError::Unknown` - unclassified media engine failure
    /// - `SignalError::Transport` - reading from the connection failed
    #[instrument(
        skip_all,
        name = "signal.session",
        fields(connection_id = %self.connection_id)
    )]
    pub async fn run<S>(mut self, mut inbound: S, cancel: CancellationToken) -> Result<(), SignalError>
    where
        S: futures::Stream<Item = Result<SignalRequest, TransportError>> + Unpin + Send,
    {
        debug!(
            target: "signal.session",
            connection_id = %self.connection_id,
            "Session started"
        );

        let result = loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    debug!(
                        target: "signal.session",
                        connection_id = %self.connection_id,
                        "Session received cancellation signal"
                    );
                    break Ok(());
                }

                next = inbound.next() => {
                    match next {
                        Some(Ok(request)) => {
                            let message_type = request.message_type();
                            let started = Instant::now();
                            let outcome = self.handle_request(request).await;
                            metrics::record_message(message_type, started.elapsed());
                            if let Err(e) = outcome {
                                break Err(e);
                            }
                        }
                        Some(Err(TransportError::Malformed(reason))) => {
                            self.send_error(
                                ErrorCode::BadRequest,
                                format!("malformed message: {reason}"),
                            )
                            .await;
                        }
                        Some(Err(e)) => break Err(SignalError::from(e)),
                        None => {
                            debug!(
                                target: "signal.session",
                                connection_id = %self.connection_id,
                                "Inbound stream ended"
                            );
                            break Ok(());
                        }
                    }
                }
            }
        };

        self.teardown().await;

        let outcome = match &result {
            Ok(()) => "clean",
            Err(e) => e.outcome(),
        };
        metrics::record_session_termination(outcome);
        match &result {
            Ok(()) => info!(
                target: "signal.session",
                connection_id = %self.connection_id,
                "Session closed"
            ),
            Err(e) => warn!(
                target: "signal.session",
                connection_id = %self.connection_id,
                error = %e,
                "Session terminated with error"
            ),
        }
        result
    }

    async fn handle_request(&mut self, request: SignalRequest) -> Result<(), SignalError> {
        match request {
            SignalRequest::Join(join) => self.handle_join(join).await,
            SignalRequest::Description(description) => {
                let Some(joined) = self.require_joined("description").await else {
                    return Ok(());
                };
                self.handle_description(joined, description).await
            }
            SignalRequest::Trickle(trickle) => {
                let Some(joined) = self.require_joined("trickle").await else {
                    return Ok(());
                };
                self.handle_trickle(&joined, trickle).await
            }
            SignalRequest::UpdateSettings(UpdateSettings::Subscription(subscription)) => {
                let Some(joined) = self.require_joined("update_settings").await else {
                    return Ok(());
                };
                self.handle_subscription(&joined, subscription).await
            }
        }
    }

    /// The joined context, or `None` after rejecting `operation` with `BadRequest`.
    async fn require_joined(&self, operation: &str) -> Option<Joined> {
        if let (
            SessionState::Joined {
                room_id,
                participant_id,
            },
            Some(peer),
        ) = (&self.state, &self.peer)
        {
            return Some(Joined {
                peer: Arc::clone(peer),
                room_id: room_id.clone(),
                participant_id: participant_id.clone(),
            });
        }

        self.send_error(
            ErrorCode::BadRequest,
            format!("{operation} requires a joined session"),
        )
        .await;
        None
    }

    async fn handle_join(&mut self, join: JoinRequest) -> Result<(), SignalError> {
        let peer = match &self.peer {
            Some(peer) => Arc::clone(peer),
            None => {
                let peer = self.engine.new_peer();
                self.peer = Some(Arc::clone(&peer));
                peer
            }
        };

        let observer = Arc::new(SignalObserver::new(
            self.connection_id.clone(),
            self.sink.clone(),
        ));
        let config = JoinConfig {
            no_auto_subscribe: true,
            ..JoinConfig::default()
        };

        match peer
            .join(&join.room_id, &join.participant_id, config, observer)
            .await
        {
            Ok(()) => {}
            Err(e @ (EngineError::TransportExists | EngineError::OfferIgnored)) => {
                self.send_error(ErrorCode::InternalError, format!("join error: {e}"))
                    .await;
                return Ok(());
            }
            Err(e) => return Err(SignalError::Internal(format!("join error: {e}"))),
        }

        self.send_required(SignalReply::Reply(JoinReply {
            success: true,
            error: None,
        }))
        .await?;

        let snapshot = room_snapshot(&join.participant_id, peer.room_participants().await);
        let snapshot_streams = snapshot.len();
        self.send_required(SignalReply::StreamEvent(StreamEvent::add(snapshot)))
            .await?;

        self.broadcaster
            .register(&join.room_id, &join.participant_id, self.sink.clone())
            .await;

        info!(
            target: "signal.session",
            connection_id = %self.connection_id,
            room_id = %join.room_id,
            participant_id = %join.participant_id,
            snapshot_streams,
            "Participant joined"
        );

        self.state = SessionState::Joined {
            room_id: join.room_id,
            participant_id: join.participant_id,
        };
        Ok(())
    }

    async fn handle_description(
        &mut self,
        joined: Joined,
        description: SessionDescription,
    ) -> Result<(), SignalError> {
        match description.sdp_type {
            SdpType::Offer => {
                let answer = joined
                    .peer
                    .answer(&description.sdp)
                    .await
                    .map_err(|e| SignalError::Internal(format!("answer error: {e}")))?;

                self.send_best_effort(SignalReply::Description(SessionDescription {
                    target: Target::Publisher,
                    sdp_type: SdpType::Answer,
                    sdp: answer,
                }))
                .await;

                self.announce_streams(&joined, &description.sdp).await;
                Ok(())
            }
            SdpType::Answer => match joined.peer.set_remote_description(&description.sdp).await {
                Ok(()) => Ok(()),
                Err(e @ EngineError::NoTransportEstablished) => {
                    self.send_error(
                        ErrorCode::UnsupportedMediaType,
                        format!("set remote description error: {e}"),
                    )
                    .await;
                    Ok(())
                }
                Err(e) => Err(SignalError::Unknown(format!(
                    "set remote description error: {e}"
                ))),
            },
        }
    }

    /// Broadcast the streams declared by a publisher offer to the rest of the room.
    async fn announce_streams(&mut self, joined: &Joined, offer: &str) {
        let streams = match extract_streams(&joined.participant_id, offer) {
            Ok(streams) => streams,
            Err(e) => {
                warn!(
                    target: "signal.session",
                    connection_id = %self.connection_id,
                    error = %e,
                    "Failed to extract streams from offer"
                );
                return;
            }
        };
        if streams.is_empty() {
            return;
        }

        merge_streams(&mut self.contributed, &streams);
        let delivered = self
            .broadcaster
            .broadcast(
                &joined.room_id,
                &StreamEvent::add(streams),
                Some(&joined.participant_id),
            )
            .await;

        debug!(
            target: "signal.session",
            connection_id = %self.connection_id,
            contributed = self.contributed.len(),
            delivered,
            "Announced published streams"
        );
    }

    async fn handle_trickle(&mut self, joined: &Joined, trickle: Trickle) -> Result<(), SignalError> {
        let candidate: IceCandidateInit = match serde_json::from_str(&trickle.init) {
            Ok(candidate) => candidate,
            Err(e) => {
                self.send_error(
                    ErrorCode::InternalError,
                    format!("unmarshal ice candidate error: {e}"),
                )
                .await;
                return Ok(());
            }
        };

        match joined.peer.trickle(candidate, trickle.target).await {
            Ok(()) => Ok(()),
            Err(e @ EngineError::NoTransportEstablished) => {
                self.send_error(ErrorCode::UnsupportedMediaType, format!("trickle error: {e}"))
                    .await;
                Ok(())
            }
            Err(e) => Err(SignalError::Unknown(format!("trickle error: {e}"))),
        }
    }

    async fn handle_subscription(
        &mut self,
        joined: &Joined,
        subscription: Subscription,
    ) -> Result<(), SignalError> {
        let requested: BTreeSet<&str> = subscription.track_ids.iter().map(String::as_str).collect();

        let mut changed = false;
        if subscription.subscribe {
            let already_forwarded: BTreeSet<(ParticipantId, String)> = joined
                .peer
                .forwarded_tracks()
                .await
                .into_iter()
                .map(|f| (f.publisher_id, f.track_id))
                .collect();

            // A simulcast track appears once per layer; forward it once.
            let mut matches: BTreeSet<(ParticipantId, String)> = BTreeSet::new();
            for participant in joined.peer.room_participants().await {
                if participant.participant_id == joined.participant_id {
                    continue;
                }
                for track in participant.tracks {
                    if requested.contains(track.track_id.as_str()) {
                        matches.insert((participant.participant_id.clone(), track.track_id));
                    }
                }
            }

            for (publisher_id, track_id) in matches.difference(&already_forwarded) {
                match joined.peer.add_forwarding(publisher_id, track_id).await {
                    Ok(()) => changed = true,
                    Err(e @ EngineError::TrackNotFound(_)) => {
                        self.skip_vanished_track(track_id, &e);
                    }
                    Err(e) => return self.subscription_failure(e).await,
                }
            }
        } else {
            let matches: Vec<(String, String)> = joined
                .peer
                .forwarded_tracks()
                .await
                .into_iter()
                .filter(|f| requested.contains(f.track_id.as_str()))
                .map(|f| (f.stream_id, f.track_id))
                .collect();

            for (stream_id, track_id) in &matches {
                match joined.peer.remove_forwarding(stream_id, track_id).await {
                    Ok(()) => changed = true,
                    Err(e @ EngineError::TrackNotFound(_)) => {
                        self.skip_vanished_track(track_id, &e);
                    }
                    Err(e) => return self.subscription_failure(e).await,
                }
            }
        }

        if changed {
            debug!(
                target: "signal.session",
                connection_id = %self.connection_id,
                subscribe = subscription.subscribe,
                "Forwarding changed, renegotiating subscriber"
            );
            if let Err(e) = joined.peer.negotiate().await {
                return self.subscription_failure(e).await;
            }
        }
        Ok(())
    }

    /// A matched track disappeared before its forwarding path changed.
    fn skip_vanished_track(&self, track_id: &str, error: &EngineError) {
        debug!(
            target: "signal.session",
            connection_id = %self.connection_id,
            track_id,
            error = %error,
            "Skipping track that is no longer published"
        );
    }

    async fn subscription_failure(&self, error: EngineError) -> Result<(), SignalError> {
        match error {
            EngineError::NoTransportEstablished => {
                self.send_error(
                    ErrorCode::UnsupportedMediaType,
                    format!("subscription error: {error}"),
                )
                .await;
                Ok(())
            }
            other => Err(SignalError::Unknown(format!("subscription error: {other}"))),
        }
    }

    async fn teardown(&mut self) {
        if let Some(peer) = self.peer.take() {
            peer.close().await;
        }

        let state = std::mem::replace(&mut self.state, SessionState::Closed);
        let SessionState::Joined {
            room_id,
            participant_id,
        } = state
        else {
            return;
        };

        self.broadcaster
            .unregister(&room_id, &participant_id, &self.sink)
            .await;

        if !self.contributed.is_empty() {
            let streams = std::mem::take(&mut self.contributed);
            self.broadcaster
                .broadcast(
                    &room_id,
                    &StreamEvent::remove(streams),
                    Some(&participant_id),
                )
                .await;
        }

        debug!(
            target: "signal.session",
            connection_id = %self.connection_id,
            room_id = %room_id,
            participant_id = %participant_id,
            state = ?self.state,
            "Session torn down"
        );
    }

    /// Send a reply whose loss ends the session.
    async fn send_required(&self, reply: SignalReply) -> Result<(), SignalError> {
        let message_type = reply.message_type();
        self.sink.send(reply).await.map_err(|_| {
            SignalError::Internal(format!("failed to send {message_type}: connection closed"))
        })
    }

    async fn send_best_effort(&self, reply: SignalReply) {
        let message_type = reply.message_type();
        if self.sink.send(reply).await.is_err() {
            warn!(
                target: "signal.session",
                connection_id = %self.connection_id,
                message_type,
                "Failed to send reply, connection closed"
            );
        }
    }

    async fn send_error(&self, code: ErrorCode, reason: String) {
        metrics::record_protocol_error(code.as_str());
        debug!(
            target: "signal.session",
            connection_id = %self.connection_id,
            code = code.as_i32(),
            reason = %reason,
            "Reporting protocol error"
        );
        self.send_best_effort(SignalReply::error(code, reason)).await;
    }
}

/// Streams published by everyone in the room except `self_id`, ordered by
/// owner and stream id.
fn room_snapshot(self_id: &ParticipantId, participants: Vec<ParticipantTracks>) -> Vec<Stream> {
    let mut grouped: BTreeMap<(ParticipantId, String), Stream> = BTreeMap::new();

    for participant in participants {
        if participant.participant_id == *self_id {
            continue;
        }
        for track in participant.tracks {
            grouped
                .entry((participant.participant_id.clone(), track.stream_id.clone()))
                .or_insert_with(|| Stream::new(participant.participant_id.clone(), track.stream_id))
                .tracks
                .push(Track::new(track.track_id, track.kind, track.rid));
        }
    }

    grouped.into_values().collect()
}

/// Merge `streams` into `contributed`; a re-declared stream replaces its entry.
fn merge_streams(contributed: &mut Vec<Stream>, streams: &[Stream]) {
    for stream in streams {
        match contributed
            .iter_mut()
            .find(|existing| existing.stream_id == stream.stream_id)
        {
            Some(existing) => *existing = stream.clone(),
            None => contributed.push(stream.clone()),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use crate::engine::{LoopbackEngine, PublishedTrack, RoomRegistry};
    use signal_protocol::{StreamState, TrackKind};
    use std::time::Duration;
    use tokio::sync::mpsc;
    use tokio::time::timeout;

    fn published(track_id: &str, stream_id: &str) -> PublishedTrack {
        PublishedTrack {
            track_id: track_id.to_string(),
            stream_id: stream_id.to_string(),
            kind: TrackKind::Video,
            rid: String::new(),
        }
    }

    #[test]
    fn test_snapshot_groups_by_owner_and_stream() {
        let participants = vec![
            ParticipantTracks {
                participant_id: ParticipantId::from("carol"),
                tracks: vec![published("c1", "cs")],
            },
            ParticipantTracks {
                participant_id: ParticipantId::from("bob"),
                tracks: vec![published("b2", "bs2"), published("b1", "bs1"), published("b3", "bs1")],
            },
            ParticipantTracks {
                participant_id: ParticipantId::from("alice"),
                tracks: vec![published("a1", "as")],
            },
        ];

        let snapshot = room_snapshot(&ParticipantId::from("alice"), participants);
        let keys: Vec<(&str, &str)> = snapshot
            .iter()
            .map(|s| (s.participant_id.as_str(), s.stream_id.as_str()))
            .collect();
        assert_eq!(keys, vec![("bob", "bs1"), ("bob", "bs2"), ("carol", "cs")]);
        assert_eq!(snapshot[0].tracks.len(), 2);
    }

    #[test]
    fn test_merge_replaces_redeclared_stream() {
        let owner = ParticipantId::from("alice");
        let mut first = Stream::new(owner.clone(), "s1");
        first.tracks.push(Track::new("a1", TrackKind::Audio, ""));
        let mut redeclared = Stream::new(owner.clone(), "s1");
        redeclared.tracks.push(Track::new("a2", TrackKind::Audio, ""));

        let mut contributed = Vec::new();
        merge_streams(&mut contributed, &[first]);
        merge_streams(&mut contributed, &[redeclared.clone(), Stream::new(owner, "s2")]);

        assert_eq!(contributed.len(), 2);
        assert_eq!(contributed[0], redeclared);
        assert_eq!(contributed[1].stream_id, "s2");
    }

    #[tokio::test]
    async fn test_join_then_cancel_runs_teardown() {
        let registry = Arc::new(RoomRegistry::new());
        let engine: Arc<dyn MediaEngine> = Arc::new(LoopbackEngine::new(Arc::clone(&registry)));
        let broadcaster = Arc::new(StreamBroadcaster::new());
        let (sink, mut replies) = mpsc::channel(16);
        let (requests, inbound) = mpsc::channel(16);
        let cancel = CancellationToken::new();

        let session = SignalSession::new("conn-1", engine, Arc::clone(&broadcaster), sink);
        let task = tokio::spawn(session.run(
            tokio_stream::wrappers::ReceiverStream::new(inbound),
            cancel.clone(),
        ));

        requests
            .send(Ok(SignalRequest::Join(JoinRequest {
                room_id: RoomId::from("room-1"),
                participant_id: ParticipantId::from("alice"),
            })))
            .await
            .unwrap();

        let reply = timeout(Duration::from_secs(1), replies.recv()).await.unwrap();
        assert!(matches!(reply, Some(SignalReply::Reply(JoinReply { success: true, .. }))));
        match timeout(Duration::from_secs(1), replies.recv()).await.unwrap() {
            Some(SignalReply::StreamEvent(event)) => {
                assert_eq!(event.state, StreamState::Add);
                assert!(event.streams.is_empty());
            }
            other => unreachable!("unexpected reply: {other:?}"),
        }

        // Registration follows the snapshot send; wait for it.
        timeout(Duration::from_secs(1), async {
            while broadcaster.session_count().await == 0 {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();

        cancel.cancel();
        let result = timeout(Duration::from_secs(1), task).await.unwrap().unwrap();
        assert!(result.is_ok());
        assert_eq!(broadcaster.session_count().await, 0);
        assert_eq!(registry.room_count().await, 0);
    }
}
