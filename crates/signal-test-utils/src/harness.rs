//! Session harness.
//!
//! Runs a `SignalSession` on its own task with channel-backed input and
//! output, so tests can play the client side message by message.

use signal_protocol::{
    ErrorCode, ParticipantId, ProtocolError, RoomId, SignalReply, SignalRequest, StreamEvent,
};
use signal_service::broadcaster::{Sink, StreamBroadcaster};
use signal_service::engine::MediaEngine;
use signal_service::errors::{SignalError, TransportError};
use signal_service::session::SignalSession;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;

/// How long `recv` waits for a reply before failing the test.
pub const RECV_TIMEOUT: Duration = Duration::from_secs(2);

/// How long `expect_silence` listens.
pub const SILENCE_WINDOW: Duration = Duration::from_millis(100);

/// Client side of one running session.
pub struct SessionHarness {
    requests: Option<mpsc::Sender<Result<SignalRequest, TransportError>>>,
    replies: mpsc::Receiver<SignalReply>,
    sink: Sink,
    cancel: CancellationToken,
    task: Option<JoinHandle<Result<(), SignalError>>>,
}

impl SessionHarness {
    /// Spawn a session on `engine` sharing `broadcaster`.
    pub fn spawn(
        connection_id: &str,
        engine: Arc<dyn MediaEngine>,
        broadcaster: Arc<StreamBroadcaster>,
    ) -> Self {
        let (requests, inbound) = mpsc::channel(32);
        let (sink, replies) = mpsc::channel(64);
        let cancel = CancellationToken::new();

        let session = SignalSession::new(connection_id, engine, broadcaster, sink.clone());
        let task = tokio::spawn(session.run(ReceiverStream::new(inbound), cancel.clone()));

        Self {
            requests: Some(requests),
            replies,
            sink,
            cancel,
            task: Some(task),
        }
    }

    /// The session's outbound sink, for identity checks against the broadcaster.
    pub fn sink(&self) -> &Sink {
        &self.sink
    }

    pub async fn send(&self, request: SignalRequest) {
        self.send_raw(Ok(request)).await;
    }

    /// Feed a frame that failed to decode.
    pub async fn send_malformed(&self, reason: &str) {
        self.send_raw(Err(TransportError::Malformed(reason.to_string())))
            .await;
    }

    /// Feed a connection failure.
    pub async fn send_connection_error(&self, reason: &str) {
        self.send_raw(Err(TransportError::Connection(reason.to_string())))
            .await;
    }

    async fn send_raw(&self, item: Result<SignalRequest, TransportError>) {
        self.requests
            .as_ref()
            .expect("input already closed")
            .send(item)
            .await
            .expect("session stopped reading");
    }

    /// Next reply, failing the test after `RECV_TIMEOUT`.
    pub async fn recv(&mut self) -> SignalReply {
        timeout(RECV_TIMEOUT, self.replies.recv())
            .await
            .expect("timed out waiting for reply")
            .expect("reply channel closed")
    }

    /// Assert that nothing arrives within `SILENCE_WINDOW`.
    pub async fn expect_silence(&mut self) {
        if let Ok(Some(reply)) = timeout(SILENCE_WINDOW, self.replies.recv()).await {
            panic!("expected no reply, got {reply:?}");
        }
    }

    pub async fn expect_error(&mut self, code: ErrorCode) -> ProtocolError {
        match self.recv().await {
            SignalReply::Error(error) => {
                assert_eq!(error.code, code, "unexpected error: {error:?}");
                error
            }
            other => panic!("expected error {code:?}, got {other:?}"),
        }
    }

    pub async fn expect_stream_event(&mut self) -> StreamEvent {
        match self.recv().await {
            SignalReply::StreamEvent(event) => event,
            other => panic!("expected stream event, got {other:?}"),
        }
    }

    /// Join and consume the reply; returns the room snapshot.
    ///
    /// Waits until the session is registered with `broadcaster`, so that
    /// broadcasts issued afterwards reach it.
    pub async fn join(
        &mut self,
        broadcaster: &StreamBroadcaster,
        room_id: &str,
        participant_id: &str,
    ) -> StreamEvent {
        self.send(crate::fixtures::join(room_id, participant_id))
            .await;
        match self.recv().await {
            SignalReply::Reply(reply) => assert!(reply.success, "join failed: {reply:?}"),
            other => panic!("expected join reply, got {other:?}"),
        }
        let snapshot = self.expect_stream_event().await;
        self.wait_registered(broadcaster, room_id, participant_id)
            .await;
        snapshot
    }

    /// Wait until this session's sink is registered for the participant.
    pub async fn wait_registered(
        &self,
        broadcaster: &StreamBroadcaster,
        room_id: &str,
        participant_id: &str,
    ) {
        let room_id = RoomId::from(room_id);
        let participant_id = ParticipantId::from(participant_id);
        timeout(RECV_TIMEOUT, async {
            loop {
                let registered = broadcaster
                    .sink_for(&room_id, &participant_id)
                    .await
                    .is_some_and(|sink| sink.same_channel(&self.sink));
                if registered {
                    return;
                }
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("session was not registered");
    }

    /// End the inbound stream; the session terminates cleanly.
    pub fn close_input(&mut self) {
        self.requests = None;
    }

    /// Cancel the session's token.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Wait for the session task and return its outcome.
    pub async fn finish(&mut self) -> Result<(), SignalError> {
        let task = self.task.take().expect("session already finished");
        timeout(RECV_TIMEOUT, task)
            .await
            .expect("session did not terminate")
            .expect("session task panicked")
    }

    /// Replies still queued after the session ended.
    pub fn drain(&mut self) -> Vec<SignalReply> {
        let mut drained = Vec::new();
        while let Ok(reply) = self.replies.try_recv() {
            drained.push(reply);
        }
        drained
    }
}

impl Drop for SessionHarness {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
