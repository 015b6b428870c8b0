//! WebSocket transport for signaling sessions.
//!
//! `GET /ws` upgrades to a WebSocket carrying one JSON message per text
//! frame. Each connection gets a [`SignalSession`] fed by the decoded inbound
//! frames and a writer task that drains the session's outbound channel.
//! When the session ends the writer flushes queued replies and closes the
//! socket with a code derived from the outcome:
//!
//! | Outcome | Close code |
//! |---------|------------|
//! | Clean | 1000 |
//! | `SignalError::Internal` | 1011 |
//! | `SignalError::Unknown` | 4000 |
//! | `SignalError::Transport` | none (connection already gone) |

use crate::broadcaster::StreamBroadcaster;
use crate::engine::MediaEngine;
use crate::errors::{SignalError, TransportError};
use crate::observability::metrics;
use crate::session::SignalSession;
use axum::extract::ws::{close_code, CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use axum::routing::get;
use axum::Router;
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use signal_protocol::{decode_request, encode_reply, SignalReply};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

/// WebSocket close reasons are limited to 123 bytes.
const MAX_CLOSE_REASON_BYTES: usize = 123;

/// Shared state of the signaling server.
#[derive(Clone)]
pub struct AppState {
    engine: Arc<dyn MediaEngine>,
    broadcaster: Arc<StreamBroadcaster>,
    outbound_buffer: usize,
    max_message_bytes: usize,
    /// Parent of every session's cancellation token.
    shutdown: CancellationToken,
    connections: Arc<AtomicU64>,
}

impl AppState {
    #[must_use]
    pub fn new(
        engine: Arc<dyn MediaEngine>,
        broadcaster: Arc<StreamBroadcaster>,
        outbound_buffer: usize,
        max_message_bytes: usize,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            engine,
            broadcaster,
            outbound_buffer,
            max_message_bytes,
            shutdown,
            connections: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Number of open signaling connections.
    #[must_use]
    pub fn active_connections(&self) -> u64 {
        self.connections.load(Ordering::SeqCst)
    }
}

/// Router serving the signaling WebSocket at `/ws`.
pub fn signal_router(state: AppState) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve signaling connections on `listener` until the state's shutdown
/// token is cancelled.
///
/// # Errors
///
/// Returns the I/O error that stopped the server.
pub async fn serve(listener: TcpListener, state: AppState) -> std::io::Result<()> {
    let shutdown = state.shutdown.clone();
    axum::serve(listener, signal_router(state))
        .with_graceful_shutdown(async move {
            shutdown.cancelled().await;
            info!(target: "signal.server", "Signal server shutting down");
        })
        .await
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.max_message_size(state.max_message_bytes)
        .on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let connection_id = uuid::Uuid::new_v4().to_string();
    let active = state.connections.fetch_add(1, Ordering::SeqCst) + 1;
    metrics::set_connections_active(active);
    info!(
        target: "signal.server",
        connection_id = %connection_id,
        active_connections = active,
        "Connection accepted"
    );

    let (ws_tx, ws_rx) = socket.split();
    let (sink, outbound) = mpsc::channel(state.outbound_buffer);
    let (close_tx, close_rx) = oneshot::channel();
    let writer = tokio::spawn(write_loop(ws_tx, outbound, close_rx, connection_id.clone()));

    let inbound = Box::pin(ws_rx.filter_map(|frame| async move {
        match frame {
            Ok(Message::Text(text)) => Some(decode_frame(&text)),
            Ok(Message::Binary(bytes)) => Some(match std::str::from_utf8(&bytes) {
                Ok(text) => decode_frame(text),
                Err(e) => Err(TransportError::Malformed(e.to_string())),
            }),
            Ok(Message::Ping(_) | Message::Pong(_) | Message::Close(_)) => None,
            Err(e) => Some(Err(TransportError::Connection(e.to_string()))),
        }
    }));

    let session = SignalSession::new(
        connection_id.clone(),
        Arc::clone(&state.engine),
        Arc::clone(&state.broadcaster),
        sink,
    );
    let result = session.run(inbound, state.shutdown.child_token()).await;

    let _ = close_tx.send(close_frame(&result));
    if let Err(e) = writer.await {
        warn!(
            target: "signal.server",
            connection_id = %connection_id,
            error = %e,
            "Writer task failed"
        );
    }

    let active = state.connections.fetch_sub(1, Ordering::SeqCst).saturating_sub(1);
    metrics::set_connections_active(active);
    info!(
        target: "signal.server",
        connection_id = %connection_id,
        active_connections = active,
        clean = result.is_ok(),
        "Connection closed"
    );
}

fn decode_frame(text: &str) -> Result<signal_protocol::SignalRequest, TransportError> {
    decode_request(text).map_err(|e| TransportError::Malformed(e.to_string()))
}

/// Close frame for a session outcome; `None` when no frame should be sent.
fn close_frame(result: &Result<(), SignalError>) -> Option<CloseFrame<'static>> {
    match result {
        Ok(()) => Some(CloseFrame {
            code: close_code::NORMAL,
            reason: "".into(),
        }),
        Err(e) => e.close_code().map(|code| CloseFrame {
            code,
            reason: truncate_reason(&e.to_string()).into(),
        }),
    }
}

fn truncate_reason(reason: &str) -> String {
    let mut end = reason.len().min(MAX_CLOSE_REASON_BYTES);
    while !reason.is_char_boundary(end) {
        end -= 1;
    }
    reason.get(..end).unwrap_or_default().to_string()
}

/// Forward outbound replies to the socket, then close it once the session
/// has ended.
async fn write_loop(
    mut ws_tx: SplitSink<WebSocket, Message>,
    mut outbound: mpsc::Receiver<SignalReply>,
    mut close_rx: oneshot::Receiver<Option<CloseFrame<'static>>>,
    connection_id: String,
) {
    let frame = loop {
        tokio::select! {
            biased;

            reply = outbound.recv() => match reply {
                Some(reply) => {
                    if !write_reply(&mut ws_tx, &reply, &connection_id).await {
                        return;
                    }
                }
                None => break close_rx.await.ok().flatten(),
            },

            frame = &mut close_rx => {
                while let Ok(reply) = outbound.try_recv() {
                    if !write_reply(&mut ws_tx, &reply, &connection_id).await {
                        return;
                    }
                }
                break frame.ok().flatten();
            }
        }
    };

    if let Some(frame) = frame {
        debug!(
            target: "signal.server",
            connection_id = %connection_id,
            code = frame.code,
            "Sending close frame"
        );
        let _ = ws_tx.send(Message::Close(Some(frame))).await;
    }
    let _ = ws_tx.close().await;
}

/// Returns false once the socket can no longer be written.
async fn write_reply(
    ws_tx: &mut SplitSink<WebSocket, Message>,
    reply: &SignalReply,
    connection_id: &str,
) -> bool {
    let text = match encode_reply(reply) {
        Ok(text) => text,
        Err(e) => {
            warn!(
                target: "signal.server",
                connection_id = %connection_id,
                message_type = reply.message_type(),
                error = %e,
                "Failed to encode reply"
            );
            return true;
        }
    };

    if let Err(e) = ws_tx.send(Message::Text(text)).await {
        debug!(
            target: "signal.server",
            connection_id = %connection_id,
            error = %e,
            "Socket write failed"
        );
        return false;
    }
    true
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_close_frame_mapping() {
        assert_eq!(close_frame(&Ok(())).unwrap().code, close_code::NORMAL);
        assert_eq!(
            close_frame(&Err(SignalError::Internal("join error".to_string())))
                .unwrap()
                .code,
            crate::errors::CLOSE_CODE_INTERNAL
        );
        assert_eq!(
            close_frame(&Err(SignalError::Unknown("engine".to_string())))
                .unwrap()
                .code,
            crate::errors::CLOSE_CODE_UNKNOWN
        );
        assert!(close_frame(&Err(SignalError::Transport(TransportError::Connection(
            "reset".to_string()
        ))))
        .is_none());
    }

    #[test]
    fn test_close_reason_is_truncated_on_char_boundary() {
        let long = "é".repeat(100);
        let truncated = truncate_reason(&long);
        assert!(truncated.len() <= MAX_CLOSE_REASON_BYTES);
        assert!(truncated.chars().all(|c| c == 'é'));
        assert_eq!(truncate_reason("short"), "short");
    }
}
