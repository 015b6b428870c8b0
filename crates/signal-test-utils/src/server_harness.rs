//! Signal server harness for end-to-end tests.
//!
//! Provides `TestSignalServer`, a real WebSocket signaling server on a random
//! local port, backed by the loopback engine.

use signal_service::broadcaster::StreamBroadcaster;
use signal_service::config::Config;
use signal_service::engine::{LoopbackEngine, MediaEngine, RoomRegistry};
use signal_service::server::{self, AppState};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Running signaling server.
pub struct TestSignalServer {
    addr: SocketAddr,
    registry: Arc<RoomRegistry>,
    broadcaster: Arc<StreamBroadcaster>,
    state: AppState,
    shutdown: CancellationToken,
    handle: JoinHandle<()>,
}

impl TestSignalServer {
    /// Spawn a server on `127.0.0.1:0` with default configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or the listener
    /// cannot be bound.
    pub async fn spawn() -> Result<Self, anyhow::Error> {
        Self::spawn_with(&HashMap::new()).await
    }

    /// Spawn a server with configuration overrides (`SIGNAL_*` variables).
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or the listener
    /// cannot be bound.
    pub async fn spawn_with(vars: &HashMap<String, String>) -> Result<Self, anyhow::Error> {
        let config = Config::from_vars(vars)
            .map_err(|e| anyhow::anyhow!("Failed to create config: {e}"))?;

        let registry = Arc::new(RoomRegistry::new());
        let engine: Arc<dyn MediaEngine> = Arc::new(LoopbackEngine::new(Arc::clone(&registry)));
        let broadcaster = Arc::new(StreamBroadcaster::new());
        let shutdown = CancellationToken::new();

        let state = AppState::new(
            engine,
            Arc::clone(&broadcaster),
            config.outbound_buffer,
            config.max_message_bytes,
            shutdown.clone(),
        );

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;

        let serve_state = state.clone();
        let handle = tokio::spawn(async move {
            if let Err(e) = server::serve(listener, serve_state).await {
                eprintln!("Signal server error: {e}");
            }
        });

        Ok(Self {
            addr,
            registry,
            broadcaster,
            state,
            shutdown,
            handle,
        })
    }

    /// WebSocket URL of the signaling endpoint.
    pub fn ws_url(&self) -> String {
        format!("ws://{}/ws", self.addr)
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn registry(&self) -> &Arc<RoomRegistry> {
        &self.registry
    }

    pub fn broadcaster(&self) -> &Arc<StreamBroadcaster> {
        &self.broadcaster
    }

    /// Number of open signaling connections.
    pub fn active_connections(&self) -> u64 {
        self.state.active_connections()
    }

    /// Cancel every session and stop accepting connections.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }
}

impl Drop for TestSignalServer {
    fn drop(&mut self) {
        self.shutdown.cancel();
        self.handle.abort();
    }
}
