//! SFU Signal Service
//!
//! WebSocket signaling front end for the media engine.
//!
//! # Servers
//!
//! - WebSocket signaling server (default: 0.0.0.0:7000, path `/ws`)
//! - HTTP server for health and metrics (default: 0.0.0.0:8081)
//!
//! # Startup Flow
//!
//! 1. Load configuration from environment
//! 2. Initialize tracing
//! 3. Initialize Prometheus metrics recorder
//! 4. Start health HTTP server (liveness, readiness, metrics)
//! 5. Create the media engine and the stream broadcaster
//! 6. Bind and start the signaling server, then report ready
//! 7. Wait for shutdown signal

#![warn(clippy::pedantic)]

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use signal_service::broadcaster::StreamBroadcaster;
use signal_service::config::{Config, LogFormat};
use signal_service::engine::{LoopbackEngine, MediaEngine, RoomRegistry};
use signal_service::observability::{health_router, init_metrics_recorder, HealthState};
use signal_service::server::{self, AppState};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::from_env()?;

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "signal_service=debug,tower_http=debug".into());
    let subscriber = tracing_subscriber::registry().with(filter);
    match config.log_format {
        LogFormat::Json => subscriber.with(tracing_subscriber::fmt::layer().json()).init(),
        LogFormat::Text => subscriber.with(tracing_subscriber::fmt::layer()).init(),
    }

    info!(
        instance_id = %config.instance_id,
        bind_address = %config.bind_address,
        health_bind_address = %config.health_bind_address,
        outbound_buffer = config.outbound_buffer,
        max_message_bytes = config.max_message_bytes,
        shutdown_grace_seconds = config.shutdown_grace_period.as_secs(),
        "Starting Signal Service"
    );

    // Must happen before any metrics are recorded
    let prometheus_handle = init_metrics_recorder().map_err(|e| {
        error!(error = %e, "Failed to install Prometheus metrics recorder");
        e
    })?;

    let health_state = Arc::new(HealthState::new(config.instance_id.clone()));
    let shutdown_token = CancellationToken::new();

    // Health server: bind before spawning to fail fast on bind errors
    let health_addr: SocketAddr = config.health_bind_address.parse().map_err(|e| {
        error!(error = %e, addr = %config.health_bind_address, "Invalid health bind address");
        format!("Invalid health bind address: {e}")
    })?;

    let metrics_router = Router::new().route(
        "/metrics",
        axum::routing::get(move || {
            let handle = prometheus_handle.clone();
            async move { handle.render() }
        }),
    );
    let health_app = health_router(Arc::clone(&health_state)).merge(metrics_router);

    let health_listener = tokio::net::TcpListener::bind(health_addr)
        .await
        .map_err(|e| {
            error!(error = %e, addr = %health_addr, "Failed to bind health server");
            format!("Failed to bind health server to {health_addr}: {e}")
        })?;

    let health_shutdown_token = shutdown_token.child_token();
    tokio::spawn(async move {
        info!(addr = %health_addr, "Health server starting");
        let server = axum::serve(health_listener, health_app).with_graceful_shutdown(async move {
            health_shutdown_token.cancelled().await;
            info!("Health server shutting down");
        });
        if let Err(e) = server.await {
            error!(error = %e, "Health server failed");
        }
    });

    let registry = Arc::new(RoomRegistry::new());
    let engine: Arc<dyn MediaEngine> = Arc::new(LoopbackEngine::new(registry));
    let broadcaster = Arc::new(StreamBroadcaster::new());

    let signal_addr: SocketAddr = config.bind_address.parse().map_err(|e| {
        error!(error = %e, addr = %config.bind_address, "Invalid signal bind address");
        format!("Invalid signal bind address: {e}")
    })?;
    let signal_listener = tokio::net::TcpListener::bind(signal_addr)
        .await
        .map_err(|e| {
            error!(error = %e, addr = %signal_addr, "Failed to bind signal server");
            format!("Failed to bind signal server to {signal_addr}: {e}")
        })?;

    let state = AppState::new(
        engine,
        broadcaster,
        config.outbound_buffer,
        config.max_message_bytes,
        shutdown_token.child_token(),
    );
    tokio::spawn(async move {
        info!(addr = %signal_addr, "Signal server starting");
        if let Err(e) = server::serve(signal_listener, state).await {
            error!(error = %e, "Signal server failed");
        }
    });

    health_state.set_ready();
    info!("Signal Service ready - press Ctrl+C to shutdown");

    shutdown_signal().await;
    info!("Shutdown signal received, initiating graceful shutdown...");

    // Stop advertising readiness before sessions are torn down
    health_state.set_not_ready();
    shutdown_token.cancel();

    tokio::time::sleep(config.shutdown_grace_period).await;

    info!("Signal Service shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        #[expect(
            clippy::expect_used,
            reason = "Signal handler installation is critical - panic is appropriate if it fails"
        )]
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        #[expect(
            clippy::expect_used,
            reason = "Signal handler installation is critical - panic is appropriate if it fails"
        )]
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("Received Ctrl+C"),
        () = terminate => info!("Received SIGTERM"),
    }
}
