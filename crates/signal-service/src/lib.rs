//! SFU Signal Service Library
//!
//! Signaling control plane for a selective forwarding unit. Each client
//! connection runs one signaling session that:
//!
//! - Joins a room on the media engine and receives a snapshot of the streams
//!   already published there
//! - Negotiates the publisher transport (offer/answer) and trickles ICE
//!   candidates in both directions
//! - Announces the streams it publishes to the other sessions of the room
//!   and retracts them when it terminates
//! - Adds and removes forwarding paths on request, renegotiating the
//!   subscriber transport once per request
//!
//! # Architecture
//!
//! ```text
//! WebSocket connection (server)
//! └── SignalSession (one per connection)
//!     ├── MediaPeer (engine peer, created on first Join)
//!     │   └── SignalObserver (engine callbacks -> outbound sink)
//!     └── StreamBroadcaster (shared, room -> participant -> sink)
//! ```
//!
//! # Modules
//!
//! - [`broadcaster`] - Room-scoped stream event fan-out
//! - [`config`] - Service configuration from environment
//! - [`engine`] - Media engine interface and the loopback engine
//! - [`errors`] - Session outcome and transport error types
//! - [`extractor`] - Stream extraction from publisher SDP offers
//! - [`observability`] - Metrics and health endpoints
//! - [`server`] - WebSocket transport
//! - [`session`] - Per-connection signaling state machine

#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod broadcaster;
pub mod config;
pub mod engine;
pub mod errors;
pub mod extractor;
pub mod observability;
pub mod server;
pub mod session;
