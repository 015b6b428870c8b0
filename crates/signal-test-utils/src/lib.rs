//! # Signal Test Utilities
//!
//! Shared test utilities for the SFU signal service.
//!
//! - `mock_engine` - In-memory media engine with call recording and scripted failures
//! - `harness` - `SessionHarness`, the client side of one in-process session
//! - `server_harness` - `TestSignalServer`, a real WebSocket server for E2E tests
//! - `fixtures` - SDP documents, candidates and request builders
//!
//! ## Usage
//!
//! ```rust,ignore
//! use signal_test_utils::*;
//!
//! #[tokio::test]
//! async fn test_example() {
//!     let engine = Arc::new(MockEngine::new());
//!     let broadcaster = Arc::new(StreamBroadcaster::new());
//!
//!     let mut alice = SessionHarness::spawn("conn-a", engine.clone(), broadcaster.clone());
//!     let snapshot = alice.join(&broadcaster, "room-1", "alice").await;
//!     assert!(snapshot.streams.is_empty());
//!
//!     alice
//!         .send(fixtures::publisher_offer(fixtures::offer_sdp(&[OfferTrack::audio("s1", "a1")])))
//!         .await;
//! }
//! ```

pub mod fixtures;
pub mod harness;
pub mod mock_engine;
pub mod server_harness;

pub use fixtures::OfferTrack;
pub use harness::SessionHarness;
pub use mock_engine::{EngineCall, EngineOp, MockEngine};
pub use server_harness::TestSignalServer;
