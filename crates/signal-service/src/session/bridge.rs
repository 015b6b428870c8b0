//! Negotiation callback bridge.
//!
//! Turns media engine callbacks into outbound signaling messages on the
//! session's sink. Callbacks arrive on engine tasks, concurrently with the
//! session loop; the bridge only needs a clone of the sink to deliver them.

use crate::broadcaster::Sink;
use crate::engine::PeerObserver;
use async_trait::async_trait;
use signal_protocol::{IceCandidateInit, SdpType, SessionDescription, SignalReply, Target, Trickle};
use tracing::{trace, warn};

/// [`PeerObserver`] that forwards engine events to one client.
pub struct SignalObserver {
    connection_id: String,
    sink: Sink,
}

impl SignalObserver {
    #[must_use]
    pub fn new(connection_id: impl Into<String>, sink: Sink) -> Self {
        Self {
            connection_id: connection_id.into(),
            sink,
        }
    }
}

#[async_trait]
impl PeerObserver for SignalObserver {
    async fn on_ice_candidate(&self, candidate: IceCandidateInit, target: Target) {
        let init = match serde_json::to_string(&candidate) {
            Ok(init) => init,
            Err(e) => {
                warn!(
                    target: "signal.session.bridge",
                    connection_id = %self.connection_id,
                    error = %e,
                    "Failed to serialize local candidate"
                );
                return;
            }
        };

        trace!(
            target: "signal.session.bridge",
            connection_id = %self.connection_id,
            target_transport = target.as_str(),
            init = %init,
            "Sending local candidate"
        );

        if self
            .sink
            .send(SignalReply::Trickle(Trickle { target, init }))
            .await
            .is_err()
        {
            warn!(
                target: "signal.session.bridge",
                connection_id = %self.connection_id,
                "Failed to send candidate, connection closed"
            );
        }
    }

    async fn on_offer(&self, sdp: String) {
        let offer = SessionDescription {
            target: Target::Subscriber,
            sdp_type: SdpType::Offer,
            sdp,
        };
        if self.sink.send(SignalReply::Description(offer)).await.is_err() {
            warn!(
                target: "signal.session.bridge",
                connection_id = %self.connection_id,
                "Failed to send subscriber offer, connection closed"
            );
        }
    }
}
