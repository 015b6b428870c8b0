//! Test fixtures: SDP documents, candidates and request builders.

use signal_protocol::{
    IceCandidateInit, JoinRequest, ParticipantId, RoomId, SdpType, SessionDescription,
    SignalRequest, Subscription, Target, Trickle, UpdateSettings,
};
use signal_service::engine::PublishedTrack;

/// A sending media section of a publisher offer.
#[derive(Debug, Clone)]
pub struct OfferTrack {
    pub kind: &'static str,
    pub stream_id: String,
    pub track_id: String,
    pub rids: Vec<String>,
}

impl OfferTrack {
    pub fn audio(stream_id: &str, track_id: &str) -> Self {
        Self {
            kind: "audio",
            stream_id: stream_id.to_string(),
            track_id: track_id.to_string(),
            rids: Vec::new(),
        }
    }

    pub fn video(stream_id: &str, track_id: &str) -> Self {
        Self {
            kind: "video",
            stream_id: stream_id.to_string(),
            track_id: track_id.to_string(),
            rids: Vec::new(),
        }
    }

    /// Send this track as simulcast layers.
    pub fn with_rids(mut self, rids: &[&str]) -> Self {
        self.rids = rids.iter().map(|r| (*r).to_string()).collect();
        self
    }
}

/// A publisher offer with one send-only section per track.
pub fn offer_sdp(tracks: &[OfferTrack]) -> String {
    let mut sdp = String::from("v=0\r\no=- 4611731400430051336 2 IN IP4 127.0.0.1\r\ns=-\r\nt=0 0\r\n");
    for (mid, track) in tracks.iter().enumerate() {
        let (payload_type, rtpmap) = if track.kind == "audio" {
            (111, "opus/48000/2")
        } else {
            (96, "VP8/90000")
        };
        sdp.push_str(&format!(
            "m={} 9 UDP/TLS/RTP/SAVPF {payload_type}\r\n\
             c=IN IP4 0.0.0.0\r\n\
             a=mid:{mid}\r\n\
             a=sendonly\r\n\
             a=setup:actpass\r\n\
             a=msid:{} {}\r\n\
             a=rtpmap:{payload_type} {rtpmap}\r\n",
            track.kind, track.stream_id, track.track_id
        ));
        for rid in &track.rids {
            sdp.push_str(&format!("a=rid:{rid} send\r\n"));
        }
        if !track.rids.is_empty() {
            sdp.push_str(&format!("a=simulcast:send {}\r\n", track.rids.join(";")));
        }
    }
    sdp
}

/// A client answer accepting a subscriber offer.
pub fn answer_sdp() -> String {
    "v=0\r\no=- 1 1 IN IP4 127.0.0.1\r\ns=-\r\nt=0 0\r\n".to_string()
}

/// A host candidate for media section 0.
pub fn host_candidate() -> IceCandidateInit {
    IceCandidateInit {
        candidate: "candidate:1 1 udp 2130706431 192.0.2.10 54400 typ host".to_string(),
        sdp_mid: Some("0".to_string()),
        sdp_mline_index: Some(0),
        username_fragment: Some("f00d".to_string()),
    }
}

/// A published track entry for seeding an engine room.
pub fn published(kind: signal_protocol::TrackKind, stream_id: &str, track_id: &str) -> PublishedTrack {
    PublishedTrack {
        track_id: track_id.to_string(),
        stream_id: stream_id.to_string(),
        kind,
        rid: String::new(),
    }
}

pub fn join(room_id: &str, participant_id: &str) -> SignalRequest {
    SignalRequest::Join(JoinRequest {
        room_id: RoomId::from(room_id),
        participant_id: ParticipantId::from(participant_id),
    })
}

pub fn publisher_offer(sdp: String) -> SignalRequest {
    SignalRequest::Description(SessionDescription {
        target: Target::Publisher,
        sdp_type: SdpType::Offer,
        sdp,
    })
}

pub fn subscriber_answer(sdp: String) -> SignalRequest {
    SignalRequest::Description(SessionDescription {
        target: Target::Subscriber,
        sdp_type: SdpType::Answer,
        sdp,
    })
}

/// A trickle request carrying `candidate` serialized as JSON.
pub fn trickle(target: Target, candidate: &IceCandidateInit) -> SignalRequest {
    SignalRequest::Trickle(Trickle {
        target,
        init: serde_json::to_string(candidate).expect("candidate serializes"),
    })
}

/// A trickle request with an arbitrary (possibly malformed) candidate payload.
pub fn trickle_raw(target: Target, init: &str) -> SignalRequest {
    SignalRequest::Trickle(Trickle {
        target,
        init: init.to_string(),
    })
}

pub fn subscribe(track_ids: &[&str]) -> SignalRequest {
    subscription(track_ids, true)
}

pub fn unsubscribe(track_ids: &[&str]) -> SignalRequest {
    subscription(track_ids, false)
}

fn subscription(track_ids: &[&str], subscribe: bool) -> SignalRequest {
    SignalRequest::UpdateSettings(UpdateSettings::Subscription(Subscription {
        track_ids: track_ids.iter().map(|t| (*t).to_string()).collect(),
        subscribe,
    }))
}
