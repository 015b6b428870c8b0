//! SDP track extractor.
//!
//! Reads the media sections of a publisher offer and groups the sending
//! audio/video sections into streams by their `msid` stream identifier.
//! Extraction is best-effort: the caller logs failures and carries on.

use sdp::description::media::MediaDescription;
use sdp::description::session::SessionDescription;
use signal_protocol::{ParticipantId, Stream, Track, TrackKind};
use std::io::Cursor;
use thiserror::Error;

/// Track extraction failure.
#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("failed to parse session description: {0}")]
    Parse(String),
}

/// Parse an SDP document.
///
/// # Errors
///
/// Returns `ExtractError::Parse` if the text is not a valid session description.
pub fn parse_description(sdp: &str) -> Result<SessionDescription, ExtractError> {
    let mut reader = Cursor::new(sdp.as_bytes());
    SessionDescription::unmarshal(&mut reader).map_err(|e| ExtractError::Parse(e.to_string()))
}

/// Streams declared by `owner` in `sdp`, in declaration order.
///
/// Media sections that are rejected (port 0), not sending, or carry no
/// `msid` are skipped. Simulcast sections yield one track entry per send rid.
///
/// # Errors
///
/// Returns `ExtractError::Parse` if the text is not a valid session description.
pub fn extract_streams(owner: &ParticipantId, sdp: &str) -> Result<Vec<Stream>, ExtractError> {
    let description = parse_description(sdp)?;
    let mut streams: Vec<Stream> = Vec::new();

    for media in &description.media_descriptions {
        let Some(kind) = TrackKind::from_media(&media.media_name.media) else {
            continue;
        };
        if media.media_name.port.value == 0 || !is_sending(media) {
            continue;
        }
        let Some((stream_id, track_id)) = media_msid(media) else {
            continue;
        };

        let index = match streams.iter().position(|s| s.stream_id == stream_id) {
            Some(index) => index,
            None => {
                streams.push(Stream::new(owner.clone(), stream_id));
                streams.len() - 1
            }
        };
        let Some(stream) = streams.get_mut(index) else {
            continue;
        };

        let rids = send_rids(media);
        if rids.is_empty() {
            stream.tracks.push(Track::new(track_id, kind, ""));
        } else {
            for rid in rids {
                stream.tracks.push(Track::new(track_id.clone(), kind, rid));
            }
        }
    }

    Ok(streams)
}

fn is_sending(media: &MediaDescription) -> bool {
    !media
        .attributes
        .iter()
        .any(|a| a.key == "recvonly" || a.key == "inactive")
}

/// `(stream id, track id)` from `a=msid`, falling back to `a=ssrc:<n> msid:`.
fn media_msid(media: &MediaDescription) -> Option<(String, String)> {
    let msid = media
        .attributes
        .iter()
        .find(|a| a.key == "msid")
        .and_then(|a| a.value.clone())
        .or_else(|| {
            media
                .attributes
                .iter()
                .filter(|a| a.key == "ssrc")
                .filter_map(|a| a.value.as_deref())
                .find_map(|value| {
                    value
                        .split_once(' ')
                        .and_then(|(_, rest)| rest.strip_prefix("msid:"))
                        .map(str::to_string)
                })
        })?;

    let mut parts = msid.split_whitespace();
    let stream_id = parts.next()?.to_string();
    let track_id = parts.next()?.to_string();
    Some((stream_id, track_id))
}

fn send_rids(media: &MediaDescription) -> Vec<String> {
    media
        .attributes
        .iter()
        .filter(|a| a.key == "rid")
        .filter_map(|a| a.value.as_deref())
        .filter_map(|value| {
            let mut parts = value.split_whitespace();
            let rid = parts.next()?;
            (parts.next() == Some("send")).then(|| rid.to_string())
        })
        .collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]
mod tests {
    use super::*;

    const HEADER: &str = "v=0\r\no=- 4611731400430051336 2 IN IP4 127.0.0.1\r\ns=-\r\nt=0 0\r\n";

    fn media(kind: &str, mid: u32, extra: &[&str]) -> String {
        let mut section = format!(
            "m={kind} 9 UDP/TLS/RTP/SAVPF 96\r\nc=IN IP4 0.0.0.0\r\na=mid:{mid}\r\n"
        );
        for line in extra {
            section.push_str(line);
            section.push_str("\r\n");
        }
        section
    }

    fn alice() -> ParticipantId {
        ParticipantId::from("alice")
    }

    #[test]
    fn test_groups_tracks_by_stream() {
        let sdp = format!(
            "{HEADER}{}{}",
            media("audio", 0, &["a=sendonly", "a=msid:s1 a1"]),
            media("video", 1, &["a=sendonly", "a=msid:s1 v1"]),
        );

        let streams = extract_streams(&alice(), &sdp).unwrap();
        assert_eq!(streams.len(), 1);
        assert_eq!(streams[0].participant_id, alice());
        assert_eq!(streams[0].stream_id, "s1");
        assert_eq!(
            streams[0].tracks,
            vec![
                Track::new("a1", TrackKind::Audio, ""),
                Track::new("v1", TrackKind::Video, ""),
            ]
        );
    }

    #[test]
    fn test_skips_recvonly_and_inactive_sections() {
        let sdp = format!(
            "{HEADER}{}{}{}",
            media("audio", 0, &["a=recvonly", "a=msid:s1 a1"]),
            media("video", 1, &["a=inactive", "a=msid:s1 v1"]),
            media("audio", 2, &["a=sendrecv", "a=msid:s2 a2"]),
        );

        let streams = extract_streams(&alice(), &sdp).unwrap();
        assert_eq!(streams.len(), 1);
        assert_eq!(streams[0].stream_id, "s2");
    }

    #[test]
    fn test_skips_application_and_missing_msid() {
        let sdp = format!(
            "{HEADER}{}m=application 9 UDP/DTLS/SCTP webrtc-datachannel\r\nc=IN IP4 0.0.0.0\r\na=mid:1\r\n",
            media("audio", 0, &["a=sendonly"]),
        );

        let streams = extract_streams(&alice(), &sdp).unwrap();
        assert!(streams.is_empty());
    }

    #[test]
    fn test_ssrc_msid_fallback() {
        let sdp = format!(
            "{HEADER}{}",
            media(
                "video",
                0,
                &[
                    "a=sendonly",
                    "a=ssrc:1001 cname:abc",
                    "a=ssrc:1001 msid:camera cam-track"
                ]
            ),
        );

        let streams = extract_streams(&alice(), &sdp).unwrap();
        assert_eq!(streams[0].stream_id, "camera");
        assert_eq!(streams[0].tracks[0].id, "cam-track");
    }

    #[test]
    fn test_simulcast_rids_become_track_entries() {
        let sdp = format!(
            "{HEADER}{}",
            media(
                "video",
                0,
                &[
                    "a=sendonly",
                    "a=msid:s1 v1",
                    "a=rid:f send",
                    "a=rid:h send",
                    "a=rid:q recv",
                    "a=simulcast:send f;h"
                ]
            ),
        );

        let streams = extract_streams(&alice(), &sdp).unwrap();
        let rids: Vec<&str> = streams[0].tracks.iter().map(|t| t.rid.as_str()).collect();
        assert_eq!(rids, vec!["f", "h"]);
        assert!(streams[0].tracks.iter().all(|t| t.id == "v1" && !t.muted));
    }

    #[test]
    fn test_invalid_sdp_is_error() {
        let result = extract_streams(&alice(), "this is not sdp");
        assert!(matches!(result, Err(ExtractError::Parse(_))));
    }
}
