use anyhow::Result;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::{API, APIBuilder};
use webrtc::interceptor::registry::Registry;
use webrtc::rtp_transceiver::rtp_codec::{RTCRtpCodecCapability, RTCRtpCodecParameters};
use webrtc::rtp_transceiver::{RTCPFeedback, rtp_codec::RTPCodecType};

/// The only codec this relay understands. It never decodes or re-encodes a
/// single packet, so every peer connection — sender and receiver alike —
/// is built against exactly this profile.
pub const VIDEO_MIME_TYPE: &str = webrtc::api::media_engine::MIME_TYPE_H264;
const VIDEO_CLOCK_RATE: u32 = 90_000;
const FMTP_LINE: &str =
    "level-asymmetry-allowed=1;packetization-mode=1;profile-level-id=42e01f";

/// Build an `API` whose `MediaEngine` registers H.264 only, with the RTCP
/// feedback mechanisms needed for keyframe recovery (PLI, FIR) and
/// congestion response (REMB, transport-cc). No audio codec is registered —
/// this relay carries video and an out-of-band timestamp channel only.
pub fn build_api() -> Result<API> {
    let mut media_engine = MediaEngine::default();

    media_engine.register_codec(
        RTCRtpCodecParameters {
            capability: RTCRtpCodecCapability {
                mime_type: VIDEO_MIME_TYPE.to_owned(),
                clock_rate: VIDEO_CLOCK_RATE,
                channels: 0,
                sdp_fmtp_line: FMTP_LINE.to_owned(),
                rtcp_feedback: vec![
                    RTCPFeedback {
                        typ: "goog-remb".to_owned(),
                        parameter: String::new(),
                    },
                    RTCPFeedback {
                        typ: "ccm".to_owned(),
                        parameter: "fir".to_owned(),
                    },
                    RTCPFeedback {
                        typ: "nack".to_owned(),
                        parameter: String::new(),
                    },
                    RTCPFeedback {
                        typ: "nack".to_owned(),
                        parameter: "pli".to_owned(),
                    },
                    RTCPFeedback {
                        typ: "transport-cc".to_owned(),
                        parameter: String::new(),
                    },
                ],
            },
            payload_type: 102,
            ..Default::default()
        },
        RTPCodecType::Video,
    )?;

    let mut registry = Registry::new();
    registry = register_default_interceptors(registry, &mut media_engine)?;

    Ok(APIBuilder::new()
        .with_media_engine(media_engine)
        .with_interceptor_registry(registry)
        .build())
}

/// Inspect an H.264 RTP payload's NAL header and report whether it belongs
/// to a keyframe-carrying access unit (SPS, PPS, or IDR slice). Also looks
/// one level inside STAP-A aggregation packets, which frequently bundle
/// SPS+PPS+IDR into a single RTP packet.
///
/// Ref: RFC 6184 Section 5.3 (NAL unit header), Section 5.7.1 (STAP-A).
pub fn contains_keyframe(payload: &[u8]) -> bool {
    let Some(&first) = payload.first() else {
        return false;
    };
    match first & 0x1f {
        5 | 7 | 8 => true,
        24 => stap_a_contains_keyframe(payload),
        _ => false,
    }
}

fn stap_a_contains_keyframe(payload: &[u8]) -> bool {
    // Byte 0 is the STAP-A header itself; what follows is a sequence of
    // (u16 size, NAL unit) entries with no header of their own.
    let mut offset = 1usize;
    while offset + 2 <= payload.len() {
        let size = u16::from_be_bytes([payload[offset], payload[offset + 1]]) as usize;
        offset += 2;
        if offset >= payload.len() {
            break;
        }
        let nal_type = payload[offset] & 0x1f;
        if matches!(nal_type, 5 | 7 | 8) {
            return true;
        }
        offset += size;
    }
    false
}
