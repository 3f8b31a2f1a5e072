use serde::{Deserialize, Serialize};

/// Session-negotiation messages exchanged on the upstream signaling socket
/// (C1) and on the downstream offer/answer exchange (C2).
///
/// This is the typed replacement for the "peek `type`, then re-parse"
/// dispatch the source used: unknown `type` values simply fail to
/// deserialize into this enum and the caller logs and drops them instead
/// of treating the mismatch as an error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum SignalingMessage {
    /// WebRTC SDP offer, sender → relay (C1) or browser → relay (C2).
    #[serde(rename = "offer")]
    Offer { sdp: String },
    /// WebRTC SDP answer, relay → sender (C1) or relay → browser (C2).
    #[serde(rename = "answer")]
    Answer { sdp: String },
    /// Trickled ICE candidate. Only used on C1 — C2 gathers candidates
    /// before answering and never trickles.
    #[serde(rename = "ice-candidate")]
    IceCandidate {
        candidate: String,
        #[serde(skip_serializing_if = "Option::is_none", default)]
        sdp_mid: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none", default)]
        sdp_mline_index: Option<u16>,
    },
}

/// Discriminator for [`TimestampRecord`]. A single struct, not three enum
/// variants, because every field past `kind` is optional and consumers
/// pattern-match on `kind` directly (ClockSyncSample reads a `Pong`,
/// the latency pipeline reads a `FrameTimestamp`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimestampKind {
    #[serde(rename = "frame_timestamp")]
    FrameTimestamp,
    #[serde(rename = "ping")]
    Ping,
    #[serde(rename = "pong")]
    Pong,
}

/// The side-channel message carrying a per-frame capture timestamp, or a
/// clock-sync ping/pong. All fields but `kind` are optional: the producer
/// may stamp frame identity as `seq`, `frame_num`, or `frame_id`
/// (deployment-specific, see spec §3/Open Questions), and ping/pong only
/// ever populate `client_time`/`server_time`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TimestampRecord {
    #[serde(rename = "type")]
    pub kind: Option<TimestampKind>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub seq: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub frame_num: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub frame_id: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub capture_ms: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub send_time_ms: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub relay_time_ms: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub client_time: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub server_time: Option<f64>,
}

impl TimestampRecord {
    /// Any of `frame_id`, `frame_num`, `seq` may carry the producer's
    /// monotone frame identity; consumers accept whichever is present,
    /// preferring `frame_id` then `frame_num` then `seq` (spec §3).
    pub fn frame_identity(&self) -> Option<u64> {
        self.frame_id.or(self.frame_num).or(self.seq)
    }

    pub fn pong(client_time: f64, server_time_ms: f64) -> Self {
        Self {
            kind: Some(TimestampKind::Pong),
            client_time: Some(client_time),
            server_time: Some(server_time_ms),
            ..Default::default()
        }
    }

    pub fn is_ping(&self) -> bool {
        self.kind == Some(TimestampKind::Ping)
    }

    pub fn is_frame_timestamp(&self) -> bool {
        self.kind == Some(TimestampKind::FrameTimestamp)
    }
}

/// Either half of the C1 message set: a session-negotiation message, or a
/// timestamp/ping/pong record. `None` means the payload parsed as neither
/// (malformed JSON or an unrecognized `type`) — callers log and ignore.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Signaling(SignalingMessage),
    Timestamp(TimestampRecord),
}

/// Parse one inbound JSON text frame from the upstream signaling socket or
/// a receiver's `timestamps` side-channel. Tries the closed
/// [`SignalingMessage`] set first, then falls back to [`TimestampRecord`];
/// returns `None` for anything matching neither (§4.1, §7: "unknown type,
/// log and continue").
pub fn parse_inbound(text: &str) -> Option<Inbound> {
    if let Ok(msg) = serde_json::from_str::<SignalingMessage>(text) {
        return Some(Inbound::Signaling(msg));
    }
    let record: TimestampRecord = serde_json::from_str(text).ok()?;
    if record.kind.is_none() {
        return None;
    }
    Some(Inbound::Timestamp(record))
}

/// Advisory record returned by `GET /config` (§4.2). Not authoritative —
/// consumers use it only to decide whether to retry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigResponse {
    pub sender_url: String,
    pub status: SenderStatus,
    pub num_receivers: usize,
    pub codec: String,
    pub latency_supported: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SenderStatus {
    Connected,
    Disconnected,
}

/// Body of a non-2xx JSON error response (e.g. the 503 of §4.4 step 1).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl ErrorResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            error: message.into(),
        }
    }
}

pub const VIDEO_NOT_READY: &str = "Video not ready. Please wait for sender connection.";

/// The `timestamps` side-channel label (§6) — the only label the relay
/// recognizes; anything else is logged and ignored.
pub const TIMESTAMPS_CHANNEL_LABEL: &str = "timestamps";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offer_roundtrip() {
        let msg = SignalingMessage::Offer {
            sdp: "v=0\r\n...".to_string(),
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains(r#""type":"offer""#));
        let parsed: SignalingMessage = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, msg);
    }

    #[test]
    fn ice_candidate_uses_hyphenated_type() {
        let msg = SignalingMessage::IceCandidate {
            candidate: "candidate:1 1 UDP 2130706431 192.168.1.1 50000 typ host".to_string(),
            sdp_mid: Some("0".to_string()),
            sdp_mline_index: Some(0),
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains(r#""type":"ice-candidate""#));
        assert!(!json.contains("ice_candidate"));
        let parsed: SignalingMessage = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, msg);
    }

    #[test]
    fn frame_timestamp_accepts_any_identity_field() {
        let json = r#"{"type":"frame_timestamp","frame_id":42,"capture_ms":1000.5}"#;
        let record: TimestampRecord = serde_json::from_str(json).unwrap();
        assert!(record.is_frame_timestamp());
        assert_eq!(record.frame_identity(), Some(42));
        assert_eq!(record.capture_ms, Some(1000.5));
        assert!(record.relay_time_ms.is_none());
    }

    #[test]
    fn frame_identity_prefers_frame_id_then_frame_num_then_seq() {
        let mut record = TimestampRecord {
            seq: Some(1),
            ..Default::default()
        };
        assert_eq!(record.frame_identity(), Some(1));
        record.frame_num = Some(2);
        assert_eq!(record.frame_identity(), Some(2));
        record.frame_id = Some(3);
        assert_eq!(record.frame_identity(), Some(3));
    }

    #[test]
    fn pong_echoes_client_time_and_stamps_server_time() {
        let record = TimestampRecord::pong(123.0, 456.0);
        let json = serde_json::to_string(&record).unwrap();
        assert!(json.contains(r#""type":"pong""#));
        assert!(json.contains(r#""client_time":123.0"#));
        assert!(json.contains(r#""server_time":456.0"#));
    }

    #[test]
    fn parse_inbound_recognizes_offer() {
        let msg = parse_inbound(r#"{"type":"offer","sdp":"x"}"#).unwrap();
        assert!(matches!(
            msg,
            Inbound::Signaling(SignalingMessage::Offer { .. })
        ));
    }

    #[test]
    fn parse_inbound_recognizes_ping() {
        let msg = parse_inbound(r#"{"type":"ping","client_time":1.0}"#).unwrap();
        match msg {
            Inbound::Timestamp(record) => assert!(record.is_ping()),
            _ => panic!("expected Timestamp(ping)"),
        }
    }

    #[test]
    fn parse_inbound_rejects_unknown_type() {
        assert!(parse_inbound(r#"{"type":"banana"}"#).is_none());
    }

    #[test]
    fn parse_inbound_rejects_malformed_json() {
        assert!(parse_inbound("not json").is_none());
        assert!(parse_inbound(r#"{"no_type_field": true}"#).is_none());
    }

    #[test]
    fn error_response_shape() {
        let err = ErrorResponse::new(VIDEO_NOT_READY);
        let json = serde_json::to_string(&err).unwrap();
        assert_eq!(
            json,
            r#"{"error":"Video not ready. Please wait for sender connection."}"#
        );
    }
}
