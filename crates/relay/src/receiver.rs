use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result, anyhow};
use tokio::sync::{Mutex, RwLock, RwLockReadGuard, mpsc};
use webrtc::data_channel::RTCDataChannel;
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::data_channel::data_channel_state::RTCDataChannelState;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::rtp_transceiver::rtp_sender::RTCRtpSender;
use webrtc::track::track_local::TrackLocal;

use glass_protocol::{Inbound, TIMESTAMPS_CHANNEL_LABEL, TimestampRecord, VIDEO_NOT_READY};

use crate::media;
use crate::sender;
use crate::state::RelayState;

pub type ReceiverId = u64;

/// Sentinel error distinguishing "no sender yet" from any other
/// negotiation failure, so callers can downcast it to a specific HTTP
/// status without string-matching an error message (§4.4 step 1).
#[derive(Debug, thiserror::Error)]
#[error("{VIDEO_NOT_READY}")]
pub struct NoSenderConnected;

/// A single downstream viewer. Holds the bounded outbound queue that C5's
/// fanout writes into (non-blocking, drop-on-full, §4.5) and the peer
/// connection carrying the forwarded video track.
pub struct ReceiverHandle {
    pub id: ReceiverId,
    #[allow(dead_code)] // kept for symmetry with SenderSession / future stats surface
    peer: Arc<RTCPeerConnection>,
    outbound: mpsc::Sender<String>,
    closed: AtomicBool,
}

impl ReceiverHandle {
    /// Non-blocking enqueue of an outbound text frame. Drops the message if
    /// the queue is full or the receiver has already disconnected — a
    /// skipped timestamp sample costs the consumer one data point, nothing
    /// more (§4.5).
    pub fn offer_text(&self, text: String) {
        if self.closed.load(Ordering::Relaxed) {
            return;
        }
        if self.outbound.try_send(text).is_err() {
            tracing::trace!(receiver_id = self.id, "outbound queue full, dropping timestamp");
        }
    }

    fn mark_closed(&self) {
        self.closed.store(true, Ordering::Relaxed);
    }
}

/// Registry of connected receivers, keyed by a synthetic id. Reads copy the
/// `Arc` handles out and release the lock immediately — fanout never holds
/// the registry lock across a send (§5).
#[derive(Clone)]
pub struct ReceiverRegistry {
    inner: Arc<RwLock<HashMap<ReceiverId, Arc<ReceiverHandle>>>>,
}

impl ReceiverRegistry {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub async fn read(&self) -> RwLockReadGuard<'_, HashMap<ReceiverId, Arc<ReceiverHandle>>> {
        self.inner.read().await
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    async fn insert(&self, handle: Arc<ReceiverHandle>) {
        self.inner.write().await.insert(handle.id, handle);
    }

    async fn remove(&self, id: ReceiverId) {
        if let Some(handle) = self.inner.write().await.remove(&id) {
            handle.mark_closed();
        }
    }
}

impl Default for ReceiverRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Monotone, timestamp-derived receiver id — not a UUID, since nothing
/// about this value needs to be globally unguessable, only locally
/// distinct and ordered (spec §4.4 Open Question resolved in DESIGN.md).
fn next_receiver_id() -> ReceiverId {
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    let now_ms = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64;
    let seq = COUNTER.fetch_add(1, Ordering::Relaxed) & 0xfff;
    (now_ms << 12) | seq
}

/// Negotiate a new downstream viewer connection from an SDP offer (§4.4).
/// Rejects before touching WebRTC at all if no sender is connected yet —
/// callers translate this into the HTTP 503 of step 1.
pub async fn negotiate(state: Arc<RelayState>, offer_sdp: String) -> Result<String> {
    let forwarding_track = state
        .forwarding_track()
        .await
        .ok_or(NoSenderConnected)?;

    let ice_servers = state
        .config
        .ice
        .stun_urls
        .iter()
        .map(|url| RTCIceServer {
            urls: vec![url.clone()],
            ..Default::default()
        })
        .collect();

    let api = media::build_api()?;
    let rtc_config = RTCConfiguration {
        ice_servers,
        ..Default::default()
    };
    let peer = Arc::new(api.new_peer_connection(rtc_config).await?);

    let rtp_sender = peer
        .add_track(forwarding_track as Arc<dyn TrackLocal + Send + Sync>)
        .await?;

    // Receiver-originated RTCP (REMB, transport-cc feedback, etc.) has to be
    // read or its queue backs up and stalls the outbound track; the relay
    // has no use for it, so the reader is a no-op drain (§4.4 step 4, §5).
    tokio::spawn(drain_outbound_rtcp(rtp_sender));

    let receiver_id = next_receiver_id();
    let (outbound_tx, outbound_rx) = mpsc::channel::<String>(state.config.receiver.queue_capacity);

    let handle = Arc::new(ReceiverHandle {
        id: receiver_id,
        peer: Arc::clone(&peer),
        outbound: outbound_tx,
        closed: AtomicBool::new(false),
    });

    let data_channel_slot: Arc<Mutex<Option<Arc<RTCDataChannel>>>> = Arc::new(Mutex::new(None));

    {
        let slot = Arc::clone(&data_channel_slot);
        peer.on_data_channel(Box::new(move |dc| {
            let slot = Arc::clone(&slot);
            Box::pin(async move {
                if dc.label() != TIMESTAMPS_CHANNEL_LABEL {
                    tracing::debug!(label = dc.label(), "ignoring unrecognized data channel");
                    return;
                }
                let dc_for_messages = Arc::clone(&dc);
                dc.on_message(Box::new(move |msg: DataChannelMessage| {
                    let dc = Arc::clone(&dc_for_messages);
                    Box::pin(async move {
                        handle_timestamp_channel_message(&dc, msg).await;
                    })
                }));
                *slot.lock().await = Some(dc);
            })
        }));
    }

    {
        let registry = state.receivers.clone();
        let handle = Arc::clone(&handle);
        let state = Arc::clone(&state);
        peer.on_peer_connection_state_change(Box::new(move |pc_state| {
            let registry = registry.clone();
            let handle = Arc::clone(&handle);
            let state = Arc::clone(&state);
            Box::pin(async move {
                tracing::info!(receiver_id = handle.id, ?pc_state, "receiver connection state changed");
                match pc_state {
                    RTCPeerConnectionState::Connected => {
                        if let Err(e) = sender::request_keyframe_now(&state).await {
                            tracing::debug!("no keyframe requested for new receiver: {e}");
                        }
                    }
                    RTCPeerConnectionState::Failed
                    | RTCPeerConnectionState::Closed
                    | RTCPeerConnectionState::Disconnected => {
                        registry.remove(handle.id).await;
                    }
                    _ => {}
                }
            })
        }));
    }

    let offer = RTCSessionDescription::offer(offer_sdp).context("invalid SDP offer")?;
    peer.set_remote_description(offer).await?;
    let answer = peer.create_answer(None).await?;

    let mut gather_complete = peer.gathering_complete_promise().await;
    peer.set_local_description(answer).await?;
    let _ = tokio::time::timeout(
        Duration::from_secs(state.config.receiver.ice_gather_timeout_secs),
        gather_complete.recv(),
    )
    .await;

    let local_description = peer
        .local_description()
        .await
        .ok_or_else(|| anyhow!("peer connection has no local description after gathering"))?;

    state.receivers.insert(Arc::clone(&handle)).await;
    tokio::spawn(drain_outbound_queue(data_channel_slot, outbound_rx));

    Ok(local_description.sdp)
}

/// No-op RTCP reader on the outbound video sender (§4.4 step 4, §5). The
/// relay has no congestion-control or NACK logic of its own to react to
/// receiver-originated RTCP with, but the stream still has to be read or
/// its internal queue fills up and stalls the sender.
async fn drain_outbound_rtcp(rtp_sender: Arc<RTCRtpSender>) {
    let mut rtcp_buf = vec![0u8; 1500];
    while rtp_sender.read(&mut rtcp_buf).await.is_ok() {}
}

/// Per-receiver send loop: writes queued text frames to the `timestamps`
/// data channel only while it exists and is open, per §4.5.
async fn drain_outbound_queue(
    data_channel_slot: Arc<Mutex<Option<Arc<RTCDataChannel>>>>,
    mut outbound_rx: mpsc::Receiver<String>,
) {
    while let Some(text) = outbound_rx.recv().await {
        let dc = data_channel_slot.lock().await.clone();
        let Some(dc) = dc else { continue };
        if dc.ready_state() != RTCDataChannelState::Open {
            continue;
        }
        if let Err(e) = dc.send_text(text).await {
            tracing::trace!("failed to send on timestamps channel: {e}");
        }
    }
}

/// Clock-sync responder (§4.7.1, C6). Replies to a `ping` with a `pong`
/// that echoes the client's own timestamp and stamps the relay's wall
/// clock — scoped to the one receiver that asked, never broadcast.
async fn handle_timestamp_channel_message(dc: &Arc<RTCDataChannel>, msg: DataChannelMessage) {
    let Ok(text) = String::from_utf8(msg.data.to_vec()) else {
        tracing::debug!("non-utf8 message on timestamps channel, ignoring");
        return;
    };

    match glass_protocol::parse_inbound(&text) {
        Some(Inbound::Timestamp(record)) if record.is_ping() => {
            let client_time = record.client_time.unwrap_or(0.0);
            let pong = TimestampRecord::pong(client_time, now_ms());
            match serde_json::to_string(&pong) {
                Ok(json) => {
                    if let Err(e) = dc.send_text(json).await {
                        tracing::trace!("failed to send pong: {e}");
                    }
                }
                Err(e) => tracing::error!("failed to serialize pong: {e}"),
            }
        }
        Some(_) => {
            // Receivers only ever send pings on this channel; anything else
            // (a frame_timestamp or pong) is producer-bound traffic that
            // wandered onto the wrong connection.
            tracing::trace!("ignoring non-ping message from receiver on timestamps channel");
        }
        None => {
            tracing::debug!(%text, "malformed or unrecognized timestamps channel message");
        }
    }
}

fn now_ms() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
        * 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn receiver_ids_are_monotonically_non_decreasing() {
        let a = next_receiver_id();
        let b = next_receiver_id();
        assert!(b >= a);
    }

    #[tokio::test]
    async fn offer_text_drops_silently_once_closed() {
        let (tx, mut rx) = mpsc::channel::<String>(1);
        let handle = ReceiverHandle {
            id: 1,
            peer: Arc::new(
                crate::media::build_api()
                    .unwrap()
                    .new_peer_connection(RTCConfiguration::default())
                    .await
                    .unwrap(),
            ),
            outbound: tx,
            closed: AtomicBool::new(false),
        };
        handle.offer_text("hello".to_string());
        assert_eq!(rx.recv().await.unwrap(), "hello");

        handle.mark_closed();
        handle.offer_text("should be dropped".to_string());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn registry_insert_and_remove_roundtrip() {
        let registry = ReceiverRegistry::new();
        let (tx, _rx) = mpsc::channel::<String>(1);
        let handle = Arc::new(ReceiverHandle {
            id: 42,
            peer: Arc::new(
                crate::media::build_api()
                    .unwrap()
                    .new_peer_connection(RTCConfiguration::default())
                    .await
                    .unwrap(),
            ),
            outbound: tx,
            closed: AtomicBool::new(false),
        });
        registry.insert(Arc::clone(&handle)).await;
        assert_eq!(registry.len().await, 1);
        registry.remove(42).await;
        assert_eq!(registry.len().await, 0);
        assert!(handle.closed.load(Ordering::Relaxed));
    }
}
