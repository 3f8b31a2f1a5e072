use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use rtcp::payload_feedbacks::picture_loss_indication::PictureLossIndication;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::track_local_static_rtp::TrackLocalStaticRTP;
use webrtc::track::track_remote::TrackRemote;

use crate::media;
use crate::state::RelayState;

/// Delay before the first keyframe request, and the interval between
/// repeats until one is observed (§4.3).
const FIRST_PLI_DELAY: Duration = Duration::from_millis(500);
const PLI_RETRY_INTERVAL: Duration = Duration::from_secs(3);

/// The single upstream producer connection. The relay holds at most one of
/// these at a time — a new offer replaces whatever sender is currently
/// connected (§4.3).
pub struct SenderSession {
    pub peer: Arc<RTCPeerConnection>,
    pub forwarding_track: Arc<TrackLocalStaticRTP>,
    keyframe_seen: AtomicBool,
    media_ssrc: AtomicU32,
}

impl SenderSession {
    fn mark_keyframe_seen(&self) {
        self.keyframe_seen.store(true, Ordering::Relaxed);
    }

    fn has_seen_keyframe(&self) -> bool {
        self.keyframe_seen.load(Ordering::Relaxed)
    }
}

/// Negotiate a new upstream sender session from an SDP offer (§4.3).
pub async fn negotiate(state: Arc<RelayState>, offer_sdp: String) -> Result<String> {
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

    let forwarding_track = Arc::new(TrackLocalStaticRTP::new(
        RTCRtpCodecCapability {
            mime_type: media::VIDEO_MIME_TYPE.to_owned(),
            ..Default::default()
        },
        "video".to_owned(),
        "glass-relay".to_owned(),
    ));

    let session = Arc::new(SenderSession {
        peer: Arc::clone(&peer),
        forwarding_track,
        keyframe_seen: AtomicBool::new(false),
        media_ssrc: AtomicU32::new(0),
    });

    {
        let session = Arc::clone(&session);
        peer.on_track(Box::new(move |remote_track, rtp_receiver, _transceiver| {
            let session = Arc::clone(&session);
            let _ = rtp_receiver;
            Box::pin(async move {
                session
                    .media_ssrc
                    .store(remote_track.ssrc(), Ordering::Relaxed);
                tracing::info!(ssrc = remote_track.ssrc(), "sender video track started");
                tokio::spawn(forward_inbound_track(remote_track, Arc::clone(&session)));
                tokio::spawn(drive_pli_policy(session));
            })
        }));
    }

    {
        let state = Arc::clone(&state);
        peer.on_peer_connection_state_change(Box::new(move |pc_state| {
            let state = Arc::clone(&state);
            Box::pin(async move {
                tracing::info!(?pc_state, "sender connection state changed");
                if matches!(
                    pc_state,
                    RTCPeerConnectionState::Failed
                        | RTCPeerConnectionState::Closed
                        | RTCPeerConnectionState::Disconnected
                ) {
                    state.sender.lock().await.take();
                }
            })
        }));
    }

    let offer = RTCSessionDescription::offer(offer_sdp).context("invalid SDP offer")?;
    peer.set_remote_description(offer).await?;
    let answer = peer.create_answer(None).await?;
    peer.set_local_description(answer.clone()).await?;

    *state.sender.lock().await = Some(session);

    Ok(answer.sdp)
}

/// Pipe inbound RTP straight to the shared forwarding track, untouched —
/// the relay never decodes a single packet (§4.3, §6).
async fn forward_inbound_track(remote_track: Arc<TrackRemote>, session: Arc<SenderSession>) {
    loop {
        match remote_track.read_rtp().await {
            Ok((packet, _attrs)) => {
                if !session.has_seen_keyframe() && media::contains_keyframe(&packet.payload) {
                    session.mark_keyframe_seen();
                    tracing::info!("first keyframe observed from sender");
                }
                if let Err(e) = session.forwarding_track.write_rtp(&packet).await {
                    tracing::debug!("forwarding track write_rtp error: {e}");
                }
            }
            Err(e) => {
                tracing::debug!("sender track ended: {e}");
                break;
            }
        }
    }
}

/// Request a keyframe 500ms after the track starts, then every 3s, until
/// one is actually observed flowing through (§4.3).
async fn drive_pli_policy(session: Arc<SenderSession>) {
    tokio::time::sleep(FIRST_PLI_DELAY).await;
    loop {
        if session.has_seen_keyframe() {
            return;
        }
        send_pli(&session).await;
        tokio::time::sleep(PLI_RETRY_INTERVAL).await;
    }
}

async fn send_pli(session: &SenderSession) {
    let media_ssrc = session.media_ssrc.load(Ordering::Relaxed);
    if media_ssrc == 0 {
        return;
    }
    let pli = PictureLossIndication {
        sender_ssrc: 0,
        media_ssrc,
    };
    if let Err(e) = session.peer.write_rtcp(&[Box::new(pli)]).await {
        tracing::debug!("failed to send PLI to sender: {e}");
    }
}

/// Request an immediate keyframe from whatever sender is currently
/// connected. Called when a new receiver comes online, so it doesn't have
/// to wait out the sender's own keyframe interval (§4.4).
pub async fn request_keyframe_now(state: &RelayState) -> Result<()> {
    let guard = state.sender.lock().await;
    let session = guard.as_ref().ok_or_else(|| anyhow!("no sender connected"))?;
    send_pli(session).await;
    Ok(())
}
