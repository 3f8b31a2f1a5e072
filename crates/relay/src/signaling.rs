use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use axum::extract::ws::{Message, WebSocket};
use tokio::time::interval;
use webrtc::ice_transport::ice_candidate::RTCIceCandidateInit;

use glass_protocol::{Inbound, SignalingMessage, TimestampRecord};

use crate::fanout;
use crate::sender;
use crate::state::RelayState;

/// Handle the upstream signaling socket (C1): a single long-lived duplex
/// connection from the producer, carrying SDP negotiation, trickled ICE
/// candidates, the timestamp side-channel's `frame_timestamp` samples, and
/// a clock-sync ping/pong (§4.1).
///
/// The idle read deadline is extended by *any* inbound traffic, including
/// the transport-level pong replying to our own keepalive pings.
pub async fn handle_sender_ws(mut socket: WebSocket, state: Arc<RelayState>) {
    let read_timeout = Duration::from_secs(state.config.signaling.read_timeout_secs);
    let write_timeout = Duration::from_secs(state.config.signaling.write_timeout_secs);
    let keepalive_interval = Duration::from_secs(state.config.signaling.keepalive_interval_secs);

    let mut keepalive = interval(keepalive_interval);
    keepalive.tick().await; // consume the immediate first tick
    let mut last_activity = Instant::now();

    tracing::info!("sender signaling connected");

    loop {
        tokio::select! {
            _ = keepalive.tick() => {
                if last_activity.elapsed() > read_timeout {
                    tracing::info!("sender signaling idle timeout, closing");
                    break;
                }
                let sent = tokio::time::timeout(
                    write_timeout,
                    socket.send(Message::Ping(Vec::new().into())),
                ).await;
                if !matches!(sent, Ok(Ok(()))) {
                    tracing::debug!("sender signaling keepalive send failed or timed out");
                    break;
                }
            }
            maybe_msg = socket.recv() => {
                let Some(result) = maybe_msg else { break };
                match result {
                    Ok(Message::Text(text)) => {
                        last_activity = Instant::now();
                        handle_sender_message(&mut socket, &state, &text, write_timeout).await;
                    }
                    Ok(Message::Pong(_)) => {
                        last_activity = Instant::now();
                    }
                    Ok(Message::Close(_)) => {
                        tracing::info!("sender signaling closed by peer");
                        break;
                    }
                    Err(e) => {
                        tracing::debug!("sender signaling error: {e}");
                        break;
                    }
                    _ => {
                        last_activity = Instant::now();
                    }
                }
            }
        }
    }

    state.sender.lock().await.take();
    tracing::info!("sender signaling disconnected");
}

async fn handle_sender_message(
    socket: &mut WebSocket,
    state: &Arc<RelayState>,
    text: &str,
    write_timeout: Duration,
) {
    match glass_protocol::parse_inbound(text) {
        Some(Inbound::Signaling(SignalingMessage::Offer { sdp })) => {
            match sender::negotiate(Arc::clone(state), sdp).await {
                Ok(answer_sdp) => {
                    send_signaling(
                        socket,
                        write_timeout,
                        &SignalingMessage::Answer { sdp: answer_sdp },
                    )
                    .await;
                }
                Err(e) => tracing::error!("failed to negotiate sender offer: {e}"),
            }
        }
        Some(Inbound::Signaling(SignalingMessage::IceCandidate {
            candidate,
            sdp_mid,
            sdp_mline_index,
        })) => {
            add_sender_ice_candidate(state, candidate, sdp_mid, sdp_mline_index).await;
        }
        Some(Inbound::Signaling(SignalingMessage::Answer { .. })) => {
            tracing::debug!("ignoring unexpected answer from sender");
        }
        Some(Inbound::Timestamp(record)) if record.is_ping() => {
            let pong = TimestampRecord::pong(record.client_time.unwrap_or(0.0), now_ms());
            send_timestamp(socket, write_timeout, &pong).await;
        }
        Some(Inbound::Timestamp(record)) if record.is_frame_timestamp() => {
            fanout::broadcast_frame_timestamp(state, record).await;
        }
        Some(Inbound::Timestamp(_)) => {
            tracing::trace!("ignoring pong from sender — the relay never pings the producer");
        }
        None => {
            tracing::debug!(%text, "malformed or unrecognized message on sender signaling channel");
        }
    }
}

async fn add_sender_ice_candidate(
    state: &Arc<RelayState>,
    candidate: String,
    sdp_mid: Option<String>,
    sdp_mline_index: Option<u16>,
) {
    let session = state.sender.lock().await.clone();
    let Some(session) = session else {
        tracing::debug!("ice candidate received with no sender session active");
        return;
    };
    let init = RTCIceCandidateInit {
        candidate,
        sdp_mid,
        sdp_mline_index,
        ..Default::default()
    };
    if let Err(e) = session.peer.add_ice_candidate(init).await {
        tracing::warn!("failed to add sender ICE candidate: {e}");
    }
}

async fn send_signaling(socket: &mut WebSocket, write_timeout: Duration, msg: &SignalingMessage) {
    let Ok(json) = serde_json::to_string(msg) else {
        tracing::error!("failed to serialize outbound signaling message");
        return;
    };
    if tokio::time::timeout(write_timeout, socket.send(Message::Text(json.into())))
        .await
        .is_err()
    {
        tracing::debug!("timed out sending signaling message to sender");
    }
}

async fn send_timestamp(socket: &mut WebSocket, write_timeout: Duration, record: &TimestampRecord) {
    let Ok(json) = serde_json::to_string(record) else {
        tracing::error!("failed to serialize outbound timestamp message");
        return;
    };
    if tokio::time::timeout(write_timeout, socket.send(Message::Text(json.into())))
        .await
        .is_err()
    {
        tracing::debug!("timed out sending pong to sender");
    }
}

fn now_ms() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
        * 1000.0
}
