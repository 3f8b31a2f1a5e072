use std::sync::Arc;
use std::time::Instant;

use tokio::sync::Mutex;
use webrtc::track::track_local::track_local_static_rtp::TrackLocalStaticRTP;

use glass_protocol::RelayConfig;

use crate::receiver::ReceiverRegistry;
use crate::sender::SenderSession;

/// Everything the relay needs to answer an HTTP request or WebSocket frame.
/// The sender slot is a single mutex rather than a registry — §9 replaces
/// the source's ad hoc "one global sender" bookkeeping with this typed
/// singleton.
pub struct RelayState {
    pub config: RelayConfig,
    pub sender: Mutex<Option<Arc<SenderSession>>>,
    pub receivers: ReceiverRegistry,
    pub started_at: Instant,
}

impl RelayState {
    pub fn new(config: RelayConfig) -> Self {
        Self {
            config,
            sender: Mutex::new(None),
            receivers: ReceiverRegistry::new(),
            started_at: Instant::now(),
        }
    }

    pub async fn sender_connected(&self) -> bool {
        self.sender.lock().await.is_some()
    }

    pub async fn forwarding_track(&self) -> Option<Arc<TrackLocalStaticRTP>> {
        self.sender
            .lock()
            .await
            .as_ref()
            .map(|session| Arc::clone(&session.forwarding_track))
    }
}
