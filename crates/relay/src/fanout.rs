use std::time::{SystemTime, UNIX_EPOCH};

use glass_protocol::TimestampRecord;

use crate::state::RelayState;

/// Stamp `relay_time_ms` and push a frame-identity timestamp record out to
/// every currently connected receiver (§4.5, §5, C5). The registry lock is
/// held only long enough to clone out the handles; the sends themselves are
/// lock-free non-blocking enqueues.
pub async fn broadcast_frame_timestamp(state: &RelayState, mut record: TimestampRecord) {
    record.relay_time_ms = Some(now_ms());

    let Ok(text) = serde_json::to_string(&record) else {
        tracing::error!("failed to serialize frame timestamp for fanout");
        return;
    };

    let handles = {
        let registry = state.receivers.read().await;
        registry.values().cloned().collect::<Vec<_>>()
    };

    for handle in handles {
        handle.offer_text(text.clone());
    }
}

fn now_ms() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
        * 1000.0
}
