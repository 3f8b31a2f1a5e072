use std::collections::{HashMap, VecDeque};

/// Default capacity (§4.7.6) — bounds memory if a consumer never correlates
/// a frame's presentation time back to its timestamp record; the oldest
/// unmatched entry is simply evicted.
const DEFAULT_CAPACITY: usize = 200;

/// The four clocks collected for one frame identity, kept for optional
/// correlation with a presentation-time callback (§4.7.6). Not read by the
/// hot-path latency computation in [`crate::LatencyEstimator`] — that
/// composes `L` directly from each inbound `frame_timestamp` as it arrives.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct TimestampEntry {
    pub capture_ms: f64,
    pub relay_time_ms: Option<f64>,
    pub send_time_ms: Option<f64>,
    pub receive_ms: f64,
}

/// Bounded, oldest-evicted mapping from frame identity to its four-tuple of
/// clocks (§4.7.6).
pub struct TimestampBuffer {
    capacity: usize,
    order: VecDeque<String>,
    entries: HashMap<String, TimestampEntry>,
}

impl TimestampBuffer {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity,
            order: VecDeque::with_capacity(capacity),
            entries: HashMap::with_capacity(capacity),
        }
    }

    /// Records the four-tuple under `frame_identity`, evicting the oldest
    /// unmatched entry if the buffer is already at capacity.
    pub fn insert(
        &mut self,
        frame_identity: String,
        capture_ms: f64,
        relay_time_ms: Option<f64>,
        send_time_ms: Option<f64>,
        receive_ms: f64,
    ) {
        let entry = TimestampEntry {
            capture_ms,
            relay_time_ms,
            send_time_ms,
            receive_ms,
        };
        if self.entries.contains_key(&frame_identity) {
            self.entries.insert(frame_identity, entry);
            return;
        }
        if self.order.len() == self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.entries.remove(&oldest);
            }
        }
        self.order.push_back(frame_identity.clone());
        self.entries.insert(frame_identity, entry);
    }

    /// Removes and returns the entry recorded for `frame_identity`, if
    /// still present — absent means it either never arrived or was already
    /// evicted.
    pub fn take(&mut self, frame_identity: &str) -> Option<TimestampEntry> {
        let entry = self.entries.remove(frame_identity)?;
        if let Some(pos) = self.order.iter().position(|id| id == frame_identity) {
            self.order.remove(pos);
        }
        Some(entry)
    }

    pub fn get(&self, frame_identity: &str) -> Option<&TimestampEntry> {
        self.entries.get(frame_identity)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for TimestampBuffer {
    fn default() -> Self {
        Self::new()
    }
}
