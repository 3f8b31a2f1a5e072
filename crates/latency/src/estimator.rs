use crate::bias::BiasEstimator;
use crate::buffer::TimestampBuffer;
use crate::clocksync::{ClockSyncEstimator, ClockSyncSample};
use crate::stats::LatencyStats;

/// Constant display-delay estimate folded into every sample, tuned for a
/// 60Hz monitor (§4.7.1, §4.7.4). Deliberately not derived from
/// `requestVideoFrameCallback` metadata — see spec Open Questions.
const DISPLAY_DELAY_MS: f64 = 20.0;

/// A composed latency outside this range is treated as noise, not a real
/// measurement, and dropped before it can perturb the running stats
/// (§4.7.4 step 5).
const MIN_PLAUSIBLE_LATENCY_MS: f64 = 0.0;
const MAX_PLAUSIBLE_LATENCY_MS: f64 = 2_000.0;

/// Composes clock sync, producer-relay bias correction, and
/// outlier-resistant statistics into a single running glass-to-glass
/// latency estimate for one consumer (C7).
///
/// `on_frame_timestamp` is the hot path (§4.7.4): every inbound
/// `frame_timestamp` record produces a latency sample immediately, using
/// the consumer's own receive-time clock — it does not wait for a
/// presentation-time callback. The [`TimestampBuffer`] this type also
/// holds is the §4.7.6 correlation aid, kept for callers that want to
/// cross-reference a frame's clocks later; it plays no part in computing
/// `L` itself.
pub struct LatencyEstimator {
    clocksync: ClockSyncEstimator,
    bias: BiasEstimator,
    stats: LatencyStats,
    buffer: TimestampBuffer,
}

impl LatencyEstimator {
    pub fn new() -> Self {
        Self {
            clocksync: ClockSyncEstimator::new(),
            bias: BiasEstimator::new(),
            stats: LatencyStats::new(),
            buffer: TimestampBuffer::new(),
        }
    }

    /// Feed one `pong` round trip to the R↔C clock-sync estimator (C6,
    /// §4.7.2).
    pub fn on_pong(&mut self, sample: ClockSyncSample) {
        self.clocksync.record_pong(sample);
    }

    /// Compose and record the glass-to-glass latency for one inbound
    /// `frame_timestamp` record (§4.7.1, §4.7.4). `now_ms` is the
    /// consumer's own wall clock at the moment the record was received.
    ///
    /// Returns the composed latency if it passed the plausibility check of
    /// step 5, regardless of whether the outlier guard in
    /// [`LatencyStats`] subsequently excluded it from the filtered window.
    pub fn on_frame_timestamp(
        &mut self,
        frame_identity: Option<String>,
        capture_ms: f64,
        relay_time_ms: f64,
        send_time_ms: Option<f64>,
        now_ms: f64,
    ) -> Option<f64> {
        if let Some(identity) = frame_identity {
            self.buffer
                .insert(identity, capture_ms, Some(relay_time_ms), send_time_ms, now_ms);
        }

        let offset_r_c = self.clocksync.offset_ms().unwrap_or(0.0);
        let go_browser = now_ms - relay_time_ms + offset_r_c;
        let python_go = self.bias.correct(capture_ms, relay_time_ms);
        let latency_ms = python_go + go_browser + DISPLAY_DELAY_MS;

        if latency_ms <= MIN_PLAUSIBLE_LATENCY_MS || latency_ms > MAX_PLAUSIBLE_LATENCY_MS {
            return None;
        }
        self.stats.record(latency_ms);
        Some(latency_ms)
    }

    pub fn current(&self) -> Option<f64> {
        self.stats.current()
    }

    pub fn min(&self) -> Option<f64> {
        self.stats.min()
    }

    pub fn max(&self) -> Option<f64> {
        self.stats.max()
    }

    pub fn avg(&self) -> Option<f64> {
        self.stats.avg()
    }

    pub fn timestamp_buffer(&self) -> &TimestampBuffer {
        &self.buffer
    }

    /// The §4.7.7 state-machine transition on consumer start/stop: zero
    /// every ring, clear the clock-sync offset, and empty the correlation
    /// buffer. Unlike a simple stats reset, this also discards calibration
    /// — a fresh peer session means a fresh clock relationship.
    pub fn reset(&mut self) {
        self.clocksync = ClockSyncEstimator::new();
        self.bias = BiasEstimator::new();
        self.stats = LatencyStats::new();
        self.buffer = TimestampBuffer::new();
    }
}

impl Default for LatencyEstimator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pong(client_time_ms: f64, server_time_ms: f64, receive_time_ms: f64) -> ClockSyncSample {
        ClockSyncSample {
            client_time_ms,
            server_time_ms,
            receive_time_ms,
        }
    }

    #[test]
    fn without_clock_sync_offset_defaults_to_zero() {
        let mut estimator = LatencyEstimator::new();
        // capture=1000, relay=1010 (10ms transit), received at 1090 (no
        // clock sync yet, so offset contributes nothing).
        let latency = estimator
            .on_frame_timestamp(None, 1_000.0, 1_010.0, None, 1_090.0)
            .unwrap();
        // python_go = 10, go_browser = 1090 - 1010 + 0 = 80, + display 20.
        assert!((latency - 110.0).abs() < 1e-9);
        assert_eq!(estimator.current(), Some(latency));
    }

    #[test]
    fn clock_sync_offset_shifts_the_composed_latency() {
        let mut estimator = LatencyEstimator::new();
        // Relay clock reads 50ms behind the consumer's.
        estimator.on_pong(pong(10_000.0, 9_950.0, 10_000.0));
        let latency = estimator
            .on_frame_timestamp(None, 1_000.0, 1_010.0, None, 1_090.0)
            .unwrap();
        // Same raw clocks as the zero-offset case above (110ms), minus the
        // 50ms the relay is now known to lag the consumer by.
        assert!((latency - 60.0).abs() < 1e-9);
    }

    #[test]
    fn implausible_negative_latency_is_dropped() {
        let mut estimator = LatencyEstimator::new();
        // Relay clock reads 500ms behind the consumer's, driving the
        // composed latency below zero.
        estimator.on_pong(pong(10_000.0, 9_500.0, 10_000.0));
        let result = estimator.on_frame_timestamp(None, 1_000.0, 1_010.0, None, 1_090.0);
        assert_eq!(result, None);
        assert_eq!(estimator.current(), None);
    }

    #[test]
    fn implausibly_large_latency_is_dropped() {
        let mut estimator = LatencyEstimator::new();
        // capture far in the past relative to relay/receive, pushing L > 2000ms.
        let result = estimator.on_frame_timestamp(None, 0.0, 500.0, None, 3_000.0);
        assert_eq!(result, None);
        assert_eq!(estimator.current(), None);
    }

    #[test]
    fn skewed_producer_clock_is_corrected_through_bias() {
        let mut estimator = LatencyEstimator::new();
        // capture_ms reads 22000ms behind relay_time_ms: clock skew, not
        // transit. now_ms == relay_time_ms keeps go_browser pinned at 0,
        // isolating python_go's behavior as the bias estimator locks on.
        let mut latencies = Vec::new();
        for _ in 0..31 {
            let latency = estimator
                .on_frame_timestamp(None, 0.0, 22_000.0, None, 22_000.0)
                .unwrap();
            latencies.push(latency);
        }
        // python_go settles at the 10ms transit floor immediately (a
        // single skew sample already pins the median), so every call
        // reports the same composed latency: 10 (python_go) + 0
        // (go_browser) + 20 (display) == 30.
        assert!(latencies.iter().all(|&l| (l - 30.0).abs() < 1e-9));
    }

    #[test]
    fn reset_clears_stats_and_calibration() {
        let mut estimator = LatencyEstimator::new();
        estimator.on_pong(pong(10_000.0, 9_500.0, 10_000.0));
        estimator.on_frame_timestamp(None, 1_000.0, 1_010.0, None, 1_110.0);
        assert!(estimator.current().is_some() || estimator.clocksync.offset_ms().is_some());

        estimator.reset();
        assert_eq!(estimator.current(), None);
        assert_eq!(estimator.clocksync.offset_ms(), None);
        assert!(estimator.timestamp_buffer().is_empty());
    }

    #[test]
    fn timestamp_buffer_retains_identity_for_correlation() {
        let mut estimator = LatencyEstimator::new();
        estimator.on_frame_timestamp(
            Some("frame-7".to_string()),
            1_000.0,
            1_010.0,
            Some(995.0),
            1_090.0,
        );
        let entry = estimator.timestamp_buffer().get("frame-7").unwrap();
        assert_eq!(entry.capture_ms, 1_000.0);
        assert_eq!(entry.relay_time_ms, Some(1_010.0));
        assert_eq!(entry.send_time_ms, Some(995.0));
    }
}
