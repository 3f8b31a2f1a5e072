use std::collections::VecDeque;

/// Ring size for accepted round trips (§4.7.2) — large enough to ride out
/// a burst of queuing delay without growing unbounded over a long session.
const RING_CAPACITY: usize = 40;

/// Round trips slower than this are assumed to have been stretched by
/// queuing delay somewhere on the path and are rejected outright (§4.7.2).
const MAX_ACCEPTED_RTT_MS: f64 = 500.0;

/// The first N accepted samples set the offset directly from the median;
/// afterwards updates are exponentially smoothed (§4.7.2).
const INITIAL_BURST_SAMPLES: usize = 20;

/// Weight given to each new median once smoothing kicks in — `offset ←
/// 0.8·offset + 0.2·median` (§4.7.2).
const SMOOTHING_WEIGHT: f64 = 0.2;

/// One accepted ping/pong round trip, reduced to just the two quantities
/// the estimator needs: how long the round trip took, and what R→C offset
/// it implies in isolation.
#[derive(Debug, Clone, Copy, PartialEq)]
struct AcceptedSample {
    rtt_ms: f64,
    offset_ms: f64,
}

/// A raw ping/pong round trip as the caller observed it, in the consumer's
/// own clock plus the relay's echoed `server_time`. Exposed so tests (and
/// any future transport adapter) can construct one without reaching into
/// the estimator's internals.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClockSyncSample {
    pub client_time_ms: f64,
    pub server_time_ms: f64,
    pub receive_time_ms: f64,
}

impl ClockSyncSample {
    fn rtt_ms(&self) -> f64 {
        self.receive_time_ms - self.client_time_ms
    }

    /// `offset = server_time + rtt/2 − receive_time` (§4.7.2) — the signed
    /// R→C offset this single round trip implies, assuming symmetric
    /// network delay.
    fn implied_offset_ms(&self) -> f64 {
        let one_way_ms = self.rtt_ms() / 2.0;
        self.server_time_ms + one_way_ms - self.receive_time_ms
    }
}

/// Tracks the signed offset between the relay's wall clock and the
/// consumer's own, estimated from round-trip-timed ping/pong exchanges
/// (C6/§4.7.2). Rejects implausibly slow round trips, then combines the
/// least-jittery half of the accepted ring by median, settling onto a
/// smoothed running estimate once enough samples have accumulated.
pub struct ClockSyncEstimator {
    samples: VecDeque<AcceptedSample>,
    offset_ms: Option<f64>,
    accepted_count: usize,
}

impl ClockSyncEstimator {
    pub fn new() -> Self {
        Self {
            samples: VecDeque::with_capacity(RING_CAPACITY),
            offset_ms: None,
            accepted_count: 0,
        }
    }

    /// Record one `pong` round trip. Returns the updated offset estimate,
    /// or whatever the previous estimate was (possibly `None`) if this
    /// round trip was rejected for exceeding the RTT ceiling.
    pub fn record_pong(&mut self, sample: ClockSyncSample) -> Option<f64> {
        if sample.rtt_ms() > MAX_ACCEPTED_RTT_MS {
            return self.offset_ms;
        }

        if self.samples.len() == RING_CAPACITY {
            self.samples.pop_front();
        }
        self.samples.push_back(AcceptedSample {
            rtt_ms: sample.rtt_ms(),
            offset_ms: sample.implied_offset_ms(),
        });
        self.accepted_count += 1;

        let median = self.median_offset_of_best_half();
        self.offset_ms = Some(if self.accepted_count <= INITIAL_BURST_SAMPLES {
            median
        } else {
            match self.offset_ms {
                Some(prev) => (1.0 - SMOOTHING_WEIGHT) * prev + SMOOTHING_WEIGHT * median,
                None => median,
            }
        });
        self.offset_ms
    }

    /// Sort the ring by RTT ascending, take the better (lower-RTT) half
    /// rounded up, and return the median offset of just that half.
    fn median_offset_of_best_half(&self) -> f64 {
        let mut by_rtt: Vec<&AcceptedSample> = self.samples.iter().collect();
        by_rtt.sort_by(|a, b| a.rtt_ms.total_cmp(&b.rtt_ms));
        let take = by_rtt.len().div_ceil(2);
        let mut offsets: Vec<f64> = by_rtt[..take].iter().map(|s| s.offset_ms).collect();
        offsets.sort_by(f64::total_cmp);
        offsets[offsets.len() / 2]
    }

    pub fn offset_ms(&self) -> Option<f64> {
        self.offset_ms
    }

    pub fn sample_count(&self) -> usize {
        self.samples.len()
    }

    pub fn accepted_count(&self) -> usize {
        self.accepted_count
    }
}

impl Default for ClockSyncEstimator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(client_time_ms: f64, server_time_ms: f64, receive_time_ms: f64) -> ClockSyncSample {
        ClockSyncSample {
            client_time_ms,
            server_time_ms,
            receive_time_ms,
        }
    }

    #[test]
    fn offset_is_none_without_samples() {
        assert_eq!(ClockSyncEstimator::new().offset_ms(), None);
    }

    #[test]
    fn rtt_above_500ms_is_rejected() {
        let mut estimator = ClockSyncEstimator::new();
        // 600ms round trip, well past the ceiling.
        let offset = estimator.record_pong(sample(1_000.0, 1_000.0, 1_600.0));
        assert_eq!(offset, None);
        assert_eq!(estimator.accepted_count(), 0);
    }

    #[test]
    fn first_sample_sets_offset_directly_from_the_median() {
        let mut estimator = ClockSyncEstimator::new();
        // Relay reads 1000ms behind the consumer, zero-ish transit.
        let offset = estimator
            .record_pong(sample(10_000.0, 9_000.0, 10_000.0))
            .unwrap();
        assert!((offset - (-1_000.0)).abs() < 1e-9);
    }

    #[test]
    fn initial_burst_uses_direct_median_not_smoothing() {
        let mut estimator = ClockSyncEstimator::new();
        estimator.record_pong(sample(0.0, -995.0, 10.0)); // rtt=10, offset=-1000

        // A clean second sample, with the lowest rtt seen so far, becomes
        // the sole member of the best half — the direct-median branch
        // reports its offset exactly, with no 80/20 damping applied.
        let offset = estimator.record_pong(sample(0.0, -5_000.0, 0.0)).unwrap();
        assert!((offset - (-5_000.0)).abs() < 1e-9);
    }

    #[test]
    fn after_the_burst_updates_are_smoothed() {
        let mut estimator = ClockSyncEstimator::new();
        // 20 clean samples at rtt=100ms, offset -1000ms.
        for _ in 0..INITIAL_BURST_SAMPLES {
            let offset = estimator
                .record_pong(sample(0.0, -950.0, 100.0))
                .unwrap();
            assert!((offset - (-1_000.0)).abs() < 1e-9);
        }

        // Lower-rtt samples at offset -3000ms start displacing the best
        // half, but the median doesn't flip until they're a majority of
        // the selected window — smoothing only ever sees the post-flip
        // median, never a gradual blend of raw offsets.
        for _ in 0..7 {
            let offset = estimator.record_pong(sample(0.0, -3_000.0, 0.0)).unwrap();
            assert!((offset - (-1_000.0)).abs() < 1e-9);
        }

        // The 8th low-rtt sample tips the selected half to a majority of
        // -3000 readings, flipping the median — but the smoothed offset
        // only moves 20% of the way there, not all at once.
        let offset = estimator.record_pong(sample(0.0, -3_000.0, 0.0)).unwrap();
        assert!((offset - (-1_400.0)).abs() < 1e-9);
    }

    #[test]
    fn ring_evicts_oldest_beyond_capacity() {
        let mut estimator = ClockSyncEstimator::new();
        for i in 0..(RING_CAPACITY + 5) {
            estimator.record_pong(sample(i as f64, i as f64, i as f64));
        }
        assert_eq!(estimator.sample_count(), RING_CAPACITY);
        assert_eq!(estimator.accepted_count(), RING_CAPACITY + 5);
    }

    #[test]
    fn lower_rtt_samples_dominate_the_median() {
        let mut estimator = ClockSyncEstimator::new();
        // Two clean (0ms rtt) samples implying offset -1000, one noisy
        // 400ms rtt sample implying a wildly different offset.
        estimator.record_pong(sample(10_000.0, 9_000.0, 10_000.0));
        estimator.record_pong(sample(11_000.0, 10_000.0, 11_000.0));
        let offset = estimator
            .record_pong(sample(12_000.0, 5_000.0, 12_400.0))
            .unwrap();
        // With 3 samples, the best half (ceil(3/2)=2) is the two clean
        // ones, so the noisy reading cannot move the median at all yet.
        assert!((offset - (-1_000.0)).abs() < 1e-9);
    }
}
