use std::collections::VecDeque;

/// Ring size for skew samples (§4.7.3).
const RING_CAPACITY: usize = 30;

/// A raw `relay_time_ms − capture_ms` difference larger than this in
/// magnitude cannot plausibly be transit time — it's clock skew between
/// the producer's capture clock and the relay's (§4.7.3).
const SKEW_THRESHOLD_MS: f64 = 10_000.0;

/// Floor applied to a skew-corrected reading, standing in for the transit
/// time the correction can't otherwise recover (§4.7.3).
const TRANSIT_FLOOR_MS: f64 = 10.0;

/// Tracks the residual clock bias between the producer's capture clock and
/// the relay's `relay_time_ms` stamp. Most of the time `relay_time_ms −
/// capture_ms` really is transit time and is used as-is; when it's
/// implausibly large the estimator instead treats it as clock skew,
/// accumulates it into a running median, and reports a corrected value
/// with a small floor standing in for plausible real transit (§4.7.3).
pub struct BiasEstimator {
    samples: VecDeque<f64>,
    capacity: usize,
}

impl BiasEstimator {
    pub fn new() -> Self {
        Self::with_capacity(RING_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Compose the producer→relay leg of the per-frame latency from one
    /// inbound `frame_timestamp`'s raw clocks (§4.7.3, feeding §4.7.4's
    /// `python_go`).
    pub fn correct(&mut self, capture_ms: f64, relay_time_ms: f64) -> f64 {
        let diff_ms = relay_time_ms - capture_ms;
        if diff_ms.abs() <= SKEW_THRESHOLD_MS {
            return diff_ms;
        }

        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(diff_ms);

        let bias_ms = self.median();
        diff_ms - bias_ms + TRANSIT_FLOOR_MS
    }

    fn median(&self) -> f64 {
        let mut sorted: Vec<f64> = self.samples.iter().copied().collect();
        sorted.sort_by(f64::total_cmp);
        sorted[sorted.len() / 2]
    }

    /// The current `bias_P_R` estimate, if any skew has been observed yet.
    pub fn bias_ms(&self) -> Option<f64> {
        if self.samples.is_empty() {
            None
        } else {
            Some(self.median())
        }
    }

    pub fn sample_count(&self) -> usize {
        self.samples.len()
    }
}

impl Default for BiasEstimator {
    fn default() -> Self {
        Self::new()
    }
}
