//! Transport-agnostic glass-to-glass latency estimation for the consumer
//! side of the relay. Nothing here touches a socket, a DOM node, or a
//! video frame callback — callers feed it clock-sync pongs and
//! frame-timestamp records, and read back a running latency estimate.

pub mod bias;
pub mod buffer;
pub mod clocksync;
pub mod estimator;
pub mod stats;

pub use bias::BiasEstimator;
pub use buffer::{TimestampBuffer, TimestampEntry};
pub use clocksync::{ClockSyncEstimator, ClockSyncSample};
pub use estimator::LatencyEstimator;
pub use stats::LatencyStats;
