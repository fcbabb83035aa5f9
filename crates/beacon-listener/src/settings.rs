//! Timing knobs for the two loops.

use beacon_types::RetrySchedule;
use std::time::Duration;

/// Intervals and schedule used by a [`Listener`](crate::Listener).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListenerSettings {
    /// Sleep between poll cycles.
    pub poll_interval: Duration,
    /// Sleep between retry cycles.
    pub retry_interval: Duration,
    /// Pause before the poll loop reconnects and restarts after a fault.
    pub restart_pause: Duration,
    /// A liveness line is logged every this many poll cycles.
    pub poll_liveness_every: u64,
    /// A liveness line is logged every this many retry cycles.
    pub retry_liveness_every: u64,
    pub schedule: RetrySchedule,
}

impl Default for ListenerSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(10),
            retry_interval: Duration::from_secs(75),
            restart_pause: Duration::from_secs(5),
            // Roughly six hours at the default poll interval.
            poll_liveness_every: 2_160,
            retry_liveness_every: 500,
            schedule: RetrySchedule::default(),
        }
    }
}
