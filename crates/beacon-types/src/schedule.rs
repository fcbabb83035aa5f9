//! Escalating retry schedule for failed deliveries.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// One sweep of the retry loop.
///
/// A failed row is eligible when its `tries` lies in
/// `min_tries..=max_tries` and its last attempt is at least `min_age_secs`
/// old.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryBand {
    /// Lowest `tries` value selected (inclusive).
    pub min_tries: u32,
    /// Highest `tries` value selected (inclusive).
    pub max_tries: u32,
    /// Minimum time since the last attempt, in seconds.
    pub min_age_secs: u64,
}

impl RetryBand {
    pub const fn new(min_tries: u32, max_tries: u32, min_age_secs: u64) -> Self {
        Self {
            min_tries,
            max_tries,
            min_age_secs,
        }
    }

}

/// Errors produced when validating a [`RetrySchedule`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ScheduleError {
    #[error("retry schedule has no bands")]
    Empty,

    #[error("retry band {index} is inverted: min_tries {min} > max_tries {max}")]
    Inverted { index: usize, min: u32, max: u32 },

    #[error("retry band {index} starts at tries 0; rows always have at least one attempt")]
    ZeroTries { index: usize },

    #[error("retry bands {first} and {second} overlap on tries")]
    Overlap { first: usize, second: usize },
}

/// Ordered list of retry sweeps.
///
/// Bands are disjoint on `tries`, so a single row matches at most one band
/// per retry cycle. Rows whose `tries` falls outside every band are never
/// retried again and need operator attention.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<RetryBand>", into = "Vec<RetryBand>")]
pub struct RetrySchedule {
    bands: Vec<RetryBand>,
}

impl RetrySchedule {
    /// Second attempt after one minute.
    pub const SECOND_ATTEMPT: RetryBand = RetryBand::new(1, 1, 60);
    /// Third attempt after thirty minutes.
    pub const THIRD_ATTEMPT: RetryBand = RetryBand::new(2, 2, 30 * 60);
    /// Fourth through tenth attempts, one day apart.
    pub const DAILY_ATTEMPTS: RetryBand = RetryBand::new(3, 10, 24 * 60 * 60);

    /// Builds a schedule, rejecting empty, inverted or overlapping bands.
    ///
    /// # Errors
    ///
    /// Returns [`ScheduleError`] describing the first offending band.
    pub fn new(bands: Vec<RetryBand>) -> Result<Self, ScheduleError> {
        if bands.is_empty() {
            return Err(ScheduleError::Empty);
        }

        for (index, band) in bands.iter().enumerate() {
            if band.min_tries > band.max_tries {
                return Err(ScheduleError::Inverted {
                    index,
                    min: band.min_tries,
                    max: band.max_tries,
                });
            }
            if band.min_tries == 0 {
                return Err(ScheduleError::ZeroTries { index });
            }
        }

        for (first, a) in bands.iter().enumerate() {
            for (offset, b) in bands[first + 1..].iter().enumerate() {
                if a.min_tries <= b.max_tries && b.min_tries <= a.max_tries {
                    return Err(ScheduleError::Overlap {
                        first,
                        second: first + 1 + offset,
                    });
                }
            }
        }

        Ok(Self { bands })
    }

    pub fn bands(&self) -> &[RetryBand] {
        &self.bands
    }

    /// Highest `tries` value any band still retries.
    pub fn max_tries(&self) -> u32 {
        self.bands.iter().map(|b| b.max_tries).max().unwrap_or(0)
    }
}

impl Default for RetrySchedule {
    fn default() -> Self {
        Self {
            bands: vec![
                Self::SECOND_ATTEMPT,
                Self::THIRD_ATTEMPT,
                Self::DAILY_ATTEMPTS,
            ],
        }
    }
}

impl TryFrom<Vec<RetryBand>> for RetrySchedule {
    type Error = ScheduleError;

    fn try_from(bands: Vec<RetryBand>) -> Result<Self, Self::Error> {
        Self::new(bands)
    }
}

impl From<RetrySchedule> for Vec<RetryBand> {
    fn from(schedule: RetrySchedule) -> Self {
        schedule.bands
    }
}
