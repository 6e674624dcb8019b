//! Latency Sampler
//!
//! Time-based decimation of latency observations. A zero rate keeps
//! everything; a positive rate keeps at most one observation per interval,
//! measured from the last observation that was kept.

use crate::verifier::LatencyObservation;
use std::time::Duration;

/// Decides which latency observations reach the statistics aggregator
#[derive(Debug, Clone)]
pub struct Sampler {
    rate_nanos: i64,
    last_accepted: Option<i64>,
    accepted: u64,
    dropped: u64,
}

impl Sampler {
    /// Keep at most one observation per `sampling_rate`; zero keeps all
    pub fn new(sampling_rate: Duration) -> Self {
        Self {
            rate_nanos: i64::try_from(sampling_rate.as_nanos()).unwrap_or(i64::MAX),
            last_accepted: None,
            accepted: 0,
            dropped: 0,
        }
    }

    /// Sampler accepting every observation
    pub fn record_all() -> Self {
        Self::new(Duration::ZERO)
    }

    /// Configured minimum interval between kept observations
    pub fn sampling_rate(&self) -> Duration {
        Duration::from_nanos(self.rate_nanos as u64)
    }

    /// Decide whether to keep `observation`, updating the last-kept timestamp
    pub fn should_record(&mut self, observation: &LatencyObservation) -> bool {
        let keep = self.rate_nanos == 0
            || match self.last_accepted {
                None => true,
                Some(last) => observation.observed_at_nanos.saturating_sub(last) >= self.rate_nanos,
            };

        if keep {
            self.last_accepted = Some(observation.observed_at_nanos);
            self.accepted += 1;
        } else {
            self.dropped += 1;
        }
        keep
    }

    /// Observations kept so far
    pub fn accepted(&self) -> u64 {
        self.accepted
    }

    /// Observations discarded so far
    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}

impl Default for Sampler {
    fn default() -> Self {
        Self::record_all()
    }
}
