//! Monotonic Timing
//!
//! Capture and observation timestamps are nanoseconds since a per-run anchor
//! `Instant`. The generator and the verifier share one clock, so latency is a
//! plain subtraction with no cross-clock resynchronization; the transform
//! stage only echoes the timestamp it was given.

use std::time::{Duration, Instant};

/// Monotonic clock reporting nanoseconds since its anchor
#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    anchor: Instant,
}

impl MonotonicClock {
    /// Start a clock anchored at the current instant
    pub fn new() -> Self {
        Self {
            anchor: Instant::now(),
        }
    }

    /// Nanoseconds elapsed since the anchor
    #[inline(always)]
    pub fn now_nanos(&self) -> i64 {
        // i64 nanoseconds cover ~292 years
        self.anchor.elapsed().as_nanos() as i64
    }

    /// Time elapsed since the anchor
    pub fn elapsed(&self) -> Duration {
        self.anchor.elapsed()
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}
