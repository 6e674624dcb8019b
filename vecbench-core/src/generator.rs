//! Workload Generator
//!
//! Produces an unbounded, lazy sequence of self-checking workloads. For every
//! index `i >= 1` the generator draws `v` and emits `a[i] = v + 1`,
//! `b[i] = -v`, so the correct element-wise sum is always `1` there no matter
//! which values were drawn. Index 0 carries a run-wide sequence counter.

use crate::measure::MonotonicClock;
use rand::rngs::{OsRng, StdRng};
use rand::{Rng, SeedableRng};
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;
use thiserror::Error;
use vecbench_ipc::Workload;

/// Default upper bound on workload length
pub const DEFAULT_MAX_VECTOR_LENGTH: usize = 8 * 1024;

/// Default minimum delay between two emitted workloads
pub const DEFAULT_MIN_EMIT_INTERVAL: Duration = Duration::from_millis(1);

/// Workload generation could not start
#[derive(Debug, Error)]
pub enum GenerationError {
    /// The OS randomness source is unavailable
    #[error("no randomness source available: {0}")]
    Entropy(#[from] rand::Error),
}

/// Generator settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratorConfig {
    /// Workload length is drawn uniformly from `[1, max_vector_length]`
    pub max_vector_length: usize,
    /// Sleep before each emission; zero disables pacing
    pub min_emit_interval: Duration,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            max_vector_length: DEFAULT_MAX_VECTOR_LENGTH,
            min_emit_interval: DEFAULT_MIN_EMIT_INTERVAL,
        }
    }
}

impl GeneratorConfig {
    /// Validate configuration values
    pub fn validate(&self) -> Result<(), String> {
        if self.max_vector_length == 0 {
            return Err("max_vector_length must be >= 1".to_string());
        }
        if self.max_vector_length > vecbench_ipc::MAX_FRAME_SIZE / 32 {
            return Err(format!(
                "max_vector_length ({}) exceeds what fits in one bridge frame",
                self.max_vector_length
            ));
        }
        Ok(())
    }
}

/// Run-scoped sequence counter written into index 0 of each workload.
///
/// Cloning shares the counter; it starts at 0 for every run.
#[derive(Debug, Clone, Default)]
pub struct SequenceCounter(Arc<AtomicI64>);

impl SequenceCounter {
    /// Create a counter starting at 0
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the current value and advance
    #[inline]
    pub fn next_value(&self) -> i64 {
        self.0.fetch_add(1, Ordering::Relaxed)
    }

    /// Value the next call to [`next_value`](Self::next_value) returns
    pub fn peek(&self) -> i64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// Infinite iterator of self-checking workloads
pub struct WorkloadGenerator {
    config: GeneratorConfig,
    counter: SequenceCounter,
    clock: MonotonicClock,
    rng: StdRng,
    emitted: u64,
}

impl WorkloadGenerator {
    /// Create a generator seeded from the OS randomness source
    pub fn new(
        config: GeneratorConfig,
        counter: SequenceCounter,
        clock: MonotonicClock,
    ) -> Result<Self, GenerationError> {
        let rng = StdRng::from_rng(OsRng)?;
        Ok(Self::with_rng(config, counter, clock, rng))
    }

    /// Create a deterministic generator
    pub fn with_seed(
        config: GeneratorConfig,
        counter: SequenceCounter,
        clock: MonotonicClock,
        seed: u64,
    ) -> Self {
        Self::with_rng(config, counter, clock, StdRng::seed_from_u64(seed))
    }

    fn with_rng(
        config: GeneratorConfig,
        counter: SequenceCounter,
        clock: MonotonicClock,
        rng: StdRng,
    ) -> Self {
        Self {
            config,
            counter,
            clock,
            rng,
            emitted: 0,
        }
    }

    /// Number of workloads produced so far
    pub fn emitted(&self) -> u64 {
        self.emitted
    }

    /// Generator settings
    pub fn config(&self) -> &GeneratorConfig {
        &self.config
    }

    /// Build one workload immediately, without the emission delay
    pub fn generate(&mut self) -> Workload {
        let max_len = self.config.max_vector_length.max(1);
        let size = self.rng.gen_range(1..=max_len);

        let mut vector_a = Vec::with_capacity(size);
        let mut vector_b = Vec::with_capacity(size);

        vector_a.push(self.counter.next_value());
        vector_b.push(0);

        for _ in 1..size {
            let value = self.rng.gen_range(0..max_len as i64);
            vector_a.push(value + 1);
            vector_b.push(-value);
        }

        // Stamp last so generation cost is not counted as latency
        let captured_at_nanos = self.clock.now_nanos();
        self.emitted += 1;

        Workload::new(vector_a, vector_b, captured_at_nanos)
            .expect("generated vectors have equal non-zero length")
    }
}

impl Iterator for WorkloadGenerator {
    type Item = Workload;

    fn next(&mut self) -> Option<Workload> {
        if !self.config.min_emit_interval.is_zero() {
            std::thread::sleep(self.config.min_emit_interval);
        }
        Some(self.generate())
    }
}
