//! Output Verification
//!
//! Checks a transform output against the oracle embedded in its workload and
//! measures end-to-end latency from the echoed capture timestamp.
//!
//! Mismatches are observations: they are counted and logged, and the stream
//! keeps flowing.

use crate::bridge::BridgeError;
use crate::measure::MonotonicClock;
use tracing::error;
use vecbench_ipc::{TransformOutput, Workload};

/// Classification of one transform output
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CorrectnessResult {
    /// Every element past index 0 equals 1
    Correct,
    /// First element past index 0 that is not 1
    ValueMismatch {
        /// Index of the offending element
        index: usize,
        /// Value found there
        value: i64,
    },
    /// Output length differs from the workload length, or no output arrived
    ShapeMismatch {
        /// Workload length
        expected: usize,
        /// Output length (0 when the bridge failed)
        actual: usize,
    },
}

impl CorrectnessResult {
    /// Whether the output passed the self-check
    pub fn is_correct(&self) -> bool {
        matches!(self, CorrectnessResult::Correct)
    }

    /// Whether latency for this item may be recorded
    pub fn records_latency(&self) -> bool {
        !matches!(self, CorrectnessResult::ShapeMismatch { .. })
    }

    /// Short label for logs and reports
    pub fn label(&self) -> &'static str {
        match self {
            CorrectnessResult::Correct => "correct",
            CorrectnessResult::ValueMismatch { .. } => "value-mismatch",
            CorrectnessResult::ShapeMismatch { .. } => "shape-mismatch",
        }
    }
}

/// One end-to-end latency measurement
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LatencyObservation {
    /// Capture-to-verification latency in milliseconds
    pub latency_millis: f64,
    /// Verification timestamp (nanoseconds, same clock as capture)
    pub observed_at_nanos: i64,
}

impl LatencyObservation {
    /// Latency between a capture and an observation timestamp
    pub fn between(captured_at_nanos: i64, observed_at_nanos: i64) -> Self {
        Self {
            latency_millis: observed_at_nanos.wrapping_sub(captured_at_nanos) as f64 / 1e6,
            observed_at_nanos,
        }
    }
}

/// Counters kept by the verifier
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VerifierStats {
    /// Items verified, one per call
    pub processed: u64,
    /// Items that passed
    pub correct: u64,
    /// Items failing the value check
    pub value_mismatches: u64,
    /// Items with a wrong output length, including bridge failures
    pub shape_mismatches: u64,
    /// Subset of `shape_mismatches` caused by the bridge failing outright
    pub bridge_failures: u64,
}

impl VerifierStats {
    /// Number of items that did not pass
    pub fn failures(&self) -> u64 {
        self.value_mismatches + self.shape_mismatches
    }
}

/// Stateful output checker
#[derive(Debug)]
pub struct Verifier {
    clock: MonotonicClock,
    stats: VerifierStats,
}

impl Verifier {
    /// Create a verifier reading time from `clock`
    pub fn new(clock: MonotonicClock) -> Self {
        Self {
            clock,
            stats: VerifierStats::default(),
        }
    }

    /// Counters so far
    pub fn stats(&self) -> VerifierStats {
        self.stats
    }

    /// Classify `output` and measure latency now
    pub fn verify(
        &mut self,
        workload: &Workload,
        output: &TransformOutput,
    ) -> (CorrectnessResult, LatencyObservation) {
        let now = self.clock.now_nanos();
        self.verify_at(workload, output, now)
    }

    /// Classify `output` and measure latency at `observed_at_nanos`
    pub fn verify_at(
        &mut self,
        workload: &Workload,
        output: &TransformOutput,
        observed_at_nanos: i64,
    ) -> (CorrectnessResult, LatencyObservation) {
        self.stats.processed += 1;

        let result = classify(workload, output);
        match result {
            CorrectnessResult::Correct => self.stats.correct += 1,
            CorrectnessResult::ValueMismatch { index, value } => {
                self.stats.value_mismatches += 1;
                error!(
                    sequence = workload.sequence(),
                    index, value, "transform result is WRONG"
                );
            }
            CorrectnessResult::ShapeMismatch { expected, actual } => {
                self.stats.shape_mismatches += 1;
                error!(
                    sequence = workload.sequence(),
                    expected, actual, "transform output has wrong length"
                );
            }
        }

        let latency = LatencyObservation::between(output.captured_at_nanos, observed_at_nanos);
        (result, latency)
    }

    /// Account for a bridge call that produced no output.
    ///
    /// Classified as a shape mismatch; latency is measured from the workload's
    /// own capture timestamp.
    pub fn reject(
        &mut self,
        workload: &Workload,
        failure: &BridgeError,
    ) -> (CorrectnessResult, LatencyObservation) {
        let now = self.clock.now_nanos();
        self.stats.processed += 1;
        self.stats.shape_mismatches += 1;
        self.stats.bridge_failures += 1;
        error!(
            sequence = workload.sequence(),
            error = %failure,
            "transform bridge failed"
        );

        let result = CorrectnessResult::ShapeMismatch {
            expected: workload.len(),
            actual: 0,
        };
        (
            result,
            LatencyObservation::between(workload.captured_at_nanos(), now),
        )
    }
}

/// Check shape first, then scan past index 0 for the first value that is not 1.
fn classify(workload: &Workload, output: &TransformOutput) -> CorrectnessResult {
    if output.values.len() != workload.len() {
        return CorrectnessResult::ShapeMismatch {
            expected: workload.len(),
            actual: output.values.len(),
        };
    }

    match output
        .values
        .iter()
        .enumerate()
        .skip(1)
        .find(|(_, v)| **v != 1)
    {
        Some((index, &value)) => CorrectnessResult::ValueMismatch { index, value },
        None => CorrectnessResult::Correct,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn scenario_workload() -> Workload {
        Workload::new(vec![10, 3, 7, 2, 9], vec![0, -2, -6, -1, -8], 1_000_000).unwrap()
    }

    #[test]
    fn test_correct_output() {
        let mut verifier = Verifier::new(MonotonicClock::new());
        let output = TransformOutput::new(vec![10, 1, 1, 1, 1], 1_000_000);

        let (result, latency) = verifier.verify_at(&scenario_workload(), &output, 3_500_000);

        assert_eq!(result, CorrectnessResult::Correct);
        assert!((latency.latency_millis - 2.5).abs() < 1e-12);
        assert_eq!(latency.observed_at_nanos, 3_500_000);
        assert_eq!(verifier.stats().processed, 1);
        assert_eq!(verifier.stats().correct, 1);
    }

    #[test]
    fn test_value_mismatch_reports_first_offender() {
        let mut verifier = Verifier::new(MonotonicClock::new());
        let output = TransformOutput::new(vec![10, 1, 2, 1, 0], 1_000_000);

        let (result, _) = verifier.verify_at(&scenario_workload(), &output, 2_000_000);

        assert_eq!(result, CorrectnessResult::ValueMismatch { index: 2, value: 2 });
        assert_eq!(verifier.stats().value_mismatches, 1);
        assert!(result.records_latency());
    }

    #[test]
    fn test_index_zero_is_not_checked() {
        let mut verifier = Verifier::new(MonotonicClock::new());
        let output = TransformOutput::new(vec![-999, 1, 1, 1, 1], 1_000_000);
        let (result, _) = verifier.verify_at(&scenario_workload(), &output, 1_000_000);
        assert!(result.is_correct());
    }

    #[test]
    fn test_shape_mismatch_skips_value_scan() {
        let mut verifier = Verifier::new(MonotonicClock::new());
        // Wrong values too, but length is checked first
        let output = TransformOutput::new(vec![10, 5, 5], 1_000_000);

        let (result, _) = verifier.verify_at(&scenario_workload(), &output, 1_000_000);

        assert_eq!(
            result,
            CorrectnessResult::ShapeMismatch {
                expected: 5,
                actual: 3
            }
        );
        assert!(!result.records_latency());
        assert_eq!(verifier.stats().shape_mismatches, 1);
        assert_eq!(verifier.stats().value_mismatches, 0);
    }

    #[test]
    fn test_latency_uses_echoed_timestamp() {
        let mut verifier = Verifier::new(MonotonicClock::new());
        let output = TransformOutput::new(vec![10, 1, 1, 1, 1], 4_000_000);
        let (_, latency) = verifier.verify_at(&scenario_workload(), &output, 5_000_000);
        assert!((latency.latency_millis - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_reject_counts_bridge_failure() {
        let mut verifier = Verifier::new(MonotonicClock::new());
        let failure = BridgeError::WorkerCrashed("gone".to_string());

        let (result, _) = verifier.reject(&scenario_workload(), &failure);

        assert_eq!(
            result,
            CorrectnessResult::ShapeMismatch {
                expected: 5,
                actual: 0
            }
        );
        let stats = verifier.stats();
        assert_eq!(stats.processed, 1);
        assert_eq!(stats.shape_mismatches, 1);
        assert_eq!(stats.bridge_failures, 1);
        assert_eq!(stats.failures(), 1);
    }

    #[test]
    fn test_processed_counts_every_call() {
        let mut verifier = Verifier::new(MonotonicClock::new());
        let workload = scenario_workload();
        let good = workload.element_sum();
        let short = TransformOutput::new(vec![], 0);
        for _ in 0..3 {
            verifier.verify(&workload, &good);
            verifier.verify(&workload, &short);
        }
        assert_eq!(verifier.stats().processed, 6);
        assert_eq!(verifier.stats().correct, 3);
        assert_eq!(verifier.stats().shape_mismatches, 3);
    }

    fn arb_workload() -> impl Strategy<Value = Workload> {
        (any::<i64>(), prop::collection::vec(0i64..8192, 0..64)).prop_map(|(seq, draws)| {
            let mut a = vec![seq];
            let mut b = vec![0];
            for v in draws {
                a.push(v + 1);
                b.push(-v);
            }
            Workload::new(a, b, 0).unwrap()
        })
    }

    proptest! {
        #[test]
        fn prop_element_sum_is_correct(workload in arb_workload()) {
            let mut verifier = Verifier::new(MonotonicClock::new());
            let (result, _) = verifier.verify_at(&workload, &workload.element_sum(), 0);
            prop_assert_eq!(result, CorrectnessResult::Correct);
        }

        #[test]
        fn prop_single_perturbation_is_value_mismatch(
            workload in arb_workload().prop_filter("needs index >= 1", |w| w.len() > 1),
            pick in any::<prop::sample::Index>(),
            delta in prop_oneof![i64::MIN..0i64, 1..i64::MAX],
        ) {
            let mut output = workload.element_sum();
            let index = 1 + pick.index(workload.len() - 1);
            output.values[index] = output.values[index].wrapping_add(delta);

            let mut verifier = Verifier::new(MonotonicClock::new());
            let (result, _) = verifier.verify_at(&workload, &output, 0);
            prop_assert_eq!(
                result,
                CorrectnessResult::ValueMismatch { index, value: output.values[index] }
            );
        }

        #[test]
        fn prop_length_change_is_shape_mismatch(
            workload in arb_workload(),
            extra in 1usize..8,
            shrink in any::<bool>(),
        ) {
            let mut output = workload.element_sum();
            if shrink {
                output.values.truncate(workload.len() - 1);
            } else {
                output.values.extend(std::iter::repeat(7).take(extra));
            }

            let mut verifier = Verifier::new(MonotonicClock::new());
            let (result, _) = verifier.verify_at(&workload, &output, 0);
            prop_assert_eq!(
                result,
                CorrectnessResult::ShapeMismatch {
                    expected: workload.len(),
                    actual: output.values.len(),
                }
            );
            prop_assert_eq!(verifier.stats().value_mismatches, 0);
        }
    }
}
