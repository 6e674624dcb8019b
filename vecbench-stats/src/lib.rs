#![warn(missing_docs)]
//! VecBench Statistics
//!
//! Accumulates retained latency observations and turns them into snapshots:
//! - `Metric`: ordered latency samples plus a processed-item total
//! - `MetricSnapshot`: mean, windowed mean, min and max, recomputed on demand
//! - `MetricRegistry`: named metrics flushed together at shutdown
//! - Percentiles for run reports

mod artifact;
mod metric;
mod percentiles;
mod registry;

pub use artifact::{ArtifactDir, PersistError};
pub use metric::{Metric, MetricSnapshot, artifact_file_name};
pub use percentiles::{Percentiles, compute_percentile, compute_percentiles};
pub use registry::{MetricHandle, MetricRegistry, PersistOutcome};

/// Number of most recent samples covered by the windowed mean
pub const WINDOW_SIZE: usize = 2000;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_window_size() {
        assert_eq!(WINDOW_SIZE, 2000);
    }
}
