//! Report Data Structures

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use vecbench_stats::{MetricSnapshot, Percentiles};

/// Current report schema version
pub const SCHEMA_VERSION: u32 = 1;

/// Complete run report
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub meta: ReportMeta,
    pub verification: VerificationCounts,
    pub sampler: SamplerCounts,
    pub metrics: Vec<MetricSnapshot>,
    /// Percentiles of the retained latency samples (ms); `None` when empty
    pub latency_percentiles: Option<Percentiles>,
    pub artifacts: Vec<ArtifactEntry>,
    pub summary: RunSummary,
}

impl RunReport {
    /// Whether any output failed verification
    pub fn has_failures(&self) -> bool {
        self.verification.failures() > 0
    }
}

/// Report metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportMeta {
    pub schema_version: u32,
    pub version: String,
    pub timestamp: DateTime<Utc>,
    pub system: SystemInfo,
    pub config: ReportConfig,
}

impl ReportMeta {
    /// Metadata stamped now for this build and host
    pub fn now(config: ReportConfig) -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            version: env!("CARGO_PKG_VERSION").to_string(),
            timestamp: Utc::now(),
            system: SystemInfo::current(),
            config,
        }
    }
}

/// Run configuration captured in report metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportConfig {
    pub bridge: String,
    pub max_vector_length: usize,
    pub min_emit_interval_ns: u64,
    pub sampling_rate_ns: u64,
    pub queue_capacity: usize,
    pub item_limit: Option<u64>,
    pub duration_limit_ns: Option<u64>,
}

/// System information
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemInfo {
    pub os: String,
    pub arch: String,
    pub cpu_cores: u32,
}

impl SystemInfo {
    /// Describe the current host
    pub fn current() -> Self {
        Self {
            os: std::env::consts::OS.to_string(),
            arch: std::env::consts::ARCH.to_string(),
            cpu_cores: std::thread::available_parallelism()
                .map(|n| n.get() as u32)
                .unwrap_or(1),
        }
    }
}

/// Verifier counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationCounts {
    pub processed: u64,
    pub correct: u64,
    pub value_mismatches: u64,
    pub shape_mismatches: u64,
    /// Subset of `shape_mismatches` where the bridge produced no output
    pub bridge_failures: u64,
}

impl VerificationCounts {
    /// Items that did not pass
    pub fn failures(&self) -> u64 {
        self.value_mismatches + self.shape_mismatches
    }
}

/// Sampler counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SamplerCounts {
    pub accepted: u64,
    pub dropped: u64,
}

/// Where a metric artifact ended up
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactEntry {
    pub metric: String,
    pub path: Option<String>,
    pub error: Option<String>,
}

/// Why the stream stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StopReason {
    ItemLimit,
    Duration,
    Signal,
    /// A stage exited on its own (e.g. the bridge thread failed)
    Exhausted,
}

impl std::fmt::Display for StopReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            StopReason::ItemLimit => "item limit reached",
            StopReason::Duration => "duration elapsed",
            StopReason::Signal => "interrupted",
            StopReason::Exhausted => "stream ended",
        };
        f.write_str(text)
    }
}

/// Run summary
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub stop_reason: StopReason,
    pub elapsed_ms: f64,
    pub throughput_items_per_sec: f64,
    pub passed: bool,
}

impl RunSummary {
    /// Summarize `processed` items over `elapsed_ms`
    pub fn new(
        stop_reason: StopReason,
        verification: &VerificationCounts,
        elapsed_ms: f64,
    ) -> Self {
        let throughput_items_per_sec = if elapsed_ms > 0.0 {
            verification.processed as f64 / (elapsed_ms / 1000.0)
        } else {
            0.0
        };
        Self {
            stop_reason,
            elapsed_ms,
            throughput_items_per_sec,
            passed: verification.failures() == 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summary_throughput() {
        let counts = VerificationCounts {
            processed: 500,
            correct: 500,
            ..Default::default()
        };
        let summary = RunSummary::new(StopReason::ItemLimit, &counts, 250.0);
        assert!((summary.throughput_items_per_sec - 2000.0).abs() < 1e-9);
        assert!(summary.passed);
    }

    #[test]
    fn test_summary_zero_elapsed() {
        let summary = RunSummary::new(StopReason::Signal, &VerificationCounts::default(), 0.0);
        assert_eq!(summary.throughput_items_per_sec, 0.0);
    }

    #[test]
    fn test_failures_fail_the_run() {
        let counts = VerificationCounts {
            processed: 3,
            correct: 1,
            value_mismatches: 1,
            shape_mismatches: 1,
            bridge_failures: 1,
        };
        assert_eq!(counts.failures(), 2);
        assert!(!RunSummary::new(StopReason::Duration, &counts, 10.0).passed);
    }

    #[test]
    fn test_stop_reason_serialization() {
        assert_eq!(
            serde_json::to_string(&StopReason::ItemLimit).unwrap(),
            "\"item-limit\""
        );
    }
}
