#![warn(missing_docs)]
//! # VecBench
//!
//! Self-verifying streaming micro-benchmark for an opaque transform stage.
//!
//! Every workload carries its own correctness oracle: for each index `i >= 1`
//! the two input vectors sum to exactly `1`, so any output can be checked
//! without recomputing it. The pipeline measures end-to-end latency, decimates
//! it with a time-based sampler and persists one JSON artifact per metric at
//! shutdown.
//!
//! ```text
//! WorkloadGenerator -> TransformBridge -> Verifier -> Sampler -> Metric
//! ```
//!
//! ## Quick Start
//!
//! ```no_run
//! use vecbench::prelude::*;
//!
//! let mut pipeline = Pipeline::on_start(PipelineConfig::default())?;
//! let mut bridge = InProcessTransform;
//! let generator = pipeline.take_generator().expect("fresh pipeline");
//!
//! for workload in generator.take(1_000) {
//!     let output = bridge.transform(&workload);
//!     pipeline.on_item(&workload, output);
//! }
//! let summary = pipeline.on_shutdown();
//! assert_eq!(summary.verification.processed, 1_000);
//! # Ok::<(), vecbench::PipelineError>(())
//! ```

// Re-export core types
pub use vecbench_core::{
    BridgeError, CorrectnessResult, FaultyTransform, GenerationError, GeneratorConfig,
    InProcessTransform, LATENCY_METRIC, LatencyObservation, MonotonicClock, Pipeline,
    PipelineConfig, PipelineError, Sampler, SequenceCounter, ShutdownSummary, TransformBridge,
    TransformWorker, Verifier, VerifierStats, WorkloadGenerator,
};

// Re-export wire types
pub use vecbench_ipc::{InvalidWorkload, TransformOutput, Workload};

// Re-export stats
pub use vecbench_stats::{
    ArtifactDir, Metric, MetricRegistry, MetricSnapshot, Percentiles, PersistError, WINDOW_SIZE,
    compute_percentiles,
};

// Re-export reporting
pub use vecbench_report::{OutputFormat, RunReport, StopReason};

// Re-export runner
pub use vecbench_cli::{RunnerConfig, WorkerBridge, WorkerCommand, run_stream};

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::{
        CorrectnessResult, InProcessTransform, Pipeline, PipelineConfig, TransformBridge,
        TransformOutput, Workload,
    };
}

/// Run the VecBench CLI.
///
/// ```ignore
/// fn main() -> anyhow::Result<()> {
///     vecbench::run()
/// }
/// ```
pub use vecbench_cli::run;
