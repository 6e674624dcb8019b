#![warn(missing_docs)]
//! VecBench Core - Pipeline Runtime
//!
//! The stages of a self-verifying streaming benchmark:
//! - `WorkloadGenerator` emitting workloads that carry their own oracle
//! - `TransformBridge` capability for the opaque transform stage
//! - `Verifier` checking outputs and measuring end-to-end latency
//! - `Sampler` decimating latency observations by time
//! - `Pipeline` tying them to a run context with a single teardown point
//!
//! `TransformWorker` is the worker-process side of an out-of-process bridge.

mod bridge;
mod generator;
mod measure;
mod pipeline;
mod sampler;
mod signal;
mod verifier;
mod worker;

pub use bridge::{BridgeError, FaultyTransform, InProcessTransform, TransformBridge};
pub use generator::{
    DEFAULT_MAX_VECTOR_LENGTH, DEFAULT_MIN_EMIT_INTERVAL, GenerationError, GeneratorConfig,
    SequenceCounter, WorkloadGenerator,
};
pub use measure::MonotonicClock;
pub use pipeline::{LATENCY_METRIC, Pipeline, PipelineConfig, PipelineError, ShutdownSummary};
pub use sampler::Sampler;
pub use signal::{install_shutdown_handler, shutdown_requested};
pub use verifier::{CorrectnessResult, LatencyObservation, Verifier, VerifierStats};
pub use worker::TransformWorker;

pub use vecbench_ipc::{TransformOutput, Workload};
