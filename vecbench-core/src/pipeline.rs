//! Pipeline Host Lifecycle
//!
//! The three entry points a host scheduler drives: [`Pipeline::on_start`],
//! [`Pipeline::on_item`] and [`Pipeline::on_shutdown`].
//!
//! A pipeline owns the run context (clock, sequence counter, metric registry)
//! and hands it to each component at construction. Metrics are flushed
//! exactly once: by `on_shutdown`, or by `Drop` when the host exits early.

use crate::bridge::BridgeError;
use crate::generator::{GenerationError, GeneratorConfig, SequenceCounter, WorkloadGenerator};
use crate::measure::MonotonicClock;
use crate::sampler::Sampler;
use crate::verifier::{CorrectnessResult, Verifier, VerifierStats};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};
use vecbench_ipc::{TransformOutput, Workload};
use vecbench_stats::{ArtifactDir, MetricHandle, MetricRegistry, PersistError, PersistOutcome};

/// Name of the end-to-end latency metric
pub const LATENCY_METRIC: &str = "latency";

/// Startup failures. Everything after startup is an observation, not an error.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Rejected configuration value
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Workloads cannot be produced
    #[error("Workload generation unavailable: {0}")]
    GenerationFailure(#[from] GenerationError),

    /// Artifact directory missing or not writable
    #[error("Artifact directory unusable: {0}")]
    ArtifactDir(#[source] PersistError),
}

/// Settings accepted by [`Pipeline::on_start`]
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Workload shape and pacing
    pub generator: GeneratorConfig,
    /// Minimum gap between recorded latencies; zero records all
    pub sampling_rate: Duration,
    /// Where metric artifacts are written
    pub artifact_dir: PathBuf,
    /// Fixed generator seed (deterministic runs)
    pub seed: Option<u64>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            generator: GeneratorConfig::default(),
            sampling_rate: Duration::ZERO,
            artifact_dir: PathBuf::from("target/vecbench"),
            seed: None,
        }
    }
}

/// What a run left behind at shutdown
#[derive(Debug)]
pub struct ShutdownSummary {
    /// Final verifier counters
    pub verification: VerifierStats,
    /// Latency observations kept by the sampler
    pub sampled: u64,
    /// Latency observations dropped by the sampler
    pub dropped: u64,
    /// One entry per registered metric; empty when another pipeline still
    /// holds the shared registry and will persist it
    pub outcomes: Vec<PersistOutcome>,
}

impl ShutdownSummary {
    /// Whether every metric artifact was written
    pub fn all_persisted(&self) -> bool {
        self.outcomes.iter().all(|o| o.result.is_ok())
    }
}

/// One benchmark run
pub struct Pipeline {
    clock: MonotonicClock,
    counter: SequenceCounter,
    registry: Arc<MetricRegistry>,
    artifact_dir: ArtifactDir,
    generator: Option<WorkloadGenerator>,
    verifier: Verifier,
    sampler: Sampler,
    latency: MetricHandle,
    flushed: bool,
}

impl Pipeline {
    /// Build a run with its own metric registry
    pub fn on_start(config: PipelineConfig) -> Result<Self, PipelineError> {
        Self::with_registry(config, Arc::new(MetricRegistry::new()))
    }

    /// Build a run recording into a shared registry.
    ///
    /// Pipelines sharing a registry share the `latency` metric; its mutex
    /// serializes their writes. The last of them to shut down persists it.
    pub fn with_registry(
        config: PipelineConfig,
        registry: Arc<MetricRegistry>,
    ) -> Result<Self, PipelineError> {
        config
            .generator
            .validate()
            .map_err(PipelineError::InvalidConfig)?;

        let artifact_dir =
            ArtifactDir::prepare(&config.artifact_dir).map_err(PipelineError::ArtifactDir)?;

        let clock = MonotonicClock::new();
        let counter = SequenceCounter::new();
        let generator = match config.seed {
            Some(seed) => {
                WorkloadGenerator::with_seed(config.generator.clone(), counter.clone(), clock, seed)
            }
            None => WorkloadGenerator::new(config.generator.clone(), counter.clone(), clock)?,
        };
        let latency = registry.register(LATENCY_METRIC);
        registry.attach();

        info!(
            max_vector_length = config.generator.max_vector_length,
            min_emit_interval = ?config.generator.min_emit_interval,
            sampling_rate = ?config.sampling_rate,
            artifacts = %artifact_dir.path().display(),
            "pipeline started"
        );

        Ok(Self {
            clock,
            counter,
            registry,
            artifact_dir,
            generator: Some(generator),
            verifier: Verifier::new(clock),
            sampler: Sampler::new(config.sampling_rate),
            latency,
            flushed: false,
        })
    }

    /// Hand the generator to the emitting stage; `None` once taken
    pub fn take_generator(&mut self) -> Option<WorkloadGenerator> {
        self.generator.take()
    }

    /// Run clock shared by generator and verifier
    pub fn clock(&self) -> MonotonicClock {
        self.clock
    }

    /// Run-scoped sequence counter
    pub fn counter(&self) -> &SequenceCounter {
        &self.counter
    }

    /// Registry holding this run's metrics
    pub fn registry(&self) -> &Arc<MetricRegistry> {
        &self.registry
    }

    /// Verifier counters so far
    pub fn verifier_stats(&self) -> VerifierStats {
        self.verifier.stats()
    }

    /// Latency sampler
    pub fn sampler(&self) -> &Sampler {
        &self.sampler
    }

    /// Process one workload end to end.
    ///
    /// `total` is incremented for every item; latency is recorded only for
    /// outputs of the right shape that the sampler accepts.
    pub fn on_item(
        &mut self,
        workload: &Workload,
        output: Result<TransformOutput, BridgeError>,
    ) -> CorrectnessResult {
        let (result, observation) = match &output {
            Ok(output) => self.verifier.verify(workload, output),
            Err(failure) => self.verifier.reject(workload, failure),
        };

        let mut metric = self.latency.lock();
        metric.increment_total();
        if result.records_latency() && self.sampler.should_record(&observation) {
            metric.record(observation.latency_millis);
        }

        result
    }

    /// Release the registry, persisting every registered metric if this is
    /// its last pipeline. Later calls return an empty outcome list.
    pub fn on_shutdown(&mut self) -> ShutdownSummary {
        let outcomes = if self.flushed {
            Vec::new()
        } else {
            self.flushed = true;
            self.registry
                .release(self.artifact_dir.path())
                .unwrap_or_default()
        };

        let verification = self.verifier.stats();
        info!(
            processed = verification.processed,
            correct = verification.correct,
            value_mismatches = verification.value_mismatches,
            shape_mismatches = verification.shape_mismatches,
            sampled = self.sampler.accepted(),
            "pipeline shut down"
        );

        ShutdownSummary {
            verification,
            sampled: self.sampler.accepted(),
            dropped: self.sampler.dropped(),
            outcomes,
        }
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        if !self.flushed {
            warn!("pipeline dropped without shutdown; flushing metrics");
            self.on_shutdown();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn config(dir: &TempDir) -> PipelineConfig {
        PipelineConfig {
            generator: GeneratorConfig {
                max_vector_length: 16,
                min_emit_interval: Duration::ZERO,
            },
            sampling_rate: Duration::ZERO,
            artifact_dir: dir.path().to_path_buf(),
            seed: Some(7),
        }
    }

    fn scenario_workload(captured_at_nanos: i64) -> Workload {
        Workload::new(vec![10, 3, 7, 2, 9], vec![0, -2, -6, -1, -8], captured_at_nanos).unwrap()
    }

    fn latency(pipeline: &Pipeline) -> (usize, u64) {
        let metric = pipeline.registry().get(LATENCY_METRIC).unwrap();
        let metric = metric.lock();
        (metric.samples().len(), metric.total())
    }

    #[test]
    fn test_correct_item_records_latency() {
        let dir = TempDir::new().unwrap();
        let mut pipeline = Pipeline::on_start(config(&dir)).unwrap();
        let workload = scenario_workload(pipeline.clock().now_nanos());

        let result = pipeline.on_item(
            &workload,
            Ok(TransformOutput::new(vec![10, 1, 1, 1, 1], workload.captured_at_nanos())),
        );

        assert_eq!(result, CorrectnessResult::Correct);
        assert_eq!(latency(&pipeline), (1, 1));
    }

    #[test]
    fn test_value_mismatch_keeps_stream_alive() {
        let dir = TempDir::new().unwrap();
        let mut pipeline = Pipeline::on_start(config(&dir)).unwrap();
        let workload = scenario_workload(pipeline.clock().now_nanos());

        let result = pipeline.on_item(
            &workload,
            Ok(TransformOutput::new(vec![10, 1, 2, 1, 1], workload.captured_at_nanos())),
        );
        assert_eq!(result, CorrectnessResult::ValueMismatch { index: 2, value: 2 });
        assert_eq!(latency(&pipeline).1, 1);

        let next = pipeline.on_item(&workload, Ok(workload.element_sum()));
        assert!(next.is_correct());
        assert_eq!(latency(&pipeline).1, 2);
    }

    #[test]
    fn test_shape_failures_count_total_only() {
        let dir = TempDir::new().unwrap();
        let mut pipeline = Pipeline::on_start(config(&dir)).unwrap();
        let workload = scenario_workload(0);

        pipeline.on_item(&workload, Ok(TransformOutput::new(vec![10, 1], 0)));
        pipeline.on_item(&workload, Err(BridgeError::Timeout(Duration::from_secs(1))));

        assert_eq!(latency(&pipeline), (0, 2));
        let stats = pipeline.verifier_stats();
        assert_eq!(stats.shape_mismatches, 2);
        assert_eq!(stats.bridge_failures, 1);
    }

    #[test]
    fn test_sampler_limits_recorded_latencies() {
        let dir = TempDir::new().unwrap();
        let mut cfg = config(&dir);
        cfg.sampling_rate = Duration::from_secs(3600);
        let mut pipeline = Pipeline::on_start(cfg).unwrap();
        let workload = scenario_workload(0);

        for _ in 0..10 {
            pipeline.on_item(&workload, Ok(workload.element_sum()));
        }

        assert_eq!(latency(&pipeline), (1, 10));
        assert_eq!(pipeline.sampler().dropped(), 9);
    }

    #[test]
    fn test_generator_feeds_pipeline() {
        let dir = TempDir::new().unwrap();
        let mut pipeline = Pipeline::on_start(config(&dir)).unwrap();
        let generator = pipeline.take_generator().unwrap();
        assert!(pipeline.take_generator().is_none());

        for workload in generator.take(25) {
            let output = workload.element_sum();
            assert!(pipeline.on_item(&workload, Ok(output)).is_correct());
        }
        assert_eq!(pipeline.counter().peek(), 25);
        assert_eq!(pipeline.verifier_stats().correct, 25);
    }

    #[test]
    fn test_shutdown_persists_once() {
        let dir = TempDir::new().unwrap();
        let mut pipeline = Pipeline::on_start(config(&dir)).unwrap();
        let workload = scenario_workload(0);
        pipeline.on_item(&workload, Ok(workload.element_sum()));

        let summary = pipeline.on_shutdown();
        assert_eq!(summary.outcomes.len(), 1);
        assert!(summary.all_persisted());
        assert_eq!(summary.verification.processed, 1);
        assert!(dir.path().join("metric_latency.json").exists());

        assert!(pipeline.on_shutdown().outcomes.is_empty());
    }

    #[test]
    fn test_drop_flushes_metrics() {
        let dir = TempDir::new().unwrap();
        {
            let mut pipeline = Pipeline::on_start(config(&dir)).unwrap();
            let workload = scenario_workload(0);
            pipeline.on_item(&workload, Ok(workload.element_sum()));
        }

        let text = std::fs::read_to_string(dir.path().join("metric_latency.json")).unwrap();
        let json: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(json["total"], 1);
    }

    #[test]
    fn test_shared_registry_serializes_writers() {
        let dir = TempDir::new().unwrap();
        let registry = Arc::new(MetricRegistry::new());

        std::thread::scope(|scope| {
            for _ in 0..4 {
                let registry = Arc::clone(&registry);
                let cfg = config(&dir);
                scope.spawn(move || {
                    let mut pipeline = Pipeline::with_registry(cfg, registry).unwrap();
                    let workload = scenario_workload(0);
                    for _ in 0..250 {
                        pipeline.on_item(&workload, Ok(workload.element_sum()));
                    }
                    assert!(pipeline.on_shutdown().all_persisted());
                });
            }
        });

        let metric = registry.get(LATENCY_METRIC).unwrap();
        assert_eq!(metric.lock().total(), 1000);
        assert_eq!(metric.lock().samples().len(), 1000);
        assert_eq!(registry.attached(), 0);

        let text = std::fs::read_to_string(dir.path().join("metric_latency.json")).unwrap();
        let json: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(json["total"], 1000);
    }

    #[test]
    fn test_simultaneous_shutdowns_persist_once() {
        const PIPELINES: usize = 8;

        for round in 0..20u64 {
            let dir = TempDir::new().unwrap();
            let registry = Arc::new(MetricRegistry::new());
            let barrier = std::sync::Barrier::new(PIPELINES);

            let summaries: Vec<ShutdownSummary> = std::thread::scope(|scope| {
                let workers: Vec<_> = (0..PIPELINES)
                    .map(|_| {
                        let registry = Arc::clone(&registry);
                        let cfg = config(&dir);
                        let barrier = &barrier;
                        scope.spawn(move || {
                            let mut pipeline = Pipeline::with_registry(cfg, registry).unwrap();
                            let workload = scenario_workload(0);
                            pipeline.on_item(&workload, Ok(workload.element_sum()));
                            barrier.wait();
                            pipeline.on_shutdown()
                        })
                    })
                    .collect();
                workers.into_iter().map(|w| w.join().unwrap()).collect()
            });

            assert!(summaries.iter().all(ShutdownSummary::all_persisted), "round {round}");
            let writers = summaries.iter().filter(|s| !s.outcomes.is_empty()).count();
            assert_eq!(writers, 1, "round {round}");

            let text = std::fs::read_to_string(dir.path().join("metric_latency.json")).unwrap();
            let json: serde_json::Value = serde_json::from_str(&text).unwrap();
            assert_eq!(json["total"], PIPELINES as u64);
            let entries = std::fs::read_dir(dir.path()).unwrap().count();
            assert_eq!(entries, 1, "temporary files left behind in round {round}");
        }
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let dir = TempDir::new().unwrap();
        let mut cfg = config(&dir);
        cfg.generator.max_vector_length = 0;
        assert!(matches!(
            Pipeline::on_start(cfg),
            Err(PipelineError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_unwritable_artifact_dir_is_fatal() {
        let dir = TempDir::new().unwrap();
        let blocker = dir.path().join("occupied");
        std::fs::write(&blocker, b"not a directory").unwrap();

        let mut cfg = config(&dir);
        cfg.artifact_dir = blocker.join("metrics");
        assert!(matches!(
            Pipeline::on_start(cfg),
            Err(PipelineError::ArtifactDir(_))
        ));
    }
}
