//! Threaded Stream Runner
//!
//! Runs one pipeline as three stages connected by bounded queues:
//!
//! ```text
//! generator thread ──▶ bridge thread ──▶ check stage (calling thread)
//!                 queue            queue   verify · sample · aggregate
//! ```
//!
//! A full queue blocks the sender, so a slow bridge throttles generation
//! instead of growing memory. Order is preserved end to end.
//!
//! The generator stops on the item limit, the run deadline, or a shutdown
//! signal; the downstream stages then drain whatever is in flight before the
//! pipeline persists its metrics.

use indicatif::{ProgressBar, ProgressStyle};
use std::sync::mpsc::{Receiver, SyncSender, sync_channel};
use std::thread;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, error, info};
use vecbench_core::{
    BridgeError, Pipeline, PipelineConfig, PipelineError, ShutdownSummary, TransformBridge,
    TransformOutput, Workload, WorkloadGenerator, shutdown_requested,
};
use vecbench_report::StopReason;
use vecbench_stats::{MetricSnapshot, Percentiles, compute_percentiles};

/// Runner failures; only startup can fail
#[derive(Debug, Error)]
pub enum RunError {
    /// The pipeline could not start
    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    /// Zero-capacity queues would turn every send into a rendezvous
    #[error("queue capacity must be >= 1")]
    ZeroCapacity,
}

/// Settings for one threaded run
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Pipeline settings
    pub pipeline: PipelineConfig,
    /// Capacity of each inter-stage queue
    pub queue_capacity: usize,
    /// Stop after this many workloads
    pub item_limit: Option<u64>,
    /// Stop generating after this long
    pub duration_limit: Option<Duration>,
    /// Show a progress spinner on stderr
    pub show_progress: bool,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            pipeline: PipelineConfig::default(),
            queue_capacity: 64,
            item_limit: None,
            duration_limit: None,
            show_progress: false,
        }
    }
}

/// Everything a finished run produced
#[derive(Debug)]
pub struct RunOutcome {
    /// Why generation stopped
    pub stop_reason: StopReason,
    /// Wall time from start to the end of the drain
    pub elapsed: Duration,
    /// Name reported by the bridge
    pub bridge_name: String,
    /// Counters and persistence results from shutdown
    pub summary: ShutdownSummary,
    /// Final metric snapshots
    pub snapshots: Vec<MetricSnapshot>,
    /// Percentiles over the retained latency samples
    pub latency_percentiles: Option<Percentiles>,
}

type Checked = (Workload, Result<TransformOutput, BridgeError>);

fn generate_stage(
    mut generator: WorkloadGenerator,
    tx: SyncSender<Workload>,
    item_limit: Option<u64>,
    deadline: Option<Instant>,
) -> StopReason {
    let mut sent = 0u64;
    loop {
        if item_limit.is_some_and(|limit| sent >= limit) {
            return StopReason::ItemLimit;
        }
        if shutdown_requested() {
            return StopReason::Signal;
        }
        if deadline.is_some_and(|d| Instant::now() >= d) {
            return StopReason::Duration;
        }
        let Some(workload) = generator.next() else {
            return StopReason::Exhausted;
        };
        if tx.send(workload).is_err() {
            debug!("bridge stage gone; generator stopping");
            return StopReason::Exhausted;
        }
        sent += 1;
    }
}

fn bridge_stage<B: TransformBridge>(
    mut bridge: B,
    rx: Receiver<Workload>,
    tx: SyncSender<Checked>,
) -> String {
    for workload in rx {
        let output = bridge.transform(&workload);
        if tx.send((workload, output)).is_err() {
            break;
        }
    }
    if let Err(e) = bridge.shutdown() {
        error!(error = %e, "transform bridge shutdown failed");
    }
    bridge.name().to_string()
}

fn spinner(show: bool) -> ProgressBar {
    if !show {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} [{elapsed_precise}] {pos} processed {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}

/// Run the pipeline until a stop condition, drain, then persist metrics
pub fn run_stream<B: TransformBridge>(
    config: RunnerConfig,
    bridge: B,
) -> Result<RunOutcome, RunError> {
    if config.queue_capacity == 0 {
        return Err(RunError::ZeroCapacity);
    }

    let mut pipeline = Pipeline::on_start(config.pipeline.clone())?;
    let generator = pipeline
        .take_generator()
        .ok_or_else(|| PipelineError::InvalidConfig("generator already taken".to_string()))?;

    let start = Instant::now();
    let deadline = config.duration_limit.map(|d| start + d);
    let (work_tx, work_rx) = sync_channel::<Workload>(config.queue_capacity);
    let (checked_tx, checked_rx) = sync_channel::<Checked>(config.queue_capacity);
    let pb = spinner(config.show_progress);

    info!(
        bridge = %bridge.name(),
        queue_capacity = config.queue_capacity,
        item_limit = ?config.item_limit,
        duration_limit = ?config.duration_limit,
        "starting stream"
    );

    let (stop_reason, bridge_name) = thread::scope(|scope| {
        let item_limit = config.item_limit;
        let generator_thread = thread::Builder::new()
            .name("vecbench-generator".to_string())
            .spawn_scoped(scope, move || {
                generate_stage(generator, work_tx, item_limit, deadline)
            });
        let bridge_thread = thread::Builder::new()
            .name("vecbench-bridge".to_string())
            .spawn_scoped(scope, move || bridge_stage(bridge, work_rx, checked_tx));

        // Check stage: runs until the bridge stage hangs up
        let mut failures = 0u64;
        for (workload, output) in checked_rx {
            let result = pipeline.on_item(&workload, output);
            if !result.is_correct() {
                failures += 1;
                pb.set_message(format!("{} failed", failures));
            }
            pb.inc(1);
        }

        let stop_reason = match generator_thread.map(|t| t.join()) {
            Ok(Ok(reason)) => reason,
            Ok(Err(_)) => {
                error!("generator thread panicked");
                StopReason::Exhausted
            }
            Err(e) => {
                error!(error = %e, "failed to start generator thread");
                StopReason::Exhausted
            }
        };
        let bridge_name = match bridge_thread.map(|t| t.join()) {
            Ok(Ok(name)) => name,
            Ok(Err(_)) => {
                error!("bridge thread panicked");
                "unknown".to_string()
            }
            Err(e) => {
                error!(error = %e, "failed to start bridge thread");
                "unknown".to_string()
            }
        };
        (stop_reason, bridge_name)
    });

    pb.finish_and_clear();
    let elapsed = start.elapsed();
    let summary = pipeline.on_shutdown();
    let snapshots = pipeline.registry().snapshots();
    let latency_percentiles = pipeline
        .registry()
        .get(vecbench_core::LATENCY_METRIC)
        .and_then(|metric| {
            let metric = metric.lock();
            compute_percentiles(metric.samples())
        });

    info!(
        reason = %stop_reason,
        processed = summary.verification.processed,
        failures = summary.verification.failures(),
        elapsed_ms = elapsed.as_secs_f64() * 1000.0,
        "stream finished"
    );

    Ok(RunOutcome {
        stop_reason,
        elapsed,
        bridge_name,
        summary,
        snapshots,
        latency_percentiles,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use vecbench_core::{FaultyTransform, GeneratorConfig, InProcessTransform};

    fn runner_config(dir: &std::path::Path, items: u64) -> RunnerConfig {
        RunnerConfig {
            pipeline: PipelineConfig {
                generator: GeneratorConfig {
                    max_vector_length: 32,
                    min_emit_interval: Duration::ZERO,
                },
                sampling_rate: Duration::ZERO,
                artifact_dir: dir.to_path_buf(),
                seed: Some(1),
            },
            queue_capacity: 4,
            item_limit: Some(items),
            duration_limit: None,
            show_progress: false,
        }
    }

    #[test]
    fn test_item_limit_run_drains_everything() {
        let dir = tempfile::tempdir().unwrap();
        let outcome = run_stream(runner_config(dir.path(), 200), InProcessTransform).unwrap();

        assert_eq!(outcome.stop_reason, StopReason::ItemLimit);
        assert_eq!(outcome.bridge_name, "vecsum");
        assert_eq!(outcome.summary.verification.processed, 200);
        assert_eq!(outcome.summary.verification.correct, 200);
        assert_eq!(outcome.snapshots[0].total, 200);
        assert_eq!(outcome.snapshots[0].samples, 200);
        assert!(outcome.latency_percentiles.is_some());
        assert!(dir.path().join("metric_latency.json").exists());
    }

    #[test]
    fn test_faulty_bridge_failures_are_counted() {
        let dir = tempfile::tempdir().unwrap();
        let outcome = run_stream(runner_config(dir.path(), 100), FaultyTransform::new(10)).unwrap();

        let v = outcome.summary.verification;
        assert_eq!(v.processed, 100);
        assert_eq!(v.failures(), 10);
        assert_eq!(v.correct, 90);
    }

    #[test]
    fn test_duration_limit_stops_run() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = runner_config(dir.path(), 0);
        config.item_limit = None;
        config.duration_limit = Some(Duration::from_millis(50));
        config.pipeline.generator.min_emit_interval = Duration::from_millis(1);

        let outcome = run_stream(config, InProcessTransform).unwrap();
        assert_eq!(outcome.stop_reason, StopReason::Duration);
        assert!(outcome.summary.verification.processed > 0);
        assert_eq!(
            outcome.summary.verification.processed,
            outcome.snapshots[0].total
        );
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = runner_config(dir.path(), 1);
        config.queue_capacity = 0;
        assert!(matches!(
            run_stream(config, InProcessTransform),
            Err(RunError::ZeroCapacity)
        ));
    }

    struct FailingBridge;

    impl TransformBridge for FailingBridge {
        fn name(&self) -> &str {
            "failing"
        }

        fn transform(&mut self, _: &Workload) -> Result<TransformOutput, BridgeError> {
            Err(BridgeError::Timeout(Duration::from_millis(1)))
        }
    }

    #[test]
    fn test_bridge_errors_do_not_stop_stream() {
        let dir = tempfile::tempdir().unwrap();
        let outcome = run_stream(runner_config(dir.path(), 25), FailingBridge).unwrap();

        let v = outcome.summary.verification;
        assert_eq!(v.processed, 25);
        assert_eq!(v.bridge_failures, 25);
        assert_eq!(outcome.snapshots[0].samples, 0);
        assert_eq!(outcome.snapshots[0].total, 25);
        assert!(outcome.latency_percentiles.is_none());
    }
}
