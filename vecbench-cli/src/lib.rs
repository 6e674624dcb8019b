#![warn(missing_docs)]
//! VecBench CLI Library
//!
//! Command-line front end for the benchmark: loads `vecbench.toml`, applies
//! flag overrides, picks a transform bridge, runs the threaded stream and
//! prints a report. The same binary doubles as the transform worker when
//! started with the hidden `--transform-worker` flag.
//!
//! # Example
//!
//! ```ignore
//! fn main() -> anyhow::Result<()> {
//!     vecbench_cli::run()
//! }
//! ```

mod config;
mod runner;
mod supervisor;

pub use config::*;
pub use runner::{RunError, RunOutcome, RunnerConfig, run_stream};
pub use supervisor::{WORKER_FLAG, WorkerBridge, WorkerCommand};

use anyhow::Context;
use clap::Parser;
use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;
use vecbench_core::{
    FaultyTransform, GeneratorConfig, InProcessTransform, PipelineConfig, TransformBridge,
    TransformWorker, install_shutdown_handler,
};
use vecbench_report::{
    ArtifactEntry, OutputFormat, ReportConfig, ReportMeta, RunReport, RunSummary, SamplerCounts,
    VerificationCounts,
};

/// VecBench CLI arguments
#[derive(Parser, Debug, Default)]
#[command(name = "vecbench")]
#[command(
    author,
    version,
    about = "VecBench - self-verifying streaming micro-benchmark"
)]
pub struct Cli {
    /// Configuration file (default: discover vecbench.toml upwards)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Stop after this many workloads
    #[arg(long, short = 'n')]
    pub items: Option<u64>,

    /// Stop generating after this long (e.g., "10s")
    #[arg(long)]
    pub duration: Option<String>,

    /// Maximum workload length
    #[arg(long)]
    pub max_len: Option<usize>,

    /// Delay between emitted workloads (e.g., "1ms", "0s")
    #[arg(long)]
    pub emit_interval: Option<String>,

    /// Minimum time between recorded latencies ("0s" records all)
    #[arg(long)]
    pub sampling_rate: Option<String>,

    /// Transform bridge: worker, in-process, faulty
    #[arg(long)]
    pub bridge: Option<String>,

    /// Per-workload timeout for the worker bridge
    #[arg(long)]
    pub bridge_timeout: Option<String>,

    /// External worker command line (speaks the bridge protocol on fds 3/4)
    #[arg(long)]
    pub worker_cmd: Option<String>,

    /// Faulty bridge corrupts one output in this many
    #[arg(long)]
    pub fault_every: Option<u64>,

    /// Fixed RNG seed for reproducible workloads
    #[arg(long)]
    pub seed: Option<u64>,

    /// Capacity of each inter-stage queue
    #[arg(long)]
    pub queue_capacity: Option<usize>,

    /// Metric artifact directory
    #[arg(long)]
    pub output_dir: Option<PathBuf>,

    /// Report format: human, json
    #[arg(long)]
    pub format: Option<String>,

    /// Write the report to this file instead of stdout
    #[arg(long)]
    pub report: Option<PathBuf>,

    /// Print a default vecbench.toml and exit
    #[arg(long)]
    pub print_default_config: bool,

    /// No progress spinner; warnings and errors only
    #[arg(short, long)]
    pub quiet: bool,

    /// Verbose output
    #[arg(short, long)]
    pub verbose: bool,

    /// Internal: serve a transform over fds 3/4 (used by the worker bridge)
    #[arg(
        long = "transform-worker",
        hide = true,
        num_args = 0..=1,
        default_missing_value = "vecsum"
    )]
    pub transform_worker: Option<String>,
}

/// Fully resolved settings for one run
#[derive(Debug, Clone)]
pub struct RunPlan {
    /// Stream runner settings
    pub runner: RunnerConfig,
    /// Selected transform bridge
    pub bridge: BridgeKind,
    /// Per-workload timeout for the worker bridge
    pub bridge_timeout: Duration,
    /// External worker, when not using this binary
    pub worker_command: Option<WorkerCommand>,
    /// Corruption period of the faulty bridge
    pub fault_every: u64,
    /// Report format
    pub format: OutputFormat,
    /// Report destination; stdout when `None`
    pub report_path: Option<PathBuf>,
}

impl RunPlan {
    /// Merge file configuration with command-line overrides
    pub fn resolve(cli: &Cli, config: &VecBenchConfig) -> anyhow::Result<Self> {
        let duration_arg = |flag: &Option<String>, file: &str, what: &str| {
            let text = flag.as_deref().unwrap_or(file);
            VecBenchConfig::parse_duration(text).with_context(|| format!("invalid {}", what))
        };

        let generator = GeneratorConfig {
            max_vector_length: cli.max_len.unwrap_or(config.generator.max_vector_length),
            min_emit_interval: duration_arg(
                &cli.emit_interval,
                &config.generator.min_emit_interval,
                "emit interval",
            )?,
        };
        let sampling_rate = duration_arg(
            &cli.sampling_rate,
            &config.sampler.sampling_rate,
            "sampling rate",
        )?;
        let bridge_timeout = duration_arg(
            &cli.bridge_timeout,
            &config.bridge.timeout,
            "bridge timeout",
        )?;
        let duration_limit = cli
            .duration
            .as_deref()
            .map(VecBenchConfig::parse_duration)
            .transpose()
            .context("invalid run duration")?;

        let bridge = match &cli.bridge {
            Some(kind) => kind.parse::<BridgeKind>().map_err(anyhow::Error::msg)?,
            None => config.bridge.kind,
        };
        let worker_command = match cli.worker_cmd.as_deref().or(config.bridge.command.as_deref())
        {
            Some(line) => Some(
                WorkerCommand::parse(line)
                    .ok_or_else(|| anyhow::anyhow!("worker command is empty"))?,
            ),
            None => None,
        };
        let format = cli
            .format
            .as_deref()
            .unwrap_or(&config.output.format)
            .parse::<OutputFormat>()
            .map_err(anyhow::Error::msg)?;

        Ok(Self {
            runner: RunnerConfig {
                pipeline: PipelineConfig {
                    generator,
                    sampling_rate,
                    artifact_dir: cli
                        .output_dir
                        .clone()
                        .unwrap_or_else(|| PathBuf::from(&config.output.directory)),
                    seed: cli.seed.or(config.generator.seed),
                },
                queue_capacity: cli.queue_capacity.unwrap_or(config.bridge.queue_capacity),
                item_limit: cli.items,
                duration_limit,
                show_progress: !cli.quiet,
            },
            bridge,
            bridge_timeout,
            worker_command,
            fault_every: cli.fault_every.unwrap_or(config.bridge.fault_every),
            format,
            report_path: cli.report.clone(),
        })
    }

    fn report_config(&self) -> ReportConfig {
        let pipeline = &self.runner.pipeline;
        ReportConfig {
            bridge: self.bridge.to_string(),
            max_vector_length: pipeline.generator.max_vector_length,
            min_emit_interval_ns: pipeline.generator.min_emit_interval.as_nanos() as u64,
            sampling_rate_ns: pipeline.sampling_rate.as_nanos() as u64,
            queue_capacity: self.runner.queue_capacity,
            item_limit: self.runner.item_limit,
            duration_limit_ns: self.runner.duration_limit.map(|d| d.as_nanos() as u64),
        }
    }
}

/// Run the VecBench CLI with the process arguments.
pub fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();
    run_with_cli(cli)
}

/// Run the VecBench CLI with pre-parsed arguments.
pub fn run_with_cli(cli: Cli) -> anyhow::Result<()> {
    // Worker mode first: stdout/stderr belong to the supervisor's terminal
    if let Some(transform) = cli.transform_worker.as_deref() {
        let fault_every = cli
            .fault_every
            .unwrap_or_else(|| BridgeSection::default().fault_every);
        return run_worker_mode(transform, fault_every);
    }

    if cli.print_default_config {
        print!("{}", VecBenchConfig::default_toml());
        return Ok(());
    }

    let default_filter = if cli.verbose {
        "vecbench=debug"
    } else if cli.quiet {
        "vecbench=warn"
    } else {
        "vecbench=info"
    };
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .with_writer(std::io::stderr)
        .try_init();

    let config = match &cli.config {
        Some(path) => VecBenchConfig::load(path)
            .with_context(|| format!("failed to load {}", path.display()))?,
        None => VecBenchConfig::discover().unwrap_or_default(),
    };
    let plan = RunPlan::resolve(&cli, &config)?;

    install_shutdown_handler();
    let report = execute(&plan)?;

    let output = plan.format.render(&report)?;
    if let Some(ref path) = plan.report_path {
        let mut file = std::fs::File::create(path)
            .with_context(|| format!("failed to create {}", path.display()))?;
        file.write_all(output.as_bytes())?;
        println!("Report written to: {}", path.display());
    } else {
        print!("{}", output);
    }

    if report.has_failures() {
        eprintln!(
            "\n{} of {} transform output(s) failed verification",
            report.verification.failures(),
            report.verification.processed
        );
        std::process::exit(1);
    }

    Ok(())
}

/// Build the bridge selected by `plan`
pub fn build_bridge(plan: &RunPlan) -> anyhow::Result<Box<dyn TransformBridge>> {
    Ok(match plan.bridge {
        BridgeKind::InProcess => Box::new(InProcessTransform),
        BridgeKind::Faulty => Box::new(FaultyTransform::new(plan.fault_every)),
        BridgeKind::Worker => {
            let command = match &plan.worker_command {
                Some(command) => command.clone(),
                None => WorkerCommand::current_exe("vecsum")?,
            };
            let bridge = WorkerBridge::connect(command.clone(), plan.bridge_timeout)
                .with_context(|| {
                    format!(
                        "failed to start transform worker {}",
                        command.program().display()
                    )
                })?;
            Box::new(bridge)
        }
    })
}

/// Run the stream described by `plan` and assemble its report
pub fn execute(plan: &RunPlan) -> anyhow::Result<RunReport> {
    let meta = ReportMeta::now(plan.report_config());
    let bridge = build_bridge(plan)?;
    let outcome = run_stream(plan.runner.clone(), bridge)?;
    Ok(build_report(meta, outcome))
}

/// Convert a finished run into a report
pub fn build_report(meta: ReportMeta, outcome: RunOutcome) -> RunReport {
    let stats = outcome.summary.verification;
    let verification = VerificationCounts {
        processed: stats.processed,
        correct: stats.correct,
        value_mismatches: stats.value_mismatches,
        shape_mismatches: stats.shape_mismatches,
        bridge_failures: stats.bridge_failures,
    };
    let artifacts = outcome
        .summary
        .outcomes
        .iter()
        .map(|o| ArtifactEntry {
            metric: o.snapshot.name.clone(),
            path: o.result.as_ref().ok().map(|p| p.display().to_string()),
            error: o.result.as_ref().err().map(|e| e.to_string()),
        })
        .collect();

    RunReport {
        meta,
        verification,
        sampler: SamplerCounts {
            accepted: outcome.summary.sampled,
            dropped: outcome.summary.dropped,
        },
        metrics: outcome.snapshots,
        latency_percentiles: outcome.latency_percentiles,
        artifacts,
        summary: RunSummary::new(
            outcome.stop_reason,
            &verification,
            outcome.elapsed.as_secs_f64() * 1000.0,
        ),
    }
}

/// Serve a transform over the inherited IPC channel
fn run_worker_mode(transform: &str, fault_every: u64) -> anyhow::Result<()> {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("vecbench=warn")),
        )
        .with_writer(std::io::stderr)
        .try_init();

    let bridge: Box<dyn TransformBridge> = match transform {
        "vecsum" => Box::new(InProcessTransform),
        "faulty" => Box::new(FaultyTransform::new(fault_every)),
        other => anyhow::bail!("Unknown worker transform: {}", other),
    };

    TransformWorker::from_env(bridge)
        .run()
        .map(|_| ())
        .map_err(|e| anyhow::anyhow!("Worker error: {}", e))
}
