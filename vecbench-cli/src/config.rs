//! Configuration loading from vecbench.toml
//!
//! VecBench configuration can be specified in a `vecbench.toml` file in the
//! project root. The configuration is discovered by walking up from the
//! current directory; command-line flags override file values.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Configuration file name looked up during discovery
pub const CONFIG_FILE_NAME: &str = "vecbench.toml";

/// VecBench configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct VecBenchConfig {
    /// Workload generation
    #[serde(default)]
    pub generator: GeneratorSection,
    /// Latency sampling
    #[serde(default)]
    pub sampler: SamplerSection,
    /// Transform bridge
    #[serde(default)]
    pub bridge: BridgeSection,
    /// Artifacts and report output
    #[serde(default)]
    pub output: OutputSection,
}

/// Which transform the bridge stage runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum BridgeKind {
    /// Vector sum in a separate worker process (default)
    #[default]
    Worker,
    /// Vector sum on the bridge thread
    InProcess,
    /// In-process vector sum that corrupts some outputs
    Faulty,
}

impl std::str::FromStr for BridgeKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "worker" | "process" => Ok(BridgeKind::Worker),
            "in-process" | "inprocess" => Ok(BridgeKind::InProcess),
            "faulty" => Ok(BridgeKind::Faulty),
            other => Err(format!("Unknown bridge kind: {}", other)),
        }
    }
}

impl std::fmt::Display for BridgeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            BridgeKind::Worker => "worker",
            BridgeKind::InProcess => "in-process",
            BridgeKind::Faulty => "faulty",
        })
    }
}

/// Workload generation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratorSection {
    /// Upper bound on workload length
    #[serde(default = "default_max_vector_length")]
    pub max_vector_length: usize,
    /// Delay before each emission (e.g., "1ms"; "0s" disables)
    #[serde(default = "default_min_emit_interval")]
    pub min_emit_interval: String,
    /// Fixed RNG seed for reproducible workloads
    #[serde(default)]
    pub seed: Option<u64>,
}

impl Default for GeneratorSection {
    fn default() -> Self {
        Self {
            max_vector_length: default_max_vector_length(),
            min_emit_interval: default_min_emit_interval(),
            seed: None,
        }
    }
}

fn default_max_vector_length() -> usize {
    vecbench_core::DEFAULT_MAX_VECTOR_LENGTH
}
fn default_min_emit_interval() -> String {
    "1ms".to_string()
}

/// Latency sampling configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SamplerSection {
    /// Minimum time between recorded latencies; "0s" records all
    #[serde(default = "default_sampling_rate")]
    pub sampling_rate: String,
}

impl Default for SamplerSection {
    fn default() -> Self {
        Self {
            sampling_rate: default_sampling_rate(),
        }
    }
}

fn default_sampling_rate() -> String {
    "0s".to_string()
}

/// Transform bridge configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeSection {
    /// "worker", "in-process" or "faulty"
    #[serde(default)]
    pub kind: BridgeKind,
    /// Per-workload timeout for the worker bridge (e.g., "5s")
    #[serde(default = "default_bridge_timeout")]
    pub timeout: String,
    /// External worker command line (defaults to this binary)
    #[serde(default)]
    pub command: Option<String>,
    /// Capacity of each inter-stage queue
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// Faulty bridge corrupts one output in this many
    #[serde(default = "default_fault_every")]
    pub fault_every: u64,
}

impl Default for BridgeSection {
    fn default() -> Self {
        Self {
            kind: BridgeKind::default(),
            timeout: default_bridge_timeout(),
            command: None,
            queue_capacity: default_queue_capacity(),
            fault_every: default_fault_every(),
        }
    }
}

fn default_bridge_timeout() -> String {
    "5s".to_string()
}
fn default_queue_capacity() -> usize {
    64
}
fn default_fault_every() -> u64 {
    100
}

/// Output configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputSection {
    /// Metric artifact directory
    #[serde(default = "default_output_dir")]
    pub directory: String,
    /// Report format: "human" or "json"
    #[serde(default = "default_format")]
    pub format: String,
}

impl Default for OutputSection {
    fn default() -> Self {
        Self {
            directory: default_output_dir(),
            format: default_format(),
        }
    }
}

fn default_output_dir() -> String {
    "target/vecbench".to_string()
}
fn default_format() -> String {
    "human".to_string()
}

impl VecBenchConfig {
    /// Read and parse one `vecbench.toml`
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Discovery starting at the working directory
    pub fn discover() -> Option<Self> {
        let dir = std::env::current_dir().ok()?;
        Self::discover_from(&dir)
    }

    /// Walk up from `start` looking for `vecbench.toml`
    pub fn discover_from(start: &Path) -> Option<Self> {
        let mut dir = start.to_path_buf();
        loop {
            let config_path = dir.join(CONFIG_FILE_NAME);
            if config_path.exists() {
                return match Self::load(&config_path) {
                    Ok(config) => Some(config),
                    Err(e) => {
                        tracing::warn!(
                            path = %config_path.display(),
                            error = %e,
                            "ignoring unreadable configuration"
                        );
                        None
                    }
                };
            }
            if !dir.pop() {
                break;
            }
        }
        None
    }

    /// Commented default file, printed by `--print-default-config`
    pub fn default_toml() -> String {
        r#"# VecBench Configuration

[generator]
# Workload length is drawn uniformly from [1, max_vector_length]
max_vector_length = 8192
# Delay before each emitted workload ("0s" disables pacing)
min_emit_interval = "1ms"
# Fixed RNG seed (uncomment for reproducible workloads)
# seed = 42

[sampler]
# Minimum time between recorded latencies ("0s" records every item)
sampling_rate = "0s"

[bridge]
# Transform stage: "worker", "in-process" or "faulty"
kind = "worker"
# Per-workload timeout for the worker bridge
timeout = "5s"
# External worker command (uncomment to use instead of this binary)
# command = "/usr/local/bin/vecsum-worker"
# Capacity of each inter-stage queue
queue_capacity = 64
# The faulty bridge corrupts one output in this many
fault_every = 100

[output]
# Metric artifact directory
directory = "target/vecbench"
# Report format: human or json
format = "human"
"#
        .to_string()
    }

    /// Parse duration string (e.g., "1ms", "2s", "500us")
    pub fn parse_duration(s: &str) -> anyhow::Result<Duration> {
        let s = s.trim();
        if s.is_empty() {
            return Err(anyhow::anyhow!("duration is empty"));
        }

        // Split at the first unit character; a bare number means seconds
        let (num_part, unit_part) = s
            .char_indices()
            .find(|(_, c)| c.is_alphabetic() || *c == 'µ')
            .map(|(i, _)| s.split_at(i))
            .unwrap_or((s, "s"));

        let value: f64 = num_part
            .trim()
            .parse()
            .map_err(|_| anyhow::anyhow!("not a duration: {:?}", s))?;
        if !value.is_finite() || value < 0.0 {
            return Err(anyhow::anyhow!("duration must be non-negative: {:?}", s));
        }

        let multiplier: u64 = match unit_part.to_lowercase().as_str() {
            "ns" => 1,
            "us" | "µs" => 1_000,
            "ms" => 1_000_000,
            "s" | "" => 1_000_000_000,
            "m" | "min" => 60_000_000_000,
            _ => return Err(anyhow::anyhow!("unsupported duration unit {:?} in {:?}", unit_part, s)),
        };

        Ok(Duration::from_nanos((value * multiplier as f64) as u64))
    }
}
