//! Metric Series
//!
//! A named, append-only sequence of latency samples (insertion order is arrival
//! order) plus a `total` counter of processed items. The counter is independent
//! of how many samples the sampler let through.
//!
//! Snapshots are a full O(n) recomputation. They are taken rarely (at
//! shutdown), so nothing is maintained incrementally.

use crate::WINDOW_SIZE;
use crate::artifact::PersistError;
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Latency samples and processed-item count for one named metric
#[derive(Debug, Clone)]
pub struct Metric {
    name: String,
    samples: Vec<f64>,
    total: u64,
}

/// Point-in-time statistics of a [`Metric`]
///
/// Statistics are `None` while no sample has been recorded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSnapshot {
    /// Metric name
    pub name: String,
    /// Number of retained samples
    pub samples: usize,
    /// Number of processed items, sampled or not
    pub total: u64,
    /// Mean over all retained samples
    pub mean: Option<f64>,
    /// Mean over the last [`WINDOW_SIZE`] samples
    pub mean_last_window: Option<f64>,
    /// Smallest retained sample
    pub min: Option<f64>,
    /// Largest retained sample
    pub max: Option<f64>,
}

/// Artifact file name for a metric: `metric_<name>.json`.
///
/// Characters outside `[A-Za-z0-9_-]` are replaced so a name can never
/// address a path outside the artifact directory.
pub fn artifact_file_name(name: &str) -> String {
    let safe: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    format!("metric_{}.json", safe)
}

impl Metric {
    /// Create an empty metric
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            samples: Vec::new(),
            total: 0,
        }
    }

    /// Metric name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Append a latency sample (milliseconds)
    #[inline]
    pub fn record(&mut self, latency_millis: f64) {
        self.samples.push(latency_millis);
    }

    /// Count one processed item
    #[inline]
    pub fn increment_total(&mut self) {
        self.total += 1;
    }

    /// Number of processed items
    pub fn total(&self) -> u64 {
        self.total
    }

    /// Retained samples in arrival order
    pub fn samples(&self) -> &[f64] {
        &self.samples
    }

    /// Recompute statistics over all retained samples
    pub fn snapshot(&self) -> MetricSnapshot {
        let n = self.samples.len();
        let (mean, mean_last_window, min, max) = if n == 0 {
            (None, None, None, None)
        } else {
            let window = &self.samples[n - n.min(WINDOW_SIZE)..];
            let min = self.samples.iter().copied().fold(f64::INFINITY, f64::min);
            let max = self
                .samples
                .iter()
                .copied()
                .fold(f64::NEG_INFINITY, f64::max);
            (
                Some(mean_of(&self.samples)),
                Some(mean_of(window)),
                Some(min),
                Some(max),
            )
        };

        MetricSnapshot {
            name: self.name.clone(),
            samples: n,
            total: self.total,
            mean,
            mean_last_window,
            min,
            max,
        }
    }

    /// Write the current snapshot to `<dir>/metric_<name>.json`
    pub fn persist(&self, dir: &Path) -> Result<PathBuf, PersistError> {
        self.snapshot().write_to(dir)
    }
}

impl MetricSnapshot {
    /// Write this snapshot into `dir`, replacing any previous artifact.
    ///
    /// The document goes to a uniquely named temporary file in `dir` that is
    /// then renamed over the target. Readers never observe a half-written
    /// artifact, and concurrent writers never share a temporary file.
    pub fn write_to(&self, dir: &Path) -> Result<PathBuf, PersistError> {
        let path = dir.join(artifact_file_name(&self.name));
        let json = serde_json::to_string_pretty(self).map_err(PersistError::Encode)?;
        let mut tmp = tempfile::Builder::new()
            .prefix(".metric_")
            .suffix(".json.tmp")
            .tempfile_in(dir)
            .map_err(io_error(dir))?;
        tmp.write_all(format!("{json}\n").as_bytes())
            .map_err(io_error(tmp.path()))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tmp.as_file()
                .set_permissions(std::fs::Permissions::from_mode(0o644))
                .map_err(io_error(tmp.path()))?;
        }

        tmp.persist(&path).map_err(|e| PersistError::Io {
            path: path.clone(),
            source: e.error,
        })?;

        Ok(path)
    }
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> PersistError {
    let path = path.to_path_buf();
    move |source| PersistError::Io { path, source }
}

fn mean_of(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}
