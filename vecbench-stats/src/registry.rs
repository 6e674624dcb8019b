//! Metric Registry
//!
//! Named metrics belonging to one run. Components register (or look up) a
//! metric at startup and keep the returned handle; the registry flushes every
//! metric in one place at shutdown.
//!
//! Handles are mutex-guarded so that several pipeline instances sharing one
//! named metric serialize their `record` / `increment_total` calls. Pipelines
//! [`attach`](MetricRegistry::attach) on start and
//! [`release`](MetricRegistry::release) on shutdown; only the last release
//! persists.

use crate::artifact::PersistError;
use crate::metric::{Metric, MetricSnapshot};
use parking_lot::Mutex;
use rayon::prelude::*;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::{debug, error, info};

/// Shared, mutex-guarded access to a registered metric
pub type MetricHandle = Arc<Mutex<Metric>>;

/// Outcome of persisting one metric
#[derive(Debug)]
pub struct PersistOutcome {
    /// Snapshot that was (or failed to be) written; valid either way
    pub snapshot: MetricSnapshot,
    /// Artifact path, or the failure
    pub result: Result<PathBuf, PersistError>,
}

/// Collection of named metrics for one run
#[derive(Debug, Default)]
pub struct MetricRegistry {
    metrics: Mutex<BTreeMap<String, MetricHandle>>,
    attached: AtomicUsize,
    persisting: Mutex<()>,
}

impl MetricRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the metric with this name, creating it if needed
    pub fn register(&self, name: &str) -> MetricHandle {
        let mut metrics = self.metrics.lock();
        metrics
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(Metric::new(name))))
            .clone()
    }

    /// Look up a registered metric
    pub fn get(&self, name: &str) -> Option<MetricHandle> {
        self.metrics.lock().get(name).cloned()
    }

    /// Registered metric names, sorted
    pub fn names(&self) -> Vec<String> {
        self.metrics.lock().keys().cloned().collect()
    }

    /// Number of registered metrics
    pub fn len(&self) -> usize {
        self.metrics.lock().len()
    }

    /// Whether no metric is registered
    pub fn is_empty(&self) -> bool {
        self.metrics.lock().is_empty()
    }

    fn handles(&self) -> Vec<MetricHandle> {
        self.metrics.lock().values().cloned().collect()
    }

    /// Snapshot every registered metric (sorted by name)
    pub fn snapshots(&self) -> Vec<MetricSnapshot> {
        self.handles()
            .par_iter()
            .map(|handle| handle.lock().snapshot())
            .collect()
    }

    /// Record one more user of this registry
    pub fn attach(&self) {
        self.attached.fetch_add(1, Ordering::AcqRel);
    }

    /// Number of attached users that have not released yet
    pub fn attached(&self) -> usize {
        self.attached.load(Ordering::Acquire)
    }

    /// Drop one user; the last one out persists every metric into `dir`.
    ///
    /// Returns `None` while other users are still attached. Releasing a
    /// registry nobody attached to persists unconditionally.
    pub fn release(&self, dir: &Path) -> Option<Vec<PersistOutcome>> {
        match self
            .attached
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
        {
            Ok(1) | Err(_) => Some(self.persist_all(dir)),
            Ok(previous) => {
                debug!(remaining = previous - 1, "registry still in use; deferring persistence");
                None
            }
        }
    }

    /// Persist every registered metric into `dir`.
    ///
    /// Failures are logged and returned per metric; they never stop the
    /// remaining metrics from being written. Concurrent calls run one at a
    /// time, each writing snapshots taken under the lock.
    pub fn persist_all(&self, dir: &Path) -> Vec<PersistOutcome> {
        let _guard = self.persisting.lock();
        self.snapshots()
            .into_iter()
            .map(|snapshot| {
                let result = snapshot.write_to(dir);
                match &result {
                    Ok(path) => info!(
                        metric = %snapshot.name,
                        samples = snapshot.samples,
                        total = snapshot.total,
                        path = %path.display(),
                        "metric persisted"
                    ),
                    Err(e) => error!(metric = %snapshot.name, error = %e, "failed to persist metric"),
                }
                PersistOutcome { snapshot, result }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_returns_same_metric() {
        let registry = MetricRegistry::new();
        let a = registry.register("latency");
        let b = registry.register("latency");

        a.lock().record(1.0);
        b.lock().record(2.0);

        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(registry.len(), 1);
        assert_eq!(a.lock().samples(), &[1.0, 2.0]);
    }

    #[test]
    fn test_snapshots_sorted_by_name() {
        let registry = MetricRegistry::new();
        registry.register("zeta");
        registry.register("alpha");
        let names: Vec<_> = registry
            .snapshots()
            .into_iter()
            .map(|s| s.name)
            .collect();
        assert_eq!(names, vec!["alpha", "zeta"]);
    }

    #[test]
    fn test_concurrent_writers_are_serialized() {
        let registry = MetricRegistry::new();
        let threads: Vec<_> = (0..4)
            .map(|_| {
                let handle = registry.register("latency");
                std::thread::spawn(move || {
                    for i in 0..1000 {
                        let mut metric = handle.lock();
                        metric.record(i as f64);
                        metric.increment_total();
                    }
                })
            })
            .collect();
        for t in threads {
            t.join().unwrap();
        }

        let snapshot = registry.get("latency").unwrap().lock().snapshot();
        assert_eq!(snapshot.samples, 4000);
        assert_eq!(snapshot.total, 4000);
    }

    #[test]
    fn test_persist_all_writes_each_metric() {
        let dir = tempfile::tempdir().unwrap();
        let registry = MetricRegistry::new();
        registry.register("latency").lock().record(1.0);
        registry.register("queue_wait").lock().record(0.5);

        let outcomes = registry.persist_all(dir.path());
        assert_eq!(outcomes.len(), 2);
        assert!(outcomes.iter().all(|o| o.result.is_ok()));
        assert!(dir.path().join("metric_latency.json").exists());
        assert!(dir.path().join("metric_queue_wait.json").exists());
    }

    #[test]
    fn test_last_release_persists() {
        let dir = tempfile::tempdir().unwrap();
        let registry = MetricRegistry::new();
        registry.attach();
        registry.attach();
        registry.register("latency").lock().record(2.0);

        assert!(registry.release(dir.path()).is_none());
        assert!(!dir.path().join("metric_latency.json").exists());
        assert_eq!(registry.attached(), 1);

        let outcomes = registry.release(dir.path()).unwrap();
        assert_eq!(outcomes.len(), 1);
        assert!(outcomes[0].result.is_ok());
        assert_eq!(registry.attached(), 0);

        // Unattached release still flushes
        assert!(registry.release(dir.path()).is_some());
    }

    #[test]
    fn test_persist_failure_keeps_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("gone");
        let registry = MetricRegistry::new();
        registry.register("latency").lock().record(4.0);

        let outcomes = registry.persist_all(&missing);
        assert_eq!(outcomes.len(), 1);
        assert!(outcomes[0].result.is_err());
        assert_eq!(outcomes[0].snapshot.mean, Some(4.0));
    }
}
