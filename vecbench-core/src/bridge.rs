//! Transform Bridge
//!
//! The transform stage is opaque: it may be a library call, a subprocess or a
//! remote service. The pipeline depends only on [`TransformBridge`].
//!
//! Contract for a conforming transform:
//! - `values[i] == vector_a[i] + vector_b[i]` for every index
//! - `captured_at_nanos` echoed back unmodified
//!
//! A bridge error is a classified observation, never a pipeline fault.

use std::time::Duration;
use thiserror::Error;
use tracing::debug;
use vecbench_ipc::{FrameError, TransformOutput, Workload};

/// Failures of a bridge call
#[derive(Debug, Error)]
pub enum BridgeError {
    /// Worker process could not be started
    #[error("Failed to spawn transform worker: {0}")]
    SpawnFailed(#[source] std::io::Error),

    /// Framing or transport failure
    #[error("IPC error: {0}")]
    Ipc(#[from] FrameError),

    /// Worker died while a request was outstanding
    #[error("Transform worker crashed: {0}")]
    WorkerCrashed(String),

    /// No reply within the configured timeout
    #[error("Transform timed out after {0:?}")]
    Timeout(Duration),

    /// Worker sent an unexpected message
    #[error("Worker protocol error: expected {expected}, got {got}")]
    Protocol {
        /// What the bridge was waiting for
        expected: String,
        /// What arrived instead
        got: String,
    },

    /// The transform reported its own failure
    #[error("Transform failed: {0}")]
    Remote(String),
}

/// Capability to run the transform stage on one workload
pub trait TransformBridge: Send {
    /// Short name for logs and reports
    fn name(&self) -> &str;

    /// Transform one workload
    fn transform(&mut self, workload: &Workload) -> Result<TransformOutput, BridgeError>;

    /// Release resources held by the bridge
    fn shutdown(&mut self) -> Result<(), BridgeError> {
        Ok(())
    }
}

impl<B: TransformBridge + ?Sized> TransformBridge for Box<B> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn transform(&mut self, workload: &Workload) -> Result<TransformOutput, BridgeError> {
        (**self).transform(workload)
    }

    fn shutdown(&mut self) -> Result<(), BridgeError> {
        (**self).shutdown()
    }
}

/// Reference vector-sum transform running in the calling thread
#[derive(Debug, Clone, Copy, Default)]
pub struct InProcessTransform;

impl TransformBridge for InProcessTransform {
    fn name(&self) -> &str {
        "vecsum"
    }

    fn transform(&mut self, workload: &Workload) -> Result<TransformOutput, BridgeError> {
        Ok(workload.element_sum())
    }
}

/// Vector-sum transform that corrupts every `every`-th output.
///
/// Corrupted outputs have their last element off by one, or an extra element
/// when the workload has length 1, so both mismatch classes get exercised.
#[derive(Debug, Clone)]
pub struct FaultyTransform {
    every: u64,
    calls: u64,
}

impl FaultyTransform {
    /// Corrupt one output out of `every` (minimum 1)
    pub fn new(every: u64) -> Self {
        Self {
            every: every.max(1),
            calls: 0,
        }
    }
}

impl TransformBridge for FaultyTransform {
    fn name(&self) -> &str {
        "vecsum-faulty"
    }

    fn transform(&mut self, workload: &Workload) -> Result<TransformOutput, BridgeError> {
        self.calls += 1;
        let mut output = workload.element_sum();
        if self.calls % self.every == 0 {
            debug!(sequence = workload.sequence(), "corrupting transform output");
            if output.values.len() > 1 {
                if let Some(last) = output.values.last_mut() {
                    *last = last.wrapping_add(1);
                }
            } else {
                output.values.push(1);
            }
        }
        Ok(output)
    }
}
