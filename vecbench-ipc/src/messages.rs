//! IPC Message Types
//!
//! All messages are serialized with rkyv and validated on receipt.

use rkyv::{Archive, Deserialize as RkyvDeserialize, Serialize as RkyvSerialize};
use thiserror::Error;

/// A workload rejected at construction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum InvalidWorkload {
    /// Both vectors are empty
    #[error("workload vectors must not be empty")]
    Empty,
    /// Vectors have different lengths
    #[error("workload vectors differ in length: {a} vs {b}")]
    LengthMismatch {
        /// Length of the first vector
        a: usize,
        /// Length of the second vector
        b: usize,
    },
}

/// One generated unit of work.
///
/// Carries its own correctness oracle: for every index `i >= 1`,
/// `vector_a[i] + vector_b[i] == 1`. Index 0 carries the sequence counter.
/// Immutable after creation.
#[derive(Debug, Clone, PartialEq, Eq, Archive, RkyvSerialize, RkyvDeserialize)]
#[archive(check_bytes)]
pub struct Workload {
    vector_a: Vec<i64>,
    vector_b: Vec<i64>,
    captured_at_nanos: i64,
}

impl Workload {
    /// Create a workload, enforcing `len(a) == len(b) >= 1`
    pub fn new(
        vector_a: Vec<i64>,
        vector_b: Vec<i64>,
        captured_at_nanos: i64,
    ) -> Result<Self, InvalidWorkload> {
        check_shape(&vector_a, &vector_b)?;
        Ok(Self {
            vector_a,
            vector_b,
            captured_at_nanos,
        })
    }

    /// Re-check `len(a) == len(b) >= 1`
    ///
    /// A workload decoded from a frame never went through [`Workload::new`].
    pub fn validate(&self) -> Result<(), InvalidWorkload> {
        check_shape(&self.vector_a, &self.vector_b)
    }

    /// First input vector
    pub fn vector_a(&self) -> &[i64] {
        &self.vector_a
    }

    /// Second input vector
    pub fn vector_b(&self) -> &[i64] {
        &self.vector_b
    }

    /// Monotonic capture timestamp (nanoseconds)
    pub fn captured_at_nanos(&self) -> i64 {
        self.captured_at_nanos
    }

    /// Number of elements in each vector
    pub fn len(&self) -> usize {
        self.vector_a.len()
    }

    /// Always `false`; a workload holds at least one element
    pub fn is_empty(&self) -> bool {
        self.vector_a.is_empty()
    }

    /// Sequence number carried at index 0 (0 for an unvalidated empty workload)
    pub fn sequence(&self) -> i64 {
        match (self.vector_a.first(), self.vector_b.first()) {
            (Some(a), Some(b)) => a.wrapping_add(*b),
            _ => 0,
        }
    }

    /// The output a conforming transform produces: element-wise sum with the
    /// timestamp echoed back.
    pub fn element_sum(&self) -> TransformOutput {
        let values = self
            .vector_a
            .iter()
            .zip(&self.vector_b)
            .map(|(a, b)| a.wrapping_add(*b))
            .collect();
        TransformOutput::new(values, self.captured_at_nanos)
    }
}

#[cfg(any(test, feature = "test-util"))]
impl Workload {
    /// Build a workload without the shape check
    pub fn unchecked(vector_a: Vec<i64>, vector_b: Vec<i64>, captured_at_nanos: i64) -> Self {
        Self {
            vector_a,
            vector_b,
            captured_at_nanos,
        }
    }
}

fn check_shape(vector_a: &[i64], vector_b: &[i64]) -> Result<(), InvalidWorkload> {
    if vector_a.len() != vector_b.len() {
        return Err(InvalidWorkload::LengthMismatch {
            a: vector_a.len(),
            b: vector_b.len(),
        });
    }
    if vector_a.is_empty() {
        return Err(InvalidWorkload::Empty);
    }
    Ok(())
}

/// Result of a transform stage.
///
/// Arbitrary content is valid here: a malformed output is a data condition
/// that the verifier classifies, not a transport error.
#[derive(Debug, Clone, PartialEq, Eq, Archive, RkyvSerialize, RkyvDeserialize)]
#[archive(check_bytes)]
pub struct TransformOutput {
    /// Transformed values
    pub values: Vec<i64>,
    /// Capture timestamp echoed unmodified from the workload
    pub captured_at_nanos: i64,
}

impl TransformOutput {
    /// Create a transform output
    pub fn new(values: Vec<i64>, captured_at_nanos: i64) -> Self {
        Self {
            values,
            captured_at_nanos,
        }
    }
}

/// Worker capabilities advertised during handshake
#[derive(Debug, Clone, PartialEq, Eq, Archive, RkyvSerialize, RkyvDeserialize)]
#[archive(check_bytes)]
pub struct WorkerCapabilities {
    /// Protocol version for compatibility
    pub protocol_version: u32,
    /// Worker process id
    pub pid: u32,
    /// Name of the transform implementation
    pub transform: String,
    /// CPU model string (for reports)
    pub cpu_model: String,
}

impl WorkerCapabilities {
    /// Capabilities of the current process serving the named transform
    pub fn current(transform: &str) -> Self {
        Self {
            protocol_version: crate::PROTOCOL_VERSION,
            pid: std::process::id(),
            transform: transform.to_string(),
            cpu_model: cpu_model_string(),
        }
    }
}

/// Messages sent from the bridge to a transform worker
#[derive(Debug, Clone, PartialEq, Eq, Archive, RkyvSerialize, RkyvDeserialize)]
#[archive(check_bytes)]
pub enum BridgeRequest {
    /// Transform one workload
    Transform(Workload),
    /// Health check
    Ping,
    /// Request graceful shutdown
    Shutdown,
}

/// Messages sent from a transform worker to the bridge
#[derive(Debug, Clone, PartialEq, Eq, Archive, RkyvSerialize, RkyvDeserialize)]
#[archive(check_bytes)]
pub enum BridgeReply {
    /// Initial handshake
    Hello(WorkerCapabilities),
    /// Transform result for the last request
    Output(TransformOutput),
    /// Answer to [`BridgeRequest::Ping`]
    Pong,
    /// The worker could not transform the last request
    Failure {
        /// Human-readable error message
        message: String,
    },
}

fn cpu_model_string() -> String {
    #[cfg(target_os = "linux")]
    {
        std::fs::read_to_string("/proc/cpuinfo")
            .ok()
            .and_then(|content| {
                content
                    .lines()
                    .find(|line| line.starts_with("model name"))
                    .and_then(|line| line.split(':').nth(1))
                    .map(|s| s.trim().to_string())
            })
            .unwrap_or_else(|| "Unknown CPU".to_string())
    }

    #[cfg(not(target_os = "linux"))]
    {
        "Unknown CPU".to_string()
    }
}
