#![warn(missing_docs)]
//! VecBench IPC Protocol
//!
//! Wire types and framing for the transform bridge.
//! Workloads and transform outputs cross the process boundary as rkyv archives
//! inside length-prefixed frames, so any executable speaking the protocol can
//! serve as the transform stage.

mod framing;
mod messages;

pub use framing::{FrameError, FrameReader, FrameWriter, MAX_FRAME_SIZE};
pub use messages::{
    BridgeReply, BridgeRequest, InvalidWorkload, TransformOutput, WorkerCapabilities, Workload,
};

/// Protocol version for compatibility checking
pub const PROTOCOL_VERSION: u32 = 1;

/// Environment variable carrying the `<read_fd>,<write_fd>` pair for a transform worker
pub const IPC_FD_ENV: &str = "VECBENCH_IPC_FD";
