//! Transform Worker Entry Point
//!
//! Serves the worker side of the transform bridge: reads workloads, runs a
//! [`TransformBridge`] implementation on them and replies with the output.
//!
//! On Unix the worker talks over fds 3/4 when `VECBENCH_IPC_FD` is set;
//! otherwise (and on non-Unix) it falls back to stdin/stdout.

use crate::bridge::TransformBridge;
use crate::signal::{install_worker_signal_handlers, shutdown_requested};
use std::io::{Read, Write};
use tracing::debug;
use vecbench_ipc::{
    BridgeReply, BridgeRequest, FrameError, FrameReader, FrameWriter, IPC_FD_ENV,
    WorkerCapabilities,
};

#[cfg(unix)]
use std::os::unix::io::FromRawFd;

/// IPC transport: either inherited fd pair or stdin/stdout fallback.
enum IpcTransport {
    #[cfg(unix)]
    Fds { read_fd: i32, write_fd: i32 },
    Stdio,
}

fn detect_transport() -> IpcTransport {
    #[cfg(unix)]
    if let Ok(val) = std::env::var(IPC_FD_ENV) {
        let parts: Vec<&str> = val.split(',').collect();
        if parts.len() == 2 {
            if let (Ok(r), Ok(w)) = (parts[0].parse::<i32>(), parts[1].parse::<i32>()) {
                return IpcTransport::Fds {
                    read_fd: r,
                    write_fd: w,
                };
            }
        }
        tracing::warn!(
            value = %val,
            "invalid {IPC_FD_ENV} (expected <read_fd>,<write_fd>), falling back to stdio"
        );
    }
    IpcTransport::Stdio
}

/// Worker loop serving one transform
pub struct TransformWorker<R: Read, W: Write, T: TransformBridge> {
    reader: FrameReader<R>,
    writer: FrameWriter<W>,
    transform: T,
}

impl<T: TransformBridge> TransformWorker<Box<dyn Read>, Box<dyn Write>, T> {
    /// Create a worker on the transport advertised by the environment
    pub fn from_env(transform: T) -> Self {
        match detect_transport() {
            #[cfg(unix)]
            IpcTransport::Fds { read_fd, write_fd } => {
                // SAFETY: the supervisor dup'ed these descriptors into this
                // process for exclusive use by the worker.
                let read_file = unsafe { std::fs::File::from_raw_fd(read_fd) };
                let write_file = unsafe { std::fs::File::from_raw_fd(write_fd) };
                Self::new(
                    Box::new(read_file) as Box<dyn Read>,
                    Box::new(write_file) as Box<dyn Write>,
                    transform,
                )
            }
            IpcTransport::Stdio => Self::new(
                Box::new(std::io::stdin()) as Box<dyn Read>,
                Box::new(std::io::stdout()) as Box<dyn Write>,
                transform,
            ),
        }
    }
}

impl<R: Read, W: Write, T: TransformBridge> TransformWorker<R, W, T> {
    /// Create a worker over explicit streams
    pub fn new(reader: R, writer: W, transform: T) -> Self {
        Self {
            reader: FrameReader::new(reader),
            writer: FrameWriter::new(writer),
            transform,
        }
    }

    /// Serve requests until shutdown, end of stream or SIGTERM.
    ///
    /// Returns the number of workloads served.
    pub fn run(&mut self) -> Result<u64, FrameError> {
        install_worker_signal_handlers();

        self.writer.send(&BridgeReply::Hello(WorkerCapabilities::current(
            self.transform.name(),
        )))?;

        let mut served = 0u64;
        loop {
            if shutdown_requested() {
                break;
            }

            let request: BridgeRequest = match self.reader.recv() {
                Ok(request) => request,
                // Supervisor went away; nothing left to serve
                Err(FrameError::EndOfStream) => break,
                Err(e) => return Err(e),
            };

            match request {
                BridgeRequest::Transform(workload) => {
                    let result = match workload.validate() {
                        Ok(()) => self
                            .transform
                            .transform(&workload)
                            .map_err(|e| e.to_string()),
                        Err(e) => Err(e.to_string()),
                    };
                    let reply = match result {
                        Ok(output) => BridgeReply::Output(output),
                        Err(message) => BridgeReply::Failure { message },
                    };
                    self.writer.send(&reply)?;
                    served += 1;
                }
                BridgeRequest::Ping => self.writer.send(&BridgeReply::Pong)?,
                BridgeRequest::Shutdown => break,
            }
        }

        debug!(served, "transform worker exiting");
        let _ = self.transform.shutdown();
        Ok(served)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::{BridgeError, FaultyTransform, InProcessTransform};
    use std::io::Cursor;
    use vecbench_ipc::{TransformOutput, Workload};

    fn encode(requests: &[BridgeRequest]) -> Vec<u8> {
        let mut buffer = Vec::new();
        {
            let mut writer = FrameWriter::new(&mut buffer);
            for request in requests {
                writer.send(request).unwrap();
            }
        }
        buffer
    }

    fn decode(buffer: Vec<u8>) -> Vec<BridgeReply> {
        let mut reader = FrameReader::new(Cursor::new(buffer));
        let mut replies = Vec::new();
        while let Ok(reply) = reader.recv::<BridgeReply>() {
            replies.push(reply);
        }
        replies
    }

    fn workload(ts: i64) -> Workload {
        Workload::new(vec![4, 2, 9], vec![0, -1, -8], ts).unwrap()
    }

    #[test]
    fn test_worker_serves_until_shutdown() {
        let input = encode(&[
            BridgeRequest::Transform(workload(11)),
            BridgeRequest::Ping,
            BridgeRequest::Transform(workload(12)),
            BridgeRequest::Shutdown,
            BridgeRequest::Transform(workload(13)),
        ]);
        let mut output = Vec::new();

        let served = TransformWorker::new(Cursor::new(input), &mut output, InProcessTransform)
            .run()
            .unwrap();
        assert_eq!(served, 2);

        let replies = decode(output);
        assert_eq!(replies.len(), 4);
        assert!(matches!(&replies[0], BridgeReply::Hello(caps) if caps.transform == "vecsum"));
        assert_eq!(
            replies[1],
            BridgeReply::Output(TransformOutput::new(vec![4, 1, 1], 11))
        );
        assert_eq!(replies[2], BridgeReply::Pong);
        assert_eq!(
            replies[3],
            BridgeReply::Output(TransformOutput::new(vec![4, 1, 1], 12))
        );
    }

    #[test]
    fn test_worker_stops_at_end_of_stream() {
        let input = encode(&[BridgeRequest::Transform(workload(1))]);
        let mut output = Vec::new();
        let served = TransformWorker::new(Cursor::new(input), &mut output, InProcessTransform)
            .run()
            .unwrap();
        assert_eq!(served, 1);
    }

    struct Broken;

    impl TransformBridge for Broken {
        fn name(&self) -> &str {
            "broken"
        }

        fn transform(&mut self, _: &Workload) -> Result<TransformOutput, BridgeError> {
            Err(BridgeError::Remote("device unavailable".to_string()))
        }
    }

    #[test]
    fn test_transform_failure_is_reported() {
        let input = encode(&[BridgeRequest::Transform(workload(1))]);
        let mut output = Vec::new();
        TransformWorker::new(Cursor::new(input), &mut output, Broken)
            .run()
            .unwrap();

        let replies = decode(output);
        assert!(matches!(
            &replies[1],
            BridgeReply::Failure { message } if message.contains("device unavailable")
        ));
    }

    #[test]
    fn test_malformed_workload_is_refused() {
        let input = encode(&[
            BridgeRequest::Transform(Workload::unchecked(vec![], vec![], 3)),
            BridgeRequest::Transform(Workload::unchecked(vec![1, 2], vec![0], 4)),
            BridgeRequest::Transform(workload(5)),
        ]);
        let mut output = Vec::new();
        let mut worker =
            TransformWorker::new(Cursor::new(input), &mut output, FaultyTransform::new(1));
        let served = worker.run().unwrap();
        drop(worker);
        assert_eq!(served, 3);

        let replies = decode(output);
        assert!(matches!(
            &replies[1],
            BridgeReply::Failure { message } if message.contains("must not be empty")
        ));
        assert!(matches!(
            &replies[2],
            BridgeReply::Failure { message } if message.contains("differ in length")
        ));
        assert!(matches!(&replies[3], BridgeReply::Output(_)));
    }
}
