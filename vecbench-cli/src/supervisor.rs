//! Supervisor Side of the Worker Bridge
//!
//! Runs the transform stage in a child process and talks to it over a pipe
//! pair mapped onto fds 3/4. A crashed, hung or misbehaving worker turns into
//! a [`BridgeError`] for the current workload; the next call respawns it.

use std::env;
use std::fs::File;
use std::io::{self, Read, Write};
use std::os::unix::io::{AsRawFd, FromRawFd, RawFd};
use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};
use tracing::{debug, warn};
use vecbench_core::{BridgeError, TransformBridge};
use vecbench_ipc::{
    BridgeReply, BridgeRequest, FrameError, FrameReader, FrameWriter, IPC_FD_ENV,
    PROTOCOL_VERSION, TransformOutput, WorkerCapabilities, Workload,
};

/// Hidden flag that puts the `vecbench` binary into worker mode
pub const WORKER_FLAG: &str = "--transform-worker";

/// Grace period between SIGTERM and SIGKILL
const TERM_GRACE: Duration = Duration::from_millis(100);

/// Result of polling for data
#[derive(Debug)]
enum PollResult {
    DataAvailable,
    Timeout,
    PipeClosed,
    Error(std::io::Error),
}

/// Wait for data to be available on a file descriptor with timeout
fn wait_for_data(fd: i32, timeout_ms: i32) -> PollResult {
    let mut pollfd = libc::pollfd {
        fd,
        events: libc::POLLIN,
        revents: 0,
    };

    let result = unsafe { libc::poll(&mut pollfd, 1, timeout_ms) };

    if result < 0 {
        let err = std::io::Error::last_os_error();
        if err.kind() == std::io::ErrorKind::Interrupted {
            return PollResult::Timeout;
        }
        PollResult::Error(err)
    } else if result == 0 {
        PollResult::Timeout
    } else if pollfd.revents & libc::POLLIN != 0 {
        // Data first: a closing pipe may still hold a complete frame
        PollResult::DataAvailable
    } else if pollfd.revents & (libc::POLLERR | libc::POLLHUP | libc::POLLNVAL) != 0 {
        PollResult::PipeClosed
    } else {
        PollResult::Timeout
    }
}

/// Create a pipe pair, returning (read_fd, write_fd), both close-on-exec.
fn create_pipe() -> Result<(RawFd, RawFd), std::io::Error> {
    let mut fds = [0 as RawFd; 2];
    let ret = unsafe { libc::pipe(fds.as_mut_ptr()) };
    if ret != 0 {
        return Err(std::io::Error::last_os_error());
    }
    for &fd in &fds {
        unsafe {
            let flags = libc::fcntl(fd, libc::F_GETFD);
            libc::fcntl(fd, libc::F_SETFD, flags | libc::FD_CLOEXEC);
        }
    }
    Ok((fds[0], fds[1]))
}

fn set_nonblocking(fd: RawFd) -> Result<(), std::io::Error> {
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFL) };
    if flags < 0 || unsafe { libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) } < 0 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(())
}

fn close_fd(fd: RawFd) {
    unsafe {
        libc::close(fd);
    }
}

fn send_sigterm(pid: u32) -> Result<(), std::io::Error> {
    let ret = unsafe { libc::kill(pid as libc::pid_t, libc::SIGTERM) };
    if ret == -1 {
        Err(std::io::Error::last_os_error())
    } else {
        Ok(())
    }
}

/// Supervisor end of a worker pipe.
///
/// The descriptor is non-blocking; reads and writes wait in `poll(2)` and
/// fail with [`io::ErrorKind::TimedOut`] once `deadline` passes, so a
/// worker that stalls mid-frame cannot hold the bridge past its timeout.
struct PipeEnd {
    file: File,
    deadline: Option<Instant>,
}

impl PipeEnd {
    fn new(file: File) -> Self {
        Self {
            file,
            deadline: None,
        }
    }

    fn wait(&self, events: libc::c_short) -> io::Result<()> {
        loop {
            let timeout_ms = match self.deadline {
                None => -1,
                Some(deadline) => {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    if remaining.is_zero() {
                        return Err(io::Error::new(
                            io::ErrorKind::TimedOut,
                            "worker pipe deadline passed",
                        ));
                    }
                    remaining.as_millis().clamp(1, i32::MAX as u128) as i32
                }
            };
            let mut pollfd = libc::pollfd {
                fd: self.file.as_raw_fd(),
                events,
                revents: 0,
            };
            let ret = unsafe { libc::poll(&mut pollfd, 1, timeout_ms) };
            if ret > 0 {
                return Ok(());
            }
            if ret < 0 {
                let err = io::Error::last_os_error();
                if err.kind() != io::ErrorKind::Interrupted {
                    return Err(err);
                }
            }
        }
    }
}

impl Read for PipeEnd {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            match self.file.read(buf) {
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => self.wait(libc::POLLIN)?,
                other => return other,
            }
        }
    }
}

impl Write for PipeEnd {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        loop {
            match self.file.write(buf) {
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => self.wait(libc::POLLOUT)?,
                other => return other,
            }
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

/// How to start a worker process
#[derive(Debug, Clone)]
pub struct WorkerCommand {
    program: PathBuf,
    args: Vec<String>,
}

impl WorkerCommand {
    /// This executable in worker mode serving `transform`
    pub fn current_exe(transform: &str) -> Result<Self, BridgeError> {
        let program = env::current_exe().map_err(BridgeError::SpawnFailed)?;
        Ok(Self {
            program,
            args: vec![WORKER_FLAG.to_string(), transform.to_string()],
        })
    }

    /// An external executable speaking the bridge protocol on fds 3/4
    pub fn external(program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// Parse a whitespace-separated command line (`program arg1 arg2`)
    pub fn parse(command_line: &str) -> Option<Self> {
        let mut parts = command_line.split_whitespace().map(str::to_string);
        let program = parts.next()?;
        Some(Self::external(program, parts.collect()))
    }

    /// Program path
    pub fn program(&self) -> &Path {
        &self.program
    }
}

/// One live worker process
struct WorkerHandle {
    child: Child,
    reader: FrameReader<PipeEnd>,
    writer: FrameWriter<PipeEnd>,
    capabilities: Option<WorkerCapabilities>,
    msg_read_fd: RawFd,
}

impl WorkerHandle {
    fn spawn(command: &WorkerCommand, timeout: Duration) -> Result<Self, BridgeError> {
        // req_pipe: supervisor writes requests → worker reads from fd 3
        let (req_read, req_write) = create_pipe().map_err(BridgeError::SpawnFailed)?;
        // reply_pipe: worker writes replies to fd 4 → supervisor reads
        let (reply_read, reply_write) = match create_pipe() {
            Ok(fds) => fds,
            Err(e) => {
                close_fd(req_read);
                close_fd(req_write);
                return Err(BridgeError::SpawnFailed(e));
            }
        };

        let mut cmd = Command::new(&command.program);
        cmd.args(&command.args)
            .env(IPC_FD_ENV, "3,4")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::inherit());

        // In the child: req_read→3, reply_write→4. Both ends are first moved
        // above fd 10 so one dup2 cannot clobber the other's source.
        unsafe {
            cmd.pre_exec(move || {
                let src_read = libc::fcntl(req_read, libc::F_DUPFD_CLOEXEC, 10);
                let src_write = libc::fcntl(reply_write, libc::F_DUPFD_CLOEXEC, 10);
                if src_read < 0 || src_write < 0 {
                    return Err(std::io::Error::last_os_error());
                }

                // dup2 leaves close-on-exec cleared on the target
                if libc::dup2(src_read, 3) < 0 || libc::dup2(src_write, 4) < 0 {
                    return Err(std::io::Error::last_os_error());
                }

                Ok(())
            });
        }

        let child = match cmd.spawn() {
            Ok(c) => c,
            Err(e) => {
                close_fd(req_read);
                close_fd(req_write);
                close_fd(reply_read);
                close_fd(reply_write);
                return Err(BridgeError::SpawnFailed(e));
            }
        };

        close_fd(req_read);
        close_fd(reply_write);

        let writer_file = unsafe { File::from_raw_fd(req_write) };
        let reader_file = unsafe { File::from_raw_fd(reply_read) };

        let mut handle = Self {
            child,
            reader: FrameReader::new(PipeEnd::new(reader_file)),
            writer: FrameWriter::new(PipeEnd::new(writer_file)),
            capabilities: None,
            msg_read_fd: reply_read,
        };

        // Only the supervisor ends; the worker keeps blocking descriptors
        set_nonblocking(req_write).map_err(BridgeError::SpawnFailed)?;
        set_nonblocking(reply_read).map_err(BridgeError::SpawnFailed)?;

        match handle.read_reply(Instant::now() + timeout, timeout)? {
            BridgeReply::Hello(caps) => {
                if caps.protocol_version != PROTOCOL_VERSION {
                    return Err(BridgeError::Protocol {
                        expected: format!("protocol version {}", PROTOCOL_VERSION),
                        got: format!("protocol version {}", caps.protocol_version),
                    });
                }
                debug!(
                    pid = caps.pid,
                    transform = %caps.transform,
                    cpu = %caps.cpu_model,
                    "transform worker ready"
                );
                handle.capabilities = Some(caps);
                Ok(handle)
            }
            other => Err(BridgeError::Protocol {
                expected: "Hello".to_string(),
                got: reply_kind(&other).to_string(),
            }),
        }
    }

    /// Wait until `deadline` for the next complete reply.
    ///
    /// On timeout the worker is terminated; the handle must not be reused.
    fn read_reply(
        &mut self,
        deadline: Instant,
        timeout: Duration,
    ) -> Result<BridgeReply, BridgeError> {
        // Buffered bytes start a frame; otherwise wait for the first byte
        while !self.reader.has_buffered_data() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                self.terminate();
                return Err(BridgeError::Timeout(timeout));
            }
            let poll_timeout = remaining.min(Duration::from_millis(100));
            match wait_for_data(self.msg_read_fd, poll_timeout.as_millis().max(1) as i32) {
                PollResult::DataAvailable => break,
                PollResult::Timeout => {
                    if !self.is_alive() {
                        return Err(BridgeError::WorkerCrashed(
                            "worker exited unexpectedly".to_string(),
                        ));
                    }
                }
                PollResult::PipeClosed => {
                    return Err(BridgeError::WorkerCrashed(
                        "worker pipe closed unexpectedly".to_string(),
                    ));
                }
                PollResult::Error(e) => {
                    return Err(BridgeError::WorkerCrashed(format!("pipe error: {}", e)));
                }
            }
        }

        // The rest of the frame is bound by the same deadline
        self.reader.get_mut().deadline = Some(deadline);
        match self.reader.recv::<BridgeReply>() {
            Ok(reply) => Ok(reply),
            Err(FrameError::EndOfStream) => Err(BridgeError::WorkerCrashed(
                "worker closed connection".to_string(),
            )),
            Err(FrameError::Io(e)) if e.kind() == io::ErrorKind::TimedOut => {
                warn!(?timeout, "worker stalled inside a reply frame");
                self.terminate();
                Err(BridgeError::Timeout(timeout))
            }
            Err(FrameError::Io(e)) if e.kind() == io::ErrorKind::UnexpectedEof => Err(
                BridgeError::WorkerCrashed("worker exited in the middle of a reply".to_string()),
            ),
            Err(e) => Err(BridgeError::Ipc(e)),
        }
    }

    /// Send one request; a worker that stops draining its pipe times out
    fn send(
        &mut self,
        request: &BridgeRequest,
        deadline: Instant,
        timeout: Duration,
    ) -> Result<(), BridgeError> {
        self.writer.get_mut().deadline = Some(deadline);
        match self.writer.send(request) {
            Ok(()) => Ok(()),
            Err(FrameError::Io(e)) if e.kind() == io::ErrorKind::TimedOut => {
                self.terminate();
                Err(BridgeError::Timeout(timeout))
            }
            Err(e) => Err(BridgeError::Ipc(e)),
        }
    }

    fn transform(
        &mut self,
        workload: &Workload,
        timeout: Duration,
    ) -> Result<TransformOutput, BridgeError> {
        let deadline = Instant::now() + timeout;
        self.send(&BridgeRequest::Transform(workload.clone()), deadline, timeout)?;

        loop {
            match self.read_reply(deadline, timeout)? {
                BridgeReply::Output(output) => return Ok(output),
                BridgeReply::Failure { message } => return Err(BridgeError::Remote(message)),
                // Stale reply to an earlier ping
                BridgeReply::Pong => continue,
                other @ BridgeReply::Hello(_) => {
                    return Err(BridgeError::Protocol {
                        expected: "Output/Failure".to_string(),
                        got: reply_kind(&other).to_string(),
                    });
                }
            }
        }
    }

    fn ping(&mut self, timeout: Duration) -> Result<(), BridgeError> {
        let deadline = Instant::now() + timeout;
        self.send(&BridgeRequest::Ping, deadline, timeout)?;
        match self.read_reply(deadline, timeout)? {
            BridgeReply::Pong => Ok(()),
            other => Err(BridgeError::Protocol {
                expected: "Pong".to_string(),
                got: reply_kind(&other).to_string(),
            }),
        }
    }

    fn shutdown(&mut self) -> Result<(), BridgeError> {
        let grace = TERM_GRACE * 10;
        let deadline = Instant::now() + grace;
        let sent = self.send(&BridgeRequest::Shutdown, deadline, grace);
        while self.is_alive() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        if self.is_alive() {
            self.terminate();
        } else {
            let _ = self.child.wait();
        }
        sent
    }

    fn is_alive(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }

    /// SIGTERM, brief grace, then SIGKILL
    fn terminate(&mut self) {
        if !self.is_alive() {
            let _ = self.child.wait();
            return;
        }
        let _ = send_sigterm(self.child.id());
        let deadline = Instant::now() + TERM_GRACE;
        while self.is_alive() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        if self.is_alive() {
            let _ = self.child.kill();
        }
        let _ = self.child.wait();
    }
}

impl Drop for WorkerHandle {
    fn drop(&mut self) {
        self.terminate();
    }
}

fn reply_kind(reply: &BridgeReply) -> &'static str {
    match reply {
        BridgeReply::Hello(_) => "Hello",
        BridgeReply::Output(_) => "Output",
        BridgeReply::Pong => "Pong",
        BridgeReply::Failure { .. } => "Failure",
    }
}

/// [`TransformBridge`] backed by a worker process.
///
/// The worker is spawned lazily and replaced after any failure that leaves
/// the channel in an unknown state (crash, timeout, framing error).
pub struct WorkerBridge {
    command: WorkerCommand,
    timeout: Duration,
    handle: Option<WorkerHandle>,
    name: String,
    spawns: u64,
}

impl WorkerBridge {
    /// Bridge to a worker started from `command`; nothing is spawned yet
    pub fn new(command: WorkerCommand, timeout: Duration) -> Self {
        Self {
            command,
            timeout,
            handle: None,
            name: "worker".to_string(),
            spawns: 0,
        }
    }

    /// Bridge with the worker already running and handshaken
    pub fn connect(command: WorkerCommand, timeout: Duration) -> Result<Self, BridgeError> {
        let mut bridge = Self::new(command, timeout);
        bridge.ensure_worker()?;
        Ok(bridge)
    }

    /// Capabilities reported by the running worker
    pub fn capabilities(&self) -> Option<&WorkerCapabilities> {
        self.handle.as_ref().and_then(|h| h.capabilities.as_ref())
    }

    /// Number of worker processes started so far
    pub fn spawns(&self) -> u64 {
        self.spawns
    }

    /// Round-trip a ping through the worker
    pub fn ping(&mut self) -> Result<(), BridgeError> {
        let timeout = self.timeout;
        let result = self.ensure_worker()?.ping(timeout);
        if result.is_err() {
            self.handle = None;
        }
        result
    }

    fn ensure_worker(&mut self) -> Result<&mut WorkerHandle, BridgeError> {
        if self.handle.as_mut().is_some_and(|h| !h.is_alive()) {
            warn!("transform worker died; respawning");
            self.handle = None;
        }
        if self.handle.is_none() {
            let handle = WorkerHandle::spawn(&self.command, self.timeout)?;
            self.spawns += 1;
            let transform = handle
                .capabilities
                .as_ref()
                .map_or("unknown", |caps| caps.transform.as_str());
            self.name = format!("worker:{}", transform);
            self.handle = Some(handle);
        }
        self.handle
            .as_mut()
            .ok_or_else(|| BridgeError::WorkerCrashed("worker unavailable".to_string()))
    }
}

impl TransformBridge for WorkerBridge {
    fn name(&self) -> &str {
        &self.name
    }

    fn transform(&mut self, workload: &Workload) -> Result<TransformOutput, BridgeError> {
        let timeout = self.timeout;
        let result = self.ensure_worker()?.transform(workload, timeout);
        match &result {
            // The worker answered; the channel is still in sync
            Ok(_) | Err(BridgeError::Remote(_)) => {}
            Err(e) => {
                warn!(error = %e, "discarding transform worker");
                self.handle = None;
            }
        }
        result
    }

    fn shutdown(&mut self) -> Result<(), BridgeError> {
        match self.handle.take() {
            Some(mut handle) => handle.shutdown(),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_worker_command() {
        let cmd = WorkerCommand::parse("/usr/bin/vecsum-worker --fast  -v").unwrap();
        assert_eq!(cmd.program(), Path::new("/usr/bin/vecsum-worker"));
        assert_eq!(cmd.args, vec!["--fast".to_string(), "-v".to_string()]);
        assert!(WorkerCommand::parse("   ").is_none());
    }

    #[test]
    fn test_missing_binary_is_spawn_failure() {
        let mut bridge = WorkerBridge::new(
            WorkerCommand::external("/nonexistent/vecbench-worker", Vec::new()),
            Duration::from_secs(1),
        );
        let workload = Workload::new(vec![1, 2], vec![0, -1], 0).unwrap();
        assert!(matches!(
            bridge.transform(&workload),
            Err(BridgeError::SpawnFailed(_))
        ));
        assert_eq!(bridge.spawns(), 0);
    }

    #[test]
    fn test_silent_worker_is_protocol_failure() {
        // `true` exits immediately without a Hello
        let mut bridge = WorkerBridge::new(
            WorkerCommand::external("true", Vec::new()),
            Duration::from_secs(2),
        );
        let workload = Workload::new(vec![1], vec![0], 0).unwrap();
        assert!(matches!(
            bridge.transform(&workload),
            Err(BridgeError::WorkerCrashed(_))
        ));
    }

    #[test]
    fn test_hung_worker_times_out() {
        // `sleep` never writes to fd 4
        let mut bridge = WorkerBridge::new(
            WorkerCommand::external("sleep", vec!["30".to_string()]),
            Duration::from_millis(200),
        );
        let workload = Workload::new(vec![1], vec![0], 0).unwrap();
        let start = Instant::now();
        assert!(matches!(
            bridge.transform(&workload),
            Err(BridgeError::Timeout(_))
        ));
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_partial_reply_frame_times_out() {
        // Announces a 16-byte frame, delivers two bytes, then stalls
        let command = WorkerCommand::external(
            "sh",
            vec![
                "-c".to_string(),
                "printf '\\020\\000\\000\\000ab' >&4; exec sleep 30".to_string(),
            ],
        );
        let start = Instant::now();
        let result = WorkerBridge::connect(command, Duration::from_millis(200));
        assert!(matches!(result, Err(BridgeError::Timeout(_))));
        assert!(start.elapsed() < Duration::from_secs(2));
    }

    #[test]
    fn test_pipe_end_honours_deadline() {
        let (read_fd, write_fd) = create_pipe().unwrap();
        set_nonblocking(read_fd).unwrap();
        let mut reader = PipeEnd::new(unsafe { File::from_raw_fd(read_fd) });
        let mut writer = unsafe { File::from_raw_fd(write_fd) };
        writer.write_all(b"ab").unwrap();

        reader.deadline = Some(Instant::now() + Duration::from_millis(50));
        let mut buf = [0u8; 4];
        let start = Instant::now();
        let err = reader.read_exact(&mut buf).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::TimedOut);
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn test_shutdown_without_worker_is_noop() {
        let mut bridge = WorkerBridge::new(
            WorkerCommand::external("true", Vec::new()),
            Duration::from_secs(1),
        );
        assert!(bridge.shutdown().is_ok());
        assert_eq!(bridge.name(), "worker");
    }
}
