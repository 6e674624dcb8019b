//! Length-Prefixed Frames
//!
//! Message boundaries over the byte streams connecting the bridge to a
//! transform worker (inherited pipes or stdin/stdout). Every message is one
//! frame:
//!
//! ```text
//! [ u32 payload length, little endian ][ rkyv archive of the message ]
//! ```
//!
//! Payloads are validated with `check_archived_root` before use, so a
//! misbehaving worker produces a [`FrameError`] instead of undefined reads.

use rkyv::ser::serializers::AllocSerializer;
use rkyv::validation::validators::DefaultValidator;
use rkyv::{AlignedVec, Archive, CheckBytes, Deserialize, Infallible, Serialize};
use std::io::{self, BufReader, BufWriter, Read, Write};
use thiserror::Error;

/// Largest payload either side accepts (16 MiB)
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

const HEADER_LEN: usize = 4;
const SCRATCH_SPACE: usize = 4096;
const STREAM_BUFFER: usize = 256 * 1024;

/// Framing failures
#[derive(Debug, Error)]
pub enum FrameError {
    /// Underlying stream failed
    #[error("pipe I/O failed: {0}")]
    Io(#[from] io::Error),

    /// Message could not be archived
    #[error("cannot archive message: {0}")]
    Serialization(String),

    /// Payload failed archive validation
    #[error("malformed message payload: {0}")]
    Deserialization(String),

    /// Frame exceeds [`MAX_FRAME_SIZE`]
    #[error("frame of {size} bytes exceeds the {max} byte limit")]
    FrameTooLarge {
        /// Declared or encoded size
        size: usize,
        /// Allowed maximum
        max: usize,
    },

    /// Frame header is malformed
    #[error("bad frame header: {0}")]
    InvalidFrame(String),

    /// Peer closed the stream before a length prefix was read
    #[error("peer closed the stream")]
    EndOfStream,
}

fn check_size(size: usize) -> Result<usize, FrameError> {
    match size {
        0 => Err(FrameError::InvalidFrame("zero-length frame".to_string())),
        n if n > MAX_FRAME_SIZE => Err(FrameError::FrameTooLarge {
            size: n,
            max: MAX_FRAME_SIZE,
        }),
        n => Ok(n),
    }
}

fn encode<T>(message: &T) -> Result<AlignedVec, FrameError>
where
    T: Serialize<AllocSerializer<SCRATCH_SPACE>>,
{
    let payload = rkyv::to_bytes::<_, SCRATCH_SPACE>(message)
        .map_err(|e| FrameError::Serialization(e.to_string()))?;
    check_size(payload.len())?;
    Ok(payload)
}

fn decode<T>(payload: &AlignedVec) -> Result<T, FrameError>
where
    T: Archive,
    T::Archived: for<'a> CheckBytes<DefaultValidator<'a>> + Deserialize<T, Infallible>,
{
    let archived = rkyv::check_archived_root::<T>(payload)
        .map_err(|e| FrameError::Deserialization(e.to_string()))?;
    archived
        .deserialize(&mut Infallible)
        .map_err(|_| FrameError::Deserialization("archive did not deserialize".to_string()))
}

/// Sending half of a framed stream
///
/// Each [`send`](Self::send) flushes, since the peer blocks on the frame.
pub struct FrameWriter<W: Write> {
    inner: BufWriter<W>,
}

impl<W: Write> FrameWriter<W> {
    /// Wrap a byte sink
    pub fn new(inner: W) -> Self {
        Self {
            inner: BufWriter::with_capacity(STREAM_BUFFER, inner),
        }
    }

    /// Encode `message` and push it to the peer
    pub fn send<T>(&mut self, message: &T) -> Result<(), FrameError>
    where
        T: Serialize<AllocSerializer<SCRATCH_SPACE>>,
    {
        let payload = encode(message)?;
        let header = (payload.len() as u32).to_le_bytes();
        self.inner.write_all(&header)?;
        self.inner.write_all(&payload)?;
        self.inner.flush()?;
        Ok(())
    }

    /// The wrapped sink
    pub fn get_mut(&mut self) -> &mut W {
        self.inner.get_mut()
    }
}

/// Receiving half of a framed stream
pub struct FrameReader<R: Read> {
    inner: BufReader<R>,
}

impl<R: Read> FrameReader<R> {
    /// Wrap a byte source
    pub fn new(inner: R) -> Self {
        Self {
            inner: BufReader::with_capacity(STREAM_BUFFER, inner),
        }
    }

    /// Block until the next complete frame and decode it
    ///
    /// A clean close before any header byte is [`FrameError::EndOfStream`];
    /// a close mid-frame is an I/O error.
    pub fn recv<T>(&mut self) -> Result<T, FrameError>
    where
        T: Archive,
        T::Archived: for<'a> CheckBytes<DefaultValidator<'a>> + Deserialize<T, Infallible>,
    {
        let mut header = [0u8; HEADER_LEN];
        if let Err(e) = self.inner.read_exact(&mut header) {
            return Err(match e.kind() {
                io::ErrorKind::UnexpectedEof => FrameError::EndOfStream,
                _ => FrameError::Io(e),
            });
        }
        let size = check_size(u32::from_le_bytes(header) as usize)?;

        // Validation needs an aligned buffer
        let mut payload = AlignedVec::with_capacity(size);
        payload.resize(size, 0);
        self.inner.read_exact(&mut payload)?;
        decode(&payload)
    }

    /// The wrapped source; bytes already buffered are not visible through it
    pub fn get_mut(&mut self) -> &mut R {
        self.inner.get_mut()
    }

    /// Whether bytes of a later frame are already buffered
    ///
    /// `poll(2)` on the descriptor cannot see these.
    pub fn has_buffered_data(&self) -> bool {
        !self.inner.buffer().is_empty()
    }
}
