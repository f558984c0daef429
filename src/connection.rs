//! Per-connection frame I/O shared by the client and server sessions.
//!
//! Each session exclusively owns one `FrameBuffer`. Reads accumulate into it
//! at a fill cursor until a whole frame is present, so a frame split across
//! any number of socket reads is reassembled before anyone looks at it.

use crate::protocol::FRAME_BUFFER_LEN;
use std::fmt;
use std::io;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Why a session stopped.
#[derive(Debug)]
pub enum CloseReason {
    /// A read returned zero bytes.
    PeerClosed,
    /// The configured request limit was reached.
    Completed,
    /// Any other read or write failure.
    Io(io::Error),
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CloseReason::PeerClosed => write!(f, "closed by peer"),
            CloseReason::Completed => write!(f, "request limit reached"),
            CloseReason::Io(e) => write!(f, "I/O error: {}", e),
        }
    }
}

impl From<io::Error> for CloseReason {
    fn from(e: io::Error) -> Self {
        CloseReason::Io(e)
    }
}

/// Result of filling the buffer with one frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadOutcome {
    /// The requested number of bytes is in the buffer.
    Frame,
    /// The peer closed the connection before the frame was complete.
    Eof,
}

/// Fixed-size I/O buffer with a cursor for partial reads.
pub struct FrameBuffer {
    buf: [u8; FRAME_BUFFER_LEN],
    filled: usize,
}

impl FrameBuffer {
    pub fn new() -> Self {
        Self {
            buf: [0u8; FRAME_BUFFER_LEN],
            filled: 0,
        }
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }

    pub fn buf_mut(&mut self) -> &mut [u8; FRAME_BUFFER_LEN] {
        &mut self.buf
    }

    /// Bytes accumulated by the current or last read.
    pub fn filled(&self) -> usize {
        self.filled
    }

    /// Read until exactly `len` bytes are in the buffer.
    ///
    /// Each socket read only asks for the bytes still missing, so nothing
    /// belonging to the next frame is consumed.
    pub async fn read_frame<R>(&mut self, reader: &mut R, len: usize) -> io::Result<ReadOutcome>
    where
        R: AsyncRead + Unpin,
    {
        debug_assert!(len <= FRAME_BUFFER_LEN);
        self.filled = 0;

        while self.filled < len {
            let n = reader.read(&mut self.buf[self.filled..len]).await?;
            if n == 0 {
                return Ok(ReadOutcome::Eof);
            }
            self.filled += n;
        }

        Ok(ReadOutcome::Frame)
    }

    /// Write the first `len` bytes, retrying partial writes until done.
    pub async fn write_frame<W>(&self, writer: &mut W, len: usize) -> io::Result<()>
    where
        W: AsyncWrite + Unpin,
    {
        writer.write_all(&self.buf[..len]).await
    }
}

impl Default for FrameBuffer {
    fn default() -> Self {
        Self::new()
    }
}
