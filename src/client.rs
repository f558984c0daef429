//! Benchmark client.
//!
//! Each `ClientSession` drives one connection through a strict
//! request/response cycle: write a request, wait for its response, record
//! the round trip, repeat. Operands come from a shared `DataSource` that the
//! session walks through in 8-byte steps.

use crate::connection::{CloseReason, FrameBuffer, ReadOutcome};
use crate::protocol::{Request, Response, REQUEST_LEN, RESPONSE_LEN};
use crate::stats::Stats;
use bytes::{Buf, Bytes};
use rand::Rng;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{info, trace, warn};

/// Default size of the operand buffer in bytes.
pub const DEFAULT_DATA_SIZE: usize = 65336;

/// Upper bound (exclusive) of generated operand values.
const OPERAND_RANGE: i32 = 10_000;

/// Bytes of operand data consumed per request.
const OPERANDS_LEN: usize = 8;

/// Pre-generated operand bytes shared by all sessions.
#[derive(Debug, Clone)]
pub struct DataSource {
    data: Bytes,
}

impl DataSource {
    /// Fill `size` bytes with little-endian i32 values in `0..10_000`.
    ///
    /// A trailing partial word (when `size` is not a multiple of 4) is
    /// left zeroed.
    pub fn random(size: usize) -> Self {
        let mut rng = rand::rng();
        let mut data = vec![0u8; size];
        for word in data.chunks_exact_mut(4) {
            word.copy_from_slice(&rng.random_range(0..OPERAND_RANGE).to_le_bytes());
        }
        Self::from_bytes(data)
    }

    /// Use `data` as-is. Must not be empty.
    pub fn from_bytes(data: impl Into<Bytes>) -> Self {
        let data = data.into();
        assert!(!data.is_empty(), "data source must not be empty");
        Self { data }
    }

    /// Build a source that yields exactly the given operand pairs in order.
    pub fn from_operands(pairs: &[(i32, i32)]) -> Self {
        let mut data = Vec::with_capacity(pairs.len() * OPERANDS_LEN);
        for &(a, b) in pairs {
            data.extend_from_slice(&a.to_le_bytes());
            data.extend_from_slice(&b.to_le_bytes());
        }
        Self::from_bytes(data)
    }

    /// Size of the operand buffer in bytes.
    pub fn size(&self) -> usize {
        self.data.len()
    }

    /// Read the operand pair from the 8-byte window starting at `*cursor`
    /// and advance the cursor by 8 modulo the data length. A window that
    /// runs past the end continues from the start.
    fn next_operands(&self, cursor: &mut usize) -> (i32, i32) {
        let len = self.data.len();
        let start = *cursor;
        let mut window = [0u8; OPERANDS_LEN];
        if start + OPERANDS_LEN <= len {
            window.copy_from_slice(&self.data[start..start + OPERANDS_LEN]);
        } else {
            for (i, byte) in window.iter_mut().enumerate() {
                *byte = self.data[(start + i) % len];
            }
        }
        *cursor = (start + OPERANDS_LEN) % len;

        let mut input = &window[..];
        (input.get_i32_le(), input.get_i32_le())
    }
}

/// Client session configuration.
#[derive(Debug, Clone, Default)]
pub struct SessionConfig {
    /// Stop after this many round trips. `None` runs until the connection
    /// closes.
    pub requests: Option<u64>,
}

/// One outbound connection's request/response loop.
pub struct ClientSession {
    data: DataSource,
    stats: Arc<Stats>,
    config: SessionConfig,
}

impl ClientSession {
    pub fn new(data: DataSource, stats: Arc<Stats>, config: SessionConfig) -> Self {
        Self {
            data,
            stats,
            config,
        }
    }

    /// Connect to `addr` and run until the connection closes.
    pub async fn connect_and_run(
        &self,
        addr: &str,
        nodelay: bool,
    ) -> std::io::Result<CloseReason> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(nodelay)?;
        let peer = stream.peer_addr()?;
        info!(peer = %peer, "Connected to server");

        let reason = self.run(stream).await;
        match &reason {
            CloseReason::Io(e) => {
                warn!(peer = %peer, error = %e, "IO error; closing server connection")
            }
            other => info!(peer = %peer, reason = %other, "Connection closed"),
        }
        Ok(reason)
    }

    /// Run the request/response loop on an established stream.
    ///
    /// Returns when the peer closes the connection, an I/O error occurs, or
    /// the configured request limit is reached.
    pub async fn run<S>(&self, mut stream: S) -> CloseReason
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let mut frame = FrameBuffer::new();
        let mut id: u32 = 1;
        let mut cursor = 0usize;
        let mut completed: u64 = 0;

        loop {
            if self.config.requests.is_some_and(|limit| completed >= limit) {
                if let Err(e) = stream.shutdown().await {
                    return e.into();
                }
                return CloseReason::Completed;
            }

            let (a, b) = self.data.next_operands(&mut cursor);
            let request = Request::new(id, a, b);
            request.encode(frame.buf_mut());
            trace!(?request, "Send request");
            id = id.wrapping_add(1);

            if let Err(e) = frame.write_frame(&mut stream, REQUEST_LEN).await {
                return e.into();
            }
            self.stats.record_sent(1, REQUEST_LEN as u64);
            let started = Instant::now();

            match frame.read_frame(&mut stream, RESPONSE_LEN).await {
                Ok(ReadOutcome::Frame) => {}
                Ok(ReadOutcome::Eof) => return CloseReason::PeerClosed,
                Err(e) => return e.into(),
            }
            self.stats
                .record_received(1, RESPONSE_LEN as u64, Some(started.elapsed()));
            trace!(response = ?Response::decode(frame.as_slice()), "Response");

            completed += 1;
        }
    }
}

/// Open `connections` sessions to `addr` and wait until all have closed.
///
/// Sessions share `stats` and `data`; a session that fails to connect or
/// dies does not affect the others.
pub async fn run(
    addr: String,
    connections: usize,
    connect_delay: Duration,
    nodelay: bool,
    data: DataSource,
    stats: Arc<Stats>,
    config: SessionConfig,
) -> Result<(), Box<dyn std::error::Error>> {
    if !connect_delay.is_zero() {
        tokio::time::sleep(connect_delay).await;
    }
    info!(
        address = %addr,
        connections,
        data_bytes = data.size(),
        "Connecting to server"
    );

    let addr = Arc::new(addr);
    let mut sessions = tokio::task::JoinSet::new();
    for _ in 0..connections {
        let session = ClientSession::new(data.clone(), Arc::clone(&stats), config.clone());
        let addr = Arc::clone(&addr);
        sessions.spawn(async move { session.connect_and_run(&addr, nodelay).await });
    }

    let mut failures = 0usize;
    while let Some(joined) = sessions.join_next().await {
        match joined {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => {
                warn!(address = %addr, error = %e, "Failed to connect");
                failures += 1;
            }
            Err(e) => {
                warn!(error = %e, "Client session task failed");
                failures += 1;
            }
        }
    }

    if failures == connections {
        return Err(format!("no connection to {} could be established", addr).into());
    }
    Ok(())
}
