//! TCP server answering add requests.
//!
//! Accepts incoming connections and runs one session task per connection.
//! Sessions share nothing but the process-wide `Stats`.

use crate::connection::{CloseReason, FrameBuffer, ReadOutcome};
use crate::protocol::{respond_in_place, REQUEST_LEN, RESPONSE_LEN};
use crate::stats::Stats;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;
use tracing::{debug, error, info, trace, warn};

/// Default maximum number of concurrent connections
pub const DEFAULT_MAX_CONNECTIONS: usize = 10000;

/// Default listen backlog
pub const DEFAULT_BACKLOG: i32 = 1024;

/// Server settings
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub max_connections: usize,
    pub backlog: i32,
    pub nodelay: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            max_connections: DEFAULT_MAX_CONNECTIONS,
            backlog: DEFAULT_BACKLOG,
            nodelay: true,
        }
    }
}

/// Server instance
pub struct Server {
    config: ServerConfig,
    stats: Arc<Stats>,
    connection_limit: Arc<Semaphore>,
}

impl Server {
    /// Create a new server instance reporting into `stats`
    pub fn new(config: ServerConfig, stats: Arc<Stats>) -> Self {
        let connection_limit = Arc::new(Semaphore::new(config.max_connections));
        Server {
            config,
            stats,
            connection_limit,
        }
    }

    /// Bind a listening socket with SO_REUSEADDR and the configured backlog.
    ///
    /// Must be called from within a tokio runtime.
    pub fn bind(&self, addr: SocketAddr) -> io::Result<TcpListener> {
        let socket = socket2::Socket::new(
            socket2::Domain::for_address(addr),
            socket2::Type::STREAM,
            Some(socket2::Protocol::TCP),
        )?;

        socket.set_reuse_address(true)?;
        socket.set_nonblocking(true)?;
        socket.bind(&addr.into())?;
        socket.listen(self.config.backlog)?;

        TcpListener::from_std(socket.into())
    }

    /// Accept connections until accepting fails.
    ///
    /// Every accepted connection is handled on its own task, so a slow or
    /// failing session never holds up the accept loop. An accept error is
    /// returned; sessions already running are unaffected.
    pub async fn run(&self, listener: TcpListener) -> io::Result<()> {
        let local = listener.local_addr()?;
        info!(address = %local, "Server listening");

        loop {
            // Wait for a connection slot
            let permit = match Arc::clone(&self.connection_limit).acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => return Ok(()),
            };

            let (stream, peer) = match listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    error!(error = %e, "Failed to accept connection");
                    return Err(e);
                }
            };
            debug!(peer = %peer, "New connection");

            if let Err(e) = stream.set_nodelay(self.config.nodelay) {
                warn!(peer = %peer, error = %e, "Failed to set TCP_NODELAY");
            }

            let stats = Arc::clone(&self.stats);
            tokio::spawn(async move {
                serve(stream, peer, stats).await;
                drop(permit);
            });
        }
    }
}

/// Run one accepted connection to completion and log how it ended
async fn serve(stream: TcpStream, peer: SocketAddr, stats: Arc<Stats>) {
    info!(peer = %peer, "Client connected");

    match handle_connection(stream, &stats).await {
        CloseReason::Io(e) => {
            warn!(peer = %peer, error = %e, "IO error; closing client connection")
        }
        reason => info!(peer = %peer, reason = %reason, "Connection closed"),
    }
}

/// Answer requests on one connection until it closes.
///
/// Reads a full request frame, computes the sum in place and writes the
/// response frame back. No latency is measured on this side.
pub async fn handle_connection<S>(mut stream: S, stats: &Stats) -> CloseReason
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut frame = FrameBuffer::new();

    loop {
        match frame.read_frame(&mut stream, REQUEST_LEN).await {
            Ok(ReadOutcome::Frame) => {}
            Ok(ReadOutcome::Eof) => {
                trace!(partial = frame.filled(), "Connection closed by client");
                return CloseReason::PeerClosed;
            }
            Err(e) => return e.into(),
        }
        stats.record_received(1, REQUEST_LEN as u64, None);

        let response = respond_in_place(frame.buf_mut());
        trace!(id = response.id, sum = response.sum, "Processing request");

        if let Err(e) = frame.write_frame(&mut stream, RESPONSE_LEN).await {
            return e.into();
        }
        stats.record_sent(1, RESPONSE_LEN as u64);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{ClientSession, DataSource, SessionConfig};
    use crate::protocol::{Request, Response};
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio_test::io::Builder;

    fn request_bytes(id: u32, a: i32, b: i32) -> [u8; REQUEST_LEN] {
        let mut buf = [0u8; REQUEST_LEN];
        Request::new(id, a, b).encode(&mut buf);
        buf
    }

    fn response_bytes(id: u32, sum: i32) -> [u8; RESPONSE_LEN] {
        let mut buf = [0u8; RESPONSE_LEN];
        Response::new(id, sum).encode(&mut buf);
        buf
    }

    fn loopback() -> SocketAddr {
        "127.0.0.1:0".parse().unwrap()
    }

    #[tokio::test]
    async fn test_answers_requests() {
        let mock = Builder::new()
            .read(&request_bytes(1, 5, 7))
            .write(&response_bytes(1, 12))
            .read(&request_bytes(2, i32::MAX, 1))
            .write(&response_bytes(2, i32::MIN))
            .build();

        let stats = Stats::new(16);
        let reason = handle_connection(mock, &stats).await;
        assert!(matches!(reason, CloseReason::PeerClosed));

        let report = stats.collect(Duration::from_secs(1), &mut Vec::new());
        assert_eq!(report.messages_received, 2);
        assert_eq!(report.bytes_received, 24);
        assert_eq!(report.messages_sent, 2);
        assert_eq!(report.bytes_sent, 16);
        assert!(report.latency.is_none());
    }

    #[tokio::test]
    async fn test_request_one_byte_at_a_time() {
        let mut builder = Builder::new();
        for byte in request_bytes(9, -20, 3) {
            builder.read(&[byte]);
        }
        builder.write(&response_bytes(9, -17));
        let mock = builder.build();

        let reason = handle_connection(mock, &Stats::new(16)).await;
        assert!(matches!(reason, CloseReason::PeerClosed));
    }

    #[tokio::test]
    async fn test_two_requests_in_one_read() {
        let mut both = request_bytes(1, 1, 2).to_vec();
        both.extend_from_slice(&request_bytes(2, 3, 4));

        let mock = Builder::new()
            .read(&both)
            .write(&response_bytes(1, 3))
            .write(&response_bytes(2, 7))
            .build();

        let reason = handle_connection(mock, &Stats::new(16)).await;
        assert!(matches!(reason, CloseReason::PeerClosed));
    }

    #[tokio::test]
    async fn test_eof_mid_request_writes_nothing() {
        let request = request_bytes(1, 5, 7);
        let mock = Builder::new().read(&request[..7]).build();

        let stats = Stats::new(16);
        let reason = handle_connection(mock, &stats).await;
        assert!(matches!(reason, CloseReason::PeerClosed));

        let report = stats.collect(Duration::from_secs(1), &mut Vec::new());
        assert_eq!(report.messages_received, 0);
        assert_eq!(report.messages_sent, 0);
    }

    #[tokio::test]
    async fn test_write_error_ends_session() {
        let mock = Builder::new()
            .read(&request_bytes(1, 5, 7))
            .write_error(io::Error::new(io::ErrorKind::BrokenPipe, "broken pipe"))
            .build();

        let stats = Stats::new(16);
        match handle_connection(mock, &stats).await {
            CloseReason::Io(e) => assert_eq!(e.kind(), io::ErrorKind::BrokenPipe),
            other => panic!("unexpected: {:?}", other),
        }

        let report = stats.collect(Duration::from_secs(1), &mut Vec::new());
        assert_eq!(report.messages_received, 1);
        assert_eq!(report.messages_sent, 0);
    }

    #[tokio::test]
    async fn test_end_to_end() {
        let server_stats = Stats::new(16);
        let server = Server::new(ServerConfig::default(), Arc::clone(&server_stats));
        let listener = server.bind(loopback()).unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { server.run(listener).await });

        let client_stats = Stats::new(16);
        let session = ClientSession::new(
            DataSource::from_operands(&[(5, 7)]),
            Arc::clone(&client_stats),
            SessionConfig { requests: Some(1) },
        );
        let reason = session
            .connect_and_run(&addr.to_string(), true)
            .await
            .unwrap();
        assert!(matches!(reason, CloseReason::Completed));

        let report = client_stats.collect(Duration::from_secs(1), &mut Vec::new());
        assert_eq!(report.messages_sent, 1);
        assert_eq!(report.bytes_sent, 12);
        assert_eq!(report.messages_received, 1);
        assert_eq!(report.bytes_received, 8);
        let latency = report.latency.unwrap();
        assert_eq!(latency.samples, 1);
        assert!(latency.min > 0);

        // The server recorded the request before its response reached us
        let report = server_stats.collect(Duration::from_secs(1), &mut Vec::new());
        assert_eq!(report.messages_received, 1);
        assert_eq!(report.bytes_received, 12);
    }

    #[tokio::test]
    async fn test_response_on_the_wire() {
        let server = Server::new(ServerConfig::default(), Stats::new(16));
        let listener = server.bind(loopback()).unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { server.run(listener).await });

        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream.write_all(&request_bytes(1, 5, 7)).await.unwrap();

        let mut response = [0u8; RESPONSE_LEN];
        stream.read_exact(&mut response).await.unwrap();
        assert_eq!(Response::decode(&response), Response::new(1, 12));

        // Exactly 8 bytes per response: closing our side yields EOF next
        stream.shutdown().await.unwrap();
        let mut rest = Vec::new();
        stream.read_to_end(&mut rest).await.unwrap();
        assert!(rest.is_empty());
    }

    #[tokio::test]
    async fn test_sessions_are_independent() {
        let server = Server::new(ServerConfig::default(), Stats::new(16));
        let listener = server.bind(loopback()).unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { server.run(listener).await });

        // A client that stalls mid-frame must not block other clients
        let mut stalled = TcpStream::connect(addr).await.unwrap();
        stalled.write_all(&request_bytes(1, 1, 1)[..5]).await.unwrap();

        // A client that disconnects mid-frame must not stop the acceptor
        let mut dropped = TcpStream::connect(addr).await.unwrap();
        dropped.write_all(&request_bytes(1, 1, 1)[..3]).await.unwrap();
        drop(dropped);

        let mut active = TcpStream::connect(addr).await.unwrap();
        for id in 1..=3 {
            active.write_all(&request_bytes(id, 40, 2)).await.unwrap();
            let mut response = [0u8; RESPONSE_LEN];
            active.read_exact(&mut response).await.unwrap();
            assert_eq!(Response::decode(&response), Response::new(id, 42));
        }
    }

    #[tokio::test]
    async fn test_connection_limit_frees_on_close() {
        let config = ServerConfig {
            max_connections: 1,
            ..ServerConfig::default()
        };
        let server = Server::new(config, Stats::new(16));
        let listener = server.bind(loopback()).unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { server.run(listener).await });

        for id in 1..=2 {
            let mut stream = TcpStream::connect(addr).await.unwrap();
            stream.write_all(&request_bytes(id, 1, 2)).await.unwrap();
            let mut response = [0u8; RESPONSE_LEN];
            stream.read_exact(&mut response).await.unwrap();
            assert_eq!(Response::decode(&response), Response::new(id, 3));
        }
    }
}
