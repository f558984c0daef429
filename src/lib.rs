//! adder-bench: a TCP request/response benchmark
//!
//! A client issues fixed-size binary "add two numbers" requests over
//! persistent connections; a server answers each with the sum. Both sides
//! feed a shared statistics aggregator that logs throughput (and, on the
//! client, round-trip latency) once per interval.
//!
//! Modules, leaves first:
//! - `protocol`: request/response frame codec
//! - `connection`: partial-read/partial-write frame I/O
//! - `stats`: lock-light counters, latency buffers and the reporter task
//! - `client`: request generator session
//! - `server`: connection acceptor and answering session
//! - `config`: CLI and TOML configuration

pub mod client;
pub mod config;
pub mod connection;
pub mod protocol;
pub mod server;
pub mod stats;
