//! Throughput and latency statistics.
//!
//! Sessions report every message into a shared `Stats` instance:
//! - Message and byte counters are plain atomics, read-and-reset with a
//!   single `swap` per tick
//! - Latency samples go into one of two sample buffers; each tick flips the
//!   active buffer and summarizes the one that was just retired
//!
//! A background reporter task (`Stats::start`) wakes every interval, collects
//! an `IntervalReport` and logs it as one summary line.

use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, info_span, Instrument};

/// Default number of latency samples preallocated per buffer.
pub const DEFAULT_LATENCY_CAPACITY: usize = 200_000;

const BYTES_PER_MB: f64 = 1_048_576.0;

/// Shared counters for one process role.
pub struct Stats {
    messages_sent: AtomicU64,
    messages_received: AtomicU64,
    bytes_sent: AtomicU64,
    bytes_received: AtomicU64,
    /// Latency samples in nanoseconds.
    latencies: [Mutex<Vec<u64>>; 2],
    /// Index of the buffer that currently accepts samples.
    active: AtomicUsize,
    latency_capacity: usize,
}

impl Stats {
    /// Create a new instance with `latency_capacity` samples preallocated
    /// in each of the two sample buffers.
    pub fn new(latency_capacity: usize) -> Arc<Self> {
        Arc::new(Stats {
            messages_sent: AtomicU64::new(0),
            messages_received: AtomicU64::new(0),
            bytes_sent: AtomicU64::new(0),
            bytes_received: AtomicU64::new(0),
            latencies: [
                Mutex::new(Vec::with_capacity(latency_capacity)),
                Mutex::new(Vec::with_capacity(latency_capacity)),
            ],
            active: AtomicUsize::new(0),
            latency_capacity,
        })
    }

    pub fn record_sent(&self, messages: u64, bytes: u64) {
        self.messages_sent.fetch_add(messages, Ordering::Relaxed);
        self.bytes_sent.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn record_received(&self, messages: u64, bytes: u64, latency: Option<Duration>) {
        self.messages_received.fetch_add(messages, Ordering::Relaxed);
        self.bytes_received.fetch_add(bytes, Ordering::Relaxed);

        if let Some(latency) = latency {
            let nanos = u64::try_from(latency.as_nanos()).unwrap_or(u64::MAX);
            let idx = self.active.load(Ordering::Acquire);
            lock(&self.latencies[idx]).push(nanos);
        }
    }

    /// Read and reset all counters and summarize the latency samples
    /// gathered since the previous call.
    ///
    /// `elapsed` is the measured time since the previous collection and is
    /// used for the rates. `scratch` receives the retired samples; it is
    /// handed back to the sample store empty, so its capacity is reused
    /// from one interval to the next.
    pub fn collect(&self, elapsed: Duration, scratch: &mut Vec<u64>) -> IntervalReport {
        let messages_received = self.messages_received.swap(0, Ordering::AcqRel);
        let bytes_received = self.bytes_received.swap(0, Ordering::AcqRel);
        let messages_sent = self.messages_sent.swap(0, Ordering::AcqRel);
        let bytes_sent = self.bytes_sent.swap(0, Ordering::AcqRel);

        // Samples recorded between the counter swaps and this flip land in
        // the retired buffer and are reported now; samples pushed by a
        // producer that loaded the old index after the drain below stay in
        // that buffer and are reported when it is retired again.
        let retired = self.active.fetch_xor(1, Ordering::AcqRel);
        scratch.clear();
        std::mem::swap(&mut *lock(&self.latencies[retired]), scratch);

        scratch.sort_unstable();
        let latency = LatencySummary::from_sorted(scratch);
        scratch.clear();

        IntervalReport {
            elapsed,
            messages_received,
            bytes_received,
            messages_sent,
            bytes_sent,
            latency,
        }
    }

    /// Spawn the background reporter, logging one summary per `interval`.
    pub fn start(self: &Arc<Self>, interval: Duration) -> StatsReporter {
        let (stop_tx, stop_rx) = oneshot::channel();
        let stats = Arc::clone(self);
        let handle = tokio::spawn(
            report_task(stats, interval, stop_rx).instrument(info_span!("stats_reporter")),
        );

        StatsReporter {
            stop: stop_tx,
            handle,
        }
    }
}

/// Lock a sample buffer, ignoring poisoning.
fn lock(buffer: &Mutex<Vec<u64>>) -> MutexGuard<'_, Vec<u64>> {
    buffer.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Background task that periodically logs a summary line
///
/// Exits when signalled or when its `StatsReporter` is dropped.
async fn report_task(stats: Arc<Stats>, interval: Duration, mut stop: oneshot::Receiver<()>) {
    let mut scratch = Vec::with_capacity(stats.latency_capacity);
    let mut last = Instant::now();
    debug!(interval_ms = interval.as_millis() as u64, "Statistics reporter started");

    loop {
        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = &mut stop => break,
        }

        let now = Instant::now();
        let report = stats.collect(now - last, &mut scratch);
        last = now;

        info!("{}", report);
    }

    debug!("Statistics reporter stopped");
}

/// Handle to the background reporter task.
pub struct StatsReporter {
    stop: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

impl StatsReporter {
    /// Stop the reporter and wait for it to exit.
    pub async fn stop(self) {
        let _ = self.stop.send(());
        let _ = self.handle.await;
    }
}

/// Latency distribution for one interval, in nanoseconds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LatencySummary {
    pub samples: usize,
    pub min: u64,
    pub max: u64,
    pub mean: f64,
    pub p50: u64,
    pub p90: u64,
    pub p99: u64,
}

impl LatencySummary {
    /// Summarize samples sorted in ascending order. Returns `None` when
    /// there are no samples.
    pub fn from_sorted(sorted: &[u64]) -> Option<Self> {
        let (&min, &max) = (sorted.first()?, sorted.last()?);
        let total: u128 = sorted.iter().map(|&v| v as u128).sum();

        Some(LatencySummary {
            samples: sorted.len(),
            min,
            max,
            mean: total as f64 / sorted.len() as f64,
            p50: percentile(sorted, 0.5),
            p90: percentile(sorted, 0.9),
            p99: percentile(sorted, 0.99),
        })
    }
}

/// Nearest-rank percentile: `sorted[floor(len * p)]`, clamped to the last
/// sample. `sorted` must be non-empty.
pub fn percentile(sorted: &[u64], p: f64) -> u64 {
    let idx = (sorted.len() as f64 * p) as usize;
    sorted[idx.min(sorted.len() - 1)]
}

/// Counters and latency summary for one reporting interval.
#[derive(Debug, Clone, PartialEq)]
pub struct IntervalReport {
    pub elapsed: Duration,
    pub messages_received: u64,
    pub bytes_received: u64,
    pub messages_sent: u64,
    pub bytes_sent: u64,
    pub latency: Option<LatencySummary>,
}

impl IntervalReport {
    fn per_second(&self, value: u64) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            value as f64 / secs
        } else {
            0.0
        }
    }

    pub fn received_per_sec(&self) -> f64 {
        self.per_second(self.messages_received)
    }

    pub fn received_mb_per_sec(&self) -> f64 {
        self.per_second(self.bytes_received) / BYTES_PER_MB
    }

    pub fn sent_per_sec(&self) -> f64 {
        self.per_second(self.messages_sent)
    }

    pub fn sent_mb_per_sec(&self) -> f64 {
        self.per_second(self.bytes_sent) / BYTES_PER_MB
    }
}

impl fmt::Display for IntervalReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Received: {:.0} msg/s, {:.2} MB/s; Sent: {:.0} msg/s, {:.2} MB/s",
            self.received_per_sec(),
            self.received_mb_per_sec(),
            self.sent_per_sec(),
            self.sent_mb_per_sec(),
        )?;

        if let Some(l) = &self.latency {
            write!(
                f,
                ", latencies: min/avg/max (μs) {:.2}/{:.2}/{:.2}, med/90%/99% (μs): {:.2}/{:.2}/{:.2}",
                micros(l.min),
                l.mean / 1_000.0,
                micros(l.max),
                micros(l.p50),
                micros(l.p90),
                micros(l.p99),
            )?;
        }

        Ok(())
    }
}

fn micros(nanos: u64) -> f64 {
    nanos as f64 / 1_000.0
}
