//! adder-bench entrypoint.
//!
//! Loads configuration, sets up logging, builds the tokio runtime and runs
//! the configured role until it finishes or Ctrl-C is pressed.

use adder_bench::client::{self, DataSource, SessionConfig};
use adder_bench::config::{Config, Role};
use adder_bench::server::{Server, ServerConfig};
use adder_bench::stats::Stats;
use std::sync::Arc;
use tokio::net::lookup_host;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

type BoxError = Box<dyn std::error::Error>;

fn main() -> Result<(), BoxError> {
    // Load configuration
    let config = Config::load()?;

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let workers = config.workers.unwrap_or_else(num_cpus);
    info!(
        role = ?config.role,
        address = %config.address(),
        interval_ms = config.interval.as_millis() as u64,
        workers,
        "Starting adder-bench"
    );

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(workers)
        .enable_all()
        .build()?;

    runtime.block_on(run(config))
}

async fn run(config: Config) -> Result<(), BoxError> {
    let stats = Stats::new(config.latency_capacity);
    let reporter = stats.start(config.interval);

    let result = tokio::select! {
        result = run_role(&config, &stats) => result,
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl-C, shutting down");
            Ok(())
        }
    };

    reporter.stop().await;
    result
}

async fn run_role(config: &Config, stats: &Arc<Stats>) -> Result<(), BoxError> {
    match config.role {
        Role::Server => run_server(config, stats).await,
        Role::Client => run_client(config, stats).await,
    }
}

async fn run_server(config: &Config, stats: &Arc<Stats>) -> Result<(), BoxError> {
    let addr = lookup_host(config.address())
        .await?
        .next()
        .ok_or_else(|| format!("Invalid hostname: {}", config.host))?;

    let server = Server::new(
        ServerConfig {
            max_connections: config.max_connections,
            backlog: config.backlog,
            nodelay: config.nodelay,
        },
        Arc::clone(stats),
    );
    let listener = server.bind(addr)?;

    if let Err(e) = server.run(listener).await {
        // Established sessions keep running on their own tasks
        error!(error = %e, "No longer accepting connections");
        std::future::pending::<()>().await;
    }
    Ok(())
}

async fn run_client(config: &Config, stats: &Arc<Stats>) -> Result<(), BoxError> {
    let data = DataSource::random(config.data_size);
    let session = SessionConfig {
        requests: config.requests,
    };

    client::run(
        config.address(),
        config.connections,
        config.connect_delay,
        config.nodelay,
        data,
        Arc::clone(stats),
        session,
    )
    .await
}

fn num_cpus() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}
