//! Configuration module for adder-bench.
//!
//! Supports both command-line arguments and TOML configuration file.
//! CLI arguments take precedence over config file values.

use crate::client::DEFAULT_DATA_SIZE;
use crate::server::{DEFAULT_BACKLOG, DEFAULT_MAX_CONNECTIONS};
use crate::stats::DEFAULT_LATENCY_CAPACITY;
use clap::{Parser, ValueEnum};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Which side of the benchmark this process runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Answer add requests
    Server,
    /// Generate add requests and measure round-trip latency
    Client,
}

/// Command-line arguments for the benchmark
#[derive(Parser, Debug)]
#[command(name = "adder-bench")]
#[command(author = "adder-bench authors")]
#[command(version = "0.1.0")]
#[command(about = "A TCP request/response benchmark", long_about = None)]
pub struct CliArgs {
    /// Path to TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Run as server or client
    #[arg(short, long, value_enum)]
    pub role: Option<Role>,

    /// Host to bind to (server) or connect to (client)
    #[arg(long)]
    pub host: Option<String>,

    /// TCP port
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Disable Nagle's algorithm on connections
    #[arg(long)]
    pub nodelay: Option<bool>,

    /// Maximum concurrent connections (server)
    #[arg(long)]
    pub max_connections: Option<usize>,

    /// Listen backlog (server)
    #[arg(long)]
    pub backlog: Option<i32>,

    /// Number of parallel connections (client)
    #[arg(short = 'n', long)]
    pub connections: Option<usize>,

    /// Stop each connection after this many requests (client)
    #[arg(long)]
    pub requests: Option<u64>,

    /// Size of the pre-generated operand buffer in bytes (client)
    #[arg(long)]
    pub data_size: Option<usize>,

    /// Delay before connecting in milliseconds (client)
    #[arg(long)]
    pub connect_delay_ms: Option<u64>,

    /// Statistics logging interval in milliseconds
    #[arg(short, long)]
    pub interval_ms: Option<u64>,

    /// Latency samples preallocated per reporting buffer
    #[arg(long)]
    pub latency_capacity: Option<usize>,

    /// Number of worker threads (defaults to number of CPU cores)
    #[arg(short = 'w', long)]
    pub workers: Option<usize>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

/// TOML configuration file structure
#[derive(Debug, Deserialize, Default)]
pub struct TomlConfig {
    pub role: Option<Role>,
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub client: ClientSection,
    #[serde(default)]
    pub stats: StatsSection,
    #[serde(default)]
    pub runtime: RuntimeSection,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Endpoint configuration shared by both roles
#[derive(Debug, Deserialize)]
pub struct NetworkConfig {
    /// Defaults depend on the role
    pub host: Option<String>,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_nodelay")]
    pub nodelay: bool,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            host: None,
            port: default_port(),
            nodelay: default_nodelay(),
        }
    }
}

/// Server-related configuration
#[derive(Debug, Deserialize)]
pub struct ServerSection {
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    #[serde(default = "default_backlog")]
    pub backlog: i32,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            max_connections: default_max_connections(),
            backlog: default_backlog(),
        }
    }
}

/// Client-related configuration
#[derive(Debug, Deserialize)]
pub struct ClientSection {
    #[serde(default = "default_connections")]
    pub connections: usize,
    /// Unlimited when absent
    pub requests: Option<u64>,
    #[serde(default = "default_data_size")]
    pub data_size: usize,
    #[serde(default = "default_connect_delay_ms")]
    pub connect_delay_ms: u64,
}

impl Default for ClientSection {
    fn default() -> Self {
        Self {
            connections: default_connections(),
            requests: None,
            data_size: default_data_size(),
            connect_delay_ms: default_connect_delay_ms(),
        }
    }
}

/// Statistics reporting configuration
#[derive(Debug, Deserialize)]
pub struct StatsSection {
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
    #[serde(default = "default_latency_capacity")]
    pub latency_capacity: usize,
}

impl Default for StatsSection {
    fn default() -> Self {
        Self {
            interval_ms: default_interval_ms(),
            latency_capacity: default_latency_capacity(),
        }
    }
}

/// Async runtime configuration
#[derive(Debug, Deserialize, Default)]
pub struct RuntimeSection {
    pub workers: Option<usize>,
}

/// Logging configuration
#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_port() -> u16 {
    8000
}

fn default_nodelay() -> bool {
    true
}

fn default_max_connections() -> usize {
    DEFAULT_MAX_CONNECTIONS
}

fn default_backlog() -> i32 {
    DEFAULT_BACKLOG
}

fn default_connections() -> usize {
    1
}

fn default_data_size() -> usize {
    DEFAULT_DATA_SIZE
}

fn default_connect_delay_ms() -> u64 {
    1000
}

fn default_interval_ms() -> u64 {
    1000
}

fn default_latency_capacity() -> usize {
    DEFAULT_LATENCY_CAPACITY
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Final resolved configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub role: Role,
    pub host: String,
    pub port: u16,
    pub nodelay: bool,
    pub max_connections: usize,
    pub backlog: i32,
    pub connections: usize,
    pub requests: Option<u64>,
    pub data_size: usize,
    pub connect_delay: Duration,
    pub interval: Duration,
    pub latency_capacity: usize,
    pub workers: Option<usize>,
    pub log_level: String,
}

impl Config {
    /// Load configuration from CLI args and optional TOML file.
    /// CLI arguments take precedence over TOML file values.
    pub fn load() -> Result<Self, ConfigError> {
        let cli = CliArgs::parse();

        // Load TOML config if specified
        let toml_config = if let Some(ref config_path) = cli.config {
            let contents = std::fs::read_to_string(config_path)
                .map_err(|e| ConfigError::FileRead(config_path.clone(), e))?;
            toml::from_str(&contents)
                .map_err(|e| ConfigError::TomlParse(config_path.clone(), e))?
        } else {
            TomlConfig::default()
        };

        Self::merge(cli, toml_config)
    }

    /// Merge CLI args over TOML values and validate the result.
    pub fn merge(cli: CliArgs, toml_config: TomlConfig) -> Result<Self, ConfigError> {
        let role = cli.role.or(toml_config.role).unwrap_or(Role::Server);
        let host = cli
            .host
            .or(toml_config.network.host)
            .unwrap_or_else(|| match role {
                Role::Server => "0.0.0.0".to_string(),
                Role::Client => "localhost".to_string(),
            });

        let config = Config {
            role,
            host,
            port: cli.port.unwrap_or(toml_config.network.port),
            nodelay: cli.nodelay.unwrap_or(toml_config.network.nodelay),
            max_connections: cli
                .max_connections
                .unwrap_or(toml_config.server.max_connections),
            backlog: cli.backlog.unwrap_or(toml_config.server.backlog),
            connections: cli
                .connections
                .unwrap_or(toml_config.client.connections),
            requests: cli.requests.or(toml_config.client.requests),
            data_size: cli.data_size.unwrap_or(toml_config.client.data_size),
            connect_delay: Duration::from_millis(
                cli.connect_delay_ms
                    .unwrap_or(toml_config.client.connect_delay_ms),
            ),
            interval: Duration::from_millis(
                cli.interval_ms.unwrap_or(toml_config.stats.interval_ms),
            ),
            latency_capacity: cli
                .latency_capacity
                .unwrap_or(toml_config.stats.latency_capacity),
            workers: cli.workers.or(toml_config.runtime.workers),
            log_level: if cli.log_level != "info" {
                cli.log_level
            } else {
                toml_config.logging.level
            },
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.role == Role::Client && self.port == 0 {
            return Err(ConfigError::Invalid("client port must not be 0".into()));
        }
        if self.interval.is_zero() {
            return Err(ConfigError::Invalid("interval_ms must be positive".into()));
        }
        if self.connections == 0 {
            return Err(ConfigError::Invalid("connections must be positive".into()));
        }
        if self.max_connections == 0 {
            return Err(ConfigError::Invalid("max_connections must be positive".into()));
        }
        if self.workers == Some(0) {
            return Err(ConfigError::Invalid("workers must be positive".into()));
        }
        if self.data_size < 8 {
            return Err(ConfigError::Invalid(format!(
                "data_size must be at least 8 bytes, got {}",
                self.data_size
            )));
        }
        Ok(())
    }

    /// `host:port` in a form accepted by the resolver
    pub fn address(&self) -> String {
        if self.host.contains(':') && !self.host.starts_with('[') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

/// Configuration loading errors
#[derive(Debug)]
pub enum ConfigError {
    FileRead(PathBuf, std::io::Error),
    TomlParse(PathBuf, toml::de::Error),
    Invalid(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::FileRead(path, e) => {
                write!(f, "Failed to read config file '{}': {}", path.display(), e)
            }
            ConfigError::TomlParse(path, e) => {
                write!(f, "Failed to parse config file '{}': {}", path.display(), e)
            }
            ConfigError::Invalid(msg) => write!(f, "Invalid configuration: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}
