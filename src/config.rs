//! Configuration module for chunk-echo.
//!
//! Supports both command-line arguments and TOML configuration file.
//! CLI arguments take precedence over config file values.

use clap::{Args, Parser, Subcommand, ValueEnum};
use serde::Deserialize;
use std::path::PathBuf;

/// Command-line arguments
#[derive(Parser, Debug)]
#[command(name = "chunk-echo")]
#[command(author = "chunk-echo authors")]
#[command(version = "0.1.0")]
#[command(about = "A length-prefixed TCP echo server", long_about = None)]
pub struct CliArgs {
    /// Path to TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Address to bind to (e.g., 127.0.0.1:54321)
    #[arg(short = 'l', long)]
    pub listen: Option<String>,

    /// Concurrency model used to drive connections
    #[arg(short = 'r', long, value_enum)]
    pub runtime: Option<RuntimeType>,

    /// Largest accepted payload in bytes
    #[arg(long)]
    pub max_message_size: Option<usize>,

    /// Capacity of each receive buffer chunk in bytes
    #[arg(long)]
    pub chunk_size: Option<usize>,

    /// Maximum concurrent connections (event loop only)
    #[arg(long)]
    pub max_connections: Option<usize>,

    /// Listen backlog
    #[arg(long)]
    pub backlog: Option<i32>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the echo server (default)
    Serve,
    /// Drive a running server with closed-loop clients and report throughput
    Bench(BenchArgs),
}

/// Load generator arguments
#[derive(Args, Debug, Clone, PartialEq, Eq)]
pub struct BenchArgs {
    /// Server address
    #[arg(short, long, default_value = "127.0.0.1:54321")]
    pub target: String,

    /// Number of client connections, one thread each
    #[arg(short = 'n', long, default_value_t = 1)]
    pub clients: usize,

    /// Payload size of each request in bytes
    #[arg(short = 's', long, default_value_t = 4)]
    pub message_size: usize,

    /// Seconds to run before counting requests
    #[arg(long, default_value_t = 5)]
    pub warmup_secs: u64,

    /// Seconds during which requests are counted
    #[arg(long, default_value_t = 30)]
    pub duration_secs: u64,

    /// File to write one latency (in nanoseconds) per line
    #[arg(long)]
    pub latency_out: Option<PathBuf>,
}

/// Concurrency model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeType {
    /// One blocking thread per connection
    Threaded,
    /// Single-threaded edge-triggered event loop (epoll/kqueue)
    Mio,
    /// Async task per connection on tokio
    Tokio,
}

/// TOML configuration file structure
#[derive(Debug, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub protocol: ProtocolConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server-related configuration
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    /// Address to bind to
    #[serde(default = "default_listen")]
    pub listen: String,
    /// Concurrency model
    #[serde(default = "default_runtime")]
    pub runtime: RuntimeType,
    /// Maximum concurrent connections
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    /// Listen backlog
    #[serde(default = "default_backlog")]
    pub backlog: i32,
    /// Disable Nagle's algorithm on accepted connections
    #[serde(default = "default_nodelay")]
    pub nodelay: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            runtime: default_runtime(),
            max_connections: default_max_connections(),
            backlog: default_backlog(),
            nodelay: default_nodelay(),
        }
    }
}

/// Framing configuration
#[derive(Debug, Deserialize)]
pub struct ProtocolConfig {
    /// Largest accepted payload in bytes
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,
    /// Receive buffer chunk capacity in bytes
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            max_message_size: default_max_message_size(),
            chunk_size: default_chunk_size(),
        }
    }
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

fn default_listen() -> String {
    "127.0.0.1:54321".to_string()
}

fn default_runtime() -> RuntimeType {
    RuntimeType::Mio
}

fn default_max_connections() -> usize {
    10_000
}

fn default_backlog() -> i32 {
    2048
}

fn default_nodelay() -> bool {
    true
}

fn default_max_message_size() -> usize {
    crate::protocols::echo::DEFAULT_MAX_MESSAGE_SIZE
}

fn default_chunk_size() -> usize {
    crate::runtime::CHUNK_SIZE
}

fn default_log_level() -> String {
    "info".to_string()
}

/// What the process should do once configured.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mode {
    Serve,
    Bench(BenchArgs),
}

/// Final resolved configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub listen: String,
    pub runtime: RuntimeType,
    pub max_connections: usize,
    pub backlog: i32,
    pub nodelay: bool,
    pub max_message_size: usize,
    pub chunk_size: usize,
    pub log_level: String,
    pub mode: Mode,
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
        let mode = match cli.command {
            None | Some(Command::Serve) => Mode::Serve,
            Some(Command::Bench(args)) => Mode::Bench(args),
        };

        let config = Config {
            listen: cli.listen.unwrap_or(toml_config.server.listen),
            runtime: cli.runtime.unwrap_or(toml_config.server.runtime),
            max_connections: cli
                .max_connections
                .unwrap_or(toml_config.server.max_connections),
            backlog: cli.backlog.unwrap_or(toml_config.server.backlog),
            nodelay: toml_config.server.nodelay,
            max_message_size: cli
                .max_message_size
                .unwrap_or(toml_config.protocol.max_message_size),
            chunk_size: cli.chunk_size.unwrap_or(toml_config.protocol.chunk_size),
            log_level: cli.log_level.unwrap_or(toml_config.logging.level),
            mode,
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.chunk_size == 0 {
            return Err(ConfigError::Invalid("chunk_size must be greater than 0".into()));
        }
        if self.max_connections == 0 {
            return Err(ConfigError::Invalid(
                "max_connections must be greater than 0".into(),
            ));
        }
        if u32::try_from(self.max_message_size).is_err() {
            return Err(ConfigError::Invalid(format!(
                "max_message_size {} does not fit the 32-bit length prefix",
                self.max_message_size
            )));
        }
        if let Mode::Bench(ref bench) = self.mode {
            if bench.clients == 0 {
                return Err(ConfigError::Invalid("clients must be greater than 0".into()));
            }
            if u32::try_from(bench.message_size).is_err() {
                return Err(ConfigError::Invalid(format!(
                    "message_size {} does not fit the 32-bit length prefix",
                    bench.message_size
                )));
            }
        }
        Ok(())
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
            ConfigError::Invalid(msg) => write!(f, "Invalid configuration: {msg}"),
        }
    }
}

impl std::error::Error for ConfigError {}
