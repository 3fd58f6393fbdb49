//! chunk-echo: a length-prefixed TCP echo server
//!
//! Every message is a 4-byte little-endian length followed by that many
//! payload bytes, and the server writes each message back unchanged.
//!
//! Features:
//! - Chunked receive buffers that grow and shrink with the data in flight
//! - Three runtimes: thread-per-connection, mio event loop, tokio tasks
//! - A closed-loop load generator (`bench` subcommand)
//! - Configuration via CLI arguments or TOML file

mod bench;
mod config;
mod protocols;
mod runtime;

use config::{Config, Mode};
use tracing::info;
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::load()?;

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    if let Mode::Bench(args) = &config.mode {
        let report = bench::run(args)?;
        println!("{report}");
        return Ok(());
    }

    serve(config)
}

fn serve(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    info!(
        listen = %config.listen,
        runtime = ?config.runtime,
        max_message_size = config.max_message_size,
        chunk_size = config.chunk_size,
        "Starting chunk-echo server"
    );

    runtime::run(config)?;
    Ok(())
}
