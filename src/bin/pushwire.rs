use std::{error::Error, io, path::PathBuf, sync::Arc};

use clap::Parser;
use log::info;
use pushwire::{Config, Dispatcher, export_lines};

/// Push every line read from stdin to a ZeroMQ PULL sink.
#[derive(Debug, Parser)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to a TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// Sink endpoint, e.g. tcp://127.0.0.1:5555
    #[arg(short, long)]
    server: Option<String>,
    /// Payload format: raw or structured
    #[arg(short, long)]
    format: Option<String>,
    /// Maximum number of pooled connections
    #[arg(long)]
    max_connections: Option<usize>,
    /// Connect at startup instead of on the first message
    #[arg(long)]
    eager: bool,
    /// Number of threads dispatching concurrently
    #[arg(short, long, default_value_t = 1)]
    workers: usize,
}

fn main() -> Result<(), Box<dyn Error>> {
    // Initialize env_logger; For logging to STDOUT/STDERR
    env_logger::init();

    let cli = Cli::parse();
    let mut config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    if let Some(server) = cli.server {
        config.server = server;
    }
    if let Some(format) = cli.format {
        config.format = format;
    }
    if let Some(max) = cli.max_connections {
        config.pool.max = max;
        config.pool.start = config.pool.start.min(max);
    }
    if cli.eager {
        config.lazy_connect = false;
    }

    let settings = config.validate()?;
    let dispatcher = Arc::new(Dispatcher::from_settings(&settings)?);
    info!(
        "exporting {} payloads to {}",
        settings.mode, settings.endpoint
    );

    let handle = Arc::clone(&dispatcher);
    ctrlc::set_handler(move || {
        handle.shutdown();
        std::process::exit(130);
    })?;

    let summary = export_lines(io::stdin().lock(), &dispatcher, cli.workers);
    dispatcher.shutdown();

    eprintln!("{summary}");
    Ok(())
}
