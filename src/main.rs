//! # DSU Server
//!
//! Serve scripted virtual controllers to DSU (cemuhook) clients such as
//! emulators and input testers.

use std::path::PathBuf;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

use dsu_server::config::{Config, LoggingConfig};
use dsu_server::controller::SlotStore;
use dsu_server::lifecycle::catalog::ScriptCatalog;
use dsu_server::lifecycle::SlotLifecycle;
use dsu_server::server::{DsuServer, ServerOptions};

/// Config file read when no path is given on the command line
const DEFAULT_CONFIG_PATH: &str = "dsu-server.toml";

/// Main entry point for the DSU server
///
/// # Control Flow
///
/// 1. **Initialization**
///    - Load configuration (first argument, else `dsu-server.toml`, else defaults)
///    - Set up logging to stdout and, if configured, a daily log file
///    - Register slot profiles and start the configured slot scripts
///
/// 2. **Serving**
///    - Answer DSU requests and push pad data until Ctrl+C
///
/// 3. **Graceful Shutdown**
///    - Stop the server loop and log its counters
///    - Cancel every script and wait for them to finish
///
/// # Errors
///
/// Returns error if:
/// - The configuration file exists but is invalid
/// - A slot names an unknown script
/// - The UDP socket cannot be bound
///
/// # Examples
///
/// ```bash
/// cargo run --release -- dsu-server.toml
/// ```
///
/// Expected output:
/// ```text
/// INFO dsu_server: DSU Server v0.1.0 starting...
/// INFO dsu_server::lifecycle: Started script 'circle_loop' on slot 0
/// INFO dsu_server::server: DSU server 5E4FE401 listening on 0.0.0.0:26760
/// ```
#[tokio::main]
async fn main() -> Result<()> {
    let (config, source) = load_config()?;
    let _log_guard = init_logging(&config.logging)?;

    info!("DSU Server v{} starting...", env!("CARGO_PKG_VERSION"));
    match source {
        Some(path) => info!("Loaded configuration from {}", path.display()),
        None => info!("No configuration file found, using defaults"),
    }

    let (store, events) = SlotStore::new();
    for slot in &config.slots {
        store.set_profile(slot.index, slot.profile()?);
    }

    let lifecycle = SlotLifecycle::new(store, ScriptCatalog::with_builtins());
    for slot in &config.slots {
        let assignment = slot.assignment()?;
        lifecycle
            .configure_slot(slot.index, &assignment)
            .await
            .with_context(|| format!("Failed to configure slot {}", slot.index))?;
    }

    let server = DsuServer::bind(
        config.bind_addr()?,
        lifecycle.clone(),
        events,
        ServerOptions::from(&config),
    )
    .await?;

    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Received Ctrl+C, shutting down..."),
            Err(e) => warn!("Failed to listen for Ctrl+C: {}", e),
        }
        signal.cancel();
    });

    let result = server.run(shutdown).await;
    lifecycle.stop_all().await;
    result?;

    Ok(())
}

/// Load the config named on the command line, or the default file if present
fn load_config() -> Result<(Config, Option<PathBuf>)> {
    if let Some(path) = std::env::args_os().nth(1).map(PathBuf::from) {
        let config = Config::load(&path)
            .with_context(|| format!("Failed to load configuration from {}", path.display()))?;
        return Ok((config, Some(path)));
    }

    let path = PathBuf::from(DEFAULT_CONFIG_PATH);
    if path.exists() {
        let config = Config::load(&path)?;
        return Ok((config, Some(path)));
    }

    Ok((Config::default(), None))
}

/// Log to stdout, plus a daily rolling file when a directory is configured
///
/// `RUST_LOG` overrides the configured level. The returned guard flushes the
/// file writer on drop and must live until exit.
fn init_logging(logging: &LoggingConfig) -> Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&logging.level))
        .context("Invalid log level")?;

    let (file_layer, guard) = match &logging.directory {
        Some(directory) => {
            let appender = tracing_appender::rolling::daily(directory, &logging.file_prefix);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer().with_ansi(false).with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .with(file_layer)
        .init();

    Ok(guard)
}
