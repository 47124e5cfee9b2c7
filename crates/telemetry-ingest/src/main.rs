// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Sensor Telemetry Ingest CLI
//!
//! # Usage
//!
//! ```bash
//! # Listen for sensors on port 2000, storing into readings.db
//! telemetry-ingest --host 0.0.0.0 --port 2000 --dbname readings.db
//!
//! # Settings from a JSON file (CLI flags override it)
//! telemetry-ingest --config ingest.json --port 2001
//!
//! # Inspect the database without starting the listener
//! telemetry-ingest --dbname readings.db stats
//! telemetry-ingest --dbname readings.db tail -n 20
//! telemetry-ingest --dbname readings.db range \
//!     --from 2025-06-01T00:00:00.000000 --to 2025-06-02T00:00:00.000000
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use chrono::NaiveDateTime;
use telemetry_ingest::record::parse_timestamp;
use telemetry_ingest::{
    IngestServer, RecordStore, ServerConfig, SharedStore, SqliteStore, StoredReading,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "telemetry-ingest")]
#[command(author, version, about = "Sensor telemetry ingest server", long_about = None)]
#[command(subcommand_negates_reqs = true)]
struct Args {
    /// Host name or address to listen on
    #[arg(long, required_unless_present = "config")]
    host: Option<String>,

    /// TCP port to listen on
    #[arg(long, required_unless_present = "config")]
    port: Option<u16>,

    /// SQLite database file
    #[arg(long, required_unless_present = "config")]
    dbname: Option<PathBuf>,

    /// Configuration file (JSON format)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Longest accepted line in bytes
    #[arg(long)]
    max_line_length: Option<usize>,

    /// Malformed-line warnings logged per connection before suppressing
    #[arg(long)]
    malformed_report_limit: Option<u32>,

    /// Log level (trace, debug, info, warn, error); RUST_LOG takes precedence
    #[arg(long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Show the number of stored readings
    Stats,
    /// Print the most recent readings
    Tail {
        /// Number of readings to print
        #[arg(short = 'n', long, default_value_t = 10)]
        count: usize,
    },
    /// Print readings received within a time window (inclusive)
    Range {
        /// Window start, e.g. 2025-06-01T00:00:00.000000
        #[arg(long, value_parser = parse_time_arg)]
        from: NaiveDateTime,
        /// Window end, same format as --from
        #[arg(long, value_parser = parse_time_arg)]
        to: NaiveDateTime,
    },
}

fn parse_time_arg(text: &str) -> Result<NaiveDateTime, String> {
    parse_timestamp(text).map_err(|e| format!("expected YYYY-MM-DDTHH:MM:SS.ffffff: {}", e))
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let file_config = match &args.config {
        Some(path) => Some(
            ServerConfig::from_file(path)
                .with_context(|| format!("Failed to load config from {}", path.display()))?,
        ),
        None => None,
    };

    if let Some(cmd) = &args.command {
        init_tracing(args.log_level.as_deref().unwrap_or("info"));

        let db_path = args
            .dbname
            .clone()
            .or_else(|| file_config.as_ref().map(|c| c.db_path.clone()))
            .context("--dbname is required")?;
        return handle_command(cmd, &db_path).await;
    }

    let config = server_config(&args, file_config)?;
    init_tracing(&config.log_level);

    info!("Telemetry ingest starting...");
    info!("  Listen: {}", config.listen_address());
    info!("  Database: {}", config.db_path.display());
    if let Some(limit) = config.malformed_report_limit {
        info!("  Malformed-line reports: {} per connection", limit);
    }

    let store = SqliteStore::new(&config.db_path)?;
    let server = IngestServer::bind(config, SharedStore::new(store))
        .await
        .context("Failed to start listener")?;

    let handle = server.shutdown_handle();
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("Shutdown signal received, stopping server...");
        handle.shutdown();
    });

    let store = server.run().await?;

    match store.into_inner() {
        Some(store) => store.close()?,
        None => warn!("Store still referenced at shutdown; leaving connection to drop"),
    }

    info!("Telemetry ingest stopped");
    Ok(())
}

/// Merge CLI flags over the optional config file.
fn server_config(args: &Args, file_config: Option<ServerConfig>) -> Result<ServerConfig> {
    let mut config = match file_config {
        Some(config) => config,
        None => {
            let host = args.host.clone().context("--host is required")?;
            let port = args.port.context("--port is required")?;
            let db_path = args.dbname.clone().context("--dbname is required")?;
            ServerConfig::new(host, port, db_path)
        }
    };

    if let Some(host) = &args.host {
        config.host = host.clone();
    }
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(db_path) = &args.dbname {
        config.db_path = db_path.clone();
    }
    if let Some(max) = args.max_line_length {
        config.max_line_length = max;
    }
    if let Some(limit) = args.malformed_report_limit {
        config.malformed_report_limit = Some(limit);
    }
    if let Some(level) = &args.log_level {
        config.log_level = level.clone();
    }

    config.validate()?;
    Ok(config)
}

fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();
}

/// Resolves on ctrl-c, or SIGTERM on Unix.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for ctrl-c: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

async fn handle_command(cmd: &Commands, db_path: &Path) -> Result<()> {
    let store = SharedStore::new(SqliteStore::new(db_path)?);

    match cmd {
        Commands::Stats => {
            let (count, latest) = store
                .read(|s| Ok((s.count()?, s.recent(1)?)))
                .await?;
            println!("Total readings stored: {}", count);
            if let Some(latest) = latest.first() {
                println!("Latest reading: id={} at {}", latest.id, latest.event_time);
            }
        }
        Commands::Tail { count } => {
            let count = *count;
            let readings = store.read(move |s| s.recent(count)).await?;
            println!("Showing {} most recent readings:", readings.len());
            print_readings(readings.iter().rev());
        }
        Commands::Range { from, to } => {
            let (from, to) = (*from, *to);
            if from > to {
                anyhow::bail!("--from {} is after --to {}", from, to);
            }
            let readings = store.read(move |s| s.query_range(from, to)).await?;
            println!("Found {} readings between {} and {}:", readings.len(), from, to);
            print_readings(readings.iter());
        }
    }

    store
        .into_inner()
        .context("Store still referenced after command")?
        .close()
}

fn print_readings<'a>(readings: impl Iterator<Item = &'a StoredReading>) {
    for reading in readings {
        println!(
            "  id={}, time={}, payload={}",
            reading.id, reading.event_time, reading.payload
        );
    }
}
