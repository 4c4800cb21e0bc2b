//! # pulse
//!
//! Command-line front end for the telemetry cache: producers queue points,
//! `sync` pushes them to the remote stream service, `daemon` keeps the
//! scheduled sync running.

#![deny(unsafe_code)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::Level;

use pulse_core::security::redact_value;
use pulse_remote::http::HttpTimeouts;
use pulse_remote::HttpConnector;
use pulse_settings::PulseSettings;
use pulse_sync::{Cache, SyncOutcome};
use pulse_telemetry::{init_telemetry, TelemetryConfig, WarningLog, WarningQuery};

/// Local write-behind telemetry cache.
#[derive(Parser, Debug)]
#[command(name = "pulse", about = "Local telemetry cache with remote sync")]
struct Cli {
    /// Settings file (defaults to `~/.pulse/settings.json`).
    #[arg(long, global = true)]
    settings: Option<PathBuf>,

    /// Cache database, overriding settings and environment.
    #[arg(long, global = true)]
    db_path: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Register a stream (or replace its schema).
    EnsureStream {
        name: String,
        #[arg(long, default_value = "{}")]
        schema: String,
    },
    /// Queue one data point.
    Insert {
        stream: String,
        payload: String,
        /// Milliseconds since the epoch; defaults to now.
        #[arg(long)]
        timestamp_ms: Option<i64>,
    },
    /// Number of queued points.
    Size,
    /// Read a setting from the cache's KV store.
    Get { key: String },
    /// Write a setting to the cache's KV store.
    Set { key: String, value: String },
    /// Store the device identity (`owner/device`) and API key.
    Credentials { identity: String, api_key: String },
    /// Run one sync pass now.
    Sync,
    /// Persist a sync schedule; `daemon` runs it.
    EnableSync {
        #[arg(long)]
        period_ms: i64,
    },
    /// Turn the sync schedule off.
    DisableSync,
    /// Run the persisted schedule until interrupted.
    Daemon,
    /// Show persisted warnings and errors.
    Logs {
        #[arg(long)]
        level: Option<String>,
        #[arg(long)]
        target: Option<String>,
        #[arg(long)]
        stream: Option<String>,
        /// RFC 3339 lower bound.
        #[arg(long)]
        since: Option<String>,
        #[arg(long, default_value = "50")]
        limit: u32,
    },
    /// Drop every queued point.
    Clear,
}

fn load_settings(cli: &Cli) -> Result<PulseSettings> {
    let mut settings = match &cli.settings {
        Some(path) => pulse_settings::load_settings_from_path(path),
        None => pulse_settings::load_settings(),
    }
    .context("Failed to load settings")?;
    if let Some(db_path) = &cli.db_path {
        settings.database_path.clone_from(db_path);
    }
    Ok(settings)
}

fn telemetry_config(settings: &PulseSettings, json: bool) -> TelemetryConfig {
    TelemetryConfig {
        log_level: settings.logging.level.parse().unwrap_or(Level::INFO),
        log_to_sqlite: settings.logging.persist_warnings,
        log_db_path: settings.logging.db_path.clone(),
        json,
        ..TelemetryConfig::default()
    }
}

fn open_cache(settings: &PulseSettings) -> Result<Cache> {
    let timeouts = HttpTimeouts {
        connect: Duration::from_millis(settings.sync.connect_timeout_ms),
        request: Duration::from_millis(settings.sync.call_timeout_ms),
    };
    let connector = Arc::new(HttpConnector::new(timeouts));
    Cache::open(settings, connector).with_context(|| {
        format!(
            "Failed to open cache database: {}",
            settings.database_path.display()
        )
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = load_settings(&cli)?;
    let daemon = matches!(cli.command, Command::Daemon);
    let _telemetry = init_telemetry(telemetry_config(&settings, daemon));

    let cache = open_cache(&settings)?;

    match cli.command {
        Command::EnsureStream { name, schema } => {
            cache.ensure_stream(&name, &schema)?;
        }
        Command::Insert {
            stream,
            payload,
            timestamp_ms,
        } => {
            let timestamp_ms =
                timestamp_ms.unwrap_or_else(|| chrono::Utc::now().timestamp_millis());
            cache.insert(&stream, timestamp_ms, &payload)?;
        }
        Command::Size => println!("{}", cache.size()?),
        Command::Get { key } => {
            let value = cache.get_key(&key)?;
            println!("{}", redact_value(&key, &value));
        }
        Command::Set { key, value } => cache.set_key(&key, &value)?,
        Command::Credentials { identity, api_key } => {
            cache.set_credentials(&identity, &api_key)?;
        }
        Command::Sync => match cache.sync_now().await {
            SyncOutcome::Completed(report) => {
                println!(
                    "synced {} points over {} streams ({} duplicates skipped)",
                    report.points_sent, report.streams_synced, report.duplicates_skipped
                );
                if !report.is_clean() {
                    for failure in &report.failures {
                        eprintln!("stream {} failed: {}", failure.stream, failure.error);
                    }
                    bail!("{} streams failed to sync", report.failures.len());
                }
            }
            SyncOutcome::Failed(e) => bail!("sync failed: {e}"),
            SyncOutcome::Coalesced | SyncOutcome::Skipped => {
                println!("a sync pass is already running");
            }
        },
        Command::EnableSync { period_ms } => {
            if !cache.enable_scheduled_sync(period_ms)? {
                bail!("sync period must be positive, got {period_ms}");
            }
            println!("scheduled sync every {period_ms} ms (runs under `pulse daemon`)");
        }
        Command::DisableSync => cache.disable_scheduled_sync()?,
        Command::Daemon => {
            if !cache.resume_scheduled_sync()? {
                tracing::warn!("scheduled sync is disabled; waiting for interrupt only");
            }
            tracing::info!("pulse daemon ready");
            tokio::signal::ctrl_c()
                .await
                .context("Failed to listen for ctrl+c")?;
            tracing::info!("shutting down");
            // Dropping the cache cancels the timer without touching sync_enabled
            drop(cache);
        }
        Command::Clear => println!("cleared {} points", cache.clear()?),
        Command::Logs {
            level,
            target,
            stream,
            since,
            limit,
        } => {
            let log = WarningLog::open(&settings.logging.db_path)
                .context("Failed to open log database")?;
            let records = log.query(&WarningQuery {
                level,
                target,
                stream,
                since,
                limit: Some(limit),
            })?;
            for record in records {
                println!("{}", serde_json::to_string(&record)?);
            }
        }
    }

    Ok(())
}
