//! # msgsync-agent
//!
//! Agent binary: wires the store worker, change watcher, sync client, and
//! driver together, and fronts them with a small CLI.

#![deny(unsafe_code)]

mod automation;
mod commands;
mod driver;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::sync::mpsc;
use tracing::{info, warn};

use msgsync_client::{ClientConfig, SyncClient};
use msgsync_settings::Settings;
use msgsync_store::StoreWorker;
use msgsync_watch::StoreWatcher;

use crate::driver::SyncDriver;

/// Local message store sync agent.
#[derive(Parser, Debug)]
#[command(name = "msgsync-agent", about = "Sync a local message store with a remote endpoint")]
struct Cli {
    /// Path to the settings file (defaults to `~/.msgsync/settings.json`).
    #[arg(long)]
    settings: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<CliCommand>,
}

#[derive(Subcommand, Debug)]
enum CliCommand {
    /// Run the sync agent (the default when no command is given).
    Run,
    /// Fetch a page of records from the store as JSON.
    Fetch {
        /// Number of records to fetch.
        #[arg(long, short = 'n', default_value_t = 10)]
        limit: usize,
        /// Fetch records before this position (descending).
        #[arg(long, short)]
        before: Option<i64>,
        /// Fetch records after this position (ascending).
        #[arg(long, short)]
        since: Option<i64>,
    },
    /// Send a message through the automation surface.
    Send {
        /// Recipient phone number or email.
        #[arg(long, short)]
        to: String,
        /// Message text.
        #[arg(long, short)]
        message: String,
    },
    /// Show store info.
    Info,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let settings_path = args.settings.unwrap_or_else(msgsync_settings::settings_path);
    let settings = msgsync_settings::load_settings_from_path(&settings_path)
        .context("Failed to load settings")?;

    match args.command.unwrap_or(CliCommand::Run) {
        CliCommand::Run => run_agent(settings, settings_path).await,
        CliCommand::Fetch {
            limit,
            before,
            since,
        } => commands::fetch(&settings, since, before, limit),
        CliCommand::Send { to, message } => commands::send(&to, &message).await,
        CliCommand::Info => commands::info(&settings),
    }
}

/// Run the agent until interrupted.
async fn run_agent(mut settings: Settings, settings_path: PathBuf) -> Result<()> {
    let worker = Arc::new(StoreWorker::start(&settings.db_path).with_context(|| {
        format!(
            "Cannot open the message store at {}. Ensure Full Disk Access is granted.",
            settings.db_path.display()
        )
    })?);

    // A fresh install starts syncing from the current head of the store so
    // the whole history is not replayed.
    if settings.last_message_rowid == 0 {
        if let Some(rowid_rx) = worker.request_latest_rowid() {
            settings.last_message_rowid = rowid_rx.await.unwrap_or(0);
            settings
                .save_to_path(&settings_path)
                .context("Failed to persist initial sync cursor")?;
            info!(cursor = settings.last_message_rowid, "initialized sync cursor");
        }
    }

    let client_config = ClientConfig {
        url: settings.websocket_url.clone(),
        attachments_dir: settings.attachments_dir.clone(),
        failure_log: msgsync_settings::failure_log_path(),
    };
    let (client, handle) = SyncClient::new(
        client_config,
        Some(Arc::clone(&worker)),
        Arc::new(automation::OsaScriptSender),
    );
    let client_task = tokio::spawn(client.run());

    let (signal_tx, signal_rx) = mpsc::channel(16);

    let watcher = if settings.use_file_watcher {
        match StoreWatcher::start(
            &settings.db_path,
            Duration::from_millis(settings.debounce_ms),
            signal_tx.clone(),
        ) {
            Ok(watcher) => Some(watcher),
            Err(err) => {
                warn!(error = %err, "file watcher unavailable, falling back to polling");
                None
            }
        }
    } else {
        None
    };
    let poll_task = if watcher.is_none() {
        Some(tokio::spawn(poll_loop(
            signal_tx.clone(),
            Duration::from_millis(settings.poll_interval_ms),
        )))
    } else {
        None
    };

    // One initial signal picks up anything written while the agent was down.
    let _ = signal_tx.send(()).await;

    let driver = SyncDriver::new(
        Arc::clone(&worker),
        handle.clone(),
        settings,
        settings_path,
    );
    let driver_task = tokio::spawn(driver.run(signal_rx));

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;
    info!("shutting down");

    if let Some(watcher) = watcher {
        watcher.stop();
    }
    if let Some(task) = poll_task {
        task.abort();
    }
    drop(signal_tx);
    let _ = driver_task.await;

    handle.disconnect().await;
    let _ = client_task.await;
    worker.stop();

    info!("shutdown complete");
    Ok(())
}

/// Interval fallback when filesystem notifications are unavailable.
async fn poll_loop(signal_tx: mpsc::Sender<()>, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        let _ = ticker.tick().await;
        if signal_tx.send(()).await.is_err() {
            break;
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
