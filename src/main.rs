use anyhow::{bail, Context, Result};
use clap::Parser;
use std::io::{self, BufRead, Write};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

mod args;
mod auth;
mod cfg;
mod check;
mod error;
mod health;
mod job;
mod metadata;
mod scheduler;
mod sheets;
mod snapshot;
mod source;
mod state;
#[cfg(test)]
mod testing;
mod transform;

use args::Args;
use cfg::Cfg;
use job::SyncJob;
use metadata::SyncMode;
use sheets::GoogleSheetStore;
use source::PgTableSource;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunMode {
    Once,
    Watch,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    init_logging(&args.log_level)?;

    info!("Starting table_mirror");

    let cfg = Cfg::load(&args)?;
    cfg.validate()?;

    if args.check {
        let mut source = PgTableSource::new(cfg.database.clone());
        let mut store = GoogleSheetStore::new(cfg.sheets.clone());
        let report = check::run_check(&mut source, &mut store, &cfg.table_name).await?;
        if !report.table_found() {
            bail!(
                "table '{}' not found in schema '{}'",
                cfg.table_name,
                cfg.database.schema
            );
        }
        info!(
            "All connection checks passed for database '{}' and spreadsheet {}",
            report.server.database,
            report.spreadsheet_url.as_deref().unwrap_or("(no url)")
        );
        return Ok(());
    }

    let mode = if args.once {
        RunMode::Once
    } else if args.watch {
        RunMode::Watch
    } else {
        prompt_for_mode(&cfg)?
    };

    let source = PgTableSource::new(cfg.database.clone());
    let store = GoogleSheetStore::new(cfg.sheets.clone());

    match mode {
        RunMode::Once => {
            let mut job = SyncJob::new(source, store, cfg.table_name.clone(), SyncMode::OneShot);
            let report = scheduler::run_once(&mut job).await?;
            info!(
                "Synced {} rows and {} columns from '{}' into '{}' of '{}'",
                report.rows,
                report.columns,
                cfg.table_name,
                cfg.data_worksheet_name(),
                cfg.sheets.spreadsheet_name
            );
        }
        RunMode::Watch => {
            let interval = cfg.sync_interval();
            let mut job = SyncJob::new(
                source,
                store,
                cfg.table_name.clone(),
                SyncMode::Interval(interval),
            );

            let cancel = CancellationToken::new();
            let trigger = cancel.clone();
            tokio::spawn(async move {
                wait_for_shutdown_signal().await;
                info!("Stopping sync...");
                trigger.cancel();
            });

            info!("Press Ctrl+C to stop the sync process");
            scheduler::run_interval(&mut job, interval, cancel).await?;
        }
    }

    info!("table_mirror finished");
    Ok(())
}

fn init_logging(level: &str) -> Result<()> {
    let filter = match level {
        "debug" => tracing::Level::DEBUG,
        "info" => tracing::Level::INFO,
        "warn" => tracing::Level::WARN,
        "error" => tracing::Level::ERROR,
        _ => tracing::Level::INFO,
    };

    tracing_subscriber::fmt()
        .with_max_level(filter)
        .init();

    Ok(())
}

/// Asks on the terminal whether to sync once or keep syncing.
fn prompt_for_mode(cfg: &Cfg) -> Result<RunMode> {
    let stdin = io::stdin();
    let mut stdout = io::stdout();

    writeln!(stdout, "Current configuration:")?;
    writeln!(stdout, "  Table: {}", cfg.table_name)?;
    writeln!(stdout, "  Spreadsheet: {}", cfg.sheets.spreadsheet_name)?;
    writeln!(stdout, "  Sync interval: {} minutes", cfg.sync_interval_minutes)?;
    writeln!(stdout, "Choose sync type:")?;
    writeln!(stdout, "1. Continuous sync (runs every {} minutes)", cfg.sync_interval_minutes)?;
    writeln!(stdout, "2. One-time sync (sync once and exit)")?;

    let mut lines = stdin.lock().lines();
    loop {
        write!(stdout, "Enter your choice (1 or 2): ")?;
        stdout.flush()?;

        let line = lines
            .next()
            .context("no sync type chosen: standard input closed")?
            .context("failed to read choice")?;
        match parse_choice(&line) {
            Some(mode) => return Ok(mode),
            None => writeln!(stdout, "Invalid choice. Please enter 1 or 2.")?,
        }
    }
}

fn parse_choice(input: &str) -> Option<RunMode> {
    match input.trim() {
        "1" => Some(RunMode::Watch),
        "2" => Some(RunMode::Once),
        _ => None,
    }
}

/// Wait for shutdown signals (Ctrl+C or SIGTERM)
async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C");
        }
        _ = terminate => {
            info!("Received SIGTERM");
        }
    }
}
