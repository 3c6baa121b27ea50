//! Rollcache daemon entry point.
//!
//! Boots the local cache, hydrates it from the remote store, starts the
//! background sync loop and runs until Ctrl+C, flushing any queued changes
//! on the way out. Two maintenance subcommands run one-shot and exit:
//! `--status` and `--bump-version`.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use rollcache::app::App;
use rollcache::config::Config;
use rollcache::remote::{RemoteBackend, RemoteStore};
use rollcache::store::LocalStore;
use rollcache::sync::{PendingChanges, SyncEngine};

/// Initialize the tracing subscriber for logging
fn init_tracing() {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();
    init_tracing();

    let config = Config::load()?;
    let local = Arc::new(LocalStore::open(&config.local_db_path)?);
    let store = Arc::new(RemoteStore::connect(&config.database_url)?);
    let remote: Arc<dyn RemoteBackend> = store.clone();
    let pending = Arc::new(PendingChanges::new());
    let engine = SyncEngine::new(
        local.clone(),
        remote.clone(),
        pending.clone(),
        Duration::from_secs(config.sync_interval_secs),
    );
    let app = App::new(local, remote.clone(), pending, engine.clone());

    let args: Vec<String> = std::env::args().collect();
    match args.get(1).map(String::as_str) {
        Some("--status") => return status(&app),
        Some("--bump-version") => return bump_version(&app).await,
        Some(other) => anyhow::bail!("unknown argument: {other}"),
        None => {}
    }

    // Missing remote tables just mean early flushes fail and requeue, so a
    // schema failure here is not fatal.
    if let Err(e) = store.ensure_schema().await {
        warn!(error = %e, "could not ensure remote schema; will retry via sync");
    }

    engine.hydrate().await;
    let handle = engine.spawn();
    info!(
        db = %config.local_db_path.display(),
        interval_secs = config.sync_interval_secs,
        "rollcache ready"
    );

    tokio::signal::ctrl_c().await?;
    info!("shutting down; flushing pending changes");
    handle.shutdown().await;
    Ok(())
}

fn status(app: &App) -> Result<()> {
    let version = app.data_version()?;
    let sheets = app.get_all_sheets()?;
    println!("data version: {version}");
    println!("sheets: {}", sheets.len());
    for sheet in &sheets {
        println!("  {} {}", sheet.sheet_id, sheet.title);
    }
    println!("pending changes: {}", app.pending_sync_count());
    Ok(())
}

async fn bump_version(app: &App) -> Result<()> {
    let version = app.increment_data_version().await?;
    println!("data version is now {version}");
    Ok(())
}
