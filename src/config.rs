//! Runtime configuration, loaded from the environment.
//!
//! Only the remote database URL is mandatory; everything else has a sensible
//! default so a bare `DATABASE_URL=... rollcache` works. A `.env` file is
//! honored if present (loaded by the binary before this runs).

use std::path::PathBuf;

use anyhow::{Context, Result};

/// Application name used for the local database directory path.
const APP_NAME: &str = "rollcache";

/// Local SQLite file name inside the data directory.
const DB_FILE: &str = "local_cache.db";

/// Default seconds between background flushes of pending changes.
const DEFAULT_SYNC_INTERVAL_SECS: u64 = 3;

#[derive(Debug, Clone)]
pub struct Config {
    /// Postgres connection URL for the remote system of record.
    pub database_url: String,
    /// Path of the local SQLite cache file.
    pub local_db_path: PathBuf,
    /// Seconds between background flush cycles.
    pub sync_interval_secs: u64,
}

impl Config {
    pub fn load() -> Result<Self> {
        let database_url =
            std::env::var("DATABASE_URL").context("DATABASE_URL must be set (Postgres URL)")?;

        let local_db_path = match std::env::var("ROLLCACHE_DB_PATH") {
            Ok(path) => PathBuf::from(path),
            Err(_) => Self::default_db_path()?,
        };

        let sync_interval_secs = match std::env::var("ROLLCACHE_SYNC_INTERVAL_SECS") {
            Ok(raw) => raw
                .parse()
                .context("ROLLCACHE_SYNC_INTERVAL_SECS must be a whole number of seconds")?,
            Err(_) => DEFAULT_SYNC_INTERVAL_SECS,
        };

        Ok(Self {
            database_url,
            local_db_path,
            sync_interval_secs,
        })
    }

    fn default_db_path() -> Result<PathBuf> {
        let data_dir =
            dirs::data_dir().ok_or_else(|| anyhow::anyhow!("Could not find data directory"))?;
        Ok(data_dir.join(APP_NAME).join(DB_FILE))
    }
}
