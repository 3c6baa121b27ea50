//! Rollcache - a multi-user attendance tracker core built around a local
//! SQLite cache with background replication to Postgres.
//!
//! Every read and write is served from the local store; mutations are queued
//! and flushed to the remote system of record by a background task. See
//! [`app::App`] for the operation surface and [`sync::SyncEngine`] for the
//! replication loop.

pub mod app;
pub mod config;
pub mod models;
pub mod remote;
pub mod store;
pub mod sync;

pub use app::App;
pub use config::Config;
pub use remote::{RemoteBackend, RemoteStore};
pub use store::LocalStore;
pub use sync::{PendingChanges, SyncEngine, SyncHandle};
