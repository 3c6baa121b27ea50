//! The local store: an embedded SQLite database serving every read and write
//! with no network round trip.
//!
//! All writes land here synchronously and durably before the calling
//! operation returns; replication to the remote system of record happens
//! later, from the sync engine. Each logical operation opens, uses and drops
//! its own connection, so request threads never share a transaction.

pub mod error;
pub mod local;

pub use error::StoreError;
pub use local::LocalStore;

pub(crate) use local::{now_rfc3339, unix_now};
