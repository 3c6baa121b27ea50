//! Background replication to the remote store.
//!
//! Mutations hit the local store synchronously and are queued in
//! `PendingChanges`; the `SyncEngine` drains that buffer on a fixed interval
//! and applies it to the remote store in one transaction, requeueing the
//! whole batch if the remote is unreachable. The engine also performs the
//! one-time startup hydration pull.

pub mod engine;
pub mod pending;

pub use engine::{SyncEngine, SyncHandle};
pub use pending::{PendingChanges, SheetUpsert, SyncBatch};
