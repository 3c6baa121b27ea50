//! The remote store: a network-accessed Postgres database acting as the
//! durable system of record across restarts and redeploys.
//!
//! Only the sync engine (and a handful of best-effort direct writes) talk to
//! it; request-path reads and writes never wait on the network. The
//! `RemoteBackend` trait is the seam the engine is written against, so tests
//! can substitute an in-memory backend with injected failures.

pub mod store;

use async_trait::async_trait;
use thiserror::Error;

use crate::models::{AttendanceRecord, Sheet, TeamMember};
use crate::sync::SyncBatch;

pub use store::RemoteStore;

/// Errors from the remote store. These never reach a request path: the sync
/// engine catches them, requeues the batch and retries next cycle.
#[derive(Error, Debug)]
pub enum RemoteError {
    #[error("remote database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("remote store unavailable: {0}")]
    Unavailable(String),

    #[error("invalid remote row: {0}")]
    InvalidRow(String),
}

pub type RemoteResult<T> = Result<T, RemoteError>;

/// Full contents of the remote store, pulled once at startup to hydrate the
/// local cache. Presence rows are deliberately absent: they are ephemeral
/// and live only in the local store.
#[derive(Debug, Default)]
pub struct RemoteSnapshot {
    pub sheets: Vec<Sheet>,
    /// (sheet id, member) pairs across all sheets.
    pub members: Vec<(String, TeamMember)>,
    pub attendance: Vec<AttendanceRecord>,
    pub data_version: i64,
}

/// Operations the sync engine needs from a remote system of record.
#[async_trait]
pub trait RemoteBackend: Send + Sync {
    /// Read every row of every replicated table.
    async fn pull(&self) -> RemoteResult<RemoteSnapshot>;

    /// Apply one drained batch atomically: sheet upserts, then full roster
    /// replacements, then attendance upserts. All-or-nothing - on error
    /// nothing from the batch may be visible remotely.
    async fn apply(&self, batch: &SyncBatch) -> RemoteResult<()>;

    /// Persist the fencing counter so it survives process restarts.
    async fn set_data_version(&self, version: i64) -> RemoteResult<()>;

    async fn update_sheet_dates(
        &self,
        sheet_id: &str,
        start_date: &str,
        end_date: &str,
        updated_at: &str,
    ) -> RemoteResult<()>;

    async fn delete_sheet(&self, sheet_id: &str) -> RemoteResult<()>;
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    use super::*;
    use crate::models::AttendanceRecord;

    /// In-memory stand-in for the Postgres store. Records applied batches
    /// and can be told to fail the next apply, for requeue tests.
    #[derive(Default)]
    pub struct FakeRemote {
        pub fail_next_apply: AtomicBool,
        pub fail_next_pull: AtomicBool,
        pub applied_attendance: Mutex<Vec<AttendanceRecord>>,
        pub applied_sheets: Mutex<Vec<crate::sync::SheetUpsert>>,
        pub applied_rosters: Mutex<Vec<(String, usize)>>,
        pub snapshot: Mutex<RemoteSnapshot>,
        pub data_version: Mutex<i64>,
        pub apply_calls: AtomicBool,
    }

    #[async_trait]
    impl RemoteBackend for FakeRemote {
        async fn pull(&self) -> RemoteResult<RemoteSnapshot> {
            if self.fail_next_pull.swap(false, Ordering::SeqCst) {
                return Err(RemoteError::Unavailable("injected outage".to_string()));
            }
            let held = self.snapshot.lock().unwrap();
            Ok(RemoteSnapshot {
                sheets: held.sheets.clone(),
                members: held.members.clone(),
                attendance: held.attendance.clone(),
                data_version: held.data_version,
            })
        }

        async fn apply(&self, batch: &SyncBatch) -> RemoteResult<()> {
            self.apply_calls.store(true, Ordering::SeqCst);
            if self.fail_next_apply.swap(false, Ordering::SeqCst) {
                return Err(RemoteError::Unavailable("injected outage".to_string()));
            }
            self.applied_sheets
                .lock()
                .unwrap()
                .extend(batch.sheets.iter().cloned());
            self.applied_rosters.lock().unwrap().extend(
                batch
                    .team_members
                    .iter()
                    .map(|(id, members)| (id.clone(), members.len())),
            );
            self.applied_attendance
                .lock()
                .unwrap()
                .extend(batch.attendance.iter().cloned());
            Ok(())
        }

        async fn set_data_version(&self, version: i64) -> RemoteResult<()> {
            *self.data_version.lock().unwrap() = version;
            Ok(())
        }

        async fn update_sheet_dates(
            &self,
            _sheet_id: &str,
            _start_date: &str,
            _end_date: &str,
            _updated_at: &str,
        ) -> RemoteResult<()> {
            Ok(())
        }

        async fn delete_sheet(&self, _sheet_id: &str) -> RemoteResult<()> {
            Ok(())
        }
    }
}
