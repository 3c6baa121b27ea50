use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::remote::RemoteBackend;
use crate::store::LocalStore;

use super::pending::PendingChanges;

/// Background replicator.
///
/// Constructed once at startup and shared: request paths enqueue into
/// `pending`, the spawned loop drains it on a fixed interval, and
/// `force_sync_now` runs the very same drain-and-apply under the same lock,
/// so a manual sync can never race the timer.
pub struct SyncEngine {
    local: Arc<LocalStore>,
    remote: Arc<dyn RemoteBackend>,
    pending: Arc<PendingChanges>,
    interval: Duration,
    /// Serializes flush cycles (timer vs. force-sync) and, with them, use of
    /// the remote connection.
    flush_gate: tokio::sync::Mutex<()>,
}

/// Handle to the spawned sync loop, owned by the process supervisor.
/// Dropping it does not stop the loop; call [`SyncHandle::shutdown`].
pub struct SyncHandle {
    stop: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl SyncHandle {
    /// Signal the loop to stop, let it flush whatever is still queued, and
    /// wait for it to finish.
    pub async fn shutdown(self) {
        let _ = self.stop.send(true);
        if let Err(e) = self.task.await {
            error!(error = %e, "sync task panicked");
        }
    }
}

impl SyncEngine {
    pub fn new(
        local: Arc<LocalStore>,
        remote: Arc<dyn RemoteBackend>,
        pending: Arc<PendingChanges>,
        interval: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            local,
            remote,
            pending,
            interval,
            flush_gate: tokio::sync::Mutex::new(()),
        })
    }

    /// One-time startup hydration: pull the whole remote dataset and replace
    /// the local cache with it.
    ///
    /// Failure is logged, not fatal - the process serves from whatever the
    /// local cache already holds rather than refusing to boot. Returns
    /// whether hydration succeeded.
    pub async fn hydrate(&self) -> bool {
        let snapshot = match self.remote.pull().await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!(error = %e, "startup hydration failed; serving from existing local cache");
                return false;
            }
        };

        let (sheets, members, attendance) = (
            snapshot.sheets.len(),
            snapshot.members.len(),
            snapshot.attendance.len(),
        );
        match self.local.replace_all(&snapshot) {
            Ok(()) => {
                info!(sheets, members, attendance, version = snapshot.data_version,
                      "hydrated local cache from remote");
                true
            }
            Err(e) => {
                error!(error = %e, "failed to load remote snapshot into local cache");
                false
            }
        }
    }

    /// Spawn the periodic flush loop. The returned handle must be kept and
    /// shut down explicitly; shutdown performs one final flush.
    pub fn spawn(self: &Arc<Self>) -> SyncHandle {
        let (stop, mut stopped) = watch::channel(false);
        let engine = Arc::clone(self);
        let task = tokio::spawn(async move {
            info!(interval_secs = engine.interval.as_secs(), "sync loop started");
            let mut ticker = tokio::time::interval(engine.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick of a tokio interval fires immediately; consume
            // it so the loop waits one full interval before its first flush.
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        engine.flush().await;
                    }
                    _ = stopped.changed() => {
                        break;
                    }
                }
            }
            // Last chance for anything still queued before the process exits.
            engine.flush().await;
            info!("sync loop stopped");
        });
        SyncHandle { stop, task }
    }

    /// Drain the pending buffer and apply it to the remote store in one
    /// transaction. On failure the whole batch is requeued ahead of newer
    /// items and retried next cycle; remote errors never propagate out.
    pub async fn flush(&self) {
        let _gate = self.flush_gate.lock().await;

        let batch = self.pending.drain();
        if batch.is_empty() {
            return;
        }
        let count = batch.len();

        match self.remote.apply(&batch).await {
            Ok(()) => {
                debug!(count, "flushed pending changes to remote");
            }
            Err(e) => {
                warn!(error = %e, count, "flush failed; batch requeued for next cycle");
                self.pending.requeue(batch);
            }
        }
    }

    /// Operator-triggered immediate flush. Same critical section as the
    /// timer path; returns once the attempt (success or requeue) completes.
    pub async fn force_sync_now(&self) {
        self.flush().await;
    }

    /// Number of queued, not-yet-replicated items. The only user-visible
    /// trace of a remote outage.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}
