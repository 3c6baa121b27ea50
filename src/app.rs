//! Application facade consumed by a request-routing layer.
//!
//! `App` ties the local store, the pending buffer and the sync engine
//! together and exposes the operations a route handler needs: load-or-create
//! sheet, get/set attendance (single and batched), roster saves, date range,
//! heartbeat (presence plus the incremental-vs-full sync decision),
//! force-sync and the pending-count diagnostic.
//!
//! Identity is not this layer's business: `email` and `session_id` arrive as
//! opaque strings from an auth collaborator and are used for attribution
//! only.

use std::sync::Arc;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::models::{
    ActiveUser, AttendanceChange, AttendanceMap, AttendanceRecord, AttendanceStatus,
    AttendanceUpdate, Sheet, TeamMember,
};
use crate::remote::RemoteBackend;
use crate::store::{now_rfc3339, unix_now, LocalStore};
use crate::sync::{PendingChanges, SheetUpsert, SyncEngine};

fn default_email() -> String {
    "Anonymous".to_string()
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadSheetRequest {
    pub sheet_id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub tab_name: String,
    #[serde(default)]
    pub group_name: String,
    #[serde(default)]
    pub subgroup_name: String,
    /// The complete roster as imported; replaces whatever was saved before.
    #[serde(default)]
    pub members: Vec<TeamMember>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SheetBundle {
    pub sheet: Option<Sheet>,
    pub team_members: Vec<TeamMember>,
    pub attendance: AttendanceMap,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeartbeatRequest {
    pub session_id: String,
    #[serde(default = "default_email")]
    pub email: String,
    pub sheet_id: String,
    /// The data version the client saw at its last successful load.
    pub data_version: i64,
    /// Timestamp of the client's last poll; empty on first contact.
    #[serde(default)]
    pub last_sync: String,
}

/// What the client should do with its cached view.
#[derive(Debug, Serialize)]
#[serde(tag = "syncMode", rename_all = "camelCase")]
pub enum SyncPayload {
    /// The dataset was replaced wholesale (version fence tripped); discard
    /// everything and start from this bundle.
    #[serde(rename_all = "camelCase")]
    Full {
        sheet: Option<Sheet>,
        team_members: Vec<TeamMember>,
        attendance: AttendanceMap,
    },
    /// Merge other sessions' changes into the cached view.
    Incremental { changes: Vec<AttendanceChange> },
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HeartbeatResponse {
    pub data_version: i64,
    /// Other live viewers of the same sheet, de-duplicated.
    pub active_users: Vec<String>,
    #[serde(flatten)]
    pub sync: SyncPayload,
}

/// The core, constructed once at startup. Local writes return as soon as
/// SQLite commits; replication happens behind them on the engine's clock.
pub struct App {
    local: Arc<LocalStore>,
    remote: Arc<dyn RemoteBackend>,
    pending: Arc<PendingChanges>,
    engine: Arc<SyncEngine>,
}

impl App {
    pub fn new(
        local: Arc<LocalStore>,
        remote: Arc<dyn RemoteBackend>,
        pending: Arc<PendingChanges>,
        engine: Arc<SyncEngine>,
    ) -> Self {
        Self {
            local,
            remote,
            pending,
            engine,
        }
    }

    // ========================================================================
    // Sheets
    // ========================================================================

    /// Load an existing sheet or create it, then save the submitted roster.
    /// Returns the bundle the client renders from, including any attendance
    /// already on record.
    pub fn load_or_create_sheet(&self, req: LoadSheetRequest) -> Result<SheetBundle> {
        let sheet = self.local.get_or_create_sheet(
            &req.sheet_id,
            &req.title,
            &req.tab_name,
            &req.group_name,
            &req.subgroup_name,
        )?;
        self.local.save_team_members(&req.sheet_id, &req.members)?;

        // Queue from the stored row, not the request: the remote copy gets
        // the exact timestamps the local write produced.
        self.pending.enqueue_sheet(SheetUpsert {
            sheet_id: sheet.sheet_id.clone(),
            title: sheet.title.clone(),
            tab_name: sheet.tab_name.clone(),
            group_name: sheet.group_name.clone(),
            subgroup_name: sheet.subgroup_name.clone(),
            created_at: sheet.created_at.clone(),
            updated_at: sheet.updated_at.clone(),
        });
        self.pending
            .enqueue_team_members(&req.sheet_id, req.members.clone());

        let attendance = self.local.get_attendance(&req.sheet_id)?;
        Ok(SheetBundle {
            sheet: Some(sheet),
            team_members: req.members,
            attendance,
        })
    }

    pub fn get_full_sheet_data(&self, sheet_id: &str) -> Result<SheetBundle> {
        let (sheet, team_members, attendance) = self.local.get_full_sheet_data(sheet_id)?;
        Ok(SheetBundle {
            sheet,
            team_members,
            attendance,
        })
    }

    pub fn get_all_sheets(&self) -> Result<Vec<Sheet>> {
        Ok(self.local.get_all_sheets()?)
    }

    pub fn sheet_exists(&self, sheet_id: &str) -> Result<bool> {
        Ok(self.local.sheet_exists(sheet_id)?)
    }

    /// Delete a sheet everywhere. The remote delete is immediate and
    /// best-effort; a failure there is logged and the local delete stands.
    pub async fn delete_sheet(&self, sheet_id: &str) -> Result<()> {
        self.local.delete_sheet(sheet_id)?;
        if let Err(e) = self.remote.delete_sheet(sheet_id).await {
            warn!(error = %e, sheet_id, "remote sheet delete failed");
        }
        info!(sheet_id, "sheet deleted");
        Ok(())
    }

    pub fn get_date_range(&self, sheet_id: &str) -> Result<Option<(String, String)>> {
        let sheet = self.local.get_sheet(sheet_id)?;
        Ok(sheet.map(|s| (s.start_date, s.end_date)))
    }

    /// Date-range edits bypass the pending buffer: local write first, then a
    /// direct best-effort remote update.
    pub async fn set_date_range(&self, sheet_id: &str, start: &str, end: &str) -> Result<()> {
        self.local.update_sheet_dates(sheet_id, start, end)?;
        if let Err(e) = self
            .remote
            .update_sheet_dates(sheet_id, start, end, &now_rfc3339())
            .await
        {
            warn!(error = %e, sheet_id, "remote date-range update failed");
        }
        Ok(())
    }

    // ========================================================================
    // Team members
    // ========================================================================

    pub fn get_team_members(&self, sheet_id: &str) -> Result<Vec<TeamMember>> {
        Ok(self.local.get_team_members(sheet_id)?)
    }

    pub fn save_team_members(&self, sheet_id: &str, members: Vec<TeamMember>) -> Result<()> {
        self.local.save_team_members(sheet_id, &members)?;
        self.pending.enqueue_team_members(sheet_id, members);
        Ok(())
    }

    // ========================================================================
    // Attendance
    // ========================================================================

    /// Mark one person on one date. The timestamp is assigned here, at the
    /// local write, and travels unchanged to the remote store.
    pub fn set_attendance(
        &self,
        sheet_id: &str,
        person_code: &str,
        date: &str,
        status: AttendanceStatus,
        session_id: &str,
    ) -> Result<AttendanceRecord> {
        let record = AttendanceRecord {
            sheet_id: sheet_id.to_string(),
            person_code: person_code.to_string(),
            date: date.to_string(),
            status,
            updated_at: now_rfc3339(),
            session_id: session_id.to_string(),
        };
        self.local.upsert_attendance(&record)?;
        self.pending.enqueue_attendance(record.clone());
        Ok(record)
    }

    /// Batched variant; the whole batch shares one timestamp and session.
    pub fn set_attendance_batch(
        &self,
        sheet_id: &str,
        updates: &[AttendanceUpdate],
        session_id: &str,
    ) -> Result<usize> {
        if updates.is_empty() {
            return Ok(0);
        }
        let written =
            self.local
                .upsert_attendance_batch(sheet_id, updates, &now_rfc3339(), session_id)?;
        let count = written.len();
        self.pending.enqueue_attendance_batch(written);
        Ok(count)
    }

    pub fn get_attendance(&self, sheet_id: &str) -> Result<AttendanceMap> {
        Ok(self.local.get_attendance(sheet_id)?)
    }

    pub fn get_attendance_changes_since(
        &self,
        sheet_id: &str,
        since: &str,
        exclude_session: &str,
    ) -> Result<Vec<AttendanceChange>> {
        Ok(self
            .local
            .get_attendance_changes_since(sheet_id, since, exclude_session)?)
    }

    // ========================================================================
    // Heartbeat
    // ========================================================================

    /// One client poll: record presence, then decide between an incremental
    /// diff and a full reload.
    ///
    /// A data-version mismatch means the dataset was replaced out-of-band
    /// (an administrative restore), so an incremental diff would be
    /// meaningless. The client gets the full bundle and the new version.
    /// Otherwise it gets only what *other* sessions changed since its last
    /// poll.
    pub fn heartbeat(&self, req: &HeartbeatRequest) -> Result<HeartbeatResponse> {
        self.local.touch_active_user(&ActiveUser {
            session_id: req.session_id.clone(),
            email: req.email.clone(),
            sheet_id: req.sheet_id.clone(),
            last_seen: unix_now(),
        })?;

        let current = self.local.data_version()?;
        let sync = if req.data_version != current {
            let (sheet, team_members, attendance) =
                self.local.get_full_sheet_data(&req.sheet_id)?;
            SyncPayload::Full {
                sheet,
                team_members,
                attendance,
            }
        } else {
            SyncPayload::Incremental {
                changes: self.local.get_attendance_changes_since(
                    &req.sheet_id,
                    &req.last_sync,
                    &req.session_id,
                )?,
            }
        };

        let active_users = self
            .local
            .active_users_for_sheet(&req.sheet_id, &req.session_id)?;

        Ok(HeartbeatResponse {
            data_version: current,
            active_users,
            sync,
        })
    }

    // ========================================================================
    // Versioning & diagnostics
    // ========================================================================

    pub fn data_version(&self) -> Result<i64> {
        Ok(self.local.data_version()?)
    }

    /// Bump the fencing counter after a restore. The new value is pushed to
    /// the remote store best-effort so it survives a restart.
    pub async fn increment_data_version(&self) -> Result<i64> {
        let version = self.local.increment_data_version()?;
        if let Err(e) = self.remote.set_data_version(version).await {
            warn!(error = %e, version, "failed to persist data version remotely");
        }
        info!(version, "data version incremented");
        Ok(version)
    }

    pub fn pending_sync_count(&self) -> usize {
        self.pending.len()
    }

    /// Immediate flush of the pending buffer, through the same critical
    /// section as the timer-driven flush.
    pub async fn force_sync_now(&self) {
        self.engine.force_sync_now().await;
    }
}
