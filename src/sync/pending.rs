use std::collections::HashMap;
use std::sync::Mutex;

use crate::models::{AttendanceRecord, TeamMember};

/// Sheet metadata queued for remote upsert, carrying the timestamps of the
/// local row so both stores agree on them. Date ranges travel outside the
/// buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SheetUpsert {
    pub sheet_id: String,
    pub title: String,
    pub tab_name: String,
    pub group_name: String,
    pub subgroup_name: String,
    pub created_at: String,
    pub updated_at: String,
}

/// Everything drained from the buffer for one flush cycle. Applied to the
/// remote store in order: sheets, then rosters, then attendance.
#[derive(Debug, Default)]
pub struct SyncBatch {
    pub sheets: Vec<SheetUpsert>,
    /// Full replacement roster per sheet.
    pub team_members: HashMap<String, Vec<TeamMember>>,
    pub attendance: Vec<AttendanceRecord>,
}

impl SyncBatch {
    pub fn is_empty(&self) -> bool {
        self.sheets.is_empty() && self.team_members.is_empty() && self.attendance.is_empty()
    }

    /// Number of queued items, the figure reported by the pending-sync
    /// diagnostic.
    pub fn len(&self) -> usize {
        self.sheets.len()
            + self.attendance.len()
            + self.team_members.values().map(Vec::len).sum::<usize>()
    }
}

/// In-memory buffer of not-yet-replicated mutations.
///
/// One mutex guards all three queues so an enqueue can never interleave with
/// a partially completed drain. Contents are process memory only: anything
/// still queued when the process dies ungracefully is lost, which is the
/// documented price of instant local writes.
#[derive(Debug, Default)]
pub struct PendingChanges {
    inner: Mutex<SyncBatch>,
}

impl PendingChanges {
    pub fn new() -> Self {
        Self::default()
    }

    fn locked(&self) -> std::sync::MutexGuard<'_, SyncBatch> {
        // Poisoning only happens if a panic occurred mid-enqueue; the queues
        // themselves are still structurally sound.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn enqueue_sheet(&self, sheet: SheetUpsert) {
        self.locked().sheets.push(sheet);
    }

    /// Queue a full roster replacement. Last write wins per sheet: a second
    /// save before the first syncs simply supersedes the queued list, since
    /// roster saves are always complete replacements anyway.
    pub fn enqueue_team_members(&self, sheet_id: &str, members: Vec<TeamMember>) {
        self.locked()
            .team_members
            .insert(sheet_id.to_string(), members);
    }

    pub fn enqueue_attendance(&self, record: AttendanceRecord) {
        self.locked().attendance.push(record);
    }

    pub fn enqueue_attendance_batch(&self, records: Vec<AttendanceRecord>) {
        self.locked().attendance.extend(records);
    }

    /// Atomically take everything queued, leaving the buffer empty. Items
    /// enqueued after this call land in the next cycle's batch.
    pub fn drain(&self) -> SyncBatch {
        std::mem::take(&mut *self.locked())
    }

    /// Put a failed batch back, ahead of anything queued since, so retried
    /// items are applied to the remote before newer ones.
    pub fn requeue(&self, mut failed: SyncBatch) {
        let mut queues = self.locked();

        failed.sheets.append(&mut queues.sheets);
        queues.sheets = failed.sheets;

        failed.attendance.append(&mut queues.attendance);
        queues.attendance = failed.attendance;

        // A roster queued after the failure is newer than the failed one and
        // already contains the complete member list, so it stays.
        for (sheet_id, members) in failed.team_members {
            queues.team_members.entry(sheet_id).or_insert(members);
        }
    }

    pub fn len(&self) -> usize {
        self.locked().len()
    }

    pub fn is_empty(&self) -> bool {
        self.locked().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::AttendanceStatus;

    fn record(person: &str, date: &str) -> AttendanceRecord {
        AttendanceRecord {
            sheet_id: "S1".to_string(),
            person_code: person.to_string(),
            date: date.to_string(),
            status: AttendanceStatus::Present,
            updated_at: String::new(),
            session_id: "s1".to_string(),
        }
    }

    fn roster(name: &str) -> Vec<TeamMember> {
        vec![TeamMember {
            first_name: name.to_string(),
            ..Default::default()
        }]
    }

    #[test]
    fn drain_empties_the_buffer_atomically() {
        let pending = PendingChanges::new();
        pending.enqueue_attendance(record("100", "2025-12-22"));
        pending.enqueue_sheet(SheetUpsert {
            sheet_id: "S1".to_string(),
            title: String::new(),
            tab_name: String::new(),
            group_name: String::new(),
            subgroup_name: String::new(),
            created_at: String::new(),
            updated_at: String::new(),
        });
        pending.enqueue_team_members("S1", roster("Alice"));
        assert_eq!(pending.len(), 3);

        let batch = pending.drain();
        assert_eq!(batch.len(), 3);
        assert!(pending.is_empty());
    }

    #[test]
    fn roster_queue_is_last_write_wins_per_sheet() {
        let pending = PendingChanges::new();
        pending.enqueue_team_members("S1", roster("Alice"));
        pending.enqueue_team_members("S1", roster("Bob"));
        pending.enqueue_team_members("S2", roster("Carol"));

        let batch = pending.drain();
        assert_eq!(batch.team_members.len(), 2);
        assert_eq!(batch.team_members["S1"][0].first_name, "Bob");
    }

    #[test]
    fn requeue_prepends_failed_items() {
        let pending = PendingChanges::new();
        pending.enqueue_attendance(record("100", "2025-12-22"));
        let failed = pending.drain();

        // Something newer arrives while the failed batch waits for retry.
        pending.enqueue_attendance(record("200", "2025-12-23"));
        pending.requeue(failed);

        let batch = pending.drain();
        assert_eq!(batch.attendance.len(), 2);
        assert_eq!(batch.attendance[0].person_code, "100");
        assert_eq!(batch.attendance[1].person_code, "200");
    }

    #[test]
    fn requeue_keeps_newer_roster_over_failed_one() {
        let pending = PendingChanges::new();
        pending.enqueue_team_members("S1", roster("Alice"));
        let failed = pending.drain();

        pending.enqueue_team_members("S1", roster("Bob"));
        pending.requeue(failed);

        let batch = pending.drain();
        assert_eq!(batch.team_members["S1"][0].first_name, "Bob");
    }

    #[test]
    fn requeue_restores_roster_when_nothing_newer_queued() {
        let pending = PendingChanges::new();
        pending.enqueue_team_members("S1", roster("Alice"));
        let failed = pending.drain();
        pending.requeue(failed);

        let batch = pending.drain();
        assert_eq!(batch.team_members["S1"][0].first_name, "Alice");
    }
}
