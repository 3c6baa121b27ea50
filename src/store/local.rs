use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use chrono::{SecondsFormat, Utc};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, warn};

use crate::models::{
    ActiveUser, AttendanceChange, AttendanceMap, AttendanceRecord, AttendanceStatus,
    AttendanceUpdate, Sheet, TeamMember, DEFAULT_END_DATE, DEFAULT_START_DATE,
    PRESENCE_TIMEOUT_SECS,
};
use crate::remote::RemoteSnapshot;

use super::error::StoreResult;

/// Timestamp assigned at the moment of a local write. RFC 3339 with a fixed
/// precision so that string comparison orders the same as time comparison.
pub(crate) fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Unix seconds, used for presence heartbeats.
pub(crate) fn unix_now() -> f64 {
    Utc::now().timestamp_micros() as f64 / 1_000_000.0
}

impl ToSql for AttendanceStatus {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for AttendanceStatus {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value
            .as_str()?
            .parse()
            .map_err(|e| FromSqlError::Other(Box::new(e)))
    }
}

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS data_version (
    id INTEGER PRIMARY KEY,
    version INTEGER NOT NULL DEFAULT 1
);
INSERT OR IGNORE INTO data_version (id, version) VALUES (1, 1);

CREATE TABLE IF NOT EXISTS sheets (
    sheet_id TEXT PRIMARY KEY,
    title TEXT NOT NULL DEFAULT '',
    tab_name TEXT NOT NULL DEFAULT '',
    group_name TEXT NOT NULL DEFAULT '',
    subgroup_name TEXT NOT NULL DEFAULT '',
    start_date TEXT NOT NULL DEFAULT '2025-12-21',
    end_date TEXT NOT NULL DEFAULT '2026-02-01',
    created_at TEXT NOT NULL DEFAULT '',
    updated_at TEXT NOT NULL DEFAULT ''
);

CREATE TABLE IF NOT EXISTS team_members (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    sheet_id TEXT NOT NULL REFERENCES sheets(sheet_id) ON DELETE CASCADE,
    first_name TEXT NOT NULL DEFAULT '',
    last_name TEXT NOT NULL DEFAULT '',
    person_code TEXT NOT NULL DEFAULT '',
    group_name TEXT NOT NULL DEFAULT '',
    subgroup_name TEXT NOT NULL DEFAULT '',
    section_name TEXT NOT NULL DEFAULT '',
    specialty TEXT NOT NULL DEFAULT ''
);

CREATE TABLE IF NOT EXISTS attendance (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    sheet_id TEXT NOT NULL REFERENCES sheets(sheet_id) ON DELETE CASCADE,
    person_code TEXT NOT NULL,
    date TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'unmarked',
    updated_at TEXT NOT NULL DEFAULT '',
    session_id TEXT NOT NULL DEFAULT '',
    UNIQUE(sheet_id, person_code, date)
);

CREATE TABLE IF NOT EXISTS active_users (
    session_id TEXT PRIMARY KEY,
    email TEXT NOT NULL DEFAULT 'Anonymous',
    sheet_id TEXT NOT NULL,
    last_seen REAL NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_attendance_sheet ON attendance(sheet_id);
CREATE INDEX IF NOT EXISTS idx_attendance_person ON attendance(person_code);
CREATE INDEX IF NOT EXISTS idx_team_members_sheet ON team_members(sheet_id);
CREATE INDEX IF NOT EXISTS idx_active_users_sheet ON active_users(sheet_id);
";

/// Embedded write-through cache. All entity reads and writes go through
/// here; the remote store is only ever touched by the sync engine.
///
/// Holds no connection of its own - every operation opens a fresh one, which
/// keeps concurrent request threads isolated at the SQLite level.
pub struct LocalStore {
    path: PathBuf,
}

impl LocalStore {
    /// Open (creating if needed) the local cache at `path` and ensure the
    /// schema exists.
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let store = Self { path };
        let conn = store.conn()?;
        conn.execute_batch(SCHEMA)?;
        debug!(path = %store.path.display(), "local store ready");
        Ok(store)
    }

    fn conn(&self) -> StoreResult<Connection> {
        let conn = Connection::open(&self.path)?;
        // WAL lets readers proceed while a writer commits; busy_timeout
        // covers the brief writer-vs-writer window.
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA busy_timeout = 5000;
             PRAGMA foreign_keys = ON;",
        )?;
        Ok(conn)
    }

    // ===== Data version =====

    pub fn data_version(&self) -> StoreResult<i64> {
        let conn = self.conn()?;
        let version: i64 =
            conn.query_row("SELECT version FROM data_version WHERE id = 1", [], |r| {
                r.get(0)
            })?;
        Ok(version)
    }

    /// Bump the global fencing counter. Clients holding the old value get a
    /// full reload on their next heartbeat.
    pub fn increment_data_version(&self) -> StoreResult<i64> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE data_version SET version = version + 1 WHERE id = 1",
            [],
        )?;
        let version: i64 =
            conn.query_row("SELECT version FROM data_version WHERE id = 1", [], |r| {
                r.get(0)
            })?;
        Ok(version)
    }

    pub fn set_data_version(&self, version: i64) -> StoreResult<()> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE data_version SET version = ?1 WHERE id = 1",
            params![version],
        )?;
        Ok(())
    }

    // ===== Sheets =====

    /// Upsert by external id: create the sheet if unseen, otherwise refresh
    /// its title. Returns the stored row either way.
    pub fn get_or_create_sheet(
        &self,
        sheet_id: &str,
        title: &str,
        tab_name: &str,
        group_name: &str,
        subgroup_name: &str,
    ) -> StoreResult<Sheet> {
        let conn = self.conn()?;
        let exists: Option<String> = conn
            .query_row(
                "SELECT sheet_id FROM sheets WHERE sheet_id = ?1",
                params![sheet_id],
                |r| r.get(0),
            )
            .optional()?;

        let now = now_rfc3339();
        if exists.is_some() {
            if !title.is_empty() {
                conn.execute(
                    "UPDATE sheets SET title = ?1, updated_at = ?2 WHERE sheet_id = ?3",
                    params![title, now, sheet_id],
                )?;
            }
        } else {
            conn.execute(
                "INSERT INTO sheets (sheet_id, title, tab_name, group_name, subgroup_name,
                                     start_date, end_date, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)",
                params![
                    sheet_id,
                    title,
                    tab_name,
                    group_name,
                    subgroup_name,
                    DEFAULT_START_DATE,
                    DEFAULT_END_DATE,
                    now
                ],
            )?;
        }

        // Just written above, so the row is guaranteed to exist.
        let sheet = conn.query_row(
            "SELECT sheet_id, title, tab_name, group_name, subgroup_name,
                    start_date, end_date, created_at, updated_at
             FROM sheets WHERE sheet_id = ?1",
            params![sheet_id],
            sheet_from_row,
        )?;
        Ok(sheet)
    }

    pub fn get_sheet(&self, sheet_id: &str) -> StoreResult<Option<Sheet>> {
        let conn = self.conn()?;
        Ok(read_sheet(&conn, sheet_id)?)
    }

    pub fn sheet_exists(&self, sheet_id: &str) -> StoreResult<bool> {
        let conn = self.conn()?;
        let found: Option<String> = conn
            .query_row(
                "SELECT sheet_id FROM sheets WHERE sheet_id = ?1",
                params![sheet_id],
                |r| r.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    /// All sheets, newest first.
    pub fn get_all_sheets(&self) -> StoreResult<Vec<Sheet>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT sheet_id, title, tab_name, group_name, subgroup_name,
                    start_date, end_date, created_at, updated_at
             FROM sheets ORDER BY created_at DESC",
        )?;
        let sheets = stmt
            .query_map([], sheet_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(sheets)
    }

    pub fn update_sheet_dates(
        &self,
        sheet_id: &str,
        start_date: &str,
        end_date: &str,
    ) -> StoreResult<()> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE sheets SET start_date = ?1, end_date = ?2, updated_at = ?3
             WHERE sheet_id = ?4",
            params![start_date, end_date, now_rfc3339(), sheet_id],
        )?;
        Ok(())
    }

    /// Delete a sheet and everything that hangs off it.
    pub fn delete_sheet(&self, sheet_id: &str) -> StoreResult<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        tx.execute(
            "DELETE FROM attendance WHERE sheet_id = ?1",
            params![sheet_id],
        )?;
        tx.execute(
            "DELETE FROM team_members WHERE sheet_id = ?1",
            params![sheet_id],
        )?;
        tx.execute(
            "DELETE FROM active_users WHERE sheet_id = ?1",
            params![sheet_id],
        )?;
        tx.execute("DELETE FROM sheets WHERE sheet_id = ?1", params![sheet_id])?;
        tx.commit()?;
        Ok(())
    }

    // ===== Team members =====

    /// Replace the whole roster for a sheet. Callers always submit the
    /// complete member list, so this is delete-all + reinsert, never a patch.
    pub fn save_team_members(&self, sheet_id: &str, members: &[TeamMember]) -> StoreResult<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        tx.execute(
            "DELETE FROM team_members WHERE sheet_id = ?1",
            params![sheet_id],
        )?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO team_members (sheet_id, first_name, last_name, person_code,
                                           group_name, subgroup_name, section_name, specialty)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            )?;
            for m in members {
                stmt.execute(params![
                    sheet_id,
                    m.first_name,
                    m.last_name,
                    m.person_code,
                    m.group_name,
                    m.subgroup_name,
                    m.section_name,
                    m.specialty
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    pub fn get_team_members(&self, sheet_id: &str) -> StoreResult<Vec<TeamMember>> {
        let conn = self.conn()?;
        Ok(read_members(&conn, sheet_id)?)
    }

    // ===== Attendance =====

    /// Upsert one cell. Unique per (sheet, person, date); a second write for
    /// the same key replaces status, timestamp and session attribution.
    pub fn upsert_attendance(&self, record: &AttendanceRecord) -> StoreResult<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO attendance (sheet_id, person_code, date, status, updated_at, session_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(sheet_id, person_code, date)
             DO UPDATE SET status = excluded.status,
                           updated_at = excluded.updated_at,
                           session_id = excluded.session_id",
            params![
                record.sheet_id,
                record.person_code,
                record.date,
                record.status,
                record.updated_at,
                record.session_id
            ],
        )?;
        Ok(())
    }

    /// Upsert a batch of cells in one transaction. The whole batch shares
    /// `updated_at` and `session_id`; returns the full records as written,
    /// ready to hand to the pending buffer.
    pub fn upsert_attendance_batch(
        &self,
        sheet_id: &str,
        updates: &[AttendanceUpdate],
        updated_at: &str,
        session_id: &str,
    ) -> StoreResult<Vec<AttendanceRecord>> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let mut written = Vec::with_capacity(updates.len());
        {
            let mut stmt = tx.prepare(
                "INSERT INTO attendance (sheet_id, person_code, date, status, updated_at, session_id)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT(sheet_id, person_code, date)
                 DO UPDATE SET status = excluded.status,
                               updated_at = excluded.updated_at,
                               session_id = excluded.session_id",
            )?;
            for u in updates {
                stmt.execute(params![
                    sheet_id,
                    u.person_code,
                    u.date,
                    u.status,
                    updated_at,
                    session_id
                ])?;
                written.push(AttendanceRecord {
                    sheet_id: sheet_id.to_string(),
                    person_code: u.person_code.clone(),
                    date: u.date.clone(),
                    status: u.status,
                    updated_at: updated_at.to_string(),
                    session_id: session_id.to_string(),
                });
            }
        }
        tx.commit()?;
        Ok(written)
    }

    pub fn get_attendance(&self, sheet_id: &str) -> StoreResult<AttendanceMap> {
        let conn = self.conn()?;
        Ok(read_attendance(&conn, sheet_id)?)
    }

    /// Everything another session changed after `since`.
    ///
    /// With a non-empty `exclude_session`, the caller's own writes and any
    /// unattributed (empty-session) rows are filtered out, so polling clients
    /// never see their own change reflected back and legacy rows only surface
    /// through a full reload. An empty `exclude_session` disables the session
    /// filter entirely.
    pub fn get_attendance_changes_since(
        &self,
        sheet_id: &str,
        since: &str,
        exclude_session: &str,
    ) -> StoreResult<Vec<AttendanceChange>> {
        let conn = self.conn()?;
        let mut changes = Vec::new();
        if exclude_session.is_empty() {
            let mut stmt = conn.prepare(
                "SELECT person_code, date, status, updated_at FROM attendance
                 WHERE sheet_id = ?1 AND updated_at > ?2",
            )?;
            let rows = stmt.query_map(params![sheet_id, since], change_from_row)?;
            for row in rows {
                changes.push(row?);
            }
        } else {
            let mut stmt = conn.prepare(
                "SELECT person_code, date, status, updated_at FROM attendance
                 WHERE sheet_id = ?1 AND updated_at > ?2
                   AND session_id != '' AND session_id != ?3",
            )?;
            let rows = stmt.query_map(params![sheet_id, since, exclude_session], change_from_row)?;
            for row in rows {
                changes.push(row?);
            }
        }
        Ok(changes)
    }

    /// Sheet, full roster and full attendance map in a single round trip.
    pub fn get_full_sheet_data(
        &self,
        sheet_id: &str,
    ) -> StoreResult<(Option<Sheet>, Vec<TeamMember>, AttendanceMap)> {
        let conn = self.conn()?;
        let sheet = read_sheet(&conn, sheet_id)?;
        if sheet.is_none() {
            return Ok((None, Vec::new(), HashMap::new()));
        }
        let members = read_members(&conn, sheet_id)?;
        let attendance = read_attendance(&conn, sheet_id)?;
        Ok((sheet, members, attendance))
    }

    // ===== Presence =====

    pub fn touch_active_user(&self, user: &ActiveUser) -> StoreResult<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO active_users (session_id, email, sheet_id, last_seen)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(session_id)
             DO UPDATE SET email = excluded.email,
                           sheet_id = excluded.sheet_id,
                           last_seen = excluded.last_seen",
            params![user.session_id, user.email, user.sheet_id, user.last_seen],
        )?;
        Ok(())
    }

    /// De-duplicated display strings of other live sessions on a sheet.
    /// Expired rows are reaped here, on read, rather than by a timer.
    pub fn active_users_for_sheet(
        &self,
        sheet_id: &str,
        exclude_session: &str,
    ) -> StoreResult<Vec<String>> {
        let conn = self.conn()?;
        let cutoff = unix_now() - PRESENCE_TIMEOUT_SECS;
        conn.execute(
            "DELETE FROM active_users WHERE last_seen < ?1",
            params![cutoff],
        )?;

        let mut stmt = if exclude_session.is_empty() {
            conn.prepare("SELECT DISTINCT email FROM active_users WHERE sheet_id = ?1")?
        } else {
            conn.prepare(
                "SELECT DISTINCT email FROM active_users
                 WHERE sheet_id = ?1 AND session_id != ?2",
            )?
        };
        let users = if exclude_session.is_empty() {
            stmt.query_map(params![sheet_id], |r| r.get::<_, String>(0))?
                .collect::<rusqlite::Result<Vec<_>>>()?
        } else {
            stmt.query_map(params![sheet_id, exclude_session], |r| {
                r.get::<_, String>(0)
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?
        };
        Ok(users)
    }

    // ===== Hydration =====

    /// Replace every table with the remote snapshot, atomically. Runs once at
    /// startup; a failure rolls back and leaves the previous cache intact.
    ///
    /// The remote schema carries no foreign keys, so a snapshot can contain
    /// member or attendance rows for a sheet that no longer exists (a sheet
    /// deleted remotely while its rows were still in flight). Those rows are
    /// skipped with a warning; loading them would trip the local FK
    /// constraint and fail the whole hydration on every boot.
    pub fn replace_all(&self, snapshot: &RemoteSnapshot) -> StoreResult<()> {
        let known: HashSet<&str> = snapshot
            .sheets
            .iter()
            .map(|s| s.sheet_id.as_str())
            .collect();

        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        tx.execute("DELETE FROM attendance", [])?;
        tx.execute("DELETE FROM team_members", [])?;
        tx.execute("DELETE FROM active_users", [])?;
        tx.execute("DELETE FROM sheets", [])?;

        {
            let mut stmt = tx.prepare(
                "INSERT INTO sheets (sheet_id, title, tab_name, group_name, subgroup_name,
                                     start_date, end_date, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            )?;
            for s in &snapshot.sheets {
                stmt.execute(params![
                    s.sheet_id,
                    s.title,
                    s.tab_name,
                    s.group_name,
                    s.subgroup_name,
                    s.start_date,
                    s.end_date,
                    s.created_at,
                    s.updated_at
                ])?;
            }
        }
        {
            let mut stmt = tx.prepare(
                "INSERT INTO team_members (sheet_id, first_name, last_name, person_code,
                                           group_name, subgroup_name, section_name, specialty)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            )?;
            for (sheet_id, m) in &snapshot.members {
                if !known.contains(sheet_id.as_str()) {
                    warn!(sheet_id, person_code = %m.person_code,
                          "skipping orphan member row from remote snapshot");
                    continue;
                }
                stmt.execute(params![
                    sheet_id,
                    m.first_name,
                    m.last_name,
                    m.person_code,
                    m.group_name,
                    m.subgroup_name,
                    m.section_name,
                    m.specialty
                ])?;
            }
        }
        {
            let mut stmt = tx.prepare(
                "INSERT INTO attendance (sheet_id, person_code, date, status, updated_at, session_id)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            )?;
            for a in &snapshot.attendance {
                if !known.contains(a.sheet_id.as_str()) {
                    warn!(sheet_id = %a.sheet_id, person_code = %a.person_code,
                          "skipping orphan attendance row from remote snapshot");
                    continue;
                }
                stmt.execute(params![
                    a.sheet_id,
                    a.person_code,
                    a.date,
                    a.status,
                    a.updated_at,
                    a.session_id
                ])?;
            }
        }

        tx.execute(
            "UPDATE data_version SET version = ?1 WHERE id = 1",
            params![snapshot.data_version],
        )?;

        tx.commit()?;
        Ok(())
    }
}

// ===== Row mappers =====

fn sheet_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Sheet> {
    Ok(Sheet {
        sheet_id: row.get(0)?,
        title: row.get(1)?,
        tab_name: row.get(2)?,
        group_name: row.get(3)?,
        subgroup_name: row.get(4)?,
        start_date: row.get(5)?,
        end_date: row.get(6)?,
        created_at: row.get(7)?,
        updated_at: row.get(8)?,
    })
}

fn change_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<AttendanceChange> {
    Ok(AttendanceChange {
        person_code: row.get(0)?,
        date: row.get(1)?,
        status: row.get(2)?,
        updated_at: row.get(3)?,
    })
}

fn read_sheet(conn: &Connection, sheet_id: &str) -> rusqlite::Result<Option<Sheet>> {
    conn.query_row(
        "SELECT sheet_id, title, tab_name, group_name, subgroup_name,
                start_date, end_date, created_at, updated_at
         FROM sheets WHERE sheet_id = ?1",
        params![sheet_id],
        sheet_from_row,
    )
    .optional()
}

fn read_members(conn: &Connection, sheet_id: &str) -> rusqlite::Result<Vec<TeamMember>> {
    let mut stmt = conn.prepare(
        "SELECT first_name, last_name, person_code, group_name,
                subgroup_name, section_name, specialty
         FROM team_members WHERE sheet_id = ?1 ORDER BY id",
    )?;
    let members = stmt
        .query_map(params![sheet_id], |row| {
            Ok(TeamMember {
                first_name: row.get(0)?,
                last_name: row.get(1)?,
                person_code: row.get(2)?,
                group_name: row.get(3)?,
                subgroup_name: row.get(4)?,
                section_name: row.get(5)?,
                specialty: row.get(6)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(members)
}

fn read_attendance(conn: &Connection, sheet_id: &str) -> rusqlite::Result<AttendanceMap> {
    let mut stmt = conn.prepare(
        "SELECT person_code, date, status FROM attendance WHERE sheet_id = ?1",
    )?;
    let rows = stmt.query_map(params![sheet_id], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, AttendanceStatus>(2)?,
        ))
    })?;

    let mut map: AttendanceMap = HashMap::new();
    for row in rows {
        let (person, date, status) = row?;
        map.entry(person).or_default().insert(date, status);
    }
    Ok(map)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::AttendanceStatus::{Absent, Present};

    fn test_store() -> (tempfile::TempDir, LocalStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalStore::open(dir.path().join("cache.db")).unwrap();
        (dir, store)
    }

    fn record(sheet: &str, person: &str, date: &str, status: AttendanceStatus, session: &str) -> AttendanceRecord {
        AttendanceRecord {
            sheet_id: sheet.to_string(),
            person_code: person.to_string(),
            date: date.to_string(),
            status,
            updated_at: now_rfc3339(),
            session_id: session.to_string(),
        }
    }

    fn member(first: &str, code: &str) -> TeamMember {
        TeamMember {
            first_name: first.to_string(),
            person_code: code.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn sheet_upsert_is_keyed_by_external_id() {
        let (_dir, store) = test_store();
        let created = store
            .get_or_create_sheet("S1", "Week 1", "Tab A", "North", "Blue")
            .unwrap();
        assert_eq!(created.start_date, DEFAULT_START_DATE);
        assert_eq!(created.end_date, DEFAULT_END_DATE);

        // Second call with a new title updates in place, never duplicates.
        let updated = store
            .get_or_create_sheet("S1", "Week 1 (rev)", "", "", "")
            .unwrap();
        assert_eq!(updated.title, "Week 1 (rev)");
        assert_eq!(updated.created_at, created.created_at);
        assert_eq!(store.get_all_sheets().unwrap().len(), 1);
    }

    #[test]
    fn attendance_upsert_is_idempotent() {
        let (_dir, store) = test_store();
        store.get_or_create_sheet("S1", "", "", "", "").unwrap();
        let rec = record("S1", "100", "2025-12-22", Present, "s1");
        store.upsert_attendance(&rec).unwrap();
        store.upsert_attendance(&rec).unwrap();

        let map = store.get_attendance("S1").unwrap();
        assert_eq!(map.len(), 1);
        assert_eq!(map["100"].len(), 1);
        assert_eq!(map["100"]["2025-12-22"], Present);
    }

    #[test]
    fn last_write_wins_on_the_same_cell() {
        let (_dir, store) = test_store();
        store.get_or_create_sheet("S1", "", "", "", "").unwrap();
        store
            .upsert_attendance(&record("S1", "100", "2025-12-22", Present, "s1"))
            .unwrap();
        store
            .upsert_attendance(&record("S1", "100", "2025-12-22", Absent, "s2"))
            .unwrap();

        let map = store.get_attendance("S1").unwrap();
        assert_eq!(map["100"]["2025-12-22"], Absent);
    }

    #[test]
    fn roster_save_fully_replaces_previous_roster() {
        let (_dir, store) = test_store();
        store.get_or_create_sheet("S1", "", "", "", "").unwrap();
        store
            .save_team_members("S1", &[member("Alice", "1"), member("Bob", "2")])
            .unwrap();
        store.save_team_members("S1", &[member("Alice", "1")]).unwrap();

        let members = store.get_team_members("S1").unwrap();
        assert_eq!(members.len(), 1);
        assert_eq!(members[0].first_name, "Alice");
    }

    #[test]
    fn change_feed_excludes_own_and_unattributed_writes() {
        let (_dir, store) = test_store();
        store.get_or_create_sheet("S1", "", "", "", "").unwrap();
        store
            .upsert_attendance(&record("S1", "100", "2025-12-22", Present, "s1"))
            .unwrap();
        store
            .upsert_attendance(&record("S1", "200", "2025-12-22", Absent, ""))
            .unwrap();

        // s1 polling: its own write and the unattributed write are invisible.
        let own = store.get_attendance_changes_since("S1", "", "s1").unwrap();
        assert!(own.is_empty());

        // A different session sees s1's write but not the unattributed one.
        let other = store.get_attendance_changes_since("S1", "", "s2").unwrap();
        assert_eq!(other.len(), 1);
        assert_eq!(other[0].person_code, "100");

        // No exclusion: everything since the epoch comes back.
        let all = store.get_attendance_changes_since("S1", "", "").unwrap();
        assert_eq!(all.len(), 2);
    }

    #[test]
    fn change_feed_respects_since_timestamp() {
        let (_dir, store) = test_store();
        store.get_or_create_sheet("S1", "", "", "", "").unwrap();
        let rec = record("S1", "100", "2025-12-22", Present, "s1");
        store.upsert_attendance(&rec).unwrap();

        let after = store
            .get_attendance_changes_since("S1", &rec.updated_at, "s2")
            .unwrap();
        assert!(after.is_empty(), "strictly-greater comparison expected");

        let before = store.get_attendance_changes_since("S1", "", "s2").unwrap();
        assert_eq!(before.len(), 1);
    }

    #[test]
    fn data_version_starts_at_one_and_increments() {
        let (dir, store) = test_store();
        assert_eq!(store.data_version().unwrap(), 1);
        assert_eq!(store.increment_data_version().unwrap(), 2);

        // Persists across reopen of the same file.
        let reopened = LocalStore::open(dir.path().join("cache.db")).unwrap();
        assert_eq!(reopened.data_version().unwrap(), 2);
    }

    #[test]
    fn full_sheet_bundle_round_trip() {
        let (_dir, store) = test_store();
        store.get_or_create_sheet("SHEET1", "", "", "", "").unwrap();
        store
            .save_team_members("SHEET1", &[member("Dana", "100")])
            .unwrap();
        store
            .upsert_attendance(&record("SHEET1", "100", "2025-12-22", Present, "s1"))
            .unwrap();

        let (sheet, members, attendance) = store.get_full_sheet_data("SHEET1").unwrap();
        assert!(sheet.is_some());
        assert_eq!(members.len(), 1);
        assert_eq!(members[0].first_name, "Dana");
        assert_eq!(attendance["100"]["2025-12-22"], Present);
    }

    #[test]
    fn missing_sheet_yields_empty_bundle() {
        let (_dir, store) = test_store();
        let (sheet, members, attendance) = store.get_full_sheet_data("nope").unwrap();
        assert!(sheet.is_none());
        assert!(members.is_empty());
        assert!(attendance.is_empty());
    }

    #[test]
    fn presence_reaps_expired_sessions_and_dedupes() {
        let (_dir, store) = test_store();
        store.get_or_create_sheet("S1", "", "", "", "").unwrap();
        let now = unix_now();
        for (session, email, seen) in [
            ("a", "one@example.com", now),
            ("b", "two@example.com", now),
            ("b2", "two@example.com", now),
            ("stale", "gone@example.com", now - PRESENCE_TIMEOUT_SECS - 1.0),
        ] {
            store
                .touch_active_user(&ActiveUser {
                    session_id: session.to_string(),
                    email: email.to_string(),
                    sheet_id: "S1".to_string(),
                    last_seen: seen,
                })
                .unwrap();
        }

        let mut users = store.active_users_for_sheet("S1", "a").unwrap();
        users.sort();
        assert_eq!(users, vec!["two@example.com"]);

        // The expired row was physically removed, not just filtered.
        let all = store.active_users_for_sheet("S1", "").unwrap();
        assert!(!all.contains(&"gone@example.com".to_string()));
    }

    #[test]
    fn delete_sheet_cascades_to_dependents() {
        let (_dir, store) = test_store();
        store.get_or_create_sheet("S1", "", "", "", "").unwrap();
        store.save_team_members("S1", &[member("Alice", "1")]).unwrap();
        store
            .upsert_attendance(&record("S1", "1", "2025-12-22", Present, "s1"))
            .unwrap();

        store.delete_sheet("S1").unwrap();
        assert!(!store.sheet_exists("S1").unwrap());
        assert!(store.get_team_members("S1").unwrap().is_empty());
        assert!(store.get_attendance("S1").unwrap().is_empty());
    }

    #[test]
    fn replace_all_swaps_in_the_snapshot_wholesale() {
        let (_dir, store) = test_store();
        store.get_or_create_sheet("OLD", "stale", "", "", "").unwrap();

        let sheet = store
            .get_or_create_sheet("NEW", "fresh", "", "", "")
            .unwrap();
        let snapshot = RemoteSnapshot {
            sheets: vec![sheet],
            members: vec![("NEW".to_string(), member("Dana", "100"))],
            attendance: vec![record("NEW", "100", "2025-12-22", Present, "")],
            data_version: 7,
        };
        store.replace_all(&snapshot).unwrap();

        assert!(!store.sheet_exists("OLD").unwrap());
        assert!(store.sheet_exists("NEW").unwrap());
        assert_eq!(store.get_team_members("NEW").unwrap().len(), 1);
        assert_eq!(store.data_version().unwrap(), 7);
    }

    #[test]
    fn replace_all_skips_orphan_rows_instead_of_failing() {
        let (_dir, store) = test_store();

        // The remote schema has no foreign keys, so rows can reference a
        // sheet that was deleted remotely. Hydration must load everything
        // else and drop the orphans.
        let sheet = store.get_or_create_sheet("NEW", "", "", "", "").unwrap();
        let snapshot = RemoteSnapshot {
            sheets: vec![sheet],
            members: vec![
                ("NEW".to_string(), member("Dana", "100")),
                ("GHOST".to_string(), member("Gone", "999")),
            ],
            attendance: vec![
                record("NEW", "100", "2025-12-22", Present, ""),
                record("GHOST", "999", "2025-12-22", Absent, ""),
            ],
            data_version: 3,
        };
        store.replace_all(&snapshot).unwrap();

        assert!(store.sheet_exists("NEW").unwrap());
        assert!(!store.sheet_exists("GHOST").unwrap());
        assert_eq!(store.get_team_members("NEW").unwrap().len(), 1);
        assert!(store.get_attendance("GHOST").unwrap().is_empty());
        assert_eq!(store.get_attendance("NEW").unwrap()["100"].len(), 1);
        assert_eq!(store.data_version().unwrap(), 3);
    }

    #[test]
    fn open_creates_missing_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("deeper").join("cache.db");
        let store = LocalStore::open(&path).unwrap();
        assert_eq!(store.data_version().unwrap(), 1);
        assert!(path.exists());
    }
}
