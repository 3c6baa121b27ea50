use std::time::Duration;

use async_trait::async_trait;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Row};
use tracing::debug;

use crate::models::{AttendanceRecord, Sheet, TeamMember};
use crate::sync::SyncBatch;

use super::{RemoteBackend, RemoteError, RemoteResult, RemoteSnapshot};

/// Cap on pooled connections. The flush loop is the only steady client, so
/// two is plenty: one reused by the loop, one spare for the occasional
/// direct write.
const MAX_CONNECTIONS: u32 = 2;

/// How long to wait for a pooled connection before giving up. The sync
/// engine treats a timeout like any other remote failure and requeues.
const ACQUIRE_TIMEOUT_SECS: u64 = 10;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS data_version (
    id INTEGER PRIMARY KEY,
    version BIGINT NOT NULL DEFAULT 1
);
INSERT INTO data_version (id, version) VALUES (1, 1) ON CONFLICT (id) DO NOTHING;

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
    id BIGSERIAL PRIMARY KEY,
    sheet_id TEXT NOT NULL,
    first_name TEXT NOT NULL DEFAULT '',
    last_name TEXT NOT NULL DEFAULT '',
    person_code TEXT NOT NULL DEFAULT '',
    group_name TEXT NOT NULL DEFAULT '',
    subgroup_name TEXT NOT NULL DEFAULT '',
    section_name TEXT NOT NULL DEFAULT '',
    specialty TEXT NOT NULL DEFAULT ''
);

CREATE TABLE IF NOT EXISTS attendance (
    id BIGSERIAL PRIMARY KEY,
    sheet_id TEXT NOT NULL,
    person_code TEXT NOT NULL,
    date TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'unmarked',
    updated_at TEXT NOT NULL DEFAULT '',
    session_id TEXT NOT NULL DEFAULT '',
    UNIQUE (sheet_id, person_code, date)
);

CREATE TABLE IF NOT EXISTS active_users (
    session_id TEXT PRIMARY KEY,
    email TEXT NOT NULL DEFAULT 'Anonymous',
    sheet_id TEXT NOT NULL,
    last_seen DOUBLE PRECISION NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_attendance_sheet ON attendance(sheet_id);
CREATE INDEX IF NOT EXISTS idx_team_members_sheet ON team_members(sheet_id);
";

/// Postgres-backed system of record.
///
/// The pool is lazy: nothing connects until first use, and dropped
/// connections are re-established on the next attempt. That stands in for
/// the hand-managed persistent connection the sync loop wants - connection
/// reuse is a latency optimization here, not a correctness requirement.
pub struct RemoteStore {
    pool: PgPool,
}

impl RemoteStore {
    /// Build the store from a Postgres URL. Does not touch the network;
    /// an unreachable remote surfaces later, per operation.
    pub fn connect(database_url: &str) -> RemoteResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(MAX_CONNECTIONS)
            .acquire_timeout(Duration::from_secs(ACQUIRE_TIMEOUT_SECS))
            .connect_lazy(database_url)?;
        Ok(Self { pool })
    }

    /// Create any missing tables. Best-effort at startup: a failure here is
    /// logged by the caller and simply means the first flushes will fail and
    /// requeue until the remote comes back.
    pub async fn ensure_schema(&self) -> RemoteResult<()> {
        sqlx::raw_sql(SCHEMA).execute(&self.pool).await?;
        debug!("remote schema ensured");
        Ok(())
    }
}

#[async_trait]
impl RemoteBackend for RemoteStore {
    async fn pull(&self) -> RemoteResult<RemoteSnapshot> {
        let sheet_rows = sqlx::query(
            "SELECT sheet_id, title, tab_name, group_name, subgroup_name,
                    start_date, end_date, created_at, updated_at
             FROM sheets",
        )
        .fetch_all(&self.pool)
        .await?;
        let sheets = sheet_rows
            .iter()
            .map(sheet_from_row)
            .collect::<Result<Vec<_>, _>>()?;

        let member_rows = sqlx::query(
            "SELECT sheet_id, first_name, last_name, person_code,
                    group_name, subgroup_name, section_name, specialty
             FROM team_members ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await?;
        let members = member_rows
            .iter()
            .map(member_from_row)
            .collect::<Result<Vec<_>, _>>()?;

        let attendance_rows = sqlx::query(
            "SELECT sheet_id, person_code, date, status, updated_at, session_id
             FROM attendance",
        )
        .fetch_all(&self.pool)
        .await?;
        let attendance = attendance_rows
            .iter()
            .map(attendance_from_row)
            .collect::<RemoteResult<Vec<_>>>()?;

        let data_version: Option<i64> =
            sqlx::query_scalar("SELECT version FROM data_version WHERE id = 1")
                .fetch_optional(&self.pool)
                .await?;

        Ok(RemoteSnapshot {
            sheets,
            members,
            attendance,
            data_version: data_version.unwrap_or(1),
        })
    }

    async fn apply(&self, batch: &SyncBatch) -> RemoteResult<()> {
        let mut tx = self.pool.begin().await?;

        for s in &batch.sheets {
            sqlx::query(
                "INSERT INTO sheets (sheet_id, title, tab_name, group_name, subgroup_name,
                                     created_at, updated_at)
                 VALUES ($1, $2, $3, $4, $5, $6, $7)
                 ON CONFLICT (sheet_id)
                 DO UPDATE SET title = EXCLUDED.title, updated_at = EXCLUDED.updated_at",
            )
            .bind(&s.sheet_id)
            .bind(&s.title)
            .bind(&s.tab_name)
            .bind(&s.group_name)
            .bind(&s.subgroup_name)
            .bind(&s.created_at)
            .bind(&s.updated_at)
            .execute(&mut *tx)
            .await?;
        }

        for (sheet_id, members) in &batch.team_members {
            sqlx::query("DELETE FROM team_members WHERE sheet_id = $1")
                .bind(sheet_id)
                .execute(&mut *tx)
                .await?;
            for m in members {
                sqlx::query(
                    "INSERT INTO team_members (sheet_id, first_name, last_name, person_code,
                                               group_name, subgroup_name, section_name, specialty)
                     VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
                )
                .bind(sheet_id)
                .bind(&m.first_name)
                .bind(&m.last_name)
                .bind(&m.person_code)
                .bind(&m.group_name)
                .bind(&m.subgroup_name)
                .bind(&m.section_name)
                .bind(&m.specialty)
                .execute(&mut *tx)
                .await?;
            }
        }

        for a in &batch.attendance {
            sqlx::query(
                "INSERT INTO attendance (sheet_id, person_code, date, status, updated_at, session_id)
                 VALUES ($1, $2, $3, $4, $5, $6)
                 ON CONFLICT (sheet_id, person_code, date)
                 DO UPDATE SET status = EXCLUDED.status,
                               updated_at = EXCLUDED.updated_at,
                               session_id = EXCLUDED.session_id",
            )
            .bind(&a.sheet_id)
            .bind(&a.person_code)
            .bind(&a.date)
            .bind(a.status.as_str())
            .bind(&a.updated_at)
            .bind(&a.session_id)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn set_data_version(&self, version: i64) -> RemoteResult<()> {
        sqlx::query(
            "INSERT INTO data_version (id, version) VALUES (1, $1)
             ON CONFLICT (id) DO UPDATE SET version = EXCLUDED.version",
        )
        .bind(version)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update_sheet_dates(
        &self,
        sheet_id: &str,
        start_date: &str,
        end_date: &str,
        updated_at: &str,
    ) -> RemoteResult<()> {
        sqlx::query(
            "UPDATE sheets SET start_date = $1, end_date = $2, updated_at = $3
             WHERE sheet_id = $4",
        )
        .bind(start_date)
        .bind(end_date)
        .bind(updated_at)
        .bind(sheet_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete_sheet(&self, sheet_id: &str) -> RemoteResult<()> {
        let mut tx = self.pool.begin().await?;
        for table in ["attendance", "team_members", "active_users", "sheets"] {
            // Table names come from this fixed list, never from input.
            let sql = format!("DELETE FROM {table} WHERE sheet_id = $1");
            sqlx::query(&sql).bind(sheet_id).execute(&mut *tx).await?;
        }
        tx.commit().await?;
        Ok(())
    }
}

// ===== Row mappers =====
//
// DB-facing mapping is kept separate from the domain structs so schema
// details stay localized here.

fn sheet_from_row(row: &PgRow) -> Result<Sheet, sqlx::Error> {
    Ok(Sheet {
        sheet_id: row.try_get("sheet_id")?,
        title: row.try_get("title")?,
        tab_name: row.try_get("tab_name")?,
        group_name: row.try_get("group_name")?,
        subgroup_name: row.try_get("subgroup_name")?,
        start_date: row.try_get("start_date")?,
        end_date: row.try_get("end_date")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn member_from_row(row: &PgRow) -> Result<(String, TeamMember), sqlx::Error> {
    Ok((
        row.try_get("sheet_id")?,
        TeamMember {
            first_name: row.try_get("first_name")?,
            last_name: row.try_get("last_name")?,
            person_code: row.try_get("person_code")?,
            group_name: row.try_get("group_name")?,
            subgroup_name: row.try_get("subgroup_name")?,
            section_name: row.try_get("section_name")?,
            specialty: row.try_get("specialty")?,
        },
    ))
}

fn attendance_from_row(row: &PgRow) -> RemoteResult<AttendanceRecord> {
    let status: String = row.try_get("status")?;
    let status = status
        .parse()
        .map_err(|e| RemoteError::InvalidRow(format!("attendance row: {e}")))?;
    Ok(AttendanceRecord {
        sheet_id: row.try_get("sheet_id")?,
        person_code: row.try_get("person_code")?,
        date: row.try_get("date")?,
        status,
        updated_at: row.try_get("updated_at")?,
        session_id: row.try_get("session_id")?,
    })
}
