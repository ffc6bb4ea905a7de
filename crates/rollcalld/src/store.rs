//! SQLite persistence for students, signatures, and attendance.

use async_trait::async_trait;
use chrono::NaiveDate;
use rollcall_core::api::{AttendanceRecord, StudentSummary};
use rollcall_core::{FeatureVector, Period, Signature};
use rusqlite::params;
use std::path::Path;
use thiserror::Error;

const SCHEMA: &str = "
PRAGMA foreign_keys = ON;

CREATE TABLE IF NOT EXISTS students (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    name        TEXT NOT NULL UNIQUE,
    folder_path TEXT NOT NULL,
    photo_count INTEGER NOT NULL DEFAULT 0,
    created_at  TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
);

CREATE TABLE IF NOT EXISTS student_features (
    id           INTEGER PRIMARY KEY AUTOINCREMENT,
    student_id   INTEGER NOT NULL UNIQUE REFERENCES students(id) ON DELETE CASCADE,
    student_name TEXT NOT NULL,
    features     BLOB NOT NULL
);

CREATE TABLE IF NOT EXISTS attendance_records (
    id           INTEGER PRIMARY KEY AUTOINCREMENT,
    student_name TEXT NOT NULL,
    date         TEXT NOT NULL,
    period       TEXT NOT NULL,
    time         TEXT NOT NULL,
    confidence   REAL NOT NULL,
    created_at   TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
    UNIQUE(student_name, date, period)
);

CREATE INDEX IF NOT EXISTS idx_attendance_date ON attendance_records(date, period);
";

const DATE_FORMAT: &str = "%Y-%m-%d";

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] tokio_rusqlite::Error),
    #[error("failed to prepare database directory: {0}")]
    Io(#[from] std::io::Error),
}

/// A finalized enrollment: the student row plus their signature.
#[derive(Debug, Clone)]
pub struct NewEnrollment {
    pub student_name: String,
    pub folder_path: String,
    pub photo_count: u32,
    pub features: FeatureVector,
}

/// One attendance row to insert.
#[derive(Debug, Clone)]
pub struct AttendanceEntry {
    pub student_name: String,
    pub date: NaiveDate,
    pub period: Period,
    /// Wall-clock time of recognition, `HH:MM:SS`.
    pub time: String,
    pub confidence: f32,
}

/// Persistence interface injected into the pipeline components.
#[async_trait]
pub trait Repository: Send + Sync {
    /// All stored signatures, ordered by student id. Rows whose blob does not
    /// decode to a valid vector are skipped.
    async fn find_signatures(&self) -> Result<Vec<Signature>, StoreError>;

    /// Upsert the student and replace their signature atomically. Returns the
    /// student id.
    async fn upsert_signature(&self, enrollment: NewEnrollment) -> Result<i64, StoreError>;

    /// Insert-or-ignore every entry in one transaction. Returns the number of
    /// net-new rows.
    async fn upsert_attendance(&self, entries: Vec<AttendanceEntry>) -> Result<usize, StoreError>;

    async fn count_students(&self) -> Result<u64, StoreError>;

    /// Distinct students with at least one record on `date`.
    async fn count_present(&self, date: NaiveDate) -> Result<u64, StoreError>;

    async fn list_students(&self) -> Result<Vec<StudentSummary>, StoreError>;

    /// Records for `date` (optionally one period), newest first.
    async fn attendance_on(
        &self,
        date: NaiveDate,
        period: Option<Period>,
    ) -> Result<Vec<AttendanceRecord>, StoreError>;

    /// The most recent `limit` records across all dates.
    async fn recent_activity(&self, limit: u32) -> Result<Vec<AttendanceRecord>, StoreError>;
}

/// [`Repository`] over a single SQLite connection on a background thread.
pub struct SqliteStore {
    conn: tokio_rusqlite::Connection,
}

impl SqliteStore {
    pub async fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let conn = tokio_rusqlite::Connection::open(path).await?;
        Self::init(conn).await
    }

    pub async fn open_in_memory() -> Result<Self, StoreError> {
        let conn = tokio_rusqlite::Connection::open_in_memory().await?;
        Self::init(conn).await
    }

    async fn init(conn: tokio_rusqlite::Connection) -> Result<Self, StoreError> {
        conn.call(|conn| {
            conn.execute_batch(SCHEMA)?;
            Ok(())
        })
        .await?;
        Ok(Self { conn })
    }
}

fn attendance_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<AttendanceRecord> {
    Ok(AttendanceRecord {
        id: row.get(0)?,
        student_name: row.get(1)?,
        date: row.get(2)?,
        period: row.get(3)?,
        time: row.get(4)?,
        confidence: row.get::<_, f64>(5)? as f32,
        created_at: row.get(6)?,
    })
}

const ATTENDANCE_COLUMNS: &str = "id, student_name, date, period, time, confidence, created_at";

#[async_trait]
impl Repository for SqliteStore {
    async fn find_signatures(&self) -> Result<Vec<Signature>, StoreError> {
        let rows = self
            .conn
            .call(|conn| {
                let mut stmt = conn.prepare(
                    "SELECT f.student_id, s.name, f.features
                     FROM student_features f JOIN students s ON s.id = f.student_id
                     ORDER BY f.student_id",
                )?;
                let rows = stmt
                    .query_map([], |row| {
                        Ok((
                            row.get::<_, i64>(0)?,
                            row.get::<_, String>(1)?,
                            row.get::<_, Vec<u8>>(2)?,
                        ))
                    })?
                    .collect::<Result<Vec<_>, rusqlite::Error>>()?;
                Ok(rows)
            })
            .await?;

        let signatures = rows
            .into_iter()
            .filter_map(|(student_id, student_name, blob)| {
                match FeatureVector::from_le_bytes(&blob) {
                    Ok(features) => Some(Signature {
                        student_id,
                        student_name,
                        features,
                    }),
                    Err(e) => {
                        tracing::warn!(
                            student_id,
                            student = %student_name,
                            error = %e,
                            "skipping unreadable signature"
                        );
                        None
                    }
                }
            })
            .collect();
        Ok(signatures)
    }

    async fn upsert_signature(&self, enrollment: NewEnrollment) -> Result<i64, StoreError> {
        let blob = enrollment.features.to_le_bytes();
        let id = self
            .conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                tx.execute(
                    "INSERT INTO students (name, folder_path, photo_count) VALUES (?1, ?2, ?3)
                     ON CONFLICT(name) DO UPDATE SET
                        folder_path = excluded.folder_path,
                        photo_count = excluded.photo_count",
                    params![
                        enrollment.student_name,
                        enrollment.folder_path,
                        enrollment.photo_count
                    ],
                )?;
                let id: i64 = tx.query_row(
                    "SELECT id FROM students WHERE name = ?1",
                    params![enrollment.student_name],
                    |row| row.get(0),
                )?;
                tx.execute(
                    "INSERT INTO student_features (student_id, student_name, features)
                     VALUES (?1, ?2, ?3)
                     ON CONFLICT(student_id) DO UPDATE SET
                        student_name = excluded.student_name,
                        features = excluded.features",
                    params![id, enrollment.student_name, blob],
                )?;
                tx.commit()?;
                Ok(id)
            })
            .await?;
        Ok(id)
    }

    async fn upsert_attendance(&self, entries: Vec<AttendanceEntry>) -> Result<usize, StoreError> {
        if entries.is_empty() {
            return Ok(0);
        }
        let recorded = self
            .conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                let mut recorded = 0;
                {
                    let mut stmt = tx.prepare(
                        "INSERT INTO attendance_records
                            (student_name, date, period, time, confidence)
                         VALUES (?1, ?2, ?3, ?4, ?5)
                         ON CONFLICT(student_name, date, period) DO NOTHING",
                    )?;
                    for entry in &entries {
                        recorded += stmt.execute(params![
                            entry.student_name,
                            entry.date.format(DATE_FORMAT).to_string(),
                            entry.period.as_str(),
                            entry.time,
                            entry.confidence as f64,
                        ])?;
                    }
                }
                tx.commit()?;
                Ok(recorded)
            })
            .await?;
        Ok(recorded)
    }

    async fn count_students(&self) -> Result<u64, StoreError> {
        let count = self
            .conn
            .call(|conn| {
                Ok(conn.query_row("SELECT COUNT(*) FROM students", [], |row| {
                    row.get::<_, i64>(0)
                })?)
            })
            .await?;
        Ok(count.max(0) as u64)
    }

    async fn count_present(&self, date: NaiveDate) -> Result<u64, StoreError> {
        let date = date.format(DATE_FORMAT).to_string();
        let count = self
            .conn
            .call(move |conn| {
                Ok(conn.query_row(
                    "SELECT COUNT(DISTINCT student_name) FROM attendance_records WHERE date = ?1",
                    params![date],
                    |row| row.get::<_, i64>(0),
                )?)
            })
            .await?;
        Ok(count.max(0) as u64)
    }

    async fn list_students(&self) -> Result<Vec<StudentSummary>, StoreError> {
        let students = self
            .conn
            .call(|conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, name, folder_path, photo_count, created_at
                     FROM students ORDER BY name",
                )?;
                let rows = stmt
                    .query_map([], |row| {
                        Ok(StudentSummary {
                            id: row.get(0)?,
                            name: row.get(1)?,
                            folder_path: row.get(2)?,
                            photo_count: row.get(3)?,
                            created_at: row.get(4)?,
                        })
                    })?
                    .collect::<Result<Vec<_>, rusqlite::Error>>()?;
                Ok(rows)
            })
            .await?;
        Ok(students)
    }

    async fn attendance_on(
        &self,
        date: NaiveDate,
        period: Option<Period>,
    ) -> Result<Vec<AttendanceRecord>, StoreError> {
        let date = date.format(DATE_FORMAT).to_string();
        let records = self
            .conn
            .call(move |conn| {
                let rows = match period {
                    Some(period) => {
                        let mut stmt = conn.prepare(&format!(
                            "SELECT {ATTENDANCE_COLUMNS} FROM attendance_records
                             WHERE date = ?1 AND period = ?2 ORDER BY time DESC, id DESC"
                        ))?;
                        let rows = stmt
                            .query_map(params![date, period.as_str()], attendance_row)?
                            .collect::<Result<Vec<_>, rusqlite::Error>>()?;
                        rows
                    }
                    None => {
                        let mut stmt = conn.prepare(&format!(
                            "SELECT {ATTENDANCE_COLUMNS} FROM attendance_records
                             WHERE date = ?1 ORDER BY time DESC, id DESC"
                        ))?;
                        let rows = stmt
                            .query_map(params![date], attendance_row)?
                            .collect::<Result<Vec<_>, rusqlite::Error>>()?;
                        rows
                    }
                };
                Ok(rows)
            })
            .await?;
        Ok(records)
    }

    async fn recent_activity(&self, limit: u32) -> Result<Vec<AttendanceRecord>, StoreError> {
        let records = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {ATTENDANCE_COLUMNS} FROM attendance_records
                     ORDER BY date DESC, time DESC, id DESC LIMIT ?1"
                ))?;
                let rows = stmt
                    .query_map(params![limit], attendance_row)?
                    .collect::<Result<Vec<_>, rusqlite::Error>>()?;
                Ok(rows)
            })
            .await?;
        Ok(records)
    }
}
