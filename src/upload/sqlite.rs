//! SQLite job store.
//!
//! Each change is its own transaction, so a crash leaves either the old
//! or the new row, never a torn queue.

use super::{JobStore, QueueError, UploadJob};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::{Path, PathBuf};
use std::str::FromStr;

const SCHEMA_VERSION: i64 = 1;

const JOB_COLUMNS: &str = "id, created_at_ms, status, grade, front_grade, back_grade, \
     front_path, back_path, base_id, device, retries, last_error";

/// Job store backed by an SQLite database file.
#[derive(Debug)]
pub struct SqliteJobStore {
    conn: Connection,
    path: Option<PathBuf>,
}

impl SqliteJobStore {
    /// Opens or creates the database at `path`.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, QueueError> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(&path)?;
        conn.execute_batch(
            "
            PRAGMA journal_mode=WAL;
            PRAGMA synchronous=FULL;
            ",
        )?;
        migrate(&conn)?;
        tracing::debug!(path = %path.display(), "Opened upload queue database");
        Ok(Self {
            conn,
            path: Some(path),
        })
    }

    /// Store that lives only as long as the connection.
    pub fn open_in_memory() -> Result<Self, QueueError> {
        let conn = Connection::open_in_memory()?;
        migrate(&conn)?;
        Ok(Self { conn, path: None })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }
}

fn migrate(conn: &Connection) -> Result<(), rusqlite::Error> {
    let version: i64 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;
    if version < 1 {
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS upload_jobs (
                id            INTEGER PRIMARY KEY AUTOINCREMENT,
                created_at_ms INTEGER NOT NULL,
                status        TEXT    NOT NULL,
                grade         TEXT    NOT NULL,
                front_grade   TEXT    NOT NULL,
                back_grade    TEXT    NOT NULL,
                front_path    TEXT    NOT NULL,
                back_path     TEXT    NOT NULL,
                base_id       TEXT    NOT NULL,
                device        TEXT    NOT NULL,
                retries       INTEGER NOT NULL DEFAULT 0,
                last_error    TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_upload_jobs_status
                ON upload_jobs (status, created_at_ms);
            ",
        )?;
        conn.pragma_update(None, "user_version", SCHEMA_VERSION)?;
        tracing::info!(version = SCHEMA_VERSION, "Upload queue schema created");
    }
    Ok(())
}

fn parsed<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let raw: String = row.get(idx)?;
    raw.parse()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn job_from_row(row: &Row<'_>) -> rusqlite::Result<UploadJob> {
    let id: i64 = row.get(0)?;
    let front_path: String = row.get(6)?;
    let back_path: String = row.get(7)?;
    Ok(UploadJob {
        id: u64::try_from(id)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(0, Type::Integer, Box::new(e)))?,
        created_at_ms: row.get(1)?,
        status: parsed(row, 2)?,
        grade: parsed(row, 3)?,
        front_grade: parsed(row, 4)?,
        back_grade: parsed(row, 5)?,
        front_path: PathBuf::from(front_path),
        back_path: PathBuf::from(back_path),
        base_id: row.get(8)?,
        device: row.get(9)?,
        retries: row.get(10)?,
        last_error: row.get(11)?,
    })
}

fn row_id(id: u64) -> Result<i64, QueueError> {
    i64::try_from(id).map_err(|_| QueueError::NotFound(id))
}

impl JobStore for SqliteJobStore {
    fn insert(&mut self, job: UploadJob) -> Result<u64, QueueError> {
        self.conn.execute(
            "INSERT INTO upload_jobs (created_at_ms, status, grade, front_grade, back_grade,
                 front_path, back_path, base_id, device, retries, last_error)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                job.created_at_ms,
                job.status.as_str(),
                job.grade.code(),
                job.front_grade.code(),
                job.back_grade.code(),
                job.front_path.to_string_lossy(),
                job.back_path.to_string_lossy(),
                job.base_id,
                job.device,
                job.retries,
                job.last_error,
            ],
        )?;
        let id = self.conn.last_insert_rowid();
        tracing::debug!(job = id, base_id = %job.base_id, "Upload job stored");
        Ok(id as u64)
    }

    fn get(&self, id: u64) -> Result<Option<UploadJob>, QueueError> {
        let job = self
            .conn
            .query_row(
                &format!("SELECT {JOB_COLUMNS} FROM upload_jobs WHERE id = ?1"),
                params![row_id(id)?],
                job_from_row,
            )
            .optional()?;
        Ok(job)
    }

    fn update(&mut self, job: &UploadJob) -> Result<(), QueueError> {
        let changed = self.conn.execute(
            "UPDATE upload_jobs
             SET created_at_ms = ?2, status = ?3, grade = ?4, front_grade = ?5,
                 back_grade = ?6, front_path = ?7, back_path = ?8, base_id = ?9,
                 device = ?10, retries = ?11, last_error = ?12
             WHERE id = ?1",
            params![
                row_id(job.id)?,
                job.created_at_ms,
                job.status.as_str(),
                job.grade.code(),
                job.front_grade.code(),
                job.back_grade.code(),
                job.front_path.to_string_lossy(),
                job.back_path.to_string_lossy(),
                job.base_id,
                job.device,
                job.retries,
                job.last_error,
            ],
        )?;
        if changed == 0 {
            return Err(QueueError::NotFound(job.id));
        }
        Ok(())
    }

    fn all(&self) -> Result<Vec<UploadJob>, QueueError> {
        let mut stmt = self
            .conn
            .prepare(&format!("SELECT {JOB_COLUMNS} FROM upload_jobs ORDER BY id"))?;
        let jobs = stmt
            .query_map([], job_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(jobs)
    }

    fn remove_where(&mut self, pred: &dyn Fn(&UploadJob) -> bool) -> Result<usize, QueueError> {
        let doomed: Vec<u64> = self
            .all()?
            .into_iter()
            .filter(|job| pred(job))
            .map(|job| job.id)
            .collect();
        if doomed.is_empty() {
            return Ok(0);
        }

        let tx = self.conn.transaction()?;
        {
            let mut stmt = tx.prepare("DELETE FROM upload_jobs WHERE id = ?1")?;
            for &id in &doomed {
                stmt.execute(params![row_id(id)?])?;
            }
        }
        tx.commit()?;
        Ok(doomed.len())
    }
}
