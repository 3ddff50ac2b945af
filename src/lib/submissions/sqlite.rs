use std::{
    path::Path,
    sync::{Arc, Mutex},
};

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{Connection, OptionalExtension, Row, params};
use uuid::Uuid;

use super::{
    store::SubmissionStore,
    types::{Language, Status, StoreError, Submission},
};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS submissions (
    id          TEXT PRIMARY KEY,
    language    TEXT NOT NULL,
    status      TEXT NOT NULL,
    queued_at   TEXT NOT NULL,
    started_at  TEXT,
    finished_at TEXT
);
CREATE INDEX IF NOT EXISTS submissions_status_queued_at
    ON submissions (status, queued_at);
";

const COLUMNS: &str = "id, language, status, queued_at, started_at, finished_at";

/// SQLite-backed submission table. Calls run on the blocking pool.
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        Self::with_connection(Connection::open(path)?)
    }

    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(SCHEMA)?;
        Ok(SqliteStore {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn call<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T, StoreError> + Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let mut guard = conn.lock().map_err(|_| StoreError::Poisoned)?;
            f(&mut guard)
        })
        .await?
    }
}

/// Timestamps are stored with fixed precision so they sort as text.
fn format_time(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_time(id: &str, raw: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|at| at.with_timezone(&Utc))
        .map_err(|e| StoreError::Corrupt {
            id: id.to_string(),
            reason: format!("bad timestamp {raw:?}: {e}"),
        })
}

struct SubmissionRow {
    id: String,
    language: String,
    status: String,
    queued_at: String,
    started_at: Option<String>,
    finished_at: Option<String>,
}

impl SubmissionRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(SubmissionRow {
            id: row.get(0)?,
            language: row.get(1)?,
            status: row.get(2)?,
            queued_at: row.get(3)?,
            started_at: row.get(4)?,
            finished_at: row.get(5)?,
        })
    }

    fn into_submission(self) -> Result<Submission, StoreError> {
        let corrupt = |reason: String| StoreError::Corrupt {
            id: self.id.clone(),
            reason,
        };
        let id = Uuid::parse_str(&self.id).map_err(|e| corrupt(e.to_string()))?;
        let language: Language = self.language.parse().map_err(|e| corrupt(format!("{e}")))?;
        let status: Status = self.status.parse().map_err(|e| corrupt(format!("{e}")))?;
        let queued_at = parse_time(&self.id, &self.queued_at)?;
        let started_at = match &self.started_at {
            Some(raw) => Some(parse_time(&self.id, raw)?),
            None => None,
        };
        let finished_at = match &self.finished_at {
            Some(raw) => Some(parse_time(&self.id, raw)?),
            None => None,
        };
        Ok(Submission {
            id,
            language,
            status,
            queued_at,
            started_at,
            finished_at,
        })
    }
}

fn query_by_status(
    conn: &Connection,
    status: Status,
    limit: Option<usize>,
) -> Result<Vec<Submission>, StoreError> {
    // rowid breaks ties so equal timestamps come back in insertion order
    let sql = format!(
        "SELECT {COLUMNS} FROM submissions WHERE status = ?1 \
         ORDER BY queued_at ASC, rowid ASC LIMIT ?2"
    );
    let limit = limit.map(|n| n as i64).unwrap_or(-1);
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params![status.as_str(), limit], SubmissionRow::from_row)?;
    let submissions = rows
        .map(|row| row?.into_submission())
        .collect::<Result<Vec<_>, StoreError>>()?;
    Ok(submissions)
}

#[async_trait]
impl SubmissionStore for SqliteStore {
    async fn insert(&self, submission: &Submission) -> Result<(), StoreError> {
        let submission = submission.clone();
        self.call(move |conn| {
            let exists: Option<String> = conn
                .query_row(
                    "SELECT id FROM submissions WHERE id = ?1",
                    params![submission.id.to_string()],
                    |row| row.get(0),
                )
                .optional()?;
            if exists.is_some() {
                return Err(StoreError::Duplicate(submission.id));
            }
            conn.execute(
                &format!("INSERT INTO submissions ({COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6)"),
                params![
                    submission.id.to_string(),
                    submission.language.as_str(),
                    submission.status.as_str(),
                    format_time(submission.queued_at),
                    submission.started_at.map(format_time),
                    submission.finished_at.map(format_time),
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn get(&self, id: Uuid) -> Result<Option<Submission>, StoreError> {
        self.call(move |conn| {
            let row = conn
                .query_row(
                    &format!("SELECT {COLUMNS} FROM submissions WHERE id = ?1"),
                    params![id.to_string()],
                    SubmissionRow::from_row,
                )
                .optional()?;
            row.map(SubmissionRow::into_submission).transpose()
        })
        .await
    }

    async fn list_queued(&self, limit: usize) -> Result<Vec<Submission>, StoreError> {
        self.call(move |conn| query_by_status(conn, Status::Queued, Some(limit)))
            .await
    }

    async fn list_running(&self) -> Result<Vec<Submission>, StoreError> {
        self.call(|conn| query_by_status(conn, Status::Running, None))
            .await
    }

    async fn save_batch(&self, submissions: &[Submission]) -> Result<(), StoreError> {
        if submissions.is_empty() {
            return Ok(());
        }
        let submissions = submissions.to_vec();
        self.call(move |conn| {
            let tx = conn.transaction()?;
            for submission in &submissions {
                let updated = tx.execute(
                    "UPDATE submissions SET status = ?1, started_at = ?2, finished_at = ?3 \
                     WHERE id = ?4",
                    params![
                        submission.status.as_str(),
                        submission.started_at.map(format_time),
                        submission.finished_at.map(format_time),
                        submission.id.to_string(),
                    ],
                )?;
                if updated == 0 {
                    // dropping tx rolls back the rows already written
                    return Err(StoreError::NotFound(submission.id));
                }
            }
            tx.commit()?;
            Ok(())
        })
        .await
    }
}
