//! SQLite-backed store of inference task results
//!
//! Schema:
//! - inference_results: task_id, model_name, input_text, output_text, status,
//!   error, created_at

use crate::{StorageError, StorageResult};
use chrono::{DateTime, NaiveDateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Number of records returned by [`ResultStore::list_results`] by default
pub const DEFAULT_LIST_LIMIT: usize = 100;

const SCHEMA: &str = r"
CREATE TABLE IF NOT EXISTS inference_results (
    task_id TEXT PRIMARY KEY,
    model_name TEXT NOT NULL,
    input_text TEXT NOT NULL,
    output_text TEXT,
    status TEXT NOT NULL,
    error TEXT,
    created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
);

CREATE INDEX IF NOT EXISTS idx_inference_results_created ON inference_results(created_at);
";

/// Lifecycle of a queued inference task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
}

impl TaskStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        }
    }

    /// True once the task can no longer change state
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "succeeded" => Ok(Self::Succeeded),
            "failed" => Ok(Self::Failed),
            other => Err(StorageError::InvalidValue {
                column: "status",
                value: other.to_string(),
            }),
        }
    }
}

/// A stored inference task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InferenceRecord {
    pub task_id: String,
    pub model_name: String,
    pub input_text: String,
    pub output_text: Option<String>,
    pub status: TaskStatus,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Persists task results. The connection is guarded by a mutex so the store
/// can be shared across threads.
#[derive(Debug)]
pub struct ResultStore {
    conn: Mutex<Connection>,
}

impl ResultStore {
    /// Open or create the database at `path`
    pub fn open(path: impl AsRef<Path>) -> StorageResult<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;",
        )?;
        conn.execute_batch(SCHEMA)?;
        tracing::debug!("Opened result store at {}", path.display());

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Create an in-memory store (for testing)
    pub fn in_memory() -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Insert a result, or update `output_text`, `status` and `error` of an
    /// existing one. Model name, input and creation time are kept from the
    /// first write.
    pub fn upsert_result(
        &self,
        task_id: &str,
        model_name: &str,
        input_text: &str,
        status: TaskStatus,
        output_text: Option<&str>,
        error: Option<&str>,
    ) -> StorageResult<()> {
        self.conn().execute(
            "INSERT INTO inference_results (task_id, model_name, input_text, output_text, status, error)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(task_id) DO UPDATE SET
                 output_text = excluded.output_text,
                 status = excluded.status,
                 error = excluded.error",
            params![task_id, model_name, input_text, output_text, status.as_str(), error],
        )?;
        tracing::debug!("Task {} is {}", task_id, status);
        Ok(())
    }

    pub fn get_result(&self, task_id: &str) -> StorageResult<Option<InferenceRecord>> {
        let conn = self.conn();
        let raw = conn
            .query_row(
                "SELECT task_id, model_name, input_text, output_text, status, error, created_at
                 FROM inference_results WHERE task_id = ?1",
                params![task_id],
                RawRecord::from_row,
            )
            .optional()?;
        raw.map(RawRecord::into_record).transpose()
    }

    /// Most recent results first
    pub fn list_results(&self, limit: usize) -> StorageResult<Vec<InferenceRecord>> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT task_id, model_name, input_text, output_text, status, error, created_at
             FROM inference_results
             ORDER BY created_at DESC, rowid DESC
             LIMIT ?1",
        )?;
        let rows = stmt
            .query_map(params![limit], RawRecord::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().map(RawRecord::into_record).collect()
    }

    pub fn count(&self) -> StorageResult<usize> {
        let count: i64 =
            self.conn()
                .query_row("SELECT COUNT(*) FROM inference_results", [], |row| row.get(0))?;
        Ok(usize::try_from(count).unwrap_or(0))
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Row as read from SQLite, before status and timestamp parsing
struct RawRecord {
    task_id: String,
    model_name: String,
    input_text: String,
    output_text: Option<String>,
    status: String,
    error: Option<String>,
    created_at: Option<String>,
}

impl RawRecord {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            task_id: row.get(0)?,
            model_name: row.get(1)?,
            input_text: row.get(2)?,
            output_text: row.get(3)?,
            status: row.get(4)?,
            error: row.get(5)?,
            created_at: row.get(6)?,
        })
    }

    fn into_record(self) -> StorageResult<InferenceRecord> {
        let created_at = match self.created_at.as_deref() {
            Some(raw) => parse_timestamp(raw)?,
            None => Utc::now(),
        };
        Ok(InferenceRecord {
            task_id: self.task_id,
            model_name: self.model_name,
            input_text: self.input_text,
            output_text: self.output_text,
            status: self.status.parse()?,
            error: self.error,
            created_at,
        })
    }
}

/// SQLite writes `CURRENT_TIMESTAMP` as `YYYY-MM-DD HH:MM:SS` in UTC.
fn parse_timestamp(raw: &str) -> StorageResult<DateTime<Utc>> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Ok(parsed.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f")
        .map(|naive| naive.and_utc())
        .map_err(|_| StorageError::InvalidValue {
            column: "created_at",
            value: raw.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trip_through_text() {
        for status in [
            TaskStatus::Pending,
            TaskStatus::Running,
            TaskStatus::Succeeded,
            TaskStatus::Failed,
        ] {
            assert_eq!(status.as_str().parse::<TaskStatus>().unwrap(), status);
        }
        assert!("done".parse::<TaskStatus>().is_err());
        assert!(TaskStatus::Failed.is_terminal());
        assert!(!TaskStatus::Running.is_terminal());
    }

    #[test]
    fn test_parse_timestamp_formats() {
        let sqlite = parse_timestamp("2024-03-01 12:30:45").unwrap();
        assert_eq!(sqlite.to_rfc3339(), "2024-03-01T12:30:45+00:00");

        let rfc = parse_timestamp("2024-03-01T16:00:45+03:30").unwrap();
        assert_eq!(rfc, sqlite);

        let fractional = parse_timestamp("2024-03-01 12:30:45.250").unwrap();
        assert_eq!(fractional.timestamp_subsec_millis(), 250);

        assert!(parse_timestamp("yesterday").is_err());
    }

    #[test]
    fn test_upsert_keeps_original_fields() {
        let store = ResultStore::in_memory().unwrap();
        store
            .upsert_result("t1", "default", "hello", TaskStatus::Pending, None, None)
            .unwrap();
        store
            .upsert_result("t1", "other", "changed", TaskStatus::Succeeded, Some("olleh"), None)
            .unwrap();

        let record = store.get_result("t1").unwrap().unwrap();
        assert_eq!(record.model_name, "default");
        assert_eq!(record.input_text, "hello");
        assert_eq!(record.output_text.as_deref(), Some("olleh"));
        assert_eq!(record.status, TaskStatus::Succeeded);
        assert_eq!(store.count().unwrap(), 1);
    }

    #[test]
    fn test_upsert_clears_previous_error() {
        let store = ResultStore::in_memory().unwrap();
        store
            .upsert_result("t1", "m", "x", TaskStatus::Failed, None, Some("boom"))
            .unwrap();
        store
            .upsert_result("t1", "m", "x", TaskStatus::Running, None, None)
            .unwrap();
        let record = store.get_result("t1").unwrap().unwrap();
        assert_eq!(record.status, TaskStatus::Running);
        assert!(record.error.is_none());
    }

    #[test]
    fn test_get_missing_result() {
        let store = ResultStore::in_memory().unwrap();
        assert!(store.get_result("nope").unwrap().is_none());
    }

    #[test]
    fn test_unknown_status_on_disk_is_an_error() {
        let store = ResultStore::in_memory().unwrap();
        store
            .conn()
            .execute(
                "INSERT INTO inference_results (task_id, model_name, input_text, status)
                 VALUES ('bad', 'm', 'x', 'exploded')",
                [],
            )
            .unwrap();
        assert!(matches!(
            store.get_result("bad"),
            Err(StorageError::InvalidValue { column: "status", .. })
        ));
    }
}
