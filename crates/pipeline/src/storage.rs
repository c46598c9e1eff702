//! Persistence of cleaned datasets
//!
//! Rows go to a JSON Lines file that is rewritten on every run; per-record
//! metadata is appended to a SQLite table.

use crate::pipeline::DatasetRow;
use crate::{PipelineError, Result};
use rusqlite::{params, Connection};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

/// Table receiving one metadata row per stored record
pub const DEFAULT_METADATA_TABLE: &str = "labeled_sample_metadata";

#[derive(Debug)]
pub struct DataStorage {
    dataset_path: PathBuf,
    conn: Mutex<Connection>,
}

impl DataStorage {
    /// Open storage writing the dataset to `dataset_path` and metadata to the
    /// SQLite database at `metadata_db`.
    pub fn open(dataset_path: impl Into<PathBuf>, metadata_db: impl AsRef<Path>) -> Result<Self> {
        let metadata_db = metadata_db.as_ref();
        if let Some(parent) = metadata_db.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(metadata_db)?;
        conn.execute_batch("PRAGMA journal_mode = WAL;")?;
        Ok(Self {
            dataset_path: dataset_path.into(),
            conn: Mutex::new(conn),
        })
    }

    /// Storage whose metadata lives in memory (for testing)
    pub fn in_memory(dataset_path: impl Into<PathBuf>) -> Result<Self> {
        Ok(Self {
            dataset_path: dataset_path.into(),
            conn: Mutex::new(Connection::open_in_memory()?),
        })
    }

    #[must_use]
    pub fn dataset_path(&self) -> &Path {
        &self.dataset_path
    }

    /// Write `rows` to the dataset file and append their metadata to
    /// `metadata_table`. Does nothing for an empty slice.
    pub fn store(&self, rows: &[DatasetRow], metadata_table: &str) -> Result<()> {
        if rows.is_empty() {
            return Ok(());
        }
        validate_table_name(metadata_table)?;

        self.write_dataset(rows)?;
        self.write_metadata(rows, metadata_table)?;
        tracing::info!(
            "Stored {} rows in {} (metadata table {})",
            rows.len(),
            self.dataset_path.display(),
            metadata_table
        );
        Ok(())
    }

    /// Number of metadata rows in `table`
    pub fn metadata_count(&self, table: &str) -> Result<usize> {
        validate_table_name(table)?;
        let conn = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        let count: i64 =
            conn.query_row(&format!("SELECT COUNT(*) FROM \"{table}\""), [], |row| row.get(0))?;
        Ok(usize::try_from(count).unwrap_or(0))
    }

    fn write_dataset(&self, rows: &[DatasetRow]) -> Result<()> {
        if let Some(parent) = self.dataset_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let mut writer = BufWriter::new(std::fs::File::create(&self.dataset_path)?);
        for row in rows {
            serde_json::to_writer(&mut writer, row)?;
            writer.write_all(b"\n")?;
        }
        writer.flush()?;
        Ok(())
    }

    fn write_metadata(&self, rows: &[DatasetRow], table: &str) -> Result<()> {
        let mut conn = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        let tx = conn.transaction()?;
        tx.execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS \"{table}\" (
                record_id TEXT NOT NULL,
                source TEXT NOT NULL,
                label_count INTEGER NOT NULL,
                labels TEXT NOT NULL
            )"
        ))?;
        {
            let mut stmt = tx.prepare(&format!(
                "INSERT INTO \"{table}\" (record_id, source, label_count, labels) VALUES (?1, ?2, ?3, ?4)"
            ))?;
            for row in rows {
                let labels = serde_json::to_string(&row.labels)?;
                let label_count = i64::try_from(row.labels.len()).unwrap_or(i64::MAX);
                stmt.execute(params![row.record_id, row.source, label_count, labels])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// Metadata rows of `table` as `(record_id, source, label_count, labels)`
    pub fn metadata_rows(&self, table: &str) -> Result<Vec<(String, String, i64, Vec<String>)>> {
        validate_table_name(table)?;
        let conn = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        let mut stmt = conn.prepare(&format!(
            "SELECT record_id, source, label_count, labels FROM \"{table}\" ORDER BY rowid"
        ))?;
        let raw = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, i64>(2)?,
                    row.get::<_, String>(3)?,
                ))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        raw.into_iter()
            .map(|(id, source, count, labels)| -> Result<_> {
                Ok((id, source, count, serde_json::from_str(&labels)?))
            })
            .collect()
    }
}

/// Table names are interpolated into SQL, so only identifiers are allowed.
fn validate_table_name(name: &str) -> Result<()> {
    let mut chars = name.chars();
    let valid = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
    if valid {
        Ok(())
    } else {
        Err(PipelineError::InvalidTableName(name.to_string()))
    }
}
