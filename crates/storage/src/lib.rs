//! Storage layer for inference task results
//!
//! Results live in a single SQLite table keyed by task id. The API server
//! writes the `pending` row when a task is accepted, and the worker moves it
//! through `running` to `succeeded` or `failed`.
//!
//! # Example
//!
//! ```rust,no_run
//! use agent_storage::{ResultStore, TaskStatus};
//!
//! fn main() -> agent_storage::StorageResult<()> {
//!     let store = ResultStore::open("data/inference.db")?;
//!     store.upsert_result("task-1", "default", "hello", TaskStatus::Pending, None, None)?;
//!     let record = store.get_result("task-1")?;
//!     assert!(record.is_some());
//!     Ok(())
//! }
//! ```

use thiserror::Error;

pub mod results;

pub use results::{InferenceRecord, ResultStore, TaskStatus, DEFAULT_LIST_LIMIT};

/// Storage layer errors
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid value in column {column}: {value}")]
    InvalidValue { column: &'static str, value: String },
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;
