//! Persian data pipeline
//!
//! Pulls annotated samples from labelling tools, normalizes their text and
//! stores the result as a training dataset:
//! - [`cleaning`]: Persian text normalization
//! - [`labelers`]: Label Studio and Doccano clients
//! - [`pipeline`]: orchestration
//! - [`storage`]: JSON Lines dataset plus SQLite metadata

use thiserror::Error;

pub mod cleaning;
pub mod labelers;
pub mod pipeline;
pub mod storage;

pub use cleaning::{CleaningConfig, PersianTextCleaner};
pub use labelers::{DoccanoClient, LabelSource, LabelStudioClient, LabelledRecord};
pub use pipeline::{DataPipeline, DatasetRow};
pub use storage::{DataStorage, DEFAULT_METADATA_TABLE};

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Unexpected payload: {0}")]
    UnexpectedPayload(String),

    #[error("Invalid table name: {0:?}")]
    InvalidTableName(String),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for pipeline operations
pub type Result<T> = std::result::Result<T, PipelineError>;
