//! Error types for model loading and prediction

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum InferenceError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Unknown model '{0}'")]
    UnknownModel(String),

    #[error(
        "Unable to reserve {requested} bytes for {owner}; limit of {limit} bytes would be exceeded"
    )]
    MemoryExhausted {
        requested: u64,
        owner: String,
        limit: u64,
    },

    #[error("Invalid model artifact at {}: {reason}", .path.display())]
    InvalidArtifact { path: PathBuf, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for inference operations
pub type Result<T> = std::result::Result<T, InferenceError>;
