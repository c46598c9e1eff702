//! Inference utilities for model loading and execution
//!
//! Two prediction surfaces share this crate:
//! - [`InferenceEngine`]: named text-to-text models loaded on demand through a
//!   caching [`ModelLoader`] that accounts for memory with a [`MemoryManager`]
//! - [`TextClassifier`]: a single persisted classifier loaded lazily on first
//!   use that returns ranked [`LabelScore`]s

pub mod classifier;
pub mod config;
pub mod engine;
pub mod error;
pub mod loader;
pub mod memory;

pub use classifier::{
    ClassificationModel, ClassifierConfig, LabelScore, LinearTextModel, Prediction,
    TextClassifier,
};
pub use config::ModelConfig;
pub use engine::{InferenceEngine, InferenceResult};
pub use error::{InferenceError, Result};
pub use loader::{LoadedModel, ModelLoader};
pub use memory::{MemoryManager, MemoryReservation, MemoryStatus, ScopedReservation};
