//! API request and response types

use agent_storage::{InferenceRecord, TaskStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Health check response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

/// Text-to-text inference request, queued or synchronous
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InferenceRequest {
    /// Raw text that should be processed by the model
    pub input_text: String,
    /// Model to use; the configured default when absent
    #[serde(default)]
    pub model_name: Option<String>,
}

/// Returned when a task has been accepted onto the queue
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskAcceptedResponse {
    pub task_id: String,
    pub status: TaskStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncInferenceResponse {
    pub model_name: String,
    pub input_text: String,
    pub output_text: String,
    pub metadata: HashMap<String, String>,
}

/// A stored task as returned by the task endpoints
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskResultResponse {
    pub task_id: String,
    pub model_name: String,
    pub input_text: String,
    pub output_text: Option<String>,
    pub status: TaskStatus,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<InferenceRecord> for TaskResultResponse {
    fn from(record: InferenceRecord) -> Self {
        Self {
            task_id: record.task_id,
            model_name: record.model_name,
            input_text: record.input_text,
            output_text: record.output_text,
            status: record.status,
            error: record.error,
            created_at: record.created_at,
        }
    }
}

/// Query parameters for listing tasks
#[derive(Debug, Clone, Deserialize)]
pub struct ListTasksQuery {
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryResponse {
    pub limit_bytes: u64,
    pub used_bytes: u64,
    pub available_bytes: u64,
    pub usage_ratio: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelsResponse {
    pub default_model: String,
    pub available_models: Vec<String>,
}

/// Ranked-label prediction request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictionRequest {
    pub text: String,
    #[serde(default)]
    pub top_k: Option<usize>,
    #[serde(default)]
    pub threshold: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionResponse {
    pub label: String,
    pub score: f64,
}

/// Body of every error response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub detail: String,
}
