//! HTTP request handlers for API endpoints

use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::IntoResponse,
    Json,
};
use std::sync::Arc;
use tracing::info;

use crate::error::ApiError;
use crate::types::{
    HealthResponse, InferenceRequest, ListTasksQuery, MemoryResponse, ModelsResponse,
    PredictionRequest, PredictionResponse, SyncInferenceResponse, TaskAcceptedResponse,
    TaskResultResponse,
};
use crate::ApiState;
use agent_common::metrics::METRICS_CONTENT_TYPE;
use agent_storage::{ResultStore, StorageResult, TaskStatus, DEFAULT_LIST_LIMIT};
use agent_worker::tasks::CLASSIFIER_MODEL_NAME;
use agent_worker::{TaskEnvelope, TaskKind};

/// Health check endpoint
pub async fn health_check(State(state): State<ApiState>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: state.version.clone(),
    })
}

/// Queue a text-to-text inference task
pub async fn enqueue_inference(
    State(state): State<ApiState>,
    Json(request): Json<InferenceRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let model_name = request
        .model_name
        .clone()
        .unwrap_or_else(|| state.context.engine.default_model_name().to_string());
    let envelope = TaskEnvelope::new(TaskKind::RunInference {
        input_text: request.input_text.clone(),
        model_name: request.model_name,
    });
    let task_id = envelope.task_id.clone();
    info!("Queueing inference task {} for model {}", task_id, model_name);
    queue_task(&state, envelope, model_name, request.input_text).await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(TaskAcceptedResponse {
            task_id,
            status: TaskStatus::Pending,
        }),
    ))
}

/// Queue a ranked-label classification task
pub async fn enqueue_prediction(
    State(state): State<ApiState>,
    Json(request): Json<PredictionRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if state.context.classifier.is_none() {
        return Err(no_classifier());
    }
    let envelope = TaskEnvelope::new(TaskKind::Classify {
        text: request.text.clone(),
        top_k: request.top_k,
        threshold: request.threshold,
    });
    let task_id = envelope.task_id.clone();
    info!("Queueing classification task {}", task_id);
    queue_task(
        &state,
        envelope,
        CLASSIFIER_MODEL_NAME.to_string(),
        request.text,
    )
    .await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(TaskAcceptedResponse {
            task_id,
            status: TaskStatus::Pending,
        }),
    ))
}

/// Store the `pending` row, then publish. A task the broker refuses is
/// marked `failed` so it never stays pending forever.
async fn queue_task(
    state: &ApiState,
    envelope: TaskEnvelope,
    model_name: String,
    input_text: String,
) -> Result<(), ApiError> {
    let kind = envelope.task.name();
    let task_id = envelope.task_id.clone();
    let pending = (task_id.clone(), model_name.clone(), input_text.clone());
    with_store(state, move |store| {
        let (task_id, model_name, input_text) = pending;
        store.upsert_result(
            &task_id,
            &model_name,
            &input_text,
            TaskStatus::Pending,
            None,
            None,
        )
    })
    .await?;

    if let Err(err) = state.broker.publish(envelope).await {
        let message = err.to_string();
        with_store(state, move |store| {
            store.upsert_result(
                &task_id,
                &model_name,
                &input_text,
                TaskStatus::Failed,
                None,
                Some(&message),
            )
        })
        .await?;
        return Err(err.into());
    }
    state
        .metrics
        .tasks_enqueued_total
        .with_label_values(&[kind])
        .inc();
    Ok(())
}

/// Run a result-store call on the blocking pool; SQLite may wait on its
/// busy timeout while a worker process holds the write lock.
async fn with_store<T, F>(state: &ApiState, f: F) -> Result<T, ApiError>
where
    F: FnOnce(&ResultStore) -> StorageResult<T> + Send + 'static,
    T: Send + 'static,
{
    let store = Arc::clone(&state.context.store);
    Ok(tokio::task::spawn_blocking(move || f(&store)).await??)
}

/// Run inference immediately and return the output
pub async fn sync_inference(
    State(state): State<ApiState>,
    Json(request): Json<InferenceRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let engine = state.context.engine.clone();
    let outcome = tokio::task::spawn_blocking(move || {
        engine.predict(&request.input_text, request.model_name.as_deref())
    })
    .await?;

    let memory = state.context.engine.loader().memory().status();
    state.metrics.set_memory(memory.used_bytes, memory.limit_bytes);

    let result = match outcome {
        Ok(result) => {
            state.metrics.record_prediction(&result.model_name, "ok");
            result
        }
        Err(err) => {
            state.metrics.record_prediction("engine", "error");
            return Err(err.into());
        }
    };

    Ok(Json(SyncInferenceResponse {
        model_name: result.model_name,
        input_text: result.input_text,
        output_text: result.output_text,
        metadata: result.metadata,
    }))
}

pub async fn get_task(
    State(state): State<ApiState>,
    Path(task_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let record = with_store(&state, move |store| store.get_result(&task_id))
        .await?
        .ok_or_else(|| ApiError::not_found("Task not found"))?;
    Ok(Json(TaskResultResponse::from(record)))
}

/// Most recent tasks first
pub async fn list_tasks(
    State(state): State<ApiState>,
    Query(query): Query<ListTasksQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let limit = query.limit.unwrap_or(DEFAULT_LIST_LIMIT);
    let records = with_store(&state, move |store| store.list_results(limit)).await?;
    let body: Vec<TaskResultResponse> = records.into_iter().map(Into::into).collect();
    Ok(Json(body))
}

pub async fn memory_status(State(state): State<ApiState>) -> impl IntoResponse {
    let status = state.context.engine.loader().memory().status();
    Json(MemoryResponse {
        limit_bytes: status.limit_bytes,
        used_bytes: status.used_bytes,
        available_bytes: status.available_bytes(),
        usage_ratio: status.usage_ratio(),
    })
}

pub async fn list_models(State(state): State<ApiState>) -> impl IntoResponse {
    let engine = &state.context.engine;
    Json(ModelsResponse {
        default_model: engine.default_model_name().to_string(),
        available_models: engine.list_models().into_iter().map(|m| m.name).collect(),
    })
}

/// Ranked labels for a piece of text
pub async fn predict(
    State(state): State<ApiState>,
    Json(request): Json<PredictionRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let classifier = state.context.classifier.clone().ok_or_else(no_classifier)?;
    let scores = tokio::task::spawn_blocking(move || {
        classifier.predict(&request.text, request.top_k, request.threshold)
    })
    .await??;

    state.metrics.record_prediction(
        CLASSIFIER_MODEL_NAME,
        if scores.is_empty() { "empty" } else { "ok" },
    );
    if scores.is_empty() {
        return Err(ApiError::new(
            StatusCode::BAD_REQUEST,
            "No predictions available for the provided text.",
        ));
    }

    let body: Vec<PredictionResponse> = scores
        .into_iter()
        .map(|s| PredictionResponse {
            label: s.label,
            score: s.score,
        })
        .collect();
    Ok(Json(body))
}

/// Prometheus metrics endpoint
pub async fn metrics(State(state): State<ApiState>) -> impl IntoResponse {
    let memory = state.context.engine.loader().memory().status();
    state.metrics.set_memory(memory.used_bytes, memory.limit_bytes);
    (
        [(header::CONTENT_TYPE, METRICS_CONTENT_TYPE)],
        state.metrics.gather(),
    )
}

fn no_classifier() -> ApiError {
    ApiError::new(
        StatusCode::SERVICE_UNAVAILABLE,
        "No classifier is configured",
    )
}
