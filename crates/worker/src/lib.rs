//! Background execution of queued inference tasks
//!
//! - [`broker`]: the queue between the API server and workers
//! - [`tasks`]: task bodies that run the engine or classifier and record results
//! - [`worker`]: the consumer loop

pub mod broker;
pub mod tasks;
pub mod worker;

use agent_common::config::AppConfig;
use agent_common::metrics::METRICS_CONTENT_TYPE;
use agent_common::Metrics;
use agent_inference::{
    ClassifierConfig, InferenceEngine, MemoryManager, ModelConfig, ModelLoader, TextClassifier,
};
use agent_storage::ResultStore;
use anyhow::{Context, Result};
use axum::{extract::State, http::header, response::IntoResponse, routing::get, Router};
use std::sync::Arc;

pub use broker::{
    connect, is_in_process, Broker, BrokerError, BrokerResult, MemoryBroker, SqliteBroker,
    TaskEnvelope, TaskKind,
};
pub use tasks::{
    classify_task, reject_classification, run_inference_task, TaskError, TaskOutcome,
};
pub use worker::{Processed, TaskContext, Worker};

/// Model served when a request names none, built from configuration
#[must_use]
pub fn default_model_config(config: &AppConfig) -> ModelConfig {
    let settings = &config.model;
    let mut model = ModelConfig::new(settings.name.clone())
        .with_metadata("behavior", settings.behavior.clone());
    if let Some(path) = &settings.path {
        model = model.with_path(path);
    }
    if let Some(prefix) = &settings.prefix {
        model = model.with_metadata("prefix", prefix.clone());
    }
    if let Some(suffix) = &settings.suffix {
        model = model.with_metadata("suffix", suffix.clone());
    }
    model
}

/// Classifier described by configuration, if any
#[must_use]
pub fn classifier_from_config(config: &AppConfig) -> Option<TextClassifier> {
    config.classifier.as_ref().map(|settings| {
        let mut classifier_config =
            ClassifierConfig::new(&settings.artifact_path, settings.labels.clone());
        classifier_config.default_top_k = settings.top_k;
        classifier_config.probability_threshold = settings.threshold;
        TextClassifier::new(classifier_config)
    })
}

/// Engine, classifier and result store shared by the API server and workers
pub fn build_context(config: &AppConfig) -> Result<TaskContext> {
    let memory = Arc::new(MemoryManager::new(config.memory_limit_bytes));
    let loader = Arc::new(ModelLoader::new(memory));
    let engine = InferenceEngine::new(loader, default_model_config(config), std::iter::empty());

    let store = ResultStore::open(&config.db_path).with_context(|| {
        format!("Failed to open result store: {}", config.db_path.display())
    })?;

    Ok(TaskContext {
        engine: Arc::new(engine),
        classifier: classifier_from_config(config).map(Arc::new),
        store: Arc::new(store),
    })
}

/// Router exposing `GET /metrics` for `metrics`
pub fn metrics_router(metrics: Metrics) -> Router {
    Router::new()
        .route("/metrics", get(serve_metrics))
        .with_state(metrics)
}

async fn serve_metrics(State(metrics): State<Metrics>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, METRICS_CONTENT_TYPE)],
        metrics.gather(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use agent_common::ConfigFile;
    use std::collections::HashMap;

    fn config_with(pairs: &[(&str, &str)]) -> AppConfig {
        let env: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AppConfig::resolve(&ConfigFile::default(), |key| env.get(key).cloned()).unwrap()
    }

    #[test]
    fn test_default_model_from_env() {
        let config = config_with(&[
            ("DEFAULT_MODEL_NAME", "greeter"),
            ("DEFAULT_MODEL_PREFIX", "Hello, "),
        ]);
        let model = default_model_config(&config);
        assert_eq!(model.name, "greeter");
        assert_eq!(model.metadata["behavior"], "echo");
        assert_eq!(model.metadata["prefix"], "Hello, ");
        assert!(model.path.is_none());
    }

    #[test]
    fn test_build_context_wires_engine_and_store() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("db").join("inference.db");
        let config = config_with(&[
            ("INFERENCE_DB_PATH", db.to_str().unwrap()),
            ("DEFAULT_MODEL_BEHAVIOR", "reverse"),
            ("INFERENCE_MEMORY_LIMIT", "1073741824"),
        ]);
        let context = build_context(&config).unwrap();
        assert!(db.exists());
        assert!(context.classifier.is_none());
        assert_eq!(
            context.engine.predict("abc", None).unwrap().output_text,
            "cba"
        );
    }

    #[test]
    fn test_classifier_from_config() {
        let config = config_with(&[
            ("CLASSIFIER_ARTIFACT_PATH", "/models/sentiment.json"),
            ("CLASSIFIER_LABELS", "neg, pos"),
            ("CLASSIFIER_TOP_K", "1"),
        ]);
        let classifier = classifier_from_config(&config).unwrap();
        assert_eq!(classifier.config().labels, vec!["neg", "pos"]);
        assert_eq!(classifier.config().default_top_k, 1);
        assert!(!classifier.is_loaded());
    }
}
