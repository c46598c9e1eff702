//! Task bodies executed by the worker
//!
//! Both tasks record their lifecycle in the result store: `running` before
//! any work, then `succeeded` with output or `failed` with the error text.

use agent_inference::{InferenceEngine, InferenceError, TextClassifier};
use agent_storage::{ResultStore, StorageError, TaskStatus};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Model name recorded for classification tasks
pub const CLASSIFIER_MODEL_NAME: &str = "classifier";

#[derive(Error, Debug)]
pub enum TaskError {
    #[error(transparent)]
    Inference(#[from] InferenceError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("No classifier is configured")]
    ClassifierUnavailable,
}

/// Summary of a finished task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskOutcome {
    pub task_id: String,
    pub model_name: String,
    pub output_text: String,
    pub status: TaskStatus,
}

/// Run `input_text` through the engine and record the result under `task_id`.
pub fn run_inference_task(
    engine: &InferenceEngine,
    store: &ResultStore,
    task_id: &str,
    input_text: &str,
    model_name: Option<&str>,
) -> Result<TaskOutcome, TaskError> {
    let target_model = model_name.unwrap_or(engine.default_model_name());
    store.upsert_result(task_id, target_model, input_text, TaskStatus::Running, None, None)?;

    let result = match engine.predict(input_text, model_name) {
        Ok(result) => result,
        Err(err) => {
            tracing::warn!("Task {} failed: {}", task_id, err);
            let message = err.to_string();
            store.upsert_result(
                task_id,
                target_model,
                input_text,
                TaskStatus::Failed,
                None,
                Some(&message),
            )?;
            return Err(err.into());
        }
    };

    store.upsert_result(
        task_id,
        &result.model_name,
        &result.input_text,
        TaskStatus::Succeeded,
        Some(&result.output_text),
        None,
    )?;
    Ok(TaskOutcome {
        task_id: task_id.to_string(),
        model_name: result.model_name,
        output_text: result.output_text,
        status: TaskStatus::Succeeded,
    })
}

/// Mark a classification task `failed` when this process has no classifier.
///
/// The message is already off the queue, so the row must not stay `pending`.
pub fn reject_classification(
    store: &ResultStore,
    task_id: &str,
    text: &str,
) -> Result<TaskOutcome, TaskError> {
    let err = TaskError::ClassifierUnavailable;
    tracing::warn!("Task {} failed: {}", task_id, err);
    let message = err.to_string();
    store.upsert_result(
        task_id,
        CLASSIFIER_MODEL_NAME,
        text,
        TaskStatus::Failed,
        None,
        Some(&message),
    )?;
    Err(err)
}

/// Classify `text` and store the ranked labels as a JSON array.
pub fn classify_task(
    classifier: &TextClassifier,
    store: &ResultStore,
    task_id: &str,
    text: &str,
    top_k: Option<usize>,
    threshold: Option<f64>,
) -> Result<TaskOutcome, TaskError> {
    store.upsert_result(task_id, CLASSIFIER_MODEL_NAME, text, TaskStatus::Running, None, None)?;

    let output_text = match classifier
        .predict(text, top_k, threshold)
        .map_err(TaskError::from)
        .and_then(|scores| serde_json::to_string(&scores).map_err(TaskError::from))
    {
        Ok(output_text) => output_text,
        Err(err) => {
            tracing::warn!("Task {} failed: {}", task_id, err);
            let message = err.to_string();
            store.upsert_result(
                task_id,
                CLASSIFIER_MODEL_NAME,
                text,
                TaskStatus::Failed,
                None,
                Some(&message),
            )?;
            return Err(err);
        }
    };

    store.upsert_result(
        task_id,
        CLASSIFIER_MODEL_NAME,
        text,
        TaskStatus::Succeeded,
        Some(&output_text),
        None,
    )?;
    Ok(TaskOutcome {
        task_id: task_id.to_string(),
        model_name: CLASSIFIER_MODEL_NAME.to_string(),
        output_text,
        status: TaskStatus::Succeeded,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use agent_inference::{
        ClassificationModel, ClassifierConfig, MemoryManager, ModelConfig, ModelLoader,
        Prediction,
    };
    use std::sync::Arc;

    fn engine() -> InferenceEngine {
        let loader = Arc::new(ModelLoader::new(Arc::new(MemoryManager::new(1_000))));
        InferenceEngine::new(
            loader,
            ModelConfig::new("default")
                .with_memory_bytes(10)
                .with_metadata("behavior", "reverse"),
            [ModelConfig::new("too-big").with_memory_bytes(10_000)],
        )
    }

    struct Fixed;

    impl ClassificationModel for Fixed {
        fn predict_proba(&self, _text: &str) -> Option<Vec<f64>> {
            Some(vec![0.25, 0.75])
        }

        fn predict(&self, _text: &str) -> Prediction {
            Prediction::Index(1)
        }
    }

    #[test]
    fn test_run_inference_task_success() {
        let store = ResultStore::in_memory().unwrap();
        let outcome = run_inference_task(&engine(), &store, "t1", "abc", None).unwrap();
        assert_eq!(outcome.output_text, "cba");
        assert_eq!(outcome.model_name, "default");
        assert_eq!(outcome.status, TaskStatus::Succeeded);

        let record = store.get_result("t1").unwrap().unwrap();
        assert_eq!(record.status, TaskStatus::Succeeded);
        assert_eq!(record.output_text.as_deref(), Some("cba"));
    }

    #[test]
    fn test_run_inference_task_records_failure() {
        let store = ResultStore::in_memory().unwrap();
        let err = run_inference_task(&engine(), &store, "t2", "abc", Some("too-big")).unwrap_err();
        assert!(matches!(
            err,
            TaskError::Inference(InferenceError::MemoryExhausted { .. })
        ));

        let record = store.get_result("t2").unwrap().unwrap();
        assert_eq!(record.status, TaskStatus::Failed);
        assert_eq!(record.model_name, "too-big");
        assert!(record.error.unwrap().contains("too-big"));
    }

    #[test]
    fn test_run_inference_task_unknown_model() {
        let store = ResultStore::in_memory().unwrap();
        assert!(run_inference_task(&engine(), &store, "t3", "abc", Some("ghost")).is_err());
        let record = store.get_result("t3").unwrap().unwrap();
        assert_eq!(record.error.as_deref(), Some("Unknown model 'ghost'"));
    }

    #[test]
    fn test_classify_task_stores_json_scores() {
        let store = ResultStore::in_memory().unwrap();
        let classifier = TextClassifier::with_loader(
            ClassifierConfig::new("unused.json", vec!["neg".into(), "pos".into()]),
            Box::new(|_| Ok(Arc::new(Fixed) as Arc<dyn ClassificationModel>)),
        );

        let outcome = classify_task(&classifier, &store, "c1", "خوب", Some(1), None).unwrap();
        assert_eq!(outcome.model_name, CLASSIFIER_MODEL_NAME);

        let scores: serde_json::Value = serde_json::from_str(&outcome.output_text).unwrap();
        assert_eq!(scores, serde_json::json!([{"label": "pos", "score": 0.75}]));

        let record = store.get_result("c1").unwrap().unwrap();
        assert_eq!(record.output_text.as_deref(), Some(outcome.output_text.as_str()));
    }

    #[test]
    fn test_classify_task_records_load_failure() {
        let store = ResultStore::in_memory().unwrap();
        let classifier = TextClassifier::new(ClassifierConfig::new(
            "/nonexistent/model.json",
            vec!["a".into()],
        ));
        assert!(classify_task(&classifier, &store, "c2", "text", None, None).is_err());
        let record = store.get_result("c2").unwrap().unwrap();
        assert_eq!(record.status, TaskStatus::Failed);
        assert!(record.error.is_some());
    }
}
