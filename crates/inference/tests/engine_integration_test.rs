//! End-to-end tests for the inference engine and classifier using on-disk artifacts

use agent_inference::{
    ClassifierConfig, InferenceEngine, InferenceError, MemoryManager, ModelConfig, ModelLoader,
    TextClassifier,
};
use std::sync::Arc;

fn write(dir: &tempfile::TempDir, name: &str, contents: &str) -> std::path::PathBuf {
    let path = dir.path().join(name);
    std::fs::write(&path, contents).unwrap();
    path
}

#[test]
fn test_engine_serves_artifacts_within_memory_budget() {
    let dir = tempfile::tempdir().unwrap();
    let reverse = write(&dir, "reverse.json", r#"{"behavior": "reverse"}"#);
    let prompt = write(&dir, "prompt.md", "Q: ");

    let memory = Arc::new(MemoryManager::new(300));
    let loader = Arc::new(ModelLoader::new(Arc::clone(&memory)));
    let engine = InferenceEngine::new(
        Arc::clone(&loader),
        ModelConfig::new("default").with_memory_bytes(100),
        [
            ModelConfig::new("reverse")
                .with_path(&reverse)
                .with_memory_bytes(100),
            ModelConfig::new("prompt")
                .with_path(&prompt)
                .with_memory_bytes(100),
            ModelConfig::new("huge").with_memory_bytes(1_000),
        ],
    );

    assert_eq!(engine.predict("abc", Some("reverse")).unwrap().output_text, "cba");
    assert_eq!(engine.predict("why", Some("prompt")).unwrap().output_text, "Q:why");
    assert_eq!(memory.used_bytes(), 200);

    let err = engine.predict("x", Some("huge")).unwrap_err();
    assert!(matches!(err, InferenceError::MemoryExhausted { .. }));
    assert!(err.to_string().contains("huge"));

    loader.unload("reverse");
    assert_eq!(memory.used_bytes(), 100);
    assert_eq!(engine.predict("ok", None).unwrap().output_text, "ok");
    assert_eq!(memory.status().available_bytes(), 100);
}

#[test]
fn test_classifier_from_artifact() {
    let dir = tempfile::tempdir().unwrap();
    let artifact = write(
        &dir,
        "sentiment.json",
        r#"{
            "labels": ["negative", "neutral", "positive"],
            "bias": [0.0, 0.5, 0.0],
            "weights": {
                "عالی": [-1.0, 0.0, 3.0],
                "بد": [3.0, 0.0, -1.0]
            }
        }"#,
    );

    let mut config = ClassifierConfig::new(
        &artifact,
        vec!["negative".into(), "neutral".into(), "positive".into()],
    );
    config.default_top_k = 2;
    let classifier = TextClassifier::new(config);
    assert!(!classifier.is_loaded());

    let results = classifier.predict("فیلم عالی بود", None, None).unwrap();
    assert!(classifier.is_loaded());
    assert_eq!(results.len(), 2);
    assert_eq!(results[0].label, "positive");
    assert!(results[0].score > results[1].score);

    let results = classifier.predict("خیلی بد", Some(1), Some(0.5)).unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].label, "negative");

    assert!(classifier.predict("\n\t", None, None).unwrap().is_empty());
}

#[test]
fn test_classifier_missing_artifact_is_io_error() {
    let dir = tempfile::tempdir().unwrap();
    let classifier = TextClassifier::new(ClassifierConfig::new(
        dir.path().join("absent.json"),
        vec!["a".into()],
    ));
    assert!(matches!(
        classifier.predict("text", None, None),
        Err(InferenceError::Io(_))
    ));
}
