//! Text-to-text inference engine built on top of the model loader

use crate::{InferenceError, ModelConfig, ModelLoader, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, PoisonError, RwLock};

/// Result returned after running a prediction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InferenceResult {
    pub model_name: String,
    pub input_text: String,
    pub output_text: String,
    pub metadata: HashMap<String, String>,
}

/// Routes predictions to registered models, loading them on demand
#[derive(Debug)]
pub struct InferenceEngine {
    loader: Arc<ModelLoader>,
    models: RwLock<BTreeMap<String, ModelConfig>>,
    default_model_name: String,
}

impl InferenceEngine {
    #[must_use]
    pub fn new(
        loader: Arc<ModelLoader>,
        default_model: ModelConfig,
        additional_models: impl IntoIterator<Item = ModelConfig>,
    ) -> Self {
        let default_model_name = default_model.name.clone();
        let mut models = BTreeMap::new();
        models.insert(default_model.name.clone(), default_model);
        for config in additional_models {
            models.insert(config.name.clone(), config);
        }
        Self {
            loader,
            models: RwLock::new(models),
            default_model_name,
        }
    }

    #[must_use]
    pub fn default_model_name(&self) -> &str {
        &self.default_model_name
    }

    #[must_use]
    pub fn loader(&self) -> &Arc<ModelLoader> {
        &self.loader
    }

    /// Add a model, replacing any existing model with the same name.
    pub fn register_model(&self, config: ModelConfig) {
        tracing::debug!("Registering model {}", config.name);
        self.models
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(config.name.clone(), config);
    }

    #[must_use]
    pub fn model_config(&self, name: &str) -> Option<ModelConfig> {
        self.models
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    /// Registered models ordered by name
    #[must_use]
    pub fn list_models(&self) -> Vec<ModelConfig> {
        self.models
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }

    /// Run `input_text` through `model_name`, or the default model.
    pub fn predict(&self, input_text: &str, model_name: Option<&str>) -> Result<InferenceResult> {
        if input_text.is_empty() {
            return Err(InferenceError::InvalidInput(
                "input_text cannot be empty".to_string(),
            ));
        }
        let target_name = model_name.unwrap_or(self.default_model_name.as_str());
        let config = self
            .model_config(target_name)
            .ok_or_else(|| InferenceError::UnknownModel(target_name.to_string()))?;

        let model = self.loader.load(&config)?;
        let output_text = model.predict(input_text);

        let mut metadata = HashMap::with_capacity(1);
        metadata.insert("behavior".to_string(), model.behavior().to_string());

        Ok(InferenceResult {
            model_name: config.name,
            input_text: input_text.to_string(),
            output_text,
            metadata,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryManager;

    fn engine_with_limit(limit: u64) -> InferenceEngine {
        let loader = Arc::new(ModelLoader::new(Arc::new(MemoryManager::new(limit))));
        InferenceEngine::new(
            loader,
            ModelConfig::new("default").with_memory_bytes(10),
            [ModelConfig::new("shout")
                .with_memory_bytes(10)
                .with_metadata("behavior", "uppercase")],
        )
    }

    #[test]
    fn test_predict_with_default_model() {
        let engine = engine_with_limit(100);
        let result = engine.predict("hello", None).unwrap();
        assert_eq!(result.model_name, "default");
        assert_eq!(result.output_text, "hello");
        assert_eq!(result.metadata.get("behavior").map(String::as_str), Some("echo"));
    }

    #[test]
    fn test_predict_with_named_model() {
        let engine = engine_with_limit(100);
        let result = engine.predict("hello", Some("shout")).unwrap();
        assert_eq!(result.model_name, "shout");
        assert_eq!(result.output_text, "HELLO");
        assert_eq!(result.metadata["behavior"], "uppercase");
    }

    #[test]
    fn test_empty_input_is_rejected() {
        let engine = engine_with_limit(100);
        assert!(matches!(
            engine.predict("", None),
            Err(InferenceError::InvalidInput(_))
        ));
        // Whitespace is still input for the text-to-text engine
        assert_eq!(engine.predict("  ", None).unwrap().output_text, "  ");
    }

    #[test]
    fn test_unknown_model() {
        let engine = engine_with_limit(100);
        match engine.predict("x", Some("nope")) {
            Err(InferenceError::UnknownModel(name)) => assert_eq!(name, "nope"),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_models_load_lazily() {
        let engine = engine_with_limit(100);
        assert!(engine.loader().loaded_models().is_empty());
        engine.predict("x", Some("shout")).unwrap();
        assert_eq!(engine.loader().loaded_models(), vec!["shout".to_string()]);
        assert_eq!(engine.loader().memory().used_bytes(), 10);
    }

    #[test]
    fn test_register_and_list_models() {
        let engine = engine_with_limit(100);
        engine.register_model(ModelConfig::new("backwards").with_metadata("behavior", "reverse"));
        let names: Vec<String> = engine.list_models().into_iter().map(|m| m.name).collect();
        assert_eq!(names, vec!["backwards", "default", "shout"]);
        assert_eq!(engine.default_model_name(), "default");
    }

    #[test]
    fn test_memory_exhaustion_surfaces() {
        let engine = engine_with_limit(15);
        engine.predict("x", None).unwrap();
        assert!(matches!(
            engine.predict("x", Some("shout")),
            Err(InferenceError::MemoryExhausted { .. })
        ));
    }
}
