//! Model loading on top of the memory manager

use crate::{InferenceError, MemoryManager, MemoryReservation, ModelConfig, Result};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Behavior used when an artifact does not name one
pub const DEFAULT_BEHAVIOR: &str = "echo";

/// A model whose artifact has been read and whose memory is reserved
#[derive(Debug)]
pub struct LoadedModel {
    pub config: ModelConfig,
    pub artifact: Map<String, Value>,
    pub reservation: MemoryReservation,
}

impl LoadedModel {
    /// Name of the transformation this model applies
    #[must_use]
    pub fn behavior(&self) -> &str {
        self.artifact
            .get("behavior")
            .and_then(Value::as_str)
            .unwrap_or(DEFAULT_BEHAVIOR)
    }

    #[must_use]
    pub fn predict(&self, text: &str) -> String {
        match self.behavior() {
            "reverse" => text.chars().rev().collect(),
            "uppercase" => text.to_uppercase(),
            "lowercase" => text.to_lowercase(),
            _ => {
                let prefix = self.artifact_text("prefix");
                let suffix = self.artifact_text("suffix");
                if prefix.is_empty() && suffix.is_empty() {
                    text.to_string()
                } else {
                    format!("{prefix}{text}{suffix}")
                }
            }
        }
    }

    fn artifact_text(&self, key: &str) -> String {
        match self.artifact.get(key) {
            None | Some(Value::Null) | Some(Value::Bool(false)) => String::new(),
            Some(Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
        }
    }
}

/// Loads models on first use and caches them by name while their memory is
/// reserved.
#[derive(Debug)]
pub struct ModelLoader {
    memory: Arc<MemoryManager>,
    loaded: Mutex<HashMap<String, Arc<LoadedModel>>>,
}

impl ModelLoader {
    #[must_use]
    pub fn new(memory: Arc<MemoryManager>) -> Self {
        Self {
            memory,
            loaded: Mutex::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn memory(&self) -> &Arc<MemoryManager> {
        &self.memory
    }

    /// Return the cached model for `config.name`, loading it if needed.
    ///
    /// A failed load caches nothing and holds no memory.
    pub fn load(&self, config: &ModelConfig) -> Result<Arc<LoadedModel>> {
        let mut loaded = self.cache();
        if let Some(cached) = loaded.get(&config.name) {
            return Ok(Arc::clone(cached));
        }

        let artifact = load_artifact(config)?;
        let reservation = self.memory.reserve(config.memory_bytes, &config.name)?;
        let model = Arc::new(LoadedModel {
            config: config.clone(),
            artifact,
            reservation,
        });
        loaded.insert(config.name.clone(), Arc::clone(&model));
        tracing::info!(
            "Loaded model {} (behavior={}, {} bytes reserved)",
            config.name,
            model.behavior(),
            config.memory_bytes
        );
        Ok(model)
    }

    /// Drop `name` from the cache and release its memory.
    pub fn unload(&self, name: &str) {
        let removed = self.cache().remove(name);
        if let Some(model) = removed {
            self.memory.release(&model.reservation);
            tracing::info!("Unloaded model {}", name);
        }
    }

    pub fn clear(&self) {
        let names: Vec<String> = self.cache().keys().cloned().collect();
        for name in names {
            self.unload(&name);
        }
    }

    #[must_use]
    pub fn is_loaded(&self, name: &str) -> bool {
        self.cache().contains_key(name)
    }

    /// Names of the models currently held, sorted
    #[must_use]
    pub fn loaded_models(&self) -> Vec<String> {
        let mut names: Vec<String> = self.cache().keys().cloned().collect();
        names.sort();
        names
    }

    fn cache(&self) -> MutexGuard<'_, HashMap<String, Arc<LoadedModel>>> {
        self.loaded.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn load_artifact(config: &ModelConfig) -> Result<Map<String, Value>> {
    let path = match config.resolve_path() {
        Some(path) if path.exists() => path,
        _ => return Ok(config.metadata.clone()),
    };

    let extension = path
        .extension()
        .map(|ext| ext.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    match extension.as_str() {
        "json" | "" => read_json_artifact(&path),
        "txt" | "md" => {
            let contents = std::fs::read_to_string(&path)?;
            let mut artifact = Map::new();
            artifact.insert("behavior".into(), Value::from(DEFAULT_BEHAVIOR));
            artifact.insert("prefix".into(), Value::from(contents.trim()));
            Ok(artifact)
        }
        _ => {
            let mut artifact = Map::new();
            artifact.insert("behavior".into(), Value::from(DEFAULT_BEHAVIOR));
            Ok(artifact)
        }
    }
}

fn read_json_artifact(path: &Path) -> Result<Map<String, Value>> {
    let contents = std::fs::read_to_string(path)?;
    let value: Value =
        serde_json::from_str(&contents).map_err(|e| InferenceError::InvalidArtifact {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
    match value {
        Value::Object(map) => Ok(map),
        _ => Err(InferenceError::InvalidArtifact {
            path: path.to_path_buf(),
            reason: "expected a JSON object".to_string(),
        }),
    }
}
