//! Configuration for models served by the inference engine

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};

/// Memory declared for a model when none is configured (128 MiB)
pub const DEFAULT_MODEL_MEMORY_BYTES: u64 = 128 * 1024 * 1024;

/// A model the engine can load by name
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    pub name: String,

    /// Artifact on disk; when absent or missing, `metadata` is the artifact
    #[serde(default)]
    pub path: Option<PathBuf>,

    #[serde(default = "default_memory_bytes")]
    pub memory_bytes: u64,

    #[serde(default)]
    pub metadata: Map<String, Value>,
}

fn default_memory_bytes() -> u64 {
    DEFAULT_MODEL_MEMORY_BYTES
}

impl ModelConfig {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            path: None,
            memory_bytes: DEFAULT_MODEL_MEMORY_BYTES,
            metadata: Map::new(),
        }
    }

    #[must_use]
    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = Some(path.into());
        self
    }

    #[must_use]
    pub fn with_memory_bytes(mut self, memory_bytes: u64) -> Self {
        self.memory_bytes = memory_bytes;
        self
    }

    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Absolute path to the artifact, if one was configured.
    ///
    /// The path need not exist; it is canonicalized only when it does.
    #[must_use]
    pub fn resolve_path(&self) -> Option<PathBuf> {
        self.path.as_deref().map(resolve)
    }
}

fn resolve(path: &Path) -> PathBuf {
    let expanded = match (path.strip_prefix("~"), dirs::home_dir()) {
        (Ok(rest), Some(home)) => home.join(rest),
        _ => path.to_path_buf(),
    };
    let absolute = if expanded.is_absolute() {
        expanded
    } else {
        std::env::current_dir()
            .map(|cwd| cwd.join(&expanded))
            .unwrap_or(expanded)
    };
    absolute.canonicalize().unwrap_or(absolute)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_path_none_without_path() {
        assert!(ModelConfig::new("m").resolve_path().is_none());
    }

    #[test]
    fn test_resolve_path_is_absolute() {
        let config = ModelConfig::new("m").with_path("models/does-not-exist.json");
        let resolved = config.resolve_path().unwrap();
        assert!(resolved.is_absolute());
        assert!(resolved.ends_with("models/does-not-exist.json"));
    }

    #[test]
    fn test_resolve_existing_path_is_canonical() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("model.json");
        std::fs::write(&file, "{}").unwrap();
        let config = ModelConfig::new("m").with_path(dir.path().join(".").join("model.json"));
        assert_eq!(config.resolve_path().unwrap(), file.canonicalize().unwrap());
    }

    #[test]
    fn test_deserialize_defaults() {
        let config: ModelConfig = serde_json::from_str(r#"{"name": "tiny"}"#).unwrap();
        assert_eq!(config.memory_bytes, DEFAULT_MODEL_MEMORY_BYTES);
        assert!(config.metadata.is_empty());
    }
}
