//! Runtime configuration for the API server, worker and pipeline.
//!
//! Values are resolved in this order (later wins): built-in defaults, an
//! optional TOML file, then process environment variables. Binaries apply
//! their command-line flags on top of the returned [`AppConfig`].

use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Default memory budget for loaded models (512 MiB)
pub const DEFAULT_MEMORY_LIMIT_BYTES: u64 = 512 * 1024 * 1024;

/// Default port for the worker metrics endpoint
pub const DEFAULT_METRICS_PORT: u16 = 8000;

/// Default bind address for the HTTP API
pub const DEFAULT_API_ADDR: &str = "0.0.0.0:8080";

/// Default broker: in-process queue
pub const DEFAULT_BROKER_URL: &str = "memory://";

/// Default number of ranked labels returned by the classifier
pub const DEFAULT_TOP_K: usize = 3;

/// Optional TOML file contents. Every field may be omitted.
#[derive(Debug, Deserialize, Default, Clone)]
pub struct ConfigFile {
    pub model: Option<ModelSection>,
    pub resources: Option<ResourceSection>,
    pub storage: Option<StorageSection>,
    pub broker: Option<BrokerSection>,
    pub server: Option<ServerSection>,
    pub classifier: Option<ClassifierSection>,
}

#[derive(Debug, Deserialize, Default, Clone)]
pub struct ModelSection {
    pub name: Option<String>,
    pub path: Option<PathBuf>,
    pub behavior: Option<String>,
    pub prefix: Option<String>,
    pub suffix: Option<String>,
}

#[derive(Debug, Deserialize, Default, Clone)]
pub struct ResourceSection {
    pub memory_limit_mb: Option<u64>,
}

#[derive(Debug, Deserialize, Default, Clone)]
pub struct StorageSection {
    pub db_path: Option<PathBuf>,
    pub data_dir: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Default, Clone)]
pub struct BrokerSection {
    pub url: Option<String>,
}

#[derive(Debug, Deserialize, Default, Clone)]
pub struct ServerSection {
    pub addr: Option<String>,
    pub metrics_port: Option<u16>,
}

#[derive(Debug, Deserialize, Default, Clone)]
pub struct ClassifierSection {
    pub artifact_path: Option<PathBuf>,
    pub labels: Option<Vec<String>>,
    pub top_k: Option<usize>,
    pub threshold: Option<f64>,
}

/// Settings for the model served when a request names none
#[derive(Debug, Clone, PartialEq)]
pub struct DefaultModelSettings {
    pub name: String,
    pub path: Option<PathBuf>,
    pub behavior: String,
    pub prefix: Option<String>,
    pub suffix: Option<String>,
}

/// Settings for the ranked-label classifier
#[derive(Debug, Clone, PartialEq)]
pub struct ClassifierSettings {
    pub artifact_path: PathBuf,
    pub labels: Vec<String>,
    pub top_k: usize,
    pub threshold: f64,
}

/// Fully resolved configuration snapshot
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub model: DefaultModelSettings,
    pub memory_limit_bytes: u64,
    pub db_path: PathBuf,
    pub broker_url: String,
    pub api_addr: String,
    pub metrics_port: u16,
    pub app_version: String,
    /// `None` unless an artifact path and labels were both configured
    pub classifier: Option<ClassifierSettings>,
}

impl AppConfig {
    /// Resolve configuration from the process environment on top of `file`.
    pub fn from_environment(file: &ConfigFile) -> Result<Self> {
        Self::resolve(file, |key| std::env::var(key).ok())
    }

    /// Resolve configuration using `env` for variable lookups.
    pub fn resolve<F>(file: &ConfigFile, env: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = |key: &str| env(key).filter(|value| !value.is_empty());
        let model_file = file.model.clone().unwrap_or_default();

        let model = DefaultModelSettings {
            name: env("DEFAULT_MODEL_NAME")
                .or(model_file.name)
                .unwrap_or_else(|| "default".to_string()),
            path: env("DEFAULT_MODEL_PATH")
                .map(PathBuf::from)
                .or(model_file.path)
                .map(|p| expand_home(&p)),
            behavior: env("DEFAULT_MODEL_BEHAVIOR")
                .or(model_file.behavior)
                .unwrap_or_else(|| "echo".to_string()),
            prefix: env("DEFAULT_MODEL_PREFIX").or(model_file.prefix),
            suffix: env("DEFAULT_MODEL_SUFFIX").or(model_file.suffix),
        };

        let memory_limit_bytes = match env("INFERENCE_MEMORY_LIMIT") {
            Some(raw) => raw
                .trim()
                .parse::<u64>()
                .with_context(|| format!("Invalid INFERENCE_MEMORY_LIMIT: {raw}"))?,
            None => file
                .resources
                .as_ref()
                .and_then(|r| r.memory_limit_mb)
                .map(|mb| mb.saturating_mul(1024 * 1024))
                .unwrap_or(DEFAULT_MEMORY_LIMIT_BYTES),
        };

        let storage = file.storage.clone().unwrap_or_default();
        let db_path = match env("INFERENCE_DB_PATH").map(PathBuf::from).or(storage.db_path) {
            Some(path) => expand_home(&path),
            None => {
                let data_dir = env("APP_DATA_DIR")
                    .map(PathBuf::from)
                    .or(storage.data_dir)
                    .unwrap_or_else(|| PathBuf::from("."));
                expand_home(&data_dir).join("inference.db")
            }
        };

        let broker_url = env("BROKER_URL")
            .or_else(|| file.broker.as_ref().and_then(|b| b.url.clone()))
            .unwrap_or_else(|| DEFAULT_BROKER_URL.to_string());

        let server = file.server.clone().unwrap_or_default();
        let api_addr = env("API_SERVER_ADDR")
            .or(server.addr)
            .unwrap_or_else(|| DEFAULT_API_ADDR.to_string());
        let metrics_port = match env("METRICS_PORT") {
            Some(raw) => parse_metrics_port(&raw),
            None => server.metrics_port.unwrap_or(DEFAULT_METRICS_PORT),
        };

        let app_version = env("APP_VERSION").unwrap_or_else(|| "dev".to_string());

        let classifier = resolve_classifier(file.classifier.clone().unwrap_or_default(), &env)?;

        Ok(Self {
            model,
            memory_limit_bytes,
            db_path,
            broker_url,
            api_addr,
            metrics_port,
            app_version,
            classifier,
        })
    }
}

fn resolve_classifier<F>(section: ClassifierSection, env: &F) -> Result<Option<ClassifierSettings>>
where
    F: Fn(&str) -> Option<String>,
{
    let artifact_path = env("CLASSIFIER_ARTIFACT_PATH")
        .map(PathBuf::from)
        .or(section.artifact_path);
    let labels = env("CLASSIFIER_LABELS")
        .map(|raw| {
            raw.split(',')
                .map(str::trim)
                .filter(|label| !label.is_empty())
                .map(str::to_string)
                .collect::<Vec<_>>()
        })
        .or(section.labels);

    let (Some(artifact_path), Some(labels)) = (artifact_path, labels) else {
        return Ok(None);
    };
    if labels.is_empty() {
        return Ok(None);
    }

    let top_k = match env("CLASSIFIER_TOP_K") {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("Invalid CLASSIFIER_TOP_K: {raw}"))?,
        None => section.top_k.unwrap_or(DEFAULT_TOP_K),
    };
    let threshold = match env("CLASSIFIER_THRESHOLD") {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("Invalid CLASSIFIER_THRESHOLD: {raw}"))?,
        None => section.threshold.unwrap_or(0.0),
    };

    Ok(Some(ClassifierSettings {
        artifact_path: expand_home(&artifact_path),
        labels,
        top_k,
        threshold,
    }))
}

/// Parse a metrics port, falling back to the default on bad input.
pub fn parse_metrics_port(raw: &str) -> u16 {
    match raw.trim().parse::<u16>() {
        Ok(port) => port,
        Err(_) => {
            tracing::warn!(
                "Invalid METRICS_PORT={} received; falling back to default {}.",
                raw,
                DEFAULT_METRICS_PORT
            );
            DEFAULT_METRICS_PORT
        }
    }
}

/// Replace a leading `~` with the user's home directory.
pub fn expand_home(path: &Path) -> PathBuf {
    let Ok(rest) = path.strip_prefix("~") else {
        return path.to_path_buf();
    };
    match dirs::home_dir() {
        Some(home) => home.join(rest),
        None => path.to_path_buf(),
    }
}

pub fn default_config_path() -> Result<PathBuf> {
    let dirs =
        ProjectDirs::from("", "", "agent-inference").context("Could not determine config directory")?;
    Ok(dirs.config_dir().join("config.toml"))
}

pub fn load_config(path: &Path) -> Result<ConfigFile> {
    if !path.exists() {
        return Ok(ConfigFile::default());
    }

    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    let config: ConfigFile =
        toml::from_str(&contents).context("Failed to parse config file as TOML")?;
    Ok(config)
}
