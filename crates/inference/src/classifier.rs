//! Ranked-label text classification shared by the HTTP API and the worker.
//!
//! A [`TextClassifier`] loads its persisted model once, on the first request
//! that needs it, and turns model output into labels ordered by score.
//! Models that can produce a probability per label do so through
//! [`ClassificationModel::predict_proba`]; models that only name a winner are
//! converted into a one-hot distribution.

use crate::{InferenceError, Result};
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Default number of labels returned per prediction
pub const DEFAULT_TOP_K: usize = 3;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassifierConfig {
    pub artifact_path: PathBuf,
    pub labels: Vec<String>,
    #[serde(default)]
    pub probability_threshold: f64,
    #[serde(default = "default_top_k")]
    pub default_top_k: usize,
}

fn default_top_k() -> usize {
    DEFAULT_TOP_K
}

impl ClassifierConfig {
    #[must_use]
    pub fn new(artifact_path: impl Into<PathBuf>, labels: Vec<String>) -> Self {
        Self {
            artifact_path: artifact_path.into(),
            labels,
            probability_threshold: 0.0,
            default_top_k: DEFAULT_TOP_K,
        }
    }
}

/// A single label prediction with its confidence score
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabelScore {
    pub label: String,
    pub score: f64,
}

/// What a model returns when it cannot score every label
#[derive(Debug, Clone, PartialEq)]
pub enum Prediction {
    /// The model produced nothing for the input
    None,
    /// A single label by name
    Label(String),
    /// A single label by position in the configured label list
    Index(i64),
    /// Several labels by name (multi-label models)
    Labels(Vec<String>),
}

pub trait ClassificationModel: Send + Sync {
    /// One probability per configured label, or `None` if unsupported.
    fn predict_proba(&self, _text: &str) -> Option<Vec<f64>> {
        None
    }

    fn predict(&self, text: &str) -> Prediction;
}

/// Loads a model from its artifact path
pub type ModelLoaderFn =
    Box<dyn Fn(&Path) -> Result<Arc<dyn ClassificationModel>> + Send + Sync>;

/// Load a persisted classifier once and serve predictions on demand
pub struct TextClassifier {
    config: ClassifierConfig,
    model: OnceCell<Arc<dyn ClassificationModel>>,
    loader: ModelLoaderFn,
}

impl std::fmt::Debug for TextClassifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TextClassifier")
            .field("config", &self.config)
            .field("loaded", &self.is_loaded())
            .finish_non_exhaustive()
    }
}

impl TextClassifier {
    /// Classifier backed by a [`LinearTextModel`] JSON artifact
    #[must_use]
    pub fn new(config: ClassifierConfig) -> Self {
        let expected_labels = config.labels.len();
        Self::with_loader(
            config,
            Box::new(move |path| {
                let model = LinearTextModel::from_path(path)?;
                if model.labels.len() != expected_labels {
                    return Err(InferenceError::InvalidArtifact {
                        path: path.to_path_buf(),
                        reason: format!(
                            "artifact has {} labels, {} configured",
                            model.labels.len(),
                            expected_labels
                        ),
                    });
                }
                Ok(Arc::new(model) as Arc<dyn ClassificationModel>)
            }),
        )
    }

    #[must_use]
    pub fn with_loader(config: ClassifierConfig, loader: ModelLoaderFn) -> Self {
        Self {
            config,
            model: OnceCell::new(),
            loader,
        }
    }

    #[must_use]
    pub fn config(&self) -> &ClassifierConfig {
        &self.config
    }

    #[must_use]
    pub fn is_loaded(&self) -> bool {
        self.model.get().is_some()
    }

    /// Top predictions for `text`, best first.
    ///
    /// Blank text yields no predictions and does not load the model. With a
    /// threshold of zero every one of the top `top_k` labels is returned,
    /// including labels the model scored zero.
    pub fn predict(
        &self,
        text: &str,
        top_k: Option<usize>,
        threshold: Option<f64>,
    ) -> Result<Vec<LabelScore>> {
        let normalised = text.trim();
        if normalised.is_empty() {
            return Ok(Vec::new());
        }

        let model = self.model()?;
        let scores = match model.predict_proba(normalised) {
            Some(probabilities) => probabilities,
            None => distribution(model.predict(normalised), &self.config.labels),
        };

        let top_k = top_k.unwrap_or(self.config.default_top_k);
        let threshold = threshold.unwrap_or(self.config.probability_threshold);

        let mut candidates: Vec<LabelScore> = self
            .config
            .labels
            .iter()
            .zip(scores)
            .map(|(label, score)| LabelScore {
                label: label.clone(),
                score,
            })
            .collect();
        // Stable: equal scores keep label order
        candidates.sort_by(|a, b| b.score.total_cmp(&a.score));

        Ok(candidates
            .into_iter()
            .take(top_k)
            .filter(|candidate| candidate.score >= threshold)
            .collect())
    }

    fn model(&self) -> Result<&Arc<dyn ClassificationModel>> {
        self.model.get_or_try_init(|| {
            tracing::info!(
                "Loading classifier from {}",
                self.config.artifact_path.display()
            );
            (self.loader)(&self.config.artifact_path)
        })
    }
}

fn distribution(prediction: Prediction, labels: &[String]) -> Vec<f64> {
    let position = |label: &str| labels.iter().position(|l| l == label);
    let hits: Vec<usize> = match prediction {
        Prediction::None => Vec::new(),
        Prediction::Label(label) => position(&label).into_iter().collect(),
        Prediction::Labels(predicted) => predicted.iter().filter_map(|l| position(l)).collect(),
        Prediction::Index(index) => usize::try_from(index)
            .ok()
            .filter(|i| *i < labels.len())
            .into_iter()
            .collect(),
    };

    let mut scores = vec![0.0; labels.len()];
    for index in hits {
        scores[index] = 1.0;
    }
    scores
}

/// Bag-of-words linear classifier persisted as JSON.
///
/// ```json
/// {"labels": ["neg", "pos"], "bias": [0.0, 0.1], "weights": {"good": [-1.0, 2.0]}}
/// ```
///
/// Scores are the softmax of `bias + sum(weights[token])` over the lowercase
/// alphanumeric tokens of the input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinearTextModel {
    pub labels: Vec<String>,
    #[serde(default)]
    pub bias: Vec<f64>,
    #[serde(default)]
    pub weights: HashMap<String, Vec<f64>>,
}

impl LinearTextModel {
    pub fn from_path(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let model: Self =
            serde_json::from_str(&contents).map_err(|e| InferenceError::InvalidArtifact {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;
        model.validate().map_err(|reason| InferenceError::InvalidArtifact {
            path: path.to_path_buf(),
            reason,
        })?;
        Ok(model)
    }

    fn validate(&self) -> std::result::Result<(), String> {
        let n = self.labels.len();
        if n == 0 {
            return Err("no labels".to_string());
        }
        if !self.bias.is_empty() && self.bias.len() != n {
            return Err(format!("bias has {} entries, expected {n}", self.bias.len()));
        }
        if let Some((token, row)) = self.weights.iter().find(|(_, row)| row.len() != n) {
            return Err(format!(
                "weights for '{token}' have {} entries, expected {n}",
                row.len()
            ));
        }
        Ok(())
    }

    fn logits(&self, text: &str) -> Vec<f64> {
        let mut logits = if self.bias.is_empty() {
            vec![0.0; self.labels.len()]
        } else {
            self.bias.clone()
        };
        for token in tokenize(text) {
            if let Some(row) = self.weights.get(&token) {
                for (logit, weight) in logits.iter_mut().zip(row) {
                    *logit += weight;
                }
            }
        }
        logits
    }
}

impl ClassificationModel for LinearTextModel {
    fn predict_proba(&self, text: &str) -> Option<Vec<f64>> {
        Some(softmax(&self.logits(text)))
    }

    fn predict(&self, text: &str) -> Prediction {
        let logits = self.logits(text);
        logits
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map_or(Prediction::None, |(index, _)| {
                Prediction::Label(self.labels[index].clone())
            })
    }
}

fn tokenize(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|token| !token.is_empty())
        .map(str::to_lowercase)
}

fn softmax(logits: &[f64]) -> Vec<f64> {
    let max = logits.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let exps: Vec<f64> = logits.iter().map(|l| (l - max).exp()).collect();
    let sum: f64 = exps.iter().sum();
    exps.into_iter().map(|e| e / sum).collect()
}
