//! Clients that pull annotated samples out of labelling tools

use crate::{PipelineError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::time::Duration;

/// Timeout applied to every label-tool request
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// A labelled text sample as exported by a labelling tool
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabelledRecord {
    pub record_id: String,
    pub text: String,
    pub labels: Vec<String>,
    pub source: String,
    pub raw_payload: Map<String, Value>,
    #[serde(default)]
    pub clean_text: Option<String>,
}

/// Anything that can produce labelled records
#[async_trait]
pub trait LabelSource: Send + Sync {
    async fn fetch_records(&self) -> Result<Vec<LabelledRecord>>;
}

fn http_client() -> Result<reqwest::Client> {
    Ok(reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?)
}

/// `str(value)` for ids and labels that may be numbers or strings
fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Export of a Label Studio project
#[derive(Debug, Clone)]
pub struct LabelStudioClient {
    base_url: String,
    api_token: String,
    project_id: u64,
    client: reqwest::Client,
}

impl LabelStudioClient {
    pub fn new(base_url: impl Into<String>, api_token: impl Into<String>, project_id: u64) -> Result<Self> {
        Ok(Self {
            base_url: base_url.into(),
            api_token: api_token.into(),
            project_id,
            client: http_client()?,
        })
    }

    fn export_url(&self) -> String {
        format!(
            "{}/api/projects/{}/export",
            self.base_url.trim_end_matches('/'),
            self.project_id
        )
    }
}

#[async_trait]
impl LabelSource for LabelStudioClient {
    async fn fetch_records(&self) -> Result<Vec<LabelledRecord>> {
        let url = self.export_url();
        tracing::info!("Fetching Label Studio export from {}", url);
        let exported: Value = self
            .client
            .get(&url)
            .header("Authorization", format!("Token {}", self.api_token))
            .query(&[("exportType", "JSON")])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let Value::Array(tasks) = exported else {
            return Err(PipelineError::UnexpectedPayload(
                "Label Studio export is not a JSON array".to_string(),
            ));
        };
        Ok(parse_label_studio_tasks(tasks))
    }
}

fn parse_label_studio_tasks(tasks: Vec<Value>) -> Vec<LabelledRecord> {
    let mut records = Vec::with_capacity(tasks.len());
    for task in tasks {
        let Value::Object(task) = task else {
            continue;
        };
        let Some(text) = label_studio_text(&task) else {
            continue;
        };
        let record_id = task
            .get("id")
            .map_or_else(|| records.len().to_string(), value_to_string);
        records.push(LabelledRecord {
            record_id,
            text,
            labels: label_studio_labels(&task),
            source: "label_studio".to_string(),
            raw_payload: task,
            clean_text: None,
        });
    }
    records
}

fn label_studio_text(task: &Map<String, Value>) -> Option<String> {
    let data = task.get("data")?.as_object()?;
    ["text", "Text", "content"]
        .iter()
        .find_map(|key| data.get(*key).and_then(Value::as_str))
        .map(str::to_string)
}

fn label_studio_labels(task: &Map<String, Value>) -> Vec<String> {
    let Some(annotations) = task.get("annotations").and_then(Value::as_array) else {
        return Vec::new();
    };
    annotations
        .iter()
        .filter_map(|annotation| annotation.get("result")?.as_array())
        .flatten()
        .filter_map(|result| result.get("value")?.get("labels")?.as_array())
        .flatten()
        .map(value_to_string)
        .collect()
}

/// Documents of a Doccano project, following pagination
#[derive(Debug, Clone)]
pub struct DoccanoClient {
    base_url: String,
    api_token: String,
    project_id: u64,
    label_mapping: HashMap<i64, String>,
    client: reqwest::Client,
}

impl DoccanoClient {
    pub fn new(base_url: impl Into<String>, api_token: impl Into<String>, project_id: u64) -> Result<Self> {
        Ok(Self {
            base_url: base_url.into(),
            api_token: api_token.into(),
            project_id,
            label_mapping: HashMap::new(),
            client: http_client()?,
        })
    }

    /// Names for numeric label ids; unmapped ids are kept as numbers
    #[must_use]
    pub fn with_label_mapping(mut self, label_mapping: HashMap<i64, String>) -> Self {
        self.label_mapping = label_mapping;
        self
    }

    fn docs_url(&self) -> String {
        format!(
            "{}/v1/projects/{}/docs/",
            self.base_url.trim_end_matches('/'),
            self.project_id
        )
    }
}

#[derive(Debug, Deserialize)]
struct DoccanoPage {
    #[serde(default)]
    next: Option<String>,
    #[serde(default)]
    results: Vec<Value>,
}

#[async_trait]
impl LabelSource for DoccanoClient {
    async fn fetch_records(&self) -> Result<Vec<LabelledRecord>> {
        let mut records = Vec::new();
        let mut next_url = Some(self.docs_url());
        let mut first_page = true;

        while let Some(url) = next_url.take() {
            tracing::debug!("Fetching Doccano page {}", url);
            let mut request = self
                .client
                .get(&url)
                .header("Authorization", format!("Token {}", self.api_token));
            if first_page {
                request = request.query(&[("page", 1)]);
                first_page = false;
            }
            let page: DoccanoPage = request.send().await?.error_for_status()?.json().await?;

            for item in page.results {
                let Value::Object(item) = item else {
                    continue;
                };
                let Some(text) = item.get("text").and_then(Value::as_str).map(str::to_string)
                else {
                    continue;
                };
                let labels = doccano_labels(item.get("annotations"), &self.label_mapping);
                let record_id = item
                    .get("id")
                    .map_or_else(|| records.len().to_string(), value_to_string);
                records.push(LabelledRecord {
                    record_id,
                    text,
                    labels,
                    source: "doccano".to_string(),
                    raw_payload: item,
                    clean_text: None,
                });
            }
            next_url = page.next;
        }

        tracing::info!("Fetched {} Doccano records", records.len());
        Ok(records)
    }
}

fn doccano_labels(annotations: Option<&Value>, mapping: &HashMap<i64, String>) -> Vec<String> {
    let Some(annotations) = annotations.and_then(Value::as_array) else {
        return Vec::new();
    };
    let mut labels = Vec::new();
    for annotation in annotations.iter().filter_map(Value::as_object) {
        match annotation.get("label").and_then(Value::as_i64) {
            Some(id) => labels.push(
                mapping
                    .get(&id)
                    .cloned()
                    .unwrap_or_else(|| id.to_string()),
            ),
            None => {
                if let Some(names) = annotation.get("labels").and_then(Value::as_array) {
                    labels.extend(names.iter().map(value_to_string));
                }
            }
        }
    }
    labels
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn tasks(value: Value) -> Vec<Value> {
        match value {
            Value::Array(items) => items,
            _ => panic!("expected array"),
        }
    }

    #[test]
    fn test_label_studio_text_keys_and_skips() {
        let records = parse_label_studio_tasks(tasks(json!([
            {"id": 7, "data": {"text": "اول"}},
            {"data": {"Text": "دوم"}},
            {"id": "x", "data": {"content": "سوم"}},
            {"id": 9, "data": {"image": "a.png"}},
            {"id": 10, "data": {"text": 5}},
            "not an object"
        ])));

        let ids: Vec<&str> = records.iter().map(|r| r.record_id.as_str()).collect();
        assert_eq!(ids, vec!["7", "1", "x"]);
        let texts: Vec<&str> = records.iter().map(|r| r.text.as_str()).collect();
        assert_eq!(texts, vec!["اول", "دوم", "سوم"]);
        assert!(records.iter().all(|r| r.source == "label_studio"));
        assert_eq!(records[0].raw_payload["data"]["text"], "اول");
    }

    #[test]
    fn test_label_studio_labels_across_annotations() {
        let records = parse_label_studio_tasks(tasks(json!([{
            "id": 1,
            "data": {"text": "t"},
            "annotations": [
                {"result": [
                    {"value": {"labels": ["مثبت"]}},
                    {"value": {"choices": ["ignored"]}},
                    {"value": {"labels": ["خنثی", 3]}}
                ]},
                {"result": "broken"},
                {"result": [{"value": {"labels": ["منفی"]}}]}
            ]
        }])));
        assert_eq!(records[0].labels, vec!["مثبت", "خنثی", "3", "منفی"]);
    }

    #[test]
    fn test_doccano_labels_mapping_and_lists() {
        let mapping = HashMap::from([(1, "positive".to_string())]);
        let annotations = json!([
            {"label": 1},
            {"label": 2},
            {"labels": ["spam", "ham"]},
            {"label": "text-id", "labels": ["fallback"]},
            "junk"
        ]);
        assert_eq!(
            doccano_labels(Some(&annotations), &mapping),
            vec!["positive", "2", "spam", "ham", "fallback"]
        );
        assert!(doccano_labels(None, &mapping).is_empty());
    }

    #[test]
    fn test_urls_trim_trailing_slash() {
        let ls = LabelStudioClient::new("http://ls.local/", "t", 3).unwrap();
        assert_eq!(ls.export_url(), "http://ls.local/api/projects/3/export");
        let dc = DoccanoClient::new("http://dc.local//", "t", 4).unwrap();
        assert_eq!(dc.docs_url(), "http://dc.local/v1/projects/4/docs/");
    }
}
