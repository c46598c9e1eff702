//! Fetch, clean and persist labelled samples

use crate::cleaning::PersianTextCleaner;
use crate::labelers::{LabelSource, LabelledRecord};
use crate::storage::{DataStorage, DEFAULT_METADATA_TABLE};
use crate::Result;
use serde::{Deserialize, Serialize};

/// One row of the produced dataset
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetRow {
    pub record_id: String,
    pub source: String,
    pub text: String,
    pub clean_text: String,
    pub labels: Vec<String>,
}

pub struct DataPipeline {
    cleaner: PersianTextCleaner,
    storage: DataStorage,
    sources: Vec<Box<dyn LabelSource>>,
    metadata_table: String,
}

impl DataPipeline {
    #[must_use]
    pub fn new(cleaner: PersianTextCleaner, storage: DataStorage) -> Self {
        Self {
            cleaner,
            storage,
            sources: Vec::new(),
            metadata_table: DEFAULT_METADATA_TABLE.to_string(),
        }
    }

    #[must_use]
    pub fn with_source(mut self, source: Box<dyn LabelSource>) -> Self {
        self.sources.push(source);
        self
    }

    #[must_use]
    pub fn with_metadata_table(mut self, table: impl Into<String>) -> Self {
        self.metadata_table = table.into();
        self
    }

    #[must_use]
    pub fn storage(&self) -> &DataStorage {
        &self.storage
    }

    /// Fetch from every source in order, clean, and persist when non-empty.
    pub async fn run(&self) -> Result<Vec<DatasetRow>> {
        let records = self.collect_records().await?;
        let rows: Vec<DatasetRow> = records.into_iter().map(|r| self.to_row(r)).collect();
        if !rows.is_empty() {
            self.storage.store(&rows, &self.metadata_table)?;
        }
        tracing::info!("Pipeline produced {} rows", rows.len());
        Ok(rows)
    }

    async fn collect_records(&self) -> Result<Vec<LabelledRecord>> {
        let mut records = Vec::new();
        for source in &self.sources {
            for mut record in source.fetch_records().await? {
                record.clean_text = Some(self.cleaner.clean(&record.text));
                records.push(record);
            }
        }
        Ok(records)
    }

    fn to_row(&self, record: LabelledRecord) -> DatasetRow {
        let clean_text = match record.clean_text {
            Some(clean) if !clean.is_empty() => clean,
            _ => self.cleaner.clean(&record.text),
        };
        DatasetRow {
            record_id: record.record_id,
            source: record.source,
            text: record.text,
            clean_text,
            labels: record.labels,
        }
    }
}
