//! agent-pipeline: build a cleaned dataset from labelling tool exports

use agent_common::telemetry::init_tracing;
use agent_pipeline::{
    CleaningConfig, DataPipeline, DataStorage, DoccanoClient, LabelStudioClient,
    PersianTextCleaner, DEFAULT_METADATA_TABLE,
};
use anyhow::{bail, Context, Result};
use clap::Parser;
use std::collections::HashMap;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "agent-pipeline")]
#[command(about = "Fetch labelled Persian text, clean it and store a training dataset")]
#[command(version)]
struct Args {
    /// Label Studio base URL
    #[arg(long)]
    label_studio_url: Option<String>,

    /// Label Studio project id
    #[arg(long)]
    label_studio_project: Option<u64>,

    /// Doccano base URL
    #[arg(long)]
    doccano_url: Option<String>,

    /// Doccano project id
    #[arg(long)]
    doccano_project: Option<u64>,

    /// Doccano label id mapping, e.g. `--doccano-label 1=positive`
    #[arg(long = "doccano-label", value_parser = parse_label_mapping)]
    doccano_labels: Vec<(i64, String)>,

    /// Output dataset (JSON Lines, overwritten)
    #[arg(long, default_value = "data/labeled_samples.jsonl")]
    dataset: PathBuf,

    /// SQLite database receiving per-record metadata
    #[arg(long, default_value = "data/metadata.db")]
    metadata_db: PathBuf,

    /// Metadata table name
    #[arg(long, default_value = DEFAULT_METADATA_TABLE)]
    table: String,

    /// Also remove zero-width non-joiners and RTL marks
    #[arg(long)]
    strip_zero_width: bool,
}

fn parse_label_mapping(raw: &str) -> Result<(i64, String), String> {
    let (id, name) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected ID=NAME, got {raw:?}"))?;
    let id = id
        .trim()
        .parse()
        .map_err(|_| format!("label id must be an integer: {id:?}"))?;
    Ok((id, name.trim().to_string()))
}

/// API tokens come from the environment so they stay out of shell history
fn token(var: &str) -> Result<String> {
    std::env::var(var).with_context(|| format!("{var} must be set"))
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing("agent_pipeline=info");
    let args = Args::parse();

    let cleaner = PersianTextCleaner::new(CleaningConfig {
        strip_zero_width_spaces: args.strip_zero_width,
        ..CleaningConfig::default()
    });
    let storage = DataStorage::open(&args.dataset, &args.metadata_db)
        .with_context(|| format!("Failed to open metadata database {}", args.metadata_db.display()))?;
    let mut pipeline = DataPipeline::new(cleaner, storage).with_metadata_table(&args.table);
    let mut source_count = 0;

    if let Some(url) = args.label_studio_url {
        let project = args
            .label_studio_project
            .context("--label-studio-project is required with --label-studio-url")?;
        let client = LabelStudioClient::new(url, token("LABEL_STUDIO_TOKEN")?, project)?;
        pipeline = pipeline.with_source(Box::new(client));
        source_count += 1;
    }
    if let Some(url) = args.doccano_url {
        let project = args
            .doccano_project
            .context("--doccano-project is required with --doccano-url")?;
        let mapping: HashMap<i64, String> = args.doccano_labels.into_iter().collect();
        let client =
            DoccanoClient::new(url, token("DOCCANO_TOKEN")?, project)?.with_label_mapping(mapping);
        pipeline = pipeline.with_source(Box::new(client));
        source_count += 1;
    }
    if source_count == 0 {
        bail!("No label source configured; pass --label-studio-url and/or --doccano-url");
    }

    let rows = pipeline.run().await.context("Pipeline run failed")?;
    tracing::info!(
        "Wrote {} rows to {}",
        rows.len(),
        pipeline.storage().dataset_path().display()
    );
    Ok(())
}
