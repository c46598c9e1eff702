//! API Server Binary Entry Point

use agent_api_server::{spawn_in_process_worker, start_server, ApiState};
use agent_common::config::{default_config_path, load_config, AppConfig};
use agent_common::telemetry::init_tracing;
use agent_common::Metrics;
use agent_worker::{build_context, connect, is_in_process};
use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::watch;

#[derive(Parser)]
#[command(name = "agent-api-server")]
#[command(about = "HTTP API for synchronous and queued inference")]
#[command(version)]
struct Args {
    /// Config file (TOML); defaults to the platform config directory
    #[arg(long)]
    config: Option<PathBuf>,

    /// Bind address, overriding `API_SERVER_ADDR`
    #[arg(long)]
    addr: Option<String>,

    /// Result database path
    #[arg(long)]
    db: Option<PathBuf>,

    /// Broker URL (memory:// or sqlite://<path>)
    #[arg(long)]
    broker: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing("agent_api_server=info,tower_http=debug");
    let args = Args::parse();

    let config_path = match args.config {
        Some(path) => path,
        None => default_config_path()?,
    };
    let file = load_config(&config_path)?;
    let mut config = AppConfig::from_environment(&file)?;
    if let Some(addr) = args.addr {
        config.api_addr = addr;
    }
    if let Some(db) = args.db {
        config.db_path = db;
    }
    if let Some(broker) = args.broker {
        config.broker_url = broker;
    }

    let metrics = Metrics::new().context("Failed to create metrics registry")?;
    metrics.set_build_info(&config.app_version);
    metrics.set_memory(0, config.memory_limit_bytes);

    let broker = connect(&config.broker_url)
        .with_context(|| format!("Failed to connect to broker {}", config.broker_url))?;
    let context = build_context(&config)?;
    let state = ApiState::new(context, broker, metrics, config.app_version.clone());

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let embedded_worker = if is_in_process(&config.broker_url) {
        tracing::info!(
            "Broker {} is in-process; running an embedded worker",
            config.broker_url
        );
        Some(spawn_in_process_worker(
            &state,
            Duration::from_secs(1),
            shutdown_rx.clone(),
        ))
    } else {
        None
    };

    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
    let mut sigint = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::interrupt())?;
    let shutdown = async move {
        tokio::select! {
            _ = sigterm.recv() => tracing::info!("Received SIGTERM, shutting down"),
            _ = sigint.recv() => tracing::info!("Received SIGINT, shutting down"),
        }
        let _ = shutdown_tx.send(true);
    };

    tracing::info!("Starting inference API server");
    start_server(&config.api_addr, state, shutdown)
        .await
        .with_context(|| format!("API server on {} failed", config.api_addr))?;

    if let Some(handle) = embedded_worker {
        if let Err(err) = handle.await {
            tracing::warn!("Embedded worker task failed: {}", err);
        }
    }
    tracing::info!("API server shutdown complete.");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_are_optional() {
        let args = Args::parse_from(["agent-api-server"]);
        assert!(args.config.is_none());
        assert!(args.addr.is_none());
        assert!(args.broker.is_none());
    }

    #[test]
    fn test_args_overrides() {
        let args = Args::parse_from([
            "agent-api-server",
            "--addr",
            "127.0.0.1:9000",
            "--broker",
            "sqlite:///tmp/q.db",
        ]);
        assert_eq!(args.addr.as_deref(), Some("127.0.0.1:9000"));
        assert_eq!(args.broker.as_deref(), Some("sqlite:///tmp/q.db"));
    }
}
