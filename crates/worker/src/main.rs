//! agent-worker: executes inference tasks pulled from the broker
//!
//! Exposes Prometheus metrics on `METRICS_PORT` while it runs.

use agent_common::config::{default_config_path, load_config, parse_metrics_port, AppConfig};
use agent_common::telemetry::init_tracing;
use agent_common::Metrics;
use agent_worker::{build_context, connect, is_in_process, metrics_router, Worker};
use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::watch;

#[derive(Parser)]
#[command(name = "agent-worker")]
#[command(about = "Background worker that executes queued inference tasks")]
#[command(version)]
struct Args {
    /// Config file (TOML); defaults to the platform config directory
    #[arg(long)]
    config: Option<PathBuf>,

    /// Broker URL (memory:// or sqlite://<path>)
    #[arg(long)]
    broker: Option<String>,

    /// Result database path
    #[arg(long)]
    db: Option<PathBuf>,

    /// Port for the /metrics endpoint
    #[arg(long)]
    metrics_port: Option<String>,

    /// Seconds to wait on the broker before re-checking for shutdown
    #[arg(long, default_value_t = 1)]
    poll_seconds: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing("agent_worker=info,agent_inference=info");
    let args = Args::parse();

    let config_path = match args.config {
        Some(path) => path,
        None => default_config_path()?,
    };
    let file = load_config(&config_path)?;
    let mut config = AppConfig::from_environment(&file)?;
    if let Some(broker) = args.broker {
        config.broker_url = broker;
    }
    if let Some(db) = args.db {
        config.db_path = db;
    }
    if let Some(port) = args.metrics_port {
        config.metrics_port = parse_metrics_port(&port);
    }

    if is_in_process(&config.broker_url) {
        tracing::warn!(
            "Broker {} is in-process; this worker will only see tasks it publishes itself",
            config.broker_url
        );
    }

    let metrics = Metrics::new().context("Failed to create metrics registry")?;
    metrics.set_build_info(&config.app_version);
    metrics.set_memory(0, config.memory_limit_bytes);

    let broker = connect(&config.broker_url)
        .with_context(|| format!("Failed to connect to broker {}", config.broker_url))?;
    let context = build_context(&config)?;
    let worker = Worker::new(broker, context, metrics.clone())
        .with_poll_timeout(Duration::from_secs(args.poll_seconds));

    let metrics_addr = format!("0.0.0.0:{}", config.metrics_port);
    let listener = tokio::net::TcpListener::bind(&metrics_addr)
        .await
        .with_context(|| format!("Failed to bind metrics endpoint on {metrics_addr}"))?;
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let metrics_server = tokio::spawn({
        let mut shutdown = shutdown_rx.clone();
        let app = metrics_router(metrics.clone());
        async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    let _ = shutdown.wait_for(|stop| *stop).await;
                })
                .await
        }
    });
    tracing::info!(
        "Agent worker started. Metrics are exposed on port {}.",
        config.metrics_port
    );

    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
    let mut sigint = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::interrupt())?;
    let signals = async move {
        tokio::select! {
            _ = sigterm.recv() => tracing::info!("Received SIGTERM, shutting down"),
            _ = sigint.recv() => tracing::info!("Received SIGINT, shutting down"),
        }
        let _ = shutdown_tx.send(true);
    };

    tokio::join!(worker.run(shutdown_rx), signals);

    metrics.worker_health.set(0.0);
    match metrics_server.await {
        Ok(Ok(())) => {}
        Ok(Err(err)) => tracing::warn!("Metrics server error: {}", err),
        Err(err) => tracing::warn!("Metrics server task failed: {}", err),
    }
    tracing::info!("Worker shutdown complete.");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_defaults() {
        let args = Args::parse_from(["agent-worker"]);
        assert!(args.config.is_none());
        assert!(args.broker.is_none());
        assert!(args.metrics_port.is_none());
        assert_eq!(args.poll_seconds, 1);
    }

    #[test]
    fn test_args_overrides() {
        let args = Args::parse_from([
            "agent-worker",
            "--broker",
            "sqlite:///tmp/queue.db",
            "--metrics-port",
            "9100",
        ]);
        assert_eq!(args.broker.as_deref(), Some("sqlite:///tmp/queue.db"));
        assert_eq!(parse_metrics_port(&args.metrics_port.unwrap()), 9100);
    }
}
