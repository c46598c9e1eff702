//! Integration tests: a producer and a worker sharing a SQLite broker file

use agent_common::Metrics;
use agent_inference::{InferenceEngine, MemoryManager, ModelConfig, ModelLoader};
use agent_storage::{ResultStore, TaskStatus};
use agent_worker::{
    metrics_router, Broker, SqliteBroker, TaskContext, TaskEnvelope, TaskKind, Worker,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

fn context(db: &std::path::Path) -> TaskContext {
    let loader = Arc::new(ModelLoader::new(Arc::new(MemoryManager::new(1_000))));
    TaskContext {
        engine: Arc::new(InferenceEngine::new(
            loader,
            ModelConfig::new("default").with_memory_bytes(100),
            [ModelConfig::new("reverse")
                .with_memory_bytes(100)
                .with_metadata("behavior", "reverse")],
        )),
        classifier: None,
        store: Arc::new(ResultStore::open(db).unwrap()),
    }
}

async fn wait_for_terminal(store: &ResultStore, task_id: &str) -> agent_storage::InferenceRecord {
    for _ in 0..200 {
        if let Some(record) = store.get_result(task_id).unwrap() {
            if record.status.is_terminal() {
                return record;
            }
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("task {task_id} never finished");
}

#[tokio::test]
async fn test_worker_drains_shared_sqlite_queue() {
    let dir = tempfile::tempdir().unwrap();
    let queue_path = dir.path().join("queue.db");
    let db_path = dir.path().join("results.db");

    // Producer and consumer open the queue independently, as separate processes would
    let producer = SqliteBroker::open(&queue_path).unwrap();
    let consumer: Arc<dyn Broker> = Arc::new(
        SqliteBroker::open(&queue_path)
            .unwrap()
            .with_poll_interval(Duration::from_millis(5)),
    );

    let metrics = Metrics::new().unwrap();
    let worker = Arc::new(
        Worker::new(consumer, context(&db_path), metrics.clone())
            .with_poll_timeout(Duration::from_millis(50)),
    );
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let running = tokio::spawn({
        let worker = Arc::clone(&worker);
        async move { worker.run(shutdown_rx).await }
    });

    producer
        .publish(TaskEnvelope::with_id(
            "ok",
            TaskKind::RunInference {
                input_text: "abc".into(),
                model_name: Some("reverse".into()),
            },
        ))
        .await
        .unwrap();
    producer
        .publish(TaskEnvelope::with_id(
            "bad",
            TaskKind::RunInference {
                input_text: "abc".into(),
                model_name: Some("missing".into()),
            },
        ))
        .await
        .unwrap();

    let store = ResultStore::open(&db_path).unwrap();
    let ok = wait_for_terminal(&store, "ok").await;
    assert_eq!(ok.status, TaskStatus::Succeeded);
    assert_eq!(ok.output_text.as_deref(), Some("cba"));

    let bad = wait_for_terminal(&store, "bad").await;
    assert_eq!(bad.status, TaskStatus::Failed);
    assert_eq!(bad.error.as_deref(), Some("Unknown model 'missing'"));
    assert_eq!(producer.pending().await.unwrap(), 0);

    shutdown_tx.send(true).unwrap();
    tokio::time::timeout(Duration::from_secs(2), running)
        .await
        .unwrap()
        .unwrap();

    let text = metrics.gather();
    assert!(text.contains(r#"agent_worker_tasks_total{kind="run_inference",status="succeeded"} 1"#));
    assert!(text.contains(r#"agent_worker_tasks_total{kind="run_inference",status="failed"} 1"#));
    assert!(text.contains("agent_worker_health_status 0"));
}

#[tokio::test]
async fn test_metrics_endpoint_serves_prometheus_text() {
    let metrics = Metrics::new().unwrap();
    metrics.set_build_info("1.2.3");
    metrics.worker_health.set(1.0);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, metrics_router(metrics)).await.unwrap();
    });

    let response = reqwest::get(format!("http://{addr}/metrics")).await.unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(
        response.headers()["content-type"],
        "text/plain; version=0.0.4"
    );
    let body = response.text().await.unwrap();
    assert!(body.contains(r#"agent_build_info{version="1.2.3"} 1"#));
    assert!(body.contains("agent_worker_health_status 1"));

    let missing = reqwest::get(format!("http://{addr}/other")).await.unwrap();
    assert_eq!(missing.status(), 404);
}
