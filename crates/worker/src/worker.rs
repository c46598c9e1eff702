//! Broker consumer loop

use crate::broker::{Broker, BrokerResult, TaskEnvelope, TaskKind};
use crate::tasks::{
    classify_task, reject_classification, run_inference_task, TaskError, TaskOutcome,
};
use agent_common::Metrics;
use agent_inference::{InferenceEngine, TextClassifier};
use agent_storage::ResultStore;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;

/// How long a single `consume` call waits before the loop re-checks shutdown
pub const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_secs(1);

const ERROR_BACKOFF: Duration = Duration::from_secs(1);

/// Everything a task needs to run
#[derive(Clone)]
pub struct TaskContext {
    pub engine: Arc<InferenceEngine>,
    pub classifier: Option<Arc<TextClassifier>>,
    pub store: Arc<ResultStore>,
}

impl TaskContext {
    /// Execute one task on the current thread.
    pub fn execute(&self, envelope: &TaskEnvelope) -> Result<TaskOutcome, TaskError> {
        match &envelope.task {
            TaskKind::RunInference {
                input_text,
                model_name,
            } => run_inference_task(
                &self.engine,
                &self.store,
                &envelope.task_id,
                input_text,
                model_name.as_deref(),
            ),
            TaskKind::Classify {
                text,
                top_k,
                threshold,
            } => match &self.classifier {
                Some(classifier) => classify_task(
                    classifier,
                    &self.store,
                    &envelope.task_id,
                    text,
                    *top_k,
                    *threshold,
                ),
                None => reject_classification(&self.store, &envelope.task_id, text),
            },
        }
    }
}

/// Result of one loop iteration
#[derive(Debug, Clone, PartialEq)]
pub enum Processed {
    /// Nothing arrived before the poll timeout
    Idle,
    Completed(TaskOutcome),
    Failed { task_id: String, error: String },
}

pub struct Worker {
    broker: Arc<dyn Broker>,
    context: TaskContext,
    metrics: Metrics,
    poll_timeout: Duration,
}

impl Worker {
    #[must_use]
    pub fn new(broker: Arc<dyn Broker>, context: TaskContext, metrics: Metrics) -> Self {
        Self {
            broker,
            context,
            metrics,
            poll_timeout: DEFAULT_POLL_TIMEOUT,
        }
    }

    #[must_use]
    pub fn with_poll_timeout(mut self, poll_timeout: Duration) -> Self {
        self.poll_timeout = poll_timeout;
        self
    }

    /// Consume and execute tasks until `shutdown` becomes true or its sender
    /// is dropped. A task already taken from the broker always finishes.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        tracing::info!("Worker started");
        self.metrics.worker_health.set(1.0);

        loop {
            if *shutdown.borrow() {
                break;
            }
            let next = tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
                next = self.broker.consume(self.poll_timeout) => next,
            };

            match next {
                Ok(Some(envelope)) => {
                    self.execute(envelope).await;
                    self.metrics.worker_health.set(1.0);
                }
                Ok(None) => self.metrics.worker_health.set(1.0),
                Err(err) => {
                    self.metrics.worker_health.set(0.0);
                    tracing::error!("Failed to consume from broker: {}", err);
                    tokio::time::sleep(ERROR_BACKOFF).await;
                }
            }
            self.metrics.worker_loop_iterations.inc();
        }

        self.metrics.worker_health.set(0.0);
        tracing::info!("Worker stopped");
    }

    /// Wait for at most one task and execute it.
    pub async fn run_once(&self) -> BrokerResult<Processed> {
        let processed = match self.broker.consume(self.poll_timeout).await? {
            Some(envelope) => self.execute(envelope).await,
            None => Processed::Idle,
        };
        self.metrics.worker_loop_iterations.inc();
        Ok(processed)
    }

    /// Run `envelope` on a blocking thread and record metrics.
    pub async fn execute(&self, envelope: TaskEnvelope) -> Processed {
        let kind = envelope.task.name();
        let task_id = envelope.task_id.clone();
        tracing::info!("Executing {} task {}", kind, task_id);

        let started = Instant::now();
        let context = self.context.clone();
        let joined = tokio::task::spawn_blocking(move || context.execute(&envelope)).await;
        let elapsed = started.elapsed().as_secs_f64();

        let processed = match joined {
            Ok(Ok(outcome)) => Processed::Completed(outcome),
            Ok(Err(err)) => Processed::Failed {
                task_id,
                error: err.to_string(),
            },
            Err(join_err) => {
                tracing::error!("Task {} panicked: {}", task_id, join_err);
                Processed::Failed {
                    task_id,
                    error: join_err.to_string(),
                }
            }
        };

        let status = match &processed {
            Processed::Completed(_) => "succeeded",
            _ => "failed",
        };
        self.metrics.record_task(kind, status, elapsed);
        let memory = self.context.engine.loader().memory().status();
        self.metrics.set_memory(memory.used_bytes, memory.limit_bytes);
        processed
    }
}
