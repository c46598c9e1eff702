//! Task brokers connecting the API server to workers
//!
//! Delivery is acknowledge-on-receive: a consumed message is gone from the
//! queue whether or not the task later succeeds, so each task runs at most
//! once.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;

/// Interval between queue polls for brokers that cannot block
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Error, Debug)]
pub enum BrokerError {
    #[error("Unsupported broker URL: {0}")]
    UnsupportedBroker(String),

    #[error("Broker queue is closed")]
    Closed,

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Broker task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

pub type BrokerResult<T> = Result<T, BrokerError>;

/// Work carried by a queued message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TaskKind {
    RunInference {
        input_text: String,
        #[serde(default)]
        model_name: Option<String>,
    },
    Classify {
        text: String,
        #[serde(default)]
        top_k: Option<usize>,
        #[serde(default)]
        threshold: Option<f64>,
    },
}

impl TaskKind {
    /// Label used for metrics and logs
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::RunInference { .. } => "run_inference",
            Self::Classify { .. } => "classify",
        }
    }
}

/// A message on the task queue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskEnvelope {
    pub task_id: String,
    pub task: TaskKind,
    pub enqueued_at: DateTime<Utc>,
}

impl TaskEnvelope {
    /// Wrap `task` with a fresh id
    #[must_use]
    pub fn new(task: TaskKind) -> Self {
        Self::with_id(uuid::Uuid::new_v4().to_string(), task)
    }

    #[must_use]
    pub fn with_id(task_id: impl Into<String>, task: TaskKind) -> Self {
        Self {
            task_id: task_id.into(),
            task,
            enqueued_at: Utc::now(),
        }
    }
}

/// Queue of task envelopes shared by producers and consumers
#[async_trait]
pub trait Broker: Send + Sync {
    async fn publish(&self, envelope: TaskEnvelope) -> BrokerResult<()>;

    /// Wait up to `timeout` for the next message.
    async fn consume(&self, timeout: Duration) -> BrokerResult<Option<TaskEnvelope>>;

    /// Messages published but not yet consumed
    async fn pending(&self) -> BrokerResult<usize>;
}

/// In-process FIFO queue; only usable when producer and consumer share a process
#[derive(Debug)]
pub struct MemoryBroker {
    sender: mpsc::UnboundedSender<TaskEnvelope>,
    receiver: tokio::sync::Mutex<mpsc::UnboundedReceiver<TaskEnvelope>>,
    pending: AtomicUsize,
}

impl MemoryBroker {
    #[must_use]
    pub fn new() -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self {
            sender,
            receiver: tokio::sync::Mutex::new(receiver),
            pending: AtomicUsize::new(0),
        }
    }
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    async fn publish(&self, envelope: TaskEnvelope) -> BrokerResult<()> {
        self.pending.fetch_add(1, Ordering::SeqCst);
        if self.sender.send(envelope).is_err() {
            self.pending.fetch_sub(1, Ordering::SeqCst);
            return Err(BrokerError::Closed);
        }
        Ok(())
    }

    async fn consume(&self, timeout: Duration) -> BrokerResult<Option<TaskEnvelope>> {
        let mut receiver = self.receiver.lock().await;
        match tokio::time::timeout(timeout, receiver.recv()).await {
            Ok(Some(envelope)) => {
                self.pending.fetch_sub(1, Ordering::SeqCst);
                Ok(Some(envelope))
            }
            Ok(None) => Err(BrokerError::Closed),
            Err(_) => Ok(None),
        }
    }

    async fn pending(&self) -> BrokerResult<usize> {
        Ok(self.pending.load(Ordering::SeqCst))
    }
}

const QUEUE_SCHEMA: &str = r"
CREATE TABLE IF NOT EXISTS task_queue (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    task_id TEXT NOT NULL,
    payload TEXT NOT NULL,
    enqueued_at TEXT NOT NULL
);
";

/// Durable queue in a SQLite file that several processes can share
#[derive(Debug)]
pub struct SqliteBroker {
    conn: Arc<Mutex<Connection>>,
    path: PathBuf,
    poll_interval: Duration,
}

impl SqliteBroker {
    pub fn open(path: impl AsRef<Path>) -> BrokerResult<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;",
        )?;
        conn.execute_batch(QUEUE_SCHEMA)?;
        tracing::info!("Opened SQLite broker at {}", path.display());

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path: path.to_path_buf(),
            poll_interval: DEFAULT_POLL_INTERVAL,
        })
    }

    #[must_use]
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Run `f` against the connection on the blocking pool. The busy timeout
    /// can stall a statement for seconds while another process writes.
    async fn with_conn<T, F>(&self, f: F) -> BrokerResult<T>
    where
        F: FnOnce(&Connection) -> BrokerResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().unwrap_or_else(PoisonError::into_inner);
            f(&conn)
        })
        .await?
    }
}

/// Remove and return the oldest message in one statement.
fn claim(conn: &Connection) -> BrokerResult<Option<TaskEnvelope>> {
    let payload: Option<String> = conn
        .query_row(
            "DELETE FROM task_queue
             WHERE id = (SELECT id FROM task_queue ORDER BY id LIMIT 1)
             RETURNING payload",
            [],
            |row| row.get(0),
        )
        .optional()?;
    payload
        .map(|raw| serde_json::from_str(&raw).map_err(BrokerError::from))
        .transpose()
}

#[async_trait]
impl Broker for SqliteBroker {
    async fn publish(&self, envelope: TaskEnvelope) -> BrokerResult<()> {
        let payload = serde_json::to_string(&envelope)?;
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO task_queue (task_id, payload, enqueued_at) VALUES (?1, ?2, ?3)",
                params![envelope.task_id, payload, envelope.enqueued_at.to_rfc3339()],
            )?;
            Ok(())
        })
        .await
    }

    async fn consume(&self, timeout: Duration) -> BrokerResult<Option<TaskEnvelope>> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if let Some(envelope) = self.with_conn(claim).await? {
                return Ok(Some(envelope));
            }
            let now = tokio::time::Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            tokio::time::sleep(self.poll_interval.min(deadline - now)).await;
        }
    }

    async fn pending(&self) -> BrokerResult<usize> {
        let count: i64 = self
            .with_conn(|conn| {
                Ok(conn.query_row("SELECT COUNT(*) FROM task_queue", [], |row| row.get(0))?)
            })
            .await?;
        Ok(usize::try_from(count).unwrap_or(0))
    }
}

/// Build a broker from a URL: `memory://` or `sqlite://<path>`.
pub fn connect(url: &str) -> BrokerResult<Arc<dyn Broker>> {
    if url == "memory://" {
        return Ok(Arc::new(MemoryBroker::new()));
    }
    match url.strip_prefix("sqlite://") {
        Some(path) if !path.is_empty() => Ok(Arc::new(SqliteBroker::open(path)?)),
        _ => Err(BrokerError::UnsupportedBroker(url.to_string())),
    }
}

/// True for brokers that only work inside a single process
#[must_use]
pub fn is_in_process(url: &str) -> bool {
    url == "memory://"
}
