//! REST API for the inference service
//!
//! Two ways to run a model:
//! - Synchronous: `POST /inference/sync` returns the output in the response
//! - Queued: `POST /inference/tasks` stores a `pending` row and hands the task
//!   to a worker through the broker; poll `GET /inference/tasks/{task_id}`
//!
//! `POST /predict` serves ranked labels from the configured text classifier.

mod error;
mod handlers;
mod types;

use agent_common::Metrics;
use agent_worker::{Broker, TaskContext, Worker};
use axum::{
    extract::{MatchedPath, Request, State},
    middleware::{self, Next},
    response::Response,
    routing::{get, post},
    Router,
};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub use error::ApiError;
pub use handlers::*;
pub use types::*;

/// API server state shared across handlers
#[derive(Clone)]
pub struct ApiState {
    /// Engine, classifier and result store
    pub context: TaskContext,
    /// Queue that receives background tasks
    pub broker: Arc<dyn Broker>,
    pub metrics: Metrics,
    /// Reported by `/health`
    pub version: String,
}

impl ApiState {
    #[must_use]
    pub fn new(
        context: TaskContext,
        broker: Arc<dyn Broker>,
        metrics: Metrics,
        version: impl Into<String>,
    ) -> Self {
        Self {
            context,
            broker,
            metrics,
            version: version.into(),
        }
    }
}

/// Build the API router with all endpoints
pub fn build_router(state: ApiState) -> Router {
    Router::new()
        // Health check
        .route("/health", get(health_check))
        // Text-to-text inference
        .route("/inference/sync", post(sync_inference))
        .route("/inference/tasks", post(enqueue_inference).get(list_tasks))
        .route("/inference/tasks/{task_id}", get(get_task))
        // Engine state
        .route("/memory", get(memory_status))
        .route("/models", get(list_models))
        // Classification
        .route("/predict", post(predict))
        .route("/predict/tasks", post(enqueue_prediction))
        .route("/metrics", get(handlers::metrics))
        // Middleware
        .route_layer(middleware::from_fn_with_state(state.clone(), track_requests))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Count requests and latency per matched route
async fn track_requests(State(state): State<ApiState>, request: Request, next: Next) -> Response {
    let route = request
        .extensions()
        .get::<MatchedPath>()
        .map_or_else(|| request.uri().path().to_string(), |p| p.as_str().to_string());
    let started = Instant::now();
    let response = next.run(request).await;
    state.metrics.record_request(
        &route,
        response.status().as_u16(),
        started.elapsed().as_secs_f64(),
    );
    response
}

/// Serve on an already bound listener until the process ends
pub async fn serve(listener: tokio::net::TcpListener, state: ApiState) -> std::io::Result<()> {
    axum::serve(listener, build_router(state)).await
}

/// Start the API server, stopping once `shutdown` completes
pub async fn start_server<F>(addr: &str, state: ApiState, shutdown: F) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    tracing::info!("Starting API server on {}", addr);

    let app = build_router(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
}

/// Run a worker inside this process against the state's broker.
///
/// Needed with a `memory://` broker, whose queue no other process can see.
pub fn spawn_in_process_worker(
    state: &ApiState,
    poll_timeout: Duration,
    shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    let worker = Worker::new(
        state.broker.clone(),
        state.context.clone(),
        state.metrics.clone(),
    )
    .with_poll_timeout(poll_timeout);
    tokio::spawn(async move { worker.run(shutdown).await })
}
