//! Prometheus metrics for the API server and worker

use prometheus::{
    Counter, CounterVec, Encoder, Gauge, GaugeVec, HistogramOpts, HistogramVec, Opts, Registry,
    TextEncoder,
};
use std::sync::Arc;

/// Content type of the Prometheus text exposition format
pub const METRICS_CONTENT_TYPE: &str = "text/plain; version=0.0.4";

const LATENCY_BUCKETS: &[f64] = &[0.001, 0.005, 0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0];

/// Metric handles backed by a private registry.
///
/// Cloning is cheap; all clones update the same registry.
#[derive(Clone)]
pub struct Metrics {
    registry: Arc<Registry>,
    pub http_requests_total: CounterVec,
    pub http_request_duration: HistogramVec,
    pub predictions_total: CounterVec,
    pub tasks_enqueued_total: CounterVec,
    pub worker_tasks_total: CounterVec,
    pub worker_task_duration: HistogramVec,
    pub worker_loop_iterations: Counter,
    pub worker_health: Gauge,
    pub memory_used_bytes: Gauge,
    pub memory_limit_bytes: Gauge,
    pub build_info: GaugeVec,
}

impl Metrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let http_requests_total = CounterVec::new(
            Opts::new("agent_http_requests_total", "Total HTTP requests handled"),
            &["route", "status"],
        )?;
        let http_request_duration = HistogramVec::new(
            HistogramOpts::new(
                "agent_http_request_duration_seconds",
                "HTTP request latency",
            )
            .buckets(LATENCY_BUCKETS.to_vec()),
            &["route"],
        )?;
        let predictions_total = CounterVec::new(
            Opts::new("agent_predictions_total", "Predictions served"),
            &["model", "outcome"],
        )?;
        let tasks_enqueued_total = CounterVec::new(
            Opts::new("agent_tasks_enqueued_total", "Tasks published to the broker"),
            &["kind"],
        )?;
        let worker_tasks_total = CounterVec::new(
            Opts::new("agent_worker_tasks_total", "Tasks executed by the worker"),
            &["kind", "status"],
        )?;
        let worker_task_duration = HistogramVec::new(
            HistogramOpts::new(
                "agent_worker_task_duration_seconds",
                "Time spent executing a worker task",
            )
            .buckets(LATENCY_BUCKETS.to_vec()),
            &["kind"],
        )?;
        let worker_loop_iterations = Counter::new(
            "agent_worker_loop_iterations_total",
            "Total number of worker loop iterations completed",
        )?;
        let worker_health = Gauge::new(
            "agent_worker_health_status",
            "Health indicator for the worker (1=healthy, 0=unhealthy)",
        )?;
        let memory_used_bytes = Gauge::new(
            "agent_model_memory_used_bytes",
            "Bytes reserved by loaded models",
        )?;
        let memory_limit_bytes = Gauge::new(
            "agent_model_memory_limit_bytes",
            "Memory budget for loaded models",
        )?;
        let build_info = GaugeVec::new(
            Opts::new("agent_build_info", "Build metadata for the application"),
            &["version"],
        )?;

        registry.register(Box::new(http_requests_total.clone()))?;
        registry.register(Box::new(http_request_duration.clone()))?;
        registry.register(Box::new(predictions_total.clone()))?;
        registry.register(Box::new(tasks_enqueued_total.clone()))?;
        registry.register(Box::new(worker_tasks_total.clone()))?;
        registry.register(Box::new(worker_task_duration.clone()))?;
        registry.register(Box::new(worker_loop_iterations.clone()))?;
        registry.register(Box::new(worker_health.clone()))?;
        registry.register(Box::new(memory_used_bytes.clone()))?;
        registry.register(Box::new(memory_limit_bytes.clone()))?;
        registry.register(Box::new(build_info.clone()))?;

        Ok(Self {
            registry: Arc::new(registry),
            http_requests_total,
            http_request_duration,
            predictions_total,
            tasks_enqueued_total,
            worker_tasks_total,
            worker_task_duration,
            worker_loop_iterations,
            worker_health,
            memory_used_bytes,
            memory_limit_bytes,
            build_info,
        })
    }

    /// Record a finished HTTP request
    pub fn record_request(&self, route: &str, status: u16, latency_secs: f64) {
        let status = status.to_string();
        self.http_requests_total
            .with_label_values(&[route, status.as_str()])
            .inc();
        self.http_request_duration
            .with_label_values(&[route])
            .observe(latency_secs);
    }

    /// Record a prediction outcome (`ok`, `empty` or `error`)
    pub fn record_prediction(&self, model: &str, outcome: &str) {
        self.predictions_total
            .with_label_values(&[model, outcome])
            .inc();
    }

    /// Record a finished worker task
    pub fn record_task(&self, kind: &str, status: &str, duration_secs: f64) {
        self.worker_tasks_total
            .with_label_values(&[kind, status])
            .inc();
        self.worker_task_duration
            .with_label_values(&[kind])
            .observe(duration_secs);
    }

    pub fn set_memory(&self, used_bytes: u64, limit_bytes: u64) {
        self.memory_used_bytes.set(used_bytes as f64);
        self.memory_limit_bytes.set(limit_bytes as f64);
    }

    pub fn set_build_info(&self, version: &str) {
        self.build_info.with_label_values(&[version]).set(1.0);
    }

    /// Get Prometheus text output
    pub fn gather(&self) -> String {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        if encoder.encode(&metric_families, &mut buffer).is_err() {
            return String::new();
        }
        String::from_utf8(buffer).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gather_contains_recorded_series() {
        let metrics = Metrics::new().unwrap();
        metrics.record_request("/health", 200, 0.002);
        metrics.record_task("run_inference", "succeeded", 0.1);
        metrics.set_build_info("1.2.3");
        metrics.set_memory(10, 100);

        let text = metrics.gather();
        assert!(text.contains("agent_http_requests_total{route=\"/health\",status=\"200\"} 1"));
        assert!(text.contains("agent_worker_tasks_total{kind=\"run_inference\",status=\"succeeded\"} 1"));
        assert!(text.contains("agent_build_info{version=\"1.2.3\"} 1"));
        assert!(text.contains("agent_model_memory_limit_bytes 100"));
    }

    #[test]
    fn test_instances_are_independent() {
        let a = Metrics::new().unwrap();
        let b = Metrics::new().unwrap();
        a.worker_loop_iterations.inc();
        assert!(a.gather().contains("agent_worker_loop_iterations_total 1"));
        assert!(b.gather().contains("agent_worker_loop_iterations_total 0"));
    }
}
