//! Prometheus metrics for the optimization orchestrator.
//!
//! Covers job admission throttling, task queue wait and execution timings,
//! retry pressure, and job stop events.
//!
//! # Example
//!
//! ```ignore
//! use optimization_orchestrator::observability::{init_metrics, MetricsConfig};
//!
//! let config = MetricsConfig::default();
//! init_metrics(&config).expect("Failed to initialize metrics");
//!
//! record_queue_wait("owner-1", 0.5);
//! ```

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;

/// Configuration for the metrics exporter.
#[derive(Debug, Clone)]
pub struct MetricsConfig {
    /// Address to bind the metrics HTTP listener.
    pub listen_addr: SocketAddr,
    /// Histogram buckets for duration measurements (in seconds).
    pub duration_buckets: Vec<f64>,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:9090".parse().expect("valid default address"),
            // Duration buckets from 50ms to 10 minutes; backtest tasks are
            // long-running compared to request-scoped work.
            duration_buckets: vec![
                0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0, 600.0,
            ],
        }
    }
}

impl MetricsConfig {
    /// Create a new metrics configuration with custom address.
    #[must_use]
    pub fn with_addr(addr: SocketAddr) -> Self {
        Self {
            listen_addr: addr,
            ..Default::default()
        }
    }
}

/// Initialize the Prometheus metrics exporter.
///
/// This starts an HTTP server that exposes metrics at `/metrics`.
///
/// # Errors
///
/// Returns an error if the metrics exporter fails to start (e.g., port already in use).
pub fn init_metrics(config: &MetricsConfig) -> Result<(), MetricsError> {
    PrometheusBuilder::new()
        .with_http_listener(config.listen_addr)
        .set_buckets(&config.duration_buckets)
        .map_err(|e| MetricsError::Configuration(e.to_string()))?
        .install()
        .map_err(|e| MetricsError::Installation(e.to_string()))?;

    tracing::info!(
        addr = %config.listen_addr,
        "Prometheus metrics exporter started"
    );

    Ok(())
}

/// Error type for metrics operations.
#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    /// Failed to configure metrics exporter.
    #[error("metrics configuration error: {0}")]
    Configuration(String),
    /// Failed to install metrics exporter.
    #[error("metrics installation error: {0}")]
    Installation(String),
}

// ============================================================================
// Admission Metrics
// ============================================================================

/// Record tasks throttled at job admission.
///
/// # Arguments
///
/// * `owner_id` - Owner the job belongs to
/// * `count` - Number of tasks parked beyond the concurrency limit
pub fn record_throttled_requests(owner_id: &str, count: u64) {
    counter!(
        "throttled_requests",
        "owner_id" => owner_id.to_string()
    )
    .increment(count);
}

// ============================================================================
// Task Lifecycle Metrics
// ============================================================================

/// Record how long a task sat queued before a worker picked it up.
///
/// # Arguments
///
/// * `owner_id` - Owner the task belongs to
/// * `wait_seconds` - Time from task creation to dequeue in seconds
pub fn record_queue_wait(owner_id: &str, wait_seconds: f64) {
    histogram!(
        "queue_wait_seconds",
        "owner_id" => owner_id.to_string()
    )
    .record(wait_seconds);
}

/// Record the wall-clock duration of one task execution attempt.
///
/// # Arguments
///
/// * `owner_id` - Owner the task belongs to
/// * `duration_seconds` - Attempt duration in seconds
pub fn record_task_execution(owner_id: &str, duration_seconds: f64) {
    histogram!(
        "job_exec_seconds",
        "owner_id" => owner_id.to_string()
    )
    .record(duration_seconds);
}

/// Record the retry count observed on a processed task attempt.
///
/// # Arguments
///
/// * `owner_id` - Owner the task belongs to
/// * `retries` - Retries accumulated by the task so far
pub fn record_task_retries(owner_id: &str, retries: u32) {
    counter!(
        "job_retry_total",
        "owner_id" => owner_id.to_string()
    )
    .increment(u64::from(retries));
}

/// Update the running-task gauge for an owner.
///
/// # Arguments
///
/// * `owner_id` - Owner the job belongs to
/// * `running` - Tasks currently in the running state
pub fn update_active_jobs(owner_id: &str, running: usize) {
    #[allow(clippy::cast_precision_loss)]
    gauge!("active_jobs", "owner_id" => owner_id.to_string()).set(running as f64);
}

// ============================================================================
// Job Stop Metrics
// ============================================================================

/// Record a job reaching a locked stop state.
///
/// # Arguments
///
/// * `owner_id` - Owner the job belongs to
/// * `status` - Terminal status (e.g., "canceled", "early-stopped")
/// * `stop_kind` - Stop reason kind (e.g., `"CANCELED"`, `"EARLY_STOP_THRESHOLD"`)
pub fn record_job_stop(owner_id: &str, status: &str, stop_kind: &str) {
    counter!(
        "job_stop_total",
        "owner_id" => owner_id.to_string(),
        "status" => status.to_string(),
        "stop_kind" => stop_kind.to_string()
    )
    .increment(1);
}

/// Record the threshold and best score that triggered an early stop.
///
/// # Arguments
///
/// * `owner_id` - Owner the job belongs to
/// * `metric` - Metric name the early-stop policy watches
/// * `threshold` - Configured stop threshold
/// * `score` - Best leaderboard score at the moment of the stop
pub fn record_stop_threshold(owner_id: &str, metric: &str, threshold: f64, score: f64) {
    gauge!(
        "job_stop_threshold",
        "owner_id" => owner_id.to_string(),
        "metric" => metric.to_string()
    )
    .set(threshold);

    gauge!(
        "job_stop_score",
        "owner_id" => owner_id.to_string(),
        "metric" => metric.to_string()
    )
    .set(score);
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = MetricsConfig::default();
        assert_eq!(config.listen_addr.port(), 9090);
        assert!(!config.duration_buckets.is_empty());
    }

    #[test]
    fn config_with_addr() {
        let addr: SocketAddr = "127.0.0.1:8080".parse().unwrap();
        let config = MetricsConfig::with_addr(addr);
        assert_eq!(config.listen_addr.port(), 8080);
    }

    #[test]
    fn duration_buckets_span_task_scale() {
        let config = MetricsConfig::default();
        assert!(config.duration_buckets.windows(2).all(|w| w[0] < w[1]));
        assert!(*config.duration_buckets.last().unwrap() >= 600.0);
    }

    #[test]
    fn recorders_work_without_installed_exporter() {
        record_throttled_requests("owner-1", 3);
        record_queue_wait("owner-1", 0.25);
        record_task_execution("owner-1", 1.5);
        record_task_retries("owner-1", 2);
        update_active_jobs("owner-1", 4);
        record_job_stop("owner-1", "early-stopped", "EARLY_STOP_THRESHOLD");
        record_stop_threshold("owner-1", "sharpe", 1.0, 1.2);
    }
}
