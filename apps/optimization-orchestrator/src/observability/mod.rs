//! Observability module for metrics and logging.
//!
//! Provides Prometheus metrics export for the orchestrator. Structured
//! logging lives with the tracing subscriber setup in [`crate::telemetry`].

mod metrics;

pub use metrics::{
    MetricsConfig, MetricsError, init_metrics, record_job_stop, record_queue_wait,
    record_stop_threshold, record_task_execution, record_task_retries,
    record_throttled_requests, update_active_jobs,
};
