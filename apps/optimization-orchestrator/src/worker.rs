//! Optimization worker loop.
//!
//! Pulls due tasks off the in-memory scheduler, executes them through a
//! [`TaskRunner`], and reports results back so retry backoff, summary
//! aggregation, and early-stop checks all fire. [`Worker::process_next`]
//! is the single-step building block; [`Worker::run_job`] drains one job
//! with bounded parallelism.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use chrono::Utc;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::error::OrchestratorError;
use crate::jobs::{JobStatus, OptimizationTask, TaskErrorCode};
use crate::observability;
use crate::orchestrator::{InMemoryOrchestrator, Orchestrator};

/// Longest failure message recorded on a task.
const MAX_ERROR_LENGTH: usize = 200;

/// Failure raised by a task runner, classified for retry handling.
#[derive(Debug, Error)]
pub enum WorkerError {
    /// The parameter combination itself is unusable; never retried.
    #[error("{0}")]
    Param(String),
    /// An upstream dependency failed; the attempt is retryable.
    #[error("{0}")]
    Upstream(String),
    /// Unexpected failure inside the runner; retryable.
    #[error("{0}")]
    Internal(String),
}

impl WorkerError {
    /// Task error code this failure maps to.
    #[must_use]
    pub const fn task_code(&self) -> TaskErrorCode {
        match self {
            Self::Param(_) => TaskErrorCode::ParamError,
            Self::Upstream(_) => TaskErrorCode::UpstreamError,
            Self::Internal(_) => TaskErrorCode::InternalError,
        }
    }
}

/// Result reported by a successful task run.
#[derive(Debug, Clone, Default)]
pub struct RunOutcome {
    /// Objective score, when the run produced one.
    pub score: Option<f64>,
    /// Result summary registered by the runner, when it stored one.
    pub result_summary_id: Option<String>,
}

impl RunOutcome {
    /// Outcome carrying only a score.
    #[must_use]
    pub const fn scored(score: f64) -> Self {
        Self {
            score: Some(score),
            result_summary_id: None,
        }
    }
}

impl From<f64> for RunOutcome {
    fn from(score: f64) -> Self {
        Self::scored(score)
    }
}

/// Executes one parameter combination against a strategy version.
#[async_trait]
pub trait TaskRunner: Send + Sync {
    /// Run `task` to completion, returning its score and artifacts.
    async fn run(&self, task: &OptimizationTask) -> Result<RunOutcome, WorkerError>;
}

/// Outcome of one worker iteration.
#[derive(Debug, Clone)]
pub struct ProcessedTask {
    /// Task that was executed.
    pub task_id: String,
    /// Job the task belongs to.
    pub job_id: String,
    /// Whether the attempt succeeded.
    pub succeeded: bool,
    /// Task state after bookkeeping (queued again on a retryable failure).
    pub task_status: JobStatus,
    /// Score recorded on the task, if any.
    pub score: Option<f64>,
    /// Retries accumulated by the task.
    pub retries: u32,
    /// Failure classification when the attempt failed.
    pub error: Option<TaskErrorCode>,
}

/// Drives task execution against the in-memory scheduler.
pub struct Worker {
    engine: Arc<InMemoryOrchestrator>,
    runner: Arc<dyn TaskRunner>,
}

impl Worker {
    /// Create a worker around a scheduler and a runner.
    #[must_use]
    pub fn new(engine: Arc<InMemoryOrchestrator>, runner: Arc<dyn TaskRunner>) -> Self {
        Self { engine, runner }
    }

    /// Claim and execute the next due task for `owner_id`.
    ///
    /// Returns `None` when no task is due. Queue-wait, execution, and
    /// retry metrics are emitted on both outcome paths.
    ///
    /// # Errors
    ///
    /// Propagates store failures from result bookkeeping. Runner failures
    /// are recorded on the task, not returned.
    pub async fn process_next(
        &self,
        owner_id: &str,
    ) -> Result<Option<ProcessedTask>, OrchestratorError> {
        let Some(task) = self.engine.dequeue_next(owner_id, None).await else {
            observability::update_active_jobs(owner_id, 0);
            return Ok(None);
        };
        self.execute(owner_id, task).await.map(Some)
    }

    /// Drain one job with up to `parallelism` concurrent attempts.
    ///
    /// Claims only tasks belonging to `job_id`, so several drivers can
    /// share one scheduler. Returns once the store has no more due tasks
    /// for the job and nothing is in flight; tasks parked behind a retry
    /// backoff stay queued for a later pass.
    ///
    /// Returns the number of attempts executed.
    ///
    /// # Errors
    ///
    /// Propagates store failures. Individual runner failures are absorbed
    /// into retry bookkeeping.
    pub async fn run_job(
        self: &Arc<Self>,
        owner_id: &str,
        job_id: &str,
        parallelism: usize,
    ) -> Result<usize, OrchestratorError> {
        let parallelism = parallelism.max(1);
        let semaphore = Arc::new(Semaphore::new(parallelism));
        let mut join_set: JoinSet<Result<ProcessedTask, OrchestratorError>> = JoinSet::new();
        let mut attempts = 0usize;

        loop {
            // Drain finished attempts before claiming more work.
            while join_set.len() >= parallelism {
                drain_one(&mut join_set).await?;
            }
            match self.engine.dequeue_next(owner_id, Some(job_id)).await {
                Some(task) => {
                    let permit = semaphore.clone().acquire_owned().await.map_err(|e| {
                        OrchestratorError::config(format!("worker pool closed: {e}"))
                    })?;
                    let worker = Arc::clone(self);
                    let owner = owner_id.to_string();
                    join_set.spawn(async move {
                        let result = worker.execute(&owner, task).await;
                        drop(permit);
                        result
                    });
                    attempts += 1;
                }
                None => {
                    // A completion can un-throttle or re-queue tasks, so
                    // try again after the in-flight set shrinks.
                    if join_set.is_empty() {
                        break;
                    }
                    drain_one(&mut join_set).await?;
                }
            }
        }
        Ok(attempts)
    }

    async fn execute(
        &self,
        owner_id: &str,
        task: OptimizationTask,
    ) -> Result<ProcessedTask, OrchestratorError> {
        let wait_seconds =
            (Utc::now() - task.created_at).num_milliseconds().max(0) as f64 / 1000.0;
        observability::record_queue_wait(owner_id, wait_seconds);
        tracing::info!(
            job_id = %task.job_id,
            task_id = %task.id,
            owner_id,
            retry = task.retries,
            "task execution started"
        );
        let started = Instant::now();
        let run_result = self.isolated_run(&task).await;
        let processed = match run_result {
            Ok(outcome) => {
                let updated = self
                    .engine
                    .mark_task_succeeded(
                        &task.job_id,
                        &task.id,
                        outcome.score,
                        outcome.result_summary_id,
                    )
                    .await?;
                tracing::info!(
                    job_id = %task.job_id,
                    task_id = %task.id,
                    owner_id,
                    duration_ms = started.elapsed().as_millis() as u64,
                    "task execution finished"
                );
                ProcessedTask {
                    task_id: updated.id,
                    job_id: task.job_id.clone(),
                    succeeded: true,
                    task_status: updated.status,
                    score: updated.score,
                    retries: updated.retries,
                    error: None,
                }
            }
            Err(error) => {
                let code = error.task_code();
                let failed = self
                    .engine
                    .mark_task_failed(
                        &task.job_id,
                        &task.id,
                        code,
                        truncate_error(&error.to_string()),
                    )
                    .await?;
                tracing::warn!(
                    job_id = %task.job_id,
                    task_id = %task.id,
                    owner_id,
                    code = code.as_str(),
                    error = %error,
                    retry = failed.retries,
                    "task execution failed"
                );
                ProcessedTask {
                    task_id: failed.id,
                    job_id: task.job_id.clone(),
                    succeeded: false,
                    task_status: failed.status,
                    score: failed.score,
                    retries: failed.retries,
                    error: Some(code),
                }
            }
        };
        observability::record_task_execution(owner_id, started.elapsed().as_secs_f64());
        observability::record_task_retries(owner_id, processed.retries);
        self.refresh_active_jobs(owner_id, &processed.job_id).await;
        Ok(processed)
    }

    /// Run the task in its own tokio task so a panicking runner surfaces
    /// as an internal task failure instead of tearing down the worker.
    async fn isolated_run(&self, task: &OptimizationTask) -> Result<RunOutcome, WorkerError> {
        let runner = Arc::clone(&self.runner);
        let task = task.clone();
        tokio::spawn(async move { runner.run(&task).await })
            .await
            .unwrap_or_else(|join_error| Err(WorkerError::Internal(join_error.to_string())))
    }

    async fn refresh_active_jobs(&self, owner_id: &str, job_id: &str) {
        if let Ok(status) = self.engine.job_status(owner_id, job_id).await {
            observability::update_active_jobs(owner_id, status.summary.running);
        }
    }
}

async fn drain_one(
    join_set: &mut JoinSet<Result<ProcessedTask, OrchestratorError>>,
) -> Result<(), OrchestratorError> {
    if let Some(joined) = join_set.join_next().await {
        joined
            .map_err(|join_error| {
                OrchestratorError::config(format!("worker attempt panicked: {join_error}"))
            })??;
    }
    Ok(())
}

fn truncate_error(message: &str) -> String {
    if message.len() <= MAX_ERROR_LENGTH {
        message.to_string()
    } else {
        message.chars().take(MAX_ERROR_LENGTH).collect()
    }
}
