//! Core optimization job and task domain types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::paramspace::ParamCombo;

/// Lifecycle state shared by jobs and tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum JobStatus {
    /// Waiting for a scheduler slot.
    Queued,
    /// Currently executing.
    Running,
    /// Finished successfully.
    Succeeded,
    /// Finished after exhausting retries or a fatal error.
    Failed,
    /// Stopped because the early-stop threshold was breached.
    EarlyStopped,
    /// Stopped by an explicit cancel request.
    Canceled,
}

impl JobStatus {
    /// Whether this status is terminal.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Succeeded | Self::Failed | Self::EarlyStopped | Self::Canceled
        )
    }

    /// Wire representation of the status.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::EarlyStopped => "early-stopped",
            Self::Canceled => "canceled",
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Direction of the objective an early-stop threshold applies to.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EarlyStopMode {
    /// Lower scores are better; stop once a score drops to the threshold.
    #[default]
    Min,
    /// Higher scores are better; stop once a score reaches the threshold.
    Max,
}

/// Threshold policy that locks a job early once a good enough score lands.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EarlyStopPolicy {
    /// Metric name the threshold refers to.
    pub metric: String,
    /// Score boundary that triggers the stop.
    pub threshold: f64,
    /// Whether the metric is minimized or maximized; defaults to `min`.
    #[serde(default)]
    pub mode: EarlyStopMode,
}

impl EarlyStopPolicy {
    /// Whether `score` crosses the threshold in the policy's direction.
    #[must_use]
    pub fn breached_by(&self, score: f64) -> bool {
        match self.mode {
            EarlyStopMode::Min => score <= self.threshold,
            EarlyStopMode::Max => score >= self.threshold,
        }
    }

    /// Best score among `scores` under this policy's direction.
    #[must_use]
    pub fn best_of(&self, scores: impl IntoIterator<Item = f64>) -> Option<f64> {
        let fold = |best: Option<f64>, score: f64| match best {
            None => Some(score),
            Some(current) => Some(match self.mode {
                EarlyStopMode::Min => current.min(score),
                EarlyStopMode::Max => current.max(score),
            }),
        };
        scores.into_iter().fold(None, fold)
    }
}

/// Classification of a task failure reported by a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskErrorCode {
    /// Bad parameters; retrying cannot help.
    ParamError,
    /// A dependency misbehaved; worth retrying.
    UpstreamError,
    /// Unexpected execution failure; worth retrying.
    InternalError,
}

impl TaskErrorCode {
    /// Whether failures with this code are eligible for scheduled retries.
    #[must_use]
    pub const fn is_retryable(self) -> bool {
        matches!(self, Self::UpstreamError | Self::InternalError)
    }

    /// Wire representation of the code.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ParamError => "PARAM_ERROR",
            Self::UpstreamError => "UPSTREAM_ERROR",
            Self::InternalError => "INTERNAL_ERROR",
        }
    }
}

/// Last failure recorded against a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskError {
    /// Failure classification.
    pub code: TaskErrorCode,
    /// Human-readable failure message.
    pub message: String,
}

/// Why a job was locked into a terminal state ahead of full completion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum StopReason {
    /// A top score crossed the configured early-stop threshold.
    #[serde(rename = "EARLY_STOP_THRESHOLD", rename_all = "camelCase")]
    EarlyStopThreshold {
        /// Metric the threshold applied to.
        metric: String,
        /// Configured boundary.
        threshold: f64,
        /// Score that breached it.
        score: f64,
        /// Objective direction at the time of the stop.
        mode: EarlyStopMode,
    },
    /// The owner canceled the job.
    #[serde(rename = "CANCELED", rename_all = "camelCase")]
    Canceled {
        /// Free-form reason supplied with the cancel request, if any.
        #[serde(skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
}

impl StopReason {
    /// Wire value of the reason's `kind` discriminant.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::EarlyStopThreshold { .. } => "EARLY_STOP_THRESHOLD",
            Self::Canceled { .. } => "CANCELED",
        }
    }
}

/// A single parameter combination scheduled for execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OptimizationTask {
    /// Task identifier.
    pub id: String,
    /// Parent job identifier.
    pub job_id: String,
    /// Owner the parent job belongs to.
    pub owner_id: String,
    /// Strategy version the task runs against.
    pub version_id: String,
    /// Concrete parameter combination.
    pub params: ParamCombo,
    /// Current lifecycle state.
    pub status: JobStatus,
    /// Execution progress in `[0, 1]`, absent until started.
    pub progress: Option<f64>,
    /// Retry attempts consumed so far.
    pub retries: u32,
    /// Result summary registered on success, if any.
    pub result_summary_id: Option<String>,
    /// Objective score reported on success.
    pub score: Option<f64>,
    /// Whether the scheduler is holding this task back.
    pub throttled: bool,
    /// Earliest time the task may be dequeued.
    pub next_run_at: DateTime<Utc>,
    /// Most recent failure, cleared on success.
    pub last_error: Option<TaskError>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last mutation time.
    pub updated_at: DateTime<Utc>,
}

impl OptimizationTask {
    /// Build a freshly queued task.
    #[must_use]
    pub fn queued(
        id: String,
        job_id: String,
        owner_id: String,
        version_id: String,
        params: ParamCombo,
        throttled: bool,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            job_id,
            owner_id,
            version_id,
            params,
            status: JobStatus::Queued,
            progress: None,
            retries: 0,
            result_summary_id: None,
            score: None,
            throttled,
            next_run_at: now,
            last_error: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// One entry of a job's leaderboard.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TopNEntry {
    /// Task that produced the score.
    pub task_id: String,
    /// Objective score.
    pub score: f64,
    /// Result summary backing the score, when registered.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result_summary_id: Option<String>,
}

/// Aggregated counters and leaderboard for a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobSummary {
    /// Total tasks generated for the job.
    pub total: usize,
    /// Tasks in a terminal state.
    pub finished: usize,
    /// Tasks currently running.
    pub running: usize,
    /// Tasks held back by the throttle.
    pub throttled: usize,
    /// Best-scoring tasks, ordered by the objective direction.
    pub top_n: Vec<TopNEntry>,
}

impl JobSummary {
    /// Empty summary for a job with `total` tasks, `throttled` of them held.
    #[must_use]
    pub const fn initial(total: usize, throttled: usize) -> Self {
        Self {
            total,
            finished: 0,
            running: 0,
            throttled,
            top_n: Vec::new(),
        }
    }
}

/// An optimization job and the settings it was created with.
#[derive(Debug, Clone)]
pub struct OptimizationJob {
    /// Job identifier.
    pub id: String,
    /// Owner the job belongs to.
    pub owner_id: String,
    /// Strategy version the job optimizes.
    pub version_id: String,
    /// Parameter space exactly as submitted.
    pub param_space: serde_json::Map<String, serde_json::Value>,
    /// Scheduler slot count.
    pub concurrency_limit: usize,
    /// Optional threshold that stops the job early.
    pub early_stop_policy: Option<EarlyStopPolicy>,
    /// Current lifecycle state.
    pub status: JobStatus,
    /// Number of tasks actually generated (after the task cap).
    pub total_tasks: usize,
    /// Combinatorial size of the parameter space.
    pub estimate: u64,
    /// Aggregated counters and leaderboard.
    pub summary: JobSummary,
    /// Terminal state the job was locked into, if any.
    pub locked_status: Option<JobStatus>,
    /// Why the job was locked.
    pub stop_reason: Option<StopReason>,
    /// Job this one was rerun from, if any.
    pub source_job_id: Option<String>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last mutation time.
    pub updated_at: DateTime<Utc>,
}

impl OptimizationJob {
    /// Whether the job has been locked into a terminal state.
    #[must_use]
    pub const fn is_locked(&self) -> bool {
        self.locked_status.is_some()
    }
}
