//! Wire payloads exchanged with clients and the internal orchestrator API.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::jobs::types::{
    EarlyStopPolicy, JobStatus, JobSummary, OptimizationJob, StopReason,
};
use crate::paramspace::ParamCombo;

/// Request accepted by the internal create endpoint and the service layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateJobRequest {
    /// Owner submitting the job.
    pub owner_id: String,
    /// Strategy version to optimize.
    pub version_id: String,
    /// Raw parameter space as submitted by the caller.
    pub param_space: serde_json::Map<String, serde_json::Value>,
    /// Requested scheduler slot count; the service defaults it when absent.
    pub concurrency_limit: Option<i64>,
    /// Optional early-stop threshold.
    pub early_stop_policy: Option<EarlyStopPolicy>,
    /// Estimate computed by the caller, kept for reporting when present.
    pub estimate: Option<u64>,
    /// Job this request reruns, if any.
    pub source_job_id: Option<String>,
}

/// Response returned by job creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateJobResponse {
    /// New job identifier.
    pub id: String,
    /// Initial job status.
    pub status: JobStatus,
    /// Whether any task started out throttled.
    pub throttled: bool,
    /// Number of tasks generated.
    pub total_tasks: usize,
    /// Source job when the creation was a rerun.
    pub source_job_id: Option<String>,
}

/// Public submit acknowledgement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitAccepted {
    /// New job identifier.
    pub id: String,
    /// Initial job status.
    pub status: JobStatus,
    /// Whether any task started out throttled.
    pub throttled: bool,
}

/// Live scheduling signals derived from a job's summary.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobDiagnostics {
    /// Whether any task is currently throttled.
    pub throttled: bool,
    /// Number of throttled tasks.
    pub queue_depth: usize,
    /// Number of running tasks.
    pub running: usize,
    /// Whether the job has reached a terminal state.
    #[serde(rename = "final")]
    pub is_final: bool,
    /// Why the job stopped, present once final.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_reason: Option<StopReason>,
}

/// Status view of a job.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStatusPayload {
    /// Job identifier.
    pub id: String,
    /// Current job status.
    pub status: JobStatus,
    /// Number of tasks generated.
    pub total_tasks: usize,
    /// Scheduler slot count.
    pub concurrency_limit: usize,
    /// Aggregated counters and leaderboard.
    pub summary: JobSummary,
    /// Live scheduling signals.
    pub diagnostics: JobDiagnostics,
    /// Early-stop policy the job runs under.
    pub early_stop_policy: Option<EarlyStopPolicy>,
    /// Job this one was rerun from.
    pub source_job_id: Option<String>,
}

impl JobStatusPayload {
    /// Project a job into its status view.
    #[must_use]
    pub fn from_job(job: &OptimizationJob) -> Self {
        let summary = job.summary.clone();
        Self {
            id: job.id.clone(),
            status: job.status,
            total_tasks: job.total_tasks,
            concurrency_limit: job.concurrency_limit,
            diagnostics: JobDiagnostics {
                throttled: summary.throttled > 0,
                queue_depth: summary.throttled,
                running: summary.running,
                is_final: job.status.is_terminal(),
                stop_reason: job.stop_reason.clone(),
            },
            summary,
            early_stop_policy: job.early_stop_policy.clone(),
            source_job_id: job.source_job_id.clone(),
        }
    }
}

/// Full job snapshot, used for reruns and history listings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobSnapshot {
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
    /// Early-stop policy the job runs under.
    pub early_stop_policy: Option<EarlyStopPolicy>,
    /// Current job status.
    pub status: JobStatus,
    /// Number of tasks generated.
    pub total_tasks: usize,
    /// Aggregated counters and leaderboard.
    pub summary: JobSummary,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last mutation time.
    pub updated_at: DateTime<Utc>,
    /// Job this one was rerun from.
    pub source_job_id: Option<String>,
}

impl JobSnapshot {
    /// Project a job into its snapshot view.
    #[must_use]
    pub fn from_job(job: &OptimizationJob) -> Self {
        Self {
            id: job.id.clone(),
            owner_id: job.owner_id.clone(),
            version_id: job.version_id.clone(),
            param_space: job.param_space.clone(),
            concurrency_limit: job.concurrency_limit,
            early_stop_policy: job.early_stop_policy.clone(),
            status: job.status,
            total_tasks: job.total_tasks,
            summary: job.summary.clone(),
            created_at: job.created_at,
            updated_at: job.updated_at,
            source_job_id: job.source_job_id.clone(),
        }
    }
}

/// Pointer to one artifact produced by a backtest run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultArtifact {
    /// Artifact kind, e.g. `metrics` or `equity`.
    #[serde(rename = "type")]
    pub kind: String,
    /// Where the artifact can be fetched.
    pub url: String,
}

/// Registered result summary for a finished task.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultSummary {
    /// Summary identifier.
    pub id: String,
    /// Owner of the task that produced it.
    pub owner_id: String,
    /// Metric values keyed by name.
    pub metrics: HashMap<String, f64>,
    /// Artifacts produced by the run.
    pub artifacts: Vec<ResultArtifact>,
    /// Registration time.
    pub created_at: DateTime<Utc>,
    /// Equity curve artifact location.
    pub equity_curve_ref: String,
    /// Trade log artifact location.
    pub trades_ref: String,
}

/// One leaderboard row of an export bundle.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportItem {
    /// Task that produced the score.
    pub task_id: String,
    /// Objective score, absent when the task never reported one.
    pub score: Option<f64>,
    /// Parameter combination the task ran.
    pub params: ParamCombo,
    /// Result summary backing the row.
    pub result_summary_id: Option<String>,
    /// Metric values from the result summary.
    pub metrics: Option<HashMap<String, f64>>,
    /// Artifacts from the result summary.
    pub artifacts: Option<Vec<ResultArtifact>>,
}

/// Downloadable bundle of a job's best results.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportBundle {
    /// Job the bundle belongs to.
    pub job_id: String,
    /// Job status at export time.
    pub status: JobStatus,
    /// When the bundle was assembled.
    pub generated_at: DateTime<Utc>,
    /// Aggregated counters and leaderboard.
    pub summary: JobSummary,
    /// Leaderboard rows with params and artifacts attached.
    pub items: Vec<ExportItem>,
}

/// Body of a cancel request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CancelRequest {
    /// Free-form cancellation reason.
    pub reason: Option<String>,
}
