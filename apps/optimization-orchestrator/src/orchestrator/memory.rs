//! In-memory job and task store with dynamic slot scheduling.
//!
//! The default backend. Jobs, their ordered task sets, and result summaries
//! live behind one async mutex; every mutation re-aggregates the owning
//! job's summary so status reads never observe stale counters. Throttled
//! tasks are re-admitted as running ones finish, so the throttled count
//! shrinks over a job's lifetime instead of staying a creation-time
//! snapshot.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::json;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::config::SchedulerSettings;
use crate::error::OrchestratorError;
use crate::jobs::{
    CreateJobRequest, CreateJobResponse, ExportBundle, ExportItem, JobSnapshot, JobStatus,
    JobStatusPayload, JobSummary, OptimizationJob, OptimizationTask, ResultArtifact,
    ResultSummary, StopReason, TaskError, TaskErrorCode,
};
use crate::observability;
use crate::orchestrator::port::Orchestrator;
use crate::orchestrator::summary::{aggregate_summary, resolve_status};
use crate::paramspace::{expand_combos, normalize_param_space};

/// Scheduler slots granted when a request does not specify any.
pub const DEFAULT_CONCURRENCY_LIMIT: usize = 2;

#[derive(Default)]
struct StoreState {
    jobs: HashMap<String, OptimizationJob>,
    /// Job ids in creation order; drives fair dequeue across jobs.
    job_order: Vec<String>,
    /// Tasks per job, in creation order.
    tasks: HashMap<String, Vec<OptimizationTask>>,
    summaries: HashMap<String, ResultSummary>,
}

/// Single-process orchestrator backend.
pub struct InMemoryOrchestrator {
    limits: SchedulerSettings,
    state: Mutex<StoreState>,
}

impl Default for InMemoryOrchestrator {
    fn default() -> Self {
        Self::new(SchedulerSettings::default())
    }
}

impl InMemoryOrchestrator {
    /// Create a backend with the given scheduling limits.
    #[must_use]
    pub fn new(limits: SchedulerSettings) -> Self {
        Self {
            limits,
            state: Mutex::new(StoreState::default()),
        }
    }

    /// Claim the next runnable task for `owner_id`, oldest job first.
    ///
    /// Skips locked jobs and jobs already running at their concurrency
    /// limit. Returns `None` when nothing is due.
    pub async fn dequeue_next(
        &self,
        owner_id: &str,
        job_filter: Option<&str>,
    ) -> Option<OptimizationTask> {
        let mut state = self.state.lock().await;
        let StoreState {
            jobs,
            job_order,
            tasks,
            summaries,
        } = &mut *state;
        let now = Utc::now();
        let candidates: Vec<String> = match job_filter {
            Some(id) => vec![id.to_string()],
            None => job_order.clone(),
        };
        for job_id in candidates {
            let Some(job) = jobs.get_mut(&job_id) else {
                continue;
            };
            if job.owner_id != owner_id || job.locked_status.is_some() {
                continue;
            }
            let Some(job_tasks) = tasks.get_mut(&job_id) else {
                continue;
            };
            activate_slots(job, job_tasks, now);
            let running = job_tasks
                .iter()
                .filter(|t| t.status == JobStatus::Running)
                .count();
            if running >= job.concurrency_limit {
                continue;
            }
            let Some(task) = job_tasks
                .iter_mut()
                .find(|t| t.status == JobStatus::Queued && !t.throttled && t.next_run_at <= now)
            else {
                continue;
            };
            task.status = JobStatus::Running;
            task.progress = Some(0.0);
            task.updated_at = now;
            task.last_error = None;
            let claimed = task.clone();
            refresh_job(&self.limits, job, job_tasks, summaries, now);
            return Some(claimed);
        }
        None
    }

    /// Record a successful task run.
    ///
    /// No-op (returning the task as-is) once the job is locked.
    pub async fn mark_task_succeeded(
        &self,
        job_id: &str,
        task_id: &str,
        score: Option<f64>,
        result_summary_id: Option<String>,
    ) -> Result<OptimizationTask, OrchestratorError> {
        let mut state = self.state.lock().await;
        let StoreState {
            jobs,
            tasks,
            summaries,
            ..
        } = &mut *state;
        let job = jobs
            .get_mut(job_id)
            .ok_or_else(|| job_not_found(job_id))?;
        let job_tasks = tasks
            .get_mut(job_id)
            .ok_or_else(|| task_not_found(job_id, task_id))?;
        let Some(task) = job_tasks.iter_mut().find(|t| t.id == task_id) else {
            return Err(task_not_found(job_id, task_id));
        };
        if job.locked_status.is_some() {
            return Ok(task.clone());
        }
        let now = Utc::now();
        task.status = JobStatus::Succeeded;
        if let Some(score) = score {
            task.score = Some(score);
        }
        task.result_summary_id = result_summary_id;
        task.throttled = false;
        task.progress = Some(1.0);
        task.updated_at = now;
        task.next_run_at = now;
        task.last_error = None;
        ensure_result_summary(summaries, task, now);
        let updated = task.clone();
        activate_slots(job, job_tasks, now);
        refresh_job(&self.limits, job, job_tasks, summaries, now);
        maybe_trigger_early_stop(&self.limits, job, job_tasks, summaries, now);
        Ok(updated)
    }

    /// Record a failed task run.
    ///
    /// Retryable failures below the retry budget go back to the queue with
    /// an exponential backoff; everything else fails the task. No-op once
    /// the job is locked.
    pub async fn mark_task_failed(
        &self,
        job_id: &str,
        task_id: &str,
        code: TaskErrorCode,
        message: String,
    ) -> Result<OptimizationTask, OrchestratorError> {
        let mut state = self.state.lock().await;
        let StoreState {
            jobs,
            tasks,
            summaries,
            ..
        } = &mut *state;
        let job = jobs
            .get_mut(job_id)
            .ok_or_else(|| job_not_found(job_id))?;
        let job_tasks = tasks
            .get_mut(job_id)
            .ok_or_else(|| task_not_found(job_id, task_id))?;
        let Some(task) = job_tasks.iter_mut().find(|t| t.id == task_id) else {
            return Err(task_not_found(job_id, task_id));
        };
        if job.locked_status.is_some() {
            return Ok(task.clone());
        }
        let now = Utc::now();
        task.updated_at = now;
        task.last_error = Some(TaskError {
            code,
            message,
        });
        if task.status == JobStatus::Running {
            task.status = JobStatus::Queued;
        }
        if code.is_retryable() && task.retries < self.limits.max_retries {
            task.retries += 1;
            let delay = self.limits.retry_base * 2u32.saturating_pow(task.retries - 1);
            task.next_run_at = now + chrono::Duration::from_std(delay).unwrap_or_default();
            task.throttled = false;
            task.progress = None;
        } else {
            task.status = JobStatus::Failed;
            task.throttled = false;
            task.next_run_at = now;
        }
        let updated = task.clone();
        activate_slots(job, job_tasks, now);
        refresh_job(&self.limits, job, job_tasks, summaries, now);
        Ok(updated)
    }

    /// Current task set of a job, in creation order.
    pub async fn job_tasks(&self, job_id: &str) -> Vec<OptimizationTask> {
        let state = self.state.lock().await;
        state.tasks.get(job_id).cloned().unwrap_or_default()
    }
}

#[async_trait]
impl Orchestrator for InMemoryOrchestrator {
    async fn create_job(
        &self,
        request: CreateJobRequest,
    ) -> Result<CreateJobResponse, OrchestratorError> {
        let CreateJobRequest {
            owner_id,
            version_id,
            param_space,
            concurrency_limit,
            early_stop_policy,
            estimate,
            source_job_id,
        } = request;

        let normalized = normalize_param_space(&param_space, self.limits.param_space_max)?;
        let computed_estimate = normalized.estimate();
        if computed_estimate > self.limits.param_space_max {
            return Err(OrchestratorError::param_invalid("param space too large")
                .with_details(json!({
                    "limit": self.limits.param_space_max,
                    "estimate": computed_estimate,
                })));
        }
        let concurrency_limit = validate_concurrency(
            concurrency_limit.unwrap_or(DEFAULT_CONCURRENCY_LIMIT as i64),
            self.limits.concurrency_limit_max,
        )?;

        let now = Utc::now();
        let job_id = Uuid::new_v4().to_string();
        let expansion = expand_combos(&normalized, self.limits.task_cap);
        if expansion.truncated {
            tracing::warn!(
                job_id = %job_id,
                estimate = computed_estimate,
                cap = self.limits.task_cap,
                "parameter space truncated to the task cap"
            );
        }
        let tasks: Vec<OptimizationTask> = expansion
            .combos
            .into_iter()
            .enumerate()
            .map(|(index, params)| {
                OptimizationTask::queued(
                    Uuid::new_v4().to_string(),
                    job_id.clone(),
                    owner_id.clone(),
                    version_id.clone(),
                    params,
                    index >= concurrency_limit,
                    now,
                )
            })
            .collect();
        let total_tasks = tasks.len();
        let throttled = tasks.iter().filter(|t| t.throttled).count();

        let job = OptimizationJob {
            id: job_id.clone(),
            owner_id: owner_id.clone(),
            version_id,
            param_space,
            concurrency_limit,
            early_stop_policy,
            status: JobStatus::Queued,
            total_tasks,
            estimate: estimate.filter(|&e| e > 0).unwrap_or(computed_estimate),
            summary: JobSummary::initial(total_tasks, throttled),
            locked_status: None,
            stop_reason: None,
            source_job_id: source_job_id.clone(),
            created_at: now,
            updated_at: now,
        };
        {
            let mut state = self.state.lock().await;
            state.job_order.push(job_id.clone());
            state.tasks.insert(job_id.clone(), tasks);
            state.jobs.insert(job_id.clone(), job);
        }

        if throttled > 0 {
            observability::record_throttled_requests(&owner_id, throttled as u64);
        }
        tracing::info!(
            job_id = %job_id,
            owner_id = %owner_id,
            total_tasks,
            throttled,
            "optimization job created"
        );
        Ok(CreateJobResponse {
            id: job_id,
            status: JobStatus::Queued,
            throttled: throttled > 0,
            total_tasks,
            source_job_id,
        })
    }

    async fn job_status(
        &self,
        owner_id: &str,
        job_id: &str,
    ) -> Result<JobStatusPayload, OrchestratorError> {
        let mut state = self.state.lock().await;
        let StoreState {
            jobs,
            tasks,
            summaries,
            ..
        } = &mut *state;
        let job = jobs
            .get_mut(job_id)
            .ok_or_else(|| job_not_found(job_id))?;
        check_owner(job, owner_id)?;
        let job_tasks = tasks.get(job_id).map_or(&[][..], Vec::as_slice);
        refresh_job(&self.limits, job, job_tasks, summaries, Utc::now());
        Ok(JobStatusPayload::from_job(job))
    }

    async fn job_snapshot(
        &self,
        owner_id: &str,
        job_id: &str,
    ) -> Result<JobSnapshot, OrchestratorError> {
        let mut state = self.state.lock().await;
        let StoreState {
            jobs,
            tasks,
            summaries,
            ..
        } = &mut *state;
        let job = jobs
            .get_mut(job_id)
            .ok_or_else(|| job_not_found(job_id))?;
        check_owner(job, owner_id)?;
        let job_tasks = tasks.get(job_id).map_or(&[][..], Vec::as_slice);
        refresh_job(&self.limits, job, job_tasks, summaries, Utc::now());
        Ok(JobSnapshot::from_job(job))
    }

    async fn cancel_job(
        &self,
        owner_id: &str,
        job_id: &str,
        reason: Option<String>,
    ) -> Result<JobStatusPayload, OrchestratorError> {
        let mut state = self.state.lock().await;
        let StoreState {
            jobs,
            tasks,
            summaries,
            ..
        } = &mut *state;
        let job = jobs
            .get_mut(job_id)
            .ok_or_else(|| job_not_found(job_id))?;
        check_owner(job, owner_id)?;
        // Terminal jobs keep their final state; a repeat cancel just
        // returns it.
        if job.status.is_terminal() {
            return Ok(JobStatusPayload::from_job(job));
        }
        let job_tasks = tasks.entry(job_id.to_string()).or_default();
        let reason = StopReason::Canceled {
            reason: reason.filter(|r| !r.is_empty()),
        };
        lock_job(
            &self.limits,
            job,
            job_tasks,
            summaries,
            JobStatus::Canceled,
            Some(reason),
            Utc::now(),
        );
        Ok(JobStatusPayload::from_job(job))
    }

    async fn export_bundle(
        &self,
        owner_id: &str,
        job_id: &str,
    ) -> Result<ExportBundle, OrchestratorError> {
        let mut state = self.state.lock().await;
        let StoreState {
            jobs,
            tasks,
            summaries,
            ..
        } = &mut *state;
        let job = jobs
            .get_mut(job_id)
            .ok_or_else(|| job_not_found(job_id))?;
        check_owner(job, owner_id)?;
        let now = Utc::now();
        let job_tasks = tasks.get(job_id).map_or(&[][..], Vec::as_slice);
        refresh_job(&self.limits, job, job_tasks, summaries, now);

        let mut items = Vec::with_capacity(job.summary.top_n.len());
        for entry in &job.summary.top_n {
            let task = job_tasks.iter().find(|t| t.id == entry.task_id);
            let summary_doc = task.and_then(|t| ensure_result_summary(summaries, t, now));
            items.push(ExportItem {
                task_id: entry.task_id.clone(),
                score: Some(entry.score),
                params: task.map(|t| t.params.clone()).unwrap_or_default(),
                result_summary_id: entry.result_summary_id.clone(),
                metrics: summary_doc.as_ref().map(|doc| doc.metrics.clone()),
                artifacts: summary_doc.map(|doc| doc.artifacts),
            });
        }
        Ok(ExportBundle {
            job_id: job.id.clone(),
            status: job.status,
            generated_at: now,
            summary: job.summary.clone(),
            items,
        })
    }

    async fn history(
        &self,
        owner_id: &str,
        limit: usize,
    ) -> Result<Vec<JobSnapshot>, OrchestratorError> {
        let mut state = self.state.lock().await;
        let StoreState {
            jobs,
            job_order,
            tasks,
            summaries,
        } = &mut *state;
        let now = Utc::now();
        let mut snapshots: Vec<JobSnapshot> = job_order
            .iter()
            .filter_map(|id| {
                let job = jobs.get_mut(id)?;
                if job.owner_id != owner_id {
                    return None;
                }
                let job_tasks = tasks.get(id).map_or(&[][..], Vec::as_slice);
                refresh_job(&self.limits, job, job_tasks, summaries, now);
                Some(JobSnapshot::from_job(job))
            })
            .collect();
        snapshots.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        snapshots.truncate(limit);
        Ok(snapshots)
    }
}

/// Validate a requested concurrency limit against the configured maximum.
fn validate_concurrency(requested: i64, max: usize) -> Result<usize, OrchestratorError> {
    if requested <= 0 {
        return Err(
            OrchestratorError::param_invalid("concurrency limit must be positive")
                .with_details(json!({ "concurrency": requested })),
        );
    }
    let requested = usize::try_from(requested).unwrap_or(usize::MAX);
    if requested > max {
        return Err(
            OrchestratorError::param_invalid("concurrency limit exceeds maximum")
                .with_details(json!({ "limit": max, "requested": requested })),
        );
    }
    Ok(requested)
}

fn job_not_found(job_id: &str) -> OrchestratorError {
    OrchestratorError::not_found("optimization job not found")
        .with_details(json!({ "jobId": job_id }))
}

fn task_not_found(job_id: &str, task_id: &str) -> OrchestratorError {
    OrchestratorError::not_found("task not found")
        .with_details(json!({ "jobId": job_id, "taskId": task_id }))
}

fn check_owner(job: &OptimizationJob, owner_id: &str) -> Result<(), OrchestratorError> {
    if job.owner_id == owner_id {
        return Ok(());
    }
    Err(
        OrchestratorError::forbidden("job does not belong to current owner")
            .with_details(json!({ "jobId": job.id, "ownerId": owner_id })),
    )
}

/// Re-admit throttled tasks while the job has spare capacity.
///
/// Capacity counts running tasks plus queued tasks that are already due;
/// retry-delayed tasks do not hold a slot, so a long backoff lets the next
/// throttled combination advance.
fn activate_slots(job: &OptimizationJob, tasks: &mut [OptimizationTask], now: DateTime<Utc>) {
    let running = tasks
        .iter()
        .filter(|t| t.status == JobStatus::Running)
        .count();
    let ready = tasks
        .iter()
        .filter(|t| t.status == JobStatus::Queued && !t.throttled && t.next_run_at <= now)
        .count();
    let mut capacity = job.concurrency_limit.saturating_sub(running + ready);
    if capacity == 0 {
        return;
    }
    for task in tasks.iter_mut() {
        if capacity == 0 {
            break;
        }
        if task.status == JobStatus::Queued && task.throttled {
            task.throttled = false;
            task.next_run_at = task.next_run_at.min(now);
            task.updated_at = now;
            capacity -= 1;
        }
    }
}

/// Recompute a job's summary and status; bumps `updated_at` on change.
fn refresh_job(
    limits: &SchedulerSettings,
    job: &mut OptimizationJob,
    tasks: &[OptimizationTask],
    summaries: &HashMap<String, ResultSummary>,
    now: DateTime<Utc>,
) {
    let summary = aggregate_summary(
        tasks,
        job.early_stop_policy.as_ref(),
        limits.top_n_limit,
        summaries,
    );
    let status = resolve_status(tasks, &summary, job.locked_status);
    let changed = summary != job.summary || status != job.status;
    job.summary = summary;
    job.status = status;
    if changed {
        job.updated_at = now;
    }
}

/// Get or create the result summary backing a task, syncing its score metric.
fn ensure_result_summary(
    summaries: &mut HashMap<String, ResultSummary>,
    task: &OptimizationTask,
    now: DateTime<Utc>,
) -> Option<ResultSummary> {
    let result_id = task.result_summary_id.as_ref()?;
    let doc = summaries
        .entry(result_id.clone())
        .or_insert_with(|| ResultSummary {
            id: result_id.clone(),
            owner_id: task.owner_id.clone(),
            metrics: HashMap::new(),
            artifacts: build_artifacts(result_id),
            created_at: now,
            equity_curve_ref: format!("/artifacts/{result_id}/equity.csv"),
            trades_ref: format!("/artifacts/{result_id}/trades.csv"),
        });
    if let Some(score) = task.score {
        doc.metrics.insert("score".to_string(), score);
    }
    Some(doc.clone())
}

fn build_artifacts(result_id: &str) -> Vec<ResultArtifact> {
    vec![
        ResultArtifact {
            kind: "metrics".into(),
            url: format!("/artifacts/{result_id}/metrics.json"),
        },
        ResultArtifact {
            kind: "equity".into(),
            url: format!("/artifacts/{result_id}/equity.csv"),
        },
        ResultArtifact {
            kind: "trades".into(),
            url: format!("/artifacts/{result_id}/trades.csv"),
        },
    ]
}

/// Trip the early-stop lock when the leaderboard crosses the threshold.
fn maybe_trigger_early_stop(
    limits: &SchedulerSettings,
    job: &mut OptimizationJob,
    tasks: &mut [OptimizationTask],
    summaries: &HashMap<String, ResultSummary>,
    now: DateTime<Utc>,
) {
    if job.locked_status.is_some() {
        return;
    }
    let Some(policy) = job.early_stop_policy.clone() else {
        return;
    };
    let Some(best) = policy.best_of(job.summary.top_n.iter().map(|e| e.score)) else {
        return;
    };
    if !policy.breached_by(best) {
        return;
    }
    let reason = StopReason::EarlyStopThreshold {
        metric: policy.metric.clone(),
        threshold: policy.threshold,
        score: best,
        mode: policy.mode,
    };
    lock_job(
        limits,
        job,
        tasks,
        summaries,
        JobStatus::EarlyStopped,
        Some(reason),
        now,
    );
}

/// Force a job into a terminal state and abandon its unfinished tasks.
fn lock_job(
    limits: &SchedulerSettings,
    job: &mut OptimizationJob,
    tasks: &mut [OptimizationTask],
    summaries: &HashMap<String, ResultSummary>,
    status: JobStatus,
    reason: Option<StopReason>,
    now: DateTime<Utc>,
) {
    if job.locked_status == Some(status) {
        return;
    }
    job.locked_status = Some(status);
    job.stop_reason = reason;
    job.status = status;
    job.updated_at = now;
    for task in tasks.iter_mut() {
        if !task.status.is_terminal() {
            task.status = status;
            task.progress = Some(1.0);
            task.throttled = false;
            task.next_run_at = now;
            task.updated_at = now;
            task.last_error = None;
        }
    }
    let stop_kind = job.stop_reason.as_ref().map_or("unknown", StopReason::kind);
    observability::record_job_stop(&job.owner_id, status.as_str(), stop_kind);
    if let Some(StopReason::EarlyStopThreshold {
        metric,
        threshold,
        score,
        ..
    }) = &job.stop_reason
    {
        observability::record_stop_threshold(&job.owner_id, metric, *threshold, *score);
    }
    tracing::info!(
        job_id = %job.id,
        owner_id = %job.owner_id,
        status = %status,
        stop_kind,
        "optimization job stopped"
    );
    refresh_job(limits, job, tasks, summaries, now);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use crate::jobs::EarlyStopPolicy;
    use serde_json::Value;
    use std::time::Duration;

    fn settings() -> SchedulerSettings {
        SchedulerSettings {
            retry_base: Duration::ZERO,
            ..SchedulerSettings::default()
        }
    }

    fn space(value: Value) -> serde_json::Map<String, Value> {
        value.as_object().cloned().unwrap_or_default()
    }

    fn request(owner: &str, param_space: Value) -> CreateJobRequest {
        CreateJobRequest {
            owner_id: owner.to_string(),
            version_id: "v-1".to_string(),
            param_space: space(param_space),
            concurrency_limit: Some(2),
            early_stop_policy: None,
            estimate: None,
            source_job_id: None,
        }
    }

    #[tokio::test]
    async fn create_expands_tasks_and_throttles_beyond_limit() {
        let orchestrator = InMemoryOrchestrator::new(settings());
        let created = orchestrator
            .create_job(request("owner-1", serde_json::json!({"a": [1, 2, 3], "b": [4, 5]})))
            .await
            .unwrap();
        assert_eq!(created.status, JobStatus::Queued);
        assert_eq!(created.total_tasks, 6);
        assert!(created.throttled);

        let status = orchestrator
            .job_status("owner-1", &created.id)
            .await
            .unwrap();
        assert_eq!(status.summary.total, 6);
        assert_eq!(status.summary.throttled, 4);
        assert_eq!(status.diagnostics.queue_depth, 4);
        assert!(!status.diagnostics.is_final);
    }

    #[tokio::test]
    async fn create_rejects_oversized_space_with_details() {
        let orchestrator = InMemoryOrchestrator::new(SchedulerSettings {
            param_space_max: 3,
            ..settings()
        });
        let err = orchestrator
            .create_job(request("owner-1", serde_json::json!({"p1": [1, 2], "p2": [3, 4]})))
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::ParamInvalid);
        assert_eq!(err.message(), "param space too large");
        assert_eq!(
            err.details(),
            Some(&serde_json::json!({"limit": 3, "estimate": 4}))
        );
    }

    #[tokio::test]
    async fn create_validates_concurrency_bounds() {
        let orchestrator = InMemoryOrchestrator::new(settings());
        let mut bad = request("owner-1", serde_json::json!({"a": [1, 2]}));
        bad.concurrency_limit = Some(0);
        let err = orchestrator.create_job(bad).await.unwrap_err();
        assert_eq!(err.message(), "concurrency limit must be positive");

        let mut over = request("owner-1", serde_json::json!({"a": [1, 2]}));
        over.concurrency_limit = Some(17);
        let err = orchestrator.create_job(over).await.unwrap_err();
        assert_eq!(err.message(), "concurrency limit exceeds maximum");
        assert_eq!(
            err.details(),
            Some(&serde_json::json!({"limit": 16, "requested": 17}))
        );
    }

    #[tokio::test]
    async fn missing_concurrency_defaults_to_two() {
        let orchestrator = InMemoryOrchestrator::new(settings());
        let mut req = request("owner-1", serde_json::json!({"a": [1, 2, 3]}));
        req.concurrency_limit = None;
        let created = orchestrator.create_job(req).await.unwrap();
        let status = orchestrator
            .job_status("owner-1", &created.id)
            .await
            .unwrap();
        assert_eq!(status.concurrency_limit, 2);
        assert_eq!(status.summary.throttled, 1);
    }

    #[tokio::test]
    async fn dequeue_claims_tasks_up_to_the_limit() {
        let orchestrator = InMemoryOrchestrator::new(settings());
        let mut req = request("owner-1", serde_json::json!({"a": [1, 2, 3]}));
        req.concurrency_limit = Some(1);
        let created = orchestrator.create_job(req).await.unwrap();

        let first = orchestrator.dequeue_next("owner-1", None).await.unwrap();
        assert_eq!(first.status, JobStatus::Running);
        assert_eq!(first.progress, Some(0.0));
        assert!(orchestrator.dequeue_next("owner-1", None).await.is_none());

        let status = orchestrator
            .job_status("owner-1", &created.id)
            .await
            .unwrap();
        assert_eq!(status.status, JobStatus::Running);
        assert_eq!(status.summary.running, 1);
    }

    #[tokio::test]
    async fn dequeue_ignores_other_owners_jobs() {
        let orchestrator = InMemoryOrchestrator::new(settings());
        orchestrator
            .create_job(request("owner-1", serde_json::json!({"a": [1, 2]})))
            .await
            .unwrap();
        assert!(orchestrator.dequeue_next("owner-2", None).await.is_none());
    }

    #[tokio::test]
    async fn throttled_count_shrinks_as_tasks_finish() {
        let orchestrator = InMemoryOrchestrator::new(settings());
        let mut req = request("owner-1", serde_json::json!({"a": [1, 2, 3, 4]}));
        req.concurrency_limit = Some(1);
        let created = orchestrator.create_job(req).await.unwrap();
        let status = orchestrator
            .job_status("owner-1", &created.id)
            .await
            .unwrap();
        assert_eq!(status.summary.throttled, 3);

        let first = orchestrator.dequeue_next("owner-1", None).await.unwrap();
        orchestrator
            .mark_task_succeeded(&created.id, &first.id, Some(1.0), None)
            .await
            .unwrap();

        let status = orchestrator
            .job_status("owner-1", &created.id)
            .await
            .unwrap();
        assert_eq!(status.summary.finished, 1);
        assert_eq!(status.summary.throttled, 2);
        // The freed slot lets the next combination run.
        let second = orchestrator.dequeue_next("owner-1", None).await.unwrap();
        assert_ne!(second.id, first.id);
    }

    #[tokio::test]
    async fn retryable_failure_requeues_with_backoff() {
        let orchestrator = InMemoryOrchestrator::new(SchedulerSettings {
            retry_base: Duration::from_secs(2),
            ..SchedulerSettings::default()
        });
        let created = orchestrator
            .create_job(request("owner-1", serde_json::json!({"a": [1, 2]})))
            .await
            .unwrap();
        let claimed = orchestrator.dequeue_next("owner-1", None).await.unwrap();
        let failed = orchestrator
            .mark_task_failed(
                &created.id,
                &claimed.id,
                TaskErrorCode::UpstreamError,
                "data feed flaked".to_string(),
            )
            .await
            .unwrap();
        assert_eq!(failed.status, JobStatus::Queued);
        assert_eq!(failed.retries, 1);
        assert!(failed.next_run_at > failed.updated_at + chrono::Duration::seconds(1));
        assert_eq!(
            failed.last_error.as_ref().map(|e| e.code),
            Some(TaskErrorCode::UpstreamError)
        );
    }

    #[tokio::test]
    async fn backoff_doubles_on_consecutive_failures() {
        let orchestrator = InMemoryOrchestrator::new(SchedulerSettings {
            retry_base: Duration::from_secs(2),
            ..SchedulerSettings::default()
        });
        let created = orchestrator
            .create_job(request("owner-1", serde_json::json!({"a": [1]})))
            .await
            .unwrap();
        let task_id = orchestrator.job_tasks(&created.id).await[0].id.clone();
        orchestrator
            .mark_task_failed(
                &created.id,
                &task_id,
                TaskErrorCode::InternalError,
                "boom".to_string(),
            )
            .await
            .unwrap();
        let second = orchestrator
            .mark_task_failed(
                &created.id,
                &task_id,
                TaskErrorCode::InternalError,
                "boom".to_string(),
            )
            .await
            .unwrap();
        assert_eq!(second.retries, 2);
        let delay = second.next_run_at - second.updated_at;
        assert!(delay > chrono::Duration::seconds(3));
        assert!(delay < chrono::Duration::seconds(5));
    }

    #[tokio::test]
    async fn param_failure_is_terminal_without_retry() {
        let orchestrator = InMemoryOrchestrator::new(settings());
        let created = orchestrator
            .create_job(request("owner-1", serde_json::json!({"a": [1]})))
            .await
            .unwrap();
        let claimed = orchestrator.dequeue_next("owner-1", None).await.unwrap();
        let failed = orchestrator
            .mark_task_failed(
                &created.id,
                &claimed.id,
                TaskErrorCode::ParamError,
                "window too small".to_string(),
            )
            .await
            .unwrap();
        assert_eq!(failed.status, JobStatus::Failed);
        assert_eq!(failed.retries, 0);

        let status = orchestrator
            .job_status("owner-1", &created.id)
            .await
            .unwrap();
        assert_eq!(status.status, JobStatus::Failed);
        assert!(status.diagnostics.is_final);
    }

    #[tokio::test]
    async fn exhausted_retries_fail_the_task() {
        let orchestrator = InMemoryOrchestrator::new(SchedulerSettings {
            max_retries: 1,
            ..settings()
        });
        let created = orchestrator
            .create_job(request("owner-1", serde_json::json!({"a": [1]})))
            .await
            .unwrap();
        let task_id = orchestrator.job_tasks(&created.id).await[0].id.clone();
        let first = orchestrator
            .mark_task_failed(
                &created.id,
                &task_id,
                TaskErrorCode::UpstreamError,
                "flake".to_string(),
            )
            .await
            .unwrap();
        assert_eq!(first.status, JobStatus::Queued);
        let second = orchestrator
            .mark_task_failed(
                &created.id,
                &task_id,
                TaskErrorCode::UpstreamError,
                "flake again".to_string(),
            )
            .await
            .unwrap();
        assert_eq!(second.status, JobStatus::Failed);
        assert_eq!(second.retries, 1);
    }

    #[tokio::test]
    async fn early_stop_locks_job_and_abandons_remaining_tasks() {
        let orchestrator = InMemoryOrchestrator::new(settings());
        let mut req = request("owner-1", serde_json::json!({"a": [1, 2, 3]}));
        req.early_stop_policy = Some(EarlyStopPolicy {
            metric: "drawdown".to_string(),
            threshold: 0.6,
            mode: crate::jobs::EarlyStopMode::Min,
        });
        let created = orchestrator.create_job(req).await.unwrap();
        let claimed = orchestrator.dequeue_next("owner-1", None).await.unwrap();
        orchestrator
            .mark_task_succeeded(&created.id, &claimed.id, Some(0.45), None)
            .await
            .unwrap();

        let status = orchestrator
            .job_status("owner-1", &created.id)
            .await
            .unwrap();
        assert_eq!(status.status, JobStatus::EarlyStopped);
        assert!(status.diagnostics.is_final);
        assert!(!status.diagnostics.throttled);
        match status.diagnostics.stop_reason {
            Some(StopReason::EarlyStopThreshold {
                ref metric,
                threshold,
                score,
                ..
            }) => {
                assert_eq!(metric, "drawdown");
                assert!((threshold - 0.6).abs() < f64::EPSILON);
                assert!((score - 0.45).abs() < f64::EPSILON);
            }
            ref other => panic!("unexpected stop reason: {other:?}"),
        }
        let tasks = orchestrator.job_tasks(&created.id).await;
        assert!(tasks.iter().all(|t| t.status.is_terminal()));
        assert!(orchestrator.dequeue_next("owner-1", None).await.is_none());
    }

    #[tokio::test]
    async fn cancel_locks_job_with_reason() {
        let orchestrator = InMemoryOrchestrator::new(settings());
        let created = orchestrator
            .create_job(request("owner-1", serde_json::json!({"a": [1, 2, 3]})))
            .await
            .unwrap();
        let canceled = orchestrator
            .cancel_job("owner-1", &created.id, Some("manual".to_string()))
            .await
            .unwrap();
        assert_eq!(canceled.status, JobStatus::Canceled);
        assert!(canceled.diagnostics.is_final);
        assert!(!canceled.diagnostics.throttled);
        assert_eq!(
            canceled.diagnostics.stop_reason,
            Some(StopReason::Canceled {
                reason: Some("manual".to_string())
            })
        );
    }

    #[tokio::test]
    async fn cancel_is_a_noop_on_terminal_jobs() {
        let orchestrator = InMemoryOrchestrator::new(settings());
        let created = orchestrator
            .create_job(request("owner-1", serde_json::json!({"a": [1]})))
            .await
            .unwrap();
        let task_id = orchestrator.job_tasks(&created.id).await[0].id.clone();
        orchestrator
            .mark_task_succeeded(&created.id, &task_id, Some(1.0), None)
            .await
            .unwrap();

        let after_cancel = orchestrator
            .cancel_job("owner-1", &created.id, Some("late".to_string()))
            .await
            .unwrap();
        assert_eq!(after_cancel.status, JobStatus::Succeeded);
        assert!(after_cancel.diagnostics.stop_reason.is_none());
    }

    #[tokio::test]
    async fn repeated_cancel_keeps_the_original_reason() {
        let orchestrator = InMemoryOrchestrator::new(settings());
        let created = orchestrator
            .create_job(request("owner-1", serde_json::json!({"a": [1, 2]})))
            .await
            .unwrap();
        orchestrator
            .cancel_job("owner-1", &created.id, Some("first".to_string()))
            .await
            .unwrap();
        let second = orchestrator
            .cancel_job("owner-1", &created.id, Some("second".to_string()))
            .await
            .unwrap();
        assert_eq!(
            second.diagnostics.stop_reason,
            Some(StopReason::Canceled {
                reason: Some("first".to_string())
            })
        );
    }

    #[tokio::test]
    async fn locked_job_ignores_late_task_results() {
        let orchestrator = InMemoryOrchestrator::new(settings());
        let created = orchestrator
            .create_job(request("owner-1", serde_json::json!({"a": [1, 2]})))
            .await
            .unwrap();
        let claimed = orchestrator.dequeue_next("owner-1", None).await.unwrap();
        orchestrator
            .cancel_job("owner-1", &created.id, None)
            .await
            .unwrap();

        let late = orchestrator
            .mark_task_succeeded(&created.id, &claimed.id, Some(9.9), None)
            .await
            .unwrap();
        assert_eq!(late.status, JobStatus::Canceled);
        assert_eq!(late.score, None);

        let status = orchestrator
            .job_status("owner-1", &created.id)
            .await
            .unwrap();
        assert_eq!(status.status, JobStatus::Canceled);
        assert!(status.summary.top_n.is_empty());
    }

    #[tokio::test]
    async fn foreign_owner_is_forbidden() {
        let orchestrator = InMemoryOrchestrator::new(settings());
        let created = orchestrator
            .create_job(request("owner-1", serde_json::json!({"a": [1]})))
            .await
            .unwrap();
        let err = orchestrator
            .job_status("owner-2", &created.id)
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::Forbidden);
        assert_eq!(
            err.details(),
            Some(&serde_json::json!({"jobId": created.id, "ownerId": "owner-2"}))
        );
    }

    #[tokio::test]
    async fn unknown_job_is_not_found() {
        let orchestrator = InMemoryOrchestrator::new(settings());
        let err = orchestrator
            .job_status("owner-1", "missing-job")
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::NotFound);
        assert_eq!(err.message(), "optimization job not found");
    }

    #[tokio::test]
    async fn export_projects_leaderboard_with_artifacts() {
        let orchestrator = InMemoryOrchestrator::new(settings());
        let created = orchestrator
            .create_job(request("owner-1", serde_json::json!({"a": [1, 2]})))
            .await
            .unwrap();
        let tasks = orchestrator.job_tasks(&created.id).await;
        orchestrator
            .mark_task_succeeded(
                &created.id,
                &tasks[0].id,
                Some(1.0),
                Some("summary-0".to_string()),
            )
            .await
            .unwrap();
        orchestrator
            .mark_task_succeeded(
                &created.id,
                &tasks[1].id,
                Some(0.9),
                Some("summary-1".to_string()),
            )
            .await
            .unwrap();

        let bundle = orchestrator
            .export_bundle("owner-1", &created.id)
            .await
            .unwrap();
        assert_eq!(bundle.status, JobStatus::Succeeded);
        assert_eq!(bundle.items.len(), 2);
        let top = &bundle.items[0];
        assert_eq!(top.score, Some(1.0));
        assert!(!top.params.is_empty());
        assert_eq!(top.result_summary_id.as_deref(), Some("summary-0"));
        let artifacts = top.artifacts.as_ref().unwrap();
        assert_eq!(artifacts[0].kind, "metrics");
        assert_eq!(
            top.metrics.as_ref().and_then(|m| m.get("score")),
            Some(&1.0)
        );
    }

    #[tokio::test]
    async fn history_returns_newest_updated_first() {
        let orchestrator = InMemoryOrchestrator::new(settings());
        let first = orchestrator
            .create_job(request("owner-1", serde_json::json!({"a": [1, 2]})))
            .await
            .unwrap();
        let mut rerun = request("owner-1", serde_json::json!({"a": [1, 2]}));
        rerun.source_job_id = Some(first.id.clone());
        let second = orchestrator.create_job(rerun).await.unwrap();
        let task_id = orchestrator.job_tasks(&second.id).await[0].id.clone();
        orchestrator
            .mark_task_succeeded(&second.id, &task_id, Some(1.1), None)
            .await
            .unwrap();

        let jobs = orchestrator.history("owner-1", 1).await.unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].id, second.id);
        assert_eq!(jobs[0].source_job_id.as_deref(), Some(first.id.as_str()));
        assert!(jobs[0].summary.finished >= 1);

        let all = orchestrator.history("owner-1", 10).await.unwrap();
        assert_eq!(all.len(), 2);
        assert!(orchestrator.history("owner-2", 10).await.unwrap().is_empty());
    }
}
