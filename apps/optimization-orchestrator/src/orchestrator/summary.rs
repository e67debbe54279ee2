//! Job summary aggregation.
//!
//! Recomputes the counters and top-N leaderboard a job reports after every
//! task transition. Sorting follows the early-stop mode when one is set and
//! defaults to descending scores otherwise.

use std::collections::HashMap;

use crate::jobs::{
    EarlyStopMode, EarlyStopPolicy, JobStatus, JobSummary, OptimizationTask, ResultSummary,
    TopNEntry,
};

/// Aggregate task counters and the score leaderboard for one job.
///
/// Tasks are ranked by their recorded score; when a task's result summary
/// carries a `score` metric, that value replaces the displayed score without
/// affecting the ranking.
pub(crate) fn aggregate_summary(
    tasks: &[OptimizationTask],
    policy: Option<&EarlyStopPolicy>,
    top_n_limit: usize,
    summaries: &HashMap<String, ResultSummary>,
) -> JobSummary {
    let total = tasks.len();
    let finished = tasks.iter().filter(|t| t.status.is_terminal()).count();
    let running = tasks
        .iter()
        .filter(|t| t.status == JobStatus::Running)
        .count();
    let throttled = tasks.iter().filter(|t| t.throttled).count();

    let ascending = policy.is_some_and(|p| p.mode == EarlyStopMode::Min);
    let mut scored: Vec<(&OptimizationTask, f64)> = tasks
        .iter()
        .filter_map(|t| t.score.map(|score| (t, score)))
        .collect();
    scored.sort_by(|a, b| {
        if ascending {
            a.1.total_cmp(&b.1)
        } else {
            b.1.total_cmp(&a.1)
        }
    });

    let top_n = scored
        .into_iter()
        .take(top_n_limit)
        .map(|(task, score)| {
            let reported = task
                .result_summary_id
                .as_ref()
                .and_then(|id| summaries.get(id))
                .and_then(|doc| doc.metrics.get("score").copied())
                .unwrap_or(score);
            TopNEntry {
                task_id: task.id.clone(),
                score: reported,
                result_summary_id: task.result_summary_id.clone(),
            }
        })
        .collect();

    JobSummary {
        total,
        finished,
        running,
        throttled,
        top_n,
    }
}

/// Resolve the job status implied by its tasks.
///
/// A locked status always wins; otherwise a fully finished task set resolves
/// to succeeded or failed, any running task keeps the job running, and an
/// idle task set leaves it queued.
pub(crate) fn resolve_status(
    tasks: &[OptimizationTask],
    summary: &JobSummary,
    locked_status: Option<JobStatus>,
) -> JobStatus {
    if let Some(locked) = locked_status {
        return locked;
    }
    if summary.total > 0 && summary.finished >= summary.total {
        if tasks.iter().any(|t| t.status == JobStatus::Failed) {
            return JobStatus::Failed;
        }
        return JobStatus::Succeeded;
    }
    if summary.running > 0 {
        return JobStatus::Running;
    }
    JobStatus::Queued
}
