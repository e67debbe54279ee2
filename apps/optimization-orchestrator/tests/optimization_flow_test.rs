//! Optimization Lifecycle Integration Tests
//!
//! Drives the public HTTP API against the in-memory engine the way a local
//! deployment wires it, with the internal router merged alongside:
//!
//! - Full sweep: submit, drain with a worker, poll status, export the
//!   leaderboard bundle
//! - Early stop: a crossing score locks the job and abandons the remainder
//! - Cancel and rerun: the rerun links back to its source job and shows up
//!   first in history
//! - Merged deployment: jobs created internally are visible publicly

#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use optimization_orchestrator::config::{OrchestratorConfig, SchedulerSettings, SharedSecret};
use optimization_orchestrator::jobs::OptimizationTask;
use optimization_orchestrator::orchestrator::{
    InMemoryOrchestrator, InMemoryVersionDirectory, VersionDirectory,
};
use optimization_orchestrator::paramspace::ParamValue;
use optimization_orchestrator::server::{AppState, create_internal_router, create_public_router};
use optimization_orchestrator::worker::{RunOutcome, TaskRunner, Worker, WorkerError};
use serde_json::{Value, json};
use tower::ServiceExt;

const OWNER: &str = "owner-1";
const SECRET: &str = "s3cret";

/// Build the merged public + internal router around one shared engine.
fn deployment() -> (Router, Arc<InMemoryOrchestrator>) {
    let config = OrchestratorConfig {
        scheduler: SchedulerSettings {
            retry_base: Duration::ZERO,
            ..SchedulerSettings::default()
        },
        shared_secret: SharedSecret::new(SECRET),
        ..OrchestratorConfig::default()
    };
    let engine = Arc::new(InMemoryOrchestrator::new(config.scheduler.clone()));
    let versions: Arc<dyn VersionDirectory> = Arc::new(InMemoryVersionDirectory::permissive());
    let state = AppState::new(engine.clone(), versions, &config);
    let app = create_public_router(state.clone()).merge(create_internal_router(state));
    (app, engine)
}

fn post_json(uri: &str, owner: &str, body: &Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .header("x-owner-id", owner)
        .body(Body::from(body.to_string()))
        .expect("should build request")
}

fn post_empty(uri: &str, owner: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("x-owner-id", owner)
        .body(Body::empty())
        .expect("should build request")
}

fn get_request(uri: &str, owner: &str) -> Request<Body> {
    Request::builder()
        .method("GET")
        .uri(uri)
        .header("x-owner-id", owner)
        .body(Body::empty())
        .expect("should build request")
}

async fn call(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app
        .clone()
        .oneshot(request)
        .await
        .expect("request should succeed");
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("should read body");
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, body)
}

/// A 3x2 sweep over a moving-average window and a signal threshold.
fn sweep_body(concurrency: i64) -> Value {
    json!({
        "versionId": "sv-momentum-3",
        "paramSpace": {
            "window": [5, 10, 20],
            "threshold": {"start": 0.1, "end": 0.2, "step": 0.1}
        },
        "concurrencyLimit": concurrency
    })
}

async fn submit(app: &Router, body: &Value) -> String {
    let (status, created) = call(app, post_json("/api/v1/optimizations", OWNER, body)).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    created["id"].as_str().expect("job id").to_string()
}

fn combo_float(task: &OptimizationTask, name: &str) -> f64 {
    task.params
        .get(name)
        .and_then(ParamValue::as_float)
        .unwrap_or_default()
}

/// Scores each combination as `window - threshold` and registers a result
/// summary for it.
struct SpreadScore;

#[async_trait::async_trait]
impl TaskRunner for SpreadScore {
    async fn run(&self, task: &OptimizationTask) -> Result<RunOutcome, WorkerError> {
        let score = combo_float(task, "window") - combo_float(task, "threshold");
        Ok(RunOutcome {
            score: Some(score),
            result_summary_id: Some(format!("summary-{}", task.id)),
        })
    }
}

#[tokio::test]
async fn submitted_sweep_runs_to_completion_and_exports_a_leaderboard() {
    let (app, engine) = deployment();
    let job_id = submit(&app, &sweep_body(2)).await;

    let (status, payload) = call(
        &app,
        get_request(&format!("/api/v1/optimizations/{job_id}/status"), OWNER),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(payload["status"], "queued");
    assert_eq!(payload["summary"]["total"], 6);
    assert_eq!(payload["diagnostics"]["queueDepth"], 4);

    let worker = Arc::new(Worker::new(engine, Arc::new(SpreadScore)));
    let attempts = worker.run_job(OWNER, &job_id, 2).await.expect("drain");
    assert_eq!(attempts, 6);

    let (status, payload) = call(
        &app,
        get_request(&format!("/api/v1/optimizations/{job_id}/status"), OWNER),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(payload["status"], "succeeded");
    assert_eq!(payload["summary"]["finished"], 6);
    assert_eq!(payload["summary"]["running"], 0);
    assert_eq!(payload["diagnostics"]["final"], true);
    assert_eq!(payload["diagnostics"]["queueDepth"], 0);

    // Leaderboard keeps the five best scores, best first.
    let top_n = payload["summary"]["topN"].as_array().expect("topN");
    assert_eq!(top_n.len(), 5);
    assert_eq!(top_n[0]["score"], json!(20.0 - 0.1));
    assert_eq!(top_n[1]["score"], json!(20.0 - 0.2));

    let response = app
        .clone()
        .oneshot(post_empty(
            &format!("/api/v1/optimizations/{job_id}/export"),
            OWNER,
        ))
        .await
        .expect("request should succeed");
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()["content-type"],
        "application/json; charset=utf-8"
    );
    assert_eq!(
        response.headers()["content-disposition"],
        format!("attachment; filename=\"{job_id}-topn.json\"")
    );
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("should read body");
    let bundle: Value = serde_json::from_slice(&bytes).expect("bundle json");

    assert_eq!(bundle["jobId"].as_str(), Some(job_id.as_str()));
    assert_eq!(bundle["status"], "succeeded");
    let items = bundle["items"].as_array().expect("items");
    assert_eq!(items.len(), 5);
    assert_eq!(items[0]["score"], json!(20.0 - 0.1));
    assert_eq!(items[0]["params"]["window"], json!(20));
    assert_eq!(items[0]["params"]["threshold"], json!(0.1));
    assert_eq!(items[0]["metrics"]["score"], json!(20.0 - 0.1));
    assert_eq!(items[0]["artifacts"][0]["type"], "metrics");
}

#[tokio::test]
async fn crossing_score_early_stops_the_sweep() {
    let (app, engine) = deployment();
    let body = json!({
        "versionId": "sv-momentum-3",
        "paramSpace": {"window": [5, 10, 20, 40]},
        "concurrencyLimit": 1,
        "earlyStopPolicy": {"metric": "sharpe", "threshold": 2.0, "mode": "max"}
    });
    let job_id = submit(&app, &body).await;

    let first = engine.dequeue_next(OWNER, Some(&job_id)).await.expect("first task");
    engine
        .mark_task_succeeded(&job_id, &first.id, Some(1.5), Some("summary-1".into()))
        .await
        .expect("first result");
    let second = engine.dequeue_next(OWNER, Some(&job_id)).await.expect("second task");
    engine
        .mark_task_succeeded(&job_id, &second.id, Some(2.5), Some("summary-2".into()))
        .await
        .expect("second result");

    // The crossing score locks the job; nothing further is dequeued.
    assert!(engine.dequeue_next(OWNER, Some(&job_id)).await.is_none());

    let (status, payload) = call(
        &app,
        get_request(&format!("/api/v1/optimizations/{job_id}/status"), OWNER),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(payload["status"], "early-stopped");
    assert_eq!(payload["diagnostics"]["final"], true);
    assert_eq!(payload["summary"]["finished"], 4);
    let reason = &payload["diagnostics"]["stopReason"];
    assert_eq!(reason["kind"], "EARLY_STOP_THRESHOLD");
    assert_eq!(reason["metric"], "sharpe");
    assert_eq!(reason["threshold"], json!(2.0));
    assert_eq!(reason["score"], json!(2.5));

    // Cancel on a finished job returns the existing state unchanged.
    let (status, payload) = call(
        &app,
        post_json(
            &format!("/api/v1/optimizations/{job_id}/cancel"),
            OWNER,
            &json!({"reason": "too late"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(payload["status"], "early-stopped");
    assert_eq!(payload["diagnostics"]["stopReason"]["kind"], "EARLY_STOP_THRESHOLD");

    // The export bundle carries only the scored rows, best first.
    let (status, bundle) = call(
        &app,
        post_empty(&format!("/api/v1/optimizations/{job_id}/export"), OWNER),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(bundle["status"], "early-stopped");
    let items = bundle["items"].as_array().expect("items");
    assert_eq!(items.len(), 2);
    assert_eq!(items[0]["score"], json!(2.5));
    assert_eq!(items[1]["score"], json!(1.5));
}

#[tokio::test]
async fn canceled_sweep_reruns_with_overrides_and_tops_the_history() {
    let (app, _engine) = deployment();
    let source_id = submit(&app, &sweep_body(2)).await;

    let (status, payload) = call(
        &app,
        post_json(
            &format!("/api/v1/optimizations/{source_id}/cancel"),
            OWNER,
            &json!({"reason": "drift detected"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(payload["status"], "canceled");
    assert_eq!(payload["diagnostics"]["stopReason"]["kind"], "CANCELED");
    assert_eq!(payload["diagnostics"]["stopReason"]["reason"], "drift detected");

    // Keep the rerun's timestamps strictly ahead of the cancel.
    tokio::time::sleep(Duration::from_millis(5)).await;

    let (status, rerun) = call(
        &app,
        post_json(
            &format!("/api/v1/optimizations/{source_id}/rerun"),
            OWNER,
            &json!({"concurrencyLimit": 4}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    let rerun_id = rerun["id"].as_str().expect("rerun id").to_string();
    assert_ne!(rerun_id, source_id);
    assert_eq!(rerun["sourceJobId"].as_str(), Some(source_id.as_str()));
    assert_eq!(rerun["totalTasks"], 6);

    let (status, payload) = call(
        &app,
        get_request(&format!("/api/v1/optimizations/{rerun_id}/status"), OWNER),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(payload["status"], "queued");
    assert_eq!(payload["concurrencyLimit"], 4);
    assert_eq!(payload["summary"]["throttled"], 2);

    let (status, history) = call(
        &app,
        get_request("/api/v1/optimizations/history?limit=10", OWNER),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let jobs = history.as_array().expect("history");
    assert_eq!(jobs.len(), 2);
    assert_eq!(jobs[0]["id"].as_str(), Some(rerun_id.as_str()));
    assert_eq!(jobs[0]["sourceJobId"].as_str(), Some(source_id.as_str()));
    assert_eq!(jobs[1]["id"].as_str(), Some(source_id.as_str()));
    assert_eq!(jobs[1]["status"], "canceled");
}

#[tokio::test]
async fn internally_created_jobs_are_visible_on_the_public_api() {
    let (app, _engine) = deployment();

    let request = Request::builder()
        .method("POST")
        .uri("/internal/optimizations")
        .header("content-type", "application/json")
        .header("x-opt-shared-secret", SECRET)
        .header("x-owner-id", OWNER)
        .body(Body::from(
            json!({
                "ownerId": OWNER,
                "versionId": "sv-momentum-3",
                "paramSpace": {"window": [5, 10]},
                "concurrencyLimit": 2,
                "estimate": 2
            })
            .to_string(),
        ))
        .expect("should build request");
    let (status, created) = call(&app, request).await;
    assert_eq!(status, StatusCode::OK);
    let job_id = created["id"].as_str().expect("job id").to_string();

    let (status, payload) = call(
        &app,
        get_request(&format!("/api/v1/optimizations/{job_id}/status"), OWNER),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(payload["status"], "queued");
    assert_eq!(payload["summary"]["total"], 2);

    let (status, health) = call(&app, get_request("/internal/health", "anyone")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(health["status"], "up");
    assert_eq!(health["service"], "optimization-orchestrator");
}
