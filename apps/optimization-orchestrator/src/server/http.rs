//! Public HTTP API for optimization jobs.
//!
//! Six routes under `/api/v1/optimizations`: submit, status, cancel,
//! rerun, export, and history. Callers authenticate with an `x-owner-id`
//! header; every error leaves as `{"error": {code, message, details?,
//! requestId, timestamp}}` with the HTTP status derived from the code.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value, json};
use uuid::Uuid;

use crate::config::{OrchestratorConfig, SchedulerSettings, SharedSecret};
use crate::error::{ErrorCode, OrchestratorError};
use crate::jobs::{CreateJobRequest, EarlyStopMode, EarlyStopPolicy, SubmitAccepted};
use crate::orchestrator::{DEFAULT_CONCURRENCY_LIMIT, Orchestrator, VersionDirectory};
use crate::paramspace::normalize_param_space;
use crate::server::rate_limit::RateLimiter;

const OWNER_HEADER: &str = "x-owner-id";
const REQUEST_ID_HEADER: &str = "x-request-id";
const ESTIMATE_HEADER: &str = "x-param-space-estimate";
const CONCURRENCY_HEADER: &str = "x-concurrency-limit";

/// Minimum length of a well-formed job id in a path segment.
const MIN_JOB_ID_LENGTH: usize = 8;
/// Longest error message forwarded to clients.
const MAX_MESSAGE_LENGTH: usize = 200;
/// Fixed window applied to the status polling limit.
const RATE_LIMIT_WINDOW: Duration = Duration::from_secs(60);
/// Default and maximum page size for history listings.
const HISTORY_DEFAULT_LIMIT: usize = 20;
const HISTORY_MAX_LIMIT: usize = 100;

/// Shared state behind the public and internal routers.
#[derive(Clone)]
pub struct AppState {
    pub(crate) orchestrator: Arc<dyn Orchestrator>,
    pub(crate) versions: Arc<dyn VersionDirectory>,
    pub(crate) limits: SchedulerSettings,
    pub(crate) rate_limiter: Arc<RateLimiter>,
    pub(crate) shared_secret: Option<SharedSecret>,
}

impl AppState {
    /// Assemble server state around a lifecycle backend and version directory.
    #[must_use]
    pub fn new(
        orchestrator: Arc<dyn Orchestrator>,
        versions: Arc<dyn VersionDirectory>,
        config: &OrchestratorConfig,
    ) -> Self {
        Self {
            orchestrator,
            versions,
            limits: config.scheduler.clone(),
            rate_limiter: Arc::new(RateLimiter::new(
                config.server.status_rate_limit,
                RATE_LIMIT_WINDOW,
            )),
            shared_secret: config.shared_secret.clone(),
        }
    }
}

/// Build the public API router.
pub fn create_public_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/api/v1/optimizations", post(submit_job))
        .route("/api/v1/optimizations/history", get(job_history))
        .route("/api/v1/optimizations/{id}/status", get(job_status))
        .route("/api/v1/optimizations/{id}/cancel", post(cancel_job))
        .route("/api/v1/optimizations/{id}/rerun", post(rerun_job))
        .route("/api/v1/optimizations/{id}/export", post(export_job))
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Error envelope
// ---------------------------------------------------------------------------

struct ApiError(OrchestratorError);

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PublicErrorBody {
    code: ErrorCode,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<Value>,
    request_id: String,
    timestamp: DateTime<Utc>,
}

#[derive(Serialize)]
struct PublicErrorEnvelope {
    error: PublicErrorBody,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.0.http_status())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let envelope = PublicErrorEnvelope {
            error: PublicErrorBody {
                code: self.0.code(),
                message: truncate_message(self.0.message()),
                details: self.0.details().cloned(),
                request_id: self.0.request_id().unwrap_or_default().to_string(),
                timestamp: Utc::now(),
            },
        };
        (status, Json(envelope)).into_response()
    }
}

fn truncate_message(message: &str) -> String {
    if message.len() <= MAX_MESSAGE_LENGTH {
        message.to_string()
    } else {
        message.chars().take(MAX_MESSAGE_LENGTH).collect()
    }
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// Health check endpoint.
async fn health_check() -> &'static str {
    "OK"
}

async fn submit_job(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    let request_id = request_id_from(&headers);
    submit_inner(&state, &headers, &body)
        .await
        .map_err(|error| ApiError(error.with_request_id(request_id)))
}

async fn submit_inner(
    state: &AppState,
    headers: &HeaderMap,
    body: &Bytes,
) -> Result<Response, OrchestratorError> {
    let owner_id = resolve_owner(headers)?;
    let parsed: Value = serde_json::from_slice(body)
        .map_err(|_| OrchestratorError::param_invalid("invalid JSON body"))?;
    let Some(fields) = parsed.as_object() else {
        return Err(OrchestratorError::param_invalid(
            "request body must be an object",
        ));
    };
    let version_id = fields
        .get("versionId")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| OrchestratorError::param_invalid("versionId is required"))?
        .to_string();
    let Some(space) = fields.get("paramSpace").and_then(Value::as_object) else {
        return Err(OrchestratorError::param_invalid("paramSpace is required"));
    };

    state.versions.assert_ownership(&owner_id, &version_id).await?;

    let normalized = normalize_param_space(space, state.limits.param_space_max)?;
    let estimate = normalized.estimate();
    if estimate > state.limits.param_space_max {
        return Err(OrchestratorError::param_invalid("param space too large")
            .with_details(json!({
                "limit": state.limits.param_space_max,
                "estimate": estimate,
            })));
    }
    let concurrency = resolve_concurrency(
        fields.get("concurrencyLimit"),
        state.limits.concurrency_limit_max,
    )?;
    let early_stop_policy = validate_early_stop(fields.get("earlyStopPolicy"))?;

    let created = state
        .orchestrator
        .create_job(CreateJobRequest {
            owner_id,
            version_id,
            param_space: space.clone(),
            concurrency_limit: Some(concurrency as i64),
            early_stop_policy,
            estimate: Some(estimate),
            source_job_id: None,
        })
        .await?;

    let accepted = SubmitAccepted {
        id: created.id,
        status: created.status,
        throttled: created.throttled,
    };
    let mut response = (StatusCode::ACCEPTED, Json(accepted)).into_response();
    if let Ok(value) = HeaderValue::from_str(&estimate.to_string()) {
        response.headers_mut().insert(ESTIMATE_HEADER, value);
    }
    if let Ok(value) = HeaderValue::from_str(&concurrency.to_string()) {
        response.headers_mut().insert(CONCURRENCY_HEADER, value);
    }
    Ok(response)
}

async fn job_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let request_id = request_id_from(&headers);
    status_inner(&state, &id, &headers)
        .await
        .map_err(|error| ApiError(error.with_request_id(request_id)))
}

async fn status_inner(
    state: &AppState,
    id: &str,
    headers: &HeaderMap,
) -> Result<Response, OrchestratorError> {
    let job_id = validate_job_id(id)?;
    let owner_id = resolve_owner(headers)?;
    let key = format!("{owner_id}:/api/v1/optimizations/{job_id}/status:GET");
    let decision = state.rate_limiter.check(&key).await;
    if !decision.allowed {
        return Err(
            OrchestratorError::rate_limited("request rate limited")
                .with_details(json!({ "resetAt": decision.reset_at })),
        );
    }
    let payload = state.orchestrator.job_status(&owner_id, &job_id).await?;
    Ok(Json(payload).into_response())
}

async fn cancel_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    let request_id = request_id_from(&headers);
    cancel_inner(&state, &id, &headers, &body)
        .await
        .map_err(|error| ApiError(error.with_request_id(request_id)))
}

async fn cancel_inner(
    state: &AppState,
    id: &str,
    headers: &HeaderMap,
    body: &Bytes,
) -> Result<Response, OrchestratorError> {
    let job_id = validate_job_id(id)?;
    let owner_id = resolve_owner(headers)?;
    let reason = extract_reason(body);
    let payload = state
        .orchestrator
        .cancel_job(&owner_id, &job_id, reason)
        .await?;
    Ok((StatusCode::ACCEPTED, Json(payload)).into_response())
}

async fn rerun_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    let request_id = request_id_from(&headers);
    rerun_inner(&state, &id, &headers, &body)
        .await
        .map_err(|error| ApiError(error.with_request_id(request_id)))
}

async fn rerun_inner(
    state: &AppState,
    id: &str,
    headers: &HeaderMap,
    body: &Bytes,
) -> Result<Response, OrchestratorError> {
    let job_id = validate_job_id(id)?;
    let owner_id = resolve_owner(headers)?;
    let snapshot = state.orchestrator.job_snapshot(&owner_id, &job_id).await?;

    // Overrides are best-effort: a missing or malformed body reruns as-is.
    let overrides: Map<String, Value> = serde_json::from_slice::<Value>(body)
        .ok()
        .and_then(|v| v.as_object().cloned())
        .unwrap_or_default();

    let normalized = normalize_param_space(&snapshot.param_space, state.limits.param_space_max)?;
    let estimate = normalized.estimate();
    if estimate > state.limits.param_space_max {
        return Err(OrchestratorError::param_invalid("param space too large")
            .with_details(json!({
                "limit": state.limits.param_space_max,
                "estimate": estimate,
            })));
    }
    let concurrency = match overrides.get("concurrencyLimit") {
        Some(raw) if !raw.is_null() => {
            resolve_concurrency(Some(raw), state.limits.concurrency_limit_max)?
        }
        _ => snapshot
            .concurrency_limit
            .min(state.limits.concurrency_limit_max),
    };
    // An explicit `null` clears the inherited policy.
    let early_stop_policy = match overrides.get("earlyStopPolicy") {
        Some(raw) => validate_early_stop(Some(raw))?,
        None => snapshot.early_stop_policy,
    };

    let created = state
        .orchestrator
        .create_job(CreateJobRequest {
            owner_id,
            version_id: snapshot.version_id,
            param_space: snapshot.param_space,
            concurrency_limit: Some(concurrency as i64),
            early_stop_policy,
            estimate: Some(estimate),
            source_job_id: Some(snapshot.id),
        })
        .await?;
    Ok((StatusCode::ACCEPTED, Json(created)).into_response())
}

async fn export_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let request_id = request_id_from(&headers);
    export_inner(&state, &id, &headers)
        .await
        .map_err(|error| ApiError(error.with_request_id(request_id)))
}

async fn export_inner(
    state: &AppState,
    id: &str,
    headers: &HeaderMap,
) -> Result<Response, OrchestratorError> {
    let job_id = validate_job_id(id)?;
    let owner_id = resolve_owner(headers)?;
    let bundle = state.orchestrator.export_bundle(&owner_id, &job_id).await?;
    let body = serde_json::to_string_pretty(&bundle).map_err(|err| {
        OrchestratorError::config(format!("failed to serialize export bundle: {err}"))
    })?;
    let mut response = (StatusCode::OK, body).into_response();
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/json; charset=utf-8"),
    );
    if let Ok(value) =
        HeaderValue::from_str(&format!("attachment; filename=\"{job_id}-topn.json\""))
    {
        response
            .headers_mut()
            .insert(header::CONTENT_DISPOSITION, value);
    }
    Ok(response)
}

async fn job_history(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let request_id = request_id_from(&headers);
    history_inner(&state, &params, &headers)
        .await
        .map_err(|error| ApiError(error.with_request_id(request_id)))
}

async fn history_inner(
    state: &AppState,
    params: &HashMap<String, String>,
    headers: &HeaderMap,
) -> Result<Response, OrchestratorError> {
    let owner_id = resolve_owner(headers)?;
    let limit = resolve_history_limit(params.get("limit"))?;
    let jobs = state.orchestrator.history(&owner_id, limit).await?;
    Ok(Json(jobs).into_response())
}

// ---------------------------------------------------------------------------
// Request validation
// ---------------------------------------------------------------------------

fn request_id_from(headers: &HeaderMap) -> String {
    headers
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map_or_else(|| Uuid::new_v4().to_string(), str::to_string)
}

fn resolve_owner(headers: &HeaderMap) -> Result<String, OrchestratorError> {
    headers
        .get(OWNER_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .ok_or_else(|| OrchestratorError::auth("authentication required"))
}

fn validate_job_id(raw: &str) -> Result<String, OrchestratorError> {
    let id = raw.trim();
    let well_formed = id.len() >= MIN_JOB_ID_LENGTH
        && id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-');
    if well_formed {
        Ok(id.to_string())
    } else {
        Err(OrchestratorError::param_invalid("invalid optimization id")
            .with_details(json!({ "id": raw })))
    }
}

fn resolve_concurrency(
    raw: Option<&Value>,
    max: usize,
) -> Result<usize, OrchestratorError> {
    let Some(raw) = raw.filter(|v| !v.is_null()) else {
        return Ok(DEFAULT_CONCURRENCY_LIMIT);
    };
    let requested = raw.as_i64().ok_or_else(|| {
        OrchestratorError::param_invalid("concurrencyLimit must be a positive integer")
    })?;
    if requested <= 0 {
        return Err(OrchestratorError::param_invalid(
            "concurrencyLimit must be a positive integer",
        ));
    }
    Ok((requested as usize).min(max))
}

fn validate_early_stop(
    raw: Option<&Value>,
) -> Result<Option<EarlyStopPolicy>, OrchestratorError> {
    let Some(raw) = raw.filter(|v| !v.is_null()) else {
        return Ok(None);
    };
    let metric = raw
        .get("metric")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|m| !m.is_empty())
        .ok_or_else(|| {
            OrchestratorError::param_invalid("earlyStopPolicy.metric must be a non-empty string")
        })?
        .to_string();
    let threshold = raw
        .get("threshold")
        .and_then(Value::as_f64)
        .filter(|t| t.is_finite())
        .ok_or_else(|| {
            OrchestratorError::param_invalid("earlyStopPolicy.threshold must be a number")
        })?;
    let mode = match raw.get("mode").and_then(Value::as_str) {
        Some("min") => EarlyStopMode::Min,
        Some("max") => EarlyStopMode::Max,
        _ => {
            return Err(OrchestratorError::param_invalid(
                "earlyStopPolicy.mode must be 'min' or 'max'",
            ));
        }
    };
    Ok(Some(EarlyStopPolicy {
        metric,
        threshold,
        mode,
    }))
}

fn extract_reason(body: &Bytes) -> Option<String> {
    serde_json::from_slice::<Value>(body)
        .ok()
        .and_then(|v| {
            v.get("reason")
                .and_then(Value::as_str)
                .map(|r| r.trim().to_string())
        })
        .filter(|reason| !reason.is_empty())
}

fn resolve_history_limit(raw: Option<&String>) -> Result<usize, OrchestratorError> {
    let Some(raw) = raw else {
        return Ok(HISTORY_DEFAULT_LIMIT);
    };
    let parsed = raw
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .ok_or_else(|| {
            OrchestratorError::param_invalid("limit must be a finite number")
                .with_details(json!({ "limit": raw }))
        })?;
    Ok((parsed.trunc() as i64).clamp(1, HISTORY_MAX_LIMIT as i64) as usize)
}
