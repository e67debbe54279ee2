//! Internal delegation API.
//!
//! The surface a remote web tier drives when this service owns the job
//! store. Callers present the shared secret in `x-opt-shared-secret` and
//! identify the acting owner in `x-owner-id`; errors travel as
//! `{"detail": {code, message, details?, requestId}}` so delegating
//! clients can rebuild the structured error on their side.

use std::collections::HashMap;

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Value, json};
use uuid::Uuid;

use crate::error::OrchestratorError;
use crate::jobs::{CancelRequest, CreateJobRequest};
use crate::server::http::AppState;

const SHARED_SECRET_HEADER: &str = "x-opt-shared-secret";
const OWNER_HEADER: &str = "x-owner-id";
const REQUEST_ID_HEADER: &str = "x-request-id";

const DEFAULT_LIST_LIMIT: usize = 20;
const MAX_LIST_LIMIT: usize = 100;

/// Build the internal API router.
pub fn create_internal_router(state: AppState) -> Router {
    Router::new()
        .route("/internal/health", get(health))
        .route(
            "/internal/optimizations",
            post(create_optimization).get(list_optimizations),
        )
        .route("/internal/optimizations/{id}", get(get_optimization))
        .route(
            "/internal/optimizations/{id}/status",
            get(optimization_status),
        )
        .route(
            "/internal/optimizations/{id}/cancel",
            post(cancel_optimization),
        )
        .route(
            "/internal/optimizations/{id}/export",
            post(export_optimization),
        )
        .with_state(state)
}

struct DetailError(OrchestratorError);

impl IntoResponse for DetailError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.0.http_status())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(json!({ "detail": self.0.to_wire() }))).into_response()
    }
}

#[derive(Serialize)]
struct HealthResponse {
    service: &'static str,
    status: &'static str,
    details: Value,
    ts: DateTime<Utc>,
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        service: "optimization-orchestrator",
        status: "up",
        details: json!({ "worker": "embedded", "queue": "memory" }),
        ts: Utc::now(),
    })
}

async fn create_optimization(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, DetailError> {
    let request_id = internal_request_id(&headers);
    create_inner(&state, &headers, &body)
        .await
        .map_err(|error| DetailError(error.with_request_id(request_id)))
}

async fn create_inner(
    state: &AppState,
    headers: &HeaderMap,
    body: &Bytes,
) -> Result<Response, OrchestratorError> {
    let owner_id = authorize_internal(state, headers)?;
    let request: CreateJobRequest = serde_json::from_slice(body)
        .map_err(|_| OrchestratorError::param_invalid("invalid JSON body"))?;
    if request.owner_id != owner_id {
        return Err(
            OrchestratorError::forbidden("ownerId does not match the authenticated owner")
                .with_details(json!({ "ownerId": request.owner_id })),
        );
    }
    let created = state.orchestrator.create_job(request).await?;
    Ok(Json(created).into_response())
}

async fn optimization_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Response, DetailError> {
    let request_id = internal_request_id(&headers);
    status_inner(&state, &id, &headers)
        .await
        .map_err(|error| DetailError(error.with_request_id(request_id)))
}

async fn status_inner(
    state: &AppState,
    id: &str,
    headers: &HeaderMap,
) -> Result<Response, OrchestratorError> {
    let owner_id = authorize_internal(state, headers)?;
    let payload = state.orchestrator.job_status(&owner_id, id).await?;
    Ok(Json(payload).into_response())
}

async fn get_optimization(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Response, DetailError> {
    let request_id = internal_request_id(&headers);
    snapshot_inner(&state, &id, &headers)
        .await
        .map_err(|error| DetailError(error.with_request_id(request_id)))
}

async fn snapshot_inner(
    state: &AppState,
    id: &str,
    headers: &HeaderMap,
) -> Result<Response, OrchestratorError> {
    let owner_id = authorize_internal(state, headers)?;
    let snapshot = state.orchestrator.job_snapshot(&owner_id, id).await?;
    Ok(Json(snapshot).into_response())
}

async fn cancel_optimization(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, DetailError> {
    let request_id = internal_request_id(&headers);
    cancel_inner(&state, &id, &headers, &body)
        .await
        .map_err(|error| DetailError(error.with_request_id(request_id)))
}

async fn cancel_inner(
    state: &AppState,
    id: &str,
    headers: &HeaderMap,
    body: &Bytes,
) -> Result<Response, OrchestratorError> {
    let owner_id = authorize_internal(state, headers)?;
    let reason = serde_json::from_slice::<CancelRequest>(body)
        .ok()
        .and_then(|r| r.reason)
        .map(|r| r.trim().to_string())
        .filter(|r| !r.is_empty());
    let payload = state.orchestrator.cancel_job(&owner_id, id, reason).await?;
    Ok(Json(payload).into_response())
}

async fn export_optimization(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Response, DetailError> {
    let request_id = internal_request_id(&headers);
    export_inner(&state, &id, &headers)
        .await
        .map_err(|error| DetailError(error.with_request_id(request_id)))
}

async fn export_inner(
    state: &AppState,
    id: &str,
    headers: &HeaderMap,
) -> Result<Response, OrchestratorError> {
    let owner_id = authorize_internal(state, headers)?;
    let bundle = state.orchestrator.export_bundle(&owner_id, id).await?;
    Ok(Json(bundle).into_response())
}

async fn list_optimizations(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> Result<Response, DetailError> {
    let request_id = internal_request_id(&headers);
    list_inner(&state, &params, &headers)
        .await
        .map_err(|error| DetailError(error.with_request_id(request_id)))
}

async fn list_inner(
    state: &AppState,
    params: &HashMap<String, String>,
    headers: &HeaderMap,
) -> Result<Response, OrchestratorError> {
    let owner_id = authorize_internal(state, headers)?;
    let limit = params
        .get("limit")
        .and_then(|raw| raw.trim().parse::<usize>().ok())
        .unwrap_or(DEFAULT_LIST_LIMIT)
        .clamp(1, MAX_LIST_LIMIT);
    let jobs = state.orchestrator.history(&owner_id, limit).await?;
    Ok(Json(jobs).into_response())
}

/// Check the shared secret and resolve the acting owner.
fn authorize_internal(
    state: &AppState,
    headers: &HeaderMap,
) -> Result<String, OrchestratorError> {
    if let Some(secret) = &state.shared_secret {
        let presented = headers
            .get(SHARED_SECRET_HEADER)
            .and_then(|v| v.to_str().ok());
        if presented != Some(secret.value()) {
            return Err(OrchestratorError::forbidden("invalid shared secret"));
        }
    }
    headers
        .get(OWNER_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .ok_or_else(|| OrchestratorError::param_invalid("x-owner-id header is required"))
}

fn internal_request_id(headers: &HeaderMap) -> String {
    headers
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map_or_else(generated_request_id, str::to_string)
}

fn generated_request_id() -> String {
    let mut hex = Uuid::new_v4().simple().to_string();
    hex.truncate(12);
    format!("req-{hex}")
}
