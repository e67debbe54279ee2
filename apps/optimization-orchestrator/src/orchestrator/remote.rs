//! HTTP client that delegates lifecycle calls to a remote orchestrator.
//!
//! Selected at startup when `OPTIMIZATION_ORCHESTRATOR_URL` is configured.
//! Every call carries the shared secret, the owner id, and one request id
//! that stays stable across retry attempts so the remote side can
//! deduplicate. Server errors and connection failures are retried with an
//! exponential backoff; client errors are returned to the caller verbatim.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use uuid::Uuid;

use crate::config::SharedSecret;
use crate::error::{ErrorCode, OrchestratorError};
use crate::jobs::{
    CancelRequest, CreateJobRequest, CreateJobResponse, ExportBundle, JobSnapshot,
    JobStatusPayload,
};
use crate::orchestrator::port::Orchestrator;

const SHARED_SECRET_HEADER: &str = "x-opt-shared-secret";
const OWNER_HEADER: &str = "x-owner-id";
const REQUEST_ID_HEADER: &str = "x-request-id";
const MAX_ATTEMPTS: u32 = 3;
const RETRY_BASE_DELAY: Duration = Duration::from_millis(200);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Remote orchestrator backend speaking the internal delegation protocol.
#[derive(Debug)]
pub struct RemoteOrchestratorClient {
    http: reqwest::Client,
    base_url: String,
    shared_secret: SharedSecret,
    max_attempts: u32,
    retry_delay: Duration,
}

impl RemoteOrchestratorClient {
    /// Create a client for the orchestrator at `base_url`.
    pub fn new(
        base_url: impl Into<String>,
        shared_secret: SharedSecret,
    ) -> Result<Self, OrchestratorError> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|err| {
                OrchestratorError::config("failed to build orchestrator http client")
                    .with_details(json!({ "error": err.to_string() }))
            })?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            shared_secret,
            max_attempts: MAX_ATTEMPTS,
            retry_delay: RETRY_BASE_DELAY,
        })
    }

    /// Override the retry backoff base.
    #[must_use]
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    async fn execute<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        owner_id: &str,
        body: Option<Value>,
    ) -> Result<T, OrchestratorError> {
        let url = format!("{}{path}", self.base_url);
        let request_id = format!("optreq-{}", Uuid::new_v4());
        let mut last_error: Option<OrchestratorError> = None;
        for attempt in 1..=self.max_attempts {
            let mut builder = self
                .http
                .request(method.clone(), &url)
                .header(SHARED_SECRET_HEADER, self.shared_secret.value())
                .header(OWNER_HEADER, owner_id)
                .header(REQUEST_ID_HEADER, &request_id);
            if let Some(body) = &body {
                builder = builder.json(body);
            }
            match builder.send().await {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        return response.json::<T>().await.map_err(|err| {
                            OrchestratorError::dep_upstream(
                                "invalid response from optimization orchestrator",
                            )
                            .with_details(json!({ "error": err.to_string() }))
                            .with_request_id(request_id.clone())
                        });
                    }
                    let payload = response.json::<Value>().await.ok();
                    let error = error_from_payload(status, payload.as_ref(), &request_id);
                    if status.is_server_error() && attempt < self.max_attempts {
                        tracing::warn!(
                            status = status.as_u16(),
                            attempt,
                            request_id = %request_id,
                            "orchestrator returned a server error, retrying"
                        );
                        last_error = Some(error);
                        tokio::time::sleep(self.retry_delay * 2u32.saturating_pow(attempt - 1))
                            .await;
                        continue;
                    }
                    return Err(error);
                }
                Err(err) => {
                    let error =
                        OrchestratorError::dep_upstream("optimization orchestrator unreachable")
                            .with_details(json!({ "error": err.to_string() }))
                            .with_request_id(request_id.clone());
                    if attempt < self.max_attempts {
                        tracing::warn!(
                            attempt,
                            request_id = %request_id,
                            error = %err,
                            "orchestrator request failed, retrying"
                        );
                        last_error = Some(error);
                        tokio::time::sleep(self.retry_delay * 2u32.saturating_pow(attempt - 1))
                            .await;
                        continue;
                    }
                    return Err(error);
                }
            }
        }
        Err(last_error.unwrap_or_else(|| {
            OrchestratorError::dep_upstream("optimization orchestrator unreachable")
        }))
    }

    fn encode<B: serde::Serialize>(body: &B) -> Result<Value, OrchestratorError> {
        serde_json::to_value(body).map_err(|err| {
            OrchestratorError::config("failed to encode orchestrator request")
                .with_details(json!({ "error": err.to_string() }))
        })
    }
}

/// Map a non-success response body onto the shared error shape.
///
/// Messages and structured details sent by the remote side survive even
/// when the code is unknown; bodies that are not JSON fall back to a code
/// derived from the HTTP status.
fn error_from_payload(
    status: StatusCode,
    payload: Option<&Value>,
    fallback_request_id: &str,
) -> OrchestratorError {
    let detail = payload.map(|body| body.get("detail").unwrap_or(body));
    let code = detail
        .and_then(|d| d.get("code"))
        .and_then(Value::as_str)
        .and_then(ErrorCode::from_wire)
        .unwrap_or(
            if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
                ErrorCode::Forbidden
            } else {
                ErrorCode::DepUpstream
            },
        );
    let message = detail
        .and_then(|d| d.get("message"))
        .and_then(Value::as_str)
        .unwrap_or("failed to interact with orchestrator");
    let mut error = OrchestratorError::new(code, message);
    let details = detail
        .and_then(|d| d.get("details"))
        .filter(|d| d.is_object())
        .or(detail);
    if let Some(details) = details {
        error = error.with_details(details.clone());
    }
    let request_id = detail
        .and_then(|d| d.get("requestId"))
        .and_then(Value::as_str)
        .unwrap_or(fallback_request_id);
    error.with_request_id(request_id)
}

#[async_trait]
impl Orchestrator for RemoteOrchestratorClient {
    async fn create_job(
        &self,
        request: CreateJobRequest,
    ) -> Result<CreateJobResponse, OrchestratorError> {
        let owner_id = request.owner_id.clone();
        let body = Self::encode(&request)?;
        self.execute(
            Method::POST,
            "/internal/optimizations",
            &owner_id,
            Some(body),
        )
        .await
    }

    async fn job_status(
        &self,
        owner_id: &str,
        job_id: &str,
    ) -> Result<JobStatusPayload, OrchestratorError> {
        self.execute(
            Method::GET,
            &format!("/internal/optimizations/{job_id}/status"),
            owner_id,
            None,
        )
        .await
    }

    async fn job_snapshot(
        &self,
        owner_id: &str,
        job_id: &str,
    ) -> Result<JobSnapshot, OrchestratorError> {
        self.execute(
            Method::GET,
            &format!("/internal/optimizations/{job_id}"),
            owner_id,
            None,
        )
        .await
    }

    async fn cancel_job(
        &self,
        owner_id: &str,
        job_id: &str,
        reason: Option<String>,
    ) -> Result<JobStatusPayload, OrchestratorError> {
        let body = Self::encode(&CancelRequest { reason })?;
        self.execute(
            Method::POST,
            &format!("/internal/optimizations/{job_id}/cancel"),
            owner_id,
            Some(body),
        )
        .await
    }

    async fn export_bundle(
        &self,
        owner_id: &str,
        job_id: &str,
    ) -> Result<ExportBundle, OrchestratorError> {
        self.execute(
            Method::POST,
            &format!("/internal/optimizations/{job_id}/export"),
            owner_id,
            None,
        )
        .await
    }

    async fn history(
        &self,
        owner_id: &str,
        limit: usize,
    ) -> Result<Vec<JobSnapshot>, OrchestratorError> {
        self.execute(
            Method::GET,
            &format!("/internal/optimizations?limit={limit}"),
            owner_id,
            None,
        )
        .await
    }
}
