//! Rich error handling for the optimization orchestrator.
//!
//! Every failure carries a stable wire code, a human-readable message,
//! optional structured details, and a request id for correlation. The same
//! shape travels over both the public API (`{"error": {...}}`) and the
//! internal delegation protocol (`{"detail": {...}}`).
//!
//! # Error codes
//!
//! | Code | HTTP | Usage |
//! |------|------|-------|
//! | `E.PARAM_INVALID` | 400 | Malformed/oversized param space, bad limits or policy |
//! | `E.AUTH` | 401 | Owner identity cannot be resolved |
//! | `E.FORBIDDEN` | 403 | Owner mismatch on a job or strategy version |
//! | `E.NOT_FOUND` | 404 | Unknown job or version |
//! | `E.RATE_LIMITED` | 429 | Caller-level throttling |
//! | `E.DEP_UPSTREAM` | 502 | Remote orchestrator unreachable or failing |
//! | `E.CONFIG` | 500 | Orchestrator misconfiguration |

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error codes for the optimization orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCode {
    /// Malformed or oversized parameter space, invalid limits or policy shape.
    #[serde(rename = "E.PARAM_INVALID")]
    ParamInvalid,
    /// Owner identity could not be resolved.
    #[serde(rename = "E.AUTH")]
    Auth,
    /// Owner mismatch on an existing job or strategy version.
    #[serde(rename = "E.FORBIDDEN")]
    Forbidden,
    /// Unknown job or strategy version.
    #[serde(rename = "E.NOT_FOUND")]
    NotFound,
    /// Caller-level throttling tripped.
    #[serde(rename = "E.RATE_LIMITED")]
    RateLimited,
    /// Remote orchestrator unreachable or returned a server error.
    #[serde(rename = "E.DEP_UPSTREAM")]
    DepUpstream,
    /// Orchestrator misconfiguration (missing secret, bad wiring).
    #[serde(rename = "E.CONFIG")]
    Config,
}

impl ErrorCode {
    /// Get the wire code string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::ParamInvalid => "E.PARAM_INVALID",
            Self::Auth => "E.AUTH",
            Self::Forbidden => "E.FORBIDDEN",
            Self::NotFound => "E.NOT_FOUND",
            Self::RateLimited => "E.RATE_LIMITED",
            Self::DepUpstream => "E.DEP_UPSTREAM",
            Self::Config => "E.CONFIG",
        }
    }

    /// Get the HTTP status for this code.
    #[must_use]
    pub const fn http_status(&self) -> u16 {
        match self {
            Self::ParamInvalid => 400,
            Self::Auth => 401,
            Self::Forbidden => 403,
            Self::NotFound => 404,
            Self::RateLimited => 429,
            Self::DepUpstream => 502,
            Self::Config => 500,
        }
    }

    /// Parse a wire code string.
    #[must_use]
    pub fn from_wire(code: &str) -> Option<Self> {
        match code {
            "E.PARAM_INVALID" => Some(Self::ParamInvalid),
            "E.AUTH" => Some(Self::Auth),
            "E.FORBIDDEN" => Some(Self::Forbidden),
            "E.NOT_FOUND" => Some(Self::NotFound),
            "E.RATE_LIMITED" => Some(Self::RateLimited),
            "E.DEP_UPSTREAM" => Some(Self::DepUpstream),
            "E.CONFIG" => Some(Self::Config),
            _ => None,
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A rich error with structured details and request correlation.
#[derive(Debug, Clone, Error)]
pub struct OrchestratorError {
    code: ErrorCode,
    message: String,
    details: Option<serde_json::Value>,
    request_id: Option<String>,
}

impl OrchestratorError {
    /// Create a new error.
    #[must_use]
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
            request_id: None,
        }
    }

    /// Attach structured details.
    #[must_use]
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    /// Attach a request id, keeping an existing one.
    #[must_use]
    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        if self.request_id.is_none() {
            self.request_id = Some(request_id.into());
        }
        self
    }

    /// Get the error code.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        self.code
    }

    /// Get the message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Get the structured details, if any.
    #[must_use]
    pub const fn details(&self) -> Option<&serde_json::Value> {
        self.details.as_ref()
    }

    /// Get the request id, if any.
    #[must_use]
    pub fn request_id(&self) -> Option<&str> {
        self.request_id.as_deref()
    }

    /// Get the HTTP status for this error.
    #[must_use]
    pub const fn http_status(&self) -> u16 {
        self.code.http_status()
    }

    /// Convert to the wire body shared by both API surfaces.
    #[must_use]
    pub fn to_wire(&self) -> ErrorBody {
        ErrorBody {
            code: self.code,
            message: self.message.clone(),
            details: self.details.clone(),
            request_id: self.request_id.clone(),
        }
    }
}

impl std::fmt::Display for OrchestratorError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.code.as_str(), self.message)
    }
}

/// Wire-shape error body: `{code, message, details?, requestId?}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorBody {
    /// Stable error code.
    pub code: ErrorCode,
    /// Human-readable message.
    pub message: String,
    /// Structured details (e.g. `{limit, estimate}`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
    /// Correlation id.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

/// Convenience constructors for common errors.
impl OrchestratorError {
    /// Invalid parameter space, limits, or policy shape.
    #[must_use]
    pub fn param_invalid(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ParamInvalid, message)
    }

    /// Owner identity missing.
    #[must_use]
    pub fn auth(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Auth, message)
    }

    /// Owner mismatch.
    #[must_use]
    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Forbidden, message)
    }

    /// Unknown job or version.
    #[must_use]
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::NotFound, message)
    }

    /// Caller-level throttling.
    #[must_use]
    pub fn rate_limited(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::RateLimited, message)
    }

    /// Remote orchestrator failure.
    #[must_use]
    pub fn dep_upstream(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::DepUpstream, message)
    }

    /// Orchestrator misconfiguration.
    #[must_use]
    pub fn config(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Config, message)
    }
}
