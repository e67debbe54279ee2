// Allow unwrap/expect in tests - tests should panic on unexpected errors
#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::too_many_lines,
        clippy::significant_drop_tightening,
        clippy::items_after_statements,
        clippy::default_trait_access
    )
)]

//! Optimization Orchestrator - Core Library
//!
//! Coordinates parameter-sweep optimization jobs for backtests. A submitted
//! job names a strategy version and a parameter space; the orchestrator
//! normalizes the space, expands it into one task per parameter combination,
//! schedules tasks under the job's concurrency limit, and folds scored
//! results into a bounded leaderboard.
//!
//! # Pipeline
//!
//! - [`paramspace`]: normalization of range/list dimensions and combinatorial
//!   expansion with cap enforcement
//! - [`jobs`]: job and task domain model plus wire payloads
//! - [`orchestrator`]: the [`Orchestrator`] lifecycle port with an in-memory
//!   engine and a remote delegation client, chosen once at startup
//! - [`worker`]: task execution loop that drains the queue through a
//!   [`worker::TaskRunner`]
//! - [`server`]: public and internal HTTP routers sharing one [`AppState`]

/// Configuration loaded from environment variables.
pub mod config;

/// Stable error codes and the error envelope shared by both APIs.
pub mod error;

/// Optimization job domain model and wire payloads.
pub mod jobs;

/// Prometheus metrics export.
pub mod observability;

/// Job lifecycle engines behind the [`Orchestrator`] port.
pub mod orchestrator;

/// Parameter space normalization and expansion.
pub mod paramspace;

/// Public and internal HTTP APIs.
pub mod server;

/// Tracing subscriber setup.
pub mod telemetry;

/// Task execution loop.
pub mod worker;

// Configuration re-exports
pub use config::{
    OrchestratorConfig, RemoteSettings, SchedulerSettings, ServerSettings, SharedSecret,
};
pub use error::{ErrorCode, OrchestratorError};

// Domain re-exports
pub use jobs::{
    CreateJobRequest, CreateJobResponse, ExportBundle, JobSnapshot, JobStatus, JobStatusPayload,
    JobSummary, OptimizationJob, OptimizationTask,
};
pub use paramspace::{NormalizedParamSpace, ParamCombo, ParamValue};

// Engine re-exports
pub use orchestrator::{
    DEFAULT_CONCURRENCY_LIMIT, InMemoryOrchestrator, InMemoryVersionDirectory, Orchestrator,
    RemoteOrchestratorClient, VersionDirectory,
};
pub use server::{AppState, create_internal_router, create_public_router};
pub use worker::{RunOutcome, TaskRunner, Worker, WorkerError};
