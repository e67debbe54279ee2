//! Lifecycle port shared by the in-memory engine and the remote client.

use async_trait::async_trait;

use crate::error::OrchestratorError;
use crate::jobs::{
    CreateJobRequest, CreateJobResponse, ExportBundle, JobSnapshot, JobStatusPayload,
};

/// Job lifecycle operations, scoped to the requesting owner.
///
/// Every accessor verifies that the job belongs to `owner_id` before
/// returning anything; a foreign job surfaces as a forbidden error, not
/// as not-found.
#[async_trait]
pub trait Orchestrator: Send + Sync {
    /// Validate, expand, and register a new optimization job.
    async fn create_job(
        &self,
        request: CreateJobRequest,
    ) -> Result<CreateJobResponse, OrchestratorError>;

    /// Current status view of a job, including scheduling diagnostics.
    async fn job_status(
        &self,
        owner_id: &str,
        job_id: &str,
    ) -> Result<JobStatusPayload, OrchestratorError>;

    /// Full job snapshot, suitable for rerun seeding and history listings.
    async fn job_snapshot(
        &self,
        owner_id: &str,
        job_id: &str,
    ) -> Result<JobSnapshot, OrchestratorError>;

    /// Cancel a job; repeated cancels return the already-canceled job.
    async fn cancel_job(
        &self,
        owner_id: &str,
        job_id: &str,
        reason: Option<String>,
    ) -> Result<JobStatusPayload, OrchestratorError>;

    /// Assemble the downloadable top-N bundle for a job.
    async fn export_bundle(
        &self,
        owner_id: &str,
        job_id: &str,
    ) -> Result<ExportBundle, OrchestratorError>;

    /// Most recently updated jobs for an owner, newest first.
    async fn history(
        &self,
        owner_id: &str,
        limit: usize,
    ) -> Result<Vec<JobSnapshot>, OrchestratorError>;
}
