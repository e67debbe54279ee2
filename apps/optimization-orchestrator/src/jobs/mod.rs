//! Optimization job domain model and wire payloads.

mod payloads;
mod types;

pub use payloads::{
    CancelRequest, CreateJobRequest, CreateJobResponse, ExportBundle, ExportItem, JobDiagnostics,
    JobSnapshot, JobStatusPayload, ResultArtifact, ResultSummary, SubmitAccepted,
};
pub use types::{
    EarlyStopMode, EarlyStopPolicy, JobStatus, JobSummary, OptimizationJob, OptimizationTask,
    StopReason, TaskError, TaskErrorCode, TopNEntry,
};
