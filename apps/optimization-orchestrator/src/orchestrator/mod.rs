//! Job lifecycle engines.
//!
//! The [`Orchestrator`] port has two implementations. [`InMemoryOrchestrator`]
//! keeps jobs, tasks, and result summaries in-process and schedules work
//! itself; [`RemoteOrchestratorClient`] forwards every call to a dedicated
//! orchestrator service over the internal delegation protocol. The backend
//! is chosen once at startup from configuration and handed to the HTTP
//! layer as a trait object.

mod memory;
mod ownership;
mod port;
mod remote;
mod summary;

pub use memory::{DEFAULT_CONCURRENCY_LIMIT, InMemoryOrchestrator};
pub use ownership::{InMemoryVersionDirectory, VersionDirectory};
pub use port::Orchestrator;
pub use remote::RemoteOrchestratorClient;
