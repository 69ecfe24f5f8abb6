// ─── Orchestration Engine ───
// Lifecycle state machine over built instances, driven through the
// container runtime contract.

pub mod engine;
pub mod report;
pub mod service;

pub use engine::{EngineParts, OrchestrationEngine};
pub use report::{BuildReport, OperationReport, ServerFailure};
pub use service::service_spec;
