pub mod descriptions;
pub mod error;
pub mod failure_aggregator;
pub mod metadata_store;
pub mod report;
pub mod run_dir;
pub mod workflow_engine;

pub use error::OrchestratorError;
pub use failure_aggregator::{FailureAggregator, FailureReport};
pub use metadata_store::{RunCounts, RunState, StepFatal, WorkflowMetadataStore, WorkflowRun};
pub use run_dir::{RunDirectory, RunName};
pub use workflow_engine::{CancelFlag, RunOutcome, RunRequest, WorkflowEngine};
