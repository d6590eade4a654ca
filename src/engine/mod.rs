//! Run-time side: binding inputs, walking a plan's nodes, dispatching steps to
//! collaborators and persisting suspended runs.

pub mod collaborators;
pub mod control_flow;
mod error;
pub mod functions;
pub mod output_log;
pub mod resolver;
pub mod run_store;
pub mod runner;

pub use collaborators::{
    Clarification, ClarificationResponse, ClarificationSource, ModelError, ModelExecutor,
    ToolCall, ToolError, ToolRegistry, TransformRequest, UserIdentity,
};
pub use error::{RunError, RunFailure, RunStoreError, UnresolvedReason};
pub use functions::{FunctionArgDef, FunctionDef, FunctionRegistry};
pub use output_log::{LogEntry, OutputLog};
pub use run_store::{RunSnapshot, RunStatus, RunStore};
pub use runner::{PlanRunner, RunOutcome, RunRequest, RunResult, SuspendedRun};
