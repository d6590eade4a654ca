use crate::engine::collaborators::{ModelError, ToolError};
use crate::engine::output_log::OutputLog;
use crate::engine::run_store::RunStatus;
use crate::schema::SchemaError;
use crate::shared::ids::StepName;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnresolvedReason {
    /// The target step sits in a branch arm this run did not take.
    Skipped,
    /// The target step has not published anything yet on this run.
    NotExecuted,
    UnboundInput,
    /// The target published a value, but the field path does not exist in it.
    MissingField,
}

impl std::fmt::Display for UnresolvedReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Skipped => write!(f, "the step was skipped by branching"),
            Self::NotExecuted => write!(f, "the step has not executed"),
            Self::UnboundInput => write!(f, "the input is not bound"),
            Self::MissingField => write!(f, "the field is missing from the published value"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RunStoreError {
    #[error("io error at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("json error at {path}: {source}")]
    Json {
        path: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("run `{run_id}` not found")]
    NotFound { run_id: String },
    #[error("invalid run id `{run_id}`: {reason}")]
    InvalidRunId { run_id: String, reason: String },
}

#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error("required input `{input}` has no value and no default")]
    MissingInput { input: String },
    #[error("run argument `{input}` is not a declared input")]
    UnknownInput { input: String },
    #[error("unresolved reference `{reference}`: {reason}")]
    UnresolvedReference {
        reference: String,
        reason: UnresolvedReason,
    },
    #[error("condition `{condition}` could not be evaluated: {reason}")]
    Predicate { condition: String, reason: String },
    #[error("tool `{tool}` failed: {error}")]
    Tool { tool: String, error: ToolError },
    #[error("model executor failed: {0}")]
    Model(ModelError),
    #[error("function `{function}` failed: {reason}")]
    Function { function: String, reason: String },
    #[error("step `{step}` calls `{function}`, which the runner's function catalog rejects: {reason}")]
    FunctionCatalog {
        step: String,
        function: String,
        reason: String,
    },
    #[error(transparent)]
    SchemaValidation(#[from] SchemaError),
    #[error("response to `{step}` is not one of the offered options: {response}")]
    InvalidClarificationResponse { step: String, response: String },
    #[error("run was recorded for plan digest `{expected}` but the supplied plan has digest `{actual}`")]
    PlanMismatch { expected: String, actual: String },
    #[error("run state transition `{from}` -> `{to}` is invalid")]
    InvalidRunTransition { from: RunStatus, to: RunStatus },
    #[error("run `{run_id}` is `{status}`, not awaiting input")]
    NotAwaitingInput { run_id: String, status: RunStatus },
    #[error("step `{step}` already published a result on this run")]
    DuplicatePublication { step: String },
    #[error("no run store is attached to this runner")]
    StoreNotConfigured,
    #[error("run id allocation failed: {reason}")]
    RunId { reason: String },
    #[error(transparent)]
    Store(#[from] RunStoreError),
}

/// The first fatal error of a run, with the log accumulated before it.
#[derive(Debug, thiserror::Error)]
#[error("run `{run_id}` failed{}: {error}", step_suffix(.step.as_ref()))]
pub struct RunFailure {
    pub run_id: String,
    pub step: Option<StepName>,
    #[source]
    pub error: RunError,
    pub output_log: OutputLog,
}

fn step_suffix(step: Option<&StepName>) -> String {
    step.map(|step| format!(" at step `{step}`"))
        .unwrap_or_default()
}
