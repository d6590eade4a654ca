//! Contracts for the two external services a run dispatches to. The engine
//! never retries or times out a call; implementations own that policy.

use crate::schema::RecordSchema;
use crate::shared::ids::{StepName, ToolId};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Who a run acts on behalf of. Passed through to every collaborator call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserIdentity {
    pub external_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl UserIdentity {
    pub fn new(external_id: impl Into<String>) -> Self {
        Self {
            external_id: external_id.into(),
            name: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

/// Which party asked a clarification question. The answer is handed back to
/// that party only.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClarificationSource {
    #[default]
    UserInput,
    Tool,
    Model,
}

/// A human-facing question that suspends a run until it is answered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Clarification {
    pub step: StepName,
    #[serde(default)]
    pub source: ClarificationSource,
    pub prompt: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<String>,
}

/// The answer a resumed run carries until the asking step publishes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClarificationResponse {
    pub source: ClarificationSource,
    pub value: Value,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ToolError {
    #[error("tool not found")]
    NotFound,
    #[error("invalid arguments: {0}")]
    InvalidArgs(String),
    #[error("remote failure: {0}")]
    RemoteFailure(String),
    #[error("clarification needed: {prompt}")]
    NeedsClarification { prompt: String, options: Vec<String> },
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ModelError {
    #[error("result does not match the requested shape: {0}")]
    SchemaMismatch(String),
    #[error("model failure: {0}")]
    ModelFailure(String),
    #[error("clarification needed: {prompt}")]
    NeedsClarification { prompt: String, options: Vec<String> },
}

#[derive(Debug, Clone, Copy)]
pub struct ToolCall<'a> {
    pub step: &'a StepName,
    pub tool: &'a ToolId,
    pub args: &'a Map<String, Value>,
    pub identity: &'a UserIdentity,
    /// Set when the step is re-dispatched after the tool asked for clarification.
    pub clarification_response: Option<&'a Value>,
}

#[derive(Debug, Clone, Copy)]
pub struct TransformRequest<'a> {
    /// `None` when the request asks for the run's final summary.
    pub step: Option<&'a StepName>,
    pub task: &'a str,
    pub context: &'a [Value],
    /// Shape the result will be coerced into. `None` leaves the result opaque.
    pub output_schema: Option<&'a RecordSchema>,
    /// For agent tasks: the tool the result will be passed to as arguments.
    pub target_tool: Option<&'a ToolId>,
    pub identity: &'a UserIdentity,
    /// Set when the step is re-dispatched after the model asked for clarification.
    pub clarification_response: Option<&'a Value>,
}

/// Implementations own retries and timeouts; any error they return is final for the step.
pub trait ToolRegistry: Send + Sync {
    fn invoke(&self, call: &ToolCall<'_>) -> Result<Value, ToolError>;
}

pub trait ModelExecutor: Send + Sync {
    fn transform(&self, request: &TransformRequest<'_>) -> Result<Value, ModelError>;
}
