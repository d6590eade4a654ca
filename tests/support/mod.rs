#![allow(dead_code)]

use planrun::engine::{
    ModelError, ModelExecutor, ToolCall, ToolError, ToolRegistry, TransformRequest,
};
use serde_json::{Map, Value};
use std::sync::Mutex;

#[derive(Debug, Clone, PartialEq)]
pub struct RecordedToolCall {
    pub step: String,
    pub tool: String,
    pub args: Map<String, Value>,
    pub clarification_response: Option<Value>,
}

type ToolScript = Box<dyn Fn(&ToolCall<'_>) -> Result<Value, ToolError> + Send + Sync>;

/// Tool registry driven by a closure; records every call it receives.
pub struct ScriptedTools {
    script: ToolScript,
    calls: Mutex<Vec<RecordedToolCall>>,
}

impl ScriptedTools {
    pub fn new(
        script: impl Fn(&ToolCall<'_>) -> Result<Value, ToolError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            script: Box::new(script),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Echoes the `label` argument, or the whole argument object when absent.
    pub fn echo() -> Self {
        Self::new(|call| {
            Ok(call
                .args
                .get("label")
                .cloned()
                .unwrap_or_else(|| Value::Object(call.args.clone())))
        })
    }

    pub fn calls(&self) -> Vec<RecordedToolCall> {
        self.calls.lock().expect("calls lock").clone()
    }

    pub fn called_steps(&self) -> Vec<String> {
        self.calls().into_iter().map(|call| call.step).collect()
    }
}

impl ToolRegistry for ScriptedTools {
    fn invoke(&self, call: &ToolCall<'_>) -> Result<Value, ToolError> {
        self.calls.lock().expect("calls lock").push(RecordedToolCall {
            step: call.step.to_string(),
            tool: call.tool.to_string(),
            args: call.args.clone(),
            clarification_response: call.clarification_response.cloned(),
        });
        (self.script)(call)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecordedTransform {
    pub step: Option<String>,
    pub task: String,
    pub context: Vec<Value>,
    pub output_schema: Option<String>,
    pub target_tool: Option<String>,
    pub clarification_response: Option<Value>,
}

type ModelScript = Box<dyn Fn(&TransformRequest<'_>) -> Result<Value, ModelError> + Send + Sync>;

pub struct ScriptedModel {
    script: ModelScript,
    requests: Mutex<Vec<RecordedTransform>>,
}

impl ScriptedModel {
    pub fn new(
        script: impl Fn(&TransformRequest<'_>) -> Result<Value, ModelError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            script: Box::new(script),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// A model that must never be consulted.
    pub fn unused() -> Self {
        Self::new(|request| {
            Err(ModelError::ModelFailure(format!(
                "unexpected model request: {}",
                request.task
            )))
        })
    }

    pub fn requests(&self) -> Vec<RecordedTransform> {
        self.requests.lock().expect("requests lock").clone()
    }
}

impl ModelExecutor for ScriptedModel {
    fn transform(&self, request: &TransformRequest<'_>) -> Result<Value, ModelError> {
        self.requests
            .lock()
            .expect("requests lock")
            .push(RecordedTransform {
                step: request.step.map(ToString::to_string),
                task: request.task.to_string(),
                context: request.context.to_vec(),
                output_schema: request.output_schema.map(|schema| schema.id().to_string()),
                target_tool: request.target_tool.map(ToString::to_string),
                clarification_response: request.clarification_response.cloned(),
            });
        (self.script)(request)
    }
}

pub fn object(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        other => panic!("expected an object, got {other}"),
    }
}
