//! YAML plan files.
//!
//! ```yaml
//! name: ticket-triage
//! inputs:
//!   - name: ticket_id
//! schemas:
//!   TicketAnalysis:
//!     priority: string
//!     escalation_needed: boolean
//! steps:
//!   - tool:
//!       name: get_ticket
//!       tool: portia:zendesk:get_ticket
//!       args: { ticket_id: "{{inputs.ticket_id}}" }
//!   - llm:
//!       name: analyze_ticket
//!       task: Analyze the ticket
//!       context: [steps.get_ticket]
//!       output_schema: TicketAnalysis
//!   - if: steps.analyze_ticket.escalation_needed == true
//!   - tool: { name: escalate, tool: portia:slack:send_message, args: { text: "escalate" } }
//!   - else: {}
//!   - tool: { name: reply, tool: portia:zendesk:reply, args: { text: "thanks" } }
//!   - endif: {}
//! final_output:
//!   schema: TicketAnalysis
//!   from_step: analyze_ticket
//! ```

use super::ConfigError;
use crate::engine::FunctionRegistry;
use crate::plan::{Arguments, FinalOutput, Plan, PlanBuilder, PlanError, Reference, Step, Template};
use crate::schema::{FieldSpec, RecordSchema};
use crate::shared::ids::{FunctionId, InputName, SchemaId, StepName, ToolId};
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PlanDocument {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub inputs: Vec<InputDocument>,
    #[serde(default)]
    pub schemas: BTreeMap<SchemaId, BTreeMap<String, FieldSpec>>,
    /// Entries are single-key maps (`- tool: {...}`, `- if: "..."`).
    #[serde(with = "serde_yaml::with::singleton_map_recursive")]
    pub steps: Vec<StepDocument>,
    #[serde(default)]
    pub final_output: FinalOutput,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InputDocument {
    pub name: InputName,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub default: Option<Value>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepDocument {
    If(String),
    Else {},
    #[serde(rename = "endif")]
    EndIf {},
    Tool(ToolStepDocument),
    Agent(AgentStepDocument),
    Llm(LlmStepDocument),
    Function(FunctionStepDocument),
    UserInput(UserInputStepDocument),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ToolStepDocument {
    pub name: StepName,
    pub tool: ToolId,
    #[serde(default)]
    pub args: Arguments,
    #[serde(default)]
    pub output_schema: Option<SchemaId>,
    #[serde(default)]
    pub best_effort: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AgentStepDocument {
    pub name: StepName,
    pub task: Template,
    pub tool: ToolId,
    #[serde(default)]
    pub context: Vec<Reference>,
    #[serde(default)]
    pub output_schema: Option<SchemaId>,
    #[serde(default)]
    pub best_effort: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LlmStepDocument {
    pub name: StepName,
    pub task: Template,
    #[serde(default)]
    pub context: Vec<Reference>,
    pub output_schema: SchemaId,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FunctionStepDocument {
    pub name: StepName,
    pub function: FunctionId,
    #[serde(default)]
    pub args: Arguments,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UserInputStepDocument {
    pub name: StepName,
    pub prompt: Template,
    #[serde(default)]
    pub options: Vec<String>,
}

impl PlanDocument {
    pub fn from_yaml(path: &str, raw: &str) -> Result<Self, ConfigError> {
        serde_yaml::from_str(raw).map_err(|source| ConfigError::Parse {
            path: path.to_string(),
            source,
        })
    }

    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_yaml(&path.display().to_string(), &raw)
    }

    /// Replays the document through [`PlanBuilder`], so a file is held to
    /// exactly the checks a plan assembled in code is.
    pub fn build(&self, functions: &FunctionRegistry) -> Result<Plan, PlanError> {
        let mut builder = PlanBuilder::new(self.name.clone());
        builder
            .description(self.description.clone())
            .with_functions(functions.clone());
        for (id, fields) in &self.schemas {
            builder.declare_schema(RecordSchema::with_fields(id.clone(), fields.clone()))?;
        }
        for input in &self.inputs {
            builder.declare_input(
                input.name.as_str(),
                input.description.clone(),
                input.default.clone(),
            )?;
        }
        for entry in &self.steps {
            match entry {
                StepDocument::If(expression) => {
                    builder.open_if_expr(expression)?;
                }
                StepDocument::Else {} => {
                    builder.open_else()?;
                }
                StepDocument::EndIf {} => {
                    builder.close_if()?;
                }
                StepDocument::Tool(doc) => {
                    let mut step = Step::tool(doc.name.clone(), doc.tool.clone(), doc.args.clone());
                    if let Some(schema) = &doc.output_schema {
                        step = step.with_output_schema(schema.clone());
                    }
                    if doc.best_effort {
                        step = step.best_effort();
                    }
                    builder.add_step(step)?;
                }
                StepDocument::Agent(doc) => {
                    let mut step = Step::agent(
                        doc.name.clone(),
                        doc.tool.clone(),
                        doc.task.clone(),
                        doc.context.clone(),
                    );
                    if let Some(schema) = &doc.output_schema {
                        step = step.with_output_schema(schema.clone());
                    }
                    if doc.best_effort {
                        step = step.best_effort();
                    }
                    builder.add_step(step)?;
                }
                StepDocument::Llm(doc) => {
                    builder.add_step(Step::llm(
                        doc.name.clone(),
                        doc.task.clone(),
                        doc.context.clone(),
                        doc.output_schema.clone(),
                    ))?;
                }
                StepDocument::Function(doc) => {
                    builder.add_step(Step::function(
                        doc.name.clone(),
                        doc.function.clone(),
                        doc.args.clone(),
                    ))?;
                }
                StepDocument::UserInput(doc) => {
                    builder.add_step(Step::user_input(
                        doc.name.clone(),
                        doc.prompt.clone(),
                        doc.options.clone(),
                    ))?;
                }
            }
        }
        builder.finalize(self.final_output.clone())
    }
}

pub fn load_plan(path: &Path, functions: &FunctionRegistry) -> Result<Plan, ConfigError> {
    PlanDocument::from_path(path)?
        .build(functions)
        .map_err(|source| ConfigError::Plan {
            path: path.display().to_string(),
            source,
        })
}
