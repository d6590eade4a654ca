//! Plan definitions: the immutable, validated sequence of steps a run walks.

mod builder;
mod error;
pub mod predicate;
pub mod reference;
pub mod step;
pub mod template;

pub use builder::PlanBuilder;
pub use error::PlanError;
pub use predicate::{CompareOp, Condition, Operand, Predicate};
pub use reference::{Reference, ReferenceTarget};
pub use step::{Argument, Arguments, PlanNode, Step, StepKind};
pub use template::Template;

use crate::schema::SchemaRegistry;
use crate::shared::ids::{InputName, SchemaId, StepName};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InputDecl {
    pub name: InputName,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
}

impl InputDecl {
    pub fn is_required(&self) -> bool {
        self.default.is_none()
    }
}

/// How the run's final value is chosen and shaped once the last node is passed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FinalOutput {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schema: Option<SchemaId>,
    pub summarize: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from_step: Option<StepName>,
}

impl FinalOutput {
    pub fn with_schema(schema: SchemaId) -> Self {
        Self {
            schema: Some(schema),
            ..Self::default()
        }
    }

    pub fn from_step(mut self, step: StepName) -> Self {
        self.from_step = Some(step);
        self
    }

    pub fn summarized(mut self) -> Self {
        self.summarize = true;
        self
    }
}

/// A validated plan. Only [`PlanBuilder::finalize`] produces one, and it is
/// never mutated afterwards, so a single `Plan` can back any number of
/// concurrent runs.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Plan {
    name: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    description: String,
    inputs: Vec<InputDecl>,
    schemas: SchemaRegistry,
    nodes: Vec<PlanNode>,
    final_output: FinalOutput,
    #[serde(skip)]
    digest: String,
}

impl Plan {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn inputs(&self) -> &[InputDecl] {
        &self.inputs
    }

    pub fn input(&self, name: &str) -> Option<&InputDecl> {
        self.inputs.iter().find(|input| input.name.as_str() == name)
    }

    pub fn schemas(&self) -> &SchemaRegistry {
        &self.schemas
    }

    pub fn nodes(&self) -> &[PlanNode] {
        &self.nodes
    }

    pub fn node(&self, position: usize) -> Option<&PlanNode> {
        self.nodes.get(position)
    }

    pub fn steps(&self) -> impl Iterator<Item = &Step> {
        self.nodes.iter().filter_map(PlanNode::as_step)
    }

    pub fn step(&self, name: &str) -> Option<&Step> {
        self.steps().find(|step| step.name().as_str() == name)
    }

    pub fn position_of(&self, name: &str) -> Option<usize> {
        self.nodes.iter().position(|node| {
            node.as_step()
                .is_some_and(|step| step.name().as_str() == name)
        })
    }

    pub fn final_output(&self) -> &FinalOutput {
        &self.final_output
    }

    /// Hex SHA-256 of the plan's canonical JSON form.
    pub fn digest(&self) -> &str {
        &self.digest
    }

    /// One line per node, indented by branch depth.
    pub fn outline(&self) -> Vec<String> {
        let mut depth = 0usize;
        let mut lines = Vec::with_capacity(self.nodes.len());
        for (position, node) in self.nodes.iter().enumerate() {
            let (indent, text) = match node {
                PlanNode::Step(step) => (depth, describe_step(step)),
                PlanNode::If { condition, .. } => {
                    depth += 1;
                    (depth - 1, format!("if {condition}"))
                }
                PlanNode::Else { .. } => (depth.saturating_sub(1), "else".to_string()),
                PlanNode::EndIf { .. } => {
                    depth = depth.saturating_sub(1);
                    (depth, "endif".to_string())
                }
            };
            lines.push(format!("{position:>3}  {}{text}", "  ".repeat(indent)));
        }
        lines
    }
}

fn describe_step(step: &Step) -> String {
    let target = match step.kind() {
        StepKind::ToolInvocation { tool, .. } | StepKind::AgentTask { tool, .. } => {
            format!(" {tool}")
        }
        StepKind::FunctionTransform { function, .. } => format!(" {function}"),
        StepKind::ModelTransform { .. } | StepKind::UserInput { .. } => String::new(),
    };
    let schema = step
        .output_schema()
        .map(|schema| format!(" -> {schema}"))
        .unwrap_or_default();
    let best_effort = if step.is_best_effort() {
        " (best effort)"
    } else {
        ""
    };
    format!(
        "{} [{}{target}]{schema}{best_effort}",
        step.name(),
        step.kind().label()
    )
}
