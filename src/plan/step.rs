use crate::plan::predicate::Condition;
use crate::plan::reference::Reference;
use crate::plan::template::Template;
use crate::shared::ids::{FunctionId, SchemaId, StepName, ToolId};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use std::collections::BTreeMap;

/// A value handed to a tool or function.
///
/// In plan files a string that is exactly one placeholder becomes a
/// [`Argument::Reference`] and keeps the referenced JSON type, a string with
/// embedded placeholders becomes a [`Argument::Template`], and anything else is
/// passed through as a literal. Literal braces in strings are written doubled
/// (`{{{{` and `}}}}`).
#[derive(Debug, Clone, PartialEq)]
pub enum Argument {
    Literal(Value),
    Reference(Reference),
    Template(Template),
}

impl Argument {
    pub fn from_value(value: Value) -> Result<Self, String> {
        let Value::String(raw) = value else {
            return Ok(Self::Literal(value));
        };
        if !raw.contains("{{") && !raw.contains("}}") {
            return Ok(Self::Literal(Value::String(raw)));
        }
        let template = Template::parse(&raw)?;
        if let Some(reference) = template.as_single_reference() {
            return Ok(Self::Reference(reference.clone()));
        }
        if let Some(text) = template.literal_text() {
            return Ok(Self::Literal(Value::String(text)));
        }
        Ok(Self::Template(template))
    }

    pub fn references(&self) -> Vec<&Reference> {
        match self {
            Self::Literal(_) => Vec::new(),
            Self::Reference(reference) => vec![reference],
            Self::Template(template) => template.references().collect(),
        }
    }
}

impl From<Reference> for Argument {
    fn from(value: Reference) -> Self {
        Self::Reference(value)
    }
}

impl From<Value> for Argument {
    fn from(value: Value) -> Self {
        Self::Literal(value)
    }
}

impl Serialize for Argument {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            Self::Literal(Value::String(text)) => serializer.serialize_str(&Template::escape(text)),
            Self::Literal(value) => value.serialize(serializer),
            Self::Reference(reference) => {
                serializer.collect_str(&format_args!("{{{{{reference}}}}}"))
            }
            Self::Template(template) => template.serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for Argument {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Value::deserialize(deserializer)?;
        Self::from_value(value)
            .map_err(|err| D::Error::custom(format!("invalid argument: {err}")))
    }
}

pub type Arguments = BTreeMap<String, Argument>;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StepKind {
    /// Call one tool with fully specified arguments.
    ToolInvocation {
        tool: ToolId,
        args: Arguments,
        #[serde(skip_serializing_if = "Option::is_none")]
        output_schema: Option<SchemaId>,
    },
    /// Let the model executor derive arguments for `tool` from the task text and
    /// context, then call the tool with them.
    AgentTask {
        task: Template,
        tool: ToolId,
        context: Vec<Reference>,
        #[serde(skip_serializing_if = "Option::is_none")]
        output_schema: Option<SchemaId>,
    },
    ModelTransform {
        task: Template,
        context: Vec<Reference>,
        output_schema: SchemaId,
    },
    FunctionTransform {
        function: FunctionId,
        args: Arguments,
    },
    /// Suspends the run until a human answers `prompt`.
    UserInput {
        prompt: Template,
        #[serde(skip_serializing_if = "Vec::is_empty")]
        options: Vec<String>,
    },
}

impl StepKind {
    pub fn label(&self) -> &'static str {
        match self {
            Self::ToolInvocation { .. } => "tool",
            Self::AgentTask { .. } => "agent",
            Self::ModelTransform { .. } => "llm",
            Self::FunctionTransform { .. } => "function",
            Self::UserInput { .. } => "user_input",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Step {
    name: StepName,
    #[serde(flatten)]
    kind: StepKind,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    best_effort: bool,
}

impl Step {
    pub fn new(name: StepName, kind: StepKind) -> Self {
        Self {
            name,
            kind,
            best_effort: false,
        }
    }

    pub fn tool(name: StepName, tool: ToolId, args: Arguments) -> Self {
        Self::new(
            name,
            StepKind::ToolInvocation {
                tool,
                args,
                output_schema: None,
            },
        )
    }

    pub fn agent(name: StepName, tool: ToolId, task: Template, context: Vec<Reference>) -> Self {
        Self::new(
            name,
            StepKind::AgentTask {
                task,
                tool,
                context,
                output_schema: None,
            },
        )
    }

    pub fn llm(
        name: StepName,
        task: Template,
        context: Vec<Reference>,
        output_schema: SchemaId,
    ) -> Self {
        Self::new(
            name,
            StepKind::ModelTransform {
                task,
                context,
                output_schema,
            },
        )
    }

    pub fn function(name: StepName, function: FunctionId, args: Arguments) -> Self {
        Self::new(name, StepKind::FunctionTransform { function, args })
    }

    pub fn user_input(name: StepName, prompt: Template, options: Vec<String>) -> Self {
        Self::new(name, StepKind::UserInput { prompt, options })
    }

    /// Attaches an output schema to a tool or agent step. Model transforms carry
    /// theirs from construction; other kinds ignore the call.
    pub fn with_output_schema(mut self, schema: SchemaId) -> Self {
        match &mut self.kind {
            StepKind::ToolInvocation { output_schema, .. }
            | StepKind::AgentTask { output_schema, .. } => *output_schema = Some(schema),
            StepKind::ModelTransform { output_schema, .. } => *output_schema = schema,
            StepKind::FunctionTransform { .. } | StepKind::UserInput { .. } => {}
        }
        self
    }

    /// Tool failures on a best-effort step publish `null` instead of failing the run.
    pub fn best_effort(mut self) -> Self {
        self.best_effort = true;
        self
    }

    pub fn name(&self) -> &StepName {
        &self.name
    }

    pub fn kind(&self) -> &StepKind {
        &self.kind
    }

    pub fn is_best_effort(&self) -> bool {
        self.best_effort
    }

    pub fn output_schema(&self) -> Option<&SchemaId> {
        match &self.kind {
            StepKind::ToolInvocation { output_schema, .. }
            | StepKind::AgentTask { output_schema, .. } => output_schema.as_ref(),
            StepKind::ModelTransform { output_schema, .. } => Some(output_schema),
            StepKind::FunctionTransform { .. } | StepKind::UserInput { .. } => None,
        }
    }

    pub fn references(&self) -> Vec<&Reference> {
        match &self.kind {
            StepKind::ToolInvocation { args, .. } | StepKind::FunctionTransform { args, .. } => {
                args.values().flat_map(Argument::references).collect()
            }
            StepKind::AgentTask { task, context, .. }
            | StepKind::ModelTransform { task, context, .. } => {
                task.references().chain(context.iter()).collect()
            }
            StepKind::UserInput { prompt, .. } => prompt.references().collect(),
        }
    }
}

/// One entry of a plan's linear sequence. Branch markers sit inline between
/// steps; the builder records the positions of the matching markers.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "node", rename_all = "snake_case")]
pub enum PlanNode {
    Step(Step),
    If {
        condition: Condition,
        else_at: Option<usize>,
        end_at: usize,
    },
    Else {
        if_at: usize,
        end_at: usize,
    },
    EndIf {
        if_at: usize,
    },
}

impl PlanNode {
    pub fn as_step(&self) -> Option<&Step> {
        match self {
            Self::Step(step) => Some(step),
            _ => None,
        }
    }
}
