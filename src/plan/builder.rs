use super::{FinalOutput, InputDecl, Plan, PlanError, PlanNode, Reference, Step, StepKind};
use crate::engine::functions::{ArgCheckError, FunctionRegistry};
use crate::plan::predicate::Condition;
use crate::plan::reference::ReferenceTarget;
use crate::schema::{RecordSchema, SchemaRegistry};
use crate::shared::ids::InputName;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Arm {
    Then,
    Else,
}

#[derive(Debug, Clone, Copy)]
struct OpenBranch {
    if_at: usize,
    else_at: Option<usize>,
}

/// Accumulates inputs, schemas and nodes, checking structure as it goes.
///
/// Name collisions, unknown functions and misplaced branch markers fail on the
/// call that introduces them. References, schemas and unclosed branches are
/// checked by [`PlanBuilder::finalize`], once the whole sequence is known.
#[derive(Debug)]
pub struct PlanBuilder {
    name: String,
    description: String,
    inputs: Vec<InputDecl>,
    schemas: SchemaRegistry,
    functions: FunctionRegistry,
    nodes: Vec<PlanNode>,
    open: Vec<OpenBranch>,
    step_positions: BTreeMap<String, usize>,
}

impl PlanBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            inputs: Vec::new(),
            schemas: SchemaRegistry::new(),
            functions: FunctionRegistry::builtin(),
            nodes: Vec::new(),
            open: Vec::new(),
            step_positions: BTreeMap::new(),
        }
    }

    pub fn description(&mut self, description: impl Into<String>) -> &mut Self {
        self.description = description.into();
        self
    }

    /// Replaces the builtin function catalog. Function steps are checked
    /// against the catalog in place when they are added.
    pub fn with_functions(&mut self, functions: FunctionRegistry) -> &mut Self {
        self.functions = functions;
        self
    }

    /// `default: None` makes the input required.
    pub fn declare_input(
        &mut self,
        name: &str,
        description: impl Into<String>,
        default: Option<Value>,
    ) -> Result<&mut Self, PlanError> {
        let name = InputName::parse(name)
            .map_err(|reason| PlanError::invalid_identifier("input name", name, reason))?;
        if self.inputs.iter().any(|input| input.name == name) {
            return Err(PlanError::DuplicateInput {
                input: name.to_string(),
            });
        }
        self.inputs.push(InputDecl {
            name,
            description: description.into(),
            default,
        });
        Ok(self)
    }

    pub fn declare_schema(&mut self, schema: RecordSchema) -> Result<&mut Self, PlanError> {
        self.schemas.register(schema)?;
        Ok(self)
    }

    pub fn add_step(&mut self, step: Step) -> Result<&mut Self, PlanError> {
        let position = self.nodes.len();
        if let Some(first_at) = self.step_positions.get(step.name().as_str()) {
            return Err(PlanError::DuplicateStep {
                step: step.name().to_string(),
                first_at: *first_at,
            });
        }
        if let StepKind::FunctionTransform { function, args } = step.kind() {
            self.functions
                .check_args(function, args.keys().map(String::as_str))
                .map_err(|err| {
                    let step = step.name().to_string();
                    let function = function.to_string();
                    match err {
                        ArgCheckError::UnknownFunction => {
                            PlanError::UnknownFunction { step, function }
                        }
                        ArgCheckError::Missing(arg) => PlanError::MissingFunctionArg {
                            step,
                            function,
                            arg,
                        },
                        ArgCheckError::Unexpected(arg) => PlanError::UnknownFunctionArg {
                            step,
                            function,
                            arg,
                        },
                    }
                })?;
        }
        self.step_positions
            .insert(step.name().to_string(), position);
        self.nodes.push(PlanNode::Step(step));
        Ok(self)
    }

    pub fn open_if(&mut self, condition: Condition) -> Result<&mut Self, PlanError> {
        let if_at = self.nodes.len();
        self.open.push(OpenBranch {
            if_at,
            else_at: None,
        });
        // end_at is patched by close_if
        self.nodes.push(PlanNode::If {
            condition,
            else_at: None,
            end_at: if_at,
        });
        Ok(self)
    }

    /// Parses `expression` with the condition language and opens a branch on it.
    pub fn open_if_expr(&mut self, expression: &str) -> Result<&mut Self, PlanError> {
        let condition = Condition::parse(expression).map_err(|reason| PlanError::Condition {
            source_text: expression.to_string(),
            reason,
        })?;
        self.open_if(condition)
    }

    pub fn open_else(&mut self) -> Result<&mut Self, PlanError> {
        let at = self.nodes.len();
        let Some(branch) = self.open.last_mut() else {
            return Err(PlanError::UnmatchedElse { at });
        };
        if let Some(else_at) = branch.else_at {
            return Err(PlanError::DuplicateElse {
                if_at: branch.if_at,
                else_at,
            });
        }
        branch.else_at = Some(at);
        let if_at = branch.if_at;
        self.nodes.push(PlanNode::Else { if_at, end_at: at });
        Ok(self)
    }

    pub fn close_if(&mut self) -> Result<&mut Self, PlanError> {
        let end_at = self.nodes.len();
        let Some(branch) = self.open.pop() else {
            return Err(PlanError::UnmatchedEndIf { at: end_at });
        };
        if let Some(PlanNode::If {
            else_at,
            end_at: if_end,
            ..
        }) = self.nodes.get_mut(branch.if_at)
        {
            *else_at = branch.else_at;
            *if_end = end_at;
        }
        if let Some(PlanNode::Else {
            end_at: else_end, ..
        }) = branch.else_at.and_then(|at| self.nodes.get_mut(at))
        {
            *else_end = end_at;
        }
        self.nodes.push(PlanNode::EndIf {
            if_at: branch.if_at,
        });
        Ok(self)
    }

    pub fn finalize(self, final_output: FinalOutput) -> Result<Plan, PlanError> {
        if self.name.trim().is_empty() {
            return Err(PlanError::EmptyPlanName);
        }
        if let Some(branch) = self.open.last() {
            return Err(PlanError::UnclosedBranch {
                if_at: branch.if_at,
            });
        }
        self.schemas.check_links()?;
        if let Some(schema) = &final_output.schema {
            if !self.schemas.contains(schema.as_str()) {
                return Err(PlanError::UnknownSchema {
                    location: "final output".to_string(),
                    schema: schema.to_string(),
                });
            }
        }
        if let Some(step) = &final_output.from_step {
            if !self.step_positions.contains_key(step.as_str()) {
                return Err(PlanError::UnknownStep {
                    location: "final output".to_string(),
                    target: step.to_string(),
                });
            }
        }
        self.check_references()?;

        let mut plan = Plan {
            name: self.name,
            description: self.description,
            inputs: self.inputs,
            schemas: self.schemas,
            nodes: self.nodes,
            final_output,
            digest: String::new(),
        };
        plan.digest = plan_digest(&plan)?;
        Ok(plan)
    }

    /// Walks the sequence once, tracking which branch arm each node sits in, so
    /// every reference can be classified as valid, forward, unknown, or pointing
    /// into the other arm of a branch that also encloses the reader.
    fn check_references(&self) -> Result<(), PlanError> {
        let mut path: Vec<(usize, Arm)> = Vec::new();
        let mut seen: BTreeMap<&str, (usize, Vec<(usize, Arm)>)> = BTreeMap::new();

        for (position, node) in self.nodes.iter().enumerate() {
            match node {
                PlanNode::If { condition, .. } => {
                    let location = format!("condition at position {position}");
                    for reference in condition.references() {
                        self.check_reference(&location, reference, &path, &seen)?;
                    }
                    path.push((position, Arm::Then));
                }
                PlanNode::Else { .. } => {
                    if let Some(frame) = path.last_mut() {
                        frame.1 = Arm::Else;
                    }
                }
                PlanNode::EndIf { .. } => {
                    path.pop();
                }
                PlanNode::Step(step) => {
                    let location = format!("step `{}`", step.name());
                    for reference in step.references() {
                        self.check_reference(&location, reference, &path, &seen)?;
                    }
                    if let Some(schema) = step.output_schema() {
                        if !self.schemas.contains(schema.as_str()) {
                            return Err(PlanError::UnknownSchema {
                                location,
                                schema: schema.to_string(),
                            });
                        }
                    }
                    seen.insert(step.name().as_str(), (position, path.clone()));
                }
            }
        }
        Ok(())
    }

    fn check_reference(
        &self,
        location: &str,
        reference: &Reference,
        path: &[(usize, Arm)],
        seen: &BTreeMap<&str, (usize, Vec<(usize, Arm)>)>,
    ) -> Result<(), PlanError> {
        match reference.target() {
            ReferenceTarget::Input(name) => {
                if self.inputs.iter().any(|input| &input.name == name) {
                    return Ok(());
                }
                Err(PlanError::UnknownInput {
                    location: location.to_string(),
                    input: name.to_string(),
                })
            }
            ReferenceTarget::Step(name) => {
                if let Some((_, target_path)) = seen.get(name.as_str()) {
                    for (target_frame, reader_frame) in target_path.iter().zip(path) {
                        if target_frame.0 != reader_frame.0 {
                            break;
                        }
                        if target_frame.1 != reader_frame.1 {
                            return Err(PlanError::ExclusiveBranchReference {
                                location: location.to_string(),
                                target: name.to_string(),
                                if_at: target_frame.0,
                            });
                        }
                    }
                    return Ok(());
                }
                match self.step_positions.get(name.as_str()) {
                    Some(target_at) => Err(PlanError::ForwardReference {
                        location: location.to_string(),
                        target: name.to_string(),
                        target_at: *target_at,
                    }),
                    None => Err(PlanError::UnknownStep {
                        location: location.to_string(),
                        target: name.to_string(),
                    }),
                }
            }
        }
    }
}

fn plan_digest(plan: &Plan) -> Result<String, PlanError> {
    let mut hasher = Sha256::new();
    serde_json::to_writer(&mut hasher, plan).map_err(|err| PlanError::Serialization {
        reason: err.to_string(),
    })?;
    Ok(format!("{:x}", hasher.finalize()))
}
