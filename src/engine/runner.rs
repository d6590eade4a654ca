use crate::engine::collaborators::{
    Clarification, ClarificationResponse, ClarificationSource, ModelError, ModelExecutor,
    ToolCall, ToolError, ToolRegistry, TransformRequest, UserIdentity,
};
use crate::engine::error::{RunError, RunFailure};
use crate::engine::functions::FunctionRegistry;
use crate::engine::output_log::OutputLog;
use crate::engine::resolver::{bind_inputs, Resolver};
use crate::engine::run_store::{
    generate_run_id, validate_run_id, FinalValue, RunSnapshot, RunStatus, RunStore,
};
use crate::plan::template::value_to_text;
use crate::plan::{Plan, PlanNode, Reference, Step, StepKind};
use crate::shared::ids::{SchemaId, StepName, ToolId};
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Default)]
pub struct RunRequest {
    /// Generated when absent.
    pub run_id: Option<String>,
    pub inputs: Map<String, Value>,
    pub identity: UserIdentity,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunResult {
    pub run_id: String,
    pub value: Value,
    pub summary: Option<String>,
    pub output_log: OutputLog,
}

/// A run paused at a clarification point. Hand it back to
/// [`PlanRunner::resume`] with the answer, or persist it and resume by id.
#[derive(Debug, Clone, PartialEq)]
pub struct SuspendedRun {
    snapshot: RunSnapshot,
}

impl SuspendedRun {
    pub fn from_snapshot(snapshot: RunSnapshot) -> Result<Self, RunError> {
        if snapshot.status != RunStatus::AwaitingInput || snapshot.pending_clarification.is_none()
        {
            return Err(RunError::NotAwaitingInput {
                run_id: snapshot.run_id,
                status: snapshot.status,
            });
        }
        Ok(Self { snapshot })
    }

    pub fn run_id(&self) -> &str {
        &self.snapshot.run_id
    }

    pub fn clarification(&self) -> Option<&Clarification> {
        self.snapshot.pending_clarification.as_ref()
    }

    pub fn output_log(&self) -> &OutputLog {
        &self.snapshot.output_log
    }

    pub fn position(&self) -> usize {
        self.snapshot.position
    }

    pub fn snapshot(&self) -> &RunSnapshot {
        &self.snapshot
    }

    pub fn into_snapshot(self) -> RunSnapshot {
        self.snapshot
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    Completed(RunResult),
    AwaitingInput(SuspendedRun),
}

impl RunOutcome {
    pub fn completed(self) -> Option<RunResult> {
        match self {
            Self::Completed(result) => Some(result),
            Self::AwaitingInput(_) => None,
        }
    }

    pub fn suspended(self) -> Option<SuspendedRun> {
        match self {
            Self::AwaitingInput(suspended) => Some(suspended),
            Self::Completed(_) => None,
        }
    }
}

enum StepOutcome {
    Publish { value: Value, note: Option<String> },
    Suspend(Clarification),
}

/// Drives runs of validated plans against caller-owned collaborators.
///
/// The runner holds no per-run state; each call owns its snapshot, so one
/// runner (or several) may drive any number of runs of the same plan.
pub struct PlanRunner<'a> {
    tools: &'a dyn ToolRegistry,
    model: &'a dyn ModelExecutor,
    functions: FunctionRegistry,
    run_store: Option<RunStore>,
    checkpoints: bool,
}

impl<'a> PlanRunner<'a> {
    pub fn new(tools: &'a dyn ToolRegistry, model: &'a dyn ModelExecutor) -> Self {
        Self {
            tools,
            model,
            functions: FunctionRegistry::builtin(),
            run_store: None,
            checkpoints: true,
        }
    }

    /// Must accept every function step of the plans this runner drives; runs
    /// of a plan built against a different catalog are refused before any
    /// step executes.
    pub fn with_functions(mut self, functions: FunctionRegistry) -> Self {
        self.functions = functions;
        self
    }

    /// Persists suspended and finished runs, and each step when checkpoints are on.
    pub fn with_run_store(mut self, run_store: RunStore) -> Self {
        self.run_store = Some(run_store);
        self
    }

    pub fn with_checkpoints(mut self, enabled: bool) -> Self {
        self.checkpoints = enabled;
        self
    }

    pub fn run(
        &self,
        plan: &Plan,
        inputs: Map<String, Value>,
        identity: UserIdentity,
    ) -> Result<RunOutcome, RunFailure> {
        self.start(
            plan,
            RunRequest {
                run_id: None,
                inputs,
                identity,
            },
        )
    }

    pub fn start(&self, plan: &Plan, request: RunRequest) -> Result<RunOutcome, RunFailure> {
        let now = now_secs();
        let run_id = match request.run_id {
            Some(run_id) => {
                validate_run_id(&run_id).map_err(|reason| RunFailure {
                    run_id: run_id.clone(),
                    step: None,
                    error: RunError::RunId { reason },
                    output_log: OutputLog::new(),
                })?;
                run_id
            }
            None => self.allocate_run_id(now).map_err(|error| RunFailure {
                run_id: String::new(),
                step: None,
                error,
                output_log: OutputLog::new(),
            })?,
        };
        self.check_function_catalog(plan).map_err(|error| RunFailure {
            run_id: run_id.clone(),
            step: None,
            error,
            output_log: OutputLog::new(),
        })?;
        let inputs = bind_inputs(plan, request.inputs).map_err(|error| RunFailure {
            run_id: run_id.clone(),
            step: None,
            error,
            output_log: OutputLog::new(),
        })?;

        let snapshot = RunSnapshot::new(
            run_id,
            plan.name(),
            plan.digest(),
            request.identity,
            inputs,
            now,
        );
        info!(run_id = %snapshot.run_id, plan = plan.name(), "run started");
        self.engine_log(&snapshot, now, format!("event=run_started plan={}", plan.name()))
            .map_err(|error| early_failure(&snapshot, error))?;
        self.drive(plan, snapshot)
    }

    /// Continues a suspended run with `response`, re-entering at the step that
    /// asked. A response outside the offered options is rejected and the run
    /// stays suspended.
    pub fn resume(
        &self,
        plan: &Plan,
        suspended: &SuspendedRun,
        response: Value,
    ) -> Result<RunOutcome, RunFailure> {
        let current = &suspended.snapshot;
        self.check_resumable(plan, current, &response)
            .and_then(|()| self.check_function_catalog(plan))
            .map_err(|error| early_failure(current, error))?;

        let mut snapshot = current.clone();
        let now = now_secs();
        transition(&mut snapshot, RunStatus::Running, now)
            .map_err(|error| early_failure(current, error))?;
        let source = snapshot
            .pending_clarification
            .take()
            .map(|clarification| clarification.source)
            .unwrap_or_default();
        snapshot.clarification_response = Some(ClarificationResponse {
            source,
            value: response,
        });
        info!(
            run_id = %snapshot.run_id,
            plan = plan.name(),
            position = snapshot.position,
            "run resumed"
        );
        self.engine_log(&snapshot, now, format!("event=run_resumed position={}", snapshot.position))
            .map_err(|error| early_failure(&snapshot, error))?;
        self.drive(plan, snapshot)
    }

    /// Loads a suspended run from the attached store and resumes it.
    pub fn resume_stored(
        &self,
        plan: &Plan,
        run_id: &str,
        response: Value,
    ) -> Result<RunOutcome, RunFailure> {
        let failure = |error| RunFailure {
            run_id: run_id.to_string(),
            step: None,
            error,
            output_log: OutputLog::new(),
        };
        let store = self
            .run_store
            .as_ref()
            .ok_or_else(|| failure(RunError::StoreNotConfigured))?;
        let snapshot = store.load(run_id).map_err(|err| failure(err.into()))?;
        let suspended = SuspendedRun::from_snapshot(snapshot).map_err(failure)?;
        self.resume(plan, &suspended, response)
    }

    fn check_function_catalog(&self, plan: &Plan) -> Result<(), RunError> {
        for step in plan.steps() {
            if let StepKind::FunctionTransform { function, args } = step.kind() {
                self.functions
                    .check_args(function, args.keys().map(String::as_str))
                    .map_err(|err| RunError::FunctionCatalog {
                        step: step.name().to_string(),
                        function: function.to_string(),
                        reason: err.to_string(),
                    })?;
            }
        }
        Ok(())
    }

    fn check_resumable(
        &self,
        plan: &Plan,
        snapshot: &RunSnapshot,
        response: &Value,
    ) -> Result<(), RunError> {
        if snapshot.plan_digest != plan.digest() {
            return Err(RunError::PlanMismatch {
                expected: snapshot.plan_digest.clone(),
                actual: plan.digest().to_string(),
            });
        }
        if snapshot.status != RunStatus::AwaitingInput {
            return Err(RunError::NotAwaitingInput {
                run_id: snapshot.run_id.clone(),
                status: snapshot.status,
            });
        }
        let Some(clarification) = &snapshot.pending_clarification else {
            return Err(RunError::NotAwaitingInput {
                run_id: snapshot.run_id.clone(),
                status: snapshot.status,
            });
        };
        if clarification.options.is_empty() {
            return Ok(());
        }
        let accepted = response
            .as_str()
            .is_some_and(|answer| clarification.options.iter().any(|option| option == answer));
        if accepted {
            return Ok(());
        }
        Err(RunError::InvalidClarificationResponse {
            step: clarification.step.to_string(),
            response: value_to_text(response),
        })
    }

    fn drive(&self, plan: &Plan, mut snapshot: RunSnapshot) -> Result<RunOutcome, RunFailure> {
        while let Some(node) = plan.node(snapshot.position) {
            let position = snapshot.position;
            match node {
                PlanNode::If { condition, .. } => {
                    let resolver = Resolver::new(
                        &snapshot.inputs,
                        &snapshot.output_log,
                        &snapshot.skipped_steps,
                    );
                    let mut stack = snapshot.branch_stack.clone();
                    match stack.enter_if(position, condition, &resolver) {
                        Ok(taken) => {
                            debug!(
                                run_id = %snapshot.run_id,
                                position,
                                condition = %condition,
                                ?taken,
                                "branch opened"
                            );
                            snapshot.branch_stack = stack;
                        }
                        Err(error) => return Err(self.fail(snapshot, None, error)),
                    }
                }
                PlanNode::Else { .. } => snapshot.branch_stack.enter_else(),
                PlanNode::EndIf { .. } => snapshot.branch_stack.close(),
                PlanNode::Step(step) => {
                    if !snapshot.branch_stack.is_active() {
                        debug!(run_id = %snapshot.run_id, step = %step.name(), "step skipped");
                        snapshot.skipped_steps.insert(step.name().clone());
                    } else {
                        debug!(
                            run_id = %snapshot.run_id,
                            step = %step.name(),
                            kind = step.kind().label(),
                            "step dispatched"
                        );
                        match self.execute_step(plan, step, &snapshot) {
                            Ok(StepOutcome::Publish { value, note }) => {
                                let published = publish(&mut snapshot, step, value, note)
                                    .and_then(|()| self.checkpoint(&mut snapshot, step));
                                if let Err(error) = published {
                                    let step = Some(step.name().clone());
                                    return Err(self.fail(snapshot, step, error));
                                }
                            }
                            Ok(StepOutcome::Suspend(clarification)) => {
                                return self.suspend(snapshot, clarification);
                            }
                            Err(error) => {
                                return Err(self.fail(snapshot, Some(step.name().clone()), error));
                            }
                        }
                    }
                }
            }
            snapshot.position += 1;
        }
        self.finish(plan, snapshot)
    }

    fn execute_step(
        &self,
        plan: &Plan,
        step: &Step,
        snapshot: &RunSnapshot,
    ) -> Result<StepOutcome, RunError> {
        let resolver = Resolver::new(
            &snapshot.inputs,
            &snapshot.output_log,
            &snapshot.skipped_steps,
        );
        let answer_for = |source: ClarificationSource| {
            snapshot
                .clarification_response
                .as_ref()
                .filter(|answer| answer.source == source)
                .map(|answer| &answer.value)
        };
        let tool_response = answer_for(ClarificationSource::Tool);
        let model_response = answer_for(ClarificationSource::Model);
        let identity = &snapshot.identity;

        match step.kind() {
            StepKind::ToolInvocation {
                tool,
                args,
                output_schema,
            } => {
                let args = resolver.resolve_args(args)?;
                self.invoke_tool(
                    plan,
                    step,
                    tool,
                    &args,
                    output_schema.as_ref(),
                    identity,
                    tool_response,
                )
            }
            StepKind::AgentTask {
                task,
                tool,
                context,
                output_schema,
            } => {
                let task = resolver.render(task)?;
                let context = resolver.resolve_all(context)?;
                let request = TransformRequest {
                    step: Some(step.name()),
                    task: &task,
                    context: &context,
                    output_schema: None,
                    target_tool: Some(tool),
                    identity,
                    clarification_response: model_response,
                };
                let args = match self.model.transform(&request) {
                    Ok(Value::Object(args)) => args,
                    Ok(other) => {
                        return Err(RunError::Model(ModelError::SchemaMismatch(format!(
                            "agent task must produce an argument object for `{tool}`, got {other}"
                        ))))
                    }
                    Err(ModelError::NeedsClarification { prompt, options }) => {
                        return Ok(StepOutcome::Suspend(Clarification {
                            step: step.name().clone(),
                            source: ClarificationSource::Model,
                            prompt,
                            options,
                        }))
                    }
                    Err(err) => return Err(RunError::Model(err)),
                };
                self.invoke_tool(
                    plan,
                    step,
                    tool,
                    &args,
                    output_schema.as_ref(),
                    identity,
                    tool_response,
                )
            }
            StepKind::ModelTransform {
                task,
                context,
                output_schema,
            } => {
                let task = resolver.render(task)?;
                let context = resolver.resolve_all(context)?;
                let request = TransformRequest {
                    step: Some(step.name()),
                    task: &task,
                    context: &context,
                    output_schema: plan.schemas().get(output_schema.as_str()),
                    target_tool: None,
                    identity,
                    clarification_response: model_response,
                };
                match self.model.transform(&request) {
                    Ok(raw) => Ok(StepOutcome::Publish {
                        value: coerce(plan, Some(output_schema), raw)?,
                        note: None,
                    }),
                    Err(ModelError::NeedsClarification { prompt, options }) => {
                        Ok(StepOutcome::Suspend(Clarification {
                            step: step.name().clone(),
                            source: ClarificationSource::Model,
                            prompt,
                            options,
                        }))
                    }
                    Err(err) => Err(RunError::Model(err)),
                }
            }
            StepKind::FunctionTransform { function, args } => {
                let args = resolver.resolve_args(args)?;
                let value =
                    self.functions
                        .call(function, &args)
                        .map_err(|reason| RunError::Function {
                            function: function.to_string(),
                            reason,
                        })?;
                Ok(StepOutcome::Publish { value, note: None })
            }
            StepKind::UserInput { prompt, options } => {
                match answer_for(ClarificationSource::UserInput) {
                    Some(answer) => Ok(StepOutcome::Publish {
                        value: answer.clone(),
                        note: None,
                    }),
                    None => Ok(StepOutcome::Suspend(Clarification {
                        step: step.name().clone(),
                        source: ClarificationSource::UserInput,
                        prompt: resolver.render(prompt)?,
                        options: options.clone(),
                    })),
                }
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn invoke_tool(
        &self,
        plan: &Plan,
        step: &Step,
        tool: &ToolId,
        args: &Map<String, Value>,
        output_schema: Option<&SchemaId>,
        identity: &UserIdentity,
        response: Option<&Value>,
    ) -> Result<StepOutcome, RunError> {
        let call = ToolCall {
            step: step.name(),
            tool,
            args,
            identity,
            clarification_response: response,
        };
        match self.tools.invoke(&call) {
            Ok(raw) => Ok(StepOutcome::Publish {
                value: coerce(plan, output_schema, raw)?,
                note: None,
            }),
            Err(ToolError::NeedsClarification { prompt, options }) => {
                Ok(StepOutcome::Suspend(Clarification {
                    step: step.name().clone(),
                    source: ClarificationSource::Tool,
                    prompt,
                    options,
                }))
            }
            Err(error) if step.is_best_effort() => {
                warn!(step = %step.name(), tool = %tool, %error, "best-effort tool call failed");
                Ok(StepOutcome::Publish {
                    value: Value::Null,
                    note: Some(format!("tool `{tool}` failed: {error}")),
                })
            }
            Err(error) => Err(RunError::Tool {
                tool: tool.to_string(),
                error,
            }),
        }
    }

    fn suspend(
        &self,
        mut snapshot: RunSnapshot,
        clarification: Clarification,
    ) -> Result<RunOutcome, RunFailure> {
        let now = now_secs();
        let step = clarification.step.clone();
        if let Err(error) = transition(&mut snapshot, RunStatus::AwaitingInput, now) {
            return Err(self.fail(snapshot, Some(step), error));
        }
        info!(
            run_id = %snapshot.run_id,
            step = %step,
            position = snapshot.position,
            "run awaiting input"
        );
        snapshot.clarification_response = None;
        snapshot.pending_clarification = Some(clarification);
        let line = format!("event=awaiting_input step={step} position={}", snapshot.position);
        if let Err(error) = self.persist_with_log(&snapshot, now, line) {
            return Err(self.fail(snapshot, Some(step), error));
        }
        Ok(RunOutcome::AwaitingInput(SuspendedRun { snapshot }))
    }

    fn finish(&self, plan: &Plan, mut snapshot: RunSnapshot) -> Result<RunOutcome, RunFailure> {
        let final_output = plan.final_output();
        let value = match &final_output.from_step {
            Some(step) => {
                let resolver = Resolver::new(
                    &snapshot.inputs,
                    &snapshot.output_log,
                    &snapshot.skipped_steps,
                );
                resolver.resolve(&Reference::step(step.clone()))
            }
            None => Ok(snapshot
                .output_log
                .last()
                .map(|entry| entry.value.clone())
                .unwrap_or(Value::Null)),
        }
        .and_then(|raw| coerce(plan, final_output.schema.as_ref(), raw));
        let value = match value {
            Ok(value) => value,
            Err(error) => return Err(self.fail(snapshot, None, error)),
        };

        let summary = if final_output.summarize {
            match self.summarize(plan, &snapshot, &value) {
                Ok(summary) => Some(summary),
                Err(error) => return Err(self.fail(snapshot, None, error)),
            }
        } else {
            None
        };

        let now = now_secs();
        if let Err(error) = transition(&mut snapshot, RunStatus::Completed, now) {
            return Err(self.fail(snapshot, None, error));
        }
        snapshot.terminal_reason = Some("completed".to_string());
        snapshot.result = Some(FinalValue {
            value: value.clone(),
            summary: summary.clone(),
        });
        info!(
            run_id = %snapshot.run_id,
            plan = plan.name(),
            steps = snapshot.output_log.len(),
            "run completed"
        );
        let line = format!("event=run_completed published={}", snapshot.output_log.len());
        if let Err(error) = self.persist_with_log(&snapshot, now, line) {
            return Err(self.fail(snapshot, None, error));
        }
        Ok(RunOutcome::Completed(RunResult {
            run_id: snapshot.run_id,
            value,
            summary,
            output_log: snapshot.output_log,
        }))
    }

    fn summarize(
        &self,
        plan: &Plan,
        snapshot: &RunSnapshot,
        value: &Value,
    ) -> Result<String, RunError> {
        let task = format!("Summarize the result of plan `{}` for the user.", plan.name());
        let context = [value.clone()];
        let request = TransformRequest {
            step: None,
            task: &task,
            context: &context,
            output_schema: None,
            target_tool: None,
            identity: &snapshot.identity,
            clarification_response: None,
        };
        match self.model.transform(&request).map_err(RunError::Model)? {
            Value::String(summary) => Ok(summary),
            other => Ok(value_to_text(&other)),
        }
    }

    /// Marks the run failed and records it. Persistence problems at this point
    /// are logged; the original error is the one reported.
    fn fail(
        &self,
        mut snapshot: RunSnapshot,
        step: Option<StepName>,
        error: RunError,
    ) -> RunFailure {
        let now = now_secs();
        warn!(
            run_id = %snapshot.run_id,
            step = ?step.as_ref().map(StepName::as_str),
            %error,
            "run failed"
        );
        if snapshot.status.can_transition_to(RunStatus::Failed) {
            snapshot.status = RunStatus::Failed;
            snapshot.updated_at = now;
            snapshot.terminal_reason = Some(error.to_string());
            snapshot.clarification_response = None;
            let line = format!(
                "event=run_failed step={} reason={:?}",
                step.as_ref().map(StepName::as_str).unwrap_or("-"),
                error.to_string()
            );
            if let Err(store_error) = self.persist_with_log(&snapshot, now, line) {
                warn!(
                    run_id = %snapshot.run_id,
                    error = %store_error,
                    "failed to record run failure"
                );
            }
        }
        RunFailure {
            run_id: snapshot.run_id,
            step,
            error,
            output_log: snapshot.output_log,
        }
    }

    fn checkpoint(&self, snapshot: &mut RunSnapshot, step: &Step) -> Result<(), RunError> {
        let Some(store) = &self.run_store else {
            return Ok(());
        };
        if !self.checkpoints {
            return Ok(());
        }
        let now = now_secs();
        snapshot.updated_at = now;
        // position still points at the step; resume must not see it unpublished
        let mut persisted = snapshot.clone();
        persisted.position += 1;
        store.persist(&persisted)?;
        store.append_engine_log(
            &snapshot.run_id,
            now,
            format!("event=step_published step={}", step.name()),
        )?;
        Ok(())
    }

    fn persist_with_log(
        &self,
        snapshot: &RunSnapshot,
        now: i64,
        line: String,
    ) -> Result<(), RunError> {
        let Some(store) = &self.run_store else {
            return Ok(());
        };
        store.persist(snapshot)?;
        store.append_engine_log(&snapshot.run_id, now, line)?;
        Ok(())
    }

    fn engine_log(&self, snapshot: &RunSnapshot, now: i64, line: String) -> Result<(), RunError> {
        match &self.run_store {
            Some(store) => Ok(store.append_engine_log(&snapshot.run_id, now, line)?),
            None => Ok(()),
        }
    }

    fn allocate_run_id(&self, now: i64) -> Result<String, RunError> {
        match &self.run_store {
            Some(store) => store.allocate_run_id(now),
            None => generate_run_id(now),
        }
        .map_err(|reason| RunError::RunId { reason })
    }
}

fn publish(
    snapshot: &mut RunSnapshot,
    step: &Step,
    value: Value,
    note: Option<String>,
) -> Result<(), RunError> {
    if !snapshot.output_log.publish(step.name().clone(), value) {
        return Err(RunError::DuplicatePublication {
            step: step.name().to_string(),
        });
    }
    if let Some(note) = note {
        snapshot.step_notes.insert(step.name().to_string(), note);
    }
    snapshot.clarification_response = None;
    Ok(())
}

fn coerce(plan: &Plan, schema: Option<&SchemaId>, raw: Value) -> Result<Value, RunError> {
    match schema {
        Some(schema) => Ok(plan.schemas().coerce(schema.as_str(), &raw)?),
        None => Ok(raw),
    }
}

fn transition(snapshot: &mut RunSnapshot, next: RunStatus, now: i64) -> Result<(), RunError> {
    if !snapshot.status.can_transition_to(next) {
        return Err(RunError::InvalidRunTransition {
            from: snapshot.status,
            to: next,
        });
    }
    snapshot.status = next;
    snapshot.updated_at = now;
    Ok(())
}

fn early_failure(snapshot: &RunSnapshot, error: RunError) -> RunFailure {
    RunFailure {
        run_id: snapshot.run_id.clone(),
        step: None,
        error,
        output_log: snapshot.output_log.clone(),
    }
}

fn now_secs() -> i64 {
    chrono::Utc::now().timestamp()
}
