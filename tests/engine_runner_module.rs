mod support;

use planrun::config::PlanDocument;
use planrun::engine::{
    FunctionRegistry, ModelError, PlanRunner, RunError, RunOutcome, RunStatus, ToolError,
    UnresolvedReason, UserIdentity,
};
use planrun::Plan;
use serde_json::{json, Map, Value};
use support::{object, ScriptedModel, ScriptedTools};

fn plan(yaml: &str) -> Plan {
    PlanDocument::from_yaml("test.yaml", yaml)
        .expect("parse plan")
        .build(&FunctionRegistry::builtin())
        .expect("build plan")
}

fn identity() -> UserIdentity {
    UserIdentity::new("user-1").with_name("Test User")
}

const DOUBLING_PLAN: &str = r#"
name: doubling
inputs:
  - name: x
    default: 5
steps:
  - function:
      name: double
      function: math.mul
      args: { left: "{{inputs.x}}", right: 2 }
  - if: steps.double > 5
  - tool: { name: high, tool: "label:emit", args: { label: high } }
  - else: {}
  - tool: { name: low, tool: "label:emit", args: { label: low } }
  - endif: {}
"#;

#[test]
fn happy_path_takes_the_if_arm_and_returns_its_output() {
    let plan = plan(DOUBLING_PLAN);
    let tools = ScriptedTools::echo();
    let model = ScriptedModel::unused();
    let runner = PlanRunner::new(&tools, &model);

    let result = runner
        .run(&plan, Map::new(), identity())
        .expect("run")
        .completed()
        .expect("completed");

    assert_eq!(result.value, json!("high"));
    assert_eq!(result.output_log.step_names(), vec!["double", "high"]);
    assert_eq!(result.output_log.get("double"), Some(&json!(10)));
    assert_eq!(result.summary, None);
    assert_eq!(tools.called_steps(), vec!["high"]);
}

#[test]
fn else_arm_runs_when_the_condition_is_false() {
    let plan = plan(DOUBLING_PLAN);
    let tools = ScriptedTools::echo();
    let model = ScriptedModel::unused();
    let runner = PlanRunner::new(&tools, &model);

    let result = runner
        .run(&plan, object(json!({"x": 2})), identity())
        .expect("run")
        .completed()
        .expect("completed");

    assert_eq!(result.value, json!("low"));
    assert_eq!(result.output_log.step_names(), vec!["double", "low"]);
    assert!(!result.output_log.contains("high"));
}

#[test]
fn missing_required_input_fails_before_any_step() {
    let plan = plan(
        r#"
name: needs-y
inputs:
  - name: y
steps:
  - tool: { name: use_y, tool: "label:emit", args: { label: "{{inputs.y}}" } }
"#,
    );
    let tools = ScriptedTools::echo();
    let model = ScriptedModel::unused();
    let runner = PlanRunner::new(&tools, &model);

    let failure = runner
        .run(&plan, Map::new(), identity())
        .expect_err("missing input");
    assert!(matches!(failure.error, RunError::MissingInput { ref input } if input == "y"));
    assert!(failure.output_log.is_empty());
    assert!(failure.step.is_none());
    assert!(tools.calls().is_empty());

    let unknown = runner
        .run(&plan, object(json!({"y": 1, "z": 2})), identity())
        .expect_err("unknown input");
    assert!(matches!(unknown.error, RunError::UnknownInput { ref input } if input == "z"));
}

#[test]
fn nested_step_under_a_false_outer_branch_is_skipped() {
    let plan = plan(
        r#"
name: nested
inputs:
  - name: outer
  - name: inner
steps:
  - if: inputs.outer
  - tool: { name: outer_body, tool: "label:emit", args: { label: outer } }
  - if: inputs.inner
  - tool: { name: inner_body, tool: "label:emit", args: { label: inner } }
  - endif: {}
  - endif: {}
  - tool: { name: after, tool: "label:emit", args: { label: after } }
"#,
    );
    let tools = ScriptedTools::echo();
    let model = ScriptedModel::unused();
    let runner = PlanRunner::new(&tools, &model);

    let result = runner
        .run(
            &plan,
            object(json!({"outer": false, "inner": true})),
            identity(),
        )
        .expect("run")
        .completed()
        .expect("completed");
    assert_eq!(result.output_log.step_names(), vec!["after"]);

    let result = runner
        .run(&plan, object(json!({"outer": true, "inner": true})), identity())
        .expect("run")
        .completed()
        .expect("completed");
    assert_eq!(
        result.output_log.step_names(),
        vec!["outer_body", "inner_body", "after"]
    );
}

#[test]
fn reading_a_skipped_step_is_an_unresolved_reference() {
    let plan = plan(
        r#"
name: skipped-read
inputs:
  - name: escalate
steps:
  - tool: { name: fetch, tool: "label:emit", args: { label: ticket } }
  - if: inputs.escalate == true
  - tool: { name: escalation, tool: "label:emit", args: { label: paged } }
  - endif: {}
  - tool: { name: report, tool: "label:emit", args: { label: "{{steps.escalation}}" } }
  - tool: { name: never, tool: "label:emit", args: { label: never } }
"#,
    );
    let tools = ScriptedTools::echo();
    let model = ScriptedModel::unused();
    let runner = PlanRunner::new(&tools, &model);

    let failure = runner
        .run(&plan, object(json!({"escalate": false})), identity())
        .expect_err("skipped reference");
    assert!(matches!(
        failure.error,
        RunError::UnresolvedReference {
            reason: UnresolvedReason::Skipped,
            ..
        }
    ));
    assert_eq!(failure.step.as_ref().map(|s| s.as_str()), Some("report"));
    assert_eq!(failure.output_log.step_names(), vec!["fetch"]);
    assert_eq!(tools.called_steps(), vec!["fetch"]);
}

#[test]
fn predicate_over_a_skipped_step_is_fatal_not_false() {
    let plan = plan(
        r#"
name: skipped-predicate
steps:
  - if: "false"
  - tool: { name: marker, tool: "label:emit", args: { label: x } }
  - endif: {}
  - if: steps.marker == "x"
  - tool: { name: body, tool: "label:emit", args: { label: y } }
  - endif: {}
"#,
    );
    let tools = ScriptedTools::echo();
    let model = ScriptedModel::unused();
    let runner = PlanRunner::new(&tools, &model);

    let failure = runner
        .run(&plan, Map::new(), identity())
        .expect_err("predicate failure");
    assert!(matches!(
        failure.error,
        RunError::UnresolvedReference {
            reason: UnresolvedReason::Skipped,
            ..
        }
    ));
    assert!(failure.output_log.is_empty());
}

const APPROVAL_PLAN: &str = r#"
name: approval
steps:
  - tool: { name: s1, tool: "label:emit", args: { label: one } }
  - tool: { name: s2, tool: "label:emit", args: { label: two } }
  - tool: { name: s3, tool: "ask:approve", args: { change: "{{steps.s2}}" } }
  - tool: { name: s4, tool: "label:emit", args: { label: "{{steps.s3}}" } }
  - tool: { name: s5, tool: "label:emit", args: { label: five } }
"#;

fn approval_tools() -> ScriptedTools {
    ScriptedTools::new(|call| match call.tool.as_str() {
        "ask:approve" => match call.clarification_response {
            Some(answer) => Ok(answer.clone()),
            None => Err(ToolError::NeedsClarification {
                prompt: "Approve the change?".to_string(),
                options: Vec::new(),
            }),
        },
        _ => Ok(call.args.get("label").cloned().unwrap_or(Value::Null)),
    })
}

#[test]
fn clarification_suspends_and_resume_reenters_at_the_same_step() {
    let plan = plan(APPROVAL_PLAN);
    let tools = approval_tools();
    let model = ScriptedModel::unused();
    let runner = PlanRunner::new(&tools, &model);

    let suspended = runner
        .run(&plan, Map::new(), identity())
        .expect("run")
        .suspended()
        .expect("suspended");
    assert_eq!(suspended.output_log().step_names(), vec!["s1", "s2"]);
    assert_eq!(suspended.position(), 2);
    let clarification = suspended.clarification().expect("clarification");
    assert_eq!(clarification.step.as_str(), "s3");
    assert_eq!(clarification.prompt, "Approve the change?");
    assert_eq!(suspended.snapshot().status, RunStatus::AwaitingInput);

    let result = runner
        .resume(&plan, &suspended, json!("approved"))
        .expect("resume")
        .completed()
        .expect("completed");
    assert_eq!(
        result.output_log.step_names(),
        vec!["s1", "s2", "s3", "s4", "s5"]
    );
    assert_eq!(result.output_log.get("s4"), Some(&json!("approved")));
    assert_eq!(result.run_id, suspended.run_id());

    let s3_calls: Vec<_> = tools
        .calls()
        .into_iter()
        .filter(|call| call.step == "s3")
        .collect();
    assert_eq!(s3_calls.len(), 2);
    assert_eq!(s3_calls[0].clarification_response, None);
    assert_eq!(s3_calls[1].clarification_response, Some(json!("approved")));
    assert_eq!(s3_calls[1].args.get("change"), Some(&json!("two")));
    // the response is consumed by the step that asked for it
    assert!(tools
        .calls()
        .iter()
        .filter(|call| call.step == "s4" || call.step == "s5")
        .all(|call| call.clarification_response.is_none()));
}

#[test]
fn user_input_checks_the_response_against_options() {
    let plan = plan(
        r#"
name: confirm
inputs:
  - name: repo
    default: acme/api
steps:
  - user_input:
      name: confirm
      prompt: "Publish the review of {{inputs.repo}}?"
      options: ["yes", "no"]
  - if: steps.confirm == "yes"
  - tool: { name: publish, tool: "label:emit", args: { label: published } }
  - endif: {}
"#,
    );
    let tools = ScriptedTools::echo();
    let model = ScriptedModel::unused();
    let runner = PlanRunner::new(&tools, &model);

    let suspended = runner
        .run(&plan, Map::new(), identity())
        .expect("run")
        .suspended()
        .expect("suspended");
    let clarification = suspended.clarification().expect("clarification");
    assert_eq!(clarification.prompt, "Publish the review of acme/api?");
    assert_eq!(clarification.options, vec!["yes", "no"]);

    let rejected = runner
        .resume(&plan, &suspended, json!("maybe"))
        .expect_err("invalid response");
    assert!(matches!(
        rejected.error,
        RunError::InvalidClarificationResponse { .. }
    ));
    assert_eq!(suspended.snapshot().status, RunStatus::AwaitingInput);

    let result = runner
        .resume(&plan, &suspended, json!("yes"))
        .expect("resume")
        .completed()
        .expect("completed");
    assert_eq!(result.output_log.step_names(), vec!["confirm", "publish"]);
    assert_eq!(result.value, json!("published"));
}

#[test]
fn resume_refuses_a_different_plan() {
    let plan_a = plan(APPROVAL_PLAN);
    let plan_b = plan(&APPROVAL_PLAN.replace("label: five", "label: six"));
    let tools = approval_tools();
    let model = ScriptedModel::unused();
    let runner = PlanRunner::new(&tools, &model);

    let suspended = runner
        .run(&plan_a, Map::new(), identity())
        .expect("run")
        .suspended()
        .expect("suspended");
    let failure = runner
        .resume(&plan_b, &suspended, json!("approved"))
        .expect_err("digest mismatch");
    assert!(matches!(failure.error, RunError::PlanMismatch { .. }));
}

const TRIAGE_PLAN: &str = r#"
name: ticket-triage
inputs:
  - name: ticket_id
schemas:
  TicketAnalysis:
    priority: string
    escalation_needed: boolean
    issues_found: integer
steps:
  - tool:
      name: get_ticket
      tool: "portia:zendesk:tickets:read"
      args: { ticket_id: "{{inputs.ticket_id}}" }
  - llm:
      name: analyze_ticket
      task: "Analyze ticket {{inputs.ticket_id}}"
      context: [steps.get_ticket]
      output_schema: TicketAnalysis
  - if: steps.analyze_ticket.escalation_needed == true
  - tool:
      name: escalate
      tool: "portia:slack:bot:send_message"
      args: { text: "Escalating {{inputs.ticket_id}} ({{steps.analyze_ticket.priority}})" }
  - endif: {}
final_output:
  schema: TicketAnalysis
  from_step: analyze_ticket
  summarize: true
"#;

#[test]
fn conforming_model_output_is_published_unchanged_and_drives_branches() {
    let plan = plan(TRIAGE_PLAN);
    let tools = ScriptedTools::new(|call| match call.tool.as_str() {
        "portia:zendesk:tickets:read" => {
            Ok(json!({"id": call.args["ticket_id"], "subject": "SSO broken"}))
        }
        _ => Ok(json!({"sent": true})),
    });
    let analysis = json!({"priority": "high", "escalation_needed": true, "issues_found": 3});
    let expected = analysis.clone();
    let model = ScriptedModel::new(move |request| match request.step {
        Some(_) => Ok(analysis.clone()),
        None => Ok(json!("Ticket 42 escalated as high priority.")),
    });
    let runner = PlanRunner::new(&tools, &model);

    let result = runner
        .run(&plan, object(json!({"ticket_id": 42})), identity())
        .expect("run")
        .completed()
        .expect("completed");

    assert_eq!(result.output_log.get("analyze_ticket"), Some(&expected));
    assert_eq!(result.value, expected);
    assert_eq!(
        result.summary.as_deref(),
        Some("Ticket 42 escalated as high priority.")
    );
    let escalation = tools
        .calls()
        .into_iter()
        .find(|call| call.step == "escalate")
        .expect("escalation call");
    assert_eq!(escalation.args["text"], json!("Escalating 42 (high)"));

    let requests = model.requests();
    assert_eq!(requests[0].task, "Analyze ticket 42");
    assert_eq!(requests[0].output_schema.as_deref(), Some("TicketAnalysis"));
    assert_eq!(
        requests[0].context,
        vec![json!({"id": 42, "subject": "SSO broken"})]
    );
    assert_eq!(requests[1].step, None);
}

#[test]
fn nonconforming_model_output_aborts_the_run() {
    let plan = plan(TRIAGE_PLAN);
    let tools = ScriptedTools::echo();
    let model =
        ScriptedModel::new(|_| Ok(json!({"priority": "high", "escalation_needed": "maybe"})));
    let runner = PlanRunner::new(&tools, &model);

    let failure = runner
        .run(&plan, object(json!({"ticket_id": 7})), identity())
        .expect_err("schema failure");
    assert!(matches!(failure.error, RunError::SchemaValidation(_)));
    assert_eq!(failure.step.as_ref().map(|s| s.as_str()), Some("analyze_ticket"));
    assert_eq!(failure.output_log.step_names(), vec!["get_ticket"]);
    assert_eq!(model.requests().len(), 1);
}

#[test]
fn tool_failures_are_fatal_unless_the_step_is_best_effort() {
    let yaml = r#"
name: lookup
steps:
  - tool: { name: search_kb, tool: "portia:search", args: { q: sso }, best_effort: BEST_EFFORT }
  - tool: { name: reply, tool: "label:emit", args: { label: "{{steps.search_kb}}" } }
"#;
    let tools = ScriptedTools::new(|call| match call.tool.as_str() {
        "portia:search" => Err(ToolError::RemoteFailure("503".to_string())),
        _ => Ok(call.args.get("label").cloned().unwrap_or(Value::Null)),
    });
    let model = ScriptedModel::unused();
    let runner = PlanRunner::new(&tools, &model);

    let strict = plan(&yaml.replace("BEST_EFFORT", "false"));
    let failure = runner
        .run(&strict, Map::new(), identity())
        .expect_err("tool failure");
    assert!(matches!(
        failure.error,
        RunError::Tool {
            error: ToolError::RemoteFailure(_),
            ..
        }
    ));
    assert!(failure.output_log.is_empty());

    let lenient = plan(&yaml.replace("BEST_EFFORT", "true"));
    let result = runner
        .run(&lenient, Map::new(), identity())
        .expect("run")
        .completed()
        .expect("completed");
    assert_eq!(result.output_log.get("search_kb"), Some(&Value::Null));
    assert_eq!(result.output_log.step_names(), vec!["search_kb", "reply"]);
    assert_eq!(tools.called_steps(), vec!["search_kb", "search_kb", "reply"]);
}

#[test]
fn agent_task_passes_model_arguments_to_its_tool() {
    let plan = plan(
        r#"
name: agent
inputs:
  - name: channel
steps:
  - agent:
      name: notify
      task: "Tell {{inputs.channel}} the review is done"
      tool: "portia:slack:bot:send_message"
"#,
    );
    let tools = ScriptedTools::new(|_| Ok(json!({"ok": true})));
    let model = ScriptedModel::new(|request| {
        assert_eq!(
            request.target_tool.map(|tool| tool.as_str()),
            Some("portia:slack:bot:send_message")
        );
        Ok(json!({"channel": "#eng", "text": "done"}))
    });
    let runner = PlanRunner::new(&tools, &model);

    let result = runner
        .run(&plan, object(json!({"channel": "#eng"})), identity())
        .expect("run")
        .completed()
        .expect("completed");
    assert_eq!(result.value, json!({"ok": true}));
    assert_eq!(model.requests()[0].task, "Tell #eng the review is done");
    assert_eq!(
        tools.calls()[0].args,
        object(json!({"channel": "#eng", "text": "done"}))
    );

    let refusing = ScriptedModel::new(|_| Ok(json!("not arguments")));
    let runner = PlanRunner::new(&tools, &refusing);
    let failure = runner
        .run(&plan, object(json!({"channel": "#eng"})), identity())
        .expect_err("bad arguments");
    assert!(matches!(
        failure.error,
        RunError::Model(ModelError::SchemaMismatch(_))
    ));
}

#[test]
fn published_values_resolve_identically_for_every_reader() {
    let plan = plan(
        r#"
name: readers
steps:
  - tool: { name: source, tool: "data:fetch", args: {} }
  - function: { name: first, function: object, args: { value: "{{steps.source}}" } }
  - function: { name: second, function: object, args: { value: "{{steps.source}}" } }
"#,
    );
    let tools = ScriptedTools::new(|_| Ok(json!({"items": [1, 2, 3]})));
    let model = ScriptedModel::unused();
    let runner = PlanRunner::new(&tools, &model);

    let result = runner
        .run(&plan, Map::new(), identity())
        .expect("run")
        .completed()
        .expect("completed");
    assert_eq!(
        result.output_log.get("first"),
        result.output_log.get("second")
    );
    assert_eq!(
        result.output_log.get("first"),
        Some(&json!({"value": {"items": [1, 2, 3]}}))
    );
}

#[test]
fn concurrent_runs_share_one_plan() {
    let plan = plan(DOUBLING_PLAN);
    let tools = ScriptedTools::echo();
    let model = ScriptedModel::unused();

    let outcomes: Vec<(i64, Value)> = std::thread::scope(|scope| {
        let handles: Vec<_> = (0..8_i64)
            .map(|x| {
                let plan = &plan;
                let tools = &tools;
                let model = &model;
                scope.spawn(move || {
                    let runner = PlanRunner::new(tools, model);
                    let outcome = runner
                        .run(plan, object(json!({"x": x})), identity())
                        .expect("run");
                    match outcome {
                        RunOutcome::Completed(result) => (x, result.value),
                        RunOutcome::AwaitingInput(_) => panic!("unexpected suspension"),
                    }
                })
            })
            .collect();
        handles
            .into_iter()
            .map(|handle| handle.join().expect("join"))
            .collect()
    });

    for (x, value) in outcomes {
        let expected = if x * 2 > 5 { "high" } else { "low" };
        assert_eq!(value, json!(expected), "x = {x}");
    }
}
