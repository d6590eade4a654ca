mod support;

use planrun::config::{PlanDocument, Settings};
use planrun::engine::{
    FunctionRegistry, PlanRunner, RunError, RunRequest, RunStatus, RunStore, RunStoreError,
    ToolError, UserIdentity,
};
use planrun::shared::logging::engine_log_path;
use planrun::Plan;
use serde_json::{json, Map, Value};
use std::fs;
use support::{ScriptedModel, ScriptedTools};
use tempfile::tempdir;

const REVIEW_PLAN: &str = r#"
name: kb-reconcile
inputs:
  - name: project
    default: SUP
steps:
  - tool: { name: list_issues, tool: "portia:linear:list_issues", args: { project: "{{inputs.project}}" } }
  - tool: { name: match_articles, tool: "portia:notion:search", args: { q: "{{inputs.project}}" } }
  - user_input:
      name: approve
      prompt: "Create {{steps.list_issues.count}} articles?"
      options: ["create", "skip"]
  - if: steps.approve == "create"
  - tool: { name: create_articles, tool: "portia:notion:create", args: { count: "{{steps.list_issues.count}}" } }
  - endif: {}
  - tool: { name: notify, tool: "portia:slack:bot:send_message", args: { text: "done" } }
"#;

fn plan() -> Plan {
    PlanDocument::from_yaml("kb.yaml", REVIEW_PLAN)
        .expect("parse")
        .build(&FunctionRegistry::builtin())
        .expect("build")
}

fn tools() -> ScriptedTools {
    ScriptedTools::new(|call| match call.tool.as_str() {
        "portia:linear:list_issues" => Ok(json!({"count": 3})),
        "portia:notion:create" => Ok(json!({"created": call.args["count"]})),
        _ => Ok(json!({"ok": true})),
    })
}

#[test]
fn suspended_run_resumes_from_a_fresh_store_handle() {
    let temp = tempdir().expect("tempdir");
    let plan = plan();
    let tools = tools();
    let model = ScriptedModel::unused();

    let first = PlanRunner::new(&tools, &model).with_run_store(RunStore::new(temp.path()));
    let suspended = first
        .start(
            &plan,
            RunRequest {
                run_id: Some("run-kb-1".to_string()),
                inputs: Map::new(),
                identity: UserIdentity::new("u-7"),
            },
        )
        .expect("start")
        .suspended()
        .expect("suspended");
    assert_eq!(suspended.run_id(), "run-kb-1");

    let store = RunStore::new(temp.path());
    let persisted = store.load("run-kb-1").expect("load");
    assert_eq!(persisted.status, RunStatus::AwaitingInput);
    assert_eq!(persisted.position, 2);
    assert_eq!(persisted.plan_digest, plan.digest());
    assert_eq!(
        persisted.output_log.step_names(),
        vec!["list_issues", "match_articles"]
    );
    assert_eq!(
        persisted
            .pending_clarification
            .as_ref()
            .map(|c| c.prompt.as_str()),
        Some("Create 3 articles?")
    );

    let second = PlanRunner::new(&tools, &model).with_run_store(store.clone());
    let result = second
        .resume_stored(&plan, "run-kb-1", json!("create"))
        .expect("resume")
        .completed()
        .expect("completed");
    assert_eq!(
        result.output_log.step_names(),
        vec![
            "list_issues",
            "match_articles",
            "approve",
            "create_articles",
            "notify"
        ]
    );
    assert_eq!(result.output_log.get("create_articles"), Some(&json!({"created": 3})));

    let finished = store.load("run-kb-1").expect("reload");
    assert_eq!(finished.status, RunStatus::Completed);
    assert_eq!(
        finished.result.as_ref().map(|r| r.value.clone()),
        Some(json!({"ok": true}))
    );

    let log = fs::read_to_string(engine_log_path(temp.path())).expect("engine log");
    assert!(log.contains("run_id=run-kb-1 event=run_started plan=kb-reconcile"));
    assert!(log.contains("event=awaiting_input step=approve position=2"));
    assert!(log.contains("event=run_resumed position=2"));
    assert!(log.contains("event=step_published step=create_articles"));
    assert!(log.contains("event=run_completed published=5"));

    let again = second
        .resume_stored(&plan, "run-kb-1", json!("create"))
        .expect_err("completed runs cannot resume");
    assert!(matches!(
        again.error,
        RunError::NotAwaitingInput {
            status: RunStatus::Completed,
            ..
        }
    ));
}

#[test]
fn checkpoints_record_progress_after_each_step() {
    let temp = tempdir().expect("tempdir");
    let plan = plan();
    let tools = ScriptedTools::new(|call| match call.tool.as_str() {
        "portia:notion:search" => Err(ToolError::RemoteFailure("timeout".to_string())),
        _ => Ok(json!({"count": 1})),
    });
    let model = ScriptedModel::unused();
    let runner = PlanRunner::new(&tools, &model).with_run_store(RunStore::new(temp.path()));

    let failure = runner
        .start(
            &plan,
            RunRequest {
                run_id: Some("run-kb-2".to_string()),
                ..RunRequest::default()
            },
        )
        .expect_err("tool failure");
    assert_eq!(failure.output_log.step_names(), vec!["list_issues"]);

    let store = RunStore::new(temp.path());
    let snapshot = store.load("run-kb-2").expect("load");
    assert_eq!(snapshot.status, RunStatus::Failed);
    assert!(snapshot
        .terminal_reason
        .as_deref()
        .is_some_and(|reason| reason.contains("timeout")));
    assert_eq!(snapshot.output_log.step_names(), vec!["list_issues"]);
}

#[test]
fn generated_run_ids_are_listed_by_the_store() {
    let temp = tempdir().expect("tempdir");
    let plan = plan();
    let tools = tools();
    let model = ScriptedModel::unused();
    let settings = Settings {
        state_root: Some(temp.path().to_path_buf()),
        persist_checkpoints: false,
        ..Settings::default()
    };
    let runner = settings
        .configure_runner(PlanRunner::new(&tools, &model))
        .expect("configure");

    let suspended = runner
        .run(&plan, Map::new(), UserIdentity::new("u-1"))
        .expect("run")
        .suspended()
        .expect("suspended");
    assert!(suspended.run_id().starts_with("run-"));

    let runs = RunStore::new(temp.path()).list().expect("list");
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].run_id, suspended.run_id());
    assert_eq!(runs[0].identity.external_id, "u-1");
}

#[test]
fn resume_without_a_store_or_an_existing_run_fails() {
    let temp = tempdir().expect("tempdir");
    let plan = plan();
    let tools = tools();
    let model = ScriptedModel::unused();

    let detached = PlanRunner::new(&tools, &model);
    let failure = detached
        .resume_stored(&plan, "run-x", Value::Null)
        .expect_err("no store");
    assert!(matches!(failure.error, RunError::StoreNotConfigured));

    let attached = PlanRunner::new(&tools, &model).with_run_store(RunStore::new(temp.path()));
    let failure = attached
        .resume_stored(&plan, "run-x", Value::Null)
        .expect_err("missing run");
    assert!(matches!(
        failure.error,
        RunError::Store(RunStoreError::NotFound { .. })
    ));
}
