use crate::config::{load_plan, Settings};
use crate::engine::FunctionRegistry;
use crate::plan::template::value_to_text;

pub fn cmd_validate(args: &[String], settings: &Settings) -> Result<String, String> {
    let [path] = args else {
        return Err("usage: validate <plan.yaml>".to_string());
    };
    let path = settings.resolve_plan_path(path);
    let plan = load_plan(&path, &FunctionRegistry::builtin()).map_err(|err| err.to_string())?;

    let mut lines = vec![
        format!("plan={}", plan.name()),
        format!("digest={}", plan.digest()),
    ];
    if !plan.description().is_empty() {
        lines.push(format!("description={}", plan.description()));
    }
    lines.push("inputs:".to_string());
    for input in plan.inputs() {
        let binding = match &input.default {
            Some(default) => format!("default={}", value_to_text(default)),
            None => "required".to_string(),
        };
        lines.push(format!("  {} ({binding})", input.name));
    }
    lines.push("nodes:".to_string());
    lines.extend(plan.outline());
    Ok(lines.join("\n"))
}
