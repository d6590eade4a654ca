use crate::engine::FunctionRegistry;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CliVerb {
    Validate,
    Runs,
    Show,
    Help,
    Unknown,
}

pub fn parse_cli_verb(input: &str) -> CliVerb {
    match input {
        "validate" => CliVerb::Validate,
        "runs" => CliVerb::Runs,
        "show" => CliVerb::Show,
        "help" | "--help" | "-h" => CliVerb::Help,
        _ => CliVerb::Unknown,
    }
}

pub fn cli_help_lines() -> Vec<String> {
    vec![
        "Commands:".to_string(),
        "  validate <plan.yaml>                 Build a plan file and print its outline".to_string(),
        "  runs                                 List persisted runs".to_string(),
        "  show <run_id>                        Print a persisted run snapshot".to_string(),
        "  help                                 Show this help".to_string(),
    ]
}

pub fn function_help_lines() -> Vec<String> {
    let registry = FunctionRegistry::builtin();
    registry
        .ids()
        .filter_map(|id| registry.get(id))
        .map(|def| format!("  {0:36} {1}", def.function_id, def.description))
        .collect()
}

pub(crate) fn help_text() -> String {
    let mut lines = cli_help_lines();
    lines.push(String::new());
    lines.push("Built-in plan functions:".to_string());
    lines.extend(function_help_lines());
    lines.join("\n")
}
