use crate::app::cli::{help_text, parse_cli_verb, CliVerb};
use crate::config::Settings;

pub mod plans;
pub mod runs;

/// The binary loads settings itself so it can install tracing first.
pub fn run_cli_with_settings(args: Vec<String>, settings: &Settings) -> Result<String, String> {
    if args.is_empty() {
        return Ok(help_text());
    }

    match parse_cli_verb(args[0].as_str()) {
        CliVerb::Validate => plans::cmd_validate(&args[1..], settings),
        CliVerb::Runs => runs::cmd_runs(&args[1..], settings),
        CliVerb::Show => runs::cmd_show(&args[1..], settings),
        CliVerb::Help => Ok(help_text()),
        CliVerb::Unknown => Err(format!("unknown command `{}`", args[0])),
    }
}
