use planrun::app::command_handlers;
use planrun::config::load_global_settings;
use planrun::shared::logging::init_tracing;

fn run() -> Result<(), String> {
    let settings = load_global_settings().map_err(|err| err.to_string())?;
    init_tracing(&settings.log_filter);
    let args: Vec<String> = std::env::args().skip(1).collect();
    let output = command_handlers::run_cli_with_settings(args, &settings)?;
    println!("{output}");
    Ok(())
}

fn main() {
    if let Err(err) = run() {
        eprintln!("{err}");
        std::process::exit(1);
    }
}
