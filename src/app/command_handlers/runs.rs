use crate::config::Settings;

pub fn cmd_runs(args: &[String], settings: &Settings) -> Result<String, String> {
    if !args.is_empty() {
        return Err("usage: runs".to_string());
    }
    let store = settings.run_store().map_err(|err| err.to_string())?;
    let snapshots = store.list().map_err(|err| err.to_string())?;
    if snapshots.is_empty() {
        return Ok("no runs".to_string());
    }
    Ok(snapshots
        .iter()
        .map(|run| {
            format!(
                "{} plan={} status={} position={} published={}",
                run.run_id,
                run.plan_name,
                run.status,
                run.position,
                run.output_log.len()
            )
        })
        .collect::<Vec<_>>()
        .join("\n"))
}

pub fn cmd_show(args: &[String], settings: &Settings) -> Result<String, String> {
    let [run_id] = args else {
        return Err("usage: show <run_id>".to_string());
    };
    let store = settings.run_store().map_err(|err| err.to_string())?;
    let snapshot = store.load(run_id).map_err(|err| err.to_string())?;
    serde_json::to_string_pretty(&snapshot).map_err(|err| err.to_string())
}
