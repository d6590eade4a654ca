use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

pub fn engine_log_path(state_root: &Path) -> PathBuf {
    state_root.join("logs/engine.log")
}

pub fn append_engine_log_line(state_root: &Path, line: &str) -> std::io::Result<()> {
    let path = engine_log_path(state_root);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)?;
    writeln!(file, "{line}")
}

/// Installs the process-wide fmt subscriber. `RUST_LOG` wins over `default_filter`.
/// Calling it twice is harmless; the second install is ignored.
pub fn init_tracing(default_filter: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_filter))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}
