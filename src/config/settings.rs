use super::{default_global_config_path, default_state_root, ConfigError};
use crate::engine::{PlanRunner, RunStore};
use crate::shared::fs_atomic::write_file_atomically;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Settings {
    /// Where run snapshots and `logs/engine.log` live. Defaults to `~/.planrun`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state_root: Option<PathBuf>,
    /// Searched for plan files given by relative path.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plans_dir: Option<PathBuf>,
    #[serde(default = "default_log_filter")]
    pub log_filter: String,
    #[serde(default = "default_true")]
    pub persist_checkpoints: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            state_root: None,
            plans_dir: None,
            log_filter: default_log_filter(),
            persist_checkpoints: true,
        }
    }
}

fn default_log_filter() -> String {
    "info".to_string()
}

fn default_true() -> bool {
    true
}

impl Settings {
    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        serde_yaml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.log_filter.trim().is_empty() {
            return Err(ConfigError::Settings(
                "`log_filter` must be non-empty".to_string(),
            ));
        }
        if let Some(state_root) = &self.state_root {
            if !state_root.is_absolute() {
                return Err(ConfigError::Settings(
                    "`state_root` must be an absolute path".to_string(),
                ));
            }
        }
        if let Some(plans_dir) = &self.plans_dir {
            if plans_dir.as_os_str().is_empty() {
                return Err(ConfigError::Settings(
                    "`plans_dir` must be non-empty when set".to_string(),
                ));
            }
        }
        Ok(())
    }

    pub fn resolve_state_root(&self) -> Result<PathBuf, ConfigError> {
        match &self.state_root {
            Some(path) => Ok(path.clone()),
            None => default_state_root(),
        }
    }

    pub fn run_store(&self) -> Result<RunStore, ConfigError> {
        Ok(RunStore::new(self.resolve_state_root()?))
    }

    /// Attaches the configured run store and checkpoint policy to `runner`.
    pub fn configure_runner<'a>(
        &self,
        runner: PlanRunner<'a>,
    ) -> Result<PlanRunner<'a>, ConfigError> {
        Ok(runner
            .with_run_store(self.run_store()?)
            .with_checkpoints(self.persist_checkpoints))
    }

    /// Paths that do not exist as given are looked up under `plans_dir`.
    pub fn resolve_plan_path(&self, raw: &str) -> PathBuf {
        let direct = PathBuf::from(raw);
        if direct.is_absolute() || direct.exists() {
            return direct;
        }
        match &self.plans_dir {
            Some(dir) => dir.join(raw),
            None => direct,
        }
    }
}

/// Loads and validates the global settings. A missing file yields defaults.
pub fn load_global_settings() -> Result<Settings, ConfigError> {
    let path = default_global_config_path()?;
    let settings = match Settings::from_path(&path) {
        Ok(settings) => settings,
        Err(ConfigError::Read { source, .. }) if source.kind() == ErrorKind::NotFound => {
            Settings::default()
        }
        Err(err) => return Err(err),
    };
    settings.validate()?;
    Ok(settings)
}

pub fn save_settings(settings: &Settings, path: &Path) -> Result<(), ConfigError> {
    settings.validate()?;
    let body = serde_yaml::to_string(settings).map_err(|source| ConfigError::Encode {
        path: path.display().to_string(),
        source,
    })?;
    write_file_atomically(path, body.as_bytes()).map_err(|source| ConfigError::Write {
        path: path.display().to_string(),
        source,
    })
}
