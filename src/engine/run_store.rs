use crate::engine::collaborators::{Clarification, ClarificationResponse, UserIdentity};
use crate::engine::control_flow::BranchStack;
use crate::engine::error::RunStoreError;
use crate::engine::output_log::OutputLog;
use crate::shared::fs_atomic::write_file_atomically;
use crate::shared::ids::{validate_identifier_value, StepName};
use crate::shared::logging::{append_engine_log_line, engine_log_path};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

const BASE36_ALPHABET: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";
const RUN_SUFFIX_SPACE: u32 = 36 * 36 * 36 * 36;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    AwaitingInput,
    Completed,
    Failed,
}

impl RunStatus {
    pub fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (RunStatus::Running, RunStatus::AwaitingInput)
                | (RunStatus::Running, RunStatus::Completed)
                | (RunStatus::Running, RunStatus::Failed)
                | (RunStatus::AwaitingInput, RunStatus::Running)
                | (RunStatus::AwaitingInput, RunStatus::Failed)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, RunStatus::Completed | RunStatus::Failed)
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunStatus::Running => write!(f, "running"),
            RunStatus::AwaitingInput => write!(f, "awaiting_input"),
            RunStatus::Completed => write!(f, "completed"),
            RunStatus::Failed => write!(f, "failed"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinalValue {
    pub value: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
}

/// Everything needed to continue a run in another process: bindings, the
/// output log, the branch stack and the position of the next node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSnapshot {
    pub run_id: String,
    pub plan_name: String,
    pub plan_digest: String,
    pub status: RunStatus,
    pub identity: UserIdentity,
    #[serde(default)]
    pub inputs: Map<String, Value>,
    #[serde(default)]
    pub output_log: OutputLog,
    #[serde(default)]
    pub skipped_steps: BTreeSet<StepName>,
    #[serde(default)]
    pub branch_stack: BranchStack,
    pub position: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending_clarification: Option<Clarification>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clarification_response: Option<ClarificationResponse>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub step_notes: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<FinalValue>,
    pub started_at: i64,
    pub updated_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub terminal_reason: Option<String>,
}

impl RunSnapshot {
    pub fn new(
        run_id: impl Into<String>,
        plan_name: impl Into<String>,
        plan_digest: impl Into<String>,
        identity: UserIdentity,
        inputs: Map<String, Value>,
        now: i64,
    ) -> Self {
        Self {
            run_id: run_id.into(),
            plan_name: plan_name.into(),
            plan_digest: plan_digest.into(),
            status: RunStatus::Running,
            identity,
            inputs,
            output_log: OutputLog::new(),
            skipped_steps: BTreeSet::new(),
            branch_stack: BranchStack::new(),
            position: 0,
            pending_clarification: None,
            clarification_response: None,
            step_notes: BTreeMap::new(),
            result: None,
            started_at: now,
            updated_at: now,
            terminal_reason: None,
        }
    }
}

/// File-backed run snapshots under `<state_root>/runs/<run_id>.json`.
#[derive(Debug, Clone)]
pub struct RunStore {
    state_root: PathBuf,
}

impl RunStore {
    pub fn new(state_root: impl Into<PathBuf>) -> Self {
        Self {
            state_root: state_root.into(),
        }
    }

    pub fn state_root(&self) -> &Path {
        &self.state_root
    }

    pub fn persist(&self, snapshot: &RunSnapshot) -> Result<(), RunStoreError> {
        let path = self.snapshot_path(&snapshot.run_id)?;
        let body = serde_json::to_vec_pretty(snapshot).map_err(|e| json_error(&path, e))?;
        write_file_atomically(&path, &body).map_err(|e| io_error(&path, e))
    }

    pub fn load(&self, run_id: &str) -> Result<RunSnapshot, RunStoreError> {
        let path = self.snapshot_path(run_id)?;
        let raw = match fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                return Err(RunStoreError::NotFound {
                    run_id: run_id.to_string(),
                })
            }
            Err(err) => return Err(io_error(&path, err)),
        };
        serde_json::from_str(&raw).map_err(|e| json_error(&path, e))
    }

    pub fn exists(&self, run_id: &str) -> bool {
        self.snapshot_path(run_id).is_ok_and(|path| path.is_file())
    }

    /// All persisted snapshots, oldest first.
    pub fn list(&self) -> Result<Vec<RunSnapshot>, RunStoreError> {
        let dir = self.runs_dir();
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(io_error(&dir, err)),
        };
        let mut snapshots = Vec::new();
        for entry in entries {
            let path = entry.map_err(|e| io_error(&dir, e))?.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }
            let raw = fs::read_to_string(&path).map_err(|e| io_error(&path, e))?;
            let snapshot: RunSnapshot =
                serde_json::from_str(&raw).map_err(|e| json_error(&path, e))?;
            snapshots.push(snapshot);
        }
        snapshots.sort_by(|a, b| {
            a.started_at
                .cmp(&b.started_at)
                .then_with(|| a.run_id.cmp(&b.run_id))
        });
        Ok(snapshots)
    }

    pub fn append_engine_log(
        &self,
        run_id: &str,
        now: i64,
        message: impl AsRef<str>,
    ) -> Result<(), RunStoreError> {
        let line = format!("ts={now} run_id={run_id} {}", message.as_ref());
        append_engine_log_line(&self.state_root, &line)
            .map_err(|source| io_error(engine_log_path(&self.state_root).as_path(), source))
    }

    /// Draws `run-<base36 now>-<4 random chars>` until one is unused.
    pub fn allocate_run_id(&self, now: i64) -> Result<String, String> {
        for _ in 0..8 {
            let run_id = generate_run_id(now)?;
            if !self.exists(&run_id) {
                return Ok(run_id);
            }
        }
        Err("failed to allocate an unused run id after 8 attempts".to_string())
    }

    fn runs_dir(&self) -> PathBuf {
        self.state_root.join("runs")
    }

    /// Run ids become file names, so they are held to identifier rules.
    fn snapshot_path(&self, run_id: &str) -> Result<PathBuf, RunStoreError> {
        validate_run_id(run_id).map_err(|reason| RunStoreError::InvalidRunId {
            run_id: run_id.to_string(),
            reason,
        })?;
        Ok(self.runs_dir().join(format!("{run_id}.json")))
    }
}

pub fn validate_run_id(run_id: &str) -> Result<(), String> {
    validate_identifier_value("run id", run_id)
}

pub fn generate_run_id(now: i64) -> Result<String, String> {
    let timestamp =
        u64::try_from(now).map_err(|_| "run ids require a non-negative timestamp".to_string())?;
    let mut bytes = [0_u8; 4];
    getrandom::getrandom(&mut bytes)
        .map_err(|err| format!("failed to generate run id randomness: {err}"))?;
    let sample = u32::from_le_bytes(bytes) % RUN_SUFFIX_SPACE;
    Ok(format!(
        "run-{}-{}",
        base36_encode_u64(timestamp),
        base36_encode_fixed_u32(sample, 4)
    ))
}

fn base36_encode_u64(mut value: u64) -> String {
    if value == 0 {
        return "0".to_string();
    }
    let mut chars = Vec::new();
    while value > 0 {
        chars.push(BASE36_ALPHABET[(value % 36) as usize] as char);
        value /= 36;
    }
    chars.iter().rev().collect()
}

fn base36_encode_fixed_u32(mut value: u32, width: usize) -> String {
    let mut chars = vec!['0'; width];
    for slot in chars.iter_mut().rev() {
        *slot = BASE36_ALPHABET[(value % 36) as usize] as char;
        value /= 36;
    }
    chars.into_iter().collect()
}

fn io_error(path: &Path, source: std::io::Error) -> RunStoreError {
    RunStoreError::Io {
        path: path.display().to_string(),
        source,
    }
}

fn json_error(path: &Path, source: serde_json::Error) -> RunStoreError {
    RunStoreError::Json {
        path: path.display().to_string(),
        source,
    }
}
