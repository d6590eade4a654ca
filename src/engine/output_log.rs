use crate::shared::ids::StepName;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub step: StepName,
    pub value: Value,
}

/// Append-only record of what each executed step published, in execution order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OutputLog {
    entries: Vec<LogEntry>,
}

impl OutputLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `false` without modifying the log if `step` already published.
    pub fn publish(&mut self, step: StepName, value: Value) -> bool {
        if self.contains(step.as_str()) {
            return false;
        }
        self.entries.push(LogEntry { step, value });
        true
    }

    pub fn get(&self, step: &str) -> Option<&Value> {
        self.entries
            .iter()
            .rev()
            .find(|entry| entry.step.as_str() == step)
            .map(|entry| &entry.value)
    }

    pub fn contains(&self, step: &str) -> bool {
        self.entries.iter().any(|entry| entry.step.as_str() == step)
    }

    pub fn last(&self) -> Option<&LogEntry> {
        self.entries.last()
    }

    pub fn iter(&self) -> impl Iterator<Item = &LogEntry> {
        self.entries.iter()
    }

    pub fn step_names(&self) -> Vec<&str> {
        self.entries.iter().map(|entry| entry.step.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn publish_is_append_only() {
        let mut log = OutputLog::new();
        let step = StepName::parse("fetch").expect("name");
        assert!(log.publish(step.clone(), json!(1)));
        assert!(!log.publish(step, json!(2)));
        assert_eq!(log.get("fetch"), Some(&json!(1)));
        assert_eq!(log.len(), 1);
    }
}
