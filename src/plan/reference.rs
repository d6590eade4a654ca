use crate::shared::ids::{InputName, StepName};
use crate::shared::serde_ext::parse_via_string;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

const INPUTS_PREFIX: &str = "inputs";
const STEPS_PREFIX: &str = "steps";

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ReferenceTarget {
    Input(InputName),
    Step(StepName),
}

/// A symbolic pointer to a plan input or to the output a prior step published,
/// optionally drilling into that value by field name or list index.
///
/// Written as `inputs.<name>[.<field>...]` or `steps.<name>[.<field>...]`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Reference {
    target: ReferenceTarget,
    path: Vec<String>,
}

impl Reference {
    pub fn input(name: InputName) -> Self {
        Self {
            target: ReferenceTarget::Input(name),
            path: Vec::new(),
        }
    }

    pub fn step(name: StepName) -> Self {
        Self {
            target: ReferenceTarget::Step(name),
            path: Vec::new(),
        }
    }

    pub fn field(mut self, segment: impl Into<String>) -> Self {
        self.path.push(segment.into());
        self
    }

    pub fn parse(raw: &str) -> Result<Self, String> {
        let raw = raw.trim();
        let mut segments = raw.split('.');
        let root = segments.next().unwrap_or_default();
        let name = segments
            .next()
            .ok_or_else(|| format!("reference `{raw}` must name an input or a step"))?;
        let target = match root {
            INPUTS_PREFIX => ReferenceTarget::Input(InputName::parse(name)?),
            STEPS_PREFIX => ReferenceTarget::Step(StepName::parse(name)?),
            other => {
                return Err(format!(
                    "reference root must be `{INPUTS_PREFIX}` or `{STEPS_PREFIX}`, got `{other}`"
                ))
            }
        };
        let mut path = Vec::new();
        for segment in segments {
            if segment.is_empty() {
                return Err(format!("reference `{raw}` has an empty field segment"));
            }
            path.push(segment.to_string());
        }
        Ok(Self { target, path })
    }

    pub fn target(&self) -> &ReferenceTarget {
        &self.target
    }

    pub fn path(&self) -> &[String] {
        &self.path
    }

    pub fn step_name(&self) -> Option<&StepName> {
        match &self.target {
            ReferenceTarget::Step(name) => Some(name),
            ReferenceTarget::Input(_) => None,
        }
    }

    pub fn input_name(&self) -> Option<&InputName> {
        match &self.target {
            ReferenceTarget::Input(name) => Some(name),
            ReferenceTarget::Step(_) => None,
        }
    }

    /// Walks `path` into `root`. Numeric segments index lists.
    pub fn select<'a>(&self, root: &'a Value) -> Option<&'a Value> {
        let mut current = root;
        for segment in &self.path {
            current = match current {
                Value::Object(map) => map.get(segment)?,
                Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
                _ => return None,
            };
        }
        Some(current)
    }
}

impl std::fmt::Display for Reference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.target {
            ReferenceTarget::Input(name) => write!(f, "{INPUTS_PREFIX}.{name}")?,
            ReferenceTarget::Step(name) => write!(f, "{STEPS_PREFIX}.{name}")?,
        }
        for segment in &self.path {
            write!(f, ".{segment}")?;
        }
        Ok(())
    }
}

impl Serialize for Reference {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Reference {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        parse_via_string(deserializer, "reference", Self::parse)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_input_and_step_references_with_paths() {
        let input = Reference::parse("inputs.ticket_id").expect("input ref");
        assert_eq!(input.input_name().map(InputName::as_str), Some("ticket_id"));
        assert!(input.path().is_empty());

        let step = Reference::parse("steps.analyze_ticket.escalation_needed").expect("step ref");
        assert_eq!(step.step_name().map(StepName::as_str), Some("analyze_ticket"));
        assert_eq!(step.path(), ["escalation_needed".to_string()]);
        assert_eq!(step.to_string(), "steps.analyze_ticket.escalation_needed");
    }

    #[test]
    fn rejects_malformed_references() {
        assert!(Reference::parse("ticket_id").is_err());
        assert!(Reference::parse("outputs.a").is_err());
        assert!(Reference::parse("steps.a..b").is_err());
        assert!(Reference::parse("steps.bad name").is_err());
    }

    #[test]
    fn select_walks_objects_and_lists() {
        let value = json!({"files": [{"path": "a.py"}, {"path": "b.py"}]});
        let reference = Reference::parse("steps.tree.files.1.path").expect("ref");
        assert_eq!(reference.select(&value), Some(&json!("b.py")));
        let missing = Reference::parse("steps.tree.files.7.path").expect("ref");
        assert_eq!(missing.select(&value), None);
    }
}
