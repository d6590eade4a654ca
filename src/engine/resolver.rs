use crate::engine::error::{RunError, UnresolvedReason};
use crate::engine::output_log::OutputLog;
use crate::plan::{Argument, Arguments, Plan, Reference, ReferenceTarget, Template};
use crate::shared::ids::StepName;
use serde_json::{Map, Value};
use std::collections::BTreeSet;

/// Binds caller-supplied run arguments to the plan's declared inputs.
///
/// Every declared input ends up bound, from the supplied value or its default.
/// Arguments that name no declared input are rejected.
pub fn bind_inputs(
    plan: &Plan,
    supplied: Map<String, Value>,
) -> Result<Map<String, Value>, RunError> {
    if let Some(unknown) = supplied.keys().find(|key| plan.input(key).is_none()) {
        return Err(RunError::UnknownInput {
            input: unknown.clone(),
        });
    }
    let mut supplied = supplied;
    let mut bound = Map::new();
    for input in plan.inputs() {
        let value = match supplied.remove(input.name.as_str()) {
            Some(value) => value,
            None => input.default.clone().ok_or_else(|| RunError::MissingInput {
                input: input.name.to_string(),
            })?,
        };
        bound.insert(input.name.to_string(), value);
    }
    Ok(bound)
}

/// Read-only view of one run's bindings. Published values are never mutated,
/// so resolving the same reference twice yields the same value.
#[derive(Debug, Clone, Copy)]
pub struct Resolver<'a> {
    inputs: &'a Map<String, Value>,
    log: &'a OutputLog,
    skipped: &'a BTreeSet<StepName>,
}

impl<'a> Resolver<'a> {
    pub fn new(
        inputs: &'a Map<String, Value>,
        log: &'a OutputLog,
        skipped: &'a BTreeSet<StepName>,
    ) -> Self {
        Self {
            inputs,
            log,
            skipped,
        }
    }

    pub fn lookup(&self, reference: &Reference) -> Result<&'a Value, RunError> {
        let unresolved = |reason| RunError::UnresolvedReference {
            reference: reference.to_string(),
            reason,
        };
        let root = match reference.target() {
            ReferenceTarget::Input(name) => self
                .inputs
                .get(name.as_str())
                .ok_or_else(|| unresolved(UnresolvedReason::UnboundInput))?,
            ReferenceTarget::Step(name) => match self.log.get(name.as_str()) {
                Some(value) => value,
                None if self.skipped.contains(name.as_str()) => {
                    return Err(unresolved(UnresolvedReason::Skipped))
                }
                None => return Err(unresolved(UnresolvedReason::NotExecuted)),
            },
        };
        reference
            .select(root)
            .ok_or_else(|| unresolved(UnresolvedReason::MissingField))
    }

    pub fn resolve(&self, reference: &Reference) -> Result<Value, RunError> {
        self.lookup(reference).cloned()
    }

    pub fn resolve_all(&self, references: &[Reference]) -> Result<Vec<Value>, RunError> {
        references.iter().map(|reference| self.resolve(reference)).collect()
    }

    pub fn render(&self, template: &Template) -> Result<String, RunError> {
        template.render(|reference| self.resolve(reference))
    }

    pub fn resolve_argument(&self, argument: &Argument) -> Result<Value, RunError> {
        match argument {
            Argument::Literal(value) => Ok(value.clone()),
            Argument::Reference(reference) => self.resolve(reference),
            Argument::Template(template) => self.render(template).map(Value::String),
        }
    }

    pub fn resolve_args(&self, args: &Arguments) -> Result<Map<String, Value>, RunError> {
        args.iter()
            .map(|(name, argument)| Ok((name.clone(), self.resolve_argument(argument)?)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fixture() -> (Map<String, Value>, OutputLog, BTreeSet<StepName>) {
        let mut inputs = Map::new();
        inputs.insert("repo".to_string(), json!("acme/api"));
        let mut log = OutputLog::new();
        log.publish(
            StepName::parse("analyze").expect("name"),
            json!({"issues_found": 12, "files": [{"path": "src/lib.rs"}]}),
        );
        let skipped = BTreeSet::from([StepName::parse("escalate").expect("name")]);
        (inputs, log, skipped)
    }

    fn reference(raw: &str) -> Reference {
        Reference::parse(raw).expect("reference")
    }

    #[test]
    fn resolves_fields_and_list_indices() {
        let (inputs, log, skipped) = fixture();
        let resolver = Resolver::new(&inputs, &log, &skipped);
        assert_eq!(
            resolver
                .resolve(&reference("steps.analyze.files.0.path"))
                .expect("path"),
            json!("src/lib.rs")
        );
        let template =
            Template::parse("Review {{inputs.repo}}: {{steps.analyze.issues_found}} issues")
                .expect("template");
        assert_eq!(
            resolver.render(&template).expect("render"),
            "Review acme/api: 12 issues"
        );
    }

    #[test]
    fn unresolved_references_carry_the_reason() {
        let (inputs, log, skipped) = fixture();
        let resolver = Resolver::new(&inputs, &log, &skipped);
        let reason = |raw: &str| match resolver.resolve(&reference(raw)) {
            Err(RunError::UnresolvedReference { reason, .. }) => reason,
            other => panic!("expected unresolved reference, got {other:?}"),
        };
        assert_eq!(reason("steps.escalate"), UnresolvedReason::Skipped);
        assert_eq!(reason("steps.report"), UnresolvedReason::NotExecuted);
        assert_eq!(reason("steps.analyze.severity"), UnresolvedReason::MissingField);
        assert_eq!(reason("inputs.branch"), UnresolvedReason::UnboundInput);
    }
}
