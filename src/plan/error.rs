use crate::schema::SchemaError;

/// Raised while a plan is being assembled. A `Plan` value exists only after every
/// one of these checks has passed, so none of them can surface during a run.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum PlanError {
    #[error("invalid {kind} `{value}`: {reason}")]
    InvalidIdentifier {
        kind: &'static str,
        value: String,
        reason: String,
    },
    #[error("plan name must be non-empty")]
    EmptyPlanName,
    #[error("input `{input}` is declared more than once")]
    DuplicateInput { input: String },
    #[error("step name `{step}` is already used at position {first_at}")]
    DuplicateStep { step: String, first_at: usize },
    #[error("`else` at position {at} has no open `if`")]
    UnmatchedElse { at: usize },
    #[error("`if` opened at position {if_at} already has an `else` at position {else_at}")]
    DuplicateElse { if_at: usize, else_at: usize },
    #[error("`endif` at position {at} has no open `if`")]
    UnmatchedEndIf { at: usize },
    #[error("`if` opened at position {if_at} is never closed")]
    UnclosedBranch { if_at: usize },
    #[error("{location} references undeclared input `{input}`")]
    UnknownInput { location: String, input: String },
    #[error("{location} references step `{target}` which is declared later at position {target_at}")]
    ForwardReference {
        location: String,
        target: String,
        target_at: usize,
    },
    #[error("{location} references unknown step `{target}`")]
    UnknownStep { location: String, target: String },
    #[error(
        "{location} references step `{target}` from the opposite arm of the branch opened at position {if_at}"
    )]
    ExclusiveBranchReference {
        location: String,
        target: String,
        if_at: usize,
    },
    #[error("{location} references unknown schema `{schema}`")]
    UnknownSchema { location: String, schema: String },
    #[error("step `{step}` calls unknown function `{function}`")]
    UnknownFunction { step: String, function: String },
    #[error("step `{step}` is missing required argument `{arg}` for function `{function}`")]
    MissingFunctionArg {
        step: String,
        function: String,
        arg: String,
    },
    #[error("step `{step}` passes unknown argument `{arg}` to function `{function}`")]
    UnknownFunctionArg {
        step: String,
        function: String,
        arg: String,
    },
    #[error("invalid template in {location}: {reason}")]
    Template { location: String, reason: String },
    #[error("invalid condition `{source_text}`: {reason}")]
    Condition { source_text: String, reason: String },
    #[error("plan could not be serialized for digesting: {reason}")]
    Serialization { reason: String },
    #[error("schema registry is invalid: {0}")]
    Schema(#[from] SchemaError),
}

impl PlanError {
    pub(crate) fn invalid_identifier(kind: &'static str, value: &str, reason: String) -> Self {
        Self::InvalidIdentifier {
            kind,
            value: value.to_string(),
            reason,
        }
    }
}
