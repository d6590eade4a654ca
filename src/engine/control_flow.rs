use crate::engine::error::RunError;
use crate::engine::resolver::Resolver;
use crate::plan::{CompareOp, Condition, Operand, Predicate};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Arm {
    Then,
    Else,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BranchFrame {
    pub opened_at: usize,
    /// `None` when an enclosing frame was already skipping; the condition is
    /// then never evaluated and neither arm runs.
    pub taken: Option<bool>,
    pub arm: Arm,
}

impl BranchFrame {
    fn executes(&self) -> bool {
        matches!(
            (self.taken, self.arm),
            (Some(true), Arm::Then) | (Some(false), Arm::Else)
        )
    }
}

/// One frame per open `if` on the current path. A step runs only when every
/// frame on the stack is executing its current arm.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BranchStack {
    frames: Vec<BranchFrame>,
}

impl BranchStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_active(&self) -> bool {
        self.frames.iter().all(BranchFrame::executes)
    }

    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    pub fn frames(&self) -> &[BranchFrame] {
        &self.frames
    }

    /// Pushes a frame for the `if` at `opened_at`, evaluating `condition` only
    /// when the enclosing path is active. Returns the decision, if one was made.
    pub fn enter_if(
        &mut self,
        opened_at: usize,
        condition: &Condition,
        resolver: &Resolver<'_>,
    ) -> Result<Option<bool>, RunError> {
        let taken = if self.is_active() {
            Some(evaluate_condition(condition, resolver)?)
        } else {
            None
        };
        self.frames.push(BranchFrame {
            opened_at,
            taken,
            arm: Arm::Then,
        });
        Ok(taken)
    }

    pub fn enter_else(&mut self) {
        if let Some(frame) = self.frames.last_mut() {
            frame.arm = Arm::Else;
        }
    }

    pub fn close(&mut self) {
        self.frames.pop();
    }
}

pub fn evaluate_condition(
    condition: &Condition,
    resolver: &Resolver<'_>,
) -> Result<bool, RunError> {
    evaluate(condition.predicate(), resolver).map_err(|err| match err {
        EvalError::Run(err) => err,
        EvalError::Type(reason) => RunError::Predicate {
            condition: condition.as_str().to_string(),
            reason,
        },
    })
}

enum EvalError {
    Run(RunError),
    Type(String),
}

impl From<RunError> for EvalError {
    fn from(value: RunError) -> Self {
        Self::Run(value)
    }
}

fn evaluate(predicate: &Predicate, resolver: &Resolver<'_>) -> Result<bool, EvalError> {
    match predicate {
        Predicate::Truthy(operand) => Ok(is_truthy(&operand_value(operand, resolver)?)),
        Predicate::Not(inner) => Ok(!evaluate(inner, resolver)?),
        Predicate::All(items) => {
            for item in items {
                if !evaluate(item, resolver)? {
                    return Ok(false);
                }
            }
            Ok(true)
        }
        Predicate::Any(items) => {
            for item in items {
                if evaluate(item, resolver)? {
                    return Ok(true);
                }
            }
            Ok(false)
        }
        Predicate::Compare { left, op, right } => {
            let left = operand_value(left, resolver)?;
            let right = operand_value(right, resolver)?;
            compare(&left, *op, &right).map_err(EvalError::Type)
        }
    }
}

fn operand_value(operand: &Operand, resolver: &Resolver<'_>) -> Result<Value, RunError> {
    match operand {
        Operand::Literal(value) => Ok(value.clone()),
        Operand::Reference(reference) => resolver.resolve(reference),
    }
}

fn compare(left: &Value, op: CompareOp, right: &Value) -> Result<bool, String> {
    match op {
        CompareOp::Eq => Ok(values_equal(left, right)),
        CompareOp::Ne => Ok(!values_equal(left, right)),
        CompareOp::Contains => contains(left, right),
        CompareOp::Gt | CompareOp::Ge | CompareOp::Lt | CompareOp::Le => {
            let ordering = order(left, right)
                .ok_or_else(|| format!("cannot order {left} against {right} with `{op}`"))?;
            Ok(match op {
                CompareOp::Gt => ordering == Ordering::Greater,
                CompareOp::Ge => ordering != Ordering::Less,
                CompareOp::Lt => ordering == Ordering::Less,
                _ => ordering != Ordering::Greater,
            })
        }
    }
}

fn values_equal(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => match (a.as_i64(), b.as_i64()) {
            (Some(a), Some(b)) => a == b,
            _ => a.as_f64() == b.as_f64(),
        },
        _ => left == right,
    }
}

fn order(left: &Value, right: &Value) -> Option<Ordering> {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => match (a.as_i64(), b.as_i64()) {
            (Some(a), Some(b)) => Some(a.cmp(&b)),
            _ => a.as_f64()?.partial_cmp(&b.as_f64()?),
        },
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        _ => None,
    }
}

fn contains(haystack: &Value, needle: &Value) -> Result<bool, String> {
    match (haystack, needle) {
        (Value::String(text), Value::String(part)) => Ok(text.contains(part.as_str())),
        (Value::Array(items), needle) => Ok(items.iter().any(|item| values_equal(item, needle))),
        (Value::Object(map), Value::String(key)) => Ok(map.contains_key(key)),
        _ => Err(format!("`contains` is not defined for {haystack} and {needle}")),
    }
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(flag) => *flag,
        Value::Number(number) => number.as_f64().is_some_and(|n| n != 0.0),
        Value::String(text) => !text.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}
