use crate::shared::ids::FunctionId;
use serde_json::{Map, Number, Value};
use std::collections::BTreeMap;

/// Pure evaluation over resolved, named arguments.
pub type PureFn = fn(&Map<String, Value>) -> Result<Value, String>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FunctionArgDef {
    pub name: &'static str,
    pub required: bool,
    pub description: &'static str,
}

#[derive(Clone, Copy)]
pub struct FunctionDef {
    pub function_id: &'static str,
    pub description: &'static str,
    pub args: &'static [FunctionArgDef],
    /// Accept argument names outside `args`.
    pub open_args: bool,
    pub eval: PureFn,
}

impl std::fmt::Debug for FunctionDef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FunctionDef")
            .field("function_id", &self.function_id)
            .field("args", &self.args)
            .field("open_args", &self.open_args)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArgCheckError {
    UnknownFunction,
    Missing(String),
    Unexpected(String),
}

impl std::fmt::Display for ArgCheckError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnknownFunction => write!(f, "unknown function"),
            Self::Missing(arg) => write!(f, "missing argument `{arg}`"),
            Self::Unexpected(arg) => write!(f, "unexpected argument `{arg}`"),
        }
    }
}

const NO_ARGS: &[FunctionArgDef] = &[];

const ADD_ARGS: &[FunctionArgDef] = &[
    FunctionArgDef {
        name: "left",
        required: true,
        description: "Left operand",
    },
    FunctionArgDef {
        name: "right",
        required: true,
        description: "Right operand",
    },
];

const CONCAT_ARGS: &[FunctionArgDef] = &[
    FunctionArgDef {
        name: "left",
        required: true,
        description: "Leading text",
    },
    FunctionArgDef {
        name: "right",
        required: true,
        description: "Trailing text",
    },
    FunctionArgDef {
        name: "separator",
        required: false,
        description: "Inserted between the two parts",
    },
];

const LEN_ARGS: &[FunctionArgDef] = &[FunctionArgDef {
    name: "value",
    required: true,
    description: "List, string or record to measure",
}];

const BUILTIN_FUNCTIONS: &[FunctionDef] = &[
    FunctionDef {
        function_id: "object",
        description: "Return the arguments as one record",
        args: NO_ARGS,
        open_args: true,
        eval: eval_object,
    },
    FunctionDef {
        function_id: "math.add",
        description: "Add two numbers",
        args: ADD_ARGS,
        open_args: false,
        eval: eval_add,
    },
    FunctionDef {
        function_id: "math.mul",
        description: "Multiply two numbers",
        args: ADD_ARGS,
        open_args: false,
        eval: eval_mul,
    },
    FunctionDef {
        function_id: "text.concat",
        description: "Join two values as text",
        args: CONCAT_ARGS,
        open_args: false,
        eval: eval_concat,
    },
    FunctionDef {
        function_id: "list.len",
        description: "Count list items, string characters or record fields",
        args: LEN_ARGS,
        open_args: false,
        eval: eval_len,
    },
];

/// Catalog of the pure functions a plan's function steps may call.
#[derive(Debug, Clone)]
pub struct FunctionRegistry {
    defs: BTreeMap<String, FunctionDef>,
}

impl Default for FunctionRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

impl FunctionRegistry {
    pub fn empty() -> Self {
        Self {
            defs: BTreeMap::new(),
        }
    }

    pub fn builtin() -> Self {
        let mut registry = Self::empty();
        for def in BUILTIN_FUNCTIONS {
            registry.register(*def);
        }
        registry
    }

    /// Adds or replaces a definition.
    pub fn register(&mut self, def: FunctionDef) {
        self.defs.insert(def.function_id.to_string(), def);
    }

    pub fn get(&self, function_id: &str) -> Option<&FunctionDef> {
        self.defs.get(function_id)
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.defs.keys().map(String::as_str)
    }

    pub fn check_args<'a>(
        &self,
        function_id: &FunctionId,
        supplied: impl IntoIterator<Item = &'a str>,
    ) -> Result<(), ArgCheckError> {
        let def = self
            .get(function_id.as_str())
            .ok_or(ArgCheckError::UnknownFunction)?;
        let supplied: Vec<&str> = supplied.into_iter().collect();
        if let Some(missing) = def
            .args
            .iter()
            .find(|arg| arg.required && !supplied.contains(&arg.name))
        {
            return Err(ArgCheckError::Missing(missing.name.to_string()));
        }
        if !def.open_args {
            if let Some(extra) = supplied
                .iter()
                .find(|name| !def.args.iter().any(|arg| arg.name == **name))
            {
                return Err(ArgCheckError::Unexpected((*extra).to_string()));
            }
        }
        Ok(())
    }

    pub fn call(
        &self,
        function_id: &FunctionId,
        args: &Map<String, Value>,
    ) -> Result<Value, String> {
        let def = self
            .get(function_id.as_str())
            .ok_or_else(|| format!("unknown function `{function_id}`"))?;
        (def.eval)(args)
    }
}

fn eval_object(args: &Map<String, Value>) -> Result<Value, String> {
    Ok(Value::Object(args.clone()))
}

fn eval_add(args: &Map<String, Value>) -> Result<Value, String> {
    arithmetic(args, i64::checked_add, |a, b| a + b)
}

fn eval_mul(args: &Map<String, Value>) -> Result<Value, String> {
    arithmetic(args, i64::checked_mul, |a, b| a * b)
}

fn arithmetic(
    args: &Map<String, Value>,
    int_op: fn(i64, i64) -> Option<i64>,
    float_op: fn(f64, f64) -> f64,
) -> Result<Value, String> {
    let left = number_arg(args, "left")?;
    let right = number_arg(args, "right")?;
    if let (Some(a), Some(b)) = (left.as_i64(), right.as_i64()) {
        if let Some(result) = int_op(a, b) {
            return Ok(Value::from(result));
        }
    }
    let (Some(a), Some(b)) = (left.as_f64(), right.as_f64()) else {
        return Err("operands are not representable as numbers".to_string());
    };
    Number::from_f64(float_op(a, b))
        .map(Value::Number)
        .ok_or_else(|| "result is not a finite number".to_string())
}

fn number_arg<'a>(args: &'a Map<String, Value>, name: &str) -> Result<&'a Number, String> {
    match args.get(name) {
        Some(Value::Number(number)) => Ok(number),
        Some(other) => Err(format!("argument `{name}` must be a number, got {other}")),
        None => Err(format!("argument `{name}` is required")),
    }
}

fn eval_concat(args: &Map<String, Value>) -> Result<Value, String> {
    let text = |name: &str| {
        args.get(name)
            .map(crate::plan::template::value_to_text)
            .unwrap_or_default()
    };
    let separator = match args.get("separator") {
        None | Some(Value::Null) => String::new(),
        Some(_) => text("separator"),
    };
    Ok(Value::String(format!(
        "{}{separator}{}",
        text("left"),
        text("right")
    )))
}

fn eval_len(args: &Map<String, Value>) -> Result<Value, String> {
    match args.get("value") {
        Some(Value::Array(items)) => Ok(Value::from(items.len())),
        Some(Value::String(text)) => Ok(Value::from(text.chars().count())),
        Some(Value::Object(map)) => Ok(Value::from(map.len())),
        Some(Value::Null) => Ok(Value::from(0)),
        Some(other) => Err(format!("cannot take the length of {other}")),
        None => Err("argument `value` is required".to_string()),
    }
}
