use super::{FieldType, RecordSchema, SchemaError, SchemaRegistry};
use serde_json::{Map, Number, Value};

pub(super) fn coerce_record(
    registry: &SchemaRegistry,
    schema: &RecordSchema,
    raw: &Value,
    path: &str,
) -> Result<Value, SchemaError> {
    let decoded;
    let raw = match raw {
        Value::String(text) => {
            decoded = decode_embedded_object(text)
                .ok_or_else(|| mismatch(schema, path, "expected an object, got a string"))?;
            &decoded
        }
        other => other,
    };
    let Value::Object(object) = raw else {
        return Err(mismatch(
            schema,
            path,
            &format!("expected an object, got {}", kind_of(raw)),
        ));
    };

    let mut coerced = Map::new();
    for (name, spec) in schema.fields() {
        let field_path = format!("{path}.{name}");
        match object.get(name) {
            None | Some(Value::Null) if spec.required => {
                return Err(mismatch(schema, &field_path, "required field is missing"));
            }
            None | Some(Value::Null) => {
                coerced.insert(name.clone(), Value::Null);
            }
            Some(value) => {
                let value = coerce_value(registry, schema, &spec.field_type, value, &field_path)?;
                coerced.insert(name.clone(), value);
            }
        }
    }
    Ok(Value::Object(coerced))
}

fn coerce_value(
    registry: &SchemaRegistry,
    owner: &RecordSchema,
    field_type: &FieldType,
    value: &Value,
    path: &str,
) -> Result<Value, SchemaError> {
    match (field_type, value) {
        (FieldType::Any, value) => Ok(value.clone()),
        (FieldType::String, Value::String(_)) => Ok(value.clone()),
        (FieldType::Boolean, Value::Bool(_)) => Ok(value.clone()),
        (FieldType::Boolean, Value::String(text)) => match text.trim() {
            "true" => Ok(Value::Bool(true)),
            "false" => Ok(Value::Bool(false)),
            _ => Err(mismatch(owner, path, "expected a boolean")),
        },
        (FieldType::Integer, Value::Number(number)) => integer_from_number(number)
            .ok_or_else(|| mismatch(owner, path, "expected an integer")),
        (FieldType::Integer, Value::String(text)) => text
            .trim()
            .parse::<i64>()
            .map(Value::from)
            .map_err(|_| mismatch(owner, path, "expected an integer")),
        (FieldType::Number, Value::Number(_)) => Ok(value.clone()),
        (FieldType::Number, Value::String(text)) => text
            .trim()
            .parse::<f64>()
            .ok()
            .and_then(Number::from_f64)
            .map(Value::Number)
            .ok_or_else(|| mismatch(owner, path, "expected a number")),
        (FieldType::List(item), Value::Array(items)) => items
            .iter()
            .enumerate()
            .map(|(idx, item_value)| {
                coerce_value(registry, owner, item, item_value, &format!("{path}[{idx}]"))
            })
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array),
        (FieldType::Record(id), value) => {
            let nested = registry.get(id.as_str()).ok_or_else(|| SchemaError::UnknownSchema {
                schema: id.to_string(),
            })?;
            coerce_record(registry, nested, value, path)
        }
        (expected, other) => Err(mismatch(
            owner,
            path,
            &format!("expected {expected}, got {}", kind_of(other)),
        )),
    }
}

fn integer_from_number(number: &Number) -> Option<Value> {
    if number.is_i64() || number.is_u64() {
        return Some(Value::Number(number.clone()));
    }
    let float = number.as_f64()?;
    if float.fract() == 0.0 && float >= i64::MIN as f64 && float <= i64::MAX as f64 {
        return Some(Value::from(float as i64));
    }
    None
}

fn decode_embedded_object(text: &str) -> Option<Value> {
    let trimmed = text.trim();
    let trimmed = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|rest| rest.strip_suffix("```"))
        .unwrap_or(trimmed)
        .trim();
    if !trimmed.starts_with('{') {
        return None;
    }
    serde_json::from_str::<Value>(trimmed)
        .ok()
        .filter(Value::is_object)
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a list",
        Value::Object(_) => "an object",
    }
}

fn mismatch(schema: &RecordSchema, path: &str, reason: &str) -> SchemaError {
    SchemaError::Validation {
        schema: schema.id().to_string(),
        path: path.to_string(),
        reason: reason.to_string(),
    }
}
