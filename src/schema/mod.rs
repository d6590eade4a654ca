//! Closed registry of record types that step and plan outputs are coerced into.

mod coerce;

use crate::shared::ids::SchemaId;
use crate::shared::serde_ext::parse_via_string;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SchemaError {
    #[error("unknown schema `{schema}`")]
    UnknownSchema { schema: String },
    #[error("schema `{schema}` is registered more than once")]
    DuplicateSchema { schema: String },
    #[error("schema `{schema}` field `{field}` refers to unknown schema `{target}`")]
    DanglingField {
        schema: String,
        field: String,
        target: String,
    },
    #[error("value does not match schema `{schema}` at `{path}`: {reason}")]
    Validation {
        schema: String,
        path: String,
        reason: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldType {
    String,
    Integer,
    Number,
    Boolean,
    Any,
    List(Box<FieldType>),
    Record(SchemaId),
}

impl FieldType {
    pub fn list(item: FieldType) -> Self {
        Self::List(Box::new(item))
    }

    pub fn parse(raw: &str) -> Result<Self, String> {
        let raw = raw.trim();
        if let Some(inner) = raw
            .strip_prefix("list<")
            .and_then(|rest| rest.strip_suffix('>'))
        {
            return Ok(Self::list(Self::parse(inner)?));
        }
        match raw {
            "string" => Ok(Self::String),
            "integer" => Ok(Self::Integer),
            "number" => Ok(Self::Number),
            "boolean" => Ok(Self::Boolean),
            "any" => Ok(Self::Any),
            other => SchemaId::parse(other)
                .map(Self::Record)
                .map_err(|err| format!("field type must be a builtin type or a schema id: {err}")),
        }
    }

    fn collect_records<'a>(&'a self, out: &mut Vec<&'a SchemaId>) {
        match self {
            Self::List(inner) => inner.collect_records(out),
            Self::Record(id) => out.push(id),
            _ => {}
        }
    }
}

impl std::fmt::Display for FieldType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::String => f.write_str("string"),
            Self::Integer => f.write_str("integer"),
            Self::Number => f.write_str("number"),
            Self::Boolean => f.write_str("boolean"),
            Self::Any => f.write_str("any"),
            Self::List(inner) => write!(f, "list<{inner}>"),
            Self::Record(id) => write!(f, "{id}"),
        }
    }
}

/// A field's type plus whether it may be absent. Written `string` or `string?`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldSpec {
    pub field_type: FieldType,
    pub required: bool,
}

impl FieldSpec {
    pub fn required(field_type: FieldType) -> Self {
        Self {
            field_type,
            required: true,
        }
    }

    pub fn optional(field_type: FieldType) -> Self {
        Self {
            field_type,
            required: false,
        }
    }

    pub fn parse(raw: &str) -> Result<Self, String> {
        let raw = raw.trim();
        match raw.strip_suffix('?') {
            Some(inner) => Ok(Self::optional(FieldType::parse(inner)?)),
            None => Ok(Self::required(FieldType::parse(raw)?)),
        }
    }
}

impl std::fmt::Display for FieldSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.field_type)?;
        if !self.required {
            f.write_str("?")?;
        }
        Ok(())
    }
}

impl Serialize for FieldSpec {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for FieldSpec {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        parse_via_string(deserializer, "field type", Self::parse)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecordSchema {
    id: SchemaId,
    fields: BTreeMap<String, FieldSpec>,
}

impl RecordSchema {
    pub fn new(id: SchemaId) -> Self {
        Self {
            id,
            fields: BTreeMap::new(),
        }
    }

    pub fn with_fields(id: SchemaId, fields: BTreeMap<String, FieldSpec>) -> Self {
        Self { id, fields }
    }

    pub fn field(mut self, name: impl Into<String>, field_type: FieldType) -> Self {
        self.fields
            .insert(name.into(), FieldSpec::required(field_type));
        self
    }

    pub fn optional_field(mut self, name: impl Into<String>, field_type: FieldType) -> Self {
        self.fields
            .insert(name.into(), FieldSpec::optional(field_type));
        self
    }

    pub fn id(&self) -> &SchemaId {
        &self.id
    }

    pub fn fields(&self) -> &BTreeMap<String, FieldSpec> {
        &self.fields
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct SchemaRegistry {
    records: BTreeMap<SchemaId, RecordSchema>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, schema: RecordSchema) -> Result<(), SchemaError> {
        if self.records.contains_key(schema.id()) {
            return Err(SchemaError::DuplicateSchema {
                schema: schema.id().to_string(),
            });
        }
        self.records.insert(schema.id().clone(), schema);
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<&RecordSchema> {
        self.records.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.records.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = &SchemaId> {
        self.records.keys()
    }

    /// Every nested record field must name a registered schema.
    pub fn check_links(&self) -> Result<(), SchemaError> {
        for schema in self.records.values() {
            for (field, spec) in schema.fields() {
                let mut targets = Vec::new();
                spec.field_type.collect_records(&mut targets);
                if let Some(missing) = targets.into_iter().find(|id| !self.contains(id.as_str())) {
                    return Err(SchemaError::DanglingField {
                        schema: schema.id().to_string(),
                        field: field.clone(),
                        target: missing.to_string(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Coerces an untrusted value into the record shape `id` describes.
    ///
    /// Fields not in the schema are dropped, absent optional fields become
    /// `null`, and a JSON object encoded as a string is decoded first. Anything
    /// that does not fit is rejected rather than degraded.
    pub fn coerce(&self, id: &str, raw: &Value) -> Result<Value, SchemaError> {
        let schema = self.get(id).ok_or_else(|| SchemaError::UnknownSchema {
            schema: id.to_string(),
        })?;
        coerce::coerce_record(self, schema, raw, "$")
    }
}
