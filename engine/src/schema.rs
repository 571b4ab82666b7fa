//! Record schemas.
//!
//! A schema names the fields a record of one shape may carry. Field mappings
//! declare an input schema (the host record) and an output schema (the
//! remote resource) and are checked against both when they are built.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Field types supported in schemas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    String,
    Int,
    Float,
    Bool,
    /// ISO-8601 instant, carried as a string
    Timestamp,
    /// Calendar date, carried as a string
    Date,
    /// Array of strings
    StringList,
    /// Arbitrary nested JSON
    Json,
}

impl std::fmt::Display for FieldType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FieldType::String => write!(f, "String"),
            FieldType::Int => write!(f, "Int"),
            FieldType::Float => write!(f, "Float"),
            FieldType::Bool => write!(f, "Bool"),
            FieldType::Timestamp => write!(f, "Timestamp"),
            FieldType::Date => write!(f, "Date"),
            FieldType::StringList => write!(f, "StringList"),
            FieldType::Json => write!(f, "Json"),
        }
    }
}

/// Definition of a field in a record schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldDef {
    /// Field name
    pub name: String,
    /// Field type
    pub field_type: FieldType,
    /// Whether this field is required
    pub required: bool,
}

impl FieldDef {
    /// Create a new required field definition.
    pub fn required(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            required: true,
        }
    }

    /// Create a new optional field definition.
    pub fn optional(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            required: false,
        }
    }

    /// Validate a JSON value against this field definition.
    pub fn validate(&self, value: Option<&Value>) -> Result<()> {
        match value {
            None if self.required => Err(missing(&self.name)),
            None => Ok(()),
            Some(Value::Null) if self.required => Err(missing(&self.name)),
            Some(Value::Null) => Ok(()),
            Some(v) => self.validate_type(v),
        }
    }

    /// Check only the type of a present value.
    pub fn validate_type(&self, value: &Value) -> Result<()> {
        let valid = match self.field_type {
            FieldType::String | FieldType::Timestamp | FieldType::Date => value.is_string(),
            FieldType::Int => value.is_i64() || value.is_u64(),
            FieldType::Float => value.is_number(),
            FieldType::Bool => value.is_boolean(),
            FieldType::StringList => value
                .as_array()
                .is_some_and(|items| items.iter().all(Value::is_string)),
            FieldType::Json => true,
        };

        if valid {
            Ok(())
        } else {
            Err(Error::Validation(format!(
                "type mismatch for field '{}': expected {}, got {}",
                self.name,
                self.field_type,
                json_type_name(value)
            )))
        }
    }
}

fn missing(name: &str) -> Error {
    Error::Validation(format!("missing required field: {name}"))
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "Null",
        Value::Bool(_) => "Bool",
        Value::Number(n) if n.is_i64() || n.is_u64() => "Int",
        Value::Number(_) => "Float",
        Value::String(_) => "String",
        Value::Array(_) => "Array",
        Value::Object(_) => "Object",
    }
}

/// Schema for one record shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordSchema {
    /// Schema name, usually the resource or host model it describes
    pub name: String,
    /// Field definitions
    pub fields: Vec<FieldDef>,
}

impl RecordSchema {
    /// Create a new record schema.
    pub fn new(name: impl Into<String>, fields: Vec<FieldDef>) -> Self {
        Self {
            name: name.into(),
            fields,
        }
    }

    /// Get a field definition by name.
    pub fn field(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Names of the required fields.
    pub fn required_fields(&self) -> impl Iterator<Item = &str> {
        self.fields
            .iter()
            .filter(|f| f.required)
            .map(|f| f.name.as_str())
    }

    /// Validate a payload against this schema.
    ///
    /// Fields the schema does not declare are rejected so a mapping cannot
    /// leak host fields into a remote record.
    pub fn validate_payload(&self, payload: &Map<String, Value>) -> Result<()> {
        for field in &self.fields {
            field.validate(payload.get(&field.name))?;
        }

        if let Some(unknown) = payload.keys().find(|k| self.field(k).is_none()) {
            return Err(Error::Validation(format!(
                "field '{unknown}' is not part of schema '{}'",
                self.name
            )));
        }

        Ok(())
    }
}
