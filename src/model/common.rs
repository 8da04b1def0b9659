use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use uuid::Uuid;

use crate::error::PathError;

/// Name of a native runtime type, e.g. `Scrum.Model.Project`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RuntimeType(String);

impl RuntimeType {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RuntimeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RuntimeType {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

/// Identity of a data-access context type. Container metadata is cached per context type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContextType(String);

impl ContextType {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContextType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lookup key for entity set and handler names, which compare case-insensitively.
pub fn name_key(name: &str) -> String {
    name.to_lowercase()
}

/// Primitive shapes a key field can take.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KeyKind {
    Int32,
    Int64,
    String,
    Guid,
    Boolean,
    DateTimeOffset,
}

impl KeyKind {
    pub fn wire_type_name(&self) -> &'static str {
        match self {
            KeyKind::Int32 => "Edm.Int32",
            KeyKind::Int64 => "Edm.Int64",
            KeyKind::String => "Edm.String",
            KeyKind::Guid => "Edm.Guid",
            KeyKind::Boolean => "Edm.Boolean",
            KeyKind::DateTimeOffset => "Edm.DateTimeOffset",
        }
    }

    /// Returns the JSON reader specialised for this kind.
    pub fn json_reader(&self) -> fn(&Value) -> Option<KeyScalar> {
        match self {
            KeyKind::Int32 => read_int32,
            KeyKind::Int64 => read_int64,
            KeyKind::String => read_string,
            KeyKind::Guid => read_guid,
            KeyKind::Boolean => read_bool,
            KeyKind::DateTimeOffset => read_datetime,
        }
    }

    /// Parses a key literal as it appears in a resource path, e.g. `7` or `'abc'`.
    pub fn parse_literal(&self, literal: &str) -> Result<KeyScalar, PathError> {
        let invalid = || PathError::InvalidKeyLiteral {
            literal: literal.to_string(),
            expected: self.wire_type_name().to_string(),
        };
        let literal = literal.trim();
        match self {
            KeyKind::Int32 => literal
                .parse::<i32>()
                .map(|v| KeyScalar::Int(v as i64))
                .map_err(|_| invalid()),
            KeyKind::Int64 => literal
                .trim_end_matches('L')
                .parse::<i64>()
                .map(KeyScalar::Int)
                .map_err(|_| invalid()),
            KeyKind::String => {
                let inner = literal
                    .strip_prefix('\'')
                    .and_then(|s| s.strip_suffix('\''))
                    .ok_or_else(invalid)?;
                Ok(KeyScalar::String(inner.replace("''", "'")))
            }
            KeyKind::Guid => {
                let inner = literal
                    .strip_prefix("guid'")
                    .and_then(|s| s.strip_suffix('\''))
                    .unwrap_or(literal);
                Uuid::parse_str(inner)
                    .map(KeyScalar::Guid)
                    .map_err(|_| invalid())
            }
            KeyKind::Boolean => match literal {
                "true" => Ok(KeyScalar::Bool(true)),
                "false" => Ok(KeyScalar::Bool(false)),
                _ => Err(invalid()),
            },
            KeyKind::DateTimeOffset => DateTime::parse_from_rfc3339(literal)
                .map(|dt| KeyScalar::DateTime(dt.with_timezone(&Utc)))
                .map_err(|_| invalid()),
        }
    }
}

fn read_int32(value: &Value) -> Option<KeyScalar> {
    value
        .as_i64()
        .filter(|v| i32::try_from(*v).is_ok())
        .map(KeyScalar::Int)
}

fn read_int64(value: &Value) -> Option<KeyScalar> {
    value.as_i64().map(KeyScalar::Int)
}

fn read_string(value: &Value) -> Option<KeyScalar> {
    value.as_str().map(|s| KeyScalar::String(s.to_string()))
}

fn read_guid(value: &Value) -> Option<KeyScalar> {
    value
        .as_str()
        .and_then(|s| Uuid::parse_str(s).ok())
        .map(KeyScalar::Guid)
}

fn read_bool(value: &Value) -> Option<KeyScalar> {
    value.as_bool().map(KeyScalar::Bool)
}

fn read_datetime(value: &Value) -> Option<KeyScalar> {
    value
        .as_str()
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| KeyScalar::DateTime(dt.with_timezone(&Utc)))
}

/// A single key field value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(untagged)]
pub enum KeyScalar {
    Int(i64),
    Bool(bool),
    Guid(Uuid),
    DateTime(DateTime<Utc>),
    String(String),
}

impl KeyScalar {
    /// Formats the value the way it appears inside a resource locator.
    pub fn to_uri_literal(&self) -> String {
        match self {
            KeyScalar::Int(v) => v.to_string(),
            KeyScalar::Bool(v) => v.to_string(),
            KeyScalar::Guid(v) => v.to_string(),
            KeyScalar::DateTime(v) => v.to_rfc3339(),
            KeyScalar::String(v) => format!("'{}'", v.replace('\'', "''")),
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            KeyScalar::Int(v) => Value::from(*v),
            KeyScalar::Bool(v) => Value::Bool(*v),
            KeyScalar::Guid(v) => Value::String(v.to_string()),
            KeyScalar::DateTime(v) => Value::String(v.to_rfc3339()),
            KeyScalar::String(v) => Value::String(v.clone()),
        }
    }
}

impl From<i64> for KeyScalar {
    fn from(value: i64) -> Self {
        KeyScalar::Int(value)
    }
}

impl From<&str> for KeyScalar {
    fn from(value: &str) -> Self {
        KeyScalar::String(value.to_string())
    }
}

/// Identity of an entity: a scalar for single-field keys, an ordered tuple otherwise.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(untagged)]
pub enum KeyValue {
    Single(KeyScalar),
    Composite(Vec<KeyScalar>),
}

impl KeyValue {
    pub fn values(&self) -> &[KeyScalar] {
        match self {
            KeyValue::Single(scalar) => std::slice::from_ref(scalar),
            KeyValue::Composite(values) => values,
        }
    }

    pub fn as_single(&self) -> Option<&KeyScalar> {
        match self {
            KeyValue::Single(scalar) => Some(scalar),
            KeyValue::Composite(_) => None,
        }
    }
}

impl From<KeyScalar> for KeyValue {
    fn from(value: KeyScalar) -> Self {
        KeyValue::Single(value)
    }
}

/// A key field as declared by the native schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDescriptor {
    pub name: String,
    pub kind: KeyKind,
}

impl FieldDescriptor {
    pub fn new(name: impl Into<String>, kind: KeyKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }
}
