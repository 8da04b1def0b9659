use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::model::RuntimeType;

/// Property name carrying the wire type of an entity in JSON payloads.
pub const TYPE_ANNOTATION: &str = "@odata.type";

/// An entity instance as held by a data-access context: its runtime type plus
/// the field values keyed by property name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityRecord {
    pub runtime_type: RuntimeType,
    pub fields: Map<String, Value>,
}

impl EntityRecord {
    pub fn new(runtime_type: RuntimeType) -> Self {
        Self {
            runtime_type,
            fields: Map::new(),
        }
    }

    /// Builder-style field assignment, mostly for seed data and tests
    pub fn with(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.fields.insert(field.to_string(), value.into());
        self
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    pub fn set(&mut self, field: &str, value: Value) {
        self.fields.insert(field.to_string(), value);
    }

    /// Overwrite fields present in `other`, keeping the rest.
    pub fn merge_from(&mut self, other: &Map<String, Value>) {
        for (name, value) in other {
            if name != TYPE_ANNOTATION {
                self.fields.insert(name.clone(), value.clone());
            }
        }
    }

    /// Render as a JSON object, tagged with its wire type name.
    pub fn to_json(&self, wire_type: &str) -> Value {
        let mut object = Map::with_capacity(self.fields.len() + 1);
        object.insert(TYPE_ANNOTATION.to_string(), Value::String(format!("#{}", wire_type)));
        for (name, value) in &self.fields {
            object.insert(name.clone(), value.clone());
        }
        Value::Object(object)
    }
}
