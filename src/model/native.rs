use serde::{Deserialize, Serialize};

use crate::model::{ContextType, FieldDescriptor, RuntimeType};

/// The data-access context's own view of an entity type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NativeEntityType {
    /// Conceptual name, shared with the wire schema (e.g. "Project")
    pub name: String,

    /// Runtime type backing instances of this entity; `None` when the context
    /// has no runtime mapping for the conceptual type.
    pub runtime_type: Option<RuntimeType>,

    /// Runtime type of the native base entity, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_type: Option<RuntimeType>,

    /// Key fields in declaration order
    pub key_fields: Vec<FieldDescriptor>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NativeEntitySet {
    pub name: String,
    /// Conceptual name of the element type
    pub element_type: String,
}

/// The context's entity container. Its sets are the ones the service exposes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NativeContainer {
    pub name: String,
    pub namespace: String,
    pub entity_sets: Vec<NativeEntitySet>,
}

/// Storage-oriented schema exposed by a data-access context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NativeModel {
    pub context_type: ContextType,
    pub container: NativeContainer,
    pub entity_types: Vec<NativeEntityType>,
}

impl NativeModel {
    pub fn find_entity_type(&self, name: &str) -> Option<&NativeEntityType> {
        self.entity_types.iter().find(|t| t.name == name)
    }

    pub fn find_by_runtime_type(&self, runtime_type: &RuntimeType) -> Option<&NativeEntityType> {
        self.entity_types
            .iter()
            .find(|t| t.runtime_type.as_ref() == Some(runtime_type))
    }
}
