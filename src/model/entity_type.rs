use once_cell::sync::OnceCell;
use serde_json::Value;

use crate::error::{MetadataError, PathError};
use crate::model::{EntityRecord, FieldDescriptor, KeyKind, KeyScalar, KeyValue, RuntimeType, WireEntityType};

/// One key field with its value reader resolved up front.
#[derive(Debug, Clone)]
pub struct KeyField {
    name: String,
    kind: KeyKind,
    read: fn(&Value) -> Option<KeyScalar>,
}

impl KeyField {
    fn new(descriptor: &FieldDescriptor) -> Self {
        Self {
            name: descriptor.name.clone(),
            kind: descriptor.kind,
            read: descriptor.kind.json_reader(),
        }
    }

    fn extract(&self, entity: &EntityRecord) -> Result<KeyScalar, MetadataError> {
        let value = entity
            .get(&self.name)
            .ok_or_else(|| MetadataError::KeyPropertyMissing {
                runtime_type: entity.runtime_type.clone(),
                property: self.name.clone(),
            })?;
        (self.read)(value).ok_or_else(|| MetadataError::KeyPropertyInvalid {
            runtime_type: entity.runtime_type.clone(),
            property: self.name.clone(),
            expected: self.kind.wire_type_name().to_string(),
        })
    }
}

/// Key extraction specialised to the shape of an entity type's key.
///
/// Callers must only pass entities whose runtime type is (or derives from) the
/// type the extractor was built for; conformance is not re-checked here.
#[derive(Debug, Clone)]
pub enum KeyExtractor {
    Single(KeyField),
    Composite(Vec<KeyField>),
}

impl KeyExtractor {
    fn build(key_properties: &[FieldDescriptor]) -> Self {
        match key_properties {
            [single] => KeyExtractor::Single(KeyField::new(single)),
            many => KeyExtractor::Composite(many.iter().map(KeyField::new).collect()),
        }
    }

    pub fn extract(&self, entity: &EntityRecord) -> Result<KeyValue, MetadataError> {
        match self {
            KeyExtractor::Single(field) => field.extract(entity).map(KeyValue::Single),
            KeyExtractor::Composite(fields) => fields
                .iter()
                .map(|field| field.extract(entity))
                .collect::<Result<Vec<_>, _>>()
                .map(KeyValue::Composite),
        }
    }
}

/// Metadata for one logical entity type.
#[derive(Debug)]
pub struct EntityTypeMetadata {
    wire_type: WireEntityType,
    runtime_type: RuntimeType,
    base_runtime_type: Option<RuntimeType>,
    key_properties: Vec<FieldDescriptor>,
    key_extractor: OnceCell<KeyExtractor>,
}

impl EntityTypeMetadata {
    pub(crate) fn new(
        wire_type: WireEntityType,
        runtime_type: RuntimeType,
        base_runtime_type: Option<RuntimeType>,
        key_properties: Vec<FieldDescriptor>,
    ) -> Result<Self, MetadataError> {
        if key_properties.is_empty() {
            return Err(MetadataError::MissingKey {
                entity_type: wire_type.qualified_name(),
            });
        }

        Ok(Self {
            wire_type,
            runtime_type,
            base_runtime_type,
            key_properties,
            key_extractor: OnceCell::new(),
        })
    }

    pub fn runtime_type(&self) -> &RuntimeType {
        &self.runtime_type
    }

    pub fn base_runtime_type(&self) -> Option<&RuntimeType> {
        self.base_runtime_type.as_ref()
    }

    pub fn wire_type(&self) -> &WireEntityType {
        &self.wire_type
    }

    pub fn wire_name(&self) -> String {
        self.wire_type.qualified_name()
    }

    pub fn key_properties(&self) -> &[FieldDescriptor] {
        &self.key_properties
    }

    pub fn count_key_properties(&self) -> usize {
        self.key_properties.len()
    }

    /// The key property of a single-key type
    pub fn single_key_property(&self) -> Option<&FieldDescriptor> {
        match self.key_properties.as_slice() {
            [single] => Some(single),
            _ => None,
        }
    }

    /// The key extractor, built on first use and reused afterwards.
    pub fn key_extractor(&self) -> &KeyExtractor {
        self.key_extractor
            .get_or_init(|| KeyExtractor::build(&self.key_properties))
    }

    pub fn extract_key(&self, entity: &EntityRecord) -> Result<KeyValue, MetadataError> {
        self.key_extractor().extract(entity)
    }

    /// Types the raw key literals of a resource path against this type's key.
    ///
    /// Accepts either a single positional literal (`Projects(7)`) or named
    /// literals in any order (`Memberships(ProjectId=1,UserId=2)`).
    pub fn parse_key(&self, literals: &[(Option<String>, String)]) -> Result<KeyValue, PathError> {
        if literals.len() != self.key_properties.len() {
            return Err(PathError::KeyArity {
                entity_type: self.wire_name(),
                expected: self.key_properties.len(),
                actual: literals.len(),
            });
        }

        if let ([(None, literal)], Some(key)) = (literals, self.single_key_property()) {
            return key.kind.parse_literal(literal).map(KeyValue::Single);
        }

        let mut values = self
            .key_properties
            .iter()
            .map(|key| {
                let (_, literal) = literals
                    .iter()
                    .find(|(name, _)| name.as_deref() == Some(key.name.as_str()))
                    .ok_or_else(|| PathError::MalformedKey(key.name.clone()))?;
                key.kind.parse_literal(literal)
            })
            .collect::<Result<Vec<_>, _>>()?;

        if values.len() == 1 {
            if let Some(single) = values.pop() {
                return Ok(KeyValue::Single(single));
            }
        }
        Ok(KeyValue::Composite(values))
    }
}
