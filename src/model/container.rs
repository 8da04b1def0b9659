use std::collections::HashMap;
use std::sync::Arc;

use crate::model::{
    name_key, ContextType, EntitySetIndex, EntitySetMetadata, EntityTypeMetadata, NavigationMetadata,
    RuntimeType, WireModel,
};

/// All entity types and entity sets of one data-access context.
///
/// Built once by `logic::container_builder` and shared read-only afterwards.
#[derive(Debug)]
pub struct ContainerMetadata {
    name: String,
    namespace: String,
    context_type: ContextType,
    entity_types: Vec<Arc<EntityTypeMetadata>>,
    entity_sets: Vec<EntitySetMetadata>,
    wire_model: WireModel,
    sets_by_name: HashMap<String, EntitySetIndex>,
}

impl ContainerMetadata {
    pub(crate) fn new(
        name: String,
        namespace: String,
        context_type: ContextType,
        entity_types: Vec<Arc<EntityTypeMetadata>>,
        entity_sets: Vec<EntitySetMetadata>,
        wire_model: WireModel,
    ) -> Self {
        let sets_by_name = entity_sets
            .iter()
            .enumerate()
            .map(|(i, set)| (name_key(set.name()), EntitySetIndex(i)))
            .collect();

        Self {
            name,
            namespace,
            context_type,
            entity_types,
            entity_sets,
            wire_model,
            sets_by_name,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn context_type(&self) -> &ContextType {
        &self.context_type
    }

    pub fn entity_types(&self) -> &[Arc<EntityTypeMetadata>] {
        &self.entity_types
    }

    pub fn entity_sets(&self) -> &[EntitySetMetadata] {
        &self.entity_sets
    }

    /// The reconciled wire model, free of implementation annotations
    pub fn wire_model(&self) -> &WireModel {
        &self.wire_model
    }

    /// Case-insensitive lookup by entity set name
    pub fn get_entity_set(&self, name: &str) -> Option<&EntitySetMetadata> {
        self.sets_by_name
            .get(&name_key(name))
            .map(|index| self.entity_set_at(*index))
    }

    pub fn entity_set_at(&self, index: EntitySetIndex) -> &EntitySetMetadata {
        &self.entity_sets[index.0]
    }

    pub fn navigation_target(&self, navigation: &NavigationMetadata) -> &EntitySetMetadata {
        self.entity_set_at(navigation.target_entity_set())
    }

    /// Lookup by simple or namespace-qualified wire type name
    pub fn get_entity_type(&self, wire_name: &str) -> Option<&Arc<EntityTypeMetadata>> {
        self.entity_types
            .iter()
            .find(|t| t.wire_name() == wire_name || t.wire_type().name == wire_name)
    }

    pub fn get_entity_type_for(&self, runtime_type: &RuntimeType) -> Option<&Arc<EntityTypeMetadata>> {
        self.entity_types
            .iter()
            .find(|t| t.runtime_type() == runtime_type)
    }

    /// The entity set whose nominal element type is exactly `runtime_type`
    pub fn get_entity_set_for(&self, runtime_type: &RuntimeType) -> Option<&EntitySetMetadata> {
        self.entity_sets
            .iter()
            .find(|set| set.element_type().runtime_type() == runtime_type)
    }

    /// The entity set an instance of `runtime_type` lives in, walking up its
    /// native base types until a set's element type matches.
    pub fn find_entity_set_for_instance(&self, runtime_type: &RuntimeType) -> Option<&EntitySetMetadata> {
        let mut current = Some(runtime_type.clone());
        while let Some(candidate) = current {
            if let Some(set) = self.get_entity_set_for(&candidate) {
                return Some(set);
            }
            current = self
                .get_entity_type_for(&candidate)
                .and_then(|t| t.base_runtime_type().cloned());
        }
        None
    }
}
