use std::sync::Arc;

use crate::model::{ContextType, EntityTypeMetadata, RuntimeType, WireEntitySet, WireNavigationProperty};

/// Position of an entity set within its container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EntitySetIndex(pub(crate) usize);

/// A relationship from one entity set to another via a navigation property.
#[derive(Debug, Clone)]
pub struct NavigationMetadata {
    property: WireNavigationProperty,
    target_entity_set: EntitySetIndex,
    target_name: String,
}

impl NavigationMetadata {
    pub(crate) fn new(
        property: WireNavigationProperty,
        target_entity_set: EntitySetIndex,
        target_name: String,
    ) -> Self {
        Self {
            property,
            target_entity_set,
            target_name,
        }
    }

    pub fn property(&self) -> &WireNavigationProperty {
        &self.property
    }

    pub fn name(&self) -> &str {
        &self.property.name
    }

    /// Index of the target set; resolve with `ContainerMetadata::entity_set_at`
    pub fn target_entity_set(&self) -> EntitySetIndex {
        self.target_entity_set
    }

    pub fn target_entity_set_name(&self) -> &str {
        &self.target_name
    }
}

/// One addressable collection of entities.
#[derive(Debug)]
pub struct EntitySetMetadata {
    name: String,
    context_type: ContextType,
    wire_set: WireEntitySet,
    element_type: Arc<EntityTypeMetadata>,
    element_type_hierarchy: Vec<Arc<EntityTypeMetadata>>,
    navigation_properties: Vec<NavigationMetadata>,
}

impl EntitySetMetadata {
    pub(crate) fn new(
        context_type: ContextType,
        wire_set: WireEntitySet,
        element_type: Arc<EntityTypeMetadata>,
        element_type_hierarchy: Vec<Arc<EntityTypeMetadata>>,
    ) -> Self {
        debug_assert!(element_type_hierarchy
            .iter()
            .any(|t| Arc::ptr_eq(t, &element_type)));

        Self {
            name: wire_set.name.clone(),
            context_type,
            wire_set,
            element_type,
            element_type_hierarchy,
            navigation_properties: Vec::new(),
        }
    }

    /// Wired once, during the second construction pass.
    pub(crate) fn set_navigation_properties(&mut self, navigation_properties: Vec<NavigationMetadata>) {
        self.navigation_properties = navigation_properties;
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn context_type(&self) -> &ContextType {
        &self.context_type
    }

    pub fn wire_set(&self) -> &WireEntitySet {
        &self.wire_set
    }

    pub fn element_type(&self) -> &Arc<EntityTypeMetadata> {
        &self.element_type
    }

    /// The element type plus every entity type deriving from it
    pub fn element_type_hierarchy(&self) -> &[Arc<EntityTypeMetadata>] {
        &self.element_type_hierarchy
    }

    pub fn navigation_properties(&self) -> &[NavigationMetadata] {
        &self.navigation_properties
    }

    pub fn find_navigation(&self, name: &str) -> Option<&NavigationMetadata> {
        self.navigation_properties.iter().find(|n| n.name() == name)
    }

    pub fn hierarchy_type(&self, runtime_type: &RuntimeType) -> Option<&Arc<EntityTypeMetadata>> {
        self.element_type_hierarchy
            .iter()
            .find(|t| t.runtime_type() == runtime_type)
    }

    /// Find a hierarchy member by wire name, with or without namespace and leading `#`
    pub fn hierarchy_type_by_wire_name(&self, wire_name: &str) -> Option<&Arc<EntityTypeMetadata>> {
        let wire_name = wire_name.trim_start_matches('#');
        self.element_type_hierarchy
            .iter()
            .find(|t| t.wire_name() == wire_name || t.wire_type().name == wire_name)
    }
}
