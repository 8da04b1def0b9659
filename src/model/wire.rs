use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Annotations under this prefix describe the storage implementation and must
/// never appear in the externally visible model.
pub const IMPLEMENTATION_ANNOTATION_PREFIX: &str = "urn:entity-repo:internal:";

/// Annotation naming the runtime type behind a wire entity type.
pub const RUNTIME_TYPE_ANNOTATION: &str = "urn:entity-repo:internal:RuntimeType";

pub type Annotations = BTreeMap<String, String>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireProperty {
    pub name: String,
    #[serde(rename = "type")]
    pub type_name: String,
    pub nullable: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireNavigationProperty {
    pub name: String,
    /// Qualified name of the entity type on the other end
    pub target_type: String,
    /// True for collection-valued relationships
    pub many: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireEntityType {
    pub name: String,
    pub namespace: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_type: Option<String>,
    /// Key property names; empty for derived types, which inherit the key
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub key: Vec<String>,
    pub properties: Vec<WireProperty>,
    pub navigation_properties: Vec<WireNavigationProperty>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: Annotations,
}

impl WireEntityType {
    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.namespace, self.name)
    }

    /// Navigation properties declared on this type, excluding inherited ones
    pub fn declared_navigation_properties(&self) -> &[WireNavigationProperty] {
        &self.navigation_properties
    }

    fn matches(&self, name: &str) -> bool {
        self.name == name || self.qualified_name() == name
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NavigationTarget {
    pub navigation_property: String,
    pub target_entity_set: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireEntitySet {
    pub name: String,
    /// Qualified name of the element type
    pub entity_type: String,
    pub navigation_targets: Vec<NavigationTarget>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: Annotations,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireContainer {
    pub name: String,
    pub namespace: String,
    pub entity_sets: Vec<WireEntitySet>,
    #[serde(default)]
    pub is_default: bool,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: Annotations,
}

/// Storage-agnostic schema used to describe the service to external callers.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct WireModel {
    pub entity_types: Vec<WireEntityType>,
    pub containers: Vec<WireContainer>,
}

impl WireModel {
    /// Find an entity type by simple or namespace-qualified name
    pub fn find_entity_type(&self, name: &str) -> Option<&WireEntityType> {
        self.entity_types.iter().find(|t| t.matches(name))
    }

    pub fn find_container(&self, name: &str) -> Option<&WireContainer> {
        self.containers.iter().find(|c| c.name == name)
    }

    pub fn default_container(&self) -> Option<&WireContainer> {
        self.containers.iter().find(|c| c.is_default)
    }

    /// Remove every implementation annotation from types, sets and containers.
    pub fn strip_implementation_annotations(&mut self) {
        fn strip(annotations: &mut Annotations) {
            annotations.retain(|key, _| !key.starts_with(IMPLEMENTATION_ANNOTATION_PREFIX));
        }

        for entity_type in &mut self.entity_types {
            strip(&mut entity_type.annotations);
        }
        for container in &mut self.containers {
            strip(&mut container.annotations);
            for entity_set in &mut container.entity_sets {
                strip(&mut entity_set.annotations);
            }
        }
    }

    /// Mark `name` as the default container; all others lose the flag.
    /// Returns false if no container has that name.
    pub fn set_default_container(&mut self, name: &str) -> bool {
        if self.find_container(name).is_none() {
            return false;
        }
        for container in &mut self.containers {
            container.is_default = container.name == name;
        }
        true
    }
}
