use log::{debug, info};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::error::MetadataError;
use crate::model::{
    name_key, ContainerMetadata, ContextType, EntitySetIndex, EntitySetMetadata, EntityTypeMetadata,
    NativeModel, NavigationMetadata, RuntimeType, WireModel,
};
use crate::store::traits::DataContext;

/// Build container metadata from a live data-access context.
pub fn build_container(context: &dyn DataContext) -> Result<ContainerMetadata, MetadataError> {
    let context_type = context.context_type();
    let unavailable = |e: anyhow::Error| MetadataError::SchemaUnavailable {
        context_type: context_type.clone(),
        message: format!("{:#}", e),
    };

    let native = context.native_model().map_err(unavailable)?;
    let exported = context.export_wire_model().map_err(unavailable)?;
    build_container_from(context_type.clone(), &native, &exported)
}

/// Join the native model and the exported wire model into one metadata graph.
///
/// The two models are independent: entity types are matched by name, and the
/// export's implementation annotations are never consulted. Any piece of the
/// graph that cannot be resolved fails the whole build.
pub fn build_container_from(
    context_type: ContextType,
    native: &NativeModel,
    exported: &WireModel,
) -> Result<ContainerMetadata, MetadataError> {
    // The exposed model must not leak storage-layer type identity.
    let mut wire_model = exported.clone();
    wire_model.strip_implementation_annotations();

    let native_container = &native.container;
    let wire_container = wire_model
        .find_container(&native_container.name)
        .ok_or_else(|| MetadataError::ContainerNotFound {
            name: native_container.name.clone(),
        })?
        .clone();

    // Entity types: one per wire type, with runtime type and key from the native model
    let mut entity_types = Vec::with_capacity(wire_model.entity_types.len());
    for wire_type in &wire_model.entity_types {
        let native_type = native
            .find_entity_type(&wire_type.name)
            .ok_or_else(|| MetadataError::NativeTypeNotFound {
                wire_type: wire_type.qualified_name(),
            })?;
        let runtime_type = native_type
            .runtime_type
            .clone()
            .ok_or_else(|| MetadataError::NativeTypeNotFound {
                wire_type: wire_type.qualified_name(),
            })?;

        entity_types.push(Arc::new(EntityTypeMetadata::new(
            wire_type.clone(),
            runtime_type,
            native_type.base_type.clone(),
            native_type.key_fields.clone(),
        )?));
    }

    // Navigation properties must point at a known entity type
    for entity_type in &entity_types {
        for property in entity_type.wire_type().declared_navigation_properties() {
            let known = entity_types
                .iter()
                .any(|t| t.wire_name() == property.target_type || t.wire_type().name == property.target_type);
            if !known {
                return Err(MetadataError::NavigationTypeNotFound {
                    entity_type: entity_type.wire_name(),
                    property: property.name.clone(),
                    target_type: property.target_type.clone(),
                });
            }
        }
    }

    // Entity sets, without navigation
    let mut entity_sets = Vec::with_capacity(native_container.entity_sets.len());
    let mut seen_sets = HashSet::new();
    for native_set in &native_container.entity_sets {
        if !seen_sets.insert(name_key(&native_set.name)) {
            return Err(MetadataError::DuplicateEntitySet {
                entity_set: native_set.name.clone(),
            });
        }
        let wire_set = wire_container
            .entity_sets
            .iter()
            .find(|s| name_key(&s.name) == name_key(&native_set.name))
            .ok_or_else(|| MetadataError::EntitySetNotExported {
                entity_set: native_set.name.clone(),
            })?;
        let element_type = entity_types
            .iter()
            .find(|t| t.wire_name() == wire_set.entity_type || t.wire_type().name == wire_set.entity_type)
            .cloned()
            .ok_or_else(|| MetadataError::ElementTypeNotFound {
                entity_set: wire_set.name.clone(),
                element_type: wire_set.entity_type.clone(),
            })?;
        let hierarchy = find_type_hierarchy(&element_type, &entity_types);

        entity_sets.push(EntitySetMetadata::new(
            context_type.clone(),
            wire_set.clone(),
            element_type,
            hierarchy,
        ));
    }

    // Second pass: navigation targets may point at any set, so all sets must exist first
    let set_indices: HashMap<String, EntitySetIndex> = entity_sets
        .iter()
        .enumerate()
        .map(|(i, set)| (name_key(set.name()), EntitySetIndex(i)))
        .collect();
    let set_names: Vec<String> = entity_sets.iter().map(|s| s.name().to_string()).collect();

    for entity_set in &mut entity_sets {
        let mut navigation = Vec::with_capacity(entity_set.wire_set().navigation_targets.len());
        for target in &entity_set.wire_set().navigation_targets {
            let target_index = *set_indices
                .get(&name_key(&target.target_entity_set))
                .ok_or_else(|| MetadataError::NavigationTargetNotFound {
                    entity_set: entity_set.name().to_string(),
                    property: target.navigation_property.clone(),
                    target: target.target_entity_set.clone(),
                })?;
            let property = entity_set
                .element_type_hierarchy()
                .iter()
                .flat_map(|t| t.wire_type().declared_navigation_properties())
                .find(|p| p.name == target.navigation_property)
                .cloned()
                .ok_or_else(|| MetadataError::NavigationPropertyNotFound {
                    entity_set: entity_set.name().to_string(),
                    property: target.navigation_property.clone(),
                })?;

            navigation.push(NavigationMetadata::new(
                property,
                target_index,
                set_names[target_index.0].clone(),
            ));
        }
        entity_set.set_navigation_properties(navigation);
    }

    // Mark the reconciled container as the default
    if !wire_model.set_default_container(&wire_container.name) {
        return Err(MetadataError::ContainerNotFound {
            name: wire_container.name.clone(),
        });
    }

    info!(
        "Built container metadata '{}.{}' for {}: {} entity types, {} entity sets",
        native_container.namespace,
        native_container.name,
        context_type,
        entity_types.len(),
        entity_sets.len()
    );

    Ok(ContainerMetadata::new(
        native_container.name.clone(),
        native_container.namespace.clone(),
        context_type,
        entity_types,
        entity_sets,
        wire_model,
    ))
}

/// Every entity type in `all` whose chain of native base types reaches `root`,
/// plus `root` itself, in the order of `all`.
fn find_type_hierarchy(
    root: &Arc<EntityTypeMetadata>,
    all: &[Arc<EntityTypeMetadata>],
) -> Vec<Arc<EntityTypeMetadata>> {
    let mut hierarchy: HashSet<&RuntimeType> = HashSet::from([root.runtime_type()]);

    // Keep adding types whose parent is already included until nothing changes
    loop {
        let derived: Vec<&RuntimeType> = all
            .iter()
            .filter(|t| !hierarchy.contains(t.runtime_type()))
            .filter(|t| t.base_runtime_type().map_or(false, |base| hierarchy.contains(base)))
            .map(|t| t.runtime_type())
            .collect();
        if derived.is_empty() {
            break;
        }
        hierarchy.extend(derived);
    }

    debug!(
        "Type hierarchy of {}: {} type(s)",
        root.runtime_type(),
        hierarchy.len()
    );

    all.iter()
        .filter(|t| hierarchy.contains(t.runtime_type()))
        .cloned()
        .collect()
}

/// Container metadata memoized per data-access context type.
#[derive(Debug, Default)]
pub struct ContainerMetadataCache {
    containers: Mutex<HashMap<ContextType, Arc<ContainerMetadata>>>,
}

impl ContainerMetadataCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the cached container for the context's type, building it on first use.
    pub fn get_or_build(&self, context: &dyn DataContext) -> Result<Arc<ContainerMetadata>, MetadataError> {
        let context_type = context.context_type();
        let mut containers = self.containers.lock();
        if let Some(container) = containers.get(&context_type) {
            return Ok(container.clone());
        }

        let container = Arc::new(build_container(context)?);
        containers.insert(context_type, container.clone());
        Ok(container)
    }

    pub fn get(&self, context_type: &ContextType) -> Option<Arc<ContainerMetadata>> {
        self.containers.lock().get(context_type).cloned()
    }
}
