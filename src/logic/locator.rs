use crate::error::MetadataError;
use crate::model::{ContainerMetadata, EntityRecord, FieldDescriptor, KeyValue};

/// Render a key for use inside `Set(...)`.
///
/// Single keys render as the bare literal, composite keys as `Name=literal`
/// pairs in key declaration order.
pub fn key_literal(key: &KeyValue, key_properties: &[FieldDescriptor]) -> String {
    match key {
        KeyValue::Single(value) => value.to_uri_literal(),
        KeyValue::Composite(values) => key_properties
            .iter()
            .zip(values)
            .map(|(field, value)| format!("{}={}", field.name, value.to_uri_literal()))
            .collect::<Vec<_>>()
            .join(","),
    }
}

/// Relative path of one entity, e.g. `Projects(7)`
pub fn entity_path(entity_set: &str, key: &KeyValue, key_properties: &[FieldDescriptor]) -> String {
    format!("{}({})", entity_set, key_literal(key, key_properties))
}

/// Canonical path of a freshly created entity.
///
/// The owning set is found from the instance's runtime type, walking up its
/// base types, so derived instances resolve to the set of their root type.
pub fn created_entity_path(
    container: &ContainerMetadata,
    entity: &EntityRecord,
) -> Result<String, MetadataError> {
    let entity_set = container
        .find_entity_set_for_instance(&entity.runtime_type)
        .ok_or_else(|| MetadataError::NoEntitySetForType {
            runtime_type: entity.runtime_type.clone(),
        })?;
    let element_type = entity_set.element_type();
    let key = element_type.extract_key(entity)?;

    Ok(entity_path(entity_set.name(), &key, element_type.key_properties()))
}

/// Absolute locator for the `Location` header of a create response
pub fn created_entity_locator(
    container: &ContainerMetadata,
    service_root: &str,
    entity: &EntityRecord,
) -> Result<String, MetadataError> {
    let path = created_entity_path(container, entity)?;
    Ok(format!("{}/{}", service_root.trim_end_matches('/'), path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logic::container_builder::build_container;
    use crate::model::{KeyKind, KeyScalar};
    use crate::store::{ContextSchema, EntitySetSpec, EntityTypeSpec, MemoryStore};

    fn container() -> ContainerMetadata {
        let schema = ContextSchema::new("TrackerDb", "Tracker")
            .entity_type(EntityTypeSpec::new("Issue", "Tracker.Issue").key("Id", KeyKind::Int64))
            .entity_type(EntityTypeSpec::new("Defect", "Tracker.Defect").derives_from("Issue"))
            .entity_type(
                EntityTypeSpec::new("Assignment", "Tracker.Assignment")
                    .key("IssueId", KeyKind::Int64)
                    .key("Login", KeyKind::String),
            )
            .entity_set(EntitySetSpec::new("Issues", "Issue"))
            .entity_set(EntitySetSpec::new("Assignments", "Assignment"));
        build_container(&MemoryStore::new(schema)).unwrap()
    }

    #[test]
    fn test_composite_key_literal_names_each_part() {
        let fields = vec![
            FieldDescriptor::new("IssueId", KeyKind::Int64),
            FieldDescriptor::new("Login", KeyKind::String),
        ];
        let key = KeyValue::Composite(vec![KeyScalar::Int(3), KeyScalar::from("o'neil")]);
        assert_eq!(key_literal(&key, &fields), "IssueId=3,Login='o''neil'");
    }

    #[test]
    fn test_derived_instance_locates_under_root_set() {
        let container = container();
        let defect = EntityRecord::new("Tracker.Defect".into()).with("Id", 12);
        assert_eq!(
            created_entity_locator(&container, "http://localhost/odata/", &defect).unwrap(),
            "http://localhost/odata/Issues(12)"
        );
    }

    #[test]
    fn test_unknown_type_has_no_locator() {
        let container = container();
        let stray = EntityRecord::new("Tracker.Comment".into()).with("Id", 1);
        assert!(matches!(
            created_entity_path(&container, &stray),
            Err(MetadataError::NoEntitySetForType { .. })
        ));
    }
}
