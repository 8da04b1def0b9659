use anyhow::{anyhow, bail, Result};
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashMap;

use crate::model::{
    name_key, Annotations, ContextType, EntityRecord, FieldDescriptor, KeyKind, KeyValue,
    NativeContainer, NativeEntitySet, NativeEntityType, NativeModel, NavigationTarget, RuntimeType,
    WireContainer, WireEntitySet, WireEntityType, WireModel, WireNavigationProperty, WireProperty,
    RUNTIME_TYPE_ANNOTATION,
};
use crate::store::traits::{DataContext, EntityStore};

#[derive(Debug, Clone)]
pub struct PropertySpec {
    pub name: String,
    pub type_name: String,
    pub nullable: bool,
}

#[derive(Debug, Clone)]
pub struct NavigationSpec {
    pub name: String,
    /// Simple name of the target entity type
    pub target_type: String,
    pub many: bool,
}

/// Declaration of one entity type of an in-memory context.
#[derive(Debug, Clone)]
pub struct EntityTypeSpec {
    pub name: String,
    pub runtime_type: RuntimeType,
    /// Simple name of the base entity type
    pub base: Option<String>,
    /// Declared on root types only; derived types inherit them
    pub keys: Vec<FieldDescriptor>,
    pub properties: Vec<PropertySpec>,
    pub navigations: Vec<NavigationSpec>,
}

impl EntityTypeSpec {
    pub fn new(name: &str, runtime_type: &str) -> Self {
        Self {
            name: name.to_string(),
            runtime_type: RuntimeType::new(runtime_type),
            base: None,
            keys: Vec::new(),
            properties: Vec::new(),
            navigations: Vec::new(),
        }
    }

    pub fn key(mut self, name: &str, kind: KeyKind) -> Self {
        self.keys.push(FieldDescriptor::new(name, kind));
        self.properties.push(PropertySpec {
            name: name.to_string(),
            type_name: kind.wire_type_name().to_string(),
            nullable: false,
        });
        self
    }

    pub fn property(mut self, name: &str, type_name: &str) -> Self {
        self.properties.push(PropertySpec {
            name: name.to_string(),
            type_name: type_name.to_string(),
            nullable: true,
        });
        self
    }

    pub fn navigation(mut self, name: &str, target_type: &str, many: bool) -> Self {
        self.navigations.push(NavigationSpec {
            name: name.to_string(),
            target_type: target_type.to_string(),
            many,
        });
        self
    }

    pub fn derives_from(mut self, base: &str) -> Self {
        self.base = Some(base.to_string());
        self
    }
}

#[derive(Debug, Clone)]
pub struct EntitySetSpec {
    pub name: String,
    /// Simple name of the element type
    pub element_type: String,
    pub navigation_targets: Vec<NavigationTarget>,
}

impl EntitySetSpec {
    pub fn new(name: &str, element_type: &str) -> Self {
        Self {
            name: name.to_string(),
            element_type: element_type.to_string(),
            navigation_targets: Vec::new(),
        }
    }

    pub fn target(mut self, navigation_property: &str, target_entity_set: &str) -> Self {
        self.navigation_targets.push(NavigationTarget {
            navigation_property: navigation_property.to_string(),
            target_entity_set: target_entity_set.to_string(),
        });
        self
    }
}

/// Full schema of an in-memory context.
#[derive(Debug, Clone)]
pub struct ContextSchema {
    pub context_type: ContextType,
    pub container_name: String,
    pub namespace: String,
    pub entity_types: Vec<EntityTypeSpec>,
    pub entity_sets: Vec<EntitySetSpec>,
}

impl ContextSchema {
    pub fn new(context_type: &str, namespace: &str) -> Self {
        Self {
            context_type: ContextType::new(context_type),
            container_name: context_type.to_string(),
            namespace: namespace.to_string(),
            entity_types: Vec::new(),
            entity_sets: Vec::new(),
        }
    }

    pub fn entity_type(mut self, spec: EntityTypeSpec) -> Self {
        self.entity_types.push(spec);
        self
    }

    pub fn entity_set(mut self, spec: EntitySetSpec) -> Self {
        self.entity_sets.push(spec);
        self
    }

    fn type_spec(&self, name: &str) -> Option<&EntityTypeSpec> {
        self.entity_types.iter().find(|t| t.name == name)
    }

    fn set_spec(&self, name: &str) -> Option<&EntitySetSpec> {
        let key = name_key(name);
        self.entity_sets.iter().find(|s| name_key(&s.name) == key)
    }

    fn qualified(&self, type_name: &str) -> String {
        format!("{}.{}", self.namespace, type_name)
    }

    /// Key fields of a type, taken from the root of its inheritance chain
    fn key_fields(&self, spec: &EntityTypeSpec) -> Vec<FieldDescriptor> {
        let mut current = spec;
        for _ in 0..self.entity_types.len() {
            match current.base.as_deref().and_then(|base| self.type_spec(base)) {
                Some(base) => current = base,
                None => break,
            }
        }
        current.keys.clone()
    }
}

type LinkKey = (String, KeyValue, String);

/// In-memory data context, used for the demo service and tests.
#[derive(Debug)]
pub struct MemoryStore {
    schema: ContextSchema,
    entities: RwLock<HashMap<String, Vec<EntityRecord>>>,
    links: RwLock<HashMap<LinkKey, Vec<KeyValue>>>,
}

impl MemoryStore {
    pub fn new(schema: ContextSchema) -> Self {
        Self {
            schema,
            entities: RwLock::new(HashMap::new()),
            links: RwLock::new(HashMap::new()),
        }
    }

    pub fn schema(&self) -> &ContextSchema {
        &self.schema
    }

    /// Insert seed data synchronously
    pub fn seed(&self, entity_set: &str, entity: EntityRecord) -> Result<EntityRecord> {
        self.insert_record(entity_set, entity)
    }

    pub fn seed_link(&self, entity_set: &str, key: KeyValue, navigation: &str, target: KeyValue) -> Result<()> {
        self.link_records(entity_set, &key, navigation, &target).map(|_| ())
    }

    fn set_spec(&self, entity_set: &str) -> Result<&EntitySetSpec> {
        self.schema
            .set_spec(entity_set)
            .ok_or_else(|| anyhow!("Unknown entity set '{}'", entity_set))
    }

    fn set_keys(&self, entity_set: &str) -> Result<Vec<FieldDescriptor>> {
        let set = self.set_spec(entity_set)?;
        let element = self
            .schema
            .type_spec(&set.element_type)
            .ok_or_else(|| anyhow!("Unknown element type '{}'", set.element_type))?;
        Ok(self.schema.key_fields(element))
    }

    fn key_of(keys: &[FieldDescriptor], entity: &EntityRecord) -> Option<KeyValue> {
        let mut values = keys
            .iter()
            .map(|field| entity.get(&field.name).and_then(|v| (field.kind.json_reader())(v)))
            .collect::<Option<Vec<_>>>()?;
        if values.len() == 1 {
            values.pop().map(KeyValue::Single)
        } else {
            Some(KeyValue::Composite(values))
        }
    }

    fn insert_record(&self, entity_set: &str, mut entity: EntityRecord) -> Result<EntityRecord> {
        let keys = self.set_keys(entity_set)?;
        let mut entities = self.entities.write();
        let records = entities.entry(name_key(entity_set)).or_default();

        if let [field] = keys.as_slice() {
            let generated = matches!(field.kind, KeyKind::Int32 | KeyKind::Int64)
                && entity.get(&field.name).map_or(true, Value::is_null);
            if generated {
                let next = records
                    .iter()
                    .filter_map(|r| r.get(&field.name).and_then(Value::as_i64))
                    .max()
                    .unwrap_or(0)
                    + 1;
                entity.set(&field.name, Value::from(next));
            }
        }

        let key = Self::key_of(&keys, &entity)
            .ok_or_else(|| anyhow!("Entity for '{}' is missing key values", entity_set))?;
        if records.iter().any(|r| Self::key_of(&keys, r).as_ref() == Some(&key)) {
            bail!("Entity with key {:?} already exists in '{}'", key, entity_set);
        }

        records.push(entity.clone());
        Ok(entity)
    }

    fn link_records(&self, entity_set: &str, key: &KeyValue, navigation: &str, target: &KeyValue) -> Result<bool> {
        let set = self.set_spec(entity_set)?;
        if !set.navigation_targets.iter().any(|t| t.navigation_property == navigation) {
            bail!("'{}' has no navigation property '{}'", set.name, navigation);
        }

        let mut links = self.links.write();
        let targets = links
            .entry((name_key(entity_set), key.clone(), navigation.to_string()))
            .or_default();
        if !targets.contains(target) {
            targets.push(target.clone());
        }
        Ok(true)
    }

    fn lookup(&self, entity_set: &str, key: &KeyValue) -> Result<Option<EntityRecord>> {
        let keys = self.set_keys(entity_set)?;
        let entities = self.entities.read();
        Ok(entities.get(&name_key(entity_set)).and_then(|records| {
            records
                .iter()
                .find(|r| Self::key_of(&keys, r).as_ref() == Some(key))
                .cloned()
        }))
    }
}

#[async_trait::async_trait]
impl EntityStore for MemoryStore {
    async fn list(&self, entity_set: &str) -> Result<Vec<EntityRecord>> {
        self.set_spec(entity_set)?;
        let entities = self.entities.read();
        Ok(entities.get(&name_key(entity_set)).cloned().unwrap_or_default())
    }

    async fn find(&self, entity_set: &str, key: &KeyValue) -> Result<Option<EntityRecord>> {
        self.lookup(entity_set, key)
    }

    async fn insert(&self, entity_set: &str, entity: EntityRecord) -> Result<EntityRecord> {
        self.insert_record(entity_set, entity)
    }

    async fn replace(
        &self,
        entity_set: &str,
        key: &KeyValue,
        mut entity: EntityRecord,
    ) -> Result<Option<EntityRecord>> {
        let keys = self.set_keys(entity_set)?;
        let mut entities = self.entities.write();
        let Some(records) = entities.get_mut(&name_key(entity_set)) else {
            return Ok(None);
        };
        let Some(existing) = records
            .iter_mut()
            .find(|r| Self::key_of(&keys, r).as_ref() == Some(key))
        else {
            return Ok(None);
        };

        // Key fields are immutable
        for (field, value) in keys.iter().zip(key.values()) {
            entity.set(&field.name, value.to_json());
        }
        *existing = entity.clone();
        Ok(Some(entity))
    }

    async fn delete(&self, entity_set: &str, key: &KeyValue) -> Result<bool> {
        let keys = self.set_keys(entity_set)?;
        let removed = {
            let mut entities = self.entities.write();
            match entities.get_mut(&name_key(entity_set)) {
                Some(records) => {
                    let before = records.len();
                    records.retain(|r| Self::key_of(&keys, r).as_ref() != Some(key));
                    records.len() != before
                }
                None => false,
            }
        };

        if removed {
            let set = name_key(entity_set);
            self.links
                .write()
                .retain(|(source, source_key, _), _| !(source == &set && source_key == key));
        }
        Ok(removed)
    }

    async fn related(&self, entity_set: &str, key: &KeyValue, navigation: &str) -> Result<Vec<EntityRecord>> {
        let set = self.set_spec(entity_set)?;
        let target = set
            .navigation_targets
            .iter()
            .find(|t| t.navigation_property == navigation)
            .ok_or_else(|| anyhow!("'{}' has no navigation property '{}'", set.name, navigation))?;

        let target_keys = self
            .links
            .read()
            .get(&(name_key(entity_set), key.clone(), navigation.to_string()))
            .cloned()
            .unwrap_or_default();

        let mut related = Vec::with_capacity(target_keys.len());
        for target_key in &target_keys {
            if let Some(entity) = self.lookup(&target.target_entity_set, target_key)? {
                related.push(entity);
            }
        }
        Ok(related)
    }

    async fn add_link(
        &self,
        entity_set: &str,
        key: &KeyValue,
        navigation: &str,
        target: &KeyValue,
    ) -> Result<bool> {
        if self.lookup(entity_set, key)?.is_none() {
            return Ok(false);
        }
        self.link_records(entity_set, key, navigation, target)
    }
}

impl DataContext for MemoryStore {
    fn context_type(&self) -> ContextType {
        self.schema.context_type.clone()
    }

    fn native_model(&self) -> Result<NativeModel> {
        let entity_types = self
            .schema
            .entity_types
            .iter()
            .map(|spec| NativeEntityType {
                name: spec.name.clone(),
                runtime_type: Some(spec.runtime_type.clone()),
                base_type: spec
                    .base
                    .as_deref()
                    .and_then(|base| self.schema.type_spec(base))
                    .map(|base| base.runtime_type.clone()),
                key_fields: self.schema.key_fields(spec),
            })
            .collect();

        Ok(NativeModel {
            context_type: self.schema.context_type.clone(),
            container: NativeContainer {
                name: self.schema.container_name.clone(),
                namespace: self.schema.namespace.clone(),
                entity_sets: self
                    .schema
                    .entity_sets
                    .iter()
                    .map(|set| NativeEntitySet {
                        name: set.name.clone(),
                        element_type: set.element_type.clone(),
                    })
                    .collect(),
            },
            entity_types,
        })
    }

    fn export_wire_model(&self) -> Result<WireModel> {
        let schema = &self.schema;
        let entity_types = schema
            .entity_types
            .iter()
            .map(|spec| {
                let mut annotations = Annotations::new();
                annotations.insert(
                    RUNTIME_TYPE_ANNOTATION.to_string(),
                    spec.runtime_type.to_string(),
                );
                WireEntityType {
                    name: spec.name.clone(),
                    namespace: schema.namespace.clone(),
                    base_type: spec.base.as_deref().map(|base| schema.qualified(base)),
                    key: spec.keys.iter().map(|k| k.name.clone()).collect(),
                    properties: spec
                        .properties
                        .iter()
                        .map(|p| WireProperty {
                            name: p.name.clone(),
                            type_name: p.type_name.clone(),
                            nullable: p.nullable,
                        })
                        .collect(),
                    navigation_properties: spec
                        .navigations
                        .iter()
                        .map(|n| WireNavigationProperty {
                            name: n.name.clone(),
                            target_type: schema.qualified(&n.target_type),
                            many: n.many,
                        })
                        .collect(),
                    annotations,
                }
            })
            .collect();

        let entity_sets = schema
            .entity_sets
            .iter()
            .map(|set| WireEntitySet {
                name: set.name.clone(),
                entity_type: schema.qualified(&set.element_type),
                navigation_targets: set.navigation_targets.clone(),
                annotations: Annotations::new(),
            })
            .collect();

        let mut container_annotations = Annotations::new();
        container_annotations.insert(
            RUNTIME_TYPE_ANNOTATION.to_string(),
            schema.context_type.to_string(),
        );

        Ok(WireModel {
            entity_types,
            containers: vec![WireContainer {
                name: schema.container_name.clone(),
                namespace: schema.namespace.clone(),
                entity_sets,
                is_default: false,
                annotations: container_annotations,
            }],
        })
    }
}
