use crate::model::{ContextType, EntityRecord, KeyValue, NativeModel, WireModel};
use anyhow::Result;

/// Persistence operations of a data-access context, addressed by entity set name.
#[async_trait::async_trait]
pub trait EntityStore: Send + Sync {
    /// List all entities of a set
    async fn list(&self, entity_set: &str) -> Result<Vec<EntityRecord>>;
    /// Find one entity by key
    async fn find(&self, entity_set: &str, key: &KeyValue) -> Result<Option<EntityRecord>>;
    /// Insert an entity; stores may assign generated key values
    async fn insert(&self, entity_set: &str, entity: EntityRecord) -> Result<EntityRecord>;
    /// Replace the entity stored under `key`, returning `None` if it does not exist
    async fn replace(
        &self,
        entity_set: &str,
        key: &KeyValue,
        entity: EntityRecord,
    ) -> Result<Option<EntityRecord>>;
    /// Delete by key, returning whether anything was removed
    async fn delete(&self, entity_set: &str, key: &KeyValue) -> Result<bool>;
    /// Entities reachable from `key` through a navigation property
    async fn related(&self, entity_set: &str, key: &KeyValue, navigation: &str) -> Result<Vec<EntityRecord>>;
    /// Link the entity at `key` to `target` through a navigation property
    async fn add_link(
        &self,
        entity_set: &str,
        key: &KeyValue,
        navigation: &str,
        target: &KeyValue,
    ) -> Result<bool>;
}

/// A live data-access context: persistence plus the two schema views
/// container metadata is built from.
pub trait DataContext: EntityStore {
    fn context_type(&self) -> ContextType;
    /// The storage-oriented schema, including runtime types and key fields
    fn native_model(&self) -> Result<NativeModel>;
    /// The naive wire-schema export; may carry implementation annotations
    fn export_wire_model(&self) -> Result<WireModel>;
}
