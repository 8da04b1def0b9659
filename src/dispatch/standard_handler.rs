use anyhow::{anyhow, Result};
use log::warn;
use serde_json::Value;
use std::sync::Arc;

use crate::dispatch::handler::HandlerDefinition;
use crate::dispatch::operation::{
    invoker, Invocation, NavigationBinding, NavigationIntent, OperationDescriptor, OperationOutcome,
    ParameterDescriptor, ParameterKind, Specializer,
};
use crate::error::RegistryError;
use crate::model::{EntityRecord, EntitySetMetadata, EntityTypeMetadata, KeyValue, TYPE_ANNOTATION};

pub const STANDARD_HANDLER_TYPE: &str = "EntitySetHandler";
pub const READ_ONLY_HANDLER_TYPE: &str = "ReadOnlyEntitySetHandler";

fn key() -> ParameterDescriptor {
    ParameterDescriptor::new("key", ParameterKind::Key)
}

fn entity() -> ParameterDescriptor {
    ParameterDescriptor::new("entity", ParameterKind::Entity)
}

/// Full CRUD over one entity set plus navigation reads and writes.
pub fn standard_handler() -> HandlerDefinition {
    HandlerDefinition::new(STANDARD_HANDLER_TYPE)
        .operation(OperationDescriptor::concrete("Get", vec![], invoker(list)))
        .operation(OperationDescriptor::concrete("Get", vec![key()], invoker(get)))
        .operation(OperationDescriptor::concrete("Post", vec![entity()], invoker(post)))
        .operation(OperationDescriptor::concrete("Put", vec![key(), entity()], invoker(put)))
        .operation(OperationDescriptor::concrete("Patch", vec![key(), entity()], invoker(patch)))
        .operation(OperationDescriptor::concrete("Delete", vec![key()], invoker(delete)))
        .operation(OperationDescriptor::generic(
            NavigationIntent::Read,
            vec![key()],
            navigation_reader(),
        ))
        .operation(OperationDescriptor::generic(
            NavigationIntent::Write,
            vec![key(), entity()],
            navigation_writer(NavigationSource::PathKey),
        ))
        .operation(OperationDescriptor::generic(
            NavigationIntent::Write,
            vec![
                ParameterDescriptor::new("source", ParameterKind::ChangeSetEntity),
                entity(),
            ],
            navigation_writer(NavigationSource::ChangeSetEntity),
        ))
}

/// Reads only: listing, lookup by key and navigation reads.
pub fn read_only_handler() -> HandlerDefinition {
    HandlerDefinition::new(READ_ONLY_HANDLER_TYPE)
        .operation(OperationDescriptor::concrete("Get", vec![], invoker(list)))
        .operation(OperationDescriptor::concrete("Get", vec![key()], invoker(get)))
        .operation(OperationDescriptor::generic(
            NavigationIntent::Read,
            vec![key()],
            navigation_reader(),
        ))
}

/// Picks the standard handler for every entity set with a single-field key.
pub fn default_handler_selector(entity_set: &EntitySetMetadata) -> Result<Option<HandlerDefinition>, RegistryError> {
    if entity_set.element_type().count_key_properties() != 1 {
        return Err(RegistryError::NoDefaultHandler {
            entity_set: entity_set.name().to_string(),
            reason: "no default handler supports multiple keys".to_string(),
        });
    }
    Ok(Some(standard_handler()))
}

fn required_key(invocation: &Invocation) -> Result<&KeyValue> {
    invocation
        .key
        .as_ref()
        .ok_or_else(|| anyhow!("No key bound for an operation on '{}'", invocation.entity_set))
}

/// Build a record for `entity_set` from the request body. The body may name a
/// derived type through its type annotation; otherwise `declared` (or the
/// set's element type) is used. `Err` carries the reason for rejecting the body.
fn entity_from_body(
    invocation: &Invocation,
    entity_set: &str,
    declared: Option<&Arc<EntityTypeMetadata>>,
) -> std::result::Result<EntityRecord, String> {
    let Some(Value::Object(fields)) = &invocation.body else {
        return Err("Request body must be a JSON object".to_string());
    };
    let set = invocation
        .container
        .get_entity_set(entity_set)
        .ok_or_else(|| format!("Entity set '{}' does not exist", entity_set))?;

    let entity_type = match fields.get(TYPE_ANNOTATION).and_then(Value::as_str) {
        Some(wire_name) => set
            .hierarchy_type_by_wire_name(wire_name)
            .ok_or_else(|| format!("'{}' is not a type of entity set '{}'", wire_name, set.name()))?,
        None => declared.unwrap_or(set.element_type()),
    };

    let mut record = EntityRecord::new(entity_type.runtime_type().clone());
    record.merge_from(fields);
    Ok(record)
}

async fn list(invocation: Invocation) -> Result<OperationOutcome> {
    let entities = invocation.store.list(&invocation.entity_set).await?;
    Ok(OperationOutcome::Collection(entities))
}

async fn get(invocation: Invocation) -> Result<OperationOutcome> {
    let key = required_key(&invocation)?;
    Ok(match invocation.store.find(&invocation.entity_set, key).await? {
        Some(entity) => OperationOutcome::Entity(entity),
        None => OperationOutcome::NotFound,
    })
}

async fn post(invocation: Invocation) -> Result<OperationOutcome> {
    let entity = match entity_from_body(&invocation, &invocation.entity_set, None) {
        Ok(entity) => entity,
        Err(reason) => return Ok(OperationOutcome::Rejected(reason)),
    };
    let created = invocation.store.insert(&invocation.entity_set, entity).await?;
    Ok(OperationOutcome::Created(created))
}

async fn put(invocation: Invocation) -> Result<OperationOutcome> {
    let key = required_key(&invocation)?;
    let entity = match entity_from_body(&invocation, &invocation.entity_set, None) {
        Ok(entity) => entity,
        Err(reason) => return Ok(OperationOutcome::Rejected(reason)),
    };
    Ok(match invocation.store.replace(&invocation.entity_set, key, entity).await? {
        Some(replaced) => OperationOutcome::Entity(replaced),
        None => OperationOutcome::NotFound,
    })
}

async fn patch(invocation: Invocation) -> Result<OperationOutcome> {
    let key = required_key(&invocation)?;
    let Some(Value::Object(changes)) = &invocation.body else {
        return Ok(OperationOutcome::Rejected("Request body must be a JSON object".to_string()));
    };
    let Some(mut existing) = invocation.store.find(&invocation.entity_set, key).await? else {
        return Ok(OperationOutcome::NotFound);
    };

    existing.merge_from(changes);
    Ok(match invocation.store.replace(&invocation.entity_set, key, existing).await? {
        Some(updated) => OperationOutcome::Entity(updated),
        None => OperationOutcome::NotFound,
    })
}

async fn delete(invocation: Invocation) -> Result<OperationOutcome> {
    let key = required_key(&invocation)?;
    Ok(if invocation.store.delete(&invocation.entity_set, key).await? {
        OperationOutcome::NoContent
    } else {
        OperationOutcome::NotFound
    })
}

fn navigation_reader() -> Specializer {
    Arc::new(|binding: &NavigationBinding| {
        let binding = binding.clone();
        invoker(move |invocation| get_navigation(invocation, binding.clone()))
    })
}

async fn get_navigation(invocation: Invocation, binding: NavigationBinding) -> Result<OperationOutcome> {
    let key = required_key(&invocation)?;
    if invocation.store.find(&invocation.entity_set, key).await?.is_none() {
        return Ok(OperationOutcome::NotFound);
    }

    let related = invocation
        .store
        .related(&invocation.entity_set, key, &binding.navigation)
        .await?;
    if binding.many {
        return Ok(OperationOutcome::Collection(related));
    }
    Ok(match related.into_iter().next() {
        Some(entity) => OperationOutcome::Entity(entity),
        None => OperationOutcome::NoContent,
    })
}

/// Where a navigation write finds the entity it starts from.
#[derive(Debug, Clone, Copy)]
enum NavigationSource {
    PathKey,
    ChangeSetEntity,
}

fn navigation_writer(source: NavigationSource) -> Specializer {
    Arc::new(move |binding: &NavigationBinding| {
        let binding = binding.clone();
        invoker(move |invocation| post_navigation(invocation, binding.clone(), source))
    })
}

/// Create an entity in the navigation's target set and link it to the source.
async fn post_navigation(
    invocation: Invocation,
    binding: NavigationBinding,
    source: NavigationSource,
) -> Result<OperationOutcome> {
    let source_key = match source {
        NavigationSource::PathKey => required_key(&invocation)?.clone(),
        NavigationSource::ChangeSetEntity => {
            let entity = invocation
                .changeset_entity
                .as_ref()
                .ok_or_else(|| anyhow!("No changeset entity bound for '{}'", binding.navigation))?;
            let set = invocation
                .container
                .get_entity_set(&invocation.entity_set)
                .ok_or_else(|| anyhow!("Entity set '{}' does not exist", invocation.entity_set))?;
            set.element_type().extract_key(entity)?
        }
    };

    let Some(target_set_name) = binding.target_entity_set.as_deref() else {
        return Ok(OperationOutcome::Rejected(format!(
            "Navigation property '{}' has no target entity set",
            binding.navigation
        )));
    };
    if invocation
        .store
        .find(&invocation.entity_set, &source_key)
        .await?
        .is_none()
    {
        return Ok(OperationOutcome::NotFound);
    }

    let entity = match entity_from_body(&invocation, target_set_name, Some(&binding.target_type)) {
        Ok(entity) => entity,
        Err(reason) => return Ok(OperationOutcome::Rejected(reason)),
    };
    let created = invocation.store.insert(target_set_name, entity).await?;

    let target_set = invocation
        .container
        .get_entity_set(target_set_name)
        .ok_or_else(|| anyhow!("Entity set '{}' does not exist", target_set_name))?;
    let target_key = target_set.element_type().extract_key(&created)?;
    let linked = invocation
        .store
        .add_link(&invocation.entity_set, &source_key, &binding.navigation, &target_key)
        .await?;
    if !linked {
        // Source vanished after the target was inserted; undo the insert
        warn!(
            "Could not link new {} entity to {} {:?}; removing it",
            target_set_name, invocation.entity_set, source_key
        );
        invocation.store.delete(target_set_name, &target_key).await?;
        return Ok(OperationOutcome::NotFound);
    }

    Ok(OperationOutcome::Created(created))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::action_selector::expand_generic_operations;
    use crate::dispatch::handler::HandlerDescriptor;
    use crate::logic::container_builder::build_container;
    use crate::model::{ContainerMetadata, KeyKind, KeyScalar};
    use crate::store::traits::{DataContext, EntityStore};
    use crate::store::{ContextSchema, EntitySetSpec, EntityTypeSpec, MemoryStore};
    use serde_json::json;

    fn schema() -> ContextSchema {
        ContextSchema::new("BoardDb", "Board")
            .entity_type(
                EntityTypeSpec::new("Card", "Board.Card")
                    .key("Id", KeyKind::Int32)
                    .property("Title", "Edm.String")
                    .navigation("Watchers", "Member", true),
            )
            .entity_type(EntityTypeSpec::new("UrgentCard", "Board.UrgentCard").derives_from("Card"))
            .entity_type(
                EntityTypeSpec::new("Member", "Board.Member")
                    .key("Id", KeyKind::Int32)
                    .property("Name", "Edm.String"),
            )
            .entity_type(
                EntityTypeSpec::new("Vote", "Board.Vote")
                    .key("CardId", KeyKind::Int32)
                    .key("MemberId", KeyKind::Int32),
            )
            .entity_set(EntitySetSpec::new("Cards", "Card").target("Watchers", "Members"))
            .entity_set(EntitySetSpec::new("Members", "Member"))
            .entity_set(EntitySetSpec::new("Votes", "Vote"))
    }

    fn fixture() -> (Arc<ContainerMetadata>, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new(schema()));
        let container = Arc::new(build_container(store.as_ref()).unwrap());
        (container, store)
    }

    fn invocation(
        container: &Arc<ContainerMetadata>,
        store: &Arc<MemoryStore>,
        key: Option<i64>,
        body: Option<Value>,
    ) -> Invocation {
        let store: Arc<dyn DataContext> = store.clone();
        Invocation {
            container: container.clone(),
            store,
            entity_set: "Cards".to_string(),
            key: key.map(|k| KeyValue::Single(KeyScalar::Int(k))),
            body,
            changeset_entity: None,
        }
    }

    async fn run(name: &str, parameter_count: usize, invocation: Invocation) -> OperationOutcome {
        let handler = HandlerDescriptor::new("Cards", standard_handler(), Some(invocation.container.clone()));
        let operations = expand_generic_operations(&handler);
        let operation = operations
            .get(name)
            .iter()
            .find(|op| op.parameters().len() == parameter_count && !op.has_change_set_entity_parameter())
            .unwrap()
            .clone();
        operation.invoke(invocation).unwrap().await.unwrap()
    }

    #[tokio::test]
    async fn test_post_creates_derived_type_from_annotation() {
        let (container, store) = fixture();
        let body = json!({"@odata.type": "#Board.UrgentCard", "Title": "Fix login"});

        let outcome = run("Post", 1, invocation(&container, &store, None, Some(body))).await;
        let OperationOutcome::Created(created) = outcome else {
            panic!("expected a created entity, got {:?}", outcome);
        };
        assert_eq!(created.runtime_type.as_str(), "Board.UrgentCard");
        assert_eq!(created.get("Id"), Some(&json!(1)));
        assert!(created.get("@odata.type").is_none());
    }

    #[tokio::test]
    async fn test_post_rejects_foreign_type_annotation() {
        let (container, store) = fixture();
        let body = json!({"@odata.type": "#Board.Member", "Title": "x"});
        let outcome = run("Post", 1, invocation(&container, &store, None, Some(body))).await;
        assert!(matches!(outcome, OperationOutcome::Rejected(_)));
    }

    #[tokio::test]
    async fn test_patch_merges_and_delete_removes() {
        let (container, store) = fixture();
        store
            .seed("Cards", EntityRecord::new("Board.Card".into()).with("Id", 3).with("Title", "Old"))
            .unwrap();

        let outcome = run(
            "Patch",
            2,
            invocation(&container, &store, Some(3), Some(json!({"Title": "New"}))),
        )
        .await;
        let OperationOutcome::Entity(updated) = outcome else {
            panic!("expected the updated entity, got {:?}", outcome);
        };
        assert_eq!(updated.get("Title"), Some(&json!("New")));

        let outcome = run("Delete", 1, invocation(&container, &store, Some(3), None)).await;
        assert_eq!(outcome, OperationOutcome::NoContent);
        let outcome = run("Get", 1, invocation(&container, &store, Some(3), None)).await;
        assert_eq!(outcome, OperationOutcome::NotFound);
    }

    #[tokio::test]
    async fn test_navigation_post_creates_and_links_target() {
        let (container, store) = fixture();
        store
            .seed("Cards", EntityRecord::new("Board.Card".into()).with("Id", 1))
            .unwrap();

        let outcome = run(
            "PostWatchers",
            2,
            invocation(&container, &store, Some(1), Some(json!({"Name": "Ada"}))),
        )
        .await;
        assert!(matches!(outcome, OperationOutcome::Created(ref m) if m.runtime_type.as_str() == "Board.Member"));

        let outcome = run("GetWatchers", 1, invocation(&container, &store, Some(1), None)).await;
        let OperationOutcome::Collection(watchers) = outcome else {
            panic!("expected a collection, got {:?}", outcome);
        };
        assert_eq!(watchers.len(), 1);
        assert_eq!(watchers[0].get("Name"), Some(&json!("Ada")));
    }

    #[tokio::test]
    async fn test_changeset_overload_links_from_batch_entity() {
        let (container, store) = fixture();
        let card = store
            .insert("Cards", EntityRecord::new("Board.Card".into()).with("Title", "Batch"))
            .await
            .unwrap();

        let handler = HandlerDescriptor::new("Cards", standard_handler(), Some(container.clone()));
        let operations = expand_generic_operations(&handler);
        let operation = operations
            .get("PostWatchers")
            .iter()
            .find(|op| op.first_parameter_is_change_set_entity())
            .unwrap()
            .clone();

        let mut call = invocation(&container, &store, None, Some(json!({"Name": "Grace"})));
        call.changeset_entity = Some(card.clone());
        let outcome = operation.invoke(call).unwrap().await.unwrap();
        assert!(matches!(outcome, OperationOutcome::Created(_)));

        let key = KeyValue::Single(KeyScalar::Int(1));
        assert_eq!(store.related("Cards", &key, "Watchers").await.unwrap().len(), 1);
    }

    /// Memory store whose links always fail, as if the source disappeared mid-request.
    struct UnlinkableStore(MemoryStore);

    #[async_trait::async_trait]
    impl EntityStore for UnlinkableStore {
        async fn list(&self, entity_set: &str) -> Result<Vec<EntityRecord>> {
            self.0.list(entity_set).await
        }
        async fn find(&self, entity_set: &str, key: &KeyValue) -> Result<Option<EntityRecord>> {
            self.0.find(entity_set, key).await
        }
        async fn insert(&self, entity_set: &str, entity: EntityRecord) -> Result<EntityRecord> {
            self.0.insert(entity_set, entity).await
        }
        async fn replace(&self, entity_set: &str, key: &KeyValue, entity: EntityRecord) -> Result<Option<EntityRecord>> {
            self.0.replace(entity_set, key, entity).await
        }
        async fn delete(&self, entity_set: &str, key: &KeyValue) -> Result<bool> {
            self.0.delete(entity_set, key).await
        }
        async fn related(&self, entity_set: &str, key: &KeyValue, navigation: &str) -> Result<Vec<EntityRecord>> {
            self.0.related(entity_set, key, navigation).await
        }
        async fn add_link(&self, _: &str, _: &KeyValue, _: &str, _: &KeyValue) -> Result<bool> {
            Ok(false)
        }
    }

    impl DataContext for UnlinkableStore {
        fn context_type(&self) -> crate::model::ContextType {
            self.0.context_type()
        }
        fn native_model(&self) -> Result<crate::model::NativeModel> {
            self.0.native_model()
        }
        fn export_wire_model(&self) -> Result<crate::model::WireModel> {
            self.0.export_wire_model()
        }
    }

    #[tokio::test]
    async fn test_navigation_post_that_cannot_link_reports_not_found() {
        let (container, _) = fixture();
        let store = Arc::new(UnlinkableStore(MemoryStore::new(schema())));
        store
            .0
            .seed("Cards", EntityRecord::new("Board.Card".into()).with("Id", 1))
            .unwrap();

        let call = Invocation {
            container: container.clone(),
            store: store.clone() as Arc<dyn DataContext>,
            entity_set: "Cards".to_string(),
            key: Some(KeyValue::Single(KeyScalar::Int(1))),
            body: Some(json!({"Name": "Ada"})),
            changeset_entity: None,
        };
        let outcome = run("PostWatchers", 2, call).await;

        assert_eq!(outcome, OperationOutcome::NotFound);
        assert!(store.list("Members").await.unwrap().is_empty());
    }

    #[test]
    fn test_default_selector_rejects_composite_keys() {
        let (container, _store) = fixture();
        let votes = container.get_entity_set("Votes").unwrap();
        assert!(matches!(
            default_handler_selector(votes),
            Err(RegistryError::NoDefaultHandler { .. })
        ));
        let cards = container.get_entity_set("Cards").unwrap();
        assert!(default_handler_selector(cards).unwrap().is_some());
    }
}
