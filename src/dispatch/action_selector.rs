use itertools::Itertools;
use log::debug;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

use crate::dispatch::conventions::{default_conventions, RoutingConvention};
use crate::dispatch::handler::HandlerDescriptor;
use crate::dispatch::operation::{NavigationBinding, OperationDescriptor, OperationMap};
use crate::dispatch::resource_path::ResourceRequest;
use crate::error::ResolveError;
use crate::model::name_key;

/// Selects the operation of a handler that should serve a request.
///
/// Generic navigation operations are expanded once per handler and the
/// result is kept for the lifetime of the selector.
pub struct ActionSelector {
    conventions: Vec<Arc<dyn RoutingConvention>>,
    expansions: RwLock<HashMap<(String, String), Arc<OperationMap>>>,
}

impl ActionSelector {
    pub fn new(conventions: Vec<Arc<dyn RoutingConvention>>) -> Self {
        Self {
            conventions,
            expansions: RwLock::new(HashMap::new()),
        }
    }

    pub fn with_default_conventions() -> Self {
        Self::new(default_conventions())
    }

    pub fn conventions(&self) -> &[Arc<dyn RoutingConvention>] {
        &self.conventions
    }

    /// Candidate operations of `handler` after generic expansion.
    pub fn operation_map(&self, handler: &HandlerDescriptor) -> Arc<OperationMap> {
        let key = (name_key(handler.name()), handler.handler_type().to_string());
        if let Some(operations) = self.expansions.read().get(&key) {
            return operations.clone();
        }

        // Racing requests may both expand; the first insert wins
        let operations = Arc::new(expand_generic_operations(handler));
        self.expansions.write().entry(key).or_insert(operations).clone()
    }

    pub fn select(
        &self,
        request: &ResourceRequest,
        handler: &HandlerDescriptor,
    ) -> Result<OperationDescriptor, ResolveError> {
        let operations = self.operation_map(handler);
        select_operation(request, &self.conventions, &operations)
    }
}

/// Replace generic navigation operations with one concrete operation per
/// navigation property declared anywhere in the handler's element type
/// hierarchy. If nothing expands, the operations are returned unchanged.
pub fn expand_generic_operations(handler: &HandlerDescriptor) -> OperationMap {
    let operations = handler.operations();
    if operations.iter().all(|op| op.generic_intent().is_none()) {
        return OperationMap::new(operations.iter().cloned());
    }

    let bindings = navigation_bindings(handler);
    let expanded: Vec<OperationDescriptor> = operations
        .iter()
        .filter(|op| op.generic_intent().is_some())
        .flat_map(|op| bindings.iter().filter_map(move |binding| op.specialize(binding)))
        .collect();

    if expanded.is_empty() {
        debug!(
            "Handler '{}' has generic operations but no navigation properties to expand them over",
            handler.name()
        );
        return OperationMap::new(operations.iter().cloned());
    }

    debug!(
        "Expanded generic operations of '{}' into {}",
        handler.name(),
        expanded.iter().map(|op| op.name()).unique().join(", ")
    );

    let concrete = operations.iter().filter(|op| op.generic_intent().is_none()).cloned();
    OperationMap::new(expanded.into_iter().chain(concrete))
}

fn navigation_bindings(handler: &HandlerDescriptor) -> Vec<NavigationBinding> {
    let Some(container) = handler.container() else {
        return Vec::new();
    };
    let Some(entity_set) = container.get_entity_set(handler.name()) else {
        return Vec::new();
    };

    entity_set
        .element_type_hierarchy()
        .iter()
        .flat_map(|entity_type| entity_type.wire_type().declared_navigation_properties())
        .filter_map(|property| {
            let Some(target_type) = container.get_entity_type(&property.target_type) else {
                debug!(
                    "Skipping navigation property '{}': unknown target type '{}'",
                    property.name, property.target_type
                );
                return None;
            };
            Some(NavigationBinding {
                navigation: property.name.clone(),
                many: property.many,
                target_type: target_type.clone(),
                target_entity_set: entity_set
                    .find_navigation(&property.name)
                    .map(|n| n.target_entity_set_name().to_string()),
            })
        })
        .collect()
}

/// Resolve a request to exactly one operation.
///
/// Conventions are consulted in order. A convention naming an operation that
/// does not exist is an error; a tie that no candidate can serve falls through
/// to the next convention.
pub fn select_operation(
    request: &ResourceRequest,
    conventions: &[Arc<dyn RoutingConvention>],
    operations: &OperationMap,
) -> Result<OperationDescriptor, ResolveError> {
    for convention in conventions {
        let Some(name) = convention.select_operation(request, operations) else {
            continue;
        };
        debug!(
            "Convention '{}' selected '{}' for {} {}",
            convention.name(),
            name,
            request.method,
            request.path
        );

        let candidates = operations.get(&name);
        match candidates {
            [] => {
                return Err(ResolveError::MissingOperation {
                    operation: name,
                    path: request.path.to_string(),
                })
            }
            [only] => return Ok(only.clone()),
            _ => {}
        }

        if candidates.iter().any(|c| c.has_change_set_entity_parameter()) {
            match break_tie(request, &name, candidates)? {
                Some(selected) => return Ok(selected),
                None => debug!("No candidate for '{}' applies without a content-id reference", name),
            }
        } else {
            return resolve_overload(request, &name, candidates);
        }
    }

    Err(ResolveError::NotFound(request.path.to_string()))
}

/// Candidates whose first parameter is a changeset entity come first, and are
/// only taken when the request refers to an entity created earlier in its batch.
fn break_tie(
    request: &ResourceRequest,
    name: &str,
    candidates: &[OperationDescriptor],
) -> Result<Option<OperationDescriptor>, ResolveError> {
    let has_reference = request.has_content_id_reference();
    let ordered: Vec<&OperationDescriptor> = candidates
        .iter()
        .sorted_by_key(|c| if c.first_parameter_is_change_set_entity() { 1 } else { 2 })
        .collect();

    let changeset_candidates = ordered
        .iter()
        .filter(|c| c.has_change_set_entity_parameter())
        .count();
    if has_reference && changeset_candidates > 1 {
        return Err(ResolveError::Ambiguous {
            operation: name.to_string(),
            path: request.path.to_string(),
        });
    }

    for candidate in ordered {
        if !candidate.has_change_set_entity_parameter() || has_reference {
            return Ok(Some(candidate.clone()));
        }
    }
    Ok(None)
}

/// Among the candidates whose parameters can all be bound, the one taking the
/// most parameters wins.
fn resolve_overload(
    request: &ResourceRequest,
    name: &str,
    candidates: &[OperationDescriptor],
) -> Result<OperationDescriptor, ResolveError> {
    let best = candidates
        .iter()
        .filter(|c| c.parameters().iter().all(|p| p.kind.is_bindable(request)))
        .max_set_by_key(|c| c.parameters().len());

    match best.as_slice() {
        [] => Err(ResolveError::NotFound(request.path.to_string())),
        [selected] => Ok((*selected).clone()),
        _ => Err(ResolveError::Ambiguous {
            operation: name.to_string(),
            path: request.path.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::handler::HandlerDefinition;
    use crate::dispatch::operation::{
        invoker, NavigationIntent, OperationOutcome, ParameterDescriptor, ParameterKind, Specializer,
        GET_NAVIGATION_PROPERTY,
    };
    use crate::dispatch::resource_path::ResourcePath;
    use crate::logic::container_builder::build_container;
    use crate::model::{ContainerMetadata, EntityRecord, KeyKind};
    use crate::store::{ContextSchema, EntitySetSpec, EntityTypeSpec, MemoryStore};
    use axum::http::Method;

    fn container() -> Arc<ContainerMetadata> {
        let schema = ContextSchema::new("PortfolioDb", "Portfolio")
            .entity_type(
                EntityTypeSpec::new("Project", "Portfolio.Project")
                    .key("Id", KeyKind::Int32)
                    .navigation("Owners", "User", true)
                    .navigation("Tasks", "Task", true),
            )
            .entity_type(
                EntityTypeSpec::new("Program", "Portfolio.Program")
                    .derives_from("Project")
                    .navigation("Sponsors", "User", true),
            )
            .entity_type(EntityTypeSpec::new("User", "Portfolio.User").key("Id", KeyKind::Int32))
            .entity_type(EntityTypeSpec::new("Task", "Portfolio.Task").key("Id", KeyKind::Int32))
            .entity_set(
                EntitySetSpec::new("Projects", "Project")
                    .target("Owners", "Users")
                    .target("Tasks", "Tasks")
                    .target("Sponsors", "Users"),
            )
            .entity_set(EntitySetSpec::new("Users", "User"))
            .entity_set(EntitySetSpec::new("Tasks", "Task"));
        Arc::new(build_container(&MemoryStore::new(schema)).unwrap())
    }

    fn noop(name: &str, parameters: Vec<ParameterDescriptor>) -> OperationDescriptor {
        OperationDescriptor::concrete(name, parameters, invoker(|_| async { Ok::<_, anyhow::Error>(OperationOutcome::NoContent) }))
    }

    fn noop_specializer() -> Specializer {
        Arc::new(|_binding: &NavigationBinding| invoker(|_| async { Ok::<_, anyhow::Error>(OperationOutcome::NoContent) }))
    }

    fn key() -> ParameterDescriptor {
        ParameterDescriptor::new("key", ParameterKind::Key)
    }

    fn entity() -> ParameterDescriptor {
        ParameterDescriptor::new("entity", ParameterKind::Entity)
    }

    fn changeset() -> ParameterDescriptor {
        ParameterDescriptor::new("source", ParameterKind::ChangeSetEntity)
    }

    fn handler(name: &str, definition: HandlerDefinition) -> HandlerDescriptor {
        HandlerDescriptor::new(name, definition, Some(container()))
    }

    fn request(method: Method, path: &str) -> ResourceRequest {
        ResourceRequest::new(method, ResourcePath::parse(path).unwrap())
    }

    fn referencing(request: ResourceRequest) -> ResourceRequest {
        request.with_content_id_reference("1", EntityRecord::new("Portfolio.Project".into()).with("Id", 1))
    }

    #[test]
    fn test_generic_read_expands_once_per_navigation_property() {
        let projects = handler(
            "Projects",
            HandlerDefinition::new("Test")
                .operation(noop("Get", vec![]))
                .operation(OperationDescriptor::generic(
                    NavigationIntent::Read,
                    vec![key()],
                    noop_specializer(),
                )),
        );

        let operations = expand_generic_operations(&projects);
        assert_eq!(
            operations.names().collect::<Vec<_>>(),
            vec!["Get", "GetOwners", "GetSponsors", "GetTasks"]
        );
        assert!(!operations.contains(GET_NAVIGATION_PROPERTY));
        assert_eq!(operations.len(), 4);
    }

    #[test]
    fn test_generic_operation_kept_when_nothing_expands() {
        let users = handler(
            "Users",
            HandlerDefinition::new("Test").operation(OperationDescriptor::generic(
                NavigationIntent::Read,
                vec![key()],
                noop_specializer(),
            )),
        );
        let operations = expand_generic_operations(&users);
        assert!(operations.contains(GET_NAVIGATION_PROPERTY));
        assert_eq!(operations.len(), 1);

        let detached = HandlerDescriptor::new(
            "Projects",
            HandlerDefinition::new("Test").operation(OperationDescriptor::generic(
                NavigationIntent::Read,
                vec![key()],
                noop_specializer(),
            )),
            None,
        );
        assert!(expand_generic_operations(&detached).contains(GET_NAVIGATION_PROPERTY));
    }

    #[test]
    fn test_expansion_is_memoized_per_handler() {
        let selector = ActionSelector::with_default_conventions();
        let projects = handler(
            "Projects",
            HandlerDefinition::new("Test").operation(OperationDescriptor::generic(
                NavigationIntent::Read,
                vec![key()],
                noop_specializer(),
            )),
        );
        let first = selector.operation_map(&projects);
        let second = selector.operation_map(&projects);
        assert!(Arc::ptr_eq(&first, &second));
    }

    fn post_overloads() -> HandlerDescriptor {
        handler(
            "Projects",
            HandlerDefinition::new("Test")
                .operation(OperationDescriptor::generic(
                    NavigationIntent::Write,
                    vec![key(), entity()],
                    noop_specializer(),
                ))
                .operation(OperationDescriptor::generic(
                    NavigationIntent::Write,
                    vec![changeset(), entity()],
                    noop_specializer(),
                )),
        )
    }

    #[test]
    fn test_tie_break_prefers_keyed_candidate_without_reference() {
        let selector = ActionSelector::with_default_conventions();
        let selected = selector
            .select(&request(Method::POST, "Projects(1)/Owners"), &post_overloads())
            .unwrap();
        assert_eq!(selected.name(), "PostOwners");
        assert!(!selected.has_change_set_entity_parameter());
    }

    #[test]
    fn test_tie_break_prefers_changeset_candidate_with_reference() {
        let selector = ActionSelector::with_default_conventions();
        let selected = selector
            .select(&referencing(request(Method::POST, "Projects(1)/Owners")), &post_overloads())
            .unwrap();
        assert_eq!(selected.name(), "PostOwners");
        assert!(selected.first_parameter_is_change_set_entity());
    }

    #[test]
    fn test_changeset_only_candidates_need_a_reference() {
        let projects = handler(
            "Projects",
            HandlerDefinition::new("Test")
                .operation(noop("PostOwners", vec![changeset(), entity()]))
                .operation(noop("PostOwners", vec![changeset()])),
        );
        let selector = ActionSelector::with_default_conventions();

        let result = selector.select(&request(Method::POST, "Projects(1)/Owners"), &projects);
        assert!(matches!(result, Err(ResolveError::NotFound(_))));

        let result = selector.select(&referencing(request(Method::POST, "Projects(1)/Owners")), &projects);
        assert!(matches!(result, Err(ResolveError::Ambiguous { .. })));
    }

    #[test]
    fn test_standard_overload_resolution_takes_most_bound_parameters() {
        let projects = handler(
            "Projects",
            HandlerDefinition::new("Test")
                .operation(noop("Get", vec![]))
                .operation(noop("Get", vec![key()])),
        );
        let selector = ActionSelector::with_default_conventions();

        let list = selector.select(&request(Method::GET, "Projects"), &projects).unwrap();
        assert!(list.parameters().is_empty());

        let single = selector.select(&request(Method::GET, "Projects(4)"), &projects).unwrap();
        assert_eq!(single.parameters().len(), 1);
    }

    #[test]
    fn test_equal_overloads_are_ambiguous() {
        let projects = handler(
            "Projects",
            HandlerDefinition::new("Test")
                .operation(noop("Get", vec![key()]))
                .operation(noop("Get", vec![ParameterDescriptor::new("id", ParameterKind::Key)])),
        );
        let selector = ActionSelector::with_default_conventions();
        assert!(matches!(
            selector.select(&request(Method::GET, "Projects(4)"), &projects),
            Err(ResolveError::Ambiguous { .. })
        ));
    }

    #[test]
    fn test_unmatched_and_missing_operations() {
        let projects = handler(
            "Projects",
            HandlerDefinition::new("Test").operation(noop("Get", vec![])),
        );
        let selector = ActionSelector::with_default_conventions();

        assert!(matches!(
            selector.select(&request(Method::PUT, "Projects"), &projects),
            Err(ResolveError::NotFound(_))
        ));
        assert!(matches!(
            selector.select(&request(Method::DELETE, "Projects(1)"), &projects),
            Err(ResolveError::MissingOperation { .. })
        ));
    }
}
