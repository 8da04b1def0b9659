use axum::http::Method;
use std::sync::Arc;

use crate::dispatch::operation::{NavigationIntent, OperationMap};
use crate::dispatch::resource_path::{ResourcePath, ResourceRequest};

/// Maps a request to the name of the operation that should handle it.
///
/// Returning `None` declines the request and leaves it to the next convention.
pub trait RoutingConvention: Send + Sync {
    fn name(&self) -> &'static str;

    fn select_operation(&self, request: &ResourceRequest, operations: &OperationMap) -> Option<String>;
}

/// `GET Set(key)/Nav` to `Get{Nav}`, `POST Set(key)/Nav` to `Post{Nav}`.
///
/// Also matches `$id/Nav` batch references.
#[derive(Debug, Default)]
pub struct NavigationRoutingConvention;

impl RoutingConvention for NavigationRoutingConvention {
    fn name(&self) -> &'static str {
        "navigation"
    }

    fn select_operation(&self, request: &ResourceRequest, _operations: &OperationMap) -> Option<String> {
        let navigation = match &request.path {
            ResourcePath::Navigation { navigation, .. } => navigation,
            ResourcePath::ContentIdReference {
                navigation: Some(navigation),
                ..
            } => navigation,
            _ => return None,
        };

        let intent = match request.method {
            Method::GET => NavigationIntent::Read,
            Method::POST => NavigationIntent::Write,
            _ => return None,
        };
        Some(format!("{}{}", intent.prefix(), navigation))
    }
}

/// `GET Set` to `Get`, `POST Set` to `Post`.
#[derive(Debug, Default)]
pub struct EntitySetRoutingConvention;

impl RoutingConvention for EntitySetRoutingConvention {
    fn name(&self) -> &'static str {
        "entity set"
    }

    fn select_operation(&self, request: &ResourceRequest, _operations: &OperationMap) -> Option<String> {
        if !matches!(request.path, ResourcePath::EntitySet(_)) {
            return None;
        }
        match request.method {
            Method::GET => Some("Get".to_string()),
            Method::POST => Some("Post".to_string()),
            _ => None,
        }
    }
}

/// `GET`, `PUT`, `PATCH` and `DELETE` on `Set(key)`.
#[derive(Debug, Default)]
pub struct EntityRoutingConvention;

impl RoutingConvention for EntityRoutingConvention {
    fn name(&self) -> &'static str {
        "entity"
    }

    fn select_operation(&self, request: &ResourceRequest, operations: &OperationMap) -> Option<String> {
        let addresses_entity = matches!(
            request.path,
            ResourcePath::Entity { .. } | ResourcePath::ContentIdReference { navigation: None, .. }
        );
        if !addresses_entity {
            return None;
        }

        let name = match request.method.as_str() {
            "GET" => "Get",
            "PUT" => "Put",
            "PATCH" => "Patch",
            // Older clients send MERGE for partial updates
            "MERGE" if operations.contains("Patch") => "Patch",
            "DELETE" => "Delete",
            _ => return None,
        };
        Some(name.to_string())
    }
}

/// The default conventions, generic navigation first.
pub fn default_conventions() -> Vec<Arc<dyn RoutingConvention>> {
    vec![
        Arc::new(NavigationRoutingConvention),
        Arc::new(EntitySetRoutingConvention),
        Arc::new(EntityRoutingConvention),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(method: Method, path: &str) -> ResourceRequest {
        ResourceRequest::new(method, ResourcePath::parse(path).unwrap())
    }

    fn select(request: &ResourceRequest) -> Option<String> {
        let operations = OperationMap::default();
        default_conventions()
            .iter()
            .find_map(|c| c.select_operation(request, &operations))
    }

    #[test]
    fn test_navigation_requests_name_prefixed_operations() {
        assert_eq!(
            select(&request(Method::GET, "Projects(1)/Owners")).as_deref(),
            Some("GetOwners")
        );
        assert_eq!(
            select(&request(Method::POST, "$2/Owners")).as_deref(),
            Some("PostOwners")
        );
        assert_eq!(select(&request(Method::DELETE, "Projects(1)/Owners")), None);
    }

    #[test]
    fn test_set_and_entity_requests() {
        assert_eq!(select(&request(Method::GET, "Projects")).as_deref(), Some("Get"));
        assert_eq!(select(&request(Method::POST, "Projects")).as_deref(), Some("Post"));
        assert_eq!(select(&request(Method::PATCH, "Projects(1)")).as_deref(), Some("Patch"));
        assert_eq!(select(&request(Method::DELETE, "Projects(1)")).as_deref(), Some("Delete"));
        assert_eq!(select(&request(Method::DELETE, "Projects")), None);
        assert_eq!(select(&request(Method::GET, "$metadata")), None);
    }
}
