pub mod api;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod logic;
pub mod model;
pub mod seed;
pub mod store;

// Export API types
pub use api::handlers;
pub use api::routes;
pub use api::state::{AppState, ServiceState};

pub use config::AppConfig;
pub use error::{ApiError, DiscoveryError, MetadataError, PathError, RegistryError, ResolveError};

use anyhow::Context;
use std::sync::Arc;

use crate::dispatch::{default_handler_selector, ActionSelector, HandlerRegistry};
use crate::logic::ContainerMetadataCache;
use crate::store::DataContext;

/// Build the shared service state for the Scrum data context: reconcile its
/// metadata, then register a standard handler for every set the lookup
/// discovery does not serve.
pub fn build_state(config: AppConfig, cache: &ContainerMetadataCache) -> anyhow::Result<AppState> {
    let store = Arc::new(seed::scrum_store(config.service.load_seed_data)?);
    let container = cache
        .get_or_build(store.as_ref())
        .context("Failed to build container metadata")?;

    let registry = HandlerRegistry::new(Arc::new(seed::lookup_discovery(container.clone())));
    registry
        .register_standard_handlers(&container, &default_handler_selector)
        .context("Failed to register entity set handlers")?;

    let store: Arc<dyn DataContext> = store;
    let state = ServiceState::new(config, container, store, registry, ActionSelector::with_default_conventions())?;
    Ok(Arc::new(state))
}

/// The full application router for `state`
pub fn build_app(state: AppState) -> axum::Router {
    let prefix = state.config.route_prefix().to_string();
    crate::api::routes::create_router(&prefix).with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::{header, Request, StatusCode};
    use serde_json::{json, Value};
    use tower::ServiceExt;

    fn app() -> axum::Router {
        let state = build_state(AppConfig::default(), &ContainerMetadataCache::new()).unwrap();
        build_app(state)
    }

    async fn send(app: axum::Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, axum::http::HeaderMap, Value) {
        let mut request = Request::builder().method(method).uri(uri);
        let body = match body {
            Some(body) => {
                request = request.header(header::CONTENT_TYPE, "application/json");
                Body::from(body.to_string())
            }
            None => Body::empty(),
        };
        let response = app.oneshot(request.body(body).unwrap()).await.unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, headers, value)
    }

    #[tokio::test]
    async fn test_health_check() {
        let (status, _, body) = send(app(), "GET", "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
    }

    #[tokio::test]
    async fn test_service_document_lists_entity_sets() {
        let (status, _, body) = send(app(), "GET", "/odata/", None).await;
        assert_eq!(status, StatusCode::OK);
        let names: Vec<_> = body["value"]
            .as_array()
            .unwrap()
            .iter()
            .map(|entry| entry["name"].as_str().unwrap().to_string())
            .collect();
        assert!(names.contains(&"WorkItems".to_string()));
        assert!(names.contains(&"Priority".to_string()));
    }

    #[tokio::test]
    async fn test_metadata_etag_supports_conditional_requests() {
        let app = app();
        let (status, headers, body) = send(app.clone(), "GET", "/odata/$metadata", None).await;
        assert_eq!(status, StatusCode::OK);
        assert!(!body.to_string().contains("urn:entity-repo:internal:"));
        let etag = headers.get(header::ETAG).unwrap().to_str().unwrap().to_string();

        let request = Request::builder()
            .uri("/odata/$metadata")
            .header(header::IF_NONE_MATCH, etag)
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_MODIFIED);
    }

    #[tokio::test]
    async fn test_navigation_read_and_derived_entity() {
        let (status, _, owners) = send(app(), "GET", "/odata/Projects(1)/Owners", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(owners["value"].as_array().unwrap().len(), 2);

        let (status, _, bug) = send(app(), "GET", "/odata/WorkItems(1)", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(bug["@odata.type"], "#Scrum.Bug");

        let (status, _, found_by) = send(app(), "GET", "/odata/WorkItems(1)/FoundBy", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(found_by["UserName"], "carol");
    }

    #[tokio::test]
    async fn test_create_returns_location_header() {
        let body = json!({"@odata.type": "#Scrum.Story", "Title": "Export sprint report", "StoryPoints": 3});
        let (status, headers, created) = send(app(), "POST", "/odata/WorkItems", Some(body)).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(created["Id"], 3);
        assert_eq!(
            headers.get(header::LOCATION).unwrap(),
            "http://127.0.0.1:3001/odata/WorkItems(3)"
        );
    }

    #[tokio::test]
    async fn test_lookup_sets_are_read_only() {
        let (status, _, priorities) = send(app(), "GET", "/odata/Priority", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(priorities["value"].as_array().unwrap().len(), 4);

        let (status, _, _) = send(app(), "POST", "/odata/Priority", Some(json!({"Name": "Urgent"}))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_request_failures_map_to_status_codes() {
        let (status, _, _) = send(app(), "GET", "/odata/Nope", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _, _) = send(app(), "GET", "/odata/Projects('x')", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _, _) = send(app(), "GET", "/odata/Projects(99)", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _, _) = send(app(), "GET", "/odata/$1/Owners", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_batch_links_entity_created_earlier_in_batch() {
        let batch = json!({
            "requests": [
                {"id": "1", "method": "POST", "url": "Projects", "body": {"Name": "Billing"}},
                {"id": "2", "method": "POST", "url": "$1/Owners", "body": {"UserName": "dave"}},
                {"id": "3", "method": "GET", "url": "$1/Owners"},
                {"id": "4", "method": "GET", "url": "$9"}
            ]
        });
        let (status, _, body) = send(app(), "POST", "/odata/$batch", Some(batch)).await;
        assert_eq!(status, StatusCode::OK);

        let responses = body["responses"].as_array().unwrap();
        assert_eq!(responses[0]["status"], 201);
        assert_eq!(responses[0]["location"], "http://127.0.0.1:3001/odata/Projects(3)");
        assert_eq!(responses[1]["status"], 201);
        assert_eq!(responses[1]["location"], "http://127.0.0.1:3001/odata/Users(4)");
        assert_eq!(responses[2]["status"], 200);
        assert_eq!(responses[2]["body"]["value"][0]["UserName"], "dave");
        assert_eq!(responses[3]["status"], 404);
    }
}
