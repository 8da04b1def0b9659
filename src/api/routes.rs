use axum::{
    routing::{any, get, post},
    Router,
};
use tower_http::cors::CorsLayer;

use crate::api::handlers;
use crate::api::state::AppState;

fn scoped(prefix: &str, path: &str) -> String {
    match prefix.trim_matches('/') {
        "" => format!("/{}", path),
        prefix => format!("/{}/{}", prefix, path),
    }
}

pub fn create_router(route_prefix: &str) -> Router<AppState> {
    let mut router = Router::new()
        // Health check
        .route("/health", get(handlers::health_check))
        // Service document and metadata
        .route(&scoped(route_prefix, ""), get(handlers::get_service_document))
        .route(&scoped(route_prefix, "$metadata"), get(handlers::get_metadata))
        .route(&scoped(route_prefix, "$batch"), post(handlers::post_batch))
        // Entity sets, entities and navigation properties
        .route(&scoped(route_prefix, "*path"), any(handlers::dispatch_resource));

    if !route_prefix.trim_matches('/').is_empty() {
        router = router.route(&scoped(route_prefix, "").trim_end_matches('/'), get(handlers::get_service_document));
    }

    router.layer(CorsLayer::permissive())
}
