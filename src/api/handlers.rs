use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{header, HeaderMap, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Json, Response},
};
use serde::Serialize;
use serde_json::Value;

use crate::api::batch::{execute_batch, BatchRequest, BatchResponse};
use crate::api::state::{AppState, ExecutedResponse, ServiceDocument};
use crate::dispatch::{ResourcePath, ResourceRequest};
use crate::error::ApiError;

/// Simple health check endpoint
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: String,
}

pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        timestamp: chrono::Utc::now().to_rfc3339(),
    })
}

/// Entity sets exposed by the service
pub async fn get_service_document(State(state): State<AppState>) -> Json<ServiceDocument> {
    Json(state.service_document())
}

/// The reconciled wire model, with an ETag for conditional requests
pub async fn get_metadata(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let etag = state.metadata_etag();
    let unchanged = headers
        .get(header::IF_NONE_MATCH)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.split(',').any(|tag| tag.trim() == etag || tag.trim() == "*"));

    let mut response = if unchanged {
        StatusCode::NOT_MODIFIED.into_response()
    } else {
        Json(state.container.wire_model().clone()).into_response()
    };
    if let Ok(value) = HeaderValue::from_str(etag) {
        response.headers_mut().insert(header::ETAG, value);
    }
    response
}

pub async fn post_batch(
    State(state): State<AppState>,
    Json(batch): Json<BatchRequest>,
) -> Json<BatchResponse> {
    Json(execute_batch(&state, batch).await)
}

/// Any request below the route prefix that addresses an entity set, an
/// entity or a navigation property.
pub async fn dispatch_resource(
    State(state): State<AppState>,
    method: Method,
    Path(path): Path<String>,
    body: Bytes,
) -> Result<Response, ApiError> {
    let path = ResourcePath::parse(&path)?;
    let body = if body.is_empty() {
        None
    } else {
        Some(
            serde_json::from_slice::<Value>(&body)
                .map_err(|e| ApiError::BadRequest(format!("Request body is not valid JSON: {}", e)))?,
        )
    };

    let request = ResourceRequest::new(method, path).with_body(body);
    let executed = state.execute(request).await?;
    Ok(executed_response(executed))
}

fn executed_response(executed: ExecutedResponse) -> Response {
    let mut response = match executed.body {
        Some(body) => (executed.status, Json(body)).into_response(),
        None => executed.status.into_response(),
    };
    if let Some(location) = executed.location.and_then(|l| HeaderValue::from_str(&l).ok()) {
        response.headers_mut().insert(header::LOCATION, location);
    }
    response
}
