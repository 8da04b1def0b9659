use axum::http::Method;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

use crate::api::state::{ExecutedResponse, ServiceState};
use crate::dispatch::{ResourcePath, ResourceRequest};
use crate::error::{ApiError, ErrorResponse};
use crate::logic::locator::created_entity_path;
use crate::model::EntityRecord;

#[derive(Debug, Deserialize)]
pub struct BatchRequest {
    pub requests: Vec<BatchItem>,
}

#[derive(Debug, Deserialize)]
pub struct BatchItem {
    pub id: String,
    pub method: String,
    pub url: String,
    #[serde(default)]
    pub body: Option<Value>,
}

#[derive(Debug, Serialize)]
pub struct BatchResponse {
    pub responses: Vec<BatchItemResponse>,
}

#[derive(Debug, Serialize)]
pub struct BatchItemResponse {
    pub id: String,
    pub status: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
}

/// Runs the requests of one batch in order. Entities created by earlier
/// requests can be addressed by later ones as `$<id>`.
pub async fn execute_batch(state: &ServiceState, batch: BatchRequest) -> BatchResponse {
    let mut created: HashMap<String, EntityRecord> = HashMap::new();
    let mut responses = Vec::with_capacity(batch.requests.len());

    for item in batch.requests {
        let id = item.id.clone();
        let response = match execute_item(state, item, &created).await {
            Ok(response) => {
                if let Some(entity) = response.created {
                    created.insert(id.clone(), entity);
                }
                BatchItemResponse {
                    id,
                    status: response.status.as_u16(),
                    location: response.location,
                    body: response.body,
                }
            }
            Err(e) => {
                let status = e.status();
                warn!("Batch request '{}' failed ({}): {}", id, status, e);
                BatchItemResponse {
                    id,
                    status: status.as_u16(),
                    location: None,
                    body: serde_json::to_value(ErrorResponse::new(&e.to_string())).ok(),
                }
            }
        };
        responses.push(response);
    }

    BatchResponse { responses }
}

async fn execute_item(
    state: &ServiceState,
    item: BatchItem,
    created: &HashMap<String, EntityRecord>,
) -> Result<ExecutedResponse, ApiError> {
    let method = Method::from_bytes(item.method.to_ascii_uppercase().as_bytes())
        .map_err(|_| ApiError::BadRequest(format!("Invalid method '{}'", item.method)))?;
    let path = ResourcePath::parse(relative_url(state, &item.url))?;

    let request = match path {
        ResourcePath::ContentIdReference { content_id, navigation } => {
            let entity = created.get(&content_id).ok_or_else(|| {
                ApiError::NotFound(format!("No entity was created by batch request '{}'", content_id))
            })?;
            let canonical = created_entity_path(&state.container, entity).map_err(anyhow::Error::from)?;
            let rewritten = match navigation {
                Some(navigation) => format!("{}/{}", canonical, navigation),
                None => canonical,
            };
            debug!("Batch reference ${} rewritten to {}", content_id, rewritten);
            ResourceRequest::new(method, ResourcePath::parse(&rewritten)?)
                .with_content_id_reference(&content_id, entity.clone())
        }
        path => ResourceRequest::new(method, path),
    }
    .with_body(item.body);

    state.execute(request).await
}

/// Strip the service root or route prefix from an absolute or rooted URL.
fn relative_url<'a>(state: &ServiceState, url: &'a str) -> &'a str {
    let root = state.service_root();
    if let Some(rest) = url.strip_prefix(root.as_str()) {
        return rest;
    }
    let prefix = state.config.route_prefix();
    let rooted = url.trim_start_matches('/');
    match rooted.strip_prefix(prefix) {
        Some(rest) if !prefix.is_empty() && (rest.is_empty() || rest.starts_with('/')) => rest,
        _ => rooted,
    }
}
