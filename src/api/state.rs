use anyhow::Context;
use axum::http::StatusCode;
use log::debug;
use serde::Serialize;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use std::sync::Arc;

use crate::config::AppConfig;
use crate::dispatch::{ActionSelector, HandlerRegistry, Invocation, OperationOutcome, ResourcePath, ResourceRequest};
use crate::error::{ApiError, ResolveError};
use crate::logic::locator::created_entity_locator;
use crate::model::{ContainerMetadata, EntityRecord};
use crate::store::DataContext;

pub type AppState = Arc<ServiceState>;

/// Everything a request needs, shared by all requests.
pub struct ServiceState {
    pub config: AppConfig,
    pub container: Arc<ContainerMetadata>,
    pub store: Arc<dyn DataContext>,
    pub registry: HandlerRegistry,
    pub selector: ActionSelector,
    metadata_etag: String,
}

/// Result of executing one resource request.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutedResponse {
    pub status: StatusCode,
    pub location: Option<String>,
    pub body: Option<Value>,
    /// The entity a create produced, kept for batch content-id references
    pub created: Option<EntityRecord>,
}

impl ExecutedResponse {
    fn ok(body: Value) -> Self {
        Self {
            status: StatusCode::OK,
            location: None,
            body: Some(body),
            created: None,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ServiceDocument {
    #[serde(rename = "@odata.context")]
    pub context: String,
    pub value: Vec<ServiceDocumentEntry>,
}

#[derive(Debug, Serialize)]
pub struct ServiceDocumentEntry {
    pub name: String,
    pub kind: &'static str,
    pub url: String,
    #[serde(rename = "elementType")]
    pub element_type: String,
}

impl ServiceState {
    pub fn new(
        config: AppConfig,
        container: Arc<ContainerMetadata>,
        store: Arc<dyn DataContext>,
        registry: HandlerRegistry,
        selector: ActionSelector,
    ) -> anyhow::Result<Self> {
        let metadata = serde_json::to_vec(container.wire_model()).context("Failed to serialise the wire model")?;
        let metadata_etag = format!("\"{}\"", hex::encode(Sha256::digest(&metadata)));

        Ok(Self {
            config,
            container,
            store,
            registry,
            selector,
            metadata_etag,
        })
    }

    /// Quoted ETag of the `$metadata` document
    pub fn metadata_etag(&self) -> &str {
        &self.metadata_etag
    }

    pub fn service_root(&self) -> String {
        self.config.service_root()
    }

    pub fn service_document(&self) -> ServiceDocument {
        ServiceDocument {
            context: format!("{}/$metadata", self.service_root()),
            value: self
                .container
                .entity_sets()
                .iter()
                .map(|set| ServiceDocumentEntry {
                    name: set.name().to_string(),
                    kind: "EntitySet",
                    url: set.name().to_string(),
                    element_type: set.element_type().wire_name(),
                })
                .collect(),
        }
    }

    /// Render an entity with its wire type annotation.
    pub fn entity_json(&self, entity: &EntityRecord) -> Result<Value, ApiError> {
        let entity_type = self
            .container
            .get_entity_type_for(&entity.runtime_type)
            .with_context(|| format!("No entity type is mapped to {}", entity.runtime_type))?;
        Ok(entity.to_json(&entity_type.wire_name()))
    }

    /// Resolve a request to a handler operation, run it and shape the result.
    pub async fn execute(&self, request: ResourceRequest) -> Result<ExecutedResponse, ApiError> {
        match &request.path {
            ResourcePath::ServiceDocument => {
                let document = serde_json::to_value(self.service_document()).context("Failed to render service document")?;
                return Ok(ExecutedResponse::ok(document));
            }
            ResourcePath::Metadata => {
                let metadata = serde_json::to_value(self.container.wire_model()).context("Failed to render metadata")?;
                return Ok(ExecutedResponse::ok(metadata));
            }
            ResourcePath::Batch => {
                return Err(ApiError::BadRequest("Batches cannot be nested".to_string()));
            }
            ResourcePath::ContentIdReference { content_id, .. } => {
                return Err(ApiError::NotFound(format!(
                    "Content-id reference '${}' is only valid inside a batch",
                    content_id
                )));
            }
            _ => {}
        }

        let path = request.path.to_string();
        let set_name = request.path.entity_set().unwrap_or_default();
        let entity_set = self
            .container
            .get_entity_set(set_name)
            .ok_or_else(|| ResolveError::NotFound(path.clone()))?;
        let handler = self
            .registry
            .resolve(entity_set.name())
            .map_err(anyhow::Error::from)?
            .ok_or_else(|| ResolveError::NotFound(path.clone()))?;

        let key = request
            .path
            .key()
            .map(|literals| entity_set.element_type().parse_key(literals))
            .transpose()?;
        let operation = self.selector.select(&request, &handler)?;
        debug!("{} {} -> {}.{}", request.method, path, handler.name(), operation.name());

        let invocation = Invocation {
            container: handler.container().cloned().unwrap_or_else(|| self.container.clone()),
            store: self.store.clone(),
            entity_set: entity_set.name().to_string(),
            key,
            body: request.body,
            changeset_entity: request.changeset_entity,
        };
        let outcome = operation.invoke(invocation)?.await?;

        match outcome {
            OperationOutcome::Entity(entity) => Ok(ExecutedResponse::ok(self.entity_json(&entity)?)),
            OperationOutcome::Collection(entities) => {
                let value = entities
                    .iter()
                    .map(|entity| self.entity_json(entity))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(ExecutedResponse::ok(json!({ "value": value })))
            }
            OperationOutcome::Created(entity) => {
                let location = created_entity_locator(&self.container, &self.service_root(), &entity)
                    .map_err(anyhow::Error::from)?;
                Ok(ExecutedResponse {
                    status: StatusCode::CREATED,
                    location: Some(location),
                    body: Some(self.entity_json(&entity)?),
                    created: Some(entity),
                })
            }
            OperationOutcome::NoContent => Ok(ExecutedResponse {
                status: StatusCode::NO_CONTENT,
                location: None,
                body: None,
                created: None,
            }),
            OperationOutcome::NotFound => Err(ApiError::NotFound(format!("No entity found at {}", path))),
            OperationOutcome::Rejected(reason) => Err(ApiError::BadRequest(reason)),
        }
    }
}
