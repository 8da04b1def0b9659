use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::Serialize;
use thiserror::Error;

use crate::model::{ContextType, RuntimeType};

/// Fatal configuration errors raised while building container metadata.
///
/// None of these are recoverable: a container that fails to build leaves the
/// service without a consistent graph, so startup must abort.
#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("Unable to find native type for wire entity type '{wire_type}'")]
    NativeTypeNotFound { wire_type: String },

    #[error("Entity container '{name}' not found in the wire model")]
    ContainerNotFound { name: String },

    #[error("Entity set name '{entity_set}' is declared more than once (names are case-insensitive)")]
    DuplicateEntitySet { entity_set: String },

    #[error("Navigation property '{entity_type}.{property}' targets unknown entity type '{target_type}'")]
    NavigationTypeNotFound {
        entity_type: String,
        property: String,
        target_type: String,
    },

    #[error("Entity set '{entity_set}' of the native container is missing from the wire model")]
    EntitySetNotExported { entity_set: String },

    #[error("Element type '{element_type}' of entity set '{entity_set}' could not be resolved")]
    ElementTypeNotFound {
        entity_set: String,
        element_type: String,
    },

    #[error("Navigation target '{target}' of '{entity_set}.{property}' could not be resolved")]
    NavigationTargetNotFound {
        entity_set: String,
        property: String,
        target: String,
    },

    #[error("Navigation property '{property}' targeted by entity set '{entity_set}' is not declared on its element type hierarchy")]
    NavigationPropertyNotFound { entity_set: String, property: String },

    #[error("Entity type '{entity_type}' declares no key properties")]
    MissingKey { entity_type: String },

    #[error("Key property '{property}' is missing from entity of type {runtime_type}")]
    KeyPropertyMissing {
        runtime_type: RuntimeType,
        property: String,
    },

    #[error("Key property '{property}' of {runtime_type} has a value that is not a valid {expected}")]
    KeyPropertyInvalid {
        runtime_type: RuntimeType,
        property: String,
        expected: String,
    },

    #[error("No entity set holds instances of {runtime_type}")]
    NoEntitySetForType { runtime_type: RuntimeType },

    #[error("Failed to load the schema of data context {context_type}: {message}")]
    SchemaUnavailable {
        context_type: ContextType,
        message: String,
    },
}

/// Errors raised by the handler registry. All of them are startup-time failures.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Handler with name '{0}' already exists")]
    NamingConflict(String),

    #[error("Handler names must not be blank")]
    BlankName,

    #[error("Entity set named '{0}' not found in container")]
    EntitySetNotFound(String),

    #[error("Entity set named '{entity_set}' should have type {expected}; {actual} was passed in")]
    ElementTypeMismatch {
        entity_set: String,
        expected: RuntimeType,
        actual: RuntimeType,
    },

    #[error("No default handler exists for entity set '{entity_set}': {reason}")]
    NoDefaultHandler { entity_set: String, reason: String },

    #[error(transparent)]
    Discovery(#[from] DiscoveryError),
}

/// Failure modes of the host framework's handler discovery.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    /// The lazily built mapping was requested while it was still being built.
    #[error("Handler discovery was re-entered during its own initialization")]
    ReentrantInitialization,

    #[error("Handler discovery failed: {0}")]
    Failed(String),
}

/// Request-time resolution failures.
#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("No matching resource found for {0}")]
    NotFound(String),

    /// A routing convention named an operation the handler does not expose.
    #[error("Operation '{operation}' selected for {path} does not exist on its handler")]
    MissingOperation { operation: String, path: String },

    #[error("Multiple operations named '{operation}' match {path}")]
    Ambiguous { operation: String, path: String },
}

/// Malformed resource paths.
#[derive(Debug, Error, PartialEq)]
pub enum PathError {
    #[error("Resource path is empty")]
    Empty,

    #[error("Malformed key segment '{0}'")]
    MalformedKey(String),

    #[error("Key literal '{literal}' is not a valid {expected}")]
    InvalidKeyLiteral { literal: String, expected: String },

    #[error("Key has {actual} values but entity type '{entity_type}' declares {expected}")]
    KeyArity {
        entity_type: String,
        expected: usize,
        actual: usize,
    },

    #[error("Unexpected segment '{0}'")]
    UnexpectedSegment(String),
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl ErrorResponse {
    pub fn new(message: &str) -> Self {
        Self {
            error: message.to_string(),
        }
    }
}

/// Error type returned by the HTTP layer.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Resolve(#[from] ResolveError),

    #[error(transparent)]
    Path(#[from] PathError),

    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    NotFound(String),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Resolve(ResolveError::NotFound(_))
            | ApiError::Resolve(ResolveError::MissingOperation { .. })
            | ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Resolve(ResolveError::Ambiguous { .. }) | ApiError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            ApiError::Path(_) | ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if let ApiError::Resolve(ResolveError::MissingOperation { .. }) = &self {
            // Client-visible as not-found, but it is a handler/convention mismatch
            log::error!("Routing inconsistency: {}", self);
        } else if status.is_server_error() {
            log::error!("Request failed: {:#}", self);
        } else {
            log::warn!("Request rejected ({}): {}", status, self);
        }
        (status, Json(ErrorResponse::new(&self.to_string()))).into_response()
    }
}
