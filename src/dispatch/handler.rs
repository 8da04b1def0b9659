use std::sync::Arc;

use crate::dispatch::operation::OperationDescriptor;
use crate::model::ContainerMetadata;

/// The static shape of a handler type: a type name plus the operations it exposes.
#[derive(Debug, Clone)]
pub struct HandlerDefinition {
    handler_type: String,
    operations: Vec<OperationDescriptor>,
}

impl HandlerDefinition {
    pub fn new(handler_type: &str) -> Self {
        Self {
            handler_type: handler_type.to_string(),
            operations: Vec::new(),
        }
    }

    pub fn operation(mut self, operation: OperationDescriptor) -> Self {
        self.operations.push(operation);
        self
    }

    pub fn handler_type(&self) -> &str {
        &self.handler_type
    }

    pub fn operations(&self) -> &[OperationDescriptor] {
        &self.operations
    }
}

/// A handler bound to an entity set name.
///
/// The container back-reference is what lets the action resolver expand
/// generic navigation operations; descriptors without one are never expanded.
#[derive(Debug, Clone)]
pub struct HandlerDescriptor {
    name: String,
    definition: HandlerDefinition,
    container: Option<Arc<ContainerMetadata>>,
}

impl HandlerDescriptor {
    pub fn new(name: &str, definition: HandlerDefinition, container: Option<Arc<ContainerMetadata>>) -> Self {
        Self {
            name: name.to_string(),
            definition,
            container,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn handler_type(&self) -> &str {
        self.definition.handler_type()
    }

    pub fn definition(&self) -> &HandlerDefinition {
        &self.definition
    }

    pub fn operations(&self) -> &[OperationDescriptor] {
        self.definition.operations()
    }

    pub fn container(&self) -> Option<&Arc<ContainerMetadata>> {
        self.container.as_ref()
    }
}
