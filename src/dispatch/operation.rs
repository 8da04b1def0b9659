use futures::future::{BoxFuture, FutureExt};
use itertools::Itertools;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use crate::dispatch::resource_path::ResourceRequest;
use crate::model::{ContainerMetadata, EntityRecord, EntityTypeMetadata, KeyValue};
use crate::store::traits::DataContext;

/// Name of the generic read operation over any navigation property.
pub const GET_NAVIGATION_PROPERTY: &str = "GetNavigationProperty";
/// Name of the generic write operation over any navigation property.
pub const POST_NAVIGATION_PROPERTY: &str = "PostNavigationProperty";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParameterKind {
    /// The key from the request path
    Key,
    /// The request body
    Entity,
    /// An entity created earlier in the same batch, whose identity may not be final
    ChangeSetEntity,
}

impl ParameterKind {
    /// Whether the request carries a value for a parameter of this kind
    pub fn is_bindable(&self, request: &ResourceRequest) -> bool {
        match self {
            ParameterKind::Key => request.path.key().is_some(),
            ParameterKind::Entity => request.body.is_some(),
            ParameterKind::ChangeSetEntity => request.changeset_entity.is_some(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParameterDescriptor {
    pub name: String,
    pub kind: ParameterKind,
}

impl ParameterDescriptor {
    pub fn new(name: &str, kind: ParameterKind) -> Self {
        Self {
            name: name.to_string(),
            kind,
        }
    }
}

/// Everything an operation needs to run.
#[derive(Clone)]
pub struct Invocation {
    pub container: Arc<ContainerMetadata>,
    pub store: Arc<dyn DataContext>,
    pub entity_set: String,
    pub key: Option<KeyValue>,
    pub body: Option<Value>,
    pub changeset_entity: Option<EntityRecord>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum OperationOutcome {
    Entity(EntityRecord),
    Collection(Vec<EntityRecord>),
    Created(EntityRecord),
    NoContent,
    NotFound,
    /// The request was understood but its input is unusable
    Rejected(String),
}

pub type OperationFuture = BoxFuture<'static, anyhow::Result<OperationOutcome>>;
pub type Invoker = Arc<dyn Fn(Invocation) -> OperationFuture + Send + Sync>;

/// Wrap an async function as an operation invoker.
pub fn invoker<F, Fut>(f: F) -> Invoker
where
    F: Fn(Invocation) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<OperationOutcome>> + Send + 'static,
{
    Arc::new(move |invocation| f(invocation).boxed())
}

/// Read or write through a navigation property.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NavigationIntent {
    Read,
    Write,
}

impl NavigationIntent {
    /// Prefix of the concrete operation names this intent expands to
    pub fn prefix(&self) -> &'static str {
        match self {
            NavigationIntent::Read => "Get",
            NavigationIntent::Write => "Post",
        }
    }

    pub fn generic_name(&self) -> &'static str {
        match self {
            NavigationIntent::Read => GET_NAVIGATION_PROPERTY,
            NavigationIntent::Write => POST_NAVIGATION_PROPERTY,
        }
    }
}

/// The navigation property a generic operation is specialised for.
#[derive(Debug, Clone)]
pub struct NavigationBinding {
    pub navigation: String,
    pub many: bool,
    /// Declared type on the far end of the relationship
    pub target_type: Arc<EntityTypeMetadata>,
    /// Set the relationship points to, if the source set declares one
    pub target_entity_set: Option<String>,
}

pub type Specializer = Arc<dyn Fn(&NavigationBinding) -> Invoker + Send + Sync>;

#[derive(Clone)]
pub enum OperationBody {
    Concrete(Invoker),
    /// Defined over "the target type of some navigation property"; must be
    /// specialised before it can run.
    Generic {
        intent: NavigationIntent,
        specialize: Specializer,
    },
}

/// One operation a handler exposes.
#[derive(Clone)]
pub struct OperationDescriptor {
    name: String,
    parameters: Vec<ParameterDescriptor>,
    body: OperationBody,
}

impl OperationDescriptor {
    pub fn concrete(name: &str, parameters: Vec<ParameterDescriptor>, invoker: Invoker) -> Self {
        Self {
            name: name.to_string(),
            parameters,
            body: OperationBody::Concrete(invoker),
        }
    }

    pub fn generic(
        intent: NavigationIntent,
        parameters: Vec<ParameterDescriptor>,
        specialize: Specializer,
    ) -> Self {
        Self {
            name: intent.generic_name().to_string(),
            parameters,
            body: OperationBody::Generic { intent, specialize },
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn parameters(&self) -> &[ParameterDescriptor] {
        &self.parameters
    }

    pub fn generic_intent(&self) -> Option<NavigationIntent> {
        match &self.body {
            OperationBody::Generic { intent, .. } => Some(*intent),
            OperationBody::Concrete(_) => None,
        }
    }

    pub fn has_change_set_entity_parameter(&self) -> bool {
        self.parameters
            .iter()
            .any(|p| p.kind == ParameterKind::ChangeSetEntity)
    }

    pub fn first_parameter_is_change_set_entity(&self) -> bool {
        self.parameters
            .first()
            .map_or(false, |p| p.kind == ParameterKind::ChangeSetEntity)
    }

    /// Concrete copy of a generic operation for one navigation property,
    /// named `{prefix}{navigation}`. `None` for concrete operations.
    pub fn specialize(&self, binding: &NavigationBinding) -> Option<OperationDescriptor> {
        match &self.body {
            OperationBody::Generic { intent, specialize } => Some(OperationDescriptor {
                name: format!("{}{}", intent.prefix(), binding.navigation),
                parameters: self.parameters.clone(),
                body: OperationBody::Concrete(specialize(binding)),
            }),
            OperationBody::Concrete(_) => None,
        }
    }

    /// Start the operation. Generic operations cannot run unspecialised.
    pub fn invoke(&self, invocation: Invocation) -> anyhow::Result<OperationFuture> {
        match &self.body {
            OperationBody::Concrete(invoker) => Ok(invoker(invocation)),
            OperationBody::Generic { .. } => {
                anyhow::bail!("Generic operation '{}' was selected without being specialised", self.name)
            }
        }
    }
}

impl fmt::Debug for OperationDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OperationDescriptor")
            .field("name", &self.name)
            .field("parameters", &self.parameters)
            .field("generic", &self.generic_intent())
            .finish()
    }
}

/// Candidate operations of one handler, grouped by name.
#[derive(Debug, Clone, Default)]
pub struct OperationMap {
    by_name: HashMap<String, Vec<OperationDescriptor>>,
}

impl OperationMap {
    pub fn new(operations: impl IntoIterator<Item = OperationDescriptor>) -> Self {
        Self {
            by_name: operations
                .into_iter()
                .into_group_map_by(|op| op.name().to_string()),
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    /// All candidates sharing `name`, in declaration order
    pub fn get(&self, name: &str) -> &[OperationDescriptor] {
        self.by_name.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.by_name.keys().map(String::as_str).sorted()
    }

    pub fn operations(&self) -> impl Iterator<Item = &OperationDescriptor> {
        self.by_name.values().flatten()
    }

    /// Total number of operations, counting overloads separately
    pub fn len(&self) -> usize {
        self.by_name.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }
}
