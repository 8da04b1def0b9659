use log::{debug, info, warn};
use once_cell::sync::OnceCell;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use std::thread::{self, ThreadId};

use crate::dispatch::handler::{HandlerDefinition, HandlerDescriptor};
use crate::error::{DiscoveryError, RegistryError};
use crate::model::{name_key, ContainerMetadata, EntitySetMetadata, RuntimeType};

/// Handlers keyed by case-folded name.
pub type HandlerMapping = HashMap<String, Arc<HandlerDescriptor>>;

/// The host's own handler discovery, consulted when nothing was registered explicitly.
pub trait HandlerDiscovery: Send + Sync {
    fn mapping(&self) -> Result<HandlerMapping, DiscoveryError>;

    fn resolve(&self, name: &str) -> Result<Option<Arc<HandlerDescriptor>>, DiscoveryError> {
        Ok(self.mapping()?.get(&name_key(name)).cloned())
    }
}

/// Discovery that knows no handlers.
#[derive(Debug, Default)]
pub struct NoHandlerDiscovery;

impl HandlerDiscovery for NoHandlerDiscovery {
    fn mapping(&self) -> Result<HandlerMapping, DiscoveryError> {
        Ok(HandlerMapping::new())
    }
}

type HandlerFactory = Box<dyn Fn() -> Vec<HandlerDescriptor> + Send + Sync>;

/// Discovery over a fixed set of handlers, built lazily on first use.
///
/// Asking for the mapping from inside the factory fails with
/// `DiscoveryError::ReentrantInitialization` instead of deadlocking. Other
/// threads asking during the build wait for it to finish.
pub struct StaticHandlerDiscovery {
    factory: HandlerFactory,
    mapping: OnceCell<HandlerMapping>,
    building_thread: Mutex<Option<ThreadId>>,
}

/// Clears the building thread on exit, including unwinding out of the factory.
struct BuildingGuard<'a>(&'a Mutex<Option<ThreadId>>);

impl<'a> BuildingGuard<'a> {
    fn enter(slot: &'a Mutex<Option<ThreadId>>) -> Self {
        *slot.lock() = Some(thread::current().id());
        Self(slot)
    }
}

impl Drop for BuildingGuard<'_> {
    fn drop(&mut self) {
        *self.0.lock() = None;
    }
}

impl StaticHandlerDiscovery {
    pub fn new<F>(factory: F) -> Self
    where
        F: Fn() -> Vec<HandlerDescriptor> + Send + Sync + 'static,
    {
        Self {
            factory: Box::new(factory),
            mapping: OnceCell::new(),
            building_thread: Mutex::new(None),
        }
    }

    fn build(&self) -> Result<HandlerMapping, DiscoveryError> {
        let _guard = BuildingGuard::enter(&self.building_thread);
        let mut mapping = HandlerMapping::new();
        for descriptor in (self.factory)() {
            let key = name_key(descriptor.name());
            if mapping.insert(key, Arc::new(descriptor)).is_some() {
                return Err(DiscoveryError::Failed(
                    "duplicate handler names in discovered handlers".to_string(),
                ));
            }
        }
        Ok(mapping)
    }
}

impl HandlerDiscovery for StaticHandlerDiscovery {
    fn mapping(&self) -> Result<HandlerMapping, DiscoveryError> {
        if let Some(mapping) = self.mapping.get() {
            return Ok(mapping.clone());
        }
        if *self.building_thread.lock() == Some(thread::current().id()) {
            return Err(DiscoveryError::ReentrantInitialization);
        }
        self.mapping.get_or_try_init(|| self.build()).cloned()
    }
}

/// Picks the handler for an entity set, or declines with `Ok(None)`.
pub type HandlerTypeSelector = dyn Fn(&EntitySetMetadata) -> Result<Option<HandlerDefinition>, RegistryError>;

/// Explicitly registered handlers layered over a fallback discovery.
///
/// Registration must finish before request traffic starts.
pub struct HandlerRegistry {
    fallback: Arc<dyn HandlerDiscovery>,
    managed: RwLock<HandlerMapping>,
}

impl HandlerRegistry {
    pub fn new(fallback: Arc<dyn HandlerDiscovery>) -> Self {
        Self {
            fallback,
            managed: RwLock::new(HandlerMapping::new()),
        }
    }

    /// The fallback mapping, treating the host's re-entrant initialization
    /// failure as "nothing discovered yet".
    fn fallback_mapping(&self) -> Result<HandlerMapping, RegistryError> {
        match self.fallback.mapping() {
            Ok(mapping) => Ok(mapping),
            Err(DiscoveryError::ReentrantInitialization) => {
                warn!("Fallback handler discovery is still initializing; treating its mapping as empty");
                Ok(HandlerMapping::new())
            }
            Err(e) => Err(e.into()),
        }
    }

    pub fn register(
        &self,
        name: &str,
        definition: HandlerDefinition,
        container: Arc<ContainerMetadata>,
    ) -> Result<Arc<HandlerDescriptor>, RegistryError> {
        if name.trim().is_empty() {
            return Err(RegistryError::BlankName);
        }

        let key = name_key(name);
        if self.fallback_mapping()?.contains_key(&key) {
            return Err(RegistryError::NamingConflict(name.to_string()));
        }

        let mut managed = self.managed.write();
        if managed.contains_key(&key) {
            return Err(RegistryError::NamingConflict(name.to_string()));
        }

        let descriptor = Arc::new(HandlerDescriptor::new(name, definition, Some(container)));
        managed.insert(key, descriptor.clone());
        debug!("Registered handler '{}' ({})", name, descriptor.handler_type());
        Ok(descriptor)
    }

    /// Register a handler for an existing entity set whose element type must be `element_type`.
    pub fn register_entity_set_handler(
        &self,
        entity_set: &str,
        element_type: &RuntimeType,
        definition: HandlerDefinition,
        container: Arc<ContainerMetadata>,
    ) -> Result<Arc<HandlerDescriptor>, RegistryError> {
        let set = container
            .get_entity_set(entity_set)
            .ok_or_else(|| RegistryError::EntitySetNotFound(entity_set.to_string()))?;
        let expected = set.element_type().runtime_type();
        if expected != element_type {
            return Err(RegistryError::ElementTypeMismatch {
                entity_set: entity_set.to_string(),
                expected: expected.clone(),
                actual: element_type.clone(),
            });
        }

        let name = set.name().to_string();
        self.register(&name, definition, container.clone())
    }

    /// Register a handler for every entity set that has none yet, as chosen by
    /// `selector`. Returns the number of handlers added.
    pub fn register_standard_handlers(
        &self,
        container: &Arc<ContainerMetadata>,
        selector: &HandlerTypeSelector,
    ) -> Result<usize, RegistryError> {
        let fallback = self.fallback_mapping()?;
        let mut added = 0;

        for entity_set in container.entity_sets() {
            let key = name_key(entity_set.name());
            if fallback.contains_key(&key) || self.managed.read().contains_key(&key) {
                debug!("Entity set '{}' already has a handler", entity_set.name());
                continue;
            }

            if let Some(definition) = selector(entity_set)? {
                self.register(entity_set.name(), definition, container.clone())?;
                added += 1;
            }
        }

        info!(
            "Registered {} standard handler(s) for container '{}'",
            added,
            container.name()
        );
        Ok(added)
    }

    /// Explicit registrations first, then the fallback.
    pub fn resolve(&self, name: &str) -> Result<Option<Arc<HandlerDescriptor>>, RegistryError> {
        if let Some(descriptor) = self.managed.read().get(&name_key(name)) {
            return Ok(Some(descriptor.clone()));
        }
        match self.fallback.resolve(name) {
            Ok(descriptor) => Ok(descriptor),
            Err(DiscoveryError::ReentrantInitialization) => {
                warn!("Fallback handler discovery is still initializing; '{}' not resolved", name);
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Union of fallback and managed handlers.
    pub fn mapping(&self) -> Result<HandlerMapping, RegistryError> {
        let mut mapping = self.fallback_mapping()?;
        for (key, descriptor) in self.managed.read().iter() {
            if mapping.insert(key.clone(), descriptor.clone()).is_some() {
                return Err(RegistryError::NamingConflict(descriptor.name().to_string()));
            }
        }
        Ok(mapping)
    }
}
