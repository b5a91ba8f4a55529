//! Module Registry
//!
//! Catalog of instantiable module types, looked up by name when loading
//! documents or handling console commands. Types are registered explicitly;
//! registering a name twice replaces the earlier entry in place.

use crate::connector::{ChildConnector, ParentConnector};
use crate::module::RackModule;
use crate::modules::{Adsr, Amplifier, Mixer, Scope, Vco};
use crate::pcm::{PcmSink, PcmSource};
use std::collections::HashMap;
use std::fmt;
use tracing::debug;

/// Module factory function type
pub type ModuleFactory = Box<dyn Fn() -> Box<dyn RackModule> + Send + Sync>;

/// A registered module type
pub struct ModuleDescriptor {
    name: String,
    factory: ModuleFactory,
}

impl ModuleDescriptor {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Build a fresh instance with default parameters
    pub fn create_instance(&self) -> Box<dyn RackModule> {
        (self.factory)()
    }
}

impl fmt::Debug for ModuleDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleDescriptor")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// Registry of available module types for instantiation
#[derive(Debug)]
pub struct ModuleRegistry {
    descriptors: Vec<ModuleDescriptor>,
    index: HashMap<String, usize>,
}

impl ModuleRegistry {
    /// Create a registry holding the built-in modules
    pub fn new() -> Self {
        let mut registry = Self::empty();
        registry.register_builtin();
        registry
    }

    /// Create a registry with no modules
    pub fn empty() -> Self {
        Self {
            descriptors: Vec::new(),
            index: HashMap::new(),
        }
    }

    fn register_builtin(&mut self) {
        self.register::<Vco>();
        self.register::<Adsr>();
        self.register::<Mixer>();
        self.register::<Amplifier>();
        self.register::<Scope>();
        self.register::<PcmSource>();
        self.register::<PcmSink>();
        self.register::<ParentConnector>();
        self.register::<ChildConnector>();
    }

    /// Register a module type under the name its default instance reports
    pub fn register<M: RackModule + Default>(&mut self) {
        let name = M::default().name().to_string();
        self.register_factory(name, || Box::new(M::default()));
    }

    /// Register a factory under `name`, replacing any earlier entry
    pub fn register_factory<F>(&mut self, name: impl Into<String>, factory: F)
    where
        F: Fn() -> Box<dyn RackModule> + Send + Sync + 'static,
    {
        let descriptor = ModuleDescriptor {
            name: name.into(),
            factory: Box::new(factory),
        };
        match self.index.get(&descriptor.name) {
            Some(&i) => {
                debug!("registry: replacing module type {}", descriptor.name);
                self.descriptors[i] = descriptor;
            }
            None => {
                self.index
                    .insert(descriptor.name.clone(), self.descriptors.len());
                self.descriptors.push(descriptor);
            }
        }
    }

    pub fn find(&self, name: &str) -> Option<&ModuleDescriptor> {
        self.index.get(name).map(|&i| &self.descriptors[i])
    }

    /// Instantiate a module by type name
    pub fn create_instance(&self, name: &str) -> Option<Box<dyn RackModule>> {
        self.find(name).map(ModuleDescriptor::create_instance)
    }

    /// Registered types in registration order
    pub fn descriptors(&self) -> &[ModuleDescriptor] {
        &self.descriptors
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.descriptors.iter().map(|d| d.name())
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }
}

impl Default for ModuleRegistry {
    fn default() -> Self {
        Self::new()
    }
}
