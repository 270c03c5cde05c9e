//! Addon registry.
//!
//! An addon is a named factory for extensions of one kind. Graphs
//! refer to addons by name in their node definitions; the registry is
//! consulted when a graph starts.

use std::collections::HashMap;
use std::sync::Arc;

use crate::{Extension, RuntimeError};

type Factory = dyn Fn() -> Box<dyn Extension> + Send + Sync;

/// Registry of extension factories, shared by every graph of an app.
#[derive(Clone, Default)]
pub struct AddonRegistry {
    factories: HashMap<String, Arc<Factory>>,
}

impl AddonRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a factory under `name`, replacing any previous
    /// registration.
    pub fn register<E, F>(&mut self, name: impl Into<String>, factory: F)
    where
        E: Extension,
        F: Fn() -> E + Send + Sync + 'static,
    {
        self.factories.insert(
            name.into(),
            Arc::new(move || Box::new(factory()) as Box<dyn Extension>),
        );
    }

    /// Registers a factory that already produces boxed extensions.
    pub fn register_boxed(
        &mut self,
        name: impl Into<String>,
        factory: impl Fn() -> Box<dyn Extension> + Send + Sync + 'static,
    ) {
        self.factories.insert(name.into(), Arc::new(factory));
    }

    /// Returns `true` if `name` is registered.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// Instantiates an extension from the named addon.
    ///
    /// # Errors
    ///
    /// `RT_INVALID_ARGUMENT` for an unknown addon name.
    pub fn instantiate(&self, name: &str) -> Result<Box<dyn Extension>, RuntimeError> {
        self.factories
            .get(name)
            .map(|f| f())
            .ok_or_else(|| RuntimeError::InvalidArgument(format!("unknown addon: '{name}'")))
    }
}

impl std::fmt::Debug for AddonRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AddonRegistry")
            .field("addons", &self.factories.keys().collect::<Vec<_>>())
            .finish()
    }
}
