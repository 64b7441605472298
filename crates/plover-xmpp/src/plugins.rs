//! Plugin registry.
//!
//! Feature collaborators (roster, MUC, pub-sub, …) attach behavior through
//! named plugins. The registry is an explicit typed map: instances are
//! reached through a lookup that fails loudly with
//! [`XmppError::PluginNotRegistered`] once a plugin is gone — there is no
//! ambient field access and no silent `None`.
//!
//! Registration is dependency-aware: registering a plugin transitively
//! registers every declared dependency (with a warning), so a plugin graph
//! is never partially initialized. All instances are constructed before any
//! `init` runs, so one plugin's `init` may reference another's constructed
//! instance.

use std::any::Any;
use std::collections::HashMap;

use tracing::{debug, warn};

use crate::error::XmppError;

/// A feature plugin bound to one connection.
pub trait Plugin: Any + Send {
    /// Called once after every registered plugin has been constructed.
    ///
    /// The connection handle is for registering stanza-plugins, event-
    /// plugins, and interceptors; retain at most a
    /// [`crate::connection::WeakConnection`] from it.
    fn init(&mut self, connection: &crate::connection::Connection) -> Result<(), XmppError> {
        let _ = connection;
        Ok(())
    }

    /// Downcast support for typed lookup.
    fn as_any(&self) -> &dyn Any;
}

/// Constructor for a declared plugin.
pub type PluginCtor = Box<dyn Fn() -> Box<dyn Plugin> + Send>;

struct PluginSpec {
    dependencies: Vec<String>,
    ctor: PluginCtor,
}

struct RegisteredPlugin {
    dependencies: Vec<String>,
    instance: Option<Box<dyn Plugin>>,
}

/// Name-keyed registry of declared and registered plugins.
#[derive(Default)]
pub struct PluginRegistry {
    /// Known constructors, by name
    catalog: HashMap<String, PluginSpec>,
    /// Registration order after dependency closure
    order: Vec<String>,
    registered: HashMap<String, RegisteredPlugin>,
}

impl PluginRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a plugin constructor under a name, with its dependencies.
    ///
    /// Declaring does not register; it makes the name available to
    /// [`PluginRegistry::register`] and to automatic dependency
    /// registration.
    pub fn declare(
        &mut self,
        name: impl Into<String>,
        dependencies: Vec<String>,
        ctor: PluginCtor,
    ) {
        self.catalog.insert(
            name.into(),
            PluginSpec {
                dependencies,
                ctor,
            },
        );
    }

    /// Register a declared plugin and, transitively, its dependencies.
    pub fn register(&mut self, name: &str) -> Result<(), XmppError> {
        if self.registered.contains_key(name) {
            return Ok(());
        }
        let spec = self
            .catalog
            .get(name)
            .ok_or_else(|| XmppError::PluginNotRegistered(format!("unknown plugin {}", name)))?;
        let dependencies = spec.dependencies.clone();

        debug!(plugin = name, "Registering plugin");
        self.registered.insert(
            name.to_string(),
            RegisteredPlugin {
                dependencies: dependencies.clone(),
                instance: None,
            },
        );
        self.order.push(name.to_string());

        for dep in &dependencies {
            if !self.registered.contains_key(dep) {
                warn!(
                    plugin = name,
                    dependency = %dep,
                    "Plugin requires an unregistered dependency, registering it automatically"
                );
                self.register(dep)?;
            }
        }
        Ok(())
    }

    /// Whether a plugin is currently registered.
    pub fn is_registered(&self, name: &str) -> bool {
        self.registered.contains_key(name)
    }

    /// Construct every registered plugin that has no instance yet, in
    /// registration order. Returns the names needing `init`.
    pub fn instantiate_all(&mut self) -> Vec<String> {
        let mut pending = Vec::new();
        for name in self.order.clone() {
            if let Some(entry) = self.registered.get_mut(&name) {
                if entry.instance.is_none() {
                    let spec = self
                        .catalog
                        .get(&name)
                        .expect("registered plugin has a catalog entry");
                    entry.instance = Some((spec.ctor)());
                    pending.push(name);
                }
            }
        }
        pending
    }

    /// Temporarily take an instance out (for `init` without holding the
    /// registry borrow).
    pub fn take(&mut self, name: &str) -> Option<Box<dyn Plugin>> {
        self.registered.get_mut(name)?.instance.take()
    }

    /// Return an instance taken with [`PluginRegistry::take`].
    pub fn put_back(&mut self, name: &str, instance: Box<dyn Plugin>) {
        if let Some(entry) = self.registered.get_mut(name) {
            entry.instance = Some(instance);
        }
    }

    /// Look up a registered plugin instance.
    pub fn get(&self, name: &str) -> Result<&dyn Plugin, XmppError> {
        self.registered
            .get(name)
            .and_then(|entry| entry.instance.as_deref())
            .ok_or_else(|| XmppError::PluginNotRegistered(name.to_string()))
    }

    /// Deregister a plugin, cascading to everything that depends on it.
    ///
    /// Dependents are removed first so no registered plugin is ever left
    /// pointing at a missing dependency.
    pub fn deregister(&mut self, name: &str) {
        if !self.registered.contains_key(name) {
            return;
        }
        let dependents: Vec<String> = self
            .registered
            .iter()
            .filter(|(_, entry)| entry.dependencies.iter().any(|d| d == name))
            .map(|(n, _)| n.clone())
            .collect();
        for dependent in dependents {
            self.deregister(&dependent);
        }
        debug!(plugin = name, "Deregistering plugin");
        self.registered.remove(name);
        self.order.retain(|n| n != name);
    }

    /// Drop every registration (declared constructors are kept).
    pub fn clear(&mut self) {
        self.registered.clear();
        self.order.clear();
    }

    /// Registration order after dependency closure.
    pub fn order(&self) -> &[String] {
        &self.order
    }
}
