//! # Service registry: name → service, for late-binding lookup.
//!
//! Not part of supervision: registering a service neither starts nor attaches
//! it. Lookups never block and never wait for a name to appear; callers that
//! need a service registered later must poll or be started after it.
//!
//! ## Rules
//! - One process-wide registry ([`Registry::global`], [`register`], [`lookup`]).
//! - Tests build a private [`Registry::new`] for isolation.
//! - Registering an existing name replaces the entry and returns the old one.

use std::collections::HashMap;
use std::sync::OnceLock;

use parking_lot::RwLock;

use crate::core::service::Service;

/// Mapping from name to service.
#[derive(Default)]
pub struct Registry {
    services: RwLock<HashMap<String, Service>>,
}

impl Registry {
    /// Creates an empty, private registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide registry.
    pub fn global() -> &'static Registry {
        static GLOBAL: OnceLock<Registry> = OnceLock::new();
        GLOBAL.get_or_init(Registry::new)
    }

    /// Stores `service` under `name`; returns the service it replaced.
    pub fn register(&self, name: impl Into<String>, service: Service) -> Option<Service> {
        self.services.write().insert(name.into(), service)
    }

    /// The service registered under `name`, if any.
    pub fn lookup(&self, name: &str) -> Option<Service> {
        self.services.read().get(name).cloned()
    }

    /// Removes and returns the service registered under `name`.
    pub fn unregister(&self, name: &str) -> Option<Service> {
        self.services.write().remove(name)
    }

    /// Sorted list of registered names.
    pub fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self.services.read().keys().cloned().collect();
        names.sort_unstable();
        names
    }

    /// True if nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.services.read().is_empty()
    }

    /// Removes every entry.
    pub fn clear(&self) {
        self.services.write().clear();
    }

    /// Handle that resolves `name` on every access.
    pub fn named(&self, name: impl Into<String>) -> NamedRef<'_> {
        NamedRef {
            registry: self,
            name: name.into(),
        }
    }
}

/// Late-bound reference to a registered service.
///
/// Holds a name, not a service: [`get`](NamedRef::get) sees whatever is
/// registered at call time, including replacements.
pub struct NamedRef<'a> {
    registry: &'a Registry,
    name: String,
}

impl NamedRef<'_> {
    /// Name this reference resolves.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The service currently registered under the name.
    pub fn get(&self) -> Option<Service> {
        self.registry.lookup(&self.name)
    }

    /// Registers `service` under the name.
    pub fn set(&self, service: Service) -> Option<Service> {
        self.registry.register(self.name.clone(), service)
    }
}

/// Registers `service` in the process-wide registry.
pub fn register(name: impl Into<String>, service: Service) -> Option<Service> {
    Registry::global().register(name, service)
}

/// Looks `name` up in the process-wide registry.
pub fn lookup(name: &str) -> Option<Service> {
    Registry::global().lookup(name)
}
