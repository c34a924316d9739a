//! Class identity across processes
//!
//! The cache never relies on type numbering. Every class is written as
//! (fully-qualified name, owning plugin) and resolved back through an
//! `EntityTypesResolver` when the cache is read. Plugins may be loaded or
//! unloaded independently of the engine, so the mapping is supplied from
//! outside rather than hardcoded.

use std::fmt;
use std::sync::Arc;
use wsmodel_core::{EntityTypeRegistry, TypeName};

/// Maps classes to their owning plugin and back
pub trait EntityTypesResolver: Send + Sync {
    /// Plugin identifier written next to `class` in the type table
    fn plugin_id(&self, class: &TypeName) -> Option<String>;

    /// Runtime class for a type-table entry, `None` when it is unknown
    fn resolve_class(&self, fqn: &str, plugin_id: Option<&str>) -> Option<TypeName>;
}

/// Resolver backed by an entity type registry
///
/// Plugin ids come from the class names themselves; an entry resolves only
/// when the registry knows a class with the same name and plugin.
#[derive(Clone)]
pub struct RegistryTypesResolver {
    registry: Arc<EntityTypeRegistry>,
}

impl RegistryTypesResolver {
    /// Resolve against `registry`
    pub fn new(registry: Arc<EntityTypeRegistry>) -> Self {
        RegistryTypesResolver { registry }
    }
}

impl fmt::Debug for RegistryTypesResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegistryTypesResolver")
            .field("types", &self.registry.len())
            .finish()
    }
}

impl EntityTypesResolver for RegistryTypesResolver {
    fn plugin_id(&self, class: &TypeName) -> Option<String> {
        class.plugin_id.clone()
    }

    fn resolve_class(&self, fqn: &str, plugin_id: Option<&str>) -> Option<TypeName> {
        self.registry
            .lookup_class(fqn)
            .filter(|class| class.plugin_id.as_deref() == plugin_id)
    }
}
