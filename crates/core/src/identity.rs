//! Entity sources and persistent ids
//!
//! - EntitySource: opaque provenance marker carried by every entity
//! - PersistentId: content-derived identity that survives remove/re-add

use crate::value::{TypeName, Value};
use std::fmt;

/// Provenance marker of an entity
///
/// The engine never interprets the payload; it only indexes and compares it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntitySource {
    /// Source class
    pub class: TypeName,
    /// Source fields, empty for singleton sources
    pub payload: Vec<Value>,
}

impl EntitySource {
    /// Source carrying data
    pub fn new(class: TypeName, payload: Vec<Value>) -> Self {
        EntitySource { class, payload }
    }

    /// Singleton source without payload
    pub fn object(class: TypeName) -> Self {
        EntitySource {
            class,
            payload: Vec::new(),
        }
    }

    /// Visit every class name used by this source
    pub fn for_each_class(&self, visit: &mut dyn FnMut(&TypeName)) {
        visit(&self.class);
        for value in &self.payload {
            value.for_each_class(visit);
        }
    }
}

/// Stable identity derived from an entity's fields
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PersistentId {
    /// Persistent id class
    pub class: TypeName,
    /// Values of the fields the id is derived from
    pub parts: Vec<Value>,
}

impl PersistentId {
    /// Create a persistent id
    pub fn new(class: TypeName, parts: Vec<Value>) -> Self {
        PersistentId { class, parts }
    }

    /// Human readable form, e.g. `ModuleId(main)`
    pub fn presentable_name(&self) -> String {
        let parts: Vec<String> = self
            .parts
            .iter()
            .map(|p| match p {
                Value::String(s) => s.clone(),
                other => format!("{:?}", other),
            })
            .collect();
        format!("{}({})", self.class.simple_name(), parts.join(", "))
    }
}

impl fmt::Display for PersistentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.presentable_name())
    }
}
