//! Entity façades
//!
//! - `Entity`: read-only, graph-aware view bound to one storage
//! - `ModifiableEntity`: writable view handed to `Builder::modify_entity`
//! - `NewEntity`: detached entity waiting to be attached to a builder

use crate::builder::Builder;
use crate::storage::EntityStorage;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use wsmodel_core::{
    ConnectionId, EntityData, EntityId, EntitySource, EntityTypeRegistry, Error, PersistentId, Result,
    Value,
};

// ============================================================================
// Entity
// ============================================================================

/// Read-only view of one entity inside a storage
pub struct Entity<'s, S: EntityStorage + ?Sized> {
    storage: &'s S,
    id: EntityId,
    data: &'s Arc<EntityData>,
}

impl<'s, S: EntityStorage + ?Sized> Entity<'s, S> {
    pub(crate) fn new(storage: &'s S, id: EntityId, data: &'s Arc<EntityData>) -> Self {
        Entity { storage, id, data }
    }

    /// Id inside the storage
    pub fn id(&self) -> EntityId {
        self.id
    }

    /// Underlying data
    pub fn data(&self) -> &'s Arc<EntityData> {
        self.data
    }

    /// Field value by name
    pub fn get(&self, field: &str) -> Option<&'s Value> {
        self.data.get(field)
    }

    /// Entity source
    pub fn source(&self) -> &'s EntitySource {
        self.data.source()
    }

    /// Persistent id, if the type derives one
    pub fn persistent_id(&self) -> Option<PersistentId> {
        self.data.persistent_id()
    }

    /// Parent behind a named reference
    pub fn parent(&self, field: &str) -> Result<Option<Entity<'s, S>>> {
        let connection = self.data.schema().connection(field)?;
        Ok(self
            .storage
            .extract_parent(connection, self.id)
            .and_then(|id| self.sibling(id)))
    }

    /// Children in `connection`, in insertion order
    pub fn children(&self, connection: ConnectionId) -> Vec<Entity<'s, S>> {
        self.storage
            .extract_children(connection, self.id)
            .filter_map(|id| self.sibling(id))
            .collect()
    }

    fn sibling(&self, id: EntityId) -> Option<Entity<'s, S>> {
        let storage = self.storage;
        storage.entity_data(id).map(|data| Entity::new(storage, id, data))
    }

    /// Entities of any type linking to this entity's persistent id
    pub fn soft_referrers(&self) -> Vec<EntityId> {
        let Some(pid) = self.persistent_id() else {
            return Vec::new();
        };
        let registry = self.storage.registry();
        registry
            .schemas()
            .iter()
            .filter(|s| !s.is_abstract())
            .flat_map(|s| self.storage.referrers(&pid, s.type_id()))
            .collect()
    }
}

impl<'s, S: EntityStorage + ?Sized> Clone for Entity<'s, S> {
    fn clone(&self) -> Self {
        Entity {
            storage: self.storage,
            id: self.id,
            data: self.data,
        }
    }
}

impl<'s, S: EntityStorage + ?Sized> fmt::Debug for Entity<'s, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Entity")
            .field("id", &self.id)
            .field("data", self.data)
            .finish()
    }
}

// ============================================================================
// ModifiableEntity
// ============================================================================

/// Writable view of one entity, valid for the duration of a modification
pub struct ModifiableEntity<'r> {
    registry: &'r EntityTypeRegistry,
    id: EntityId,
    data: EntityData,
    parents: BTreeMap<ConnectionId, Option<EntityId>>,
}

impl<'r> ModifiableEntity<'r> {
    pub(crate) fn new(registry: &'r EntityTypeRegistry, id: EntityId, data: EntityData) -> Self {
        ModifiableEntity {
            registry,
            id,
            data,
            parents: BTreeMap::new(),
        }
    }

    /// Id of the entity being modified
    pub fn id(&self) -> EntityId {
        self.id
    }

    /// Current value of a field
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.data.get(field)
    }

    /// Assign a field by name
    pub fn set(&mut self, field: &str, value: impl Into<Value>) -> Result<()> {
        self.data.set(field, value)
    }

    /// Assign a field by position
    pub fn set_index(&mut self, index: usize, value: Value) -> Result<()> {
        self.data.set_index(index, value)
    }

    /// Data as modified so far
    pub fn data(&self) -> &EntityData {
        &self.data
    }

    /// Point a named parent reference at another entity, or clear it
    ///
    /// Parents are checked by the builder once the modification completes.
    pub fn set_parent(&mut self, field: &str, parent: Option<EntityId>) -> Result<()> {
        let connection = self.data.schema().connection(field)?;
        if let Some(parent) = parent {
            if !self.registry.is_assignable(parent.type_id, connection.parent) {
                return Err(Error::InvalidConnection(format!(
                    "{} cannot be the parent in {}#{}",
                    parent,
                    self.data.schema().name(),
                    field
                )));
            }
        }
        self.parents.insert(connection, parent);
        Ok(())
    }

    pub(crate) fn into_parts(self) -> (EntityData, BTreeMap<ConnectionId, Option<EntityId>>) {
        (self.data, self.parents)
    }
}

// ============================================================================
// NewEntity
// ============================================================================

/// Entity built outside any storage, attached later
///
/// Once attached, the entity remembers the builder. Attaching again to the
/// same builder returns the same id; any other builder rejects it.
#[derive(Debug, Clone)]
pub struct NewEntity {
    data: EntityData,
    parents: Vec<(ConnectionId, EntityId)>,
    attached: Option<(u64, EntityId)>,
}

impl NewEntity {
    /// Wrap data without parents
    pub fn new(data: EntityData) -> Self {
        NewEntity {
            data,
            parents: Vec::new(),
            attached: None,
        }
    }

    /// Build a detached entity, resolving parents among `candidates` by type
    ///
    /// A required parent reference needs exactly one matching candidate;
    /// an optional one accepts zero or one.
    pub fn detached(data: EntityData, registry: &EntityTypeRegistry, candidates: &[EntityId]) -> Result<Self> {
        let parents = data.resolve_parents(registry, candidates)?;
        Ok(NewEntity {
            data,
            parents,
            attached: None,
        })
    }

    /// Builder-style field assignment
    pub fn with(mut self, field: &str, value: impl Into<Value>) -> Result<Self> {
        self.data.set(field, value)?;
        Ok(self)
    }

    /// Builder-style parent assignment by reference name
    pub fn with_parent(mut self, field: &str, parent: EntityId) -> Result<Self> {
        let connection = self.data.schema().connection(field)?;
        self.parents.retain(|(c, _)| *c != connection);
        self.parents.push((connection, parent));
        Ok(self)
    }

    /// Data to be added
    pub fn data(&self) -> &EntityData {
        &self.data
    }

    /// Resolved parents
    pub fn parents(&self) -> &[(ConnectionId, EntityId)] {
        &self.parents
    }

    /// Builder id and entity id, once attached
    pub fn attachment(&self) -> Option<(u64, EntityId)> {
        self.attached
    }

    /// Attach to a builder
    pub fn attach(&mut self, builder: &mut Builder) -> Result<EntityId> {
        builder.attach(self)
    }

    pub(crate) fn mark_attached(&mut self, builder: u64, id: EntityId) {
        self.attached = Some((builder, id));
    }
}
