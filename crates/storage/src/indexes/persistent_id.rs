//! Persistent id index: bidirectional and unique

use rustc_hash::FxHashMap;
use wsmodel_core::{EntityId, PersistentId};

/// Secondary index: EntityId ↔ PersistentId
///
/// At most one entity owns a given persistent id. The builder checks
/// uniqueness before calling [`PersistentIdIndex::index`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PersistentIdIndex {
    forward: FxHashMap<EntityId, PersistentId>,
    reverse: FxHashMap<PersistentId, EntityId>,
}

impl PersistentIdIndex {
    /// Create an empty index
    pub fn new() -> Self {
        Self::default()
    }

    /// Associate an entity with its id
    pub fn index(&mut self, id: EntityId, pid: PersistentId) {
        self.remove(id);
        self.reverse.insert(pid.clone(), id);
        self.forward.insert(id, pid);
    }

    /// Forget an entity
    pub fn remove(&mut self, id: EntityId) -> Option<PersistentId> {
        let pid = self.forward.remove(&id)?;
        if self.reverse.get(&pid) == Some(&id) {
            self.reverse.remove(&pid);
        }
        Some(pid)
    }

    /// Entity owning a persistent id
    pub fn entity(&self, pid: &PersistentId) -> Option<EntityId> {
        self.reverse.get(pid).copied()
    }

    /// Persistent id of an entity
    pub fn persistent_id(&self, id: EntityId) -> Option<&PersistentId> {
        self.forward.get(&id)
    }

    /// Every (entity, id) pair
    pub fn iter(&self) -> impl Iterator<Item = (EntityId, &PersistentId)> {
        self.forward.iter().map(|(id, pid)| (*id, pid))
    }

    /// Number of indexed entities
    pub fn len(&self) -> usize {
        self.forward.len()
    }

    /// Whether the index is empty
    pub fn is_empty(&self) -> bool {
        self.forward.is_empty()
    }
}
