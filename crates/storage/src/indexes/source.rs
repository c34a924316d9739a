//! Entity source index: EntityId ↔ EntitySource

use rustc_hash::FxHashMap;
use std::collections::BTreeSet;
use wsmodel_core::{EntityId, EntitySource};

/// Secondary index: source of every entity and entities per source
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EntitySourceIndex {
    forward: FxHashMap<EntityId, EntitySource>,
    reverse: FxHashMap<EntitySource, BTreeSet<EntityId>>,
}

impl EntitySourceIndex {
    /// Create an empty index
    pub fn new() -> Self {
        Self::default()
    }

    /// Record (or move) the source of an entity
    pub fn insert(&mut self, id: EntityId, source: EntitySource) {
        self.remove(id);
        self.reverse.entry(source.clone()).or_default().insert(id);
        self.forward.insert(id, source);
    }

    /// Forget an entity
    pub fn remove(&mut self, id: EntityId) -> Option<EntitySource> {
        let source = self.forward.remove(&id)?;
        if let Some(ids) = self.reverse.get_mut(&source) {
            ids.remove(&id);
            if ids.is_empty() {
                self.reverse.remove(&source);
            }
        }
        Some(source)
    }

    /// Source of an entity
    pub fn get(&self, id: EntityId) -> Option<&EntitySource> {
        self.forward.get(&id)
    }

    /// Entities carrying a source, ascending
    pub fn entities(&self, source: &EntitySource) -> impl Iterator<Item = EntityId> + '_ {
        self.reverse.get(source).into_iter().flatten().copied()
    }

    /// Distinct sources in the index
    pub fn sources(&self) -> impl Iterator<Item = &EntitySource> {
        self.reverse.keys()
    }

    /// Every (entity, source) pair
    pub fn iter(&self) -> impl Iterator<Item = (EntityId, &EntitySource)> {
        self.forward.iter().map(|(id, s)| (*id, s))
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
