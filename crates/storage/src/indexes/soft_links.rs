//! Soft-link index: entities → persistent ids they reference by value
//!
//! Soft links are not graph edges. They are persistent ids embedded in field
//! values; the index answers "who refers to this id" without scanning.

use rustc_hash::FxHashMap;
use std::collections::BTreeSet;
use wsmodel_core::{EntityId, PersistentId};

/// Secondary index: EntityId → {PersistentId} and the reverse
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SoftLinkIndex {
    links: FxHashMap<EntityId, BTreeSet<PersistentId>>,
    referrers: FxHashMap<PersistentId, BTreeSet<EntityId>>,
}

impl SoftLinkIndex {
    /// Create an empty index
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the links of an entity
    pub fn index(&mut self, id: EntityId, links: BTreeSet<PersistentId>) {
        self.remove(id);
        if links.is_empty() {
            return;
        }
        for pid in &links {
            self.referrers.entry(pid.clone()).or_default().insert(id);
        }
        self.links.insert(id, links);
    }

    /// Forget an entity's links
    pub fn remove(&mut self, id: EntityId) {
        let Some(previous) = self.links.remove(&id) else {
            return;
        };
        for pid in previous {
            if let Some(ids) = self.referrers.get_mut(&pid) {
                ids.remove(&id);
                if ids.is_empty() {
                    self.referrers.remove(&pid);
                }
            }
        }
    }

    /// Persistent ids referenced by an entity
    pub fn links(&self, id: EntityId) -> Option<&BTreeSet<PersistentId>> {
        self.links.get(&id)
    }

    /// Entities referencing a persistent id, ascending
    pub fn referrers(&self, pid: &PersistentId) -> impl Iterator<Item = EntityId> + '_ {
        self.referrers.get(pid).into_iter().flatten().copied()
    }

    /// Every (entity, links) pair
    pub fn iter(&self) -> impl Iterator<Item = (EntityId, &BTreeSet<PersistentId>)> {
        self.links.iter().map(|(id, l)| (*id, l))
    }

    /// Number of entities with links
    pub fn len(&self) -> usize {
        self.links.len()
    }

    /// Whether the index is empty
    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }
}
