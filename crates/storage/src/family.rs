//! Entity families: slot-indexed storage of one entity type
//!
//! A family is an append-only vector of slots. Removing an entity leaves a
//! tombstone (`None`) so slot indices stay stable for the lifetime of the
//! entity inside a lineage of snapshots. Slots are never reused.
//!
//! # Design Notes
//!
//! - Both variants share the slot vector through `Arc`. The mutable variant
//!   copies it on the first write after it was shared (`Arc::make_mut`),
//!   so a transaction copies each touched family once, not per entity.
//! - Freezing a mutable family is O(1): the `Arc` moves into the immutable
//!   variant.
//! - Iteration is ascending by slot and skips tombstones, which keeps
//!   serialization and diffing deterministic.

use std::sync::Arc;
use wsmodel_core::{EntityData, EntityId, EntityTypeId, Error, Result};

/// One slot of a family
pub type EntitySlot = Option<Arc<EntityData>>;

/// Read-only family shared between snapshots
#[derive(Debug, Clone)]
pub struct ImmutableEntityFamily {
    type_id: EntityTypeId,
    slots: Arc<Vec<EntitySlot>>,
    alive: usize,
}

impl ImmutableEntityFamily {
    /// Empty family
    pub fn new(type_id: EntityTypeId) -> Self {
        ImmutableEntityFamily {
            type_id,
            slots: Arc::new(Vec::new()),
            alive: 0,
        }
    }

    /// Family over decoded slots (tombstones included)
    pub fn from_slots(type_id: EntityTypeId, slots: Vec<EntitySlot>) -> Self {
        let alive = slots.iter().filter(|s| s.is_some()).count();
        ImmutableEntityFamily {
            type_id,
            slots: Arc::new(slots),
            alive,
        }
    }

    /// Type stored in this family
    pub fn type_id(&self) -> EntityTypeId {
        self.type_id
    }

    /// Entity in a slot
    pub fn get(&self, slot: u32) -> Option<&Arc<EntityData>> {
        self.slots.get(slot as usize).and_then(|s| s.as_ref())
    }

    /// Raw slots, tombstones included
    pub fn slots(&self) -> &[EntitySlot] {
        &self.slots
    }

    /// Number of live entities
    pub fn len(&self) -> usize {
        self.alive
    }

    /// Whether the family holds no live entity
    pub fn is_empty(&self) -> bool {
        self.alive == 0
    }

    /// Live entities in ascending slot order
    pub fn iter(&self) -> FamilyIter<'_> {
        FamilyIter::new(self.type_id, &self.slots)
    }

    /// Start a mutable copy sharing the slots
    pub fn to_mutable(&self) -> MutableEntityFamily {
        MutableEntityFamily {
            type_id: self.type_id,
            slots: Arc::clone(&self.slots),
            alive: self.alive,
        }
    }

    /// Whether both families share the same slot storage
    pub fn shares_storage_with(&self, other: &ImmutableEntityFamily) -> bool {
        Arc::ptr_eq(&self.slots, &other.slots)
    }
}

/// Family owned by a builder
#[derive(Debug, Clone)]
pub struct MutableEntityFamily {
    type_id: EntityTypeId,
    slots: Arc<Vec<EntitySlot>>,
    alive: usize,
}

impl MutableEntityFamily {
    /// Empty family
    pub fn new(type_id: EntityTypeId) -> Self {
        ImmutableEntityFamily::new(type_id).to_mutable()
    }

    /// Type stored in this family
    pub fn type_id(&self) -> EntityTypeId {
        self.type_id
    }

    /// Append an entity and return its slot
    pub fn add(&mut self, data: Arc<EntityData>) -> u32 {
        let slots = Arc::make_mut(&mut self.slots);
        slots.push(Some(data));
        self.alive += 1;
        (slots.len() - 1) as u32
    }

    /// Slot the next `add` will use
    pub fn next_slot(&self) -> u32 {
        self.slots.len() as u32
    }

    /// Replace a live entity, returning the previous data
    pub fn replace(&mut self, slot: u32, data: Arc<EntityData>) -> Result<Arc<EntityData>> {
        if self.get(slot).is_none() {
            return Err(Error::EntityNotFound(EntityId::new(self.type_id, slot)));
        }
        let slots = Arc::make_mut(&mut self.slots);
        slots[slot as usize]
            .replace(data)
            .ok_or(Error::EntityNotFound(EntityId::new(self.type_id, slot)))
    }

    /// Tombstone a slot, returning the removed data
    pub fn remove(&mut self, slot: u32) -> Option<Arc<EntityData>> {
        self.get(slot)?;
        let slots = Arc::make_mut(&mut self.slots);
        let removed = slots[slot as usize].take();
        if removed.is_some() {
            self.alive -= 1;
        }
        removed
    }

    /// Entity in a slot
    pub fn get(&self, slot: u32) -> Option<&Arc<EntityData>> {
        self.slots.get(slot as usize).and_then(|s| s.as_ref())
    }

    /// Raw slots, tombstones included
    pub fn slots(&self) -> &[EntitySlot] {
        &self.slots
    }

    /// Number of live entities
    pub fn len(&self) -> usize {
        self.alive
    }

    /// Whether the family holds no live entity
    pub fn is_empty(&self) -> bool {
        self.alive == 0
    }

    /// Live entities in ascending slot order
    pub fn iter(&self) -> FamilyIter<'_> {
        FamilyIter::new(self.type_id, &self.slots)
    }

    /// Immutable view sharing the current slots; later writes copy
    pub fn snapshot(&self) -> ImmutableEntityFamily {
        ImmutableEntityFamily {
            type_id: self.type_id,
            slots: Arc::clone(&self.slots),
            alive: self.alive,
        }
    }

    /// Convert into the immutable variant in O(1)
    pub fn freeze(self) -> ImmutableEntityFamily {
        ImmutableEntityFamily {
            type_id: self.type_id,
            slots: self.slots,
            alive: self.alive,
        }
    }
}

/// Iterator over live entities of a family
#[derive(Clone)]
pub struct FamilyIter<'a> {
    type_id: EntityTypeId,
    inner: std::iter::Enumerate<std::slice::Iter<'a, EntitySlot>>,
}

impl<'a> FamilyIter<'a> {
    /// Iterate a raw slot slice of one type
    pub fn new(type_id: EntityTypeId, slots: &'a [EntitySlot]) -> Self {
        FamilyIter {
            type_id,
            inner: slots.iter().enumerate(),
        }
    }
}

impl<'a> Iterator for FamilyIter<'a> {
    type Item = (EntityId, &'a Arc<EntityData>);

    fn next(&mut self) -> Option<Self::Item> {
        for (slot, entry) in self.inner.by_ref() {
            if let Some(data) = entry {
                return Some((EntityId::new(self.type_id, slot as u32), data));
            }
        }
        None
    }
}
