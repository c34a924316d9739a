//! Snapshot: immutable, structurally shared state of the entity graph
//!
//! A snapshot owns one immutable family per registered type, the reference
//! index and the auxiliary indexes. Everything sits behind `Arc`, so cloning
//! a snapshot is O(number of types + number of connections) and snapshots
//! derived from one another share every family and table neither side
//! changed.
//!
//! Snapshots are `Send + Sync`; any number of readers may query one while a
//! builder derived from it is being mutated elsewhere.

use crate::builder::Builder;
use crate::consistency::{self, ConsistencyIssue};
use crate::family::{EntitySlot, ImmutableEntityFamily};
use crate::indexes::StorageIndexes;
use crate::refs::RefsTable;
use crate::storage::EntityStorage;
use std::sync::Arc;
use wsmodel_core::{EntityTypeId, EntityTypeRegistry, Error, Result};

/// Immutable state of the entity graph
#[derive(Debug, Clone)]
pub struct Snapshot {
    registry: Arc<EntityTypeRegistry>,
    families: Vec<ImmutableEntityFamily>,
    refs: RefsTable,
    indexes: StorageIndexes,
}

impl Snapshot {
    /// Snapshot without entities
    pub fn empty(registry: Arc<EntityTypeRegistry>) -> Self {
        let families = registry
            .schemas()
            .iter()
            .map(|s| ImmutableEntityFamily::new(s.type_id()))
            .collect();
        Snapshot {
            registry,
            families,
            refs: RefsTable::new(),
            indexes: StorageIndexes::new(),
        }
    }

    /// Assemble a snapshot from restored parts
    ///
    /// `families` must hold one family per registered type, in tag order.
    pub fn from_parts(
        registry: Arc<EntityTypeRegistry>,
        families: Vec<ImmutableEntityFamily>,
        refs: RefsTable,
        indexes: StorageIndexes,
    ) -> Result<Self> {
        if families.len() != registry.len() {
            return Err(Error::InvalidSchema(format!(
                "expected {} families, got {}",
                registry.len(),
                families.len()
            )));
        }
        if let Some((i, family)) = families
            .iter()
            .enumerate()
            .find(|(i, f)| f.type_id().index() != *i)
        {
            return Err(Error::InvalidSchema(format!(
                "family #{} carries type {}",
                i,
                family.type_id()
            )));
        }
        Ok(Self::assemble(registry, families, refs, indexes))
    }

    pub(crate) fn assemble(
        registry: Arc<EntityTypeRegistry>,
        families: Vec<ImmutableEntityFamily>,
        refs: RefsTable,
        indexes: StorageIndexes,
    ) -> Self {
        Snapshot {
            registry,
            families,
            refs,
            indexes,
        }
    }

    /// Families in tag order
    pub fn families(&self) -> &[ImmutableEntityFamily] {
        &self.families
    }

    /// Open a builder on top of this snapshot
    pub fn to_builder(&self) -> Builder {
        Builder::from_snapshot(self)
    }

    /// Full-graph consistency pass
    pub fn assert_consistency(&self) -> Vec<ConsistencyIssue> {
        consistency::check(self)
    }

    /// Whether both snapshots share the family of `type_id`
    pub fn shares_family_with(&self, other: &Snapshot, type_id: EntityTypeId) -> bool {
        match (
            self.families.get(type_id.index()),
            other.families.get(type_id.index()),
        ) {
            (Some(a), Some(b)) => a.shares_storage_with(b),
            _ => false,
        }
    }
}

impl EntityStorage for Snapshot {
    fn registry(&self) -> &Arc<EntityTypeRegistry> {
        &self.registry
    }

    fn family_slots(&self, type_id: EntityTypeId) -> &[EntitySlot] {
        self.families
            .get(type_id.index())
            .map(|f| f.slots())
            .unwrap_or(&[])
    }

    fn refs(&self) -> &RefsTable {
        &self.refs
    }

    fn indexes(&self) -> &StorageIndexes {
        &self.indexes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{module, sample_registry};

    fn assert_send_sync<T: Send + Sync>() {}

    #[test]
    fn test_snapshot_is_send_sync() {
        assert_send_sync::<Snapshot>();
    }

    #[test]
    fn test_empty_snapshot_has_family_per_type() {
        let registry = sample_registry();
        let snapshot = Snapshot::empty(Arc::clone(&registry));
        assert_eq!(snapshot.families().len(), registry.len());
        assert!(snapshot.is_empty());
    }

    #[test]
    fn test_untouched_families_are_shared() {
        let registry = sample_registry();
        let mut builder = Builder::new(Arc::clone(&registry));
        builder.add_entity(module(&registry, "app"), &[]).unwrap();
        let first = builder.to_snapshot();

        let mut next = first.to_builder();
        next.add_entity(module(&registry, "lib"), &[]).unwrap();
        let second = next.freeze();

        let module_type = registry.type_id("Module").unwrap();
        let facet_type = registry.type_id("Facet").unwrap();
        assert!(!first.shares_family_with(&second, module_type));
        assert!(first.shares_family_with(&second, facet_type));
        assert_eq!(first.entities_amount(module_type), 1);
        assert_eq!(second.entities_amount(module_type), 2);
    }

    #[test]
    fn test_from_parts_rejects_wrong_family_count() {
        let registry = sample_registry();
        let err = Snapshot::from_parts(registry, Vec::new(), RefsTable::new(), StorageIndexes::new()).unwrap_err();
        assert!(matches!(err, Error::InvalidSchema(_)));
    }
}
