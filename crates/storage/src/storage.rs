//! Read API shared by snapshots and builders
//!
//! `EntityStorage` has four required accessors (registry, family slots,
//! reference index, auxiliary indexes). Every query is a provided method on
//! top of them, so `Snapshot` and `Builder` answer reads identically.
//!
//! # Abstract connections
//!
//! Reference reads check the dynamic type of each stored id against the
//! connection's declared type through `EntityTypeRegistry::is_assignable`.
//! An id whose type is not assignable is never returned.

use crate::entity::Entity;
use crate::family::{EntitySlot, FamilyIter};
use crate::indexes::StorageIndexes;
use crate::refs::RefsTable;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use wsmodel_core::{
    ConnectionId, EntityData, EntityId, EntitySource, EntityTypeId, EntityTypeRegistry, PersistentId,
    Result, Value, VirtualFileUrl,
};

/// Read access to an entity graph
pub trait EntityStorage {
    /// Registry the storage was built against
    fn registry(&self) -> &Arc<EntityTypeRegistry>;

    /// Raw slots of one type (empty for unknown or abstract types)
    fn family_slots(&self, type_id: EntityTypeId) -> &[EntitySlot];

    /// Reference index
    fn refs(&self) -> &RefsTable;

    /// Auxiliary indexes
    fn indexes(&self) -> &StorageIndexes;

    /// Data of a live entity
    fn entity_data(&self, id: EntityId) -> Option<&Arc<EntityData>> {
        self.family_slots(id.type_id)
            .get(id.slot as usize)
            .and_then(|s| s.as_ref())
    }

    /// Whether the entity exists
    fn contains(&self, id: EntityId) -> bool {
        self.entity_data(id).is_some()
    }

    /// Read-only façade of a live entity
    fn entity(&self, id: EntityId) -> Option<Entity<'_, Self>>
    where
        Self: Sized,
    {
        let data = self.entity_data(id)?;
        Some(Entity::new(self, id, data))
    }

    /// Live entities of a type, including concrete subtypes of abstract types
    ///
    /// Ordered by type tag, then ascending slot.
    fn entities(&self, type_id: EntityTypeId) -> Entities<'_> {
        let families = self
            .registry()
            .concrete_subtypes(type_id)
            .iter()
            .map(|&t| FamilyIter::new(t, self.family_slots(t)))
            .collect();
        Entities { families, current: 0 }
    }

    /// Live entities of a type given by name
    fn entities_named(&self, type_name: &str) -> Result<Entities<'_>> {
        let type_id = self.registry().type_id(type_name)?;
        Ok(self.entities(type_id))
    }

    /// Number of live entities of a type, including concrete subtypes
    fn entities_amount(&self, type_id: EntityTypeId) -> usize {
        self.entities(type_id).count()
    }

    /// Every live entity, ordered by type tag then slot
    fn all_entities(&self) -> Entities<'_> {
        let families = self
            .registry()
            .schemas()
            .iter()
            .filter(|s| !s.is_abstract())
            .map(|s| FamilyIter::new(s.type_id(), self.family_slots(s.type_id())))
            .collect();
        Entities { families, current: 0 }
    }

    /// Whether the storage holds no entities
    fn is_empty(&self) -> bool {
        self.all_entities().next().is_none()
    }

    /// Parent of `child` in `connection`, checked against the declared parent type
    fn extract_parent(&self, connection: ConnectionId, child: EntityId) -> Option<EntityId> {
        let parent = self.refs().parent(connection, child)?;
        let assignable = self.registry().is_assignable(parent.type_id, connection.parent);
        (assignable && self.contains(parent)).then_some(parent)
    }

    /// Children of `parent` in `connection`, in insertion order
    ///
    /// The returned iterator is lazy and can be cloned to restart.
    fn extract_children(&self, connection: ConnectionId, parent: EntityId) -> Children<'_> {
        Children {
            ids: self.refs().children(connection, parent).iter(),
            declared: connection.child,
            registry: self.registry(),
        }
    }

    /// Every (connection, parent) pair of a child
    fn parents_of(&self, child: EntityId) -> BTreeMap<ConnectionId, EntityId> {
        let Some(data) = self.entity_data(child) else {
            return BTreeMap::new();
        };
        data.schema()
            .parent_connections()
            .iter()
            .filter_map(|p| {
                self.extract_parent(p.connection, child)
                    .map(|parent| (p.connection, parent))
            })
            .collect()
    }

    /// Entity owning a persistent id
    fn resolve(&self, pid: &PersistentId) -> Option<EntityId> {
        self.indexes().persistent_ids().entity(pid)
    }

    /// Entities of `type_id` (or subtypes) whose fields link to `pid` by value
    fn referrers(&self, pid: &PersistentId, type_id: EntityTypeId) -> Vec<EntityId> {
        let registry = self.registry();
        self.indexes()
            .soft_links()
            .referrers(pid)
            .filter(|id| registry.is_assignable(id.type_id, type_id))
            .collect()
    }

    /// Entities grouped by source, for sources accepted by `filter`
    fn entities_by_source(&self, filter: &dyn Fn(&EntitySource) -> bool) -> BTreeMap<EntitySource, Vec<EntityId>> {
        let index = self.indexes().sources();
        index
            .sources()
            .filter(|s| filter(s))
            .map(|s| (s.clone(), index.entities(s).collect()))
            .collect()
    }

    /// Urls stored by an entity per field
    fn urls_of(&self, id: EntityId) -> BTreeMap<String, BTreeSet<VirtualFileUrl>> {
        self.indexes().urls().urls(id).cloned().unwrap_or_default()
    }

    /// Entities (and fields) storing a url
    fn entities_by_url(&self, url: &VirtualFileUrl) -> Vec<(EntityId, String)> {
        self.indexes().urls().owners(url).cloned().collect()
    }

    /// Jar directories declared by an entity
    fn jar_directories(&self, id: EntityId) -> BTreeSet<VirtualFileUrl> {
        self.indexes()
            .urls()
            .jar_directories(id)
            .cloned()
            .unwrap_or_default()
    }

    /// Whether both storages hold the same entities, ignoring ids and sources
    ///
    /// Entities are compared by type name, field values and the description
    /// of their parents, so storages built against registries with different
    /// type numbering can be compared.
    fn has_same_entities(&self, other: &dyn EntityStorage) -> bool
    where
        Self: Sized,
    {
        describe_all(self) == describe_all(other)
    }
}

/// Type-independent description of one entity
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct EntityDescription {
    /// Type name
    pub type_name: String,
    /// Field values in declaration order
    pub fields: Vec<Value>,
    /// (reference name, parent type, parent fields) per resolved parent
    pub parents: Vec<(String, String, Vec<Value>)>,
}

/// Describe one entity without ids
pub fn describe(storage: &dyn EntityStorage, id: EntityId) -> Option<EntityDescription> {
    let data = storage.entity_data(id)?;
    let mut parents = Vec::new();
    for reference in data.schema().parent_connections() {
        let Some(parent) = storage.refs().parent(reference.connection, id) else {
            continue;
        };
        if let Some(parent_data) = storage.entity_data(parent) {
            parents.push((
                reference.field.clone(),
                parent_data.schema().name().fqn.clone(),
                parent_data.fields().to_vec(),
            ));
        }
    }
    parents.sort();
    Some(EntityDescription {
        type_name: data.schema().name().fqn.clone(),
        fields: data.fields().to_vec(),
        parents,
    })
}

/// Sorted descriptions of every entity
pub fn describe_all(storage: &dyn EntityStorage) -> Vec<EntityDescription> {
    let mut out: Vec<EntityDescription> = storage
        .all_entities()
        .filter_map(|(id, _)| describe(storage, id))
        .collect();
    out.sort();
    out
}

/// Live entities over one or more families
#[derive(Clone)]
pub struct Entities<'a> {
    families: Vec<FamilyIter<'a>>,
    current: usize,
}

impl<'a> Iterator for Entities<'a> {
    type Item = (EntityId, &'a Arc<EntityData>);

    fn next(&mut self) -> Option<Self::Item> {
        while let Some(family) = self.families.get_mut(self.current) {
            if let Some(item) = family.next() {
                return Some(item);
            }
            self.current += 1;
        }
        None
    }
}

/// Children of one parent, filtered by the connection's declared child type
#[derive(Clone)]
pub struct Children<'a> {
    ids: std::slice::Iter<'a, EntityId>,
    declared: EntityTypeId,
    registry: &'a EntityTypeRegistry,
}

impl<'a> Iterator for Children<'a> {
    type Item = EntityId;

    fn next(&mut self) -> Option<EntityId> {
        let registry = self.registry;
        let declared = self.declared;
        self.ids
            .by_ref()
            .copied()
            .find(|id| registry.is_assignable(id.type_id, declared))
    }
}
