//! Builder: mutable transaction against a base snapshot
//!
//! A builder starts from a snapshot, copies each family, connection table
//! and index on its first write and records every mutation in a
//! [`ChangeLog`]. `to_snapshot` publishes the current state without
//! ending the transaction; `freeze` consumes the builder (the Open → Frozen
//! transition is expressed by ownership).
//!
//! # Validation
//!
//! Every mutation validates before it touches any state. A failed call
//! leaves the builder exactly as it was, except for cascades, which are
//! only started after validation passed.
//!
//! # Removal
//!
//! Removing an entity walks every connection in which it can be the parent.
//! Children whose reference is non-nullable are removed recursively;
//! children with a nullable reference are detached and keep living.
//!
//! # Single writer
//!
//! A builder is `Send` but takes `&mut self` for every write. Callers
//! serialize access to one lineage themselves.

use crate::change_log::{ChangeLog, EntityChange};
use crate::consistency::{self, ConsistencyIssue};
use crate::entity::{ModifiableEntity, NewEntity};
use crate::family::{EntitySlot, MutableEntityFamily};
use crate::indexes::StorageIndexes;
use crate::refs::RefsTable;
use crate::snapshot::Snapshot;
use crate::storage::EntityStorage;
use rustc_hash::FxHashSet;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, trace};
use wsmodel_core::{
    ConnectionId, EntityData, EntityId, EntitySource, EntityTypeId, EntityTypeRegistry, Error, Result,
};

static NEXT_BUILDER_ID: AtomicU64 = AtomicU64::new(1);

/// Mutable transaction producing new snapshots
#[derive(Debug, Clone)]
pub struct Builder {
    id: u64,
    registry: Arc<EntityTypeRegistry>,
    base: Snapshot,
    families: Vec<MutableEntityFamily>,
    refs: RefsTable,
    indexes: StorageIndexes,
    change_log: ChangeLog,
}

impl Builder {
    /// Builder over an empty store
    pub fn new(registry: Arc<EntityTypeRegistry>) -> Self {
        Self::from_snapshot(&Snapshot::empty(registry))
    }

    /// Builder over an existing snapshot
    pub fn from_snapshot(snapshot: &Snapshot) -> Self {
        Builder {
            id: NEXT_BUILDER_ID.fetch_add(1, Ordering::Relaxed),
            registry: Arc::clone(snapshot.registry()),
            base: snapshot.clone(),
            families: snapshot.families().iter().map(|f| f.to_mutable()).collect(),
            refs: snapshot.refs().clone(),
            indexes: snapshot.indexes().clone(),
            change_log: ChangeLog::new(),
        }
    }

    /// Builder holding `snapshot`'s entities as additions to an empty store
    ///
    /// Every entity gets an `AddEntity` entry carrying its parents, so the
    /// builder can be replayed as a diff onto another store.
    pub fn restored(snapshot: &Snapshot) -> Self {
        let mut builder = Self::from_snapshot(snapshot);
        builder.base = Snapshot::empty(Arc::clone(snapshot.registry()));
        for (id, data) in snapshot.all_entities() {
            let parents = snapshot.parents_of(id);
            builder.change_log.record_add(id, Arc::clone(data), parents);
        }
        builder
    }

    /// Identity of this builder, used by detached entities
    pub fn builder_id(&self) -> u64 {
        self.id
    }

    /// Snapshot the builder started from
    pub fn base(&self) -> &Snapshot {
        &self.base
    }

    /// Mutations recorded so far
    pub fn change_log(&self) -> &ChangeLog {
        &self.change_log
    }

    /// Per-type summary of the changes relative to the base snapshot
    pub fn collect_changes(&self) -> BTreeMap<EntityTypeId, Vec<EntityChange>> {
        self.change_log.changes_by_type()
    }

    /// Full-graph consistency pass
    pub fn assert_consistency(&self) -> Vec<ConsistencyIssue> {
        consistency::check(self)
    }

    /// Publish the current state; the builder stays open
    pub fn to_snapshot(&self) -> Snapshot {
        let families = self.families.iter().map(|f| f.snapshot()).collect();
        debug!(
            builder = self.id,
            changes = self.change_log.len(),
            "builder snapshot"
        );
        Snapshot::assemble(
            Arc::clone(&self.registry),
            families,
            self.refs.clone(),
            self.indexes.clone(),
        )
    }

    /// Publish the final state and close the transaction
    pub fn freeze(self) -> Snapshot {
        debug!(
            builder = self.id,
            changes = self.change_log.len(),
            "builder frozen"
        );
        let families = self.families.into_iter().map(|f| f.freeze()).collect();
        Snapshot::assemble(self.registry, families, self.refs, self.indexes)
    }

    // ========================================================================
    // Entity operations
    // ========================================================================

    /// Add an entity linked to the given parents
    ///
    /// Fails without changing anything when a field is uninitialized or
    /// mistyped, when a non-nullable parent reference is not supplied, when
    /// a supplied parent does not exist or has the wrong type, or when the
    /// entity's persistent id is already taken.
    pub fn add_entity(&mut self, data: EntityData, parents: &[(ConnectionId, EntityId)]) -> Result<EntityId> {
        let schema = Arc::clone(data.schema());
        let registered = self.registry.schema(schema.type_id())?;
        if registered.name() != schema.name() {
            return Err(Error::UnknownEntityType(schema.name().fqn.clone()));
        }
        if schema.is_abstract() {
            return Err(Error::AbstractEntityType(schema.name().fqn.clone()));
        }
        data.validate(&self.registry)?;

        let mut links: BTreeMap<ConnectionId, EntityId> = BTreeMap::new();
        for &(connection, parent) in parents {
            if schema.parent_field(connection).is_none() {
                return Err(Error::InvalidConnection(format!(
                    "{} is not a parent reference of {}",
                    connection,
                    schema.name()
                )));
            }
            self.check_parent(connection, parent)?;
            if links.insert(connection, parent).is_some() {
                return Err(Error::InvalidConnection(format!(
                    "{} supplied twice for {}",
                    connection,
                    schema.name()
                )));
            }
        }
        for reference in schema.parent_connections() {
            if !reference.connection.parent_nullable && !links.contains_key(&reference.connection) {
                return Err(Error::MissingParent {
                    entity: schema.name().fqn.clone(),
                    field: reference.field.clone(),
                });
            }
        }
        if let Some(pid) = data.persistent_id() {
            if let Some(existing) = self.indexes.persistent_ids().entity(&pid) {
                return Err(Error::DuplicatePersistentId {
                    persistent_id: pid.presentable_name(),
                    existing,
                });
            }
        }

        let type_id = schema.type_id();
        let data = Arc::new(data);
        let slot = self.family_mut(type_id)?.add(Arc::clone(&data));
        let id = EntityId::new(type_id, slot);
        self.indexes.entity_added(&self.registry, id, &data);
        self.change_log.record_add(id, data, links.clone());
        for (connection, parent) in links {
            self.link(connection, id, parent)?;
        }
        trace!(entity = %id, r#type = %schema.name(), "entity added");
        Ok(id)
    }

    /// Attach a detached entity
    ///
    /// Attaching the same entity to the same builder twice returns the id
    /// from the first call. Attaching it to a different builder fails.
    pub fn attach(&mut self, entity: &mut NewEntity) -> Result<EntityId> {
        if let Some((builder, id)) = entity.attachment() {
            if builder == self.id {
                return Ok(id);
            }
            return Err(Error::AttachedToDifferentBuilder {
                entity: entity.data().schema().name().fqn.clone(),
            });
        }
        let id = self.add_entity(entity.data().clone(), entity.parents())?;
        entity.mark_attached(self.id, id);
        Ok(id)
    }

    /// Remove an entity and everything that cannot live without it
    ///
    /// Returns the removed ids, the requested one first.
    pub fn remove_entity(&mut self, id: EntityId) -> Result<Vec<EntityId>> {
        if !self.contains(id) {
            return Err(Error::EntityNotFound(id));
        }
        let mut visited: FxHashSet<EntityId> = FxHashSet::default();
        let mut removal = Vec::new();
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            if !visited.insert(current) {
                continue;
            }
            removal.push(current);
            let connections = self.registry.child_connections(current.type_id).to_vec();
            for connection in connections {
                let children = self.refs.children(connection, current).to_vec();
                for child in children {
                    if connection.parent_nullable {
                        self.detach(connection, child)?;
                    } else {
                        stack.push(child);
                    }
                }
            }
        }

        for &removed in &removal {
            let old = self
                .family_mut(removed.type_id)?
                .remove(removed.slot)
                .ok_or(Error::EntityNotFound(removed))?;
            self.refs.remove_entity(removed);
            self.indexes.entity_removed(removed);
            self.change_log.record_remove(removed, old);
        }
        trace!(entity = %id, cascaded = removal.len() - 1, "entity removed");
        Ok(removal)
    }

    /// Modify an entity through a writable façade
    ///
    /// The mutator's changes are validated as a whole after it returns. Only
    /// indexes affected by the changed fields are updated.
    pub fn modify_entity<F>(&mut self, id: EntityId, mutator: F) -> Result<()>
    where
        F: FnOnce(&mut ModifiableEntity<'_>) -> Result<()>,
    {
        let old = Arc::clone(self.entity_data(id).ok_or(Error::EntityNotFound(id))?);
        let registry = Arc::clone(&self.registry);
        let mut modifiable = ModifiableEntity::new(&registry, id, (*old).clone());
        mutator(&mut modifiable)?;
        let (data, parent_changes) = modifiable.into_parts();

        let changed = old.changed_fields(&data);
        data.check_types(&registry, changed.iter().copied())?;
        data.check_initialized()?;
        if let Some(pid) = data.persistent_id() {
            match self.indexes.persistent_ids().entity(&pid) {
                Some(existing) if existing != id => {
                    return Err(Error::DuplicatePersistentId {
                        persistent_id: pid.presentable_name(),
                        existing,
                    })
                }
                _ => {}
            }
        }
        for (&connection, parent) in &parent_changes {
            match parent {
                Some(parent) => self.check_parent(connection, *parent)?,
                None if !connection.parent_nullable => {
                    return Err(Error::MissingParent {
                        entity: data.schema().name().fqn.clone(),
                        field: data.schema().parent_field(connection).unwrap_or_default().to_string(),
                    })
                }
                None => {}
            }
        }
        let parent_changes: BTreeMap<ConnectionId, Option<EntityId>> = parent_changes
            .into_iter()
            .filter(|(connection, parent)| self.refs.parent(*connection, id) != *parent)
            .collect();
        if changed.is_empty() && parent_changes.is_empty() {
            return Ok(());
        }

        let data = Arc::new(data);
        if !changed.is_empty() {
            self.family_mut(id.type_id)?.replace(id.slot, Arc::clone(&data))?;
            self.indexes.entity_replaced(&registry, id, &data, &changed);
        }
        self.change_log
            .record_replace(id, old, Arc::clone(&data), parent_changes.clone());
        for (connection, parent) in parent_changes {
            match parent {
                Some(parent) => self.link(connection, id, parent)?,
                None => {
                    self.refs.remove_parent(connection, id);
                }
            }
        }
        trace!(entity = %id, fields = changed.len(), "entity modified");
        Ok(())
    }

    /// Move an entity to a new source
    pub fn change_entity_source(&mut self, id: EntityId, source: EntitySource) -> Result<()> {
        let old = Arc::clone(self.entity_data(id).ok_or(Error::EntityNotFound(id))?);
        if old.source() == &source {
            return Ok(());
        }
        let mut data = (*old).clone();
        data.set_source(source.clone());
        let data = Arc::new(data);
        self.family_mut(id.type_id)?.replace(id.slot, Arc::clone(&data))?;
        self.indexes.source_changed(id, source);
        self.change_log.record_source_change(id, old, data);
        trace!(entity = %id, "entity source changed");
        Ok(())
    }

    // ========================================================================
    // Reference operations
    // ========================================================================

    /// Set or clear the parent of `child` in `connection`
    ///
    /// Clearing a non-nullable reference fails with `MissingParent`; remove
    /// the child instead.
    pub fn update_parent_of_child(
        &mut self,
        connection: ConnectionId,
        child: EntityId,
        parent: Option<EntityId>,
    ) -> Result<()> {
        self.check_child(connection, child)?;
        match parent {
            Some(parent) => {
                self.check_parent(connection, parent)?;
                if self.refs.parent(connection, child) == Some(parent) {
                    return Ok(());
                }
                self.record_reparent(connection, child, Some(parent))?;
                self.link(connection, child, parent)
            }
            None => {
                if self.refs.parent(connection, child).is_none() {
                    return Ok(());
                }
                if !connection.parent_nullable {
                    let data = self.entity_data(child).ok_or(Error::EntityNotFound(child))?;
                    return Err(Error::MissingParent {
                        entity: data.schema().name().fqn.clone(),
                        field: data.schema().parent_field(connection).unwrap_or_default().to_string(),
                    });
                }
                self.detach(connection, child)
            }
        }
    }

    /// Make `children` the exact ordered children of `parent` in `connection`
    ///
    /// Children dropped from the list are removed when the reference is
    /// non-nullable and detached otherwise.
    pub fn update_children_of_parent(
        &mut self,
        connection: ConnectionId,
        parent: EntityId,
        children: &[EntityId],
    ) -> Result<()> {
        self.check_parent(connection, parent)?;
        if connection.kind.is_one_to_one() && children.len() > 1 {
            return Err(Error::InvalidConnection(format!(
                "{} accepts a single child, got {}",
                connection,
                children.len()
            )));
        }
        let mut seen = FxHashSet::default();
        for &child in children {
            self.check_child(connection, child)?;
            if !seen.insert(child) {
                return Err(Error::InvalidConnection(format!("{} listed twice", child)));
            }
        }

        let previous = self.refs.children(connection, parent).to_vec();
        let kept: Vec<EntityId> = children.to_vec();
        for dropped in previous.iter().copied().filter(|c| !seen.contains(c)) {
            if !self.contains(dropped) {
                continue;
            }
            if connection.parent_nullable {
                self.detach(connection, dropped)?;
            } else {
                self.remove_entity(dropped)?;
            }
        }
        let kept: Vec<EntityId> = kept.into_iter().filter(|c| self.contains(*c)).collect();
        for &child in &kept {
            if self.refs.parent(connection, child) != Some(parent) {
                self.record_reparent(connection, child, Some(parent))?;
            }
        }
        if self.refs.children(connection, parent) != kept.as_slice() {
            self.change_log.record_children_order(connection, parent, kept.clone());
        }
        self.refs.set_children(connection, parent, &kept);
        trace!(parent = %parent, children = kept.len(), "children updated");
        Ok(())
    }

    // ========================================================================
    // Internals
    // ========================================================================

    fn family_mut(&mut self, type_id: EntityTypeId) -> Result<&mut MutableEntityFamily> {
        self.families
            .get_mut(type_id.index())
            .ok_or_else(|| Error::UnknownEntityType(format!("#{}", type_id)))
    }

    fn check_parent(&self, connection: ConnectionId, parent: EntityId) -> Result<()> {
        if !self.contains(parent) {
            return Err(Error::EntityNotFound(parent));
        }
        if !self.registry.is_assignable(parent.type_id, connection.parent) {
            return Err(Error::InvalidConnection(format!(
                "{} cannot be the parent in {}",
                parent, connection
            )));
        }
        Ok(())
    }

    fn check_child(&self, connection: ConnectionId, child: EntityId) -> Result<()> {
        let data = self.entity_data(child).ok_or(Error::EntityNotFound(child))?;
        if data.schema().parent_field(connection).is_none() {
            return Err(Error::InvalidConnection(format!(
                "{} cannot be a child in {}",
                child, connection
            )));
        }
        Ok(())
    }

    fn record_reparent(&mut self, connection: ConnectionId, child: EntityId, parent: Option<EntityId>) -> Result<()> {
        let data = Arc::clone(self.entity_data(child).ok_or(Error::EntityNotFound(child))?);
        self.change_log
            .record_replace(child, Arc::clone(&data), data, [(connection, parent)].into_iter().collect());
        Ok(())
    }

    fn detach(&mut self, connection: ConnectionId, child: EntityId) -> Result<()> {
        self.record_reparent(connection, child, None)?;
        self.refs.remove_parent(connection, child);
        trace!(child = %child, "entity detached");
        Ok(())
    }

    /// Link `child` under `parent`, displacing a one-to-one peer
    fn link(&mut self, connection: ConnectionId, child: EntityId, parent: EntityId) -> Result<()> {
        if connection.kind.is_one_to_one() {
            let displaced: Vec<EntityId> = self
                .refs
                .children(connection, parent)
                .iter()
                .copied()
                .filter(|c| *c != child)
                .collect();
            for peer in displaced {
                if !self.contains(peer) {
                    continue;
                }
                if connection.parent_nullable {
                    self.detach(connection, peer)?;
                } else {
                    self.remove_entity(peer)?;
                }
            }
        }
        self.refs.set_parent(connection, child, parent);
        Ok(())
    }
}

impl EntityStorage for Builder {
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
