//! Reference index: parent/child edges per connection
//!
//! Every connection owns one `ConnectionTable` with both directions:
//! - `parent_of`: child → parent
//! - `children_of`: parent → children in insertion order
//!
//! Tables sit behind `Arc` and are copied on first write, so a builder that
//! only touches one connection shares every other table with its base.
//!
//! This layer is raw: it keeps the two directions symmetric and nothing else.
//! Cascade removal, one-to-one displacement and type checks belong to the
//! builder, which decides what happens to displaced entities.

use rustc_hash::FxHashMap;
use smallvec::SmallVec;
use std::sync::Arc;
use wsmodel_core::{ConnectionId, EntityId};

/// Children of one parent in insertion order
pub type ChildList = SmallVec<[EntityId; 4]>;

/// Edges of one connection
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConnectionTable {
    parent_of: FxHashMap<EntityId, EntityId>,
    children_of: FxHashMap<EntityId, ChildList>,
}

impl ConnectionTable {
    /// Parent of a child
    pub fn parent(&self, child: EntityId) -> Option<EntityId> {
        self.parent_of.get(&child).copied()
    }

    /// Children of a parent
    pub fn children(&self, parent: EntityId) -> &[EntityId] {
        self.children_of
            .get(&parent)
            .map(|c| c.as_slice())
            .unwrap_or(&[])
    }

    /// Every (parent, children) pair
    pub fn iter_children(&self) -> impl Iterator<Item = (EntityId, &[EntityId])> + '_ {
        self.children_of.iter().map(|(p, c)| (*p, c.as_slice()))
    }

    /// Every (child, parent) pair
    pub fn iter_parents(&self) -> impl Iterator<Item = (EntityId, EntityId)> + '_ {
        self.parent_of.iter().map(|(c, p)| (*c, *p))
    }

    /// Number of edges
    pub fn len(&self) -> usize {
        self.parent_of.len()
    }

    /// Whether the table has no edges
    pub fn is_empty(&self) -> bool {
        self.parent_of.is_empty()
    }

    fn unlink_child(&mut self, child: EntityId) -> Option<EntityId> {
        let parent = self.parent_of.remove(&child)?;
        if let Some(list) = self.children_of.get_mut(&parent) {
            list.retain(|c| *c != child);
            if list.is_empty() {
                self.children_of.remove(&parent);
            }
        }
        Some(parent)
    }
}

/// All connection tables of a storage
#[derive(Debug, Clone, Default)]
pub struct RefsTable {
    tables: FxHashMap<ConnectionId, Arc<ConnectionTable>>,
}

impl RefsTable {
    /// Empty reference index
    pub fn new() -> Self {
        Self::default()
    }

    /// Table of one connection
    pub fn table(&self, connection: ConnectionId) -> Option<&ConnectionTable> {
        self.tables.get(&connection).map(|t| t.as_ref())
    }

    /// Connections with at least one edge
    pub fn connections(&self) -> impl Iterator<Item = ConnectionId> + '_ {
        self.tables
            .iter()
            .filter(|(_, t)| !t.is_empty())
            .map(|(c, _)| *c)
    }

    /// Stored parent of a child (no type check)
    pub fn parent(&self, connection: ConnectionId, child: EntityId) -> Option<EntityId> {
        self.table(connection).and_then(|t| t.parent(child))
    }

    /// Stored children of a parent (no type check)
    pub fn children(&self, connection: ConnectionId, parent: EntityId) -> &[EntityId] {
        self.table(connection)
            .map(|t| t.children(parent))
            .unwrap_or(&[])
    }

    fn table_mut(&mut self, connection: ConnectionId) -> &mut ConnectionTable {
        Arc::make_mut(self.tables.entry(connection).or_default())
    }

    /// Link `child` under `parent`, returning the previous parent
    ///
    /// The child is appended to the parent's list unless it is already there.
    pub fn set_parent(
        &mut self,
        connection: ConnectionId,
        child: EntityId,
        parent: EntityId,
    ) -> Option<EntityId> {
        if self.parent(connection, child) == Some(parent) {
            return Some(parent);
        }
        let table = self.table_mut(connection);
        let previous = table.unlink_child(child);
        table.parent_of.insert(child, parent);
        table.children_of.entry(parent).or_default().push(child);
        previous
    }

    /// Unlink `child` from its parent
    pub fn remove_parent(&mut self, connection: ConnectionId, child: EntityId) -> Option<EntityId> {
        self.parent(connection, child)?;
        self.table_mut(connection).unlink_child(child)
    }

    /// Make `children` the exact ordered child list of `parent`
    ///
    /// Children previously under `parent` but absent from the list are
    /// unlinked; listed children are unlinked from any other parent.
    pub fn set_children(&mut self, connection: ConnectionId, parent: EntityId, children: &[EntityId]) {
        let table = self.table_mut(connection);
        if let Some(previous) = table.children_of.remove(&parent) {
            for child in previous {
                table.parent_of.remove(&child);
            }
        }
        for &child in children {
            table.unlink_child(child);
        }
        if children.is_empty() {
            return;
        }
        for &child in children {
            table.parent_of.insert(child, parent);
        }
        table
            .children_of
            .insert(parent, children.iter().copied().collect());
    }

    /// Drop every edge touching `id`, in any connection
    pub fn remove_entity(&mut self, id: EntityId) {
        let touched: Vec<ConnectionId> = self
            .tables
            .iter()
            .filter(|(_, t)| t.parent_of.contains_key(&id) || t.children_of.contains_key(&id))
            .map(|(c, _)| *c)
            .collect();
        for connection in touched {
            let table = self.table_mut(connection);
            table.unlink_child(id);
            if let Some(children) = table.children_of.remove(&id) {
                for child in children {
                    table.parent_of.remove(&child);
                }
            }
        }
    }

    /// Whether both indexes hold the same edges
    pub fn same_edges(&self, other: &RefsTable) -> bool {
        let mine: Vec<ConnectionId> = self.connections().collect();
        let theirs = other.connections().count();
        mine.len() == theirs
            && mine
                .iter()
                .all(|c| self.table(*c) == other.table(*c))
    }

    /// Whether both indexes share the table of `connection`
    pub fn shares_table_with(&self, other: &RefsTable, connection: ConnectionId) -> bool {
        match (self.tables.get(&connection), other.tables.get(&connection)) {
            (Some(a), Some(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}
