//! Change log: ordered record of one builder's mutations
//!
//! One entry per entity id, kept at the position of the first change to
//! that id. Later changes collapse into the existing entry:
//!
//! | existing                 | incoming      | result                                  |
//! |--------------------------|---------------|-----------------------------------------|
//! | AddEntity                | replace       | AddEntity with the new data             |
//! | AddEntity                | source change | AddEntity with the new data             |
//! | AddEntity                | remove        | entry dropped                           |
//! | ReplaceEntity            | replace       | ReplaceEntity, original `old` kept      |
//! | ReplaceEntity            | source change | ReplaceAndChangeSource                  |
//! | ChangeEntitySource       | replace       | ReplaceAndChangeSource                  |
//! | any non-add              | remove        | RemoveEntity with the original `old`    |
//!
//! Remove dominates: once an entity is removed nothing else is recorded
//! for it, since ids are never reused.
//!
//! Child order is kept apart from the entries, as the last explicit order
//! set per parent and connection. Removing the parent drops its orders.

use rustc_hash::FxHashMap;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use wsmodel_core::{ConnectionId, EntityData, EntityId, EntityTypeId};

/// Field-level replacement of one entity
#[derive(Debug, Clone, PartialEq)]
pub struct Replacement {
    /// Data before the first change in this log
    pub old: Arc<EntityData>,
    /// Current data
    pub new: Arc<EntityData>,
    /// Positions of fields that differ between `old` and `new`
    pub changed_fields: BTreeSet<usize>,
    /// Parent references changed by this log (`None` means detached)
    pub parents: BTreeMap<ConnectionId, Option<EntityId>>,
}

impl Replacement {
    fn absorb(&mut self, new: Arc<EntityData>, parents: BTreeMap<ConnectionId, Option<EntityId>>) {
        self.changed_fields = self.old.changed_fields(&new).into_iter().collect();
        self.new = new;
        self.parents.extend(parents);
    }
}

/// One collapsed change to an entity
#[derive(Debug, Clone, PartialEq)]
pub enum ChangeEntry {
    /// Entity created by this log
    AddEntity {
        /// Current data
        data: Arc<EntityData>,
        /// Parent of the entity per connection
        parents: BTreeMap<ConnectionId, EntityId>,
    },
    /// Entity removed by this log
    RemoveEntity {
        /// Data as it was in the base
        old: Arc<EntityData>,
    },
    /// Fields or parent references changed
    ReplaceEntity(Replacement),
    /// Only the source changed
    ChangeEntitySource {
        /// Data as it was in the base
        old: Arc<EntityData>,
        /// Data with the new source
        new: Arc<EntityData>,
    },
    /// Fields and source changed
    ReplaceAndChangeSource(Replacement),
}

impl ChangeEntry {
    /// Short name used in logs and reports
    pub fn kind(&self) -> &'static str {
        match self {
            ChangeEntry::AddEntity { .. } => "add",
            ChangeEntry::RemoveEntity { .. } => "remove",
            ChangeEntry::ReplaceEntity(_) => "replace",
            ChangeEntry::ChangeEntitySource { .. } => "change_source",
            ChangeEntry::ReplaceAndChangeSource(_) => "replace_and_change_source",
        }
    }
}

/// Per-type summary of what a builder changed relative to its base
#[derive(Debug, Clone, PartialEq)]
pub enum EntityChange {
    /// Entity did not exist in the base
    Added(Arc<EntityData>),
    /// Entity no longer exists
    Removed(Arc<EntityData>),
    /// Entity exists in both with different data or references
    Replaced {
        /// Base data
        old: Arc<EntityData>,
        /// Current data
        new: Arc<EntityData>,
    },
}

/// Ordered, collapsing record of mutations
#[derive(Debug, Clone, Default)]
pub struct ChangeLog {
    entries: Vec<Option<(EntityId, ChangeEntry)>>,
    positions: FxHashMap<EntityId, usize>,
    orders: BTreeMap<(ConnectionId, EntityId), Vec<EntityId>>,
}

impl ChangeLog {
    /// Empty log
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a log from decoded entries, collapsing duplicates
    pub fn from_entries(entries: impl IntoIterator<Item = (EntityId, ChangeEntry)>) -> Self {
        let mut log = ChangeLog::new();
        for (id, entry) in entries {
            match entry {
                ChangeEntry::AddEntity { data, parents } => log.record_add(id, data, parents),
                ChangeEntry::RemoveEntity { old } => log.record_remove(id, old),
                ChangeEntry::ReplaceEntity(r) => log.record_replace(id, r.old, r.new, r.parents),
                ChangeEntry::ChangeEntitySource { old, new } => log.record_source_change(id, old, new),
                ChangeEntry::ReplaceAndChangeSource(r) => {
                    log.record_replace(id, r.old, Arc::clone(&r.new), r.parents);
                    let old = log.current_data(id).unwrap_or_else(|| Arc::clone(&r.new));
                    log.record_source_change(id, old, r.new);
                }
            }
        }
        log
    }

    fn current_data(&self, id: EntityId) -> Option<Arc<EntityData>> {
        match self.get(id)? {
            ChangeEntry::AddEntity { data, .. } => Some(Arc::clone(data)),
            ChangeEntry::RemoveEntity { .. } => None,
            ChangeEntry::ReplaceEntity(r) | ChangeEntry::ReplaceAndChangeSource(r) => Some(Arc::clone(&r.new)),
            ChangeEntry::ChangeEntitySource { new, .. } => Some(Arc::clone(new)),
        }
    }

    fn slot_mut(&mut self, id: EntityId) -> Option<&mut Option<(EntityId, ChangeEntry)>> {
        let position = *self.positions.get(&id)?;
        self.entries.get_mut(position)
    }

    fn push(&mut self, id: EntityId, entry: ChangeEntry) {
        self.positions.insert(id, self.entries.len());
        self.entries.push(Some((id, entry)));
    }

    /// Record a new entity
    pub fn record_add(&mut self, id: EntityId, data: Arc<EntityData>, parents: BTreeMap<ConnectionId, EntityId>) {
        match self.slot_mut(id) {
            Some(slot) => *slot = Some((id, ChangeEntry::AddEntity { data, parents })),
            None => self.push(id, ChangeEntry::AddEntity { data, parents }),
        }
    }

    /// Record a removal
    pub fn record_remove(&mut self, id: EntityId, old: Arc<EntityData>) {
        self.orders.retain(|(_, parent), _| *parent != id);
        let Some(slot) = self.slot_mut(id) else {
            self.push(id, ChangeEntry::RemoveEntity { old });
            return;
        };
        let next = match slot.take() {
            Some((_, ChangeEntry::AddEntity { .. })) => None,
            Some((_, ChangeEntry::ReplaceEntity(r))) | Some((_, ChangeEntry::ReplaceAndChangeSource(r))) => {
                Some(ChangeEntry::RemoveEntity { old: r.old })
            }
            Some((_, ChangeEntry::ChangeEntitySource { old: original, .. })) => {
                Some(ChangeEntry::RemoveEntity { old: original })
            }
            Some((_, removed @ ChangeEntry::RemoveEntity { .. })) => Some(removed),
            None => Some(ChangeEntry::RemoveEntity { old }),
        };
        *slot = next.map(|entry| (id, entry));
        if slot.is_none() {
            self.positions.remove(&id);
        }
    }

    /// Record a field or reference change
    pub fn record_replace(
        &mut self,
        id: EntityId,
        old: Arc<EntityData>,
        new: Arc<EntityData>,
        parents: BTreeMap<ConnectionId, Option<EntityId>>,
    ) {
        let Some(slot) = self.slot_mut(id) else {
            let changed_fields = old.changed_fields(&new).into_iter().collect();
            self.push(
                id,
                ChangeEntry::ReplaceEntity(Replacement {
                    old,
                    new,
                    changed_fields,
                    parents,
                }),
            );
            return;
        };
        let next = match slot.take() {
            Some((_, ChangeEntry::AddEntity { parents: mut current, .. })) => {
                for (connection, parent) in parents {
                    match parent {
                        Some(parent) => current.insert(connection, parent),
                        None => current.remove(&connection),
                    };
                }
                ChangeEntry::AddEntity {
                    data: new,
                    parents: current,
                }
            }
            Some((_, ChangeEntry::ReplaceEntity(mut r))) => {
                r.absorb(new, parents);
                ChangeEntry::ReplaceEntity(r)
            }
            Some((_, ChangeEntry::ReplaceAndChangeSource(mut r))) => {
                r.absorb(new, parents);
                ChangeEntry::ReplaceAndChangeSource(r)
            }
            Some((_, ChangeEntry::ChangeEntitySource { old: original, .. })) => {
                let mut r = Replacement {
                    old: original,
                    new: Arc::clone(&new),
                    changed_fields: BTreeSet::new(),
                    parents: BTreeMap::new(),
                };
                r.absorb(new, parents);
                ChangeEntry::ReplaceAndChangeSource(r)
            }
            Some((_, removed @ ChangeEntry::RemoveEntity { .. })) => removed,
            None => {
                let changed_fields = old.changed_fields(&new).into_iter().collect();
                ChangeEntry::ReplaceEntity(Replacement {
                    old,
                    new,
                    changed_fields,
                    parents,
                })
            }
        };
        *slot = Some((id, next));
    }

    /// Record a source change
    pub fn record_source_change(&mut self, id: EntityId, old: Arc<EntityData>, new: Arc<EntityData>) {
        let Some(slot) = self.slot_mut(id) else {
            self.push(id, ChangeEntry::ChangeEntitySource { old, new });
            return;
        };
        let next = match slot.take() {
            Some((_, ChangeEntry::AddEntity { parents, .. })) => ChangeEntry::AddEntity { data: new, parents },
            Some((_, ChangeEntry::ReplaceEntity(mut r))) | Some((_, ChangeEntry::ReplaceAndChangeSource(mut r))) => {
                r.new = new;
                ChangeEntry::ReplaceAndChangeSource(r)
            }
            Some((_, ChangeEntry::ChangeEntitySource { old: original, .. })) => {
                ChangeEntry::ChangeEntitySource { old: original, new }
            }
            Some((_, removed @ ChangeEntry::RemoveEntity { .. })) => removed,
            None => ChangeEntry::ChangeEntitySource { old, new },
        };
        *slot = Some((id, next));
    }

    /// Record `children` as the explicit order under `parent`
    pub fn record_children_order(&mut self, connection: ConnectionId, parent: EntityId, children: Vec<EntityId>) {
        if matches!(self.get(parent), Some(ChangeEntry::RemoveEntity { .. })) {
            return;
        }
        self.orders.insert((connection, parent), children);
    }

    /// Recorded child orders, keyed by connection and parent
    pub fn children_orders(&self) -> impl Iterator<Item = (ConnectionId, EntityId, &[EntityId])> {
        self.orders
            .iter()
            .map(|(&(connection, parent), children)| (connection, parent, children.as_slice()))
    }

    /// Collapsed entry for an id
    pub fn get(&self, id: EntityId) -> Option<&ChangeEntry> {
        let position = *self.positions.get(&id)?;
        self.entries
            .get(position)
            .and_then(|e| e.as_ref())
            .map(|(_, entry)| entry)
    }

    /// Entries in order of first change
    pub fn iter(&self) -> impl Iterator<Item = (EntityId, &ChangeEntry)> {
        self.entries
            .iter()
            .filter_map(|e| e.as_ref())
            .map(|(id, entry)| (*id, entry))
    }

    /// Number of live entries, child orders not counted
    pub fn len(&self) -> usize {
        self.positions.len()
    }

    /// Whether nothing was recorded
    pub fn is_empty(&self) -> bool {
        self.positions.is_empty() && self.orders.is_empty()
    }

    /// Per-type summary of the log
    pub fn changes_by_type(&self) -> BTreeMap<EntityTypeId, Vec<EntityChange>> {
        let mut out: BTreeMap<_, Vec<EntityChange>> = BTreeMap::new();
        for (id, entry) in self.iter() {
            let change = match entry {
                ChangeEntry::AddEntity { data, .. } => EntityChange::Added(Arc::clone(data)),
                ChangeEntry::RemoveEntity { old } => EntityChange::Removed(Arc::clone(old)),
                ChangeEntry::ReplaceEntity(r) | ChangeEntry::ReplaceAndChangeSource(r) => EntityChange::Replaced {
                    old: Arc::clone(&r.old),
                    new: Arc::clone(&r.new),
                },
                ChangeEntry::ChangeEntitySource { old, new } => EntityChange::Replaced {
                    old: Arc::clone(old),
                    new: Arc::clone(new),
                },
            };
            out.entry(id.type_id).or_default().push(change);
        }
        out
    }
}
