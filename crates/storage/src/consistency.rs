//! Full-graph consistency check
//!
//! Not run on the mutation path. Used after cache loads when trace logging
//! is enabled, and by tests. Every problem found is returned; the check
//! never stops at the first one.

use crate::indexes::StorageIndexes;
use crate::storage::EntityStorage;
use rustc_hash::FxHashMap;
use std::fmt;
use wsmodel_core::{ConnectionId, EntityId, PersistentId};

/// One consistency problem
#[derive(Debug, Clone, PartialEq)]
pub enum ConsistencyIssue {
    /// An edge points at an entity that does not exist
    DanglingReference {
        /// Connection holding the edge
        connection: ConnectionId,
        /// Child side
        child: EntityId,
        /// Parent side
        parent: EntityId,
    },
    /// The child → parent and parent → children directions disagree
    AsymmetricReference {
        /// Connection holding the edge
        connection: ConnectionId,
        /// Child side
        child: EntityId,
        /// Parent side
        parent: EntityId,
    },
    /// A one-to-one parent holds more than one child
    TooManyChildren {
        /// One-to-one connection
        connection: ConnectionId,
        /// Parent side
        parent: EntityId,
        /// Number of children stored
        count: usize,
    },
    /// An entity lacks a non-nullable parent
    MissingParent {
        /// Entity without parent
        entity: EntityId,
        /// Reference name
        field: String,
    },
    /// An auxiliary index differs from a full rebuild
    IndexDrift {
        /// Name of the drifted index
        index: &'static str,
    },
    /// Two entities produce the same persistent id
    DuplicatePersistentId {
        /// Shared id
        persistent_id: PersistentId,
        /// First owner
        first: EntityId,
        /// Second owner
        second: EntityId,
    },
}

impl fmt::Display for ConsistencyIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConsistencyIssue::DanglingReference {
                connection,
                child,
                parent,
            } => write!(f, "dangling reference {} -> {} in {}", child, parent, connection),
            ConsistencyIssue::AsymmetricReference {
                connection,
                child,
                parent,
            } => write!(f, "asymmetric reference {} -> {} in {}", child, parent, connection),
            ConsistencyIssue::TooManyChildren {
                connection,
                parent,
                count,
            } => write!(f, "{} has {} children in one-to-one {}", parent, count, connection),
            ConsistencyIssue::MissingParent { entity, field } => {
                write!(f, "{} has no parent in mandatory reference {}", entity, field)
            }
            ConsistencyIssue::IndexDrift { index } => write!(f, "{} index differs from a rebuild", index),
            ConsistencyIssue::DuplicatePersistentId {
                persistent_id,
                first,
                second,
            } => write!(f, "{} owned by both {} and {}", persistent_id, first, second),
        }
    }
}

/// Check references, cardinality, mandatory parents, indexes and persistent ids
pub fn check(storage: &dyn EntityStorage) -> Vec<ConsistencyIssue> {
    let mut issues = Vec::new();
    let refs = storage.refs();

    for connection in refs.connections() {
        let Some(table) = refs.table(connection) else {
            continue;
        };
        for (child, parent) in table.iter_parents() {
            if !storage.contains(child) || !storage.contains(parent) {
                issues.push(ConsistencyIssue::DanglingReference {
                    connection,
                    child,
                    parent,
                });
            }
            if !table.children(parent).contains(&child) {
                issues.push(ConsistencyIssue::AsymmetricReference {
                    connection,
                    child,
                    parent,
                });
            }
        }
        for (parent, children) in table.iter_children() {
            if connection.kind.is_one_to_one() && children.len() > 1 {
                issues.push(ConsistencyIssue::TooManyChildren {
                    connection,
                    parent,
                    count: children.len(),
                });
            }
            for &child in children {
                if table.parent(child) != Some(parent) {
                    issues.push(ConsistencyIssue::AsymmetricReference {
                        connection,
                        child,
                        parent,
                    });
                }
            }
        }
    }

    let mut owners: FxHashMap<PersistentId, EntityId> = FxHashMap::default();
    for (id, data) in storage.all_entities() {
        for reference in data.schema().parent_connections() {
            if !reference.connection.parent_nullable
                && storage.extract_parent(reference.connection, id).is_none()
            {
                issues.push(ConsistencyIssue::MissingParent {
                    entity: id,
                    field: reference.field.clone(),
                });
            }
        }
        if let Some(pid) = data.persistent_id() {
            if let Some(&first) = owners.get(&pid) {
                issues.push(ConsistencyIssue::DuplicatePersistentId {
                    persistent_id: pid,
                    first,
                    second: id,
                });
            } else {
                owners.insert(pid, id);
            }
        }
    }

    let rebuilt = StorageIndexes::rebuild(
        storage.registry(),
        storage.all_entities().map(|(id, data)| (id, data.as_ref())),
    );
    let current = storage.indexes();
    if current.sources() != rebuilt.sources() {
        issues.push(ConsistencyIssue::IndexDrift { index: "entity source" });
    }
    if current.soft_links() != rebuilt.soft_links() {
        issues.push(ConsistencyIssue::IndexDrift { index: "soft link" });
    }
    if current.urls() != rebuilt.urls() {
        issues.push(ConsistencyIssue::IndexDrift {
            index: "virtual file url",
        });
    }
    if current.persistent_ids() != rebuilt.persistent_ids() {
        issues.push(ConsistencyIssue::IndexDrift { index: "persistent id" });
    }
    issues
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::Builder;
    use crate::family::ImmutableEntityFamily;
    use crate::refs::RefsTable;
    use crate::snapshot::Snapshot;
    use crate::testing::{child, facet, module, parent, sample_registry};
    use std::sync::Arc;

    #[test]
    fn test_valid_graph_has_no_issues() {
        let registry = sample_registry();
        let mut builder = Builder::new(Arc::clone(&registry));
        let m = builder.add_entity(module(&registry, "m"), &[]).unwrap();
        let link = registry.connection("Facet", "module").unwrap();
        builder.add_entity(facet(&registry, "f"), &[(link, m)]).unwrap();
        assert!(check(&builder).is_empty());
    }

    #[test]
    fn test_detects_missing_parent_and_stale_indexes() {
        let registry = sample_registry();
        let mut builder = Builder::new(Arc::clone(&registry));
        let p = builder.add_entity(parent(&registry, "p"), &[]).unwrap();
        let link = registry.connection("Child", "parent").unwrap();
        builder.add_entity(child(&registry, "c"), &[(link, p)]).unwrap();
        builder.add_entity(module(&registry, "m"), &[]).unwrap();
        let snapshot = builder.freeze();

        // Same families, but no references and no indexes
        let broken = Snapshot::from_parts(
            Arc::clone(&registry),
            snapshot.families().to_vec(),
            RefsTable::new(),
            Default::default(),
        )
        .unwrap();
        let issues = check(&broken);
        assert!(issues
            .iter()
            .any(|i| matches!(i, ConsistencyIssue::MissingParent { field, .. } if field == "parent")));
        assert!(issues.contains(&ConsistencyIssue::IndexDrift { index: "persistent id" }));
    }

    #[test]
    fn test_detects_second_child_in_one_to_one() {
        let registry = sample_registry();
        let link = registry.connection("Child", "parent").unwrap();
        let mut builder = Builder::new(Arc::clone(&registry));
        let p1 = builder.add_entity(parent(&registry, "p1"), &[]).unwrap();
        let c1 = builder.add_entity(child(&registry, "c1"), &[(link, p1)]).unwrap();
        let p2 = builder.add_entity(parent(&registry, "p2"), &[]).unwrap();
        let c2 = builder.add_entity(child(&registry, "c2"), &[(link, p2)]).unwrap();
        let snapshot = builder.freeze();
        assert!(check(&snapshot).is_empty());

        let mut refs = snapshot.refs().clone();
        refs.set_children(link, p1, &[c1, c2]);
        let broken = Snapshot::from_parts(
            Arc::clone(&registry),
            snapshot.families().to_vec(),
            refs,
            snapshot.indexes().clone(),
        )
        .unwrap();
        let issues = check(&broken);
        assert_eq!(
            issues,
            vec![ConsistencyIssue::TooManyChildren {
                connection: link,
                parent: p1,
                count: 2,
            }]
        );
    }

    #[test]
    fn test_detects_dangling_reference() {
        let registry = sample_registry();
        let mut builder = Builder::new(Arc::clone(&registry));
        let m = builder.add_entity(module(&registry, "m"), &[]).unwrap();
        let link = registry.connection("Facet", "module").unwrap();
        builder.add_entity(facet(&registry, "f"), &[(link, m)]).unwrap();
        let snapshot = builder.freeze();

        let mut families = snapshot.families().to_vec();
        families[m.type_id.index()] = ImmutableEntityFamily::new(m.type_id);
        let broken = Snapshot::from_parts(
            Arc::clone(&registry),
            families,
            snapshot.refs().clone(),
            snapshot.indexes().clone(),
        )
        .unwrap();
        let issues = check(&broken);
        assert!(issues
            .iter()
            .any(|i| matches!(i, ConsistencyIssue::DanglingReference { parent, .. } if *parent == m)));
    }
}
