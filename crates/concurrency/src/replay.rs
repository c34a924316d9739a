//! Change log replay onto a target builder
//!
//! A change log is recorded against a base snapshot. Replaying it applies
//! the same mutations to a target that descends from that base (or to an
//! empty store, for logs made only of additions).
//!
//! # Order
//!
//! 1. Removals, so persistent ids they free are available to additions
//! 2. Additions and replacements in log order, repeated until no entry
//!    makes progress. An addition can name a parent the log adds later (a
//!    re-parented child keeps the position of its first change), so
//!    entries waiting for an unmapped parent or a persistent id still held
//!    by an entry not yet replayed are deferred to the next pass.
//! 3. Child orders. Listed children still under the parent come first in
//!    the recorded order, followed by the parent's other children.
//!
//! # Identity
//!
//! Entities added by the log get fresh ids in the target, reported in
//! `MergeReport::id_mapping`. Every other id is taken to name the same
//! entity in the target, which holds when both descend from the same
//! lineage since slots are never reused.
//!
//! # Atomicity
//!
//! The replay runs on a copy-on-write clone of the target. The target is
//! replaced only when the whole log applied.

use crate::conflict::{FieldConflict, MergePolicy, MergeReport, SkipReason, SkippedChange};
use crate::error::{MergeError, Result};
use rustc_hash::FxHashSet;
use std::sync::Arc;
use tracing::{debug, trace, warn};
use wsmodel_core::{ConnectionId, EntityData, EntityId, EntityTypeRegistry, Error};
use wsmodel_storage::{Builder, ChangeEntry, ChangeLog, EntityStorage, Replacement};

/// Replays one change log onto target builders
#[derive(Debug, Clone)]
pub struct ChangeLogReplayer<'a> {
    log: &'a ChangeLog,
    policy: MergePolicy,
}

enum Attempt {
    Applied,
    /// Retry on the next pass; carries the error to report if it never applies
    Deferred(Option<Error>),
    Skipped(SkipReason),
}

enum Mapped {
    Ready(EntityId),
    Pending,
    Gone,
}

#[derive(Default)]
struct ReplayState {
    /// Ids of entities the log adds
    added: FxHashSet<EntityId>,
    /// Added entities whose addition was skipped
    dropped: FxHashSet<EntityId>,
    report: MergeReport,
}

impl ReplayState {
    fn map(&self, target: &Builder, id: EntityId) -> Mapped {
        if self.added.contains(&id) {
            match self.report.id_mapping.get(&id) {
                Some(&mapped) if target.contains(mapped) => Mapped::Ready(mapped),
                Some(_) => Mapped::Gone,
                None if self.dropped.contains(&id) => Mapped::Gone,
                None => Mapped::Pending,
            }
        } else if target.contains(id) {
            Mapped::Ready(id)
        } else {
            Mapped::Gone
        }
    }
}

impl<'a> ChangeLogReplayer<'a> {
    /// Replayer using last-writer-wins
    pub fn new(log: &'a ChangeLog) -> Self {
        ChangeLogReplayer {
            log,
            policy: MergePolicy::default(),
        }
    }

    /// Use a different merge policy
    pub fn with_policy(mut self, policy: MergePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Apply the log to `target`
    ///
    /// On error the target is unchanged.
    pub fn replay(&self, target: &mut Builder) -> Result<MergeReport> {
        self.check_registry(target.registry())?;
        let mut work = target.clone();
        let mut state = ReplayState::default();
        for (id, entry) in self.log.iter() {
            if matches!(entry, ChangeEntry::AddEntity { .. }) {
                state.added.insert(id);
            }
        }

        for (id, entry) in self.log.iter() {
            if let ChangeEntry::RemoveEntity { .. } = entry {
                if work.contains(id) {
                    let removed = work.remove_entity(id)?;
                    trace!(entity = %id, cascaded = removed.len() - 1, "replayed removal");
                }
                state.report.applied += 1;
            }
        }

        let mut pending: Vec<(EntityId, &ChangeEntry)> = self
            .log
            .iter()
            .filter(|(_, entry)| !matches!(entry, ChangeEntry::RemoveEntity { .. }))
            .collect();
        loop {
            let mut progressed = false;
            let mut deferred = Vec::new();
            let mut blocking: Option<Error> = None;
            for (id, entry) in pending {
                match self.attempt(&mut work, &mut state, id, entry)? {
                    Attempt::Applied => {
                        progressed = true;
                        state.report.applied += 1;
                    }
                    Attempt::Skipped(reason) => {
                        progressed = true;
                        if matches!(entry, ChangeEntry::AddEntity { .. }) {
                            state.dropped.insert(id);
                        }
                        trace!(entity = %id, kind = entry.kind(), ?reason, "replay skipped entry");
                        state.report.skipped.push(SkippedChange {
                            entity: id,
                            kind: entry.kind(),
                            reason,
                        });
                    }
                    Attempt::Deferred(err) => {
                        if blocking.is_none() {
                            blocking = err;
                        }
                        deferred.push((id, entry));
                    }
                }
            }
            pending = deferred;
            if pending.is_empty() {
                break;
            }
            if !progressed {
                return match blocking {
                    Some(err) => Err(err.into()),
                    None => Err(MergeError::Engine(Error::InvalidConnection(format!(
                        "{} entries wait on parents that are never added",
                        pending.len()
                    )))),
                };
            }
        }

        for (connection, parent, order) in self.log.children_orders() {
            self.reorder(&mut work, &mut state, connection, parent, order)?;
        }

        let report = state.report;
        if !report.conflicts.is_empty() {
            if self.policy == MergePolicy::RejectConflicts {
                warn!(conflicts = report.conflicts.len(), "replay rejected");
                return Err(MergeError::Conflicts(report.conflicts));
            }
            warn!(conflicts = report.conflicts.len(), "replay overwrote concurrent field changes");
        }
        debug!(
            applied = report.applied,
            skipped = report.skipped.len(),
            added = report.id_mapping.len(),
            "change log replayed"
        );
        *target = work;
        Ok(report)
    }

    fn check_registry(&self, registry: &EntityTypeRegistry) -> Result<()> {
        for (_, entry) in self.log.iter() {
            let data = match entry {
                ChangeEntry::AddEntity { data, .. } => data,
                ChangeEntry::RemoveEntity { old } => old,
                ChangeEntry::ReplaceEntity(r) | ChangeEntry::ReplaceAndChangeSource(r) => &r.new,
                ChangeEntry::ChangeEntitySource { new, .. } => new,
            };
            let matches = registry
                .schema(data.type_id())
                .map(|schema| schema.name() == data.schema().name())
                .unwrap_or(false);
            if !matches {
                return Err(MergeError::IncompatibleRegistry(data.schema().name().fqn.clone()));
            }
        }
        Ok(())
    }

    fn attempt(
        &self,
        work: &mut Builder,
        state: &mut ReplayState,
        id: EntityId,
        entry: &ChangeEntry,
    ) -> Result<Attempt> {
        match entry {
            ChangeEntry::AddEntity { data, parents } => {
                let mut links = Vec::with_capacity(parents.len());
                for (&connection, &parent) in parents {
                    match state.map(work, parent) {
                        Mapped::Ready(mapped) => links.push((connection, mapped)),
                        Mapped::Pending => return Ok(Attempt::Deferred(None)),
                        Mapped::Gone if connection.parent_nullable => {}
                        Mapped::Gone => {
                            return Ok(Attempt::Skipped(SkipReason::ParentRemoved {
                                field: parent_field(data, connection),
                            }))
                        }
                    }
                }
                match work.add_entity(EntityData::clone(data), &links) {
                    Ok(added) => {
                        state.report.id_mapping.insert(id, added);
                        trace!(entity = %id, target = %added, "replayed addition");
                        Ok(Attempt::Applied)
                    }
                    Err(err @ Error::DuplicatePersistentId { .. }) => Ok(Attempt::Deferred(Some(err))),
                    Err(err) => Err(err.into()),
                }
            }
            ChangeEntry::ReplaceEntity(r) => self.replace(work, state, id, r, false),
            ChangeEntry::ReplaceAndChangeSource(r) => self.replace(work, state, id, r, true),
            ChangeEntry::ChangeEntitySource { new, .. } => {
                if !work.contains(id) {
                    return Ok(Attempt::Skipped(SkipReason::EntityRemoved));
                }
                work.change_entity_source(id, new.source().clone())?;
                Ok(Attempt::Applied)
            }
            ChangeEntry::RemoveEntity { .. } => Ok(Attempt::Applied),
        }
    }

    fn replace(
        &self,
        work: &mut Builder,
        state: &mut ReplayState,
        id: EntityId,
        replacement: &Replacement,
        with_source: bool,
    ) -> Result<Attempt> {
        let Some(current) = work.entity_data(id).map(Arc::clone) else {
            return Ok(Attempt::Skipped(SkipReason::EntityRemoved));
        };

        let schema = Arc::clone(replacement.new.schema());
        let mut conflicts = Vec::new();
        for &index in &replacement.changed_fields {
            let (Some(base), Some(incoming), Some(existing)) = (
                replacement.old.fields().get(index),
                replacement.new.fields().get(index),
                current.fields().get(index),
            ) else {
                continue;
            };
            if existing != base && existing != incoming {
                conflicts.push(FieldConflict {
                    entity: id,
                    field: schema.fields()[index].name.clone(),
                    target: existing.clone(),
                    incoming: incoming.clone(),
                });
            }
        }

        let mut reparent = Vec::new();
        let mut lost_parents = Vec::new();
        for (&connection, &parent) in &replacement.parents {
            let field = parent_field(&replacement.new, connection);
            match parent {
                None => reparent.push((field, None)),
                Some(parent) => match state.map(work, parent) {
                    Mapped::Ready(mapped) => reparent.push((field, Some(mapped))),
                    Mapped::Pending => return Ok(Attempt::Deferred(None)),
                    Mapped::Gone => lost_parents.push(field),
                },
            }
        }

        let modified = work.modify_entity(id, |entity| {
            for &index in &replacement.changed_fields {
                if let Some(value) = replacement.new.fields().get(index) {
                    entity.set_index(index, value.clone())?;
                }
            }
            for (field, parent) in &reparent {
                entity.set_parent(field, *parent)?;
            }
            Ok(())
        });
        match modified {
            Ok(()) => {}
            Err(err @ Error::DuplicatePersistentId { .. }) => return Ok(Attempt::Deferred(Some(err))),
            Err(err) => return Err(err.into()),
        }
        if with_source && current.source() != replacement.new.source() {
            work.change_entity_source(id, replacement.new.source().clone())?;
        }

        state.report.conflicts.extend(conflicts);
        for field in lost_parents {
            state.report.skipped.push(SkippedChange {
                entity: id,
                kind: "reparent",
                reason: SkipReason::ParentRemoved { field },
            });
        }
        trace!(entity = %id, fields = replacement.changed_fields.len(), "replayed replacement");
        Ok(Attempt::Applied)
    }

    fn reorder(
        &self,
        work: &mut Builder,
        state: &mut ReplayState,
        connection: ConnectionId,
        parent: EntityId,
        order: &[EntityId],
    ) -> Result<()> {
        let Mapped::Ready(target) = state.map(work, parent) else {
            trace!(parent = %parent, "child order dropped with its parent");
            return Ok(());
        };
        let current: Vec<EntityId> = work.extract_children(connection, target).collect();
        let mut ordered = Vec::with_capacity(current.len());
        for &child in order {
            if let Mapped::Ready(child) = state.map(work, child) {
                if current.contains(&child) && !ordered.contains(&child) {
                    ordered.push(child);
                }
            }
        }
        let rest: Vec<EntityId> = current.iter().copied().filter(|c| !ordered.contains(c)).collect();
        ordered.extend(rest);
        if ordered != current {
            work.update_children_of_parent(connection, target, &ordered)?;
            state.report.applied += 1;
            trace!(parent = %target, children = ordered.len(), "replayed child order");
        }
        Ok(())
    }
}

fn parent_field(data: &EntityData, connection: ConnectionId) -> String {
    data.schema()
        .parent_field(connection)
        .unwrap_or_default()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use wsmodel_core::Value;
    use wsmodel_storage::testing::{child, content_root, facet, library, module, parent, sample_registry, url};
    use wsmodel_storage::Snapshot;

    fn base_with_module() -> (Arc<EntityTypeRegistry>, Snapshot, EntityId) {
        let registry = sample_registry();
        let mut builder = Builder::new(Arc::clone(&registry));
        let m = builder.add_entity(module(&registry, "app"), &[]).unwrap();
        (registry, builder.freeze(), m)
    }

    // ========================================
    // Additions
    // ========================================

    #[test]
    fn test_replay_onto_base_reproduces_state() {
        let (registry, base, m) = base_with_module();
        let mut ours = base.to_builder();
        let link = registry.connection("RootBase", "module").unwrap();
        ours.add_entity(content_root(&registry, "file:///app/src"), &[(link, m)])
            .unwrap();
        ours.add_entity(module(&registry, "lib"), &[]).unwrap();

        let mut target = base.to_builder();
        let report = ChangeLogReplayer::new(ours.change_log()).replay(&mut target).unwrap();

        assert_eq!(report.applied, 2);
        assert_eq!(report.id_mapping.len(), 2);
        assert!(target.has_same_entities(&ours));
        assert!(target.assert_consistency().is_empty());
    }

    #[test]
    fn test_addition_waits_for_parent_added_later() {
        let registry = sample_registry();
        let link = registry.connection("Child", "parent").unwrap();
        let mut ours = Builder::new(Arc::clone(&registry));
        let p1 = ours.add_entity(parent(&registry, "p1"), &[]).unwrap();
        let c = ours.add_entity(child(&registry, "c"), &[(link, p1)]).unwrap();
        let p2 = ours.add_entity(parent(&registry, "p2"), &[]).unwrap();
        ours.update_parent_of_child(link, c, Some(p2)).unwrap();

        // The child's entry precedes the entry of its new parent
        let order: Vec<EntityId> = ours.change_log().iter().map(|(id, _)| id).collect();
        assert_eq!(order, vec![p1, c, p2]);

        let mut target = Builder::new(Arc::clone(&registry));
        let report = ChangeLogReplayer::new(ours.change_log()).replay(&mut target).unwrap();
        let c_target = report.target_id(c);
        assert_eq!(target.extract_parent(link, c_target), Some(report.target_id(p2)));
        assert!(report.is_clean());
    }

    #[test]
    fn test_addition_under_removed_parent_is_dropped() {
        let (registry, base, m) = base_with_module();
        let link = registry.connection("RootBase", "module").unwrap();
        let mut ours = base.to_builder();
        let root = ours
            .add_entity(content_root(&registry, "file:///app/src"), &[(link, m)])
            .unwrap();

        let mut target = base.to_builder();
        target.remove_entity(m).unwrap();
        let report = ChangeLogReplayer::new(ours.change_log()).replay(&mut target).unwrap();

        assert_eq!(report.applied, 0);
        assert_eq!(
            report.skipped,
            vec![SkippedChange {
                entity: root,
                kind: "add",
                reason: SkipReason::ParentRemoved {
                    field: "module".to_string()
                },
            }]
        );
        assert!(target.is_empty());
    }

    #[test]
    fn test_addition_under_removed_nullable_parent_is_detached() {
        let (registry, base, m) = base_with_module();
        let link = registry.connection("Facet", "module").unwrap();
        let mut ours = base.to_builder();
        let f = ours.add_entity(facet(&registry, "web"), &[(link, m)]).unwrap();

        let mut target = base.to_builder();
        target.remove_entity(m).unwrap();
        let report = ChangeLogReplayer::new(ours.change_log()).replay(&mut target).unwrap();

        let f_target = report.target_id(f);
        assert!(target.contains(f_target));
        assert_eq!(target.extract_parent(link, f_target), None);
    }

    #[test]
    fn test_duplicate_persistent_id_fails_and_leaves_target() {
        let (registry, base, _) = base_with_module();
        let mut ours = base.to_builder();
        ours.add_entity(module(&registry, "lib"), &[]).unwrap();

        let mut target = base.to_builder();
        target.add_entity(module(&registry, "lib"), &[]).unwrap();
        let before = target.change_log().len();

        let err = ChangeLogReplayer::new(ours.change_log()).replay(&mut target).unwrap_err();
        assert!(matches!(err, MergeError::Engine(Error::DuplicatePersistentId { .. })));
        assert_eq!(target.change_log().len(), before);
        assert_eq!(target.all_entities().count(), 2);
    }

    #[test]
    fn test_removal_frees_persistent_id_for_addition() {
        let (registry, base, m) = base_with_module();
        let mut ours = base.to_builder();
        ours.remove_entity(m).unwrap();
        ours.add_entity(module(&registry, "app"), &[]).unwrap();

        let mut target = base.to_builder();
        ChangeLogReplayer::new(ours.change_log()).replay(&mut target).unwrap();
        assert!(!target.contains(m));
        assert_eq!(target.entities_named("Module").unwrap().count(), 1);
    }

    // ========================================
    // Replacements
    // ========================================

    #[test]
    fn test_disjoint_field_changes_both_survive() {
        let registry = sample_registry();
        let mut builder = Builder::new(Arc::clone(&registry));
        let lib = builder
            .add_entity(library(&registry, "junit", "file:///junit.jar", "file:///libs"), &[])
            .unwrap();
        let base = builder.freeze();

        let mut ours = base.to_builder();
        ours.modify_entity(lib, |e| e.set("roots", Value::List(vec![Value::Url(url("file:///junit5.jar"))])))
            .unwrap();
        let mut target = base.to_builder();
        target
            .modify_entity(lib, |e| e.set("jar_dirs", Value::List(vec![Value::Url(url("file:///jars"))])))
            .unwrap();

        let report = ChangeLogReplayer::new(ours.change_log()).replay(&mut target).unwrap();
        assert!(report.conflicts.is_empty());
        let data = target.entity_data(lib).unwrap();
        assert_eq!(data.get("roots"), Some(&Value::List(vec![Value::Url(url("file:///junit5.jar"))])));
        assert_eq!(data.get("jar_dirs"), Some(&Value::List(vec![Value::Url(url("file:///jars"))])));
    }

    #[test]
    fn test_same_field_overlap_is_reported_and_incoming_wins() {
        let (_, base, m) = base_with_module();
        let mut ours = base.to_builder();
        ours.modify_entity(m, |e| e.set("name", Value::string("core"))).unwrap();
        let mut target = base.to_builder();
        target.modify_entity(m, |e| e.set("name", Value::string("main"))).unwrap();

        let report = ChangeLogReplayer::new(ours.change_log()).replay(&mut target).unwrap();
        assert_eq!(report.conflicts.len(), 1);
        assert_eq!(report.conflicts[0].field, "name");
        assert_eq!(report.conflicts[0].target, Value::string("main"));
        assert_eq!(target.entity_data(m).unwrap().get("name"), Some(&Value::string("core")));
    }

    #[test]
    fn test_reject_conflicts_leaves_target_untouched() {
        let (_, base, m) = base_with_module();
        let mut ours = base.to_builder();
        ours.modify_entity(m, |e| e.set("name", Value::string("core"))).unwrap();
        let mut target = base.to_builder();
        target.modify_entity(m, |e| e.set("name", Value::string("main"))).unwrap();

        let err = ChangeLogReplayer::new(ours.change_log())
            .with_policy(MergePolicy::RejectConflicts)
            .replay(&mut target)
            .unwrap_err();
        assert!(matches!(err, MergeError::Conflicts(ref c) if c.len() == 1));
        assert_eq!(target.entity_data(m).unwrap().get("name"), Some(&Value::string("main")));
    }

    #[test]
    fn test_modification_of_removed_entity_is_skipped() {
        let (_, base, m) = base_with_module();
        let mut ours = base.to_builder();
        ours.modify_entity(m, |e| e.set("name", Value::string("core"))).unwrap();
        let mut target = base.to_builder();
        target.remove_entity(m).unwrap();

        let report = ChangeLogReplayer::new(ours.change_log()).replay(&mut target).unwrap();
        assert_eq!(report.skipped[0].reason, SkipReason::EntityRemoved);
        assert!(!target.contains(m));
    }

    #[test]
    fn test_removal_wins_over_concurrent_modification() {
        let (_, base, m) = base_with_module();
        let mut ours = base.to_builder();
        ours.remove_entity(m).unwrap();
        let mut target = base.to_builder();
        target.modify_entity(m, |e| e.set("name", Value::string("main"))).unwrap();

        ChangeLogReplayer::new(ours.change_log()).replay(&mut target).unwrap();
        assert!(!target.contains(m));
    }

    #[test]
    fn test_source_change_is_replayed() {
        let (_, base, m) = base_with_module();
        let mut ours = base.to_builder();
        ours.change_entity_source(m, wsmodel_storage::testing::source("gradle"))
            .unwrap();
        let mut target = base.to_builder();
        ChangeLogReplayer::new(ours.change_log()).replay(&mut target).unwrap();
        assert_eq!(
            target.entity_data(m).unwrap().source(),
            &wsmodel_storage::testing::source("gradle")
        );
    }

    // ========================================
    // Child order
    // ========================================

    #[test]
    fn test_reorder_of_existing_children_is_replayed() {
        let registry = sample_registry();
        let link = registry.connection("RootBase", "module").unwrap();
        let mut builder = Builder::new(Arc::clone(&registry));
        let m = builder.add_entity(module(&registry, "app"), &[]).unwrap();
        let r1 = builder.add_entity(content_root(&registry, "file:///1"), &[(link, m)]).unwrap();
        let r2 = builder.add_entity(content_root(&registry, "file:///2"), &[(link, m)]).unwrap();
        let base = builder.freeze();

        let mut ours = base.to_builder();
        ours.update_children_of_parent(link, m, &[r2, r1]).unwrap();

        let mut target = base.to_builder();
        let report = ChangeLogReplayer::new(ours.change_log()).replay(&mut target).unwrap();
        assert_eq!(target.extract_children(link, m).collect::<Vec<_>>(), vec![r2, r1]);
        assert_eq!(report.applied, 1);
        assert!(target.assert_consistency().is_empty());
    }

    #[test]
    fn test_reorder_keeps_children_added_by_target() {
        let registry = sample_registry();
        let link = registry.connection("RootBase", "module").unwrap();
        let mut builder = Builder::new(Arc::clone(&registry));
        let m = builder.add_entity(module(&registry, "app"), &[]).unwrap();
        let r1 = builder.add_entity(content_root(&registry, "file:///1"), &[(link, m)]).unwrap();
        let r2 = builder.add_entity(content_root(&registry, "file:///2"), &[(link, m)]).unwrap();
        let base = builder.freeze();

        let mut ours = base.to_builder();
        ours.update_children_of_parent(link, m, &[r2, r1]).unwrap();
        let mut target = base.to_builder();
        let r3 = target.add_entity(content_root(&registry, "file:///3"), &[(link, m)]).unwrap();

        ChangeLogReplayer::new(ours.change_log()).replay(&mut target).unwrap();
        assert_eq!(target.extract_children(link, m).collect::<Vec<_>>(), vec![r2, r1, r3]);
    }

    #[test]
    fn test_foreign_registry_is_rejected() {
        let (registry, base, _) = base_with_module();
        let mut ours = base.to_builder();
        ours.add_entity(module(&registry, "lib"), &[]).unwrap();

        let other = {
            let mut builder = EntityTypeRegistry::builder();
            builder.register(wsmodel_core::EntitySchema::new(wsmodel_core::TypeName::new("Other")));
            builder.build().unwrap()
        };
        let mut target = Builder::new(other);
        let err = ChangeLogReplayer::new(ours.change_log()).replay(&mut target).unwrap_err();
        assert_eq!(err, MergeError::IncompatibleRegistry("Module".to_string()));
    }
}
