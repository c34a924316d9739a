//! Combining builders: rebase, conflicts, concurrent removal

use crate::common::*;
use std::sync::Arc;
use wsmodel::{merge_builders, rebase, MergeError, MergePolicy, VersionedStorage};
use wsmodel_concurrency::SkipReason;

fn renamed(storage: &Snapshot, id: EntityId, name: &str) -> Builder {
    let mut builder = storage.to_builder();
    builder
        .modify_entity(id, |e| e.set("name", Value::string(name)))
        .unwrap();
    builder
}

#[test]
fn test_stale_builder_rebases_onto_published_version() {
    let registry = sample_registry();
    let storage = VersionedStorage::new(Arc::clone(&registry));
    let app = storage
        .update(|b| b.add_entity(module(&registry, "app"), &[]))
        .unwrap();
    let link = registry.connection("Facet", "module").unwrap();

    let stale = storage.current();
    let mut incoming = stale.to_builder();
    incoming.add_entity(facet(&registry, "web"), &[(link, app)]).unwrap();

    storage
        .update(|b| b.add_entity(module(&registry, "lib"), &[]))
        .unwrap();
    let published = storage.version();

    let (rebased, report) = rebase(&incoming, &storage.current(), MergePolicy::default()).unwrap();
    assert!(report.is_clean());
    assert_eq!(storage.replace(rebased.freeze()), published + 1);

    let current = storage.current();
    let web = find_named(&*current, "Facet", "web").unwrap();
    assert_eq!(current.extract_parent(link, web), Some(app));
    assert!(find_named(&*current, "Module", "lib").is_some());
    assert!(current.assert_consistency().is_empty());
    // readers holding the stale snapshot still see the old state
    assert!(find_named(&*stale, "Facet", "web").is_none());
}

#[test]
fn test_same_field_overlap_last_writer_wins() {
    let registry = sample_registry();
    let mut builder = Builder::new(Arc::clone(&registry));
    let app = builder.add_entity(module(&registry, "app"), &[]).unwrap();
    let base = builder.freeze();

    let mut target = renamed(&base, app, "main");
    let incoming = renamed(&base, app, "core");

    let report = merge_builders(&mut target, &incoming, MergePolicy::LastWriterWins).unwrap();
    assert_eq!(report.conflicts.len(), 1);
    assert_eq!(report.conflicts[0].field, "name");
    assert_eq!(report.conflicts[0].incoming, Value::string("core"));
    assert_eq!(field(&target, app, "name").as_deref(), Some("core"));
}

#[test]
fn test_rejected_overlap_leaves_target_untouched() {
    let registry = sample_registry();
    let mut builder = Builder::new(Arc::clone(&registry));
    let app = builder.add_entity(module(&registry, "app"), &[]).unwrap();
    let base = builder.freeze();

    let mut target = renamed(&base, app, "main");
    let mut incoming = renamed(&base, app, "core");
    incoming.add_entity(module(&registry, "extra"), &[]).unwrap();

    let err = merge_builders(&mut target, &incoming, MergePolicy::RejectConflicts).unwrap_err();
    match err {
        MergeError::Conflicts(conflicts) => {
            assert_eq!(conflicts.len(), 1);
            assert_eq!(conflicts[0].target, Value::string("main"));
        }
        other => panic!("expected conflicts, got {:?}", other),
    }
    assert_eq!(field(&target, app, "name").as_deref(), Some("main"));
    assert!(find_named(&target, "Module", "extra").is_none());
}

#[test]
fn test_removal_wins_over_concurrent_modification() {
    let registry = sample_registry();
    let mut builder = Builder::new(Arc::clone(&registry));
    let app = builder.add_entity(module(&registry, "app"), &[]).unwrap();
    let base = builder.freeze();

    let mut target = base.to_builder();
    target.remove_entity(app).unwrap();
    let incoming = renamed(&base, app, "main");

    let report = merge_builders(&mut target, &incoming, MergePolicy::RejectConflicts).unwrap();
    assert_eq!(report.skipped.len(), 1);
    assert_eq!(report.skipped[0].reason, SkipReason::EntityRemoved);
    assert!(!target.contains(app));
    assert!(target.entities_named("Module").unwrap().next().is_none());
}

#[test]
fn test_merge_maps_added_entities_to_target_ids() {
    let registry = sample_registry();
    let base = Builder::new(Arc::clone(&registry)).freeze();

    let mut target = base.to_builder();
    target.add_entity(module(&registry, "left"), &[]).unwrap();
    let mut incoming = base.to_builder();
    let right = incoming.add_entity(module(&registry, "right"), &[]).unwrap();

    let report = merge_builders(&mut target, &incoming, MergePolicy::default()).unwrap();
    let mapped = report.target_id(right);
    assert_eq!(field(&target, mapped, "name").as_deref(), Some("right"));
    assert_eq!(target.entities_named("Module").unwrap().count(), 2);
    assert!(target.assert_consistency().is_empty());
}
