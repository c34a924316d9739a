//! Replay and merge tests across threads and random operation sequences
//!
//! 1. **Replay Reproduces State** - a builder's log replayed onto its base
//!    yields the same entities as the builder itself
//! 2. **Parallel Builders** - builders filled on separate threads merge into
//!    one consistent store
//!
//! ## Running These Tests
//!
//! ```bash
//! cargo test --test replay_tests
//! ```

use proptest::prelude::*;
use std::sync::{Arc, Barrier};
use std::thread;

use wsmodel_concurrency::{merge_builders, ChangeLogReplayer, MergePolicy};
use wsmodel_storage::testing::{module, sample_registry, Operation, ReferenceModel};
use wsmodel_storage::{Builder, EntityStorage, Snapshot};

// ============================================================================
// Test Helpers
// ============================================================================

const NAMES: &[&str] = &["a", "b", "c", "d"];
const RENAMED: &[&str] = &["r0", "r1", "r2"];

fn name() -> impl Strategy<Value = String> {
    prop::sample::select(NAMES).prop_map(str::to_string)
}

fn any_module() -> impl Strategy<Value = String> {
    prop_oneof![name(), prop::sample::select(RENAMED).prop_map(str::to_string)]
}

/// Renames only target names modules are never added under. Swapping
/// persistent ids between two entities cannot be replayed entry by entry.
fn operation() -> impl Strategy<Value = Operation> {
    prop_oneof![
        name().prop_map(|name| Operation::AddModule { name }),
        (any_module(), prop::sample::select(RENAMED))
            .prop_map(|(from, to)| Operation::RenameModule { from, to: to.to_string() }),
        any_module().prop_map(|name| Operation::RemoveModule { name }),
        (name(), prop::option::of(any_module())).prop_map(|(name, module)| Operation::AddFacet { name, module }),
        (name(), prop::option::of(any_module())).prop_map(|(name, module)| Operation::MoveFacet { name, module }),
        name().prop_map(|name| Operation::RemoveFacet { name }),
    ]
}

/// Snapshot with a couple of modules and facets, plus the matching model
fn seeded_base() -> (Snapshot, ReferenceModel) {
    let registry = sample_registry();
    let mut builder = Builder::new(registry);
    let mut model = ReferenceModel::new();
    for op in [
        Operation::AddModule { name: "a".to_string() },
        Operation::AddModule { name: "b".to_string() },
        Operation::AddFacet {
            name: "a".to_string(),
            module: Some("a".to_string()),
        },
    ] {
        assert!(model.apply(&op));
        op.execute(&mut builder).unwrap();
    }
    (builder.freeze(), model)
}

// ============================================================================
// Replay Reproduces State
// ============================================================================

proptest! {
    #[test]
    fn replayed_log_matches_builder(ops in prop::collection::vec(operation(), 0..24)) {
        let (base, mut model) = seeded_base();
        let mut ours = base.to_builder();
        for op in &ops {
            if model.apply(op) {
                op.execute(&mut ours).unwrap();
            }
        }
        prop_assert!(model.compare(&ours).is_empty());

        let mut target = base.to_builder();
        let report = ChangeLogReplayer::new(ours.change_log()).replay(&mut target).unwrap();
        prop_assert!(report.conflicts.is_empty());
        prop_assert!(model.compare(&target).is_empty());
        prop_assert!(target.has_same_entities(&ours));
        prop_assert!(target.assert_consistency().is_empty());
    }

    #[test]
    fn restored_builder_replays_onto_empty_store(ops in prop::collection::vec(operation(), 0..24)) {
        let (base, mut model) = seeded_base();
        let mut ours = base.to_builder();
        for op in &ops {
            if model.apply(op) {
                op.execute(&mut ours).unwrap();
            }
        }
        let restored = Builder::restored(&ours.to_snapshot());

        let mut target = Builder::new(Arc::clone(ours.registry()));
        ChangeLogReplayer::new(restored.change_log()).replay(&mut target).unwrap();
        prop_assert!(model.compare(&target).is_empty());
        prop_assert!(target.has_same_entities(&ours));
    }
}

// ============================================================================
// Parallel Builders
// ============================================================================

#[test]
fn test_builders_filled_on_threads_merge_cleanly() {
    const THREADS: usize = 4;
    const MODULES: usize = 25;

    let (base, _) = seeded_base();
    let base = Arc::new(base);
    let barrier = Arc::new(Barrier::new(THREADS));

    let handles: Vec<_> = (0..THREADS)
        .map(|t| {
            let base = Arc::clone(&base);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                let registry = Arc::clone(base.registry());
                let mut builder = base.to_builder();
                barrier.wait();
                for i in 0..MODULES {
                    builder
                        .add_entity(module(&registry, &format!("t{}_m{}", t, i)), &[])
                        .unwrap();
                }
                builder
            })
        })
        .collect();
    let builders: Vec<Builder> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    let mut merged = base.to_builder();
    for incoming in &builders {
        let report = merge_builders(&mut merged, incoming, MergePolicy::RejectConflicts).unwrap();
        assert_eq!(report.id_mapping.len(), MODULES);
    }

    // Base holds two modules
    assert_eq!(merged.entities_named("Module").unwrap().count(), 2 + THREADS * MODULES);
    assert!(merged.assert_consistency().is_empty());
}

#[test]
fn test_readers_keep_old_snapshot_while_merging() {
    let (base, _) = seeded_base();
    let base = Arc::new(base);
    let registry = Arc::clone(base.registry());

    let reader = {
        let base = Arc::clone(&base);
        thread::spawn(move || {
            for _ in 0..100 {
                assert_eq!(base.entities_named("Module").unwrap().count(), 2);
            }
        })
    };

    let mut incoming = base.to_builder();
    incoming.add_entity(module(&registry, "z"), &[]).unwrap();
    let mut target = base.to_builder();
    merge_builders(&mut target, &incoming, MergePolicy::default()).unwrap();

    reader.join().unwrap();
    assert_eq!(target.entities_named("Module").unwrap().count(), 3);
    assert_eq!(base.entities_named("Module").unwrap().count(), 2);
}
