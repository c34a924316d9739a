//! Cache serialization tests over random stores and damaged streams
//!
//! 1. **Round Trip** - random stores restore observably equal, including
//!    into a registry with different type numbering
//! 2. **Diff Log** - a cache plus a change log restores the builder state
//! 3. **Damage** - no single flipped byte yields a successful restore
//! 4. **Consistency Pass** - broken graphs are rejected when the pass runs
//!
//! ## Running These Tests
//!
//! ```bash
//! cargo test --test cache_tests
//! ```

use proptest::prelude::*;
use std::io::Cursor;
use std::sync::Arc;

use wsmodel_core::{EntityId, EntityTypeRegistry, InterningUrlManager};
use wsmodel_durability::{CacheError, CacheSerializer, ConsistencyCheck, RegistryTypesResolver};
use wsmodel_storage::testing::{module, reversed_registry, sample_registry, Operation, ReferenceModel};
use wsmodel_storage::{Builder, EntityStorage, RefsTable, Snapshot};

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

fn serializer(registry: Arc<EntityTypeRegistry>) -> CacheSerializer {
    let resolver = Arc::new(RegistryTypesResolver::new(Arc::clone(&registry)));
    CacheSerializer::new(registry, resolver, Arc::new(InterningUrlManager::new()))
        .with_consistency_check(ConsistencyCheck::Always)
}

/// Apply the operations the model accepts
fn apply(builder: &mut Builder, model: &mut ReferenceModel, ops: &[Operation]) {
    for op in ops {
        if model.apply(op) {
            op.execute(builder).unwrap();
        }
    }
}

fn encode(serializer: &CacheSerializer, snapshot: &Snapshot) -> Vec<u8> {
    let mut out = Vec::new();
    assert!(serializer.serialize_cache(&mut out, snapshot).is_success());
    out
}

// ============================================================================
// Round Trip
// ============================================================================

proptest! {
    #[test]
    fn restored_cache_matches_snapshot(ops in prop::collection::vec(operation(), 0..24)) {
        let mut builder = Builder::new(sample_registry());
        let mut model = ReferenceModel::new();
        apply(&mut builder, &mut model, &ops);
        let snapshot = builder.freeze();

        let writer = serializer(Arc::clone(snapshot.registry()));
        let reader = serializer(reversed_registry());
        let restored = reader.decode_cache(&encode(&writer, &snapshot)).unwrap().unwrap();

        prop_assert!(restored.has_same_entities(&snapshot));
        prop_assert!(model.compare(&restored).is_empty());
        prop_assert!(restored.assert_consistency().is_empty());
    }

    #[test]
    fn cache_and_diff_log_restore_builder(
        seed in prop::collection::vec(operation(), 0..12),
        ops in prop::collection::vec(operation(), 0..16),
    ) {
        let registry = sample_registry();
        let mut base = Builder::new(Arc::clone(&registry));
        let mut model = ReferenceModel::new();
        apply(&mut base, &mut model, &seed);
        let base = base.freeze();

        let mut builder = base.to_builder();
        apply(&mut builder, &mut model, &ops);

        let serializer = serializer(registry);
        let store = encode(&serializer, &base);
        let mut log = Vec::new();
        prop_assert!(serializer.serialize_change_log(&mut log, &builder).is_success());

        let restored = serializer
            .deserialize_cache_and_diff_log(&mut Cursor::new(store), &mut Cursor::new(log))
            .unwrap()
            .unwrap();
        prop_assert!(restored.has_same_entities(&builder));
        prop_assert!(model.compare(&restored).is_empty());
    }
}

// ============================================================================
// Damage
// ============================================================================

#[test]
fn test_no_flipped_byte_restores() {
    let registry = sample_registry();
    let mut builder = Builder::new(Arc::clone(&registry));
    let mut model = ReferenceModel::new();
    apply(
        &mut builder,
        &mut model,
        &[
            Operation::AddModule { name: "a".to_string() },
            Operation::AddFacet {
                name: "f".to_string(),
                module: Some("a".to_string()),
            },
        ],
    );
    let serializer = serializer(registry);
    let bytes = encode(&serializer, &builder.freeze());

    for position in 0..bytes.len() {
        let mut damaged = bytes.clone();
        damaged[position] ^= 0x10;
        let result = serializer.decode_cache(&damaged);
        assert!(
            !matches!(result, Ok(Some(_))),
            "flipping byte {} of {} still restored",
            position,
            bytes.len()
        );
    }
}

#[test]
fn test_empty_stream_is_truncated() {
    let serializer = serializer(sample_registry());
    let err = serializer.deserialize_cache(&mut Cursor::new(Vec::new())).unwrap_err();
    assert!(matches!(err, CacheError::Truncated(_)));
}

// ============================================================================
// Consistency Pass
// ============================================================================

/// Snapshot whose reference index points at an entity that does not exist
fn dangling_snapshot() -> Snapshot {
    let registry = sample_registry();
    let mut builder = Builder::new(Arc::clone(&registry));
    let app = builder.add_entity(module(&registry, "app"), &[]).unwrap();
    let snapshot = builder.freeze();

    let facets = registry.connection("Facet", "module").unwrap();
    let mut refs = RefsTable::new();
    refs.set_children(facets, app, &[EntityId::new(facets.child, 7)]);
    Snapshot::from_parts(
        Arc::clone(&registry),
        snapshot.families().to_vec(),
        refs,
        snapshot.indexes().clone(),
    )
    .unwrap()
}

#[test]
fn test_broken_graph_is_rejected_when_check_is_forced() {
    let snapshot = dangling_snapshot();
    let serializer = serializer(Arc::clone(snapshot.registry()));
    let err = serializer.decode_cache(&encode(&serializer, &snapshot)).unwrap_err();
    assert!(matches!(err, CacheError::Corrupted(_)));
}

#[test]
fn test_trace_check_follows_log_level() {
    let snapshot = dangling_snapshot();
    let serializer = serializer(Arc::clone(snapshot.registry())).with_consistency_check(ConsistencyCheck::Trace);
    let bytes = encode(&serializer, &snapshot);

    assert!(serializer.decode_cache(&bytes).unwrap().is_some());

    let subscriber = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::TRACE)
        .with_test_writer()
        .finish();
    tracing::subscriber::with_default(subscriber, || {
        let err = serializer.decode_cache(&bytes).unwrap_err();
        assert!(matches!(err, CacheError::Corrupted(_)));
    });
}

#[test]
fn test_check_can_be_disabled() {
    let snapshot = dangling_snapshot();
    let serializer = serializer(Arc::clone(snapshot.registry())).with_consistency_check(ConsistencyCheck::Off);
    assert!(serializer.decode_cache(&encode(&serializer, &snapshot)).unwrap().is_some());
}
