//! Properties over random module/facet edit sequences

use crate::common::*;
use proptest::prelude::*;
use std::sync::Arc;

const NAMES: &[&str] = &["a", "b", "c", "d"];

fn name() -> impl Strategy<Value = String> {
    prop::sample::select(NAMES).prop_map(str::to_string)
}

fn operation() -> impl Strategy<Value = Operation> {
    prop_oneof![
        name().prop_map(|name| Operation::AddModule { name }),
        (name(), name()).prop_map(|(from, to)| Operation::RenameModule { from, to }),
        name().prop_map(|name| Operation::RemoveModule { name }),
        (name(), prop::option::of(name())).prop_map(|(name, module)| Operation::AddFacet { name, module }),
        (name(), prop::option::of(name())).prop_map(|(name, module)| Operation::MoveFacet { name, module }),
        name().prop_map(|name| Operation::RemoveFacet { name }),
    ]
}

proptest! {
    #[test]
    fn builder_follows_reference_model(ops in prop::collection::vec(operation(), 0..40)) {
        let mut builder = Builder::new(sample_registry());
        let mut model = ReferenceModel::new();
        apply(&mut builder, &mut model, &ops);

        prop_assert!(model.compare(&builder).is_empty());
        prop_assert!(builder.assert_consistency().is_empty());
        let snapshot = builder.freeze();
        prop_assert!(model.compare(&snapshot).is_empty());
    }

    #[test]
    fn inverse_operations_restore_snapshot(
        seed in prop::collection::vec(operation(), 0..20),
        ops in prop::collection::vec(operation(), 1..20),
    ) {
        let registry = sample_registry();
        let mut builder = Builder::new(Arc::clone(&registry));
        let mut before = ReferenceModel::new();
        apply(&mut builder, &mut before, &seed);
        let s1 = builder.freeze();

        let mut builder = s1.to_builder();
        let mut model = before.clone();
        apply(&mut builder, &mut model, &ops);
        let s2 = builder.to_snapshot();

        let inverse = inverse_operations(&model, &before);
        for op in &inverse {
            prop_assert!(model.apply(op), "inverse step {:?} rejected", op);
            op.execute(&mut builder).unwrap();
        }
        let s3 = builder.freeze();

        prop_assert_eq!(model.modules(), before.modules());
        prop_assert_eq!(model.facets(), before.facets());
        prop_assert!(s3.has_same_entities(&s1));
        prop_assert!(s3.assert_consistency().is_empty());
        // earlier snapshots never observe later edits
        prop_assert!(before.compare(&s1).is_empty());
        prop_assert!(s2.assert_consistency().is_empty());
    }

    #[test]
    fn cache_restores_any_workspace(ops in prop::collection::vec(operation(), 0..30)) {
        let registry = sample_registry();
        let mut builder = Builder::new(Arc::clone(&registry));
        let mut model = ReferenceModel::new();
        apply(&mut builder, &mut model, &ops);
        let snapshot = builder.freeze();

        let bytes = cache_bytes(&serializer(registry), &snapshot);
        let restored = serializer(reversed_registry()).decode_cache(&bytes).unwrap().unwrap();
        prop_assert!(restored.has_same_entities(&snapshot));
        prop_assert!(model.compare(&restored).is_empty());
    }
}
