//! Persistent id uniqueness and soft links

use crate::common::*;
use proptest::prelude::*;
use std::sync::Arc;
use wsmodel::Error;
use wsmodel_storage::testing::module_id;

#[test]
fn test_duplicate_module_name_is_rejected() {
    let registry = sample_registry();
    let mut builder = Builder::new(Arc::clone(&registry));
    let app = builder.add_entity(module(&registry, "app"), &[]).unwrap();

    let err = builder.add_entity(module(&registry, "app"), &[]).unwrap_err();
    assert!(matches!(err, Error::DuplicatePersistentId { existing, .. } if existing == app));
    assert_eq!(builder.entities_named("Module").unwrap().count(), 1);
}

#[test]
fn test_freed_persistent_id_can_be_reused() {
    let registry = sample_registry();
    let mut builder = Builder::new(Arc::clone(&registry));
    let first = builder.add_entity(module(&registry, "app"), &[]).unwrap();
    builder.remove_entity(first).unwrap();

    let second = builder.add_entity(module(&registry, "app"), &[]).unwrap();
    assert_ne!(first, second);
    assert_eq!(builder.resolve(&module_id("app")), Some(second));
}

#[test]
fn test_soft_links_survive_target_removal() {
    let registry = sample_registry();
    let module_type = registry.type_id("Module").unwrap();
    let mut builder = Builder::new(Arc::clone(&registry));
    let core = builder.add_entity(module(&registry, "core"), &[]).unwrap();
    let app = builder
        .add_entity(module_with_deps(&registry, "app", &["core"]), &[])
        .unwrap();
    let web = builder
        .add_entity(module_with_deps(&registry, "web", &["core", "app"]), &[])
        .unwrap();

    let mut referrers = builder.referrers(&module_id("core"), module_type);
    referrers.sort();
    assert_eq!(referrers, vec![app, web]);

    // links are by value: removing the target keeps the referrers
    builder.remove_entity(core).unwrap();
    assert_eq!(builder.resolve(&module_id("core")), None);
    assert_eq!(builder.referrers(&module_id("core"), module_type).len(), 2);

    // and a new owner of the id is picked up
    let reborn = builder.add_entity(module(&registry, "core"), &[]).unwrap();
    assert_eq!(builder.resolve(&module_id("core")), Some(reborn));
    assert!(builder.assert_consistency().is_empty());
}

#[test]
fn test_soft_links_restored_from_cache() {
    let registry = sample_registry();
    let module_type = registry.type_id("Module").unwrap();
    let mut builder = Builder::new(Arc::clone(&registry));
    builder.add_entity(module(&registry, "core"), &[]).unwrap();
    builder
        .add_entity(module_with_deps(&registry, "app", &["core"]), &[])
        .unwrap();
    let snapshot = builder.freeze();

    let writer = serializer(Arc::clone(&registry));
    let reader = serializer(reversed_registry());
    let restored = reader
        .decode_cache(&cache_bytes(&writer, &snapshot))
        .unwrap()
        .unwrap();

    let app = find_named(&restored, "Module", "app").unwrap();
    let core = find_named(&restored, "Module", "core").unwrap();
    let restored_module = restored.registry().type_id("Module").unwrap();
    assert_ne!(restored_module, module_type);
    assert_eq!(restored.referrers(&module_id("core"), restored_module), vec![app]);
    assert_eq!(restored.resolve(&module_id("core")), Some(core));
}

const NAMES: &[&str] = &["a", "b", "c"];

fn name() -> impl Strategy<Value = String> {
    prop::sample::select(NAMES).prop_map(str::to_string)
}

fn module_operation() -> impl Strategy<Value = Operation> {
    prop_oneof![
        name().prop_map(|name| Operation::AddModule { name }),
        (name(), name()).prop_map(|(from, to)| Operation::RenameModule { from, to }),
        name().prop_map(|name| Operation::RemoveModule { name }),
    ]
}

proptest! {
    #[test]
    fn every_module_owns_its_persistent_id(ops in prop::collection::vec(module_operation(), 0..30)) {
        let registry = sample_registry();
        let mut builder = Builder::new(Arc::clone(&registry));
        let mut model = ReferenceModel::new();
        apply(&mut builder, &mut model, &ops);

        let modules: Vec<_> = builder.entities_named("Module").unwrap().map(|(id, _)| id).collect();
        prop_assert_eq!(modules.len(), model.modules().len());
        for name in model.modules() {
            let owner = builder.resolve(&module_id(name));
            prop_assert_eq!(owner, find_named(&builder, "Module", name));
        }
        for name in NAMES {
            if !model.modules().contains(*name) {
                prop_assert_eq!(builder.resolve(&module_id(name)), None);
            }
        }
    }
}
