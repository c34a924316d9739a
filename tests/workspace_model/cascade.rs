//! Removal cascades and detaching of nullable children

use crate::common::*;
use std::sync::Arc;

#[test]
fn test_module_removal_cascades_content_roots() {
    let registry = sample_registry();
    let mut builder = Builder::new(Arc::clone(&registry));
    let app = builder.add_entity(module(&registry, "app"), &[]).unwrap();
    let roots = registry.connection("ContentRoot", "module").unwrap();
    let r1 = builder.add_entity(content_root(&registry, "file:///app/a"), &[(roots, app)]).unwrap();
    let r2 = builder.add_entity(content_root(&registry, "file:///app/b"), &[(roots, app)]).unwrap();
    let base = builder.freeze();

    let mut builder = base.to_builder();
    builder.remove_entity(app).unwrap();
    let after = builder.freeze();

    assert!(!after.contains(r1));
    assert!(!after.contains(r2));
    assert!(after.entities_by_url(&wsmodel_storage::testing::url("file:///app/a")).is_empty());
    assert!(after.assert_consistency().is_empty());
    assert_eq!(base.entities_named("ContentRoot").unwrap().count(), 2);
}

#[test]
fn test_module_removal_detaches_nullable_children() {
    let registry = sample_registry();
    let mut builder = Builder::new(Arc::clone(&registry));
    let app = builder.add_entity(module(&registry, "app"), &[]).unwrap();
    let facets = registry.connection("Facet", "module").unwrap();
    let settings_link = registry.connection("ModuleSettings", "module").unwrap();
    let web = builder.add_entity(facet(&registry, "web"), &[(facets, app)]).unwrap();
    let out = builder
        .add_entity(settings(&registry, Some("file:///out")), &[(settings_link, app)])
        .unwrap();

    builder.remove_entity(app).unwrap();
    let after = builder.freeze();

    assert!(after.contains(web));
    assert!(after.contains(out));
    assert_eq!(after.extract_parent(facets, web), None);
    assert_eq!(after.extract_parent(settings_link, out), None);
    assert!(after.assert_consistency().is_empty());
}

#[test]
fn test_replacing_one_to_one_child_removes_previous() {
    let registry = sample_registry();
    let mut builder = Builder::new(Arc::clone(&registry));
    let root = builder.add_entity(parent(&registry, "root"), &[]).unwrap();
    let link = registry.connection("Child", "parent").unwrap();
    let first = builder.add_entity(child(&registry, "first"), &[(link, root)]).unwrap();
    let second = builder.add_entity(child(&registry, "second"), &[]).ok();

    // a child without its mandatory parent is rejected
    assert!(second.is_none());

    let second = builder.add_entity(child(&registry, "second"), &[(link, root)]).unwrap();
    assert!(!builder.contains(first));
    assert_eq!(builder.extract_children(link, root).collect::<Vec<_>>(), vec![second]);
    assert!(builder.assert_consistency().is_empty());
}
