//! Reference scenarios: one-to-one cascade, damaged cache, two-sided edit

use crate::common::*;
use std::sync::Arc;
use wsmodel::{merge_builders, CacheError, MergePolicy, VirtualFileUrlManager};

/// Parent `root` with child `x` linked one-to-one
fn parent_with_child() -> (Snapshot, EntityId, EntityId) {
    let registry = sample_registry();
    let mut builder = Builder::new(Arc::clone(&registry));
    let a = builder.add_entity(parent(&registry, "root"), &[]).unwrap();
    let link = registry.connection("Child", "parent").unwrap();
    let b = builder.add_entity(child(&registry, "x"), &[(link, a)]).unwrap();
    (builder.freeze(), a, b)
}

#[test]
fn test_removing_parent_removes_one_to_one_child() {
    let (s1, a, b) = parent_with_child();
    assert!(s1.contains(b));

    let mut builder = s1.to_builder();
    let removed = builder.remove_entity(a).unwrap();
    assert!(removed.contains(&b));
    let s2 = builder.freeze();

    assert!(!s2.contains(a));
    assert!(!s2.contains(b));
    assert_eq!(s2.entities_named("Child").unwrap().count(), 0);
    assert!(s2.assert_consistency().is_empty());
    // the older snapshot is unaffected
    assert!(s1.contains(b));
}

#[test]
fn test_corrupted_cache_is_structural_failure() {
    let (s1, _, _) = parent_with_child();
    let serializer = serializer(Arc::clone(s1.registry()));
    let mut bytes = cache_bytes(&serializer, &s1);
    let middle = bytes.len() / 2;
    bytes[middle] = bytes[middle].wrapping_add(1);

    let err = serializer.decode_cache(&bytes).unwrap_err();
    assert!(matches!(err, CacheError::ChecksumMismatch { .. }));
    assert!(err.invalidates_cache());
}

#[test]
fn test_two_builders_edit_different_fields() {
    let registry = sample_registry();
    let mut builder = Builder::new(Arc::clone(&registry));
    let guava = builder
        .add_entity(library(&registry, "guava", "jar:///g.jar!/", "file:///libs"), &[])
        .unwrap();
    let base = builder.freeze();
    let urls = InterningUrlManager::new();
    let new_root = Value::List(vec![Value::Url(urls.from_url("jar:///g2.jar!/"))]);
    let new_dirs = Value::List(vec![Value::Url(urls.from_url("file:///lib2"))]);

    let mut left = base.to_builder();
    left.modify_entity(guava, |e| e.set("roots", new_root.clone())).unwrap();
    let mut right = base.to_builder();
    right.modify_entity(guava, |e| e.set("jar_dirs", new_dirs.clone())).unwrap();

    let mut merged = base.to_builder();
    let first = merge_builders(&mut merged, &left, MergePolicy::RejectConflicts).unwrap();
    let second = merge_builders(&mut merged, &right, MergePolicy::RejectConflicts).unwrap();
    assert!(first.is_clean());
    assert!(second.is_clean());

    let data = merged.entity_data(guava).unwrap();
    assert_eq!(data.get("roots"), Some(&new_root));
    assert_eq!(data.get("jar_dirs"), Some(&new_dirs));
    assert_eq!(data.get("name"), Some(&Value::string("guava")));
    assert!(merged.assert_consistency().is_empty());
}
