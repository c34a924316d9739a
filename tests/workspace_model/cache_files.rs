//! Cache files on disk, configured through wsmodel.toml

use crate::common::*;
use std::fs;
use std::sync::Arc;
use tempfile::TempDir;
use wsmodel::{CacheConfig, CacheFile, CacheLoad, ContributorVersions};
use wsmodel_durability::CONFIG_FILE_NAME;

fn workspace(registry: &Arc<EntityTypeRegistry>) -> Snapshot {
    let mut builder = Builder::new(Arc::clone(registry));
    let app = builder.add_entity(module(registry, "app"), &[]).unwrap();
    let roots = registry.connection("ContentRoot", "module").unwrap();
    let facets = registry.connection("Facet", "module").unwrap();
    builder
        .add_entity(content_root(registry, "file:///app/src"), &[(roots, app)])
        .unwrap();
    builder.add_entity(facet(registry, "web"), &[(facets, app)]).unwrap();
    builder
        .add_entity(library(registry, "guava", "jar:///g.jar!/", "file:///libs"), &[])
        .unwrap();
    builder.freeze()
}

fn configured(dir: &TempDir, registry: Arc<EntityTypeRegistry>) -> (CacheFile, CacheSerializer) {
    let config_path = dir.path().join(CONFIG_FILE_NAME);
    CacheConfig::write_default_if_missing(&config_path).unwrap();
    let config = CacheConfig::from_file(&config_path).unwrap();
    let file = CacheFile::new(dir.path().join("caches"), &config).unwrap();
    let resolver = Arc::new(RegistryTypesResolver::new(Arc::clone(&registry)));
    let serializer =
        CacheSerializer::from_config(registry, resolver, Arc::new(InterningUrlManager::new()), &config).unwrap();
    (file, serializer)
}

#[test]
fn test_saved_workspace_loads_in_next_session() {
    let dir = TempDir::new().unwrap();
    let registry = sample_registry();
    let snapshot = workspace(&registry);

    let (file, writer) = configured(&dir, Arc::clone(&registry));
    assert!(file.save(&writer, &snapshot).is_success());
    assert!(file.exists());

    // next session registers types in another order
    let (file, reader) = configured(&dir, reversed_registry());
    let restored = match file.load(&reader) {
        CacheLoad::Loaded(builder) => builder,
        other => panic!("expected a restored cache, got {:?}", other),
    };
    assert!(restored.has_same_entities(&snapshot));
    assert!(restored.assert_consistency().is_empty());
    let guava = find_named(&restored, "Library", "guava").unwrap();
    assert_eq!(restored.jar_directories(guava).len(), 1);
}

#[test]
fn test_changed_contributor_is_a_miss_and_keeps_file() {
    let dir = TempDir::new().unwrap();
    let registry = sample_registry();
    let (file, serializer) = configured(&dir, Arc::clone(&registry));
    let writer = serializer.with_versions_contributor(|| {
        ContributorVersions::from([("facets".to_string(), "1".to_string())])
    });
    assert!(file.save(&writer, &workspace(&registry)).is_success());

    let (_, serializer) = configured(&dir, Arc::clone(&registry));
    let reader = serializer.with_versions_contributor(|| {
        ContributorVersions::from([("facets".to_string(), "2".to_string())])
    });
    assert!(matches!(file.load(&reader), CacheLoad::Miss));
    assert!(file.exists());
}

#[test]
fn test_damaged_file_is_discarded_and_deleted() {
    let dir = TempDir::new().unwrap();
    let registry = sample_registry();
    let (file, serializer) = configured(&dir, Arc::clone(&registry));
    assert!(file.save(&serializer, &workspace(&registry)).is_success());

    let mut bytes = fs::read(file.path()).unwrap();
    bytes.truncate(bytes.len() - 3);
    fs::write(file.path(), &bytes).unwrap();

    match file.load(&serializer) {
        CacheLoad::Discarded(e) => assert!(e.invalidates_cache()),
        other => panic!("expected a discarded cache, got {:?}", other),
    }
    assert!(!file.exists());
    assert!(matches!(file.load(&serializer), CacheLoad::Miss));
}

#[test]
fn test_interrupted_save_leaves_previous_cache() {
    let dir = TempDir::new().unwrap();
    let registry = sample_registry();
    let (file, serializer) = configured(&dir, Arc::clone(&registry));
    let snapshot = workspace(&registry);
    assert!(file.save(&serializer, &snapshot).is_success());

    // a crash after writing the temp file and before the rename
    fs::write(file.dir().join(".workspace-model.cache.tmp"), b"partial").unwrap();
    assert_eq!(file.cleanup_temp_files().unwrap(), 1);

    match file.load(&serializer) {
        CacheLoad::Loaded(builder) => assert!(builder.has_same_entities(&snapshot)),
        other => panic!("expected a restored cache, got {:?}", other),
    }
}
