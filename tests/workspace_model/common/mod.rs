//! Shared helpers for the workspace model suites.
//!
//! Import via `mod common;` from main.rs.

#![allow(dead_code)]

use std::sync::Arc;

pub use wsmodel::{
    Builder, CacheSerializer, ConsistencyCheck, EntityId, EntityStorage, EntityTypeRegistry,
    InterningUrlManager, RegistryTypesResolver, Snapshot, Value,
};
pub use wsmodel_storage::testing::{
    child, content_root, facet, library, module, module_with_deps, parent, reversed_registry,
    sample_registry, settings, source, Operation, ReferenceModel,
};

/// Serializer resolving against `registry`, consistency pass always on
pub fn serializer(registry: Arc<EntityTypeRegistry>) -> CacheSerializer {
    let resolver = Arc::new(RegistryTypesResolver::new(Arc::clone(&registry)));
    CacheSerializer::new(registry, resolver, Arc::new(InterningUrlManager::new()))
        .with_consistency_check(ConsistencyCheck::Always)
}

/// Serialize a snapshot, asserting success
pub fn cache_bytes(serializer: &CacheSerializer, snapshot: &Snapshot) -> Vec<u8> {
    let mut out = Vec::new();
    let result = serializer.serialize_cache(&mut out, snapshot);
    assert!(result.is_success(), "serialization failed: {:?}", result);
    out
}

/// Id of the entity of `type_name` whose `name` field is `name`
pub fn find_named(storage: &dyn EntityStorage, type_name: &str, name: &str) -> Option<EntityId> {
    storage
        .entities_named(type_name)
        .ok()?
        .find(|(_, data)| data.get("name").and_then(|v| v.as_str()) == Some(name))
        .map(|(id, _)| id)
}

/// String field of an entity
pub fn field(storage: &dyn EntityStorage, id: EntityId, field: &str) -> Option<String> {
    storage
        .entity_data(id)?
        .get(field)
        .and_then(|v| v.as_str())
        .map(str::to_string)
}

/// Apply the operations the model accepts
pub fn apply(builder: &mut Builder, model: &mut ReferenceModel, ops: &[Operation]) {
    for op in ops {
        if model.apply(op) {
            if let Err(e) = op.execute(builder) {
                panic!("{:?} accepted by the model but failed: {}", op, e);
            }
        }
    }
}

/// Operations that turn the state of `current` back into `target`
pub fn inverse_operations(current: &ReferenceModel, target: &ReferenceModel) -> Vec<Operation> {
    let mut ops = Vec::new();
    for name in current.facets().keys() {
        if !target.facets().contains_key(name) {
            ops.push(Operation::RemoveFacet { name: name.clone() });
        }
    }
    for name in current.modules().difference(target.modules()) {
        ops.push(Operation::RemoveModule { name: name.clone() });
    }
    for name in target.modules().difference(current.modules()) {
        ops.push(Operation::AddModule { name: name.clone() });
    }
    for (name, owner) in target.facets() {
        match current.facets().get(name) {
            None => ops.push(Operation::AddFacet {
                name: name.clone(),
                module: owner.clone(),
            }),
            Some(now) => {
                // owners removed above leave the facet detached
                let now = now.clone().filter(|m| target.modules().contains(m));
                if now != *owner {
                    ops.push(Operation::MoveFacet {
                        name: name.clone(),
                        module: owner.clone(),
                    });
                }
            }
        }
    }
    ops
}
