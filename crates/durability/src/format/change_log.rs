//! Change log block
//!
//! # Binary Format
//!
//! ```text
//! entry_count(4) + [entity_id + kind(1) + payload]...
//! order_count(4) + [connection + parent_id + child_count(4) + [entity_id]...]...
//!
//! kind 0 (add):                     data + parent_count(4) + [connection + entity_id]...
//! kind 1 (remove):                  old data
//! kind 2 (replace):                 replacement
//! kind 3 (change source):           old data + new data
//! kind 4 (replace + change source): replacement
//!
//! replacement: old data + new data + parent_count(4) + [connection + present(1) + [entity_id]]...
//! ```
//!
//! Changed field positions are not stored; they are recomputed from the old
//! and new data when the log is rebuilt.

use crate::error::{CacheError, Result};
use crate::format::codec::{EntityDecoder, EntityEncoder};
use std::collections::BTreeMap;
use wsmodel_core::{ConnectionId, EntityId};
use wsmodel_storage::{ChangeEntry, ChangeLog, Replacement};

mod kind {
    pub(super) const ADD: u8 = 0;
    pub(super) const REMOVE: u8 = 1;
    pub(super) const REPLACE: u8 = 2;
    pub(super) const CHANGE_SOURCE: u8 = 3;
    pub(super) const REPLACE_AND_CHANGE_SOURCE: u8 = 4;
}

pub(crate) fn encode_change_log(log: &ChangeLog, enc: &mut EntityEncoder<'_, '_>) -> Result<()> {
    enc.len(log.len())?;
    for (id, entry) in log.iter() {
        enc.entity_id(id)?;
        match entry {
            ChangeEntry::AddEntity { data, parents } => {
                enc.u8(kind::ADD)?;
                enc.entity_data(data)?;
                enc.len(parents.len())?;
                for (connection, parent) in parents {
                    enc.connection(*connection)?;
                    enc.entity_id(*parent)?;
                }
            }
            ChangeEntry::RemoveEntity { old } => {
                enc.u8(kind::REMOVE)?;
                enc.entity_data(old)?;
            }
            ChangeEntry::ReplaceEntity(replacement) => {
                enc.u8(kind::REPLACE)?;
                encode_replacement(replacement, enc)?;
            }
            ChangeEntry::ChangeEntitySource { old, new } => {
                enc.u8(kind::CHANGE_SOURCE)?;
                enc.entity_data(old)?;
                enc.entity_data(new)?;
            }
            ChangeEntry::ReplaceAndChangeSource(replacement) => {
                enc.u8(kind::REPLACE_AND_CHANGE_SOURCE)?;
                encode_replacement(replacement, enc)?;
            }
        }
    }
    let orders: Vec<_> = log.children_orders().collect();
    enc.len(orders.len())?;
    for (connection, parent, children) in orders {
        enc.connection(connection)?;
        enc.entity_id(parent)?;
        enc.len(children.len())?;
        for &child in children {
            enc.entity_id(child)?;
        }
    }
    Ok(())
}

fn encode_replacement(replacement: &Replacement, enc: &mut EntityEncoder<'_, '_>) -> Result<()> {
    enc.entity_data(&replacement.old)?;
    enc.entity_data(&replacement.new)?;
    enc.len(replacement.parents.len())?;
    for (connection, parent) in &replacement.parents {
        enc.connection(*connection)?;
        enc.bool(parent.is_some())?;
        if let Some(parent) = parent {
            enc.entity_id(*parent)?;
        }
    }
    Ok(())
}

pub(crate) fn decode_change_log(dec: &mut EntityDecoder<'_>) -> Result<ChangeLog> {
    let count = dec.count("change log")?;
    let mut entries = Vec::with_capacity(count);
    for _ in 0..count {
        let id = dec.entity_id()?;
        let entry = match dec.u8("change kind")? {
            kind::ADD => {
                let data = dec.entity_data(id.type_id)?;
                let mut parents = BTreeMap::new();
                for _ in 0..dec.count("added parents")? {
                    let connection = dec.connection()?;
                    parents.insert(connection, dec.entity_id()?);
                }
                ChangeEntry::AddEntity { data, parents }
            }
            kind::REMOVE => ChangeEntry::RemoveEntity {
                old: dec.entity_data(id.type_id)?,
            },
            kind::REPLACE => ChangeEntry::ReplaceEntity(decode_replacement(id, dec)?),
            kind::CHANGE_SOURCE => {
                let old = dec.entity_data(id.type_id)?;
                let new = dec.entity_data(id.type_id)?;
                ChangeEntry::ChangeEntitySource { old, new }
            }
            kind::REPLACE_AND_CHANGE_SOURCE => {
                ChangeEntry::ReplaceAndChangeSource(decode_replacement(id, dec)?)
            }
            other => {
                return Err(CacheError::Corrupted(format!("invalid change kind {}", other)));
            }
        };
        entries.push((id, entry));
    }
    let mut log = ChangeLog::from_entries(entries);
    for _ in 0..dec.count("child orders")? {
        let connection = dec.connection()?;
        let parent = dec.entity_id()?;
        let children = (0..dec.count("ordered children")?)
            .map(|_| dec.entity_id())
            .collect::<Result<Vec<_>>>()?;
        log.record_children_order(connection, parent, children);
    }
    Ok(log)
}

fn decode_replacement(id: EntityId, dec: &mut EntityDecoder<'_>) -> Result<Replacement> {
    let old = dec.entity_data(id.type_id)?;
    let new = dec.entity_data(id.type_id)?;
    let mut parents: BTreeMap<ConnectionId, Option<EntityId>> = BTreeMap::new();
    for _ in 0..dec.count("replaced parents")? {
        let connection = dec.connection()?;
        let parent = if dec.bool("replaced parent")? {
            Some(dec.entity_id()?)
        } else {
            None
        };
        parents.insert(connection, parent);
    }
    let changed_fields = old.changed_fields(&new).into_iter().collect();
    Ok(Replacement {
        old,
        new,
        changed_fields,
        parents,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::primitives::ByteReader;
    use crate::format::type_table::{ResolvedTypes, TypeTableWriter};
    use crate::resolver::RegistryTypesResolver;
    use std::sync::Arc;
    use wsmodel_core::{EntityTypeRegistry, InterningUrlManager};
    use wsmodel_storage::testing::{facet, module, reversed_registry, sample_registry, source};
    use wsmodel_storage::{Builder, EntityStorage};

    fn log_through(log: &ChangeLog, writer: &Arc<EntityTypeRegistry>, reader: &Arc<EntityTypeRegistry>) -> ChangeLog {
        let resolver = RegistryTypesResolver::new(Arc::clone(writer));
        let mut table = TypeTableWriter::new(writer, &resolver);
        let mut enc = EntityEncoder::new(&mut table, writer);
        encode_change_log(log, &mut enc).unwrap();
        let body = enc.finish();
        let mut header = Vec::new();
        table.write_to(&mut header).unwrap();

        let reader_resolver = RegistryTypesResolver::new(Arc::clone(reader));
        let types = ResolvedTypes::read(&mut ByteReader::new(&header), reader, &reader_resolver).unwrap();
        let urls = InterningUrlManager::new();
        let mut dec = EntityDecoder::new(&body, &types, reader, &urls);
        let decoded = decode_change_log(&mut dec).unwrap();
        dec.finish("change log").unwrap();
        decoded
    }

    /// Base with two modules and a facet, then one change of every kind
    fn changed_builder() -> Builder {
        let registry = sample_registry();
        let mut base = Builder::new(Arc::clone(&registry));
        let app = base.add_entity(module(&registry, "app"), &[]).unwrap();
        base.add_entity(module(&registry, "lib"), &[]).unwrap();
        let facets = registry.connection("Facet", "module").unwrap();
        base.add_entity(facet(&registry, "web"), &[(facets, app)]).unwrap();
        let snapshot = base.freeze();

        let mut builder = snapshot.to_builder();
        let find = |b: &Builder, ty: &str, name: &str| {
            b.entities_named(ty)
                .unwrap()
                .find(|(_, d)| d.get("name").and_then(|v| v.as_str()) == Some(name))
                .map(|(id, _)| id)
                .unwrap()
        };
        let lib = find(&builder, "Module", "lib");
        let web = find(&builder, "Facet", "web");
        builder.add_entity(facet(&registry, "spring"), &[(facets, lib)]).unwrap();
        builder
            .modify_entity(web, |e| e.set("name", wsmodel_core::Value::string("web2")))
            .unwrap();
        builder.change_entity_source(lib, source("other")).unwrap();
        builder.remove_entity(app).unwrap();
        builder
    }

    #[test]
    fn test_change_log_reads_back() {
        let builder = changed_builder();
        let registry = Arc::clone(builder.registry());
        let decoded = log_through(builder.change_log(), &registry, &registry);
        assert_eq!(decoded.len(), builder.change_log().len());
        assert!(decoded.iter().eq(builder.change_log().iter()));
    }

    #[test]
    fn test_change_log_remaps_to_other_registry() {
        let builder = changed_builder();
        let other = reversed_registry();
        let decoded = log_through(builder.change_log(), builder.registry(), &other);
        assert_eq!(decoded.len(), builder.change_log().len());
        let kinds: Vec<_> = decoded.iter().map(|(_, e)| e.kind()).collect();
        let expected: Vec<_> = builder.change_log().iter().map(|(_, e)| e.kind()).collect();
        assert_eq!(kinds, expected);
        for ((id, _), (original, _)) in decoded.iter().zip(builder.change_log().iter()) {
            let name = builder.registry().schema(original.type_id).unwrap().name().fqn.clone();
            assert_eq!(id.type_id, other.type_id(&name).unwrap());
            assert_eq!(id.slot, original.slot);
        }
    }

    #[test]
    fn test_child_order_reads_back_in_other_registry() {
        let registry = sample_registry();
        let facets = registry.connection("Facet", "module").unwrap();
        let mut base = Builder::new(Arc::clone(&registry));
        let app = base.add_entity(module(&registry, "app"), &[]).unwrap();
        let web = base.add_entity(facet(&registry, "web"), &[(facets, app)]).unwrap();
        let spring = base.add_entity(facet(&registry, "spring"), &[(facets, app)]).unwrap();
        let mut builder = base.freeze().to_builder();
        builder.update_children_of_parent(facets, app, &[spring, web]).unwrap();

        let other = reversed_registry();
        let decoded = log_through(builder.change_log(), &registry, &other);
        assert_eq!(decoded.len(), 0);
        assert!(!decoded.is_empty());
        let orders: Vec<_> = decoded.children_orders().collect();
        assert_eq!(orders.len(), 1);
        let (connection, parent, children) = orders[0];
        assert_eq!(connection, other.connection("Facet", "module").unwrap());
        assert_eq!(parent.type_id, other.type_id("Module").unwrap());
        assert_eq!(parent.slot, app.slot);
        let slots: Vec<u32> = children.iter().map(|c| c.slot).collect();
        assert_eq!(slots, vec![spring.slot, web.slot]);
    }

    #[test]
    fn test_invalid_change_kind_is_corruption() {
        let registry = sample_registry();
        let resolver = RegistryTypesResolver::new(Arc::clone(&registry));
        let mut table = TypeTableWriter::new(&registry, &resolver);
        let mut enc = EntityEncoder::new(&mut table, &registry);
        enc.len(1).unwrap();
        enc.entity_id(EntityId::new(registry.type_id("Module").unwrap(), 0)).unwrap();
        enc.u8(42).unwrap();
        let body = enc.finish();
        let mut header = Vec::new();
        table.write_to(&mut header).unwrap();

        let types = ResolvedTypes::read(&mut ByteReader::new(&header), &registry, &resolver).unwrap();
        let urls = InterningUrlManager::new();
        let mut dec = EntityDecoder::new(&body, &types, &registry, &urls);
        assert!(matches!(decode_change_log(&mut dec), Err(CacheError::Corrupted(_))));
    }
}
