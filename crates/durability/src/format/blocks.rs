//! Snapshot blocks
//!
//! A snapshot is written as eight self-contained blocks, always in the same
//! order. Each block is framed as `tag(1) + len(4) + payload`, and the
//! reader checks both the tag sequence and that every payload is consumed
//! exactly.
//!
//! Entries inside a block are sorted by key so the same snapshot always
//! produces the same bytes.

use crate::error::{CacheError, Result};
use crate::format::codec::{EntityDecoder, EntityEncoder};
use crate::format::primitives::{write_bytes, write_u8, ByteReader};
use std::collections::{BTreeMap, BTreeSet};
use wsmodel_core::{EntityId, EntityTypeRegistry, VirtualFileUrl};
use wsmodel_storage::{
    EntitySlot, EntitySourceIndex, EntityStorage, ImmutableEntityFamily, PersistentIdIndex, RefsTable,
    Snapshot, SoftLinkIndex, StorageIndexes, VirtualFileIndex,
};

/// Block tags
pub mod block_tags {
    /// Entity families
    pub const FAMILIES: u8 = 1;
    /// Reference index
    pub const REFERENCES: u8 = 2;
    /// Soft-link index
    pub const SOFT_LINKS: u8 = 3;
    /// Url index, entity to urls
    pub const VFU_FORWARD: u8 = 4;
    /// Url index, url to entities
    pub const VFU_BACKWARD: u8 = 5;
    /// Jar directories
    pub const JAR_DIRS: u8 = 6;
    /// Entity source index
    pub const ENTITY_SOURCES: u8 = 7;
    /// Persistent id index
    pub const PERSISTENT_IDS: u8 = 8;
    /// Change log (change log streams only)
    pub const CHANGE_LOG: u8 = 9;
}

/// Order of blocks in a snapshot stream
pub const SNAPSHOT_BLOCKS: [u8; 8] = [
    block_tags::FAMILIES,
    block_tags::REFERENCES,
    block_tags::SOFT_LINKS,
    block_tags::VFU_FORWARD,
    block_tags::VFU_BACKWARD,
    block_tags::JAR_DIRS,
    block_tags::ENTITY_SOURCES,
    block_tags::PERSISTENT_IDS,
];

/// Human-readable block name
pub fn block_name(tag: u8) -> &'static str {
    match tag {
        block_tags::FAMILIES => "families",
        block_tags::REFERENCES => "references",
        block_tags::SOFT_LINKS => "soft links",
        block_tags::VFU_FORWARD => "url forward index",
        block_tags::VFU_BACKWARD => "url backward index",
        block_tags::JAR_DIRS => "jar directories",
        block_tags::ENTITY_SOURCES => "entity sources",
        block_tags::PERSISTENT_IDS => "persistent ids",
        block_tags::CHANGE_LOG => "change log",
        _ => "unknown",
    }
}

/// Append a framed block
pub(crate) fn write_block(out: &mut Vec<u8>, tag: u8, payload: &[u8]) -> Result<()> {
    write_u8(out, tag)?;
    write_bytes(out, payload)
}

/// Read the next block, which must carry `expected`
pub(crate) fn read_block<'a>(reader: &mut ByteReader<'a>, expected: u8) -> Result<&'a [u8]> {
    let tag = reader.read_u8("block tag")?;
    if tag != expected {
        return Err(CacheError::Corrupted(format!(
            "expected {} block, found tag {}",
            block_name(expected),
            tag
        )));
    }
    reader.read_bytes(block_name(expected))
}

// ============================================================================
// Encoding
// ============================================================================

/// Encode one snapshot block
pub(crate) fn encode_block(tag: u8, snapshot: &Snapshot, enc: &mut EntityEncoder<'_, '_>) -> Result<()> {
    match tag {
        block_tags::FAMILIES => encode_families(snapshot, enc),
        block_tags::REFERENCES => encode_refs(snapshot.refs(), enc),
        block_tags::SOFT_LINKS => {
            let mut entries: Vec<_> = snapshot.indexes().soft_links().iter().collect();
            entries.sort_by_key(|(id, _)| *id);
            enc.len(entries.len())?;
            for (id, links) in entries {
                enc.entity_id(id)?;
                enc.len(links.len())?;
                links.iter().try_for_each(|pid| enc.persistent_id(pid))?;
            }
            Ok(())
        }
        block_tags::VFU_FORWARD => {
            let mut entries: Vec<_> = snapshot.indexes().urls().iter_forward().collect();
            entries.sort_by_key(|(id, _)| *id);
            enc.len(entries.len())?;
            for (id, fields) in entries {
                enc.entity_id(id)?;
                enc.len(fields.len())?;
                for (field, urls) in fields {
                    enc.str(field)?;
                    enc.urls(urls)?;
                }
            }
            Ok(())
        }
        block_tags::VFU_BACKWARD => {
            let mut entries: Vec<_> = snapshot.indexes().urls().iter_backward().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            enc.len(entries.len())?;
            for (url, owners) in entries {
                enc.url(url)?;
                enc.len(owners.len())?;
                for (id, field) in owners {
                    enc.entity_id(*id)?;
                    enc.str(field)?;
                }
            }
            Ok(())
        }
        block_tags::JAR_DIRS => {
            let mut entries: Vec<_> = snapshot.indexes().urls().iter_jar_dirs().collect();
            entries.sort_by_key(|(id, _)| *id);
            enc.len(entries.len())?;
            for (id, dirs) in entries {
                enc.entity_id(id)?;
                enc.urls(dirs)?;
            }
            Ok(())
        }
        block_tags::ENTITY_SOURCES => {
            let mut entries: Vec<_> = snapshot.indexes().sources().iter().collect();
            entries.sort_by_key(|(id, _)| *id);
            enc.len(entries.len())?;
            for (id, source) in entries {
                enc.entity_id(id)?;
                enc.source(source)?;
            }
            Ok(())
        }
        block_tags::PERSISTENT_IDS => {
            let mut entries: Vec<_> = snapshot.indexes().persistent_ids().iter().collect();
            entries.sort_by_key(|(id, _)| *id);
            enc.len(entries.len())?;
            for (id, pid) in entries {
                enc.entity_id(id)?;
                enc.persistent_id(pid)?;
            }
            Ok(())
        }
        other => Err(CacheError::Corrupted(format!("no snapshot block with tag {}", other))),
    }
}

/// Families holding at least one slot, tombstones included so slot
/// numbers survive the round trip
fn encode_families(snapshot: &Snapshot, enc: &mut EntityEncoder<'_, '_>) -> Result<()> {
    let families: Vec<&ImmutableEntityFamily> = snapshot
        .families()
        .iter()
        .filter(|f| !f.slots().is_empty())
        .collect();
    enc.len(families.len())?;
    for family in families {
        enc.entity_type(family.type_id())?;
        enc.len(family.slots().len())?;
        for slot in family.slots() {
            match slot {
                Some(data) => {
                    enc.bool(true)?;
                    enc.entity_data(data)?;
                }
                None => enc.bool(false)?,
            }
        }
    }
    Ok(())
}

fn encode_refs(refs: &RefsTable, enc: &mut EntityEncoder<'_, '_>) -> Result<()> {
    let mut connections: Vec<_> = refs.connections().collect();
    connections.sort();
    enc.len(connections.len())?;
    for connection in connections {
        enc.connection(connection)?;
        let mut parents: Vec<(EntityId, &[EntityId])> = refs
            .table(connection)
            .map(|t| t.iter_children().filter(|(_, c)| !c.is_empty()).collect())
            .unwrap_or_default();
        parents.sort_by_key(|(parent, _)| *parent);
        enc.len(parents.len())?;
        for (parent, children) in parents {
            enc.entity_id(parent)?;
            enc.len(children.len())?;
            children.iter().try_for_each(|child| enc.entity_id(*child))?;
        }
    }
    Ok(())
}

// ============================================================================
// Decoding
// ============================================================================

/// Parts of a snapshot decoded from its blocks
#[derive(Default)]
pub(crate) struct SnapshotParts {
    families: Vec<ImmutableEntityFamily>,
    refs: RefsTable,
    sources: EntitySourceIndex,
    soft_links: SoftLinkIndex,
    urls: VirtualFileIndex,
    persistent_ids: PersistentIdIndex,
}

impl SnapshotParts {
    /// Decode one block into the parts
    pub(crate) fn decode_block(&mut self, tag: u8, dec: &mut EntityDecoder<'_>) -> Result<()> {
        match tag {
            block_tags::FAMILIES => self.families = decode_families(dec)?,
            block_tags::REFERENCES => {
                for _ in 0..dec.count("references")? {
                    let connection = dec.connection()?;
                    for _ in 0..dec.count("reference parents")? {
                        let parent = dec.entity_id()?;
                        let count = dec.count("reference children")?;
                        let children = (0..count)
                            .map(|_| dec.entity_id())
                            .collect::<Result<Vec<_>>>()?;
                        self.refs.set_children(connection, parent, &children);
                    }
                }
            }
            block_tags::SOFT_LINKS => {
                for _ in 0..dec.count("soft links")? {
                    let id = dec.entity_id()?;
                    let count = dec.count("soft link set")?;
                    let links = (0..count)
                        .map(|_| dec.persistent_id())
                        .collect::<Result<BTreeSet<_>>>()?;
                    self.soft_links.index(id, links);
                }
            }
            block_tags::VFU_FORWARD => {
                for _ in 0..dec.count("url forward index")? {
                    let id = dec.entity_id()?;
                    let mut fields = BTreeMap::new();
                    for _ in 0..dec.count("url fields")? {
                        let field = dec.str("url field")?;
                        fields.insert(field, dec.urls()?);
                    }
                    self.urls.restore_forward(id, fields);
                }
            }
            block_tags::VFU_BACKWARD => {
                for _ in 0..dec.count("url backward index")? {
                    let url: VirtualFileUrl = dec.url()?;
                    let mut owners = BTreeSet::new();
                    for _ in 0..dec.count("url owners")? {
                        let id = dec.entity_id()?;
                        owners.insert((id, dec.str("url owner field")?));
                    }
                    self.urls.restore_backward(url, owners);
                }
            }
            block_tags::JAR_DIRS => {
                for _ in 0..dec.count("jar directories")? {
                    let id = dec.entity_id()?;
                    let dirs = dec.urls()?;
                    self.urls.index_jar_dirs(id, dirs);
                }
            }
            block_tags::ENTITY_SOURCES => {
                for _ in 0..dec.count("entity sources")? {
                    let id = dec.entity_id()?;
                    let source = dec.source()?;
                    self.sources.insert(id, source);
                }
            }
            block_tags::PERSISTENT_IDS => {
                for _ in 0..dec.count("persistent ids")? {
                    let id = dec.entity_id()?;
                    let pid = dec.persistent_id()?;
                    self.persistent_ids.index(id, pid);
                }
            }
            other => {
                return Err(CacheError::Corrupted(format!("no snapshot block with tag {}", other)));
            }
        }
        Ok(())
    }

    /// Assemble the snapshot
    pub(crate) fn into_snapshot(self, registry: std::sync::Arc<EntityTypeRegistry>) -> Result<Snapshot> {
        let SnapshotParts {
            families,
            refs,
            sources,
            soft_links,
            urls,
            persistent_ids,
        } = self;
        let indexes = StorageIndexes::from_parts(sources, soft_links, urls, persistent_ids);
        Ok(Snapshot::from_parts(registry, families, refs, indexes)?)
    }
}

/// One family per registered type, empty where the cache had none
fn decode_families(dec: &mut EntityDecoder<'_>) -> Result<Vec<ImmutableEntityFamily>> {
    let registry = dec.registry();
    let mut slots: Vec<Option<Vec<EntitySlot>>> = vec![None; registry.len()];
    for _ in 0..dec.count("families")? {
        let type_id = dec.entity_type()?;
        if slots[type_id.index()].is_some() {
            return Err(CacheError::Corrupted(format!("family {} written twice", type_id)));
        }
        let count = dec.count("family slots")?;
        let mut family = Vec::with_capacity(count);
        for _ in 0..count {
            if dec.bool("family slot")? {
                family.push(Some(dec.entity_data(type_id)?));
            } else {
                family.push(None);
            }
        }
        if registry.schema(type_id)?.is_abstract() && family.iter().any(Option::is_some) {
            return Err(CacheError::Corrupted(format!(
                "abstract type {} has entities",
                type_id
            )));
        }
        slots[type_id.index()] = Some(family);
    }
    Ok(registry
        .schemas()
        .iter()
        .zip(slots)
        .map(|(schema, family)| {
            ImmutableEntityFamily::from_slots(schema.type_id(), family.unwrap_or_default())
        })
        .collect())
}
