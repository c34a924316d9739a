//! Encoding of values, ids and entity data
//!
//! # Binary Format
//!
//! Classes are written as their 4-byte position in the type table.
//!
//! - EntityId: class(4) + slot(4)
//! - ConnectionId: parent class(4) + child class(4) + kind(1) + parent_nullable(1)
//! - VirtualFileUrl: segment_count(4) + [segment_len(4) + segment]...
//! - PersistentId: class(4) + part_count(4) + [value]...
//! - EntitySource: class(4) + payload_count(4) + [value]...
//! - EntityData: source + field_count(4) + [value]... (type given by context)
//! - Value: tag(1) + payload, see [`value_tags`]

use crate::error::{CacheError, Result};
use crate::format::primitives::{
    write_bool, write_i64, write_len, write_str, write_u32, write_u8, ByteReader,
};
use crate::format::type_table::{ResolvedTypes, TypeTableWriter};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use wsmodel_core::{
    ConnectionId, ConnectionKind, EntityData, EntityId, EntitySource, EntityTypeId,
    EntityTypeRegistry, PersistentId, TypeName, Value, VirtualFileUrl, VirtualFileUrlManager,
};

/// Value tags
pub mod value_tags {
    /// `Value::Null`
    pub const NULL: u8 = 0;
    /// `Value::Bool`: byte
    pub const BOOL: u8 = 1;
    /// `Value::Int`: 8 bytes
    pub const INT: u8 = 2;
    /// `Value::String`: string
    pub const STRING: u8 = 3;
    /// `Value::Url`: url
    pub const URL: u8 = 4;
    /// `Value::PersistentId`: persistent id
    pub const PERSISTENT_ID: u8 = 5;
    /// `Value::List`: count + values
    pub const LIST: u8 = 6;
    /// `Value::Set`: count + values
    pub const SET: u8 = 7;
    /// `Value::Map`: count + (key, value) pairs
    pub const MAP: u8 = 8;
    /// `Value::Struct`: class + count + values
    pub const STRUCT: u8 = 9;
    /// `Value::Object`: class
    pub const OBJECT: u8 = 10;
    /// `Value::Enum`: class + variant string
    pub const ENUM: u8 = 11;
}

/// Nesting limit for decoded values
pub const MAX_VALUE_DEPTH: usize = 64;

/// Writes instance data, interning every class it meets
pub(crate) struct EntityEncoder<'t, 'r> {
    types: &'t mut TypeTableWriter<'r>,
    registry: &'r EntityTypeRegistry,
    out: Vec<u8>,
}

impl<'t, 'r> EntityEncoder<'t, 'r> {
    pub(crate) fn new(types: &'t mut TypeTableWriter<'r>, registry: &'r EntityTypeRegistry) -> Self {
        EntityEncoder {
            types,
            registry,
            out: Vec::new(),
        }
    }

    pub(crate) fn finish(self) -> Vec<u8> {
        self.out
    }

    pub(crate) fn len(&mut self, len: usize) -> Result<()> {
        write_len(&mut self.out, len)
    }

    pub(crate) fn str(&mut self, s: &str) -> Result<()> {
        write_str(&mut self.out, s)
    }

    pub(crate) fn u8(&mut self, value: u8) -> Result<()> {
        write_u8(&mut self.out, value)
    }

    pub(crate) fn u32(&mut self, value: u32) -> Result<()> {
        write_u32(&mut self.out, value)
    }

    pub(crate) fn bool(&mut self, value: bool) -> Result<()> {
        write_bool(&mut self.out, value)
    }

    pub(crate) fn class(&mut self, class: &TypeName) -> Result<()> {
        let position = self.types.intern(class)?;
        write_u32(&mut self.out, position)
    }

    pub(crate) fn entity_type(&mut self, type_id: EntityTypeId) -> Result<()> {
        let registry = self.registry;
        let schema = registry.schema(type_id)?;
        self.class(schema.name())
    }

    pub(crate) fn entity_id(&mut self, id: EntityId) -> Result<()> {
        self.entity_type(id.type_id)?;
        self.u32(id.slot)
    }

    pub(crate) fn connection(&mut self, connection: ConnectionId) -> Result<()> {
        self.entity_type(connection.parent)?;
        self.entity_type(connection.child)?;
        self.u8(connection.kind.as_u8())?;
        self.bool(connection.parent_nullable)
    }

    pub(crate) fn url(&mut self, url: &VirtualFileUrl) -> Result<()> {
        self.len(url.segments().len())?;
        for segment in url.segments() {
            self.str(segment)?;
        }
        Ok(())
    }

    pub(crate) fn urls(&mut self, urls: &BTreeSet<VirtualFileUrl>) -> Result<()> {
        self.len(urls.len())?;
        urls.iter().try_for_each(|url| self.url(url))
    }

    pub(crate) fn persistent_id(&mut self, pid: &PersistentId) -> Result<()> {
        self.class(&pid.class)?;
        self.values(&pid.parts)
    }

    pub(crate) fn source(&mut self, source: &EntitySource) -> Result<()> {
        self.class(&source.class)?;
        self.values(&source.payload)
    }

    /// Source and fields; the entity type is implied by the caller
    pub(crate) fn entity_data(&mut self, data: &EntityData) -> Result<()> {
        self.source(data.source())?;
        self.values(data.fields())
    }

    fn values(&mut self, values: &[Value]) -> Result<()> {
        self.len(values.len())?;
        values.iter().try_for_each(|v| self.value(v))
    }

    pub(crate) fn value(&mut self, value: &Value) -> Result<()> {
        match value {
            Value::Null => self.u8(value_tags::NULL),
            Value::Bool(b) => {
                self.u8(value_tags::BOOL)?;
                self.bool(*b)
            }
            Value::Int(i) => {
                self.u8(value_tags::INT)?;
                write_i64(&mut self.out, *i)
            }
            Value::String(s) => {
                self.u8(value_tags::STRING)?;
                self.str(s)
            }
            Value::Url(url) => {
                self.u8(value_tags::URL)?;
                self.url(url)
            }
            Value::PersistentId(pid) => {
                self.u8(value_tags::PERSISTENT_ID)?;
                self.persistent_id(pid)
            }
            Value::List(items) => {
                self.u8(value_tags::LIST)?;
                self.values(items)
            }
            Value::Set(items) => {
                self.u8(value_tags::SET)?;
                self.len(items.len())?;
                items.iter().try_for_each(|v| self.value(v))
            }
            Value::Map(entries) => {
                self.u8(value_tags::MAP)?;
                self.len(entries.len())?;
                for (k, v) in entries {
                    self.value(k)?;
                    self.value(v)?;
                }
                Ok(())
            }
            Value::Struct { class, fields } => {
                self.u8(value_tags::STRUCT)?;
                self.class(class)?;
                self.values(fields)
            }
            Value::Object(class) => {
                self.u8(value_tags::OBJECT)?;
                self.class(class)
            }
            Value::Enum { class, variant } => {
                self.u8(value_tags::ENUM)?;
                self.class(class)?;
                self.str(variant)
            }
        }
    }
}

/// Reads instance data written by [`EntityEncoder`]
///
/// Classes and entity types are mapped through the resolved type table,
/// so ids come back with the reading registry's type tags.
pub(crate) struct EntityDecoder<'a> {
    reader: ByteReader<'a>,
    types: &'a ResolvedTypes,
    registry: &'a EntityTypeRegistry,
    urls: &'a dyn VirtualFileUrlManager,
}

impl<'a> EntityDecoder<'a> {
    pub(crate) fn new(
        data: &'a [u8],
        types: &'a ResolvedTypes,
        registry: &'a EntityTypeRegistry,
        urls: &'a dyn VirtualFileUrlManager,
    ) -> Self {
        EntityDecoder {
            reader: ByteReader::new(data),
            types,
            registry,
            urls,
        }
    }

    pub(crate) fn registry(&self) -> &'a EntityTypeRegistry {
        self.registry
    }

    pub(crate) fn finish(&self, context: &'static str) -> Result<()> {
        self.reader.expect_end(context)
    }

    pub(crate) fn count(&mut self, context: &'static str) -> Result<usize> {
        self.reader.read_count(context)
    }

    pub(crate) fn str(&mut self, context: &'static str) -> Result<String> {
        self.reader.read_str(context)
    }

    pub(crate) fn u8(&mut self, context: &'static str) -> Result<u8> {
        self.reader.read_u8(context)
    }

    pub(crate) fn u32(&mut self, context: &'static str) -> Result<u32> {
        self.reader.read_u32(context)
    }

    pub(crate) fn bool(&mut self, context: &'static str) -> Result<bool> {
        self.reader.read_bool(context)
    }

    pub(crate) fn class(&mut self) -> Result<TypeName> {
        let position = self.reader.read_u32("class reference")?;
        self.types.class(position).cloned()
    }

    pub(crate) fn entity_type(&mut self) -> Result<EntityTypeId> {
        let position = self.reader.read_u32("entity type reference")?;
        self.types.entity_type(position)
    }

    pub(crate) fn entity_id(&mut self) -> Result<EntityId> {
        let type_id = self.entity_type()?;
        let slot = self.reader.read_u32("entity id")?;
        Ok(EntityId::new(type_id, slot))
    }

    pub(crate) fn connection(&mut self) -> Result<ConnectionId> {
        let parent = self.entity_type()?;
        let child = self.entity_type()?;
        let tag = self.reader.read_u8("connection kind")?;
        let kind = ConnectionKind::from_u8(tag)
            .ok_or_else(|| CacheError::Corrupted(format!("invalid connection kind {}", tag)))?;
        let nullable = self.reader.read_bool("connection")?;
        let connection = ConnectionId::new(parent, child, kind, nullable);
        if !self.registry.connections().contains(&connection) {
            return Err(CacheError::Corrupted(format!("unknown {}", connection)));
        }
        Ok(connection)
    }

    pub(crate) fn url(&mut self) -> Result<VirtualFileUrl> {
        let count = self.reader.read_count("url")?;
        let mut segments = Vec::with_capacity(count);
        for _ in 0..count {
            segments.push(self.reader.read_str("url segment")?);
        }
        let segments: Vec<&str> = segments.iter().map(String::as_str).collect();
        Ok(self.urls.from_segments(&segments))
    }

    pub(crate) fn urls(&mut self) -> Result<BTreeSet<VirtualFileUrl>> {
        let count = self.reader.read_count("url set")?;
        (0..count).map(|_| self.url()).collect()
    }

    pub(crate) fn persistent_id(&mut self) -> Result<PersistentId> {
        let class = self.class()?;
        let parts = self.values(0)?;
        Ok(PersistentId::new(class, parts))
    }

    pub(crate) fn source(&mut self) -> Result<EntitySource> {
        let class = self.class()?;
        let payload = self.values(0)?;
        Ok(EntitySource::new(class, payload))
    }

    pub(crate) fn entity_data(&mut self, type_id: EntityTypeId) -> Result<Arc<EntityData>> {
        let schema = Arc::clone(self.registry.schema(type_id)?);
        let source = self.source()?;
        let fields = self.values(0)?;
        Ok(Arc::new(EntityData::from_parts(schema, source, fields)?))
    }

    fn values(&mut self, depth: usize) -> Result<Vec<Value>> {
        let count = self.reader.read_count("value list")?;
        (0..count).map(|_| self.value_at(depth)).collect()
    }

    pub(crate) fn value(&mut self) -> Result<Value> {
        self.value_at(0)
    }

    fn value_at(&mut self, depth: usize) -> Result<Value> {
        if depth > MAX_VALUE_DEPTH {
            return Err(CacheError::Corrupted(format!(
                "values nested deeper than {}",
                MAX_VALUE_DEPTH
            )));
        }
        let tag = self.reader.read_u8("value tag")?;
        let value = match tag {
            value_tags::NULL => Value::Null,
            value_tags::BOOL => Value::Bool(self.reader.read_bool("bool value")?),
            value_tags::INT => Value::Int(self.reader.read_i64("int value")?),
            value_tags::STRING => Value::String(self.reader.read_str("string value")?),
            value_tags::URL => Value::Url(self.url()?),
            value_tags::PERSISTENT_ID => {
                let class = self.class()?;
                let parts = self.values(depth + 1)?;
                Value::PersistentId(PersistentId::new(class, parts))
            }
            value_tags::LIST => Value::List(self.values(depth + 1)?),
            value_tags::SET => {
                let items: BTreeSet<Value> = self.values(depth + 1)?.into_iter().collect();
                Value::Set(items)
            }
            value_tags::MAP => {
                let count = self.reader.read_count("map value")?;
                let mut entries = BTreeMap::new();
                for _ in 0..count {
                    let key = self.value_at(depth + 1)?;
                    let value = self.value_at(depth + 1)?;
                    entries.insert(key, value);
                }
                Value::Map(entries)
            }
            value_tags::STRUCT => {
                let class = self.class()?;
                let fields = self.values(depth + 1)?;
                Value::Struct { class, fields }
            }
            value_tags::OBJECT => Value::Object(self.class()?),
            value_tags::ENUM => {
                let class = self.class()?;
                let variant = self.reader.read_str("enum variant")?;
                Value::Enum { class, variant }
            }
            other => {
                return Err(CacheError::Corrupted(format!("invalid value tag {}", other)));
            }
        };
        Ok(value)
    }
}
