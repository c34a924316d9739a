//! Self-describing type table
//!
//! Every class referenced by instance data (entity types, value classes,
//! source classes, persistent id classes) appears once as
//! `(fqn, plugin id)`. Instance data refers to classes by their position in
//! the table, so a reader resolves identity by name and never depends on
//! the writer's type numbering.
//!
//! # Binary Format
//!
//! ```text
//! count(4) + [fqn_len(4) + fqn + has_plugin(1) + [plugin_len(4) + plugin]]...
//! ```

use crate::error::{CacheError, Result};
use crate::format::primitives::{write_bool, write_len, write_str, ByteReader};
use crate::resolver::EntityTypesResolver;
use rustc_hash::FxHashMap;
use tracing::trace;
use wsmodel_core::{EntityTypeId, EntityTypeRegistry, TypeName};

/// Classes collected while encoding, in first-use order
pub(crate) struct TypeTableWriter<'a> {
    registry: &'a EntityTypeRegistry,
    resolver: &'a dyn EntityTypesResolver,
    positions: FxHashMap<TypeName, u32>,
    entries: Vec<(String, Option<String>)>,
}

impl<'a> TypeTableWriter<'a> {
    pub(crate) fn new(registry: &'a EntityTypeRegistry, resolver: &'a dyn EntityTypesResolver) -> Self {
        TypeTableWriter {
            registry,
            resolver,
            positions: FxHashMap::default(),
            entries: Vec::new(),
        }
    }

    /// Position of `class` in the table, adding it on first use
    ///
    /// Fails for classes the registry does not know; they could not be
    /// resolved when the cache is read back.
    pub(crate) fn intern(&mut self, class: &TypeName) -> Result<u32> {
        if let Some(&position) = self.positions.get(class) {
            return Ok(position);
        }
        if !self.registry.is_registered(class) {
            return Err(CacheError::UnregisteredType(class.fqn.clone()));
        }
        let position = u32::try_from(self.entries.len())
            .map_err(|_| CacheError::Corrupted("type table overflow".to_string()))?;
        self.entries
            .push((class.fqn.clone(), self.resolver.plugin_id(class)));
        self.positions.insert(class.clone(), position);
        Ok(position)
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn write_to(&self, out: &mut Vec<u8>) -> Result<()> {
        write_len(out, self.entries.len())?;
        for (fqn, plugin) in &self.entries {
            write_str(out, fqn)?;
            write_bool(out, plugin.is_some())?;
            if let Some(plugin) = plugin {
                write_str(out, plugin)?;
            }
        }
        Ok(())
    }
}

/// Type table read back and resolved against the running registry
#[derive(Debug)]
pub(crate) struct ResolvedTypes {
    classes: Vec<TypeName>,
    entity_types: Vec<Option<EntityTypeId>>,
}

impl ResolvedTypes {
    /// Read the table and resolve every entry
    ///
    /// One unresolvable class fails the whole table; data referring to it
    /// could not be decoded anyway.
    pub(crate) fn read(
        reader: &mut ByteReader<'_>,
        registry: &EntityTypeRegistry,
        resolver: &dyn EntityTypesResolver,
    ) -> Result<Self> {
        let count = reader.read_count("type table")?;
        let mut classes = Vec::with_capacity(count);
        let mut entity_types = Vec::with_capacity(count);
        for _ in 0..count {
            let fqn = reader.read_str("type table entry")?;
            let plugin = if reader.read_bool("type table entry")? {
                Some(reader.read_str("type table plugin")?)
            } else {
                None
            };
            let class = resolver
                .resolve_class(&fqn, plugin.as_deref())
                .ok_or_else(|| CacheError::UnresolvedType {
                    fqn: fqn.clone(),
                    plugin: plugin.clone(),
                })?;
            let entity_type = registry
                .schema_by_name(&class.fqn)
                .ok()
                .filter(|schema| *schema.name() == class)
                .map(|schema| schema.type_id());
            trace!(fqn = %fqn, plugin = ?plugin, entity_type = ?entity_type, "resolved cached class");
            classes.push(class);
            entity_types.push(entity_type);
        }
        Ok(ResolvedTypes {
            classes,
            entity_types,
        })
    }

    pub(crate) fn class(&self, position: u32) -> Result<&TypeName> {
        self.classes
            .get(position as usize)
            .ok_or_else(|| CacheError::Corrupted(format!("type table has no entry {}", position)))
    }

    /// Entity type of an entry, failing for value classes
    pub(crate) fn entity_type(&self, position: u32) -> Result<EntityTypeId> {
        match self.entity_types.get(position as usize) {
            Some(Some(type_id)) => Ok(*type_id),
            Some(None) => Err(CacheError::Corrupted(format!(
                "type table entry {} ({}) is not an entity type",
                position, self.classes[position as usize]
            ))),
            None => Err(CacheError::Corrupted(format!("type table has no entry {}", position))),
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.classes.len()
    }
}
