//! Entity data: the plain-value holder of one entity
//!
//! `EntityData` knows nothing about graph position. It carries the schema,
//! the entity source and one value per declared field. Graph-aware views are
//! built by the storage crate.
//!
//! # Equality
//!
//! Three axes, each with a matching hash:
//! - full (`PartialEq` / `Hash`): type, source and every field
//! - ignoring source: type and every field, used by merge and diff
//! - by key: type and key fields only, used to match the same logical
//!   entity across snapshots. Types without key fields fall back to
//!   ignoring-source equality.

use crate::error::{Error, Result};
use crate::identity::{EntitySource, PersistentId};
use crate::schema::{EntitySchema, EntityTypeRegistry};
use crate::types::{ConnectionId, EntityId, EntityTypeId};
use crate::url::VirtualFileUrl;
use crate::value::Value;
use rustc_hash::FxHasher;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// Field values of one entity
///
/// `Clone` deep-copies every embedded collection; mutating a clone never
/// affects the original.
#[derive(Clone)]
pub struct EntityData {
    schema: Arc<EntitySchema>,
    source: EntitySource,
    fields: Vec<Value>,
}

impl EntityData {
    /// Empty data (all fields null) for a schema
    pub fn new(schema: Arc<EntitySchema>, source: EntitySource) -> Self {
        let fields = vec![Value::Null; schema.fields().len()];
        EntityData {
            schema,
            source,
            fields,
        }
    }

    /// Empty data for a registered type name
    pub fn create(registry: &EntityTypeRegistry, type_name: &str, source: EntitySource) -> Result<Self> {
        let schema = Arc::clone(registry.schema_by_name(type_name)?);
        if schema.is_abstract() {
            return Err(Error::AbstractEntityType(type_name.to_string()));
        }
        Ok(Self::new(schema, source))
    }

    /// Rebuild data from decoded parts
    pub fn from_parts(schema: Arc<EntitySchema>, source: EntitySource, fields: Vec<Value>) -> Result<Self> {
        if fields.len() != schema.fields().len() {
            return Err(Error::InvalidSchema(format!(
                "{} declares {} fields, got {}",
                schema.name(),
                schema.fields().len(),
                fields.len()
            )));
        }
        Ok(EntityData {
            schema,
            source,
            fields,
        })
    }

    /// Builder-style field assignment
    pub fn with(mut self, field: &str, value: impl Into<Value>) -> Result<Self> {
        self.set(field, value)?;
        Ok(self)
    }

    /// Assign a field by name
    pub fn set(&mut self, field: &str, value: impl Into<Value>) -> Result<()> {
        let index = self.schema.require_field(field)?;
        self.fields[index] = value.into();
        Ok(())
    }

    /// Assign a field by position
    pub fn set_index(&mut self, index: usize, value: Value) -> Result<()> {
        match self.fields.get_mut(index) {
            Some(slot) => {
                *slot = value;
                Ok(())
            }
            None => Err(Error::UnknownField {
                entity: self.schema.name().fqn.clone(),
                field: format!("#{}", index),
            }),
        }
    }

    /// Field value by name
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.schema.field_index(field).map(|i| &self.fields[i])
    }

    /// Field value by position
    pub fn field(&self, index: usize) -> Option<&Value> {
        self.fields.get(index)
    }

    /// All field values in declaration order
    pub fn fields(&self) -> &[Value] {
        &self.fields
    }

    /// Schema of this entity
    pub fn schema(&self) -> &Arc<EntitySchema> {
        &self.schema
    }

    /// Type tag
    pub fn type_id(&self) -> EntityTypeId {
        self.schema.type_id()
    }

    /// Entity source
    pub fn source(&self) -> &EntitySource {
        &self.source
    }

    /// Replace the entity source
    pub fn set_source(&mut self, source: EntitySource) {
        self.source = source;
    }

    /// Check every required field holds a value
    pub fn check_initialized(&self) -> Result<()> {
        for (field, value) in self.schema.fields().iter().zip(&self.fields) {
            if field.is_required() && value.is_null() {
                return Err(Error::UninitializedField {
                    entity: self.schema.name().fqn.clone(),
                    field: field.name.clone(),
                });
            }
        }
        Ok(())
    }

    /// Check the given fields against their declared types
    pub fn check_types(&self, registry: &EntityTypeRegistry, indices: impl IntoIterator<Item = usize>) -> Result<()> {
        for i in indices {
            let (Some(field), Some(value)) = (self.schema.fields().get(i), self.fields.get(i)) else {
                continue;
            };
            if field.is_required() && value.is_null() {
                return Err(Error::UninitializedField {
                    entity: self.schema.name().fqn.clone(),
                    field: field.name.clone(),
                });
            }
            if !registry.check_value(&field.ty, value) {
                return Err(Error::FieldTypeMismatch {
                    entity: self.schema.name().fqn.clone(),
                    field: field.name.clone(),
                    expected: field.ty.to_string(),
                });
            }
        }
        Ok(())
    }

    /// Full validation: initialization and every field's type
    pub fn validate(&self, registry: &EntityTypeRegistry) -> Result<()> {
        self.check_initialized()?;
        self.check_types(registry, 0..self.fields.len())
    }

    /// Positions of fields whose values differ from `other`
    pub fn changed_fields(&self, other: &EntityData) -> Vec<usize> {
        self.fields
            .iter()
            .zip(&other.fields)
            .enumerate()
            .filter(|(_, (a, b))| a != b)
            .map(|(i, _)| i)
            .collect()
    }

    /// Persistent id derived from the fields, if the type has one
    pub fn persistent_id(&self) -> Option<PersistentId> {
        self.schema
            .persistent_id_rule()
            .map(|rule| rule.derive(&self.fields))
    }

    /// Persistent ids referenced by value from any field
    pub fn soft_links(&self, registry: &EntityTypeRegistry) -> BTreeSet<PersistentId> {
        let mut out = BTreeSet::new();
        for (field, value) in self.schema.fields().iter().zip(&self.fields) {
            if field.is_soft_link_bearing() {
                registry.soft_links(&field.ty, value, &mut out);
            }
        }
        out
    }

    /// Urls of one field
    pub fn field_urls(&self, registry: &EntityTypeRegistry, index: usize) -> BTreeSet<VirtualFileUrl> {
        let mut out = BTreeSet::new();
        if let (Some(field), Some(value)) = (self.schema.fields().get(index), self.fields.get(index)) {
            if field.is_url_bearing() {
                registry.urls(&field.ty, value, &mut out);
            }
        }
        out
    }

    /// Urls per url-bearing field name
    pub fn urls_by_field(&self, registry: &EntityTypeRegistry) -> BTreeMap<String, BTreeSet<VirtualFileUrl>> {
        let mut out = BTreeMap::new();
        for (i, field) in self.schema.fields().iter().enumerate() {
            if !field.is_url_bearing() {
                continue;
            }
            let urls = self.field_urls(registry, i);
            if !urls.is_empty() {
                out.insert(field.name.clone(), urls);
            }
        }
        out
    }

    /// Urls of jar directory fields
    pub fn jar_directories(&self, registry: &EntityTypeRegistry) -> BTreeSet<VirtualFileUrl> {
        let mut out = BTreeSet::new();
        for (i, field) in self.schema.fields().iter().enumerate() {
            if field.jar_directory {
                out.extend(self.field_urls(registry, i));
            }
        }
        out
    }

    /// Parent connections that must be resolved before the entity can exist
    pub fn required_parents(&self) -> Vec<ConnectionId> {
        self.schema.required_parents()
    }

    /// Resolve parent links against candidate parents by type
    ///
    /// A required parent must match exactly one candidate. An optional parent
    /// may match none, but never more than one.
    pub fn resolve_parents(
        &self,
        registry: &EntityTypeRegistry,
        candidates: &[EntityId],
    ) -> Result<Vec<(ConnectionId, EntityId)>> {
        let mut resolved = Vec::new();
        for parent in self.schema.parent_connections() {
            let matching: Vec<EntityId> = candidates
                .iter()
                .copied()
                .filter(|c| registry.is_assignable(c.type_id, parent.connection.parent))
                .collect();
            match matching.as_slice() {
                [] if parent.connection.parent_nullable => {}
                [] => {
                    return Err(Error::MissingParent {
                        entity: self.schema.name().fqn.clone(),
                        field: parent.field.clone(),
                    })
                }
                [single] => resolved.push((parent.connection, *single)),
                many => {
                    return Err(Error::AmbiguousParent {
                        entity: self.schema.name().fqn.clone(),
                        field: parent.field.clone(),
                        candidates: many.len(),
                    })
                }
            }
        }
        Ok(resolved)
    }

    // ========================================================================
    // Equality axes
    // ========================================================================

    /// Equality over type and fields, ignoring the source
    pub fn equals_ignoring_source(&self, other: &EntityData) -> bool {
        self.schema.name() == other.schema.name() && self.fields == other.fields
    }

    /// Hash matching [`EntityData::equals_ignoring_source`]
    pub fn hash_ignoring_source(&self) -> u64 {
        let mut hasher = FxHasher::default();
        self.schema.name().hash(&mut hasher);
        self.fields.hash(&mut hasher);
        hasher.finish()
    }

    /// Equality over type and key fields
    pub fn equals_by_key(&self, other: &EntityData) -> bool {
        if self.schema.name() != other.schema.name() {
            return false;
        }
        if !self.schema.has_key_fields() {
            return self.equals_ignoring_source(other);
        }
        self.schema
            .key_field_indices()
            .all(|i| self.fields.get(i) == other.fields.get(i))
    }

    /// Hash matching [`EntityData::equals_by_key`]
    pub fn hash_by_key(&self) -> u64 {
        if !self.schema.has_key_fields() {
            return self.hash_ignoring_source();
        }
        let mut hasher = FxHasher::default();
        self.schema.name().hash(&mut hasher);
        for i in self.schema.key_field_indices() {
            self.fields[i].hash(&mut hasher);
        }
        hasher.finish()
    }
}

impl PartialEq for EntityData {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source && self.equals_ignoring_source(other)
    }
}

impl Eq for EntityData {}

impl Hash for EntityData {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.schema.name().hash(state);
        self.source.hash(state);
        self.fields.hash(state);
    }
}

impl fmt::Debug for EntityData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = f.debug_struct(self.schema.name().simple_name());
        for (field, value) in self.schema.fields().iter().zip(&self.fields) {
            s.field(&field.name, value);
        }
        s.field("source", &self.source.class.fqn);
        s.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{EntitySchema, FieldSchema};
    use crate::types::ConnectionKind;
    use crate::value::{TypeName, ValueType};

    fn registry() -> Arc<EntityTypeRegistry> {
        let mut builder = EntityTypeRegistry::builder();
        builder
            .register(
                EntitySchema::new(TypeName::new("Library"))
                    .field(FieldSchema::new("name", ValueType::String).key())
                    .field(FieldSchema::new("roots", ValueType::list(ValueType::Url)))
                    .field(FieldSchema::new("comment", ValueType::optional(ValueType::String)))
                    .persistent_id(TypeName::new("LibraryId"), &["name"]),
            )
            .register(
                EntitySchema::new(TypeName::new("Module"))
                    .field(FieldSchema::new("name", ValueType::String)),
            )
            .register(
                EntitySchema::new(TypeName::new("Facet"))
                    .field(FieldSchema::new("name", ValueType::String))
                    .parent("module", "Module", ConnectionKind::OneToMany, false)
                    .parent("library", "Library", ConnectionKind::OneToMany, true),
            );
        builder.build().unwrap()
    }

    fn source(name: &str) -> EntitySource {
        EntitySource::object(TypeName::new(name))
    }

    fn library(registry: &EntityTypeRegistry, name: &str, src: &str) -> EntityData {
        EntityData::create(registry, "Library", source(src))
            .unwrap()
            .with("name", name)
            .unwrap()
            .with("roots", Value::List(vec![]))
            .unwrap()
    }

    // ========================================================================
    // Construction
    // ========================================================================

    #[test]
    fn test_new_data_is_uninitialized() {
        let registry = registry();
        let data = EntityData::create(&registry, "Library", source("S")).unwrap();
        let err = data.check_initialized().unwrap_err();
        assert_eq!(err.to_string(), "Field Library#name should be initialized");
    }

    #[test]
    fn test_optional_field_may_stay_null() {
        let registry = registry();
        let data = library(&registry, "junit", "S");
        assert!(data.validate(&registry).is_ok());
        assert_eq!(data.get("comment"), Some(&Value::Null));
    }

    #[test]
    fn test_type_mismatch_rejected() {
        let registry = registry();
        let data = library(&registry, "junit", "S").with("roots", Value::Int(3)).unwrap();
        assert!(matches!(
            data.validate(&registry),
            Err(Error::FieldTypeMismatch { .. })
        ));
    }

    #[test]
    fn test_unknown_field_rejected() {
        let registry = registry();
        let result = library(&registry, "junit", "S").with("missing", 1i64);
        assert!(matches!(result, Err(Error::UnknownField { .. })));
    }

    #[test]
    fn test_clone_is_deep() {
        let registry = registry();
        let original = library(&registry, "junit", "S");
        let mut copy = original.clone();
        copy.set("roots", Value::List(vec![Value::string("x")])).unwrap();
        assert_eq!(original.get("roots"), Some(&Value::List(vec![])));
    }

    // ========================================================================
    // Equality axes
    // ========================================================================

    #[test]
    fn test_full_equality_includes_source() {
        let registry = registry();
        let a = library(&registry, "junit", "A");
        let b = library(&registry, "junit", "B");
        assert_ne!(a, b);
        assert!(a.equals_ignoring_source(&b));
        assert_eq!(a.hash_ignoring_source(), b.hash_ignoring_source());
    }

    #[test]
    fn test_key_equality_ignores_non_key_fields() {
        let registry = registry();
        let a = library(&registry, "junit", "A");
        let b = library(&registry, "junit", "A").with("comment", "tests").unwrap();
        assert!(!a.equals_ignoring_source(&b));
        assert!(a.equals_by_key(&b));
        assert_eq!(a.hash_by_key(), b.hash_by_key());
    }

    #[test]
    fn test_key_equality_falls_back_without_key_fields() {
        let registry = registry();
        let a = EntityData::create(&registry, "Module", source("A")).unwrap().with("name", "m").unwrap();
        let b = EntityData::create(&registry, "Module", source("B")).unwrap().with("name", "m").unwrap();
        assert!(a.equals_by_key(&b));
        assert_eq!(a.hash_by_key(), a.hash_ignoring_source());
    }

    #[test]
    fn test_persistent_id_derived_from_fields() {
        let registry = registry();
        let data = library(&registry, "junit", "A");
        let pid = data.persistent_id().unwrap();
        assert_eq!(pid.to_string(), "LibraryId(junit)");
    }

    // ========================================================================
    // Parent resolution
    // ========================================================================

    #[test]
    fn test_resolve_parents_by_type() {
        let registry = registry();
        let module = EntityId::new(registry.type_id("Module").unwrap(), 0);
        let facet = EntityData::create(&registry, "Facet", source("S")).unwrap();
        let resolved = facet.resolve_parents(&registry, &[module]).unwrap();
        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved[0].1, module);
    }

    #[test]
    fn test_resolve_parents_missing_required() {
        let registry = registry();
        let library = EntityId::new(registry.type_id("Library").unwrap(), 0);
        let facet = EntityData::create(&registry, "Facet", source("S")).unwrap();
        let err = facet.resolve_parents(&registry, &[library]).unwrap_err();
        assert!(matches!(err, Error::MissingParent { ref field, .. } if field == "module"));
    }

    #[test]
    fn test_resolve_parents_ambiguous() {
        let registry = registry();
        let module_type = registry.type_id("Module").unwrap();
        let facet = EntityData::create(&registry, "Facet", source("S")).unwrap();
        let err = facet
            .resolve_parents(
                &registry,
                &[EntityId::new(module_type, 0), EntityId::new(module_type, 1)],
            )
            .unwrap_err();
        assert!(matches!(err, Error::AmbiguousParent { candidates: 2, .. }));
    }

    #[test]
    fn test_required_parents_listed() {
        let registry = registry();
        let facet = EntityData::create(&registry, "Facet", source("S")).unwrap();
        let required = facet.required_parents();
        assert_eq!(required.len(), 1);
        assert!(!required[0].parent_nullable);
    }
}
