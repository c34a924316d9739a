//! Entity schemas and the type registry
//!
//! Every entity type is described by an explicit `EntitySchema`: its typed
//! fields, key fields, persistent id rule, supertypes and parent references.
//! Value classes used inside fields (structs, sealed hierarchies, objects,
//! enums) are declared as `ValueClass`es. A `RegistryBuilder` collects the
//! declarations and validates them into an immutable `EntityTypeRegistry`,
//! which every storage and serializer in the process shares through `Arc`.
//!
//! # Design Notes
//!
//! - Type tags are assigned in registration order, so two processes that
//!   register in different orders disagree on tags. Anything persisted must
//!   refer to types by name.
//! - Parent references declared on an abstract type are inherited by all of
//!   its subtypes; the connection keeps the abstract type as its child side.
//! - Soft-link and url bearing flags are computed once per field by walking
//!   the declared type tree through value classes.

use crate::error::{Error, Result};
use crate::identity::PersistentId;
use crate::types::{ConnectionId, ConnectionKind, EntityTypeId};
use crate::url::VirtualFileUrl;
use crate::value::{TypeName, Value, ValueType};
use rustc_hash::{FxHashMap, FxHashSet};
use std::collections::BTreeSet;
use std::sync::Arc;

// ============================================================================
// Field and entity declarations
// ============================================================================

/// Declaration of one entity field
#[derive(Debug, Clone, PartialEq)]
pub struct FieldSchema {
    /// Field name
    pub name: String,
    /// Declared type
    pub ty: ValueType,
    /// Participates in key-based equality
    pub key: bool,
    /// Urls in this field name jar directories
    pub jar_directory: bool,
    soft_link_bearing: bool,
    url_bearing: bool,
}

impl FieldSchema {
    /// Declare a field
    pub fn new(name: impl Into<String>, ty: ValueType) -> Self {
        FieldSchema {
            name: name.into(),
            ty,
            key: false,
            jar_directory: false,
            soft_link_bearing: false,
            url_bearing: false,
        }
    }

    /// Mark as key field
    pub fn key(mut self) -> Self {
        self.key = true;
        self
    }

    /// Mark urls of this field as jar directories
    pub fn jar_directory(mut self) -> Self {
        self.jar_directory = true;
        self
    }

    /// Whether the declared type can contain persistent ids
    pub fn is_soft_link_bearing(&self) -> bool {
        self.soft_link_bearing
    }

    /// Whether the declared type can contain urls
    pub fn is_url_bearing(&self) -> bool {
        self.url_bearing
    }

    /// Whether changes to this field touch an auxiliary index
    pub fn is_index_bearing(&self) -> bool {
        self.soft_link_bearing || self.url_bearing
    }

    /// Whether the field must hold a non-null value
    pub fn is_required(&self) -> bool {
        !self.ty.is_optional()
    }
}

/// Reference from a child type to its parent type
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParentRef {
    /// Name of the reference on the child
    pub field: String,
    /// Parent type name
    pub parent: String,
    /// Connection cardinality
    pub kind: ConnectionKind,
    /// Whether the child may exist without this parent
    pub nullable: bool,
}

/// Resolved parent reference of a schema
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParentConnection {
    /// Name of the reference on the child
    pub field: String,
    /// Resolved connection
    pub connection: ConnectionId,
}

/// How an entity derives its persistent id
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistentIdRule {
    /// Class of the produced id
    pub class: TypeName,
    /// Source fields in order
    pub fields: Vec<String>,
    indices: Vec<usize>,
}

impl PersistentIdRule {
    /// Indices of the source fields
    pub fn field_indices(&self) -> &[usize] {
        &self.indices
    }

    /// Derive the id from field values
    pub fn derive(&self, fields: &[Value]) -> PersistentId {
        let parts = self
            .indices
            .iter()
            .map(|&i| fields.get(i).cloned().unwrap_or(Value::Null))
            .collect();
        PersistentId::new(self.class.clone(), parts)
    }
}

/// Schema of one entity type
#[derive(Debug, Clone)]
pub struct EntitySchema {
    name: TypeName,
    is_abstract: bool,
    supertypes: Vec<String>,
    fields: Vec<FieldSchema>,
    parents: Vec<ParentRef>,
    persistent_id: Option<PersistentIdRule>,
    type_id: EntityTypeId,
    ancestors: Vec<EntityTypeId>,
    parent_connections: Vec<ParentConnection>,
}

impl EntitySchema {
    /// Start declaring a concrete entity type
    pub fn new(name: TypeName) -> Self {
        EntitySchema {
            name,
            is_abstract: false,
            supertypes: Vec::new(),
            fields: Vec::new(),
            parents: Vec::new(),
            persistent_id: None,
            type_id: EntityTypeId(0),
            ancestors: Vec::new(),
            parent_connections: Vec::new(),
        }
    }

    /// Mark the type abstract (no instances, only subtypes)
    pub fn abstract_type(mut self) -> Self {
        self.is_abstract = true;
        self
    }

    /// Declare a supertype by name
    pub fn extends(mut self, supertype: impl Into<String>) -> Self {
        self.supertypes.push(supertype.into());
        self
    }

    /// Declare a field
    pub fn field(mut self, field: FieldSchema) -> Self {
        self.fields.push(field);
        self
    }

    /// Declare a parent reference
    pub fn parent(
        mut self,
        field: impl Into<String>,
        parent: impl Into<String>,
        kind: ConnectionKind,
        nullable: bool,
    ) -> Self {
        self.parents.push(ParentRef {
            field: field.into(),
            parent: parent.into(),
            kind,
            nullable,
        });
        self
    }

    /// Declare the persistent id rule
    pub fn persistent_id(mut self, class: TypeName, fields: &[&str]) -> Self {
        self.persistent_id = Some(PersistentIdRule {
            class,
            fields: fields.iter().map(|f| f.to_string()).collect(),
            indices: Vec::new(),
        });
        self
    }

    /// Type name
    pub fn name(&self) -> &TypeName {
        &self.name
    }

    /// Type tag in the owning registry
    pub fn type_id(&self) -> EntityTypeId {
        self.type_id
    }

    /// Whether the type is abstract
    pub fn is_abstract(&self) -> bool {
        self.is_abstract
    }

    /// Declared fields in order
    pub fn fields(&self) -> &[FieldSchema] {
        &self.fields
    }

    /// Position of a field
    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }

    /// Position of a field, or an error naming it
    pub fn require_field(&self, name: &str) -> Result<usize> {
        self.field_index(name).ok_or_else(|| Error::UnknownField {
            entity: self.name.fqn.clone(),
            field: name.to_string(),
        })
    }

    /// Indices of key fields
    pub fn key_field_indices(&self) -> impl Iterator<Item = usize> + '_ {
        self.fields
            .iter()
            .enumerate()
            .filter(|(_, f)| f.key)
            .map(|(i, _)| i)
    }

    /// Whether any field is a key field
    pub fn has_key_fields(&self) -> bool {
        self.fields.iter().any(|f| f.key)
    }

    /// Persistent id rule, if the type produces one
    pub fn persistent_id_rule(&self) -> Option<&PersistentIdRule> {
        self.persistent_id.as_ref()
    }

    /// Own and inherited parent references
    pub fn parent_connections(&self) -> &[ParentConnection] {
        &self.parent_connections
    }

    /// Connection behind a named parent reference
    pub fn connection(&self, field: &str) -> Result<ConnectionId> {
        self.parent_connections
            .iter()
            .find(|p| p.field == field)
            .map(|p| p.connection)
            .ok_or_else(|| Error::UnknownField {
                entity: self.name.fqn.clone(),
                field: field.to_string(),
            })
    }

    /// Name of the parent reference using `connection`
    pub fn parent_field(&self, connection: ConnectionId) -> Option<&str> {
        self.parent_connections
            .iter()
            .find(|p| p.connection == connection)
            .map(|p| p.field.as_str())
    }

    /// Parent references that must resolve for the entity to exist
    pub fn required_parents(&self) -> Vec<ConnectionId> {
        self.parent_connections
            .iter()
            .filter(|p| !p.connection.parent_nullable)
            .map(|p| p.connection)
            .collect()
    }
}

/// Declaration of a class used inside field values
#[derive(Debug, Clone, PartialEq)]
pub enum ValueClass {
    /// Data class with ordered members
    Struct {
        /// Class name
        name: TypeName,
        /// Member names and types
        fields: Vec<(String, ValueType)>,
    },
    /// Closed hierarchy; values are instances of one of the variants
    Sealed {
        /// Class name
        name: TypeName,
        /// Struct or object classes forming the hierarchy
        variants: Vec<TypeName>,
    },
    /// Singleton
    Object {
        /// Class name
        name: TypeName,
    },
    /// Enumeration
    Enum {
        /// Class name
        name: TypeName,
        /// Variant names
        variants: Vec<String>,
    },
}

impl ValueClass {
    /// Class name
    pub fn name(&self) -> &TypeName {
        match self {
            ValueClass::Struct { name, .. }
            | ValueClass::Sealed { name, .. }
            | ValueClass::Object { name }
            | ValueClass::Enum { name, .. } => name,
        }
    }
}

// ============================================================================
// Registry builder
// ============================================================================

/// Collects declarations and validates them into a registry
#[derive(Debug, Default)]
pub struct RegistryBuilder {
    schemas: Vec<EntitySchema>,
    classes: Vec<ValueClass>,
    sources: Vec<TypeName>,
}

impl RegistryBuilder {
    /// Create an empty builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an entity type; tags follow registration order
    pub fn register(&mut self, schema: EntitySchema) -> &mut Self {
        self.schemas.push(schema);
        self
    }

    /// Register a value class
    pub fn value_class(&mut self, class: ValueClass) -> &mut Self {
        self.classes.push(class);
        self
    }

    /// Register an entity source class
    pub fn source_class(&mut self, name: TypeName) -> &mut Self {
        self.sources.push(name);
        self
    }

    /// Validate and freeze the declarations
    pub fn build(self) -> Result<Arc<EntityTypeRegistry>> {
        let RegistryBuilder {
            mut schemas,
            classes,
            sources,
        } = self;

        if schemas.len() > u16::MAX as usize {
            return Err(Error::InvalidSchema("too many entity types".to_string()));
        }

        let mut by_name = FxHashMap::default();
        for (i, schema) in schemas.iter_mut().enumerate() {
            schema.type_id = EntityTypeId(i as u16);
            if by_name.insert(schema.name.fqn.clone(), schema.type_id).is_some() {
                return Err(Error::InvalidSchema(format!(
                    "entity type {} registered twice",
                    schema.name
                )));
            }
        }

        let mut class_map: FxHashMap<String, ValueClass> = FxHashMap::default();
        for class in classes {
            let fqn = class.name().fqn.clone();
            if by_name.contains_key(&fqn) || class_map.insert(fqn.clone(), class).is_some() {
                return Err(Error::InvalidSchema(format!("class {} registered twice", fqn)));
            }
        }

        // Ancestors
        let mut ancestors = Vec::with_capacity(schemas.len());
        for schema in &schemas {
            ancestors.push(resolve_ancestors(schema, &schemas, &by_name)?);
        }
        for (schema, resolved) in schemas.iter_mut().zip(ancestors) {
            schema.ancestors = resolved;
        }

        // Fields: class references, flags, persistent id rules
        for schema in schemas.iter_mut() {
            let entity = schema.name.fqn.clone();
            let mut seen = FxHashSet::default();
            for field in schema.fields.iter_mut() {
                if !seen.insert(field.name.clone()) {
                    return Err(Error::InvalidSchema(format!(
                        "field {}#{} declared twice",
                        entity, field.name
                    )));
                }
                check_type_declared(&field.ty, &class_map)?;
                field.soft_link_bearing =
                    type_contains(&field.ty, &ValueType::PersistentId, &class_map, &mut Vec::new());
                field.url_bearing =
                    type_contains(&field.ty, &ValueType::Url, &class_map, &mut Vec::new());
                if field.jar_directory && !field.url_bearing {
                    return Err(Error::InvalidSchema(format!(
                        "jar directory field {}#{} holds no urls",
                        entity, field.name
                    )));
                }
            }
            let fields = schema.fields.clone();
            if let Some(rule) = schema.persistent_id.as_mut() {
                rule.indices = rule
                    .fields
                    .iter()
                    .map(|f| {
                        fields
                            .iter()
                            .position(|d| &d.name == f)
                            .ok_or_else(|| Error::UnknownField {
                                entity: entity.clone(),
                                field: f.clone(),
                            })
                    })
                    .collect::<Result<Vec<_>>>()?;
            }
        }

        // Parent references, own first, then inherited
        let mut resolved_parents = Vec::with_capacity(schemas.len());
        for schema in &schemas {
            let mut connections: Vec<ParentConnection> = Vec::new();
            let declaring = std::iter::once(schema)
                .chain(schema.ancestors.iter().map(|a| &schemas[a.index()]));
            for owner in declaring {
                for parent_ref in &owner.parents {
                    let connection = resolve_parent_ref(owner, parent_ref, &schemas, &by_name)?;
                    if connections.iter().any(|c| c.field == parent_ref.field) {
                        return Err(Error::InvalidSchema(format!(
                            "parent reference {}#{} declared twice",
                            schema.name, parent_ref.field
                        )));
                    }
                    connections.push(ParentConnection {
                        field: parent_ref.field.clone(),
                        connection,
                    });
                }
            }
            resolved_parents.push(connections);
        }
        for (schema, connections) in schemas.iter_mut().zip(resolved_parents) {
            schema.parent_connections = connections;
        }

        let schemas: Vec<Arc<EntitySchema>> = schemas.into_iter().map(Arc::new).collect();

        let mut connections: Vec<ConnectionId> = Vec::new();
        let mut connection_fields = FxHashMap::default();
        for schema in &schemas {
            for pc in &schema.parent_connections {
                if connection_fields
                    .insert(pc.connection, pc.field.clone())
                    .is_none()
                {
                    connections.push(pc.connection);
                }
            }
        }

        let mut registry = EntityTypeRegistry {
            schemas,
            by_name,
            classes: class_map,
            sources: sources.into_iter().collect(),
            connections,
            connection_fields,
            child_connections: Vec::new(),
            concrete_subtypes: Vec::new(),
        };

        let mut child_connections = Vec::with_capacity(registry.schemas.len());
        let mut concrete_subtypes = Vec::with_capacity(registry.schemas.len());
        for schema in &registry.schemas {
            let tid = schema.type_id;
            child_connections.push(
                registry
                    .connections
                    .iter()
                    .copied()
                    .filter(|c| registry.is_assignable(tid, c.parent))
                    .collect::<Vec<_>>(),
            );
            concrete_subtypes.push(
                registry
                    .schemas
                    .iter()
                    .filter(|s| !s.is_abstract && registry.is_assignable(s.type_id, tid))
                    .map(|s| s.type_id)
                    .collect::<Vec<_>>(),
            );
        }
        registry.child_connections = child_connections;
        registry.concrete_subtypes = concrete_subtypes;

        Ok(Arc::new(registry))
    }
}

fn resolve_ancestors(
    schema: &EntitySchema,
    schemas: &[EntitySchema],
    by_name: &FxHashMap<String, EntityTypeId>,
) -> Result<Vec<EntityTypeId>> {
    let mut result = Vec::new();
    let mut stack: Vec<&str> = schema.supertypes.iter().map(|s| s.as_str()).collect();
    while let Some(name) = stack.pop() {
        let id = *by_name
            .get(name)
            .ok_or_else(|| Error::UnknownEntityType(name.to_string()))?;
        if id == schema.type_id {
            return Err(Error::InvalidSchema(format!(
                "type {} inherits from itself",
                schema.name
            )));
        }
        if result.contains(&id) {
            continue;
        }
        let supertype = &schemas[id.index()];
        if !supertype.is_abstract {
            return Err(Error::InvalidSchema(format!(
                "type {} extends concrete type {}",
                schema.name, supertype.name
            )));
        }
        result.push(id);
        stack.extend(supertype.supertypes.iter().map(|s| s.as_str()));
    }
    Ok(result)
}

fn resolve_parent_ref(
    owner: &EntitySchema,
    parent_ref: &ParentRef,
    schemas: &[EntitySchema],
    by_name: &FxHashMap<String, EntityTypeId>,
) -> Result<ConnectionId> {
    let parent_id = *by_name
        .get(&parent_ref.parent)
        .ok_or_else(|| Error::UnknownEntityType(parent_ref.parent.clone()))?;
    let parent = &schemas[parent_id.index()];
    if !parent_ref.kind.is_abstract() && (parent.is_abstract || owner.is_abstract) {
        return Err(Error::InvalidSchema(format!(
            "reference {}#{} involves an abstract type and needs an abstract connection",
            owner.name, parent_ref.field
        )));
    }
    Ok(ConnectionId::new(
        parent_id,
        owner.type_id,
        parent_ref.kind,
        parent_ref.nullable,
    ))
}

fn check_type_declared(ty: &ValueType, classes: &FxHashMap<String, ValueClass>) -> Result<()> {
    match ty {
        ValueType::Bool
        | ValueType::Int
        | ValueType::String
        | ValueType::Url
        | ValueType::PersistentId => Ok(()),
        ValueType::List(inner) | ValueType::Set(inner) | ValueType::Optional(inner) => {
            check_type_declared(inner, classes)
        }
        ValueType::Map(k, v) => {
            check_type_declared(k, classes)?;
            check_type_declared(v, classes)
        }
        ValueType::Struct(name)
        | ValueType::Sealed(name)
        | ValueType::Object(name)
        | ValueType::Enum(name) => {
            let class = classes
                .get(&name.fqn)
                .ok_or_else(|| Error::UnknownValueClass(name.fqn.clone()))?;
            let matches = matches!(
                (ty, class),
                (ValueType::Struct(_), ValueClass::Struct { .. })
                    | (ValueType::Sealed(_), ValueClass::Sealed { .. })
                    | (ValueType::Object(_), ValueClass::Object { .. })
                    | (ValueType::Enum(_), ValueClass::Enum { .. })
            );
            if !matches {
                return Err(Error::InvalidSchema(format!(
                    "class {} is used as {} but declared differently",
                    name, ty
                )));
            }
            Ok(())
        }
    }
}

fn type_contains(
    ty: &ValueType,
    leaf: &ValueType,
    classes: &FxHashMap<String, ValueClass>,
    visiting: &mut Vec<String>,
) -> bool {
    match ty {
        ValueType::Url | ValueType::PersistentId => ty == leaf,
        ValueType::Bool | ValueType::Int | ValueType::String => false,
        ValueType::List(inner) | ValueType::Set(inner) | ValueType::Optional(inner) => {
            type_contains(inner, leaf, classes, visiting)
        }
        ValueType::Map(k, v) => {
            type_contains(k, leaf, classes, visiting) || type_contains(v, leaf, classes, visiting)
        }
        ValueType::Object(_) | ValueType::Enum(_) => false,
        ValueType::Struct(name) | ValueType::Sealed(name) => {
            if visiting.contains(&name.fqn) {
                return false;
            }
            visiting.push(name.fqn.clone());
            let found = match classes.get(&name.fqn) {
                Some(ValueClass::Struct { fields, .. }) => fields
                    .iter()
                    .any(|(_, t)| type_contains(t, leaf, classes, visiting)),
                Some(ValueClass::Sealed { variants, .. }) => variants.iter().any(|v| {
                    type_contains(&ValueType::Struct(v.clone()), leaf, classes, visiting)
                }),
                _ => false,
            };
            visiting.pop();
            found
        }
    }
}

// ============================================================================
// Registry
// ============================================================================

/// Immutable, validated set of entity types and value classes
#[derive(Debug)]
pub struct EntityTypeRegistry {
    schemas: Vec<Arc<EntitySchema>>,
    by_name: FxHashMap<String, EntityTypeId>,
    classes: FxHashMap<String, ValueClass>,
    sources: FxHashSet<TypeName>,
    connections: Vec<ConnectionId>,
    connection_fields: FxHashMap<ConnectionId, String>,
    child_connections: Vec<Vec<ConnectionId>>,
    concrete_subtypes: Vec<Vec<EntityTypeId>>,
}

impl EntityTypeRegistry {
    /// Start declaring a registry
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::new()
    }

    /// Number of entity types
    pub fn len(&self) -> usize {
        self.schemas.len()
    }

    /// Whether no entity types are registered
    pub fn is_empty(&self) -> bool {
        self.schemas.is_empty()
    }

    /// All schemas in tag order
    pub fn schemas(&self) -> &[Arc<EntitySchema>] {
        &self.schemas
    }

    /// Schema for a tag
    pub fn schema(&self, type_id: EntityTypeId) -> Result<&Arc<EntitySchema>> {
        self.schemas
            .get(type_id.index())
            .ok_or_else(|| Error::UnknownEntityType(format!("#{}", type_id)))
    }

    /// Tag for a type name
    pub fn type_id(&self, fqn: &str) -> Result<EntityTypeId> {
        self.by_name
            .get(fqn)
            .copied()
            .ok_or_else(|| Error::UnknownEntityType(fqn.to_string()))
    }

    /// Schema for a type name
    pub fn schema_by_name(&self, fqn: &str) -> Result<&Arc<EntitySchema>> {
        let id = self.type_id(fqn)?;
        self.schema(id)
    }

    /// Connection behind `child_type#field`
    pub fn connection(&self, child_type: &str, field: &str) -> Result<ConnectionId> {
        self.schema_by_name(child_type)?.connection(field)
    }

    /// Every connection declared by any schema
    pub fn connections(&self) -> &[ConnectionId] {
        &self.connections
    }

    /// Name of the child-side reference of a connection
    pub fn connection_field(&self, connection: ConnectionId) -> Option<&str> {
        self.connection_fields.get(&connection).map(|s| s.as_str())
    }

    /// Connections in which entities of `type_id` can be the parent
    pub fn child_connections(&self, type_id: EntityTypeId) -> &[ConnectionId] {
        self.child_connections
            .get(type_id.index())
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    /// Concrete types assignable to `type_id` (itself included when concrete)
    pub fn concrete_subtypes(&self, type_id: EntityTypeId) -> &[EntityTypeId] {
        self.concrete_subtypes
            .get(type_id.index())
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    /// Whether `concrete` is `declared` or one of its subtypes
    pub fn is_assignable(&self, concrete: EntityTypeId, declared: EntityTypeId) -> bool {
        if concrete == declared {
            return true;
        }
        self.schemas
            .get(concrete.index())
            .map(|s| s.ancestors.contains(&declared))
            .unwrap_or(false)
    }

    /// Value class by name
    pub fn value_class(&self, fqn: &str) -> Option<&ValueClass> {
        self.classes.get(fqn)
    }

    /// Registered value classes
    pub fn value_classes(&self) -> impl Iterator<Item = &ValueClass> {
        self.classes.values()
    }

    /// Whether a class of any kind is known to this registry
    pub fn is_registered(&self, name: &TypeName) -> bool {
        if let Some(id) = self.by_name.get(&name.fqn) {
            return self.schemas[id.index()].name == *name;
        }
        if let Some(class) = self.classes.get(&name.fqn) {
            return class.name() == name;
        }
        if self.sources.contains(name) {
            return true;
        }
        self.schemas.iter().any(|s| {
            s.persistent_id
                .as_ref()
                .map(|r| r.class == *name)
                .unwrap_or(false)
        })
    }

    /// Look up any registered class by name, returning its full identity
    pub fn lookup_class(&self, fqn: &str) -> Option<TypeName> {
        if let Some(id) = self.by_name.get(fqn) {
            return Some(self.schemas[id.index()].name.clone());
        }
        if let Some(class) = self.classes.get(fqn) {
            return Some(class.name().clone());
        }
        if let Some(source) = self.sources.iter().find(|s| s.fqn == fqn) {
            return Some(source.clone());
        }
        self.schemas
            .iter()
            .filter_map(|s| s.persistent_id.as_ref())
            .find(|r| r.class.fqn == fqn)
            .map(|r| r.class.clone())
    }

    /// Check a value against a declared type
    pub fn check_value(&self, ty: &ValueType, value: &Value) -> bool {
        match (ty, value) {
            (ValueType::Optional(_), Value::Null) => true,
            (ValueType::Optional(inner), v) => self.check_value(inner, v),
            (ValueType::Bool, Value::Bool(_))
            | (ValueType::Int, Value::Int(_))
            | (ValueType::String, Value::String(_))
            | (ValueType::Url, Value::Url(_))
            | (ValueType::PersistentId, Value::PersistentId(_)) => true,
            (ValueType::List(inner), Value::List(items)) => {
                items.iter().all(|v| self.check_value(inner, v))
            }
            (ValueType::Set(inner), Value::Set(items)) => {
                items.iter().all(|v| self.check_value(inner, v))
            }
            (ValueType::Map(k, v), Value::Map(entries)) => entries
                .iter()
                .all(|(ek, ev)| self.check_value(k, ek) && self.check_value(v, ev)),
            (ValueType::Struct(name), Value::Struct { class, fields }) => {
                name == class && self.check_struct(class, fields)
            }
            (ValueType::Sealed(name), Value::Struct { class, fields }) => {
                self.is_variant(name, class) && self.check_struct(class, fields)
            }
            (ValueType::Sealed(name), Value::Object(class)) => {
                self.is_variant(name, class)
                    && matches!(self.classes.get(&class.fqn), Some(ValueClass::Object { .. }))
            }
            (ValueType::Object(name), Value::Object(class)) => name == class,
            (ValueType::Enum(name), Value::Enum { class, variant }) => {
                name == class
                    && matches!(
                        self.classes.get(&class.fqn),
                        Some(ValueClass::Enum { variants, .. }) if variants.contains(variant)
                    )
            }
            _ => false,
        }
    }

    fn check_struct(&self, class: &TypeName, fields: &[Value]) -> bool {
        match self.classes.get(&class.fqn) {
            Some(ValueClass::Struct { name, fields: decl }) => {
                name == class
                    && decl.len() == fields.len()
                    && decl
                        .iter()
                        .zip(fields)
                        .all(|((_, t), v)| self.check_value(t, v))
            }
            _ => false,
        }
    }

    fn is_variant(&self, sealed: &TypeName, class: &TypeName) -> bool {
        matches!(
            self.classes.get(&sealed.fqn),
            Some(ValueClass::Sealed { variants, .. }) if variants.contains(class)
        )
    }

    /// Visit every persistent id and url leaf of `value`, guided by `ty`
    pub fn walk_leaves<'v>(&self, ty: &ValueType, value: &'v Value, visit: &mut dyn FnMut(&'v Value)) {
        match (ty, value) {
            (_, Value::Null) => {}
            (ValueType::PersistentId, v @ Value::PersistentId(_))
            | (ValueType::Url, v @ Value::Url(_)) => visit(v),
            (ValueType::Optional(inner), v) => self.walk_leaves(inner, v, visit),
            (ValueType::List(inner), Value::List(items)) => {
                for item in items {
                    self.walk_leaves(inner, item, visit);
                }
            }
            (ValueType::Set(inner), Value::Set(items)) => {
                for item in items {
                    self.walk_leaves(inner, item, visit);
                }
            }
            (ValueType::Map(kt, vt), Value::Map(entries)) => {
                for (k, v) in entries {
                    self.walk_leaves(kt, k, visit);
                    self.walk_leaves(vt, v, visit);
                }
            }
            (ValueType::Struct(_) | ValueType::Sealed(_), Value::Struct { class, fields }) => {
                if let Some(ValueClass::Struct { fields: decl, .. }) = self.classes.get(&class.fqn) {
                    for ((_, t), v) in decl.iter().zip(fields) {
                        self.walk_leaves(t, v, visit);
                    }
                }
            }
            _ => {}
        }
    }

    /// Persistent ids embedded in `value`
    pub fn soft_links(&self, ty: &ValueType, value: &Value, out: &mut BTreeSet<PersistentId>) {
        self.walk_leaves(ty, value, &mut |leaf| {
            if let Value::PersistentId(pid) = leaf {
                out.insert(pid.clone());
            }
        });
    }

    /// Urls embedded in `value`
    pub fn urls(&self, ty: &ValueType, value: &Value, out: &mut BTreeSet<VirtualFileUrl>) {
        self.walk_leaves(ty, value, &mut |leaf| {
            if let Value::Url(url) = leaf {
                out.insert(url.clone());
            }
        });
    }
}
