//! Sample registry and entity constructors

use std::sync::Arc;
use wsmodel_core::{
    ConnectionKind, EntityData, EntitySchema, EntitySource, EntityTypeRegistry, FieldSchema,
    InterningUrlManager, PersistentId, TypeName, Value, ValueClass, ValueType, VirtualFileUrl,
    VirtualFileUrlManager,
};

/// Registry used across the test suites
///
/// Types in registration order:
/// - `Module` (key `name`, persistent id `ModuleId`, soft links in `dependencies`)
/// - `RootBase` (abstract, non-nullable parent `module`)
/// - `ContentRoot`, `SourceRoot` (extend `RootBase`)
/// - `Facet` (nullable one-to-many parent `module`)
/// - `Library` (persistent id `LibraryId`, jar directories)
/// - `Parent`, `Child` (non-nullable one-to-one)
/// - `ModuleSettings` (nullable one-to-one parent `module`)
pub fn sample_registry() -> Arc<EntityTypeRegistry> {
    registry_from(sample_schemas())
}

/// Same declarations as [`sample_registry`], entity types registered in
/// reverse order so every type gets a different tag
pub fn reversed_registry() -> Arc<EntityTypeRegistry> {
    let mut schemas = sample_schemas();
    schemas.reverse();
    registry_from(schemas)
}

fn registry_from(schemas: Vec<EntitySchema>) -> Arc<EntityTypeRegistry> {
    let mut builder = EntityTypeRegistry::builder();
    builder
        .source_class(TypeName::new("ProjectSource"))
        .value_class(ValueClass::Enum {
            name: TypeName::new("DependencyScope"),
            variants: vec!["COMPILE".to_string(), "TEST".to_string()],
        })
        .value_class(ValueClass::Struct {
            name: TypeName::new("ModuleDependency"),
            fields: vec![
                ("module".to_string(), ValueType::PersistentId),
                ("scope".to_string(), ValueType::Enum(TypeName::new("DependencyScope"))),
            ],
        })
        .value_class(ValueClass::Object {
            name: TypeName::new("SdkDependency"),
        })
        .value_class(ValueClass::Sealed {
            name: TypeName::new("Dependency"),
            variants: vec![TypeName::new("ModuleDependency"), TypeName::new("SdkDependency")],
        });
    for schema in schemas {
        builder.register(schema);
    }
    match builder.build() {
        Ok(registry) => registry,
        Err(e) => panic!("sample registry is invalid: {}", e),
    }
}

fn sample_schemas() -> Vec<EntitySchema> {
    vec![
        EntitySchema::new(TypeName::new("Module"))
            .field(FieldSchema::new("name", ValueType::String).key())
            .field(FieldSchema::new(
                "dependencies",
                ValueType::list(ValueType::Sealed(TypeName::new("Dependency"))),
            ))
            .persistent_id(TypeName::new("ModuleId"), &["name"]),
        EntitySchema::new(TypeName::new("RootBase")).abstract_type().parent(
            "module",
            "Module",
            ConnectionKind::AbstractOneToMany,
            false,
        ),
        EntitySchema::new(TypeName::new("ContentRoot"))
            .extends("RootBase")
            .field(FieldSchema::new("url", ValueType::Url).key())
            .field(FieldSchema::new("excluded", ValueType::list(ValueType::Url))),
        EntitySchema::new(TypeName::new("SourceRoot"))
            .extends("RootBase")
            .field(FieldSchema::new("url", ValueType::Url).key())
            .field(FieldSchema::new("kind", ValueType::String)),
        EntitySchema::new(TypeName::new("Facet"))
            .field(FieldSchema::new("name", ValueType::String))
            .parent("module", "Module", ConnectionKind::OneToMany, true),
        EntitySchema::new(TypeName::new("Library"))
            .field(FieldSchema::new("name", ValueType::String).key())
            .field(FieldSchema::new("roots", ValueType::list(ValueType::Url)))
            .field(FieldSchema::new("jar_dirs", ValueType::list(ValueType::Url)).jar_directory())
            .persistent_id(TypeName::new("LibraryId"), &["name"]),
        EntitySchema::new(TypeName::new("Parent")).field(FieldSchema::new("name", ValueType::String)),
        EntitySchema::new(TypeName::new("Child"))
            .field(FieldSchema::new("data", ValueType::String))
            .parent("parent", "Parent", ConnectionKind::OneToOne, false),
        EntitySchema::new(TypeName::new("ModuleSettings"))
            .field(FieldSchema::new("output", ValueType::optional(ValueType::Url)))
            .parent("module", "Module", ConnectionKind::OneToOne, true),
    ]
}

fn build(registry: &EntityTypeRegistry, type_name: &str, fields: &[(&str, Value)]) -> EntityData {
    let mut data = match EntityData::create(registry, type_name, source("main")) {
        Ok(data) => data,
        Err(e) => panic!("cannot create {}: {}", type_name, e),
    };
    for (field, value) in fields {
        if let Err(e) = data.set(field, value.clone()) {
            panic!("cannot set {}#{}: {}", type_name, field, e);
        }
    }
    data
}

/// Project source with a name payload
pub fn source(name: &str) -> EntitySource {
    EntitySource::new(TypeName::new("ProjectSource"), vec![Value::string(name)])
}

/// Url through a fresh interning manager
pub fn url(raw: &str) -> VirtualFileUrl {
    InterningUrlManager::new().from_url(raw)
}

/// Persistent id of a module
pub fn module_id(name: &str) -> PersistentId {
    PersistentId::new(TypeName::new("ModuleId"), vec![Value::string(name)])
}

/// Module without dependencies
pub fn module(registry: &EntityTypeRegistry, name: &str) -> EntityData {
    module_with_deps(registry, name, &[])
}

/// Module depending on other modules by persistent id
pub fn module_with_deps(registry: &EntityTypeRegistry, name: &str, deps: &[&str]) -> EntityData {
    let dependencies = deps
        .iter()
        .map(|dep| Value::Struct {
            class: TypeName::new("ModuleDependency"),
            fields: vec![
                Value::PersistentId(module_id(dep)),
                Value::Enum {
                    class: TypeName::new("DependencyScope"),
                    variant: "COMPILE".to_string(),
                },
            ],
        })
        .chain(std::iter::once(Value::Object(TypeName::new("SdkDependency"))))
        .collect();
    build(
        registry,
        "Module",
        &[("name", Value::string(name)), ("dependencies", Value::List(dependencies))],
    )
}

/// Content root at `raw_url`
pub fn content_root(registry: &EntityTypeRegistry, raw_url: &str) -> EntityData {
    build(
        registry,
        "ContentRoot",
        &[("url", Value::Url(url(raw_url))), ("excluded", Value::List(Vec::new()))],
    )
}

/// Facet with a name
pub fn facet(registry: &EntityTypeRegistry, name: &str) -> EntityData {
    build(registry, "Facet", &[("name", Value::string(name))])
}

/// Library with one class root and one jar directory
pub fn library(registry: &EntityTypeRegistry, name: &str, root: &str, jar_dir: &str) -> EntityData {
    build(
        registry,
        "Library",
        &[
            ("name", Value::string(name)),
            ("roots", Value::List(vec![Value::Url(url(root))])),
            ("jar_dirs", Value::List(vec![Value::Url(url(jar_dir))])),
        ],
    )
}

/// `Parent` entity
pub fn parent(registry: &EntityTypeRegistry, name: &str) -> EntityData {
    build(registry, "Parent", &[("name", Value::string(name))])
}

/// `Child` entity
pub fn child(registry: &EntityTypeRegistry, data: &str) -> EntityData {
    build(registry, "Child", &[("data", Value::string(data))])
}

/// Module settings with an optional output url
pub fn settings(registry: &EntityTypeRegistry, output: Option<&str>) -> EntityData {
    let output = output.map(|raw| Value::Url(url(raw))).unwrap_or(Value::Null);
    build(registry, "ModuleSettings", &[("output", output)])
}
