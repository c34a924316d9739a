//! wsmodel - versioned entity graph store for workspace models
//!
//! Stores the project structure of a workspace (modules, roots, facets,
//! libraries) as a typed entity graph with parent/child references,
//! content-derived persistent ids and auxiliary indexes. Every change goes
//! through a [`Builder`] and produces an immutable [`Snapshot`] that shares
//! everything it did not touch with its ancestors.
//!
//! # Quick Start
//!
//! ```ignore
//! use wsmodel::{Builder, EntityData, EntityStorage, EntityTypeRegistry};
//!
//! let registry = /* EntityTypeRegistry::builder() ... .build()? */;
//! let mut builder = Builder::new(registry.clone());
//! let app = builder.add_entity(EntityData::create(&registry, "Module", source)?.with("name", "app")?, &[])?;
//! let snapshot = builder.freeze();
//! assert_eq!(snapshot.entities_named("Module")?.count(), 1);
//! ```
//!
//! # Architecture
//!
//! - `wsmodel-core`: ids, values, schemas and the type registry
//! - `wsmodel-storage`: families, references, indexes, change log, snapshot, builder
//! - `wsmodel-concurrency`: change log replay and merging of divergent builders
//! - `wsmodel-durability`: binary cache of snapshots and change logs

pub use wsmodel_concurrency::{
    merge_builders, rebase, ChangeLogReplayer, MergeError, MergePolicy, MergeReport,
};
pub use wsmodel_core::{
    ConnectionId, ConnectionKind, EntityData, EntityId, EntitySchema, EntitySource,
    EntityTypeId, EntityTypeRegistry, Error, FieldSchema, InterningUrlManager, PersistentId,
    Result, TypeName, Value, ValueClass, ValueType, VirtualFileUrl, VirtualFileUrlManager,
};
pub use wsmodel_durability::{
    CacheConfig, CacheError, CacheFile, CacheLoad, CacheSerializer, ConsistencyCheck,
    ContributorVersions, EntityTypesResolver, RegistryTypesResolver, SerializationResult,
};
pub use wsmodel_storage::{
    Builder, ChangeEntry, ChangeLog, EntityStorage, Snapshot, VersionedStorage,
};
