//! Core types for the workspace model
//!
//! This crate defines the foundational types shared by every layer:
//! - EntityId / EntityTypeId / ConnectionId: identifiers
//! - Value / ValueType / TypeName: field values and declared types
//! - EntitySource / PersistentId: provenance and stable identity
//! - VirtualFileUrl / VirtualFileUrlManager: segment-interned urls
//! - EntitySchema / EntityTypeRegistry: explicit, build-time type registry
//! - EntityData: per-entity field bag with three equality axes
//! - Error: validation and operation errors

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod entity_data;
pub mod error;
pub mod identity;
pub mod schema;
pub mod types;
pub mod url;
pub mod value;

pub use entity_data::EntityData;
pub use error::{Error, Result};
pub use identity::{EntitySource, PersistentId};
pub use schema::{
    EntitySchema, EntityTypeRegistry, FieldSchema, ParentConnection, ParentRef, PersistentIdRule,
    RegistryBuilder, ValueClass,
};
pub use types::{ConnectionId, ConnectionKind, EntityId, EntityTypeId};
pub use url::{InterningUrlManager, VirtualFileUrl, VirtualFileUrlManager};
pub use value::{TypeName, Value, ValueType};
