//! Storage layer for the workspace model
//!
//! This crate implements the versioned entity graph with:
//! - ImmutableEntityFamily / MutableEntityFamily: per-type slot vectors
//! - RefsTable: parent/child references per connection
//! - StorageIndexes: entity source, soft link, url and persistent id indexes
//! - ChangeLog: collapsed per-entity record of a builder's mutations
//! - Snapshot / Builder: immutable state and the transaction producing it
//! - EntityStorage: read API shared by snapshots and builders
//! - VersionedStorage: current snapshot with version tracking
//!
//! # Structural Sharing
//!
//! Families, connection tables and indexes sit behind `Arc` and are copied
//! on first write. Deriving a snapshot from a builder costs a clone per
//! type and connection; untouched ones stay shared across the lineage.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod builder;
pub mod change_log;
pub mod consistency;
pub mod entity;
pub mod family;
pub mod indexes;
pub mod refs;
pub mod snapshot;
pub mod storage;
pub mod testing;
pub mod versioned;

pub use builder::Builder;
pub use change_log::{ChangeEntry, ChangeLog, EntityChange, Replacement};
pub use consistency::ConsistencyIssue;
pub use entity::{Entity, ModifiableEntity, NewEntity};
pub use family::{EntitySlot, FamilyIter, ImmutableEntityFamily, MutableEntityFamily};
pub use indexes::{EntitySourceIndex, PersistentIdIndex, SoftLinkIndex, StorageIndexes, VirtualFileIndex};
pub use refs::{ChildList, ConnectionTable, RefsTable};
pub use snapshot::Snapshot;
pub use storage::{describe, describe_all, Children, Entities, EntityDescription, EntityStorage};
pub use versioned::VersionedStorage;
