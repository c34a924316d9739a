//! Durability layer for the workspace model
//!
//! This crate handles everything that touches bytes and disk:
//!
//! - Binary cache of a frozen snapshot, restored against the running type
//!   registry by class name rather than type numbering
//! - Change log streams, replayed onto a restored cache
//! - Contributor versions: feature-owned invalidation tokens
//! - Cache file I/O with crash-safe saves
//! - `wsmodel.toml` configuration

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod cache_file; // Crash-safe cache file save/load
pub mod config; // wsmodel.toml
pub mod error; // CacheError taxonomy
pub mod format; // Byte format: header, type table, blocks, checksum
pub mod resolver; // Class identity across processes
pub mod serializer; // Snapshot and change log (de)serialization

pub use cache_file::{CacheFile, CacheLoad};
pub use config::{CacheConfig, ConsistencyCheck, CONFIG_FILE_NAME, DEFAULT_BUFFER_SIZE, DEFAULT_CACHE_FILE_NAME};
pub use error::{CacheError, Result};
pub use format::{ContributorVersions, CACHE_FORMAT_VERSION};
pub use resolver::{EntityTypesResolver, RegistryTypesResolver};
pub use serializer::{CacheSerializer, SerializationResult};
