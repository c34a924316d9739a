//! Cache error types
//!
//! A version or contributor mismatch is not an error: deserialization
//! returns `Ok(None)` and the caller rebuilds from the source of truth.
//! Everything here is a structural failure. The cache file that produced
//! it must be discarded, not read again.

use thiserror::Error;
use wsmodel_concurrency::MergeError;

/// Result type alias for cache operations
pub type Result<T> = std::result::Result<T, CacheError>;

/// Structural failures while reading or writing a cache
#[derive(Debug, Error)]
pub enum CacheError {
    /// Underlying stream failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Stream ended before a complete structure was read
    #[error("Cache truncated while reading {0}")]
    Truncated(&'static str),

    /// Footer checksum does not match the content
    #[error("Checksum mismatch: stored {stored:#010x}, computed {computed:#010x}")]
    ChecksumMismatch {
        /// CRC32 stored in the footer
        stored: u32,
        /// CRC32 computed over the content
        computed: u32,
    },

    /// Bytes decode to something impossible (bad tag, bad index, trailing data)
    #[error("Corrupted cache: {0}")]
    Corrupted(String),

    /// A class in the type table has no runtime counterpart
    #[error("Cannot resolve class {fqn} (plugin {plugin:?})")]
    UnresolvedType {
        /// Fully-qualified class name
        fqn: String,
        /// Owning plugin, if any
        plugin: Option<String>,
    },

    /// A class met while writing is not registered for serialization
    #[error("Class {0} is not registered for serialization")]
    UnregisteredType(String),

    /// Configuration file is unreadable or invalid
    #[error("Invalid cache configuration: {0}")]
    InvalidConfig(String),

    /// Restored data violates an engine invariant
    #[error(transparent)]
    Engine(#[from] wsmodel_core::Error),

    /// A decoded change log could not be replayed onto the restored store
    #[error("Cannot replay change log: {0}")]
    Replay(#[from] MergeError),
}

impl CacheError {
    /// Map a read error, reporting an early end of stream as truncation
    pub(crate) fn from_read(err: std::io::Error, context: &'static str) -> Self {
        if err.kind() == std::io::ErrorKind::UnexpectedEof {
            CacheError::Truncated(context)
        } else {
            CacheError::Io(err)
        }
    }

    /// Whether the cache that produced this error should be deleted
    ///
    /// I/O failures on the stream say nothing about the file content.
    pub fn invalidates_cache(&self) -> bool {
        !matches!(self, CacheError::Io(_) | CacheError::InvalidConfig(_))
    }
}
