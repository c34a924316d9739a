//! On-disk byte format of the workspace model cache
//!
//! # Binary Format
//!
//! ```text
//! +--------------------------------------+
//! | Format version (4 + N)               |  plain string, checked first
//! +--------------------------------------+
//! | Contributor versions (4 + N)         |  MessagePack map
//! +--------------------------------------+
//! | Type table                           |  see `type_table`
//! +--------------------------------------+
//! | Block 1 .. Block K                   |  tag(1) + len(4) + payload
//! +--------------------------------------+
//! | CRC32 (4)                            |  over every preceding byte
//! +--------------------------------------+
//! ```
//!
//! Snapshot caches carry the eight blocks of [`blocks::SNAPSHOT_BLOCKS`];
//! change log files carry a single `CHANGE_LOG` block.
//!
//! # Design Notes
//!
//! - The format version is read before the checksum is verified, so a cache
//!   written by another version is reported as a miss instead of corruption.
//! - Instance data refers to classes by type-table position only; the
//!   engine's type numbering never reaches the disk.

pub(crate) mod blocks;
pub(crate) mod change_log;
pub(crate) mod codec;
pub(crate) mod primitives;
pub(crate) mod type_table;

pub use blocks::{block_name, block_tags, SNAPSHOT_BLOCKS};
pub use codec::{value_tags, MAX_VALUE_DEPTH};

use crate::error::{CacheError, Result};
use primitives::{write_bytes, write_str, ByteReader};
use std::collections::BTreeMap;

/// Version string every cache starts with
///
/// Bump whenever the byte layout changes; older caches then read as a miss.
pub const CACHE_FORMAT_VERSION: &str = "wsm-cache-v1";

/// Size of the CRC32 footer
pub const CHECKSUM_SIZE: usize = 4;

/// Contributor versions as stored in the header
pub type ContributorVersions = BTreeMap<String, String>;

/// Write the header fields that precede the type table
pub(crate) fn write_header(out: &mut Vec<u8>, version: &str, contributors: &ContributorVersions) -> Result<()> {
    write_str(out, version)?;
    let encoded = rmp_serde::to_vec(contributors)
        .map_err(|e| CacheError::Corrupted(format!("cannot encode contributor versions: {}", e)))?;
    write_bytes(out, &encoded)
}

pub(crate) fn read_contributors(reader: &mut ByteReader<'_>) -> Result<ContributorVersions> {
    let encoded = reader.read_bytes("contributor versions")?;
    rmp_serde::from_slice(encoded)
        .map_err(|e| CacheError::Corrupted(format!("invalid contributor versions: {}", e)))
}

/// Append the CRC32 footer
pub(crate) fn seal(mut out: Vec<u8>) -> Vec<u8> {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&out);
    let crc = hasher.finalize();
    out.extend_from_slice(&crc.to_le_bytes());
    out
}

/// Verify the CRC32 footer and return the bytes it covers
pub(crate) fn unseal(data: &[u8]) -> Result<&[u8]> {
    if data.len() < CHECKSUM_SIZE {
        return Err(CacheError::Truncated("checksum"));
    }
    let (body, footer) = data.split_at(data.len() - CHECKSUM_SIZE);
    let stored = u32::from_le_bytes([footer[0], footer[1], footer[2], footer[3]]);
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(body);
    let computed = hasher.finalize();
    if stored != computed {
        return Err(CacheError::ChecksumMismatch { stored, computed });
    }
    Ok(body)
}

/// Contributor check: every token the cache recorded must still be present
/// with the same value. Tokens added since the cache was written are
/// tolerated.
pub(crate) fn contributors_mismatch(
    cached: &ContributorVersions,
    current: &ContributorVersions,
) -> Option<String> {
    cached.iter().find_map(|(token, version)| match current.get(token) {
        None => Some(format!("contributor {} is gone", token)),
        Some(now) if now != version => Some(format!(
            "contributor {} changed from {} to {}",
            token, version, now
        )),
        Some(_) => None,
    })
}
