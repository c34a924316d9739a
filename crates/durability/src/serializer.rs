//! Workspace model cache serializer
//!
//! Writes a frozen snapshot (or a builder's change log) into one sealed,
//! self-describing byte stream and restores it against the running type
//! registry.
//!
//! # Outcomes
//!
//! | Reading                                   | Result                 |
//! |-------------------------------------------|------------------------|
//! | cache restored                            | `Ok(Some(builder))`    |
//! | other format version, contributor changed | `Ok(None)` (a miss)    |
//! | bad bytes, unknown class, broken graph    | `Err(CacheError)`      |
//!
//! Writing never touches the output stream until the whole cache has been
//! encoded in memory, so a failed write leaves the stream untouched.

use crate::config::{CacheConfig, ConsistencyCheck};
use crate::error::{CacheError, Result};
use crate::format::blocks::{
    block_name, block_tags, encode_block, read_block, write_block, SnapshotParts, SNAPSHOT_BLOCKS,
};
use crate::format::change_log::{decode_change_log, encode_change_log};
use crate::format::codec::{EntityDecoder, EntityEncoder};
use crate::format::primitives::ByteReader;
use crate::format::type_table::{ResolvedTypes, TypeTableWriter};
use crate::format::{
    contributors_mismatch, read_contributors, seal, unseal, write_header, ContributorVersions,
    CACHE_FORMAT_VERSION,
};
use crate::resolver::EntityTypesResolver;
use std::fmt;
use std::io::{Read, Write};
use std::sync::Arc;
use tracing::{debug, info, trace, warn};
use wsmodel_concurrency::ChangeLogReplayer;
use wsmodel_core::{EntityTypeRegistry, VirtualFileUrlManager};
use wsmodel_storage::{Builder, ChangeLog, EntityStorage, Snapshot};

/// Outcome of a cache write
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SerializationResult {
    /// Cache written
    Success {
        /// Bytes written to the stream
        size: usize,
    },
    /// Nothing usable was written
    Fail(String),
}

impl SerializationResult {
    /// Whether the cache was written
    pub fn is_success(&self) -> bool {
        matches!(self, SerializationResult::Success { .. })
    }
}

type VersionsContributor = Box<dyn Fn() -> ContributorVersions + Send + Sync>;

/// Binary cache serializer for snapshots and change logs
pub struct CacheSerializer {
    registry: Arc<EntityTypeRegistry>,
    resolver: Arc<dyn EntityTypesResolver>,
    url_manager: Arc<dyn VirtualFileUrlManager>,
    versions: VersionsContributor,
    format_version: String,
    consistency: ConsistencyCheck,
}

impl fmt::Debug for CacheSerializer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheSerializer")
            .field("types", &self.registry.len())
            .field("format_version", &self.format_version)
            .field("consistency", &self.consistency)
            .finish()
    }
}

impl CacheSerializer {
    /// Serializer restoring against `registry`
    pub fn new(
        registry: Arc<EntityTypeRegistry>,
        resolver: Arc<dyn EntityTypesResolver>,
        url_manager: Arc<dyn VirtualFileUrlManager>,
    ) -> Self {
        CacheSerializer {
            registry,
            resolver,
            url_manager,
            versions: Box::new(ContributorVersions::new),
            format_version: CACHE_FORMAT_VERSION.to_string(),
            consistency: ConsistencyCheck::Trace,
        }
    }

    /// Serializer configured from a `wsmodel.toml`
    pub fn from_config(
        registry: Arc<EntityTypeRegistry>,
        resolver: Arc<dyn EntityTypesResolver>,
        url_manager: Arc<dyn VirtualFileUrlManager>,
        config: &CacheConfig,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self::new(registry, resolver, url_manager)
            .with_format_version(config.format_version())
            .with_consistency_check(config.consistency_mode()?))
    }

    /// Source of the contributor versions written into every cache
    ///
    /// Called once per write and once per read.
    pub fn with_versions_contributor<F>(mut self, contributor: F) -> Self
    where
        F: Fn() -> ContributorVersions + Send + Sync + 'static,
    {
        self.versions = Box::new(contributor);
        self
    }

    /// Override the format version tag
    pub fn with_format_version(mut self, version: impl Into<String>) -> Self {
        self.format_version = version.into();
        self
    }

    /// When restored stores get a full consistency pass
    pub fn with_consistency_check(mut self, mode: ConsistencyCheck) -> Self {
        self.consistency = mode;
        self
    }

    /// Registry caches are restored against
    pub fn registry(&self) -> &Arc<EntityTypeRegistry> {
        &self.registry
    }

    // ========================================================================
    // Snapshots
    // ========================================================================

    /// Write `snapshot` to `writer`
    pub fn serialize_cache<W: Write>(&self, writer: &mut W, snapshot: &Snapshot) -> SerializationResult {
        let encoded = self.encode_snapshot(snapshot);
        self.write_out(writer, encoded, "cache")
    }

    /// Encode `snapshot` into a sealed cache
    pub fn encode_snapshot(&self, snapshot: &Snapshot) -> Result<Vec<u8>> {
        let registry = snapshot.registry();
        let mut table = TypeTableWriter::new(registry, &*self.resolver);
        let mut body = Vec::new();
        for tag in SNAPSHOT_BLOCKS {
            let mut enc = EntityEncoder::new(&mut table, registry);
            encode_block(tag, snapshot, &mut enc)?;
            let payload = enc.finish();
            trace!(block = block_name(tag), size = payload.len(), "encoded block");
            write_block(&mut body, tag, &payload)?;
        }
        let out = self.seal_stream(&table, body)?;
        debug!(
            types = table.len(),
            entities = snapshot.all_entities().count(),
            size = out.len(),
            "Encoded workspace model cache"
        );
        Ok(out)
    }

    /// Restore a builder from `reader`
    ///
    /// The builder holds an `AddEntity` entry per restored entity, so it can
    /// be applied as a diff onto an empty store.
    pub fn deserialize_cache<R: Read>(&self, reader: &mut R) -> Result<Option<Builder>> {
        let data = read_all(reader)?;
        self.decode_cache(&data)
    }

    /// Restore a builder from an in-memory cache
    pub fn decode_cache(&self, data: &[u8]) -> Result<Option<Builder>> {
        let Some(snapshot) = self.decode_snapshot(data)? else {
            return Ok(None);
        };
        let builder = Builder::restored(&snapshot);
        self.check_consistency(&builder)?;
        Ok(Some(builder))
    }

    fn decode_snapshot(&self, data: &[u8]) -> Result<Option<Snapshot>> {
        let Some((types, mut reader)) = self.open(data)? else {
            return Ok(None);
        };
        let mut parts = SnapshotParts::default();
        for tag in SNAPSHOT_BLOCKS {
            let payload = read_block(&mut reader, tag)?;
            let mut dec = EntityDecoder::new(payload, &types, &self.registry, &*self.url_manager);
            parts.decode_block(tag, &mut dec)?;
            dec.finish(block_name(tag))?;
        }
        reader.expect_end("cache")?;
        let snapshot = parts.into_snapshot(Arc::clone(&self.registry))?;
        debug!(
            types = types.len(),
            entities = snapshot.all_entities().count(),
            size = data.len(),
            "Restored workspace model cache"
        );
        Ok(Some(snapshot))
    }

    fn check_consistency(&self, builder: &Builder) -> Result<()> {
        if !self.consistency.is_active() {
            return Ok(());
        }
        let issues = builder.assert_consistency();
        match issues.first() {
            None => Ok(()),
            Some(first) => Err(CacheError::Corrupted(format!(
                "restored store has {} consistency issue(s), first: {}",
                issues.len(),
                first
            ))),
        }
    }

    // ========================================================================
    // Change logs
    // ========================================================================

    /// Write the change log of `builder` to `writer`
    pub fn serialize_change_log<W: Write>(&self, writer: &mut W, builder: &Builder) -> SerializationResult {
        let encoded = self.encode_change_log(builder.registry(), builder.change_log());
        self.write_out(writer, encoded, "change log")
    }

    fn encode_change_log(&self, registry: &EntityTypeRegistry, log: &ChangeLog) -> Result<Vec<u8>> {
        let mut table = TypeTableWriter::new(registry, &*self.resolver);
        let mut enc = EntityEncoder::new(&mut table, registry);
        encode_change_log(log, &mut enc)?;
        let payload = enc.finish();
        let mut body = Vec::new();
        write_block(&mut body, block_tags::CHANGE_LOG, &payload)?;
        let out = self.seal_stream(&table, body)?;
        debug!(types = table.len(), changes = log.len(), size = out.len(), "Encoded change log");
        Ok(out)
    }

    /// Read a change log written by [`serialize_change_log`](Self::serialize_change_log)
    pub fn deserialize_change_log<R: Read>(&self, reader: &mut R) -> Result<Option<ChangeLog>> {
        let data = read_all(reader)?;
        let Some((types, mut reader)) = self.open(&data)? else {
            return Ok(None);
        };
        let payload = read_block(&mut reader, block_tags::CHANGE_LOG)?;
        reader.expect_end("change log stream")?;
        let mut dec = EntityDecoder::new(payload, &types, &self.registry, &*self.url_manager);
        let log = decode_change_log(&mut dec)?;
        dec.finish("change log")?;
        debug!(types = types.len(), changes = log.len(), "Restored change log");
        Ok(Some(log))
    }

    /// Restore the cache in `store`, then replay the change log in `log`
    ///
    /// A miss on either stream is a miss for both.
    pub fn deserialize_cache_and_diff_log<S: Read, L: Read>(
        &self,
        store: &mut S,
        log: &mut L,
    ) -> Result<Option<Builder>> {
        let Some(mut builder) = self.deserialize_cache(store)? else {
            return Ok(None);
        };
        let Some(log) = self.deserialize_change_log(log)? else {
            return Ok(None);
        };
        let report = ChangeLogReplayer::new(&log).replay(&mut builder)?;
        debug!(
            applied = report.applied,
            skipped = report.skipped.len(),
            "Replayed change log onto restored cache"
        );
        self.check_consistency(&builder)?;
        Ok(Some(builder))
    }

    // ========================================================================
    // Stream envelope
    // ========================================================================

    fn seal_stream(&self, table: &TypeTableWriter<'_>, body: Vec<u8>) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(body.len() + 64);
        write_header(&mut out, &self.format_version, &(self.versions)())?;
        table.write_to(&mut out)?;
        out.extend_from_slice(&body);
        Ok(seal(out))
    }

    fn write_out<W: Write>(&self, writer: &mut W, encoded: Result<Vec<u8>>, what: &str) -> SerializationResult {
        let bytes = match encoded {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(error = %e, "Discarding {} write", what);
                return SerializationResult::Fail(e.to_string());
            }
        };
        match writer.write_all(&bytes).and_then(|_| writer.flush()) {
            Ok(()) => SerializationResult::Success { size: bytes.len() },
            Err(e) => {
                warn!(error = %e, "Failed to write {}", what);
                SerializationResult::Fail(e.to_string())
            }
        }
    }

    /// Check version and contributors, verify the checksum and read the
    /// type table. Returns the reader positioned at the first block.
    fn open<'d>(&self, data: &'d [u8]) -> Result<Option<(ResolvedTypes, ByteReader<'d>)>> {
        let mut header = ByteReader::new(data);
        let version = header.read_str("format version")?;
        if version != self.format_version {
            info!(
                found = %version,
                expected = %self.format_version,
                "Cache format version mismatch, ignoring cache"
            );
            return Ok(None);
        }

        let body = unseal(data)?;
        let mut reader = ByteReader::new(body);
        reader.read_slice(header.position(), "format version")?;

        let cached = read_contributors(&mut reader)?;
        if let Some(reason) = contributors_mismatch(&cached, &(self.versions)()) {
            info!(reason = %reason, "Cache contributor versions changed, ignoring cache");
            return Ok(None);
        }

        let types = ResolvedTypes::read(&mut reader, &self.registry, &*self.resolver)?;
        trace!(types = types.len(), "Resolved cache type table");
        Ok(Some((types, reader)))
    }
}

fn read_all<R: Read>(reader: &mut R) -> Result<Vec<u8>> {
    let mut data = Vec::new();
    reader.read_to_end(&mut data)?;
    Ok(data)
}
