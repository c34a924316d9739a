//! VersionedStorage: the current snapshot of a workspace, shared by readers
//!
//! This module holds the latest published snapshot using:
//! - `parking_lot::RwLock<Arc<Snapshot>>` for the current snapshot
//! - `parking_lot::Mutex` to serialize writers
//! - `AtomicU64` for a monotonically increasing version number
//! - `DashMap` for values derived from one version and reused until the next
//!
//! # Design Notes
//!
//! - **Readers never block on writers**: `current()` clones an `Arc` under a
//!   short read lock; an update builds its new snapshot outside that lock
//! - **All-or-nothing updates**: a failing update closure leaves the current
//!   snapshot and the version untouched
//! - **Cache invalidation by version**: cached entries remember the version
//!   they were computed for and are recomputed lazily after a change

use crate::builder::Builder;
use crate::snapshot::Snapshot;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use std::any::Any;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;
use wsmodel_core::{EntityTypeRegistry, Result};

type CachedValue = (u64, Arc<dyn Any + Send + Sync>);

/// Holder of the current snapshot with version tracking
pub struct VersionedStorage {
    current: RwLock<Arc<Snapshot>>,
    writer: Mutex<()>,
    version: AtomicU64,
    cache: DashMap<&'static str, CachedValue>,
}

impl VersionedStorage {
    /// Storage holding an empty snapshot at version 0
    pub fn new(registry: Arc<EntityTypeRegistry>) -> Self {
        Self::from_snapshot(Snapshot::empty(registry))
    }

    /// Storage holding `snapshot` at version 0
    pub fn from_snapshot(snapshot: Snapshot) -> Self {
        VersionedStorage {
            current: RwLock::new(Arc::new(snapshot)),
            writer: Mutex::new(()),
            version: AtomicU64::new(0),
            cache: DashMap::new(),
        }
    }

    /// Latest published snapshot
    pub fn current(&self) -> Arc<Snapshot> {
        Arc::clone(&self.current.read())
    }

    /// Number of snapshots published since creation
    pub fn version(&self) -> u64 {
        self.version.load(Ordering::Acquire)
    }

    /// Publish a snapshot produced elsewhere
    pub fn replace(&self, snapshot: Snapshot) -> u64 {
        let _writer = self.writer.lock();
        self.publish(snapshot)
    }

    /// Run `f` against a builder over the current snapshot and publish the result
    ///
    /// Writers are serialized; the closure sees every update published before it.
    pub fn update<R, F>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&mut Builder) -> Result<R>,
    {
        let _writer = self.writer.lock();
        let mut builder = self.current().to_builder();
        let out = f(&mut builder)?;
        if builder.change_log().is_empty() {
            return Ok(out);
        }
        self.publish(builder.freeze());
        Ok(out)
    }

    fn publish(&self, snapshot: Snapshot) -> u64 {
        // Version moves under the write lock so readers see matching pairs
        let mut current = self.current.write();
        *current = Arc::new(snapshot);
        let version = self.version.fetch_add(1, Ordering::AcqRel) + 1;
        drop(current);
        debug!(version, "snapshot published");
        version
    }

    /// Value derived from the current snapshot, computed at most once per version
    ///
    /// A value of a different type cached under the same key is recomputed.
    pub fn cached<T, F>(&self, key: &'static str, compute: F) -> Arc<T>
    where
        T: Any + Send + Sync,
        F: FnOnce(&Snapshot) -> T,
    {
        let (version, snapshot) = {
            let current = self.current.read();
            (self.version(), Arc::clone(&current))
        };
        if let Some(entry) = self.cache.get(key) {
            let (cached_version, value) = entry.value();
            if *cached_version == version {
                if let Ok(value) = Arc::clone(value).downcast::<T>() {
                    return value;
                }
            }
        }
        let value = Arc::new(compute(&snapshot));
        let fresh: CachedValue = (version, Arc::clone(&value) as Arc<dyn Any + Send + Sync>);
        // Never replace a value computed for a later version
        match self.cache.entry(key) {
            Entry::Occupied(mut slot) => {
                if slot.get().0 <= version {
                    slot.insert(fresh);
                }
            }
            Entry::Vacant(slot) => {
                slot.insert(fresh);
            }
        }
        value
    }
}

impl std::fmt::Debug for VersionedStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VersionedStorage")
            .field("version", &self.version())
            .field("cached", &self.cache.len())
            .finish()
    }
}
