//! Virtual file url index
//!
//! Three maps kept in step:
//! - forward: entity → field → urls
//! - backward: url → (entity, field)
//! - jar directories: entity ↔ urls of jar directory fields
//!
//! Updates are per field so an ordinary modification only touches the
//! fields that changed.

use rustc_hash::FxHashMap;
use std::collections::{BTreeMap, BTreeSet};
use wsmodel_core::{EntityId, VirtualFileUrl};

/// Secondary index over urls stored in entity fields
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VirtualFileIndex {
    forward: FxHashMap<EntityId, BTreeMap<String, BTreeSet<VirtualFileUrl>>>,
    backward: FxHashMap<VirtualFileUrl, BTreeSet<(EntityId, String)>>,
    jar_dirs: FxHashMap<EntityId, BTreeSet<VirtualFileUrl>>,
    jar_dir_owners: FxHashMap<VirtualFileUrl, BTreeSet<EntityId>>,
}

impl VirtualFileIndex {
    /// Create an empty index
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the urls of one field of an entity
    pub fn index_field(&mut self, id: EntityId, field: &str, urls: BTreeSet<VirtualFileUrl>) {
        self.remove_field(id, field);
        if urls.is_empty() {
            return;
        }
        for url in &urls {
            self.backward
                .entry(url.clone())
                .or_default()
                .insert((id, field.to_string()));
        }
        self.forward
            .entry(id)
            .or_default()
            .insert(field.to_string(), urls);
    }

    fn remove_field(&mut self, id: EntityId, field: &str) {
        let Some(fields) = self.forward.get_mut(&id) else {
            return;
        };
        let Some(previous) = fields.remove(field) else {
            return;
        };
        if fields.is_empty() {
            self.forward.remove(&id);
        }
        for url in previous {
            if let Some(owners) = self.backward.get_mut(&url) {
                owners.remove(&(id, field.to_string()));
                if owners.is_empty() {
                    self.backward.remove(&url);
                }
            }
        }
    }

    /// Replace the jar directories of an entity
    pub fn index_jar_dirs(&mut self, id: EntityId, dirs: BTreeSet<VirtualFileUrl>) {
        self.remove_jar_dirs(id);
        if dirs.is_empty() {
            return;
        }
        for dir in &dirs {
            self.jar_dir_owners.entry(dir.clone()).or_default().insert(id);
        }
        self.jar_dirs.insert(id, dirs);
    }

    fn remove_jar_dirs(&mut self, id: EntityId) {
        let Some(previous) = self.jar_dirs.remove(&id) else {
            return;
        };
        for dir in previous {
            if let Some(owners) = self.jar_dir_owners.get_mut(&dir) {
                owners.remove(&id);
                if owners.is_empty() {
                    self.jar_dir_owners.remove(&dir);
                }
            }
        }
    }

    /// Forget every url of an entity
    pub fn remove(&mut self, id: EntityId) {
        let fields: Vec<String> = self
            .forward
            .get(&id)
            .map(|f| f.keys().cloned().collect())
            .unwrap_or_default();
        for field in fields {
            self.remove_field(id, &field);
        }
        self.remove_jar_dirs(id);
    }

    /// Urls of an entity per field
    pub fn urls(&self, id: EntityId) -> Option<&BTreeMap<String, BTreeSet<VirtualFileUrl>>> {
        self.forward.get(&id)
    }

    /// Entities (and fields) storing a url
    pub fn owners(&self, url: &VirtualFileUrl) -> impl Iterator<Item = &(EntityId, String)> {
        self.backward.get(url).into_iter().flatten()
    }

    /// Jar directories of an entity
    pub fn jar_directories(&self, id: EntityId) -> Option<&BTreeSet<VirtualFileUrl>> {
        self.jar_dirs.get(&id)
    }

    /// Entities declaring a jar directory
    pub fn jar_directory_owners(&self, url: &VirtualFileUrl) -> impl Iterator<Item = EntityId> + '_ {
        self.jar_dir_owners.get(url).into_iter().flatten().copied()
    }

    /// Forward map entries
    pub fn iter_forward(
        &self,
    ) -> impl Iterator<Item = (EntityId, &BTreeMap<String, BTreeSet<VirtualFileUrl>>)> {
        self.forward.iter().map(|(id, f)| (*id, f))
    }

    /// Backward map entries
    pub fn iter_backward(&self) -> impl Iterator<Item = (&VirtualFileUrl, &BTreeSet<(EntityId, String)>)> {
        self.backward.iter()
    }

    /// Jar directory entries
    pub fn iter_jar_dirs(&self) -> impl Iterator<Item = (EntityId, &BTreeSet<VirtualFileUrl>)> {
        self.jar_dirs.iter().map(|(id, d)| (*id, d))
    }

    /// Insert a decoded backward entry without touching the forward map
    ///
    /// Used when restoring persisted indexes; callers restore all three maps.
    pub fn restore_backward(&mut self, url: VirtualFileUrl, owners: BTreeSet<(EntityId, String)>) {
        if !owners.is_empty() {
            self.backward.insert(url, owners);
        }
    }

    /// Insert a decoded forward entry without touching the backward map
    pub fn restore_forward(&mut self, id: EntityId, fields: BTreeMap<String, BTreeSet<VirtualFileUrl>>) {
        if !fields.is_empty() {
            self.forward.insert(id, fields);
        }
    }

    /// Number of entities with urls
    pub fn len(&self) -> usize {
        self.forward.len()
    }

    /// Whether the index is empty
    pub fn is_empty(&self) -> bool {
        self.forward.is_empty() && self.jar_dirs.is_empty()
    }
}
