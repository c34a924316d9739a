//! Auxiliary indexes maintained alongside the entity families
//!
//! - `EntitySourceIndex`: entity → source, source → entities
//! - `SoftLinkIndex`: entity → persistent ids referenced by value
//! - `VirtualFileIndex`: entity ↔ urls, plus jar directories
//! - `PersistentIdIndex`: entity ↔ persistent id (unique)
//!
//! # Design Notes
//!
//! Each sub-index sits behind its own `Arc` and is copied on first write.
//! A builder that only changes sources never copies the url index.
//!
//! Updates are incremental. `rebuild` exists for the consistency check and
//! for stores restored without persisted indexes; the two must agree.

pub mod persistent_id;
pub mod soft_links;
pub mod source;
pub mod vfu;

pub use persistent_id::PersistentIdIndex;
pub use soft_links::SoftLinkIndex;
pub use source::EntitySourceIndex;
pub use vfu::VirtualFileIndex;

use std::sync::Arc;
use wsmodel_core::{EntityData, EntityId, EntitySource, EntityTypeRegistry};

/// All auxiliary indexes of a storage
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StorageIndexes {
    sources: Arc<EntitySourceIndex>,
    soft_links: Arc<SoftLinkIndex>,
    urls: Arc<VirtualFileIndex>,
    persistent_ids: Arc<PersistentIdIndex>,
}

impl StorageIndexes {
    /// Empty indexes
    pub fn new() -> Self {
        Self::default()
    }

    /// Assemble indexes restored from a cache
    pub fn from_parts(
        sources: EntitySourceIndex,
        soft_links: SoftLinkIndex,
        urls: VirtualFileIndex,
        persistent_ids: PersistentIdIndex,
    ) -> Self {
        StorageIndexes {
            sources: Arc::new(sources),
            soft_links: Arc::new(soft_links),
            urls: Arc::new(urls),
            persistent_ids: Arc::new(persistent_ids),
        }
    }

    /// Rebuild every index from a full scan
    pub fn rebuild<'a>(
        registry: &EntityTypeRegistry,
        entities: impl IntoIterator<Item = (EntityId, &'a EntityData)>,
    ) -> Self {
        let mut indexes = StorageIndexes::new();
        for (id, data) in entities {
            indexes.entity_added(registry, id, data);
        }
        indexes
    }

    /// Source index
    pub fn sources(&self) -> &EntitySourceIndex {
        &self.sources
    }

    /// Soft-link index
    pub fn soft_links(&self) -> &SoftLinkIndex {
        &self.soft_links
    }

    /// Virtual file url index
    pub fn urls(&self) -> &VirtualFileIndex {
        &self.urls
    }

    /// Persistent id index
    pub fn persistent_ids(&self) -> &PersistentIdIndex {
        &self.persistent_ids
    }

    /// Index a newly added entity
    pub fn entity_added(&mut self, registry: &EntityTypeRegistry, id: EntityId, data: &EntityData) {
        Arc::make_mut(&mut self.sources).insert(id, data.source().clone());

        let links = data.soft_links(registry);
        if !links.is_empty() {
            Arc::make_mut(&mut self.soft_links).index(id, links);
        }

        let urls = data.urls_by_field(registry);
        let jar_dirs = data.jar_directories(registry);
        if !urls.is_empty() || !jar_dirs.is_empty() {
            let index = Arc::make_mut(&mut self.urls);
            for (field, set) in urls {
                index.index_field(id, &field, set);
            }
            index.index_jar_dirs(id, jar_dirs);
        }

        if let Some(pid) = data.persistent_id() {
            Arc::make_mut(&mut self.persistent_ids).index(id, pid);
        }
    }

    /// Drop a removed entity from every index
    pub fn entity_removed(&mut self, id: EntityId) {
        if self.sources.get(id).is_some() {
            Arc::make_mut(&mut self.sources).remove(id);
        }
        if self.soft_links.links(id).is_some() {
            Arc::make_mut(&mut self.soft_links).remove(id);
        }
        if self.urls.urls(id).is_some() || self.urls.jar_directories(id).is_some() {
            Arc::make_mut(&mut self.urls).remove(id);
        }
        if self.persistent_ids.persistent_id(id).is_some() {
            Arc::make_mut(&mut self.persistent_ids).remove(id);
        }
    }

    /// Re-index only what the changed fields can affect
    pub fn entity_replaced(
        &mut self,
        registry: &EntityTypeRegistry,
        id: EntityId,
        new: &EntityData,
        changed: &[usize],
    ) {
        let schema = new.schema();
        let fields = schema.fields();

        if changed.iter().any(|&i| fields[i].is_soft_link_bearing()) {
            Arc::make_mut(&mut self.soft_links).index(id, new.soft_links(registry));
        }

        let url_fields: Vec<usize> = changed
            .iter()
            .copied()
            .filter(|&i| fields[i].is_url_bearing())
            .collect();
        if !url_fields.is_empty() {
            let index = Arc::make_mut(&mut self.urls);
            for &i in &url_fields {
                index.index_field(id, &fields[i].name, new.field_urls(registry, i));
            }
            if url_fields.iter().any(|&i| fields[i].jar_directory) {
                index.index_jar_dirs(id, new.jar_directories(registry));
            }
        }

        if let Some(rule) = schema.persistent_id_rule() {
            if rule.field_indices().iter().any(|i| changed.contains(i)) {
                Arc::make_mut(&mut self.persistent_ids).index(id, rule.derive(new.fields()));
            }
        }
    }

    /// Move an entity to a new source
    pub fn source_changed(&mut self, id: EntityId, source: EntitySource) {
        Arc::make_mut(&mut self.sources).insert(id, source);
    }

    /// Whether the source index is shared with `other`
    pub fn shares_sources_with(&self, other: &StorageIndexes) -> bool {
        Arc::ptr_eq(&self.sources, &other.sources)
    }

    /// Whether the url index is shared with `other`
    pub fn shares_urls_with(&self, other: &StorageIndexes) -> bool {
        Arc::ptr_eq(&self.urls, &other.urls)
    }
}
