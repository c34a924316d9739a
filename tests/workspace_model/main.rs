//! Workspace model integration suite
//!
//! End-to-end scenarios across the storage, concurrency and durability
//! crates through the `wsmodel` facade.
//!
//! ## Running These Tests
//!
//! ```bash
//! cargo test --test workspace_model
//! ```

mod common;

mod cache_files;
mod cascade;
mod merge;
mod persistent_ids;
mod properties;
mod scenarios;
