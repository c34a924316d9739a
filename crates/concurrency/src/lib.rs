//! Concurrency layer for the workspace model
//!
//! Builders are single-writer transactions. Work done concurrently in
//! several builders is combined by replaying change logs:
//! - ChangeLogReplayer: applies one builder's change log to another builder
//! - MergePolicy: last-writer-wins per field, or reject overlaps
//! - MergeReport: applied, skipped and conflicting changes plus id mapping
//! - merge_builders / rebase: replay helpers for divergent builders

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod conflict;
pub mod error;
pub mod merge;
pub mod replay;

pub use conflict::{FieldConflict, MergePolicy, MergeReport, SkipReason, SkippedChange};
pub use error::{MergeError, Result};
pub use merge::{merge_builders, rebase};
pub use replay::ChangeLogReplayer;
