//! Replay and merge errors
//!
//! Concurrent removals and last-writer-wins overlaps are not errors; they
//! are listed in the merge report. An error always means the target was
//! left exactly as it was.

use crate::conflict::FieldConflict;
use thiserror::Error;

/// Result type alias for replay operations
pub type Result<T> = std::result::Result<T, MergeError>;

/// Error types for change log replay
#[derive(Debug, Clone, PartialEq, Error)]
pub enum MergeError {
    /// Same-field overlaps found under `MergePolicy::RejectConflicts`
    #[error("{} conflicting field changes", .0.len())]
    Conflicts(Vec<FieldConflict>),

    /// An entity in the log has a type the target registry numbers differently
    #[error("Entity type {0} is not registered identically in the target")]
    IncompatibleRegistry(String),

    /// The target rejected a change (duplicate persistent id, invalid reference, ...)
    #[error(transparent)]
    Engine(#[from] wsmodel_core::Error),
}
