//! Merge outcomes: conflicts, skipped changes and the merge report
//!
//! A replay never fails because of a concurrent change it can resolve.
//! Everything it resolved on its own is listed in the [`MergeReport`]:
//!
//! - **Field conflicts**: both sides changed one field to different values;
//!   the incoming value wins under [`MergePolicy::LastWriterWins`]
//! - **Skipped changes**: the change targets an entity or parent the target
//!   already removed; removal wins

use std::collections::BTreeMap;
use std::fmt;
use wsmodel_core::{EntityId, Value};

/// How same-field overlaps are handled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MergePolicy {
    /// Apply the incoming value and report the overlap
    #[default]
    LastWriterWins,
    /// Fail the whole replay and leave the target untouched
    RejectConflicts,
}

/// Both sides changed the same field
#[derive(Debug, Clone, PartialEq)]
pub struct FieldConflict {
    /// Entity in the target
    pub entity: EntityId,
    /// Field name
    pub field: String,
    /// Value in the target before the replay
    pub target: Value,
    /// Value carried by the change log
    pub incoming: Value,
}

impl fmt::Display for FieldConflict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}#{}: target has {:?}, incoming {:?}",
            self.entity, self.field, self.target, self.incoming
        )
    }
}

/// Why a change was not applied
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// The target removed the entity the change applies to
    EntityRemoved,
    /// The target removed the parent referenced by the change
    ParentRemoved {
        /// Parent reference name
        field: String,
    },
}

/// A change left out of the replay
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedChange {
    /// Entity id as recorded in the change log
    pub entity: EntityId,
    /// Kind of the change log entry
    pub kind: &'static str,
    /// Why it was skipped
    pub reason: SkipReason,
}

/// Result of a replay
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MergeReport {
    /// Number of change log entries applied
    pub applied: usize,
    /// Entries not applied because of concurrent removals
    pub skipped: Vec<SkippedChange>,
    /// Same-field overlaps resolved in favour of the incoming value
    pub conflicts: Vec<FieldConflict>,
    /// Ids of entities added by the log, mapped to their ids in the target
    pub id_mapping: BTreeMap<EntityId, EntityId>,
}

impl MergeReport {
    /// Whether every entry applied without overlap
    pub fn is_clean(&self) -> bool {
        self.skipped.is_empty() && self.conflicts.is_empty()
    }

    /// Target id of an entity from the log
    ///
    /// Entities the log did not add keep their id.
    pub fn target_id(&self, id: EntityId) -> EntityId {
        self.id_mapping.get(&id).copied().unwrap_or(id)
    }
}
