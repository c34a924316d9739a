//! Merging divergent builders
//!
//! Two builders opened on the same snapshot evolve independently. Merging
//! replays one builder's change log onto the other; rebasing replays it
//! onto a newer snapshot of the same lineage.

use crate::conflict::{MergePolicy, MergeReport};
use crate::error::Result;
use crate::replay::ChangeLogReplayer;
use wsmodel_storage::{Builder, Snapshot};

/// Apply everything `incoming` changed onto `target`
pub fn merge_builders(target: &mut Builder, incoming: &Builder, policy: MergePolicy) -> Result<MergeReport> {
    ChangeLogReplayer::new(incoming.change_log())
        .with_policy(policy)
        .replay(target)
}

/// Replay `incoming` onto a builder over `onto`
///
/// Used when `incoming` was opened on an older snapshot and the lineage
/// has moved on since.
pub fn rebase(incoming: &Builder, onto: &Snapshot, policy: MergePolicy) -> Result<(Builder, MergeReport)> {
    let mut target = onto.to_builder();
    let report = merge_builders(&mut target, incoming, policy)?;
    Ok((target, report))
}
