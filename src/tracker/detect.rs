//! Structural change detection between two branch snapshots.
//!
//! Every dimension is compared with plain deep equality, order-sensitive
//! for lists: git's own output order is provenance, so no canonicalization
//! happens here. The predicate is the OR over all dimensions.

use crate::snapshot::BranchSnapshot;

/// Names of the snapshot dimensions that differ between `prev` and `next`.
/// Intended for debug logging; callers usually only need [`is_changed`].
pub fn changed_dimensions(prev: &BranchSnapshot, next: &BranchSnapshot) -> Vec<&'static str> {
    let mut changed = Vec::new();

    if prev.working_tree_status != next.working_tree_status {
        changed.push("workingTreeStatus");
    }
    if prev.head_commit_hash != next.head_commit_hash {
        changed.push("headCommitHash");
    }
    if prev.base_commit_hash != next.base_commit_hash {
        changed.push("baseCommitHash");
    }
    if prev.files_changed_vs_base != next.files_changed_vs_base {
        changed.push("filesChangedVsBase");
    }
    if prev.commits_ahead_of_base != next.commits_ahead_of_base {
        changed.push("commitsAheadOfBase");
    }
    if prev.commit_count_ahead_of_base != next.commit_count_ahead_of_base {
        changed.push("commitCountAheadOfBase");
    }
    if prev.working_tree_diff_stats != next.working_tree_diff_stats {
        changed.push("workingTreeDiffStats");
    }
    if prev.committed_diff_stats != next.committed_diff_stats {
        changed.push("committedDiffStats");
    }

    changed
}

pub fn is_changed(prev: &BranchSnapshot, next: &BranchSnapshot) -> bool {
    !changed_dimensions(prev, next).is_empty()
}
