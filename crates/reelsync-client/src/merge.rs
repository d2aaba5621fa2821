//! Merging operations authored by other actors into local state.
//!
//! Remote operations are replayed with the lenient applier: targets that no
//! longer exist locally are skipped, indices are clamped, and an add of an id
//! that already exists overwrites it. Concurrent edits therefore resolve
//! field by field, last applied wins.
//!
//! Versions must be contiguous. Items at or below the local version were
//! already seen (this includes batches the session submitted itself); a first
//! new item that is not exactly one past the local version means something
//! was missed and the session has to refetch.

use tracing::{debug, warn};

use reelsync_ops::{ApplyReport, apply_ops_lenient};
use reelsync_types::{Operation, OperationHistoryItem, TimelineSnapshot, Version};

#[derive(Clone, Debug, PartialEq)]
pub enum MergeOutcome {
    /// Nothing newer than the local version.
    UpToDate,
    Merged {
        snapshot: TimelineSnapshot,
        version: Version,
        applied: usize,
        skipped: usize,
    },
    /// The items do not continue from the local version.
    NeedsResync {
        local_version: Version,
        remote_version: Version,
    },
}

/// Merge remote items into `local`.
///
/// `remote_version` is the version the items reach; a value above the last
/// item's version means items are missing.
pub fn merge_remote(
    local: &TimelineSnapshot,
    local_version: Version,
    items: &[OperationHistoryItem],
    remote_version: Version,
) -> MergeOutcome {
    let start = items.partition_point(|item| item.version <= local_version);
    let fresh = &items[start..];

    let Some(last) = fresh.last() else {
        if remote_version > local_version {
            warn!("server at {} but no items past {}", remote_version, local_version);
            return MergeOutcome::NeedsResync {
                local_version,
                remote_version,
            };
        }
        return MergeOutcome::UpToDate;
    };

    let mut expected = local_version + 1;
    for item in fresh {
        if item.version == expected {
            expected += 1;
        } else if item.version + 1 != expected {
            warn!(
                "version gap: local {}, next item {}, expected {}",
                local_version, item.version, expected
            );
            return MergeOutcome::NeedsResync {
                local_version,
                remote_version,
            };
        }
    }
    if remote_version > last.version {
        return MergeOutcome::NeedsResync {
            local_version,
            remote_version,
        };
    }

    let (snapshot, report) = replay_remote(local, fresh);
    debug!(
        "merged {} remote ops ({} skipped) up to version {}",
        report.applied,
        report.skipped.len(),
        last.version
    );
    MergeOutcome::Merged {
        snapshot,
        version: last.version,
        applied: report.applied,
        skipped: report.skipped.len(),
    }
}

/// Replay items onto any snapshot, such as a preview overlay.
pub fn replay_remote(
    snapshot: &TimelineSnapshot,
    items: &[OperationHistoryItem],
) -> (TimelineSnapshot, ApplyReport) {
    let ops: Vec<Operation> = items.iter().map(|item| item.operation.clone()).collect();
    apply_ops_lenient(snapshot, &ops)
}
