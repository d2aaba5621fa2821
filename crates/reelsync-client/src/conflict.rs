//! Conflict state of a session.
//!
//! ```text
//!   Normal ──(version mismatch)──▶ Conflict ──(Reload | Force)──▶ Normal
//! ```
//!
//! While in conflict the local snapshot is kept as-is and nothing is written
//! until the user picks a resolution. A forced write that conflicts again
//! stays in conflict with the newer server version.

use reelsync_types::{Operation, TimelineSnapshot, Version, now_millis};

/// Local state that lost a version race.
#[derive(Clone, Debug, PartialEq)]
pub struct ConflictRecord {
    /// Confirmed state the losing write started from.
    pub base: TimelineSnapshot,
    pub local_snapshot: TimelineSnapshot,
    /// Label of the losing write; a forced write is recorded under it.
    pub label: String,
    /// Server version at detection time.
    pub server_version: Version,
    pub detected_at_ms: u64,
}

impl ConflictRecord {
    pub fn new(
        base: TimelineSnapshot,
        local_snapshot: TimelineSnapshot,
        label: impl Into<String>,
        server_version: Version,
    ) -> Self {
        Self {
            base,
            local_snapshot,
            label: label.into(),
            server_version,
            detected_at_ms: now_millis(),
        }
    }

    /// The batch that overwrites the server with the local snapshot.
    pub fn force_operations(&self) -> Vec<Operation> {
        vec![Operation::TimelineReplace {
            data: Box::new(self.local_snapshot.clone()),
        }]
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub enum SyncState {
    #[default]
    Normal,
    Conflict(ConflictRecord),
}

impl SyncState {
    pub fn is_conflict(&self) -> bool {
        matches!(self, SyncState::Conflict(_))
    }

    pub fn conflict(&self) -> Option<&ConflictRecord> {
        match self {
            SyncState::Conflict(record) => Some(record),
            SyncState::Normal => None,
        }
    }
}

/// How the user resolves a conflict.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Resolution {
    /// Discard local state and adopt the server's.
    Reload,
    /// Overwrite the server with local state.
    Force,
}
