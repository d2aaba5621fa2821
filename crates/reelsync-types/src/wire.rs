//! Request/response shapes exchanged with the operation log.

use serde::{Deserialize, Serialize};

use crate::ids::ActorId;
use crate::operation::Operation;
use crate::timeline::TimelineSnapshot;

/// Server-owned document version. Advances by exactly one per applied batch.
pub type Version = u64;

/// Submit a batch under an expected version.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ApplyRequest {
    /// The version the submitter believes is current.
    pub version: Version,
    pub operations: Vec<Operation>,
}

/// The canonical state after a batch landed.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ApplyResponse {
    pub version: Version,
    pub timeline_data: TimelineSnapshot,
}

/// Ask for operations applied after `since_version`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollRequest {
    pub since_version: Version,
    pub limit: usize,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PollResponse {
    pub current_version: Version,
    pub operations: Vec<OperationHistoryItem>,
}

impl PollResponse {
    /// Version reached after applying every returned item.
    ///
    /// Lower than `current_version` when the response was truncated by the
    /// request limit.
    pub fn reached_version(&self, since_version: Version) -> Version {
        self.operations
            .last()
            .map(|item| item.version)
            .unwrap_or(since_version)
    }
}

/// One applied operation, with the batch version it landed in.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OperationHistoryItem {
    pub version: Version,
    pub author: ActorId,
    /// Unix millis when the batch was accepted.
    pub timestamp_ms: u64,
    pub operation: Operation,
}

/// Canonical snapshot and version of a document.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DocumentState {
    pub version: Version,
    pub timeline_data: TimelineSnapshot,
}

/// Current wall clock as Unix millis.
pub fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
