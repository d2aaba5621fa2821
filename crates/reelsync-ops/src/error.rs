//! Error types for applying operations.

use thiserror::Error;

use reelsync_types::{ClipId, GroupId, Lane, LayerId, MarkerId, TrackId};

/// An operation that cannot be applied to a snapshot.
///
/// The diff engine never produces these against the snapshot it diffed; when
/// the server reports one, the submitting client is buggy.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum OpError {
    #[error("clip not found: {0}")]
    ClipNotFound(ClipId),

    #[error("layer not found: {0}")]
    LayerNotFound(LayerId),

    #[error("track not found: {0}")]
    TrackNotFound(TrackId),

    #[error("lane not found: {0}")]
    LaneNotFound(Lane),

    #[error("marker not found: {0}")]
    MarkerNotFound(MarkerId),

    #[error("group not found: {0}")]
    GroupNotFound(GroupId),

    #[error("clip already exists: {0}")]
    DuplicateClip(ClipId),

    #[error("layer already exists: {0}")]
    DuplicateLayer(LayerId),

    #[error("track already exists: {0}")]
    DuplicateTrack(TrackId),

    #[error("marker already exists: {0}")]
    DuplicateMarker(MarkerId),

    #[error("group already exists: {0}")]
    DuplicateGroup(GroupId),

    /// Insert/move position past the end of the target list.
    #[error("index {index} out of bounds for length {len}")]
    IndexOutOfBounds { index: usize, len: usize },

    /// The id field of the operation disagrees with the id inside its payload.
    #[error("operation targets '{op_id}' but payload carries '{payload_id}'")]
    IdMismatch { op_id: String, payload_id: String },
}
