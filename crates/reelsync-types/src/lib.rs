//! Shared document and wire types for reelsync.
//!
//! A timeline is a versioned document: layers and audio tracks of ordered
//! clips, plus markers, clip groups and a duration. Every change is an
//! [`Operation`]; batches of operations are applied by the server under an
//! expected [`Version`].

pub mod ids;
pub mod operation;
pub mod timeline;
pub mod wire;

pub use ids::{ActorId, ClipId, DocumentKey, DocumentKeyError, GroupId, LayerId, MarkerId, TrackId};
pub use operation::{
    ClipMove, ClipPatch, ClipPlacement, GroupPatch, LayerInsert, LayerPatch, MarkerPatch,
    Operation, Reorder, TimelinePatch, TrackInsert, TrackPatch,
};
pub use timeline::{AudioTrack, Clip, Group, Keyed, Lane, Layer, Marker, TimelineSnapshot};
pub use wire::{
    ApplyRequest, ApplyResponse, DocumentState, OperationHistoryItem, PollRequest, PollResponse,
    Version, now_millis,
};
