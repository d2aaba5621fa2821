//! The operation vocabulary.
//!
//! Every mutation of a [`TimelineSnapshot`] is expressed as an [`Operation`].
//! On the wire an operation is `{type, <entity>_id?, data?}`; the `type` string
//! selects how `data` is read and must round-trip unchanged between the diff
//! engine, the server-side applier, and the remote merger.
//!
//! Patch payloads carry only the fields that changed. A field that is absent
//! from a patch is left alone by the applier.

use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serialize};

use crate::ids::{ClipId, GroupId, LayerId, MarkerId, TrackId};
use crate::timeline::{AudioTrack, Clip, Group, Lane, Layer, Marker, TimelineSnapshot};

/// Present-but-null deserializes to `Some(None)`; absent stays `None`.
fn some_or_null<'de, T, D>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

/// One semantic mutation of a timeline.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Operation {
    #[serde(rename = "clip.add")]
    ClipAdd { clip_id: ClipId, data: ClipPlacement },
    #[serde(rename = "clip.remove")]
    ClipRemove { clip_id: ClipId },
    /// Change a clip's start time and/or its lane and position.
    #[serde(rename = "clip.move")]
    ClipMove { clip_id: ClipId, data: ClipMove },
    #[serde(rename = "clip.update")]
    ClipUpdate { clip_id: ClipId, data: ClipPatch },

    #[serde(rename = "layer.add")]
    LayerAdd { layer_id: LayerId, data: LayerInsert },
    /// Removes the layer together with any clips still on it.
    #[serde(rename = "layer.remove")]
    LayerRemove { layer_id: LayerId },
    #[serde(rename = "layer.move")]
    LayerMove { layer_id: LayerId, data: Reorder },
    #[serde(rename = "layer.update")]
    LayerUpdate { layer_id: LayerId, data: LayerPatch },

    #[serde(rename = "track.add")]
    TrackAdd { track_id: TrackId, data: TrackInsert },
    #[serde(rename = "track.remove")]
    TrackRemove { track_id: TrackId },
    #[serde(rename = "track.move")]
    TrackMove { track_id: TrackId, data: Reorder },
    #[serde(rename = "track.update")]
    TrackUpdate { track_id: TrackId, data: TrackPatch },

    #[serde(rename = "marker.add")]
    MarkerAdd { marker_id: MarkerId, data: Marker },
    #[serde(rename = "marker.remove")]
    MarkerRemove { marker_id: MarkerId },
    #[serde(rename = "marker.update")]
    MarkerUpdate { marker_id: MarkerId, data: MarkerPatch },

    #[serde(rename = "group.add")]
    GroupAdd { group_id: GroupId, data: Group },
    #[serde(rename = "group.remove")]
    GroupRemove { group_id: GroupId },
    #[serde(rename = "group.update")]
    GroupUpdate { group_id: GroupId, data: GroupPatch },

    #[serde(rename = "timeline.update")]
    TimelineUpdate { data: TimelinePatch },
    /// Full overwrite, used when a conflict is resolved by force.
    #[serde(rename = "timeline.replace")]
    TimelineReplace { data: Box<TimelineSnapshot> },
}

impl Operation {
    /// The wire `type` string.
    pub fn kind(&self) -> &'static str {
        match self {
            Operation::ClipAdd { .. } => "clip.add",
            Operation::ClipRemove { .. } => "clip.remove",
            Operation::ClipMove { .. } => "clip.move",
            Operation::ClipUpdate { .. } => "clip.update",
            Operation::LayerAdd { .. } => "layer.add",
            Operation::LayerRemove { .. } => "layer.remove",
            Operation::LayerMove { .. } => "layer.move",
            Operation::LayerUpdate { .. } => "layer.update",
            Operation::TrackAdd { .. } => "track.add",
            Operation::TrackRemove { .. } => "track.remove",
            Operation::TrackMove { .. } => "track.move",
            Operation::TrackUpdate { .. } => "track.update",
            Operation::MarkerAdd { .. } => "marker.add",
            Operation::MarkerRemove { .. } => "marker.remove",
            Operation::MarkerUpdate { .. } => "marker.update",
            Operation::GroupAdd { .. } => "group.add",
            Operation::GroupRemove { .. } => "group.remove",
            Operation::GroupUpdate { .. } => "group.update",
            Operation::TimelineUpdate { .. } => "timeline.update",
            Operation::TimelineReplace { .. } => "timeline.replace",
        }
    }

    /// Id of the entity the operation targets, if any.
    pub fn target(&self) -> Option<&str> {
        match self {
            Operation::ClipAdd { clip_id, .. }
            | Operation::ClipRemove { clip_id }
            | Operation::ClipMove { clip_id, .. }
            | Operation::ClipUpdate { clip_id, .. } => Some(clip_id.as_str()),
            Operation::LayerAdd { layer_id, .. }
            | Operation::LayerRemove { layer_id }
            | Operation::LayerMove { layer_id, .. }
            | Operation::LayerUpdate { layer_id, .. } => Some(layer_id.as_str()),
            Operation::TrackAdd { track_id, .. }
            | Operation::TrackRemove { track_id }
            | Operation::TrackMove { track_id, .. }
            | Operation::TrackUpdate { track_id, .. } => Some(track_id.as_str()),
            Operation::MarkerAdd { marker_id, .. }
            | Operation::MarkerRemove { marker_id }
            | Operation::MarkerUpdate { marker_id, .. } => Some(marker_id.as_str()),
            Operation::GroupAdd { group_id, .. }
            | Operation::GroupRemove { group_id }
            | Operation::GroupUpdate { group_id, .. } => Some(group_id.as_str()),
            Operation::TimelineUpdate { .. } | Operation::TimelineReplace { .. } => None,
        }
    }
}

/// Where a new clip goes.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ClipPlacement {
    pub lane: Lane,
    pub index: usize,
    pub clip: Clip,
}

/// Payload of `clip.move`.
///
/// `index` is the position in the destination lane after the clip has been
/// taken out of its current lane.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClipMove {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lane: Option<Lane>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index: Option<usize>,
}

impl ClipMove {
    pub fn is_empty(&self) -> bool {
        self.start_ms.is_none() && self.lane.is_none() && self.index.is_none()
    }
}

/// Property patch for a clip. `properties` maps a key to its new value, or to
/// `null` to remove the key.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ClipPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(
        default,
        deserialize_with = "some_or_null",
        skip_serializing_if = "Option::is_none"
    )]
    pub asset_id: Option<Option<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_in_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub properties: BTreeMap<String, Option<serde_json::Value>>,
}

impl ClipPatch {
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.asset_id.is_none()
            && self.duration_ms.is_none()
            && self.source_in_ms.is_none()
            && self.properties.is_empty()
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LayerInsert {
    pub index: usize,
    pub layer: Layer,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TrackInsert {
    pub index: usize,
    pub track: AudioTrack,
}

/// New position of a layer or track, counted after removal from the old one.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reorder {
    pub index: usize,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct LayerPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hidden: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locked: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub opacity: Option<f64>,
}

impl LayerPatch {
    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.hidden.is_none() && self.locked.is_none() && self.opacity.is_none()
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TrackPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub muted: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume: Option<f64>,
}

impl TrackPatch {
    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.muted.is_none() && self.volume.is_none()
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkerPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(
        default,
        deserialize_with = "some_or_null",
        skip_serializing_if = "Option::is_none"
    )]
    pub color: Option<Option<String>>,
}

impl MarkerPatch {
    pub fn is_empty(&self) -> bool {
        self.time_ms.is_none() && self.label.is_none() && self.color.is_none()
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clip_ids: Option<Vec<ClipId>>,
}

impl GroupPatch {
    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.clip_ids.is_none()
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimelinePatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
}

// ============================================================================
// Tests
// ============================================================================
