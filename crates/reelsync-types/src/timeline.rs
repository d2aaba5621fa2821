//! The timeline snapshot: the versioned document every actor edits.
//!
//! Collections are persistent (`im`), so cloning a snapshot shares structure
//! with the original. History entries, conflict records and the confirmed
//! server state can all hold their own copy without an O(n) deep copy, and a
//! later mutation of one copy never shows through in another.
//!
//! Layers and audio tracks are ordered lanes of ordered clips. Markers and
//! groups are keyed by id; on the wire they are arrays sorted by id.

use std::collections::BTreeMap;
use std::fmt;

use im::{OrdMap, Vector};
use serde::{Deserialize, Serialize};

use crate::ids::{ClipId, GroupId, LayerId, MarkerId, TrackId};

/// A clip placed on a layer or audio track.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Clip {
    pub id: ClipId,
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub asset_id: Option<String>,
    /// Position on the timeline.
    pub start_ms: u64,
    pub duration_ms: u64,
    /// Offset into the source media.
    #[serde(default)]
    pub source_in_ms: u64,
    /// Free-form properties (transform, effects, text styling …).
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub properties: BTreeMap<String, serde_json::Value>,
}

impl Clip {
    pub fn new(id: impl Into<ClipId>, start_ms: u64, duration_ms: u64) -> Self {
        Self {
            id: id.into(),
            name: String::new(),
            asset_id: None,
            start_ms,
            duration_ms,
            source_in_ms: 0,
            properties: BTreeMap::new(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_asset(mut self, asset_id: impl Into<String>) -> Self {
        self.asset_id = Some(asset_id.into());
        self
    }

    pub fn with_property(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.properties.insert(key.into(), value);
        self
    }

    /// Timeline position where the clip ends.
    pub fn end_ms(&self) -> u64 {
        self.start_ms.saturating_add(self.duration_ms)
    }
}

fn full_level() -> f64 {
    1.0
}

/// A video layer.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Layer {
    pub id: LayerId,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub hidden: bool,
    #[serde(default)]
    pub locked: bool,
    #[serde(default = "full_level")]
    pub opacity: f64,
    #[serde(default)]
    pub clips: Vector<Clip>,
}

impl Layer {
    pub fn new(id: impl Into<LayerId>) -> Self {
        Self {
            id: id.into(),
            name: String::new(),
            hidden: false,
            locked: false,
            opacity: 1.0,
            clips: Vector::new(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_clip(mut self, clip: Clip) -> Self {
        self.clips.push_back(clip);
        self
    }
}

/// An audio track.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AudioTrack {
    pub id: TrackId,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub muted: bool,
    #[serde(default = "full_level")]
    pub volume: f64,
    #[serde(default)]
    pub clips: Vector<Clip>,
}

impl AudioTrack {
    pub fn new(id: impl Into<TrackId>) -> Self {
        Self {
            id: id.into(),
            name: String::new(),
            muted: false,
            volume: 1.0,
            clips: Vector::new(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_clip(mut self, clip: Clip) -> Self {
        self.clips.push_back(clip);
        self
    }
}

/// A named point on the timeline.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Marker {
    pub id: MarkerId,
    pub time_ms: u64,
    #[serde(default)]
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
}

impl Marker {
    pub fn new(id: impl Into<MarkerId>, time_ms: u64, label: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            time_ms,
            label: label.into(),
            color: None,
        }
    }
}

/// A set of clips that move and select together.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Group {
    pub id: GroupId,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub clip_ids: Vec<ClipId>,
}

impl Group {
    pub fn new(id: impl Into<GroupId>, clip_ids: impl IntoIterator<Item = ClipId>) -> Self {
        Self {
            id: id.into(),
            name: String::new(),
            clip_ids: clip_ids.into_iter().collect(),
        }
    }
}

/// A clip container: a video layer or an audio track.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Lane {
    Layer(LayerId),
    Track(TrackId),
}

impl fmt::Display for Lane {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Lane::Layer(id) => write!(f, "layer:{id}"),
            Lane::Track(id) => write!(f, "track:{id}"),
        }
    }
}

/// Entities stored in an id-keyed collection.
pub trait Keyed {
    type Key: Ord + Clone;

    fn key(&self) -> &Self::Key;
}

impl Keyed for Marker {
    type Key = MarkerId;

    fn key(&self) -> &MarkerId {
        &self.id
    }
}

impl Keyed for Group {
    type Key = GroupId;

    fn key(&self) -> &GroupId {
        &self.id
    }
}

/// Serialize an id-keyed map as an array of its values.
mod keyed_seq {
    use im::OrdMap;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    use super::Keyed;

    pub fn serialize<K, V, S>(map: &OrdMap<K, V>, serializer: S) -> Result<S::Ok, S::Error>
    where
        K: Ord + Clone,
        V: Clone + Serialize,
        S: Serializer,
    {
        serializer.collect_seq(map.values())
    }

    pub fn deserialize<'de, V, D>(deserializer: D) -> Result<OrdMap<V::Key, V>, D::Error>
    where
        V: Keyed + Clone + Deserialize<'de>,
        D: Deserializer<'de>,
    {
        let items = Vec::<V>::deserialize(deserializer)?;
        Ok(items
            .into_iter()
            .map(|item| (item.key().clone(), item))
            .collect())
    }
}

/// The complete editable document at one version.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TimelineSnapshot {
    #[serde(default)]
    pub layers: Vector<Layer>,
    #[serde(default)]
    pub audio_tracks: Vector<AudioTrack>,
    #[serde(default, with = "keyed_seq")]
    pub groups: OrdMap<GroupId, Group>,
    #[serde(default, with = "keyed_seq")]
    pub markers: OrdMap<MarkerId, Marker>,
    #[serde(default)]
    pub duration_ms: u64,
}

impl TimelineSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_layer(mut self, layer: Layer) -> Self {
        self.layers.push_back(layer);
        self
    }

    pub fn with_track(mut self, track: AudioTrack) -> Self {
        self.audio_tracks.push_back(track);
        self
    }

    pub fn with_marker(mut self, marker: Marker) -> Self {
        self.markers.insert(marker.id.clone(), marker);
        self
    }

    pub fn with_group(mut self, group: Group) -> Self {
        self.groups.insert(group.id.clone(), group);
        self
    }

    pub fn with_duration(mut self, duration_ms: u64) -> Self {
        self.duration_ms = duration_ms;
        self
    }

    pub fn layer_index(&self, id: &LayerId) -> Option<usize> {
        self.layers.iter().position(|l| &l.id == id)
    }

    pub fn track_index(&self, id: &TrackId) -> Option<usize> {
        self.audio_tracks.iter().position(|t| &t.id == id)
    }

    pub fn layer(&self, id: &LayerId) -> Option<&Layer> {
        self.layer_index(id).and_then(|i| self.layers.get(i))
    }

    pub fn track(&self, id: &TrackId) -> Option<&AudioTrack> {
        self.track_index(id).and_then(|i| self.audio_tracks.get(i))
    }

    pub fn has_lane(&self, lane: &Lane) -> bool {
        match lane {
            Lane::Layer(id) => self.layer_index(id).is_some(),
            Lane::Track(id) => self.track_index(id).is_some(),
        }
    }

    /// Clips of a lane, in order.
    pub fn lane_clips(&self, lane: &Lane) -> Option<&Vector<Clip>> {
        match lane {
            Lane::Layer(id) => self.layer(id).map(|l| &l.clips),
            Lane::Track(id) => self.track(id).map(|t| &t.clips),
        }
    }

    pub fn lane_clips_mut(&mut self, lane: &Lane) -> Option<&mut Vector<Clip>> {
        match lane {
            Lane::Layer(id) => {
                let idx = self.layer_index(id)?;
                self.layers.get_mut(idx).map(|l| &mut l.clips)
            }
            Lane::Track(id) => {
                let idx = self.track_index(id)?;
                self.audio_tracks.get_mut(idx).map(|t| &mut t.clips)
            }
        }
    }

    /// All lanes: layers first, then audio tracks, each in order.
    pub fn lanes(&self) -> Vec<Lane> {
        self.layers
            .iter()
            .map(|l| Lane::Layer(l.id.clone()))
            .chain(self.audio_tracks.iter().map(|t| Lane::Track(t.id.clone())))
            .collect()
    }

    /// Find the lane and position of a clip.
    pub fn locate_clip(&self, id: &ClipId) -> Option<(Lane, usize)> {
        for layer in self.layers.iter() {
            if let Some(pos) = layer.clips.iter().position(|c| &c.id == id) {
                return Some((Lane::Layer(layer.id.clone()), pos));
            }
        }
        for track in self.audio_tracks.iter() {
            if let Some(pos) = track.clips.iter().position(|c| &c.id == id) {
                return Some((Lane::Track(track.id.clone()), pos));
            }
        }
        None
    }

    pub fn clip(&self, id: &ClipId) -> Option<&Clip> {
        let (lane, pos) = self.locate_clip(id)?;
        self.lane_clips(&lane).and_then(|clips| clips.get(pos))
    }

    pub fn clip_count(&self) -> usize {
        self.layers.iter().map(|l| l.clips.len()).sum::<usize>()
            + self.audio_tracks.iter().map(|t| t.clips.len()).sum::<usize>()
    }

    /// End of the last clip on any lane.
    pub fn content_end_ms(&self) -> u64 {
        self.layers
            .iter()
            .flat_map(|l| l.clips.iter())
            .chain(self.audio_tracks.iter().flat_map(|t| t.clips.iter()))
            .map(Clip::end_ms)
            .max()
            .unwrap_or(0)
    }
}

// ============================================================================
// Tests
// ============================================================================
