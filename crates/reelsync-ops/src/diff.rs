//! Diff engine: the operations that turn one snapshot into another.
//!
//! Entities are matched by id, never by position or content. A change of
//! identity (a clip deleted and a look-alike created) is a remove plus an add.
//!
//! The engine replays every operation it emits onto a scratch copy of the
//! previous snapshot, so positional fields (`index`) are always exact for the
//! moment the operation is applied. Emission order:
//!
//! 1. layer/track additions and reorders (lanes going away stay for now)
//! 2. clip removals on surviving lanes
//! 3. clip placement per lane: additions, cross-lane moves, reorders
//! 4. clip time shifts and property patches
//! 5. layer/track removals (taking any clips still on them)
//! 6. layer/track property patches
//! 7. markers, groups, duration
//!
//! Reorders keep the longest increasing run of surviving entities in place and
//! move only the rest, each directly behind its desired predecessor.

use std::collections::{HashMap, HashSet};
use std::hash::Hash;

use tracing::{error, trace, warn};

use reelsync_types::{
    AudioTrack, Clip, ClipId, ClipMove, ClipPatch, ClipPlacement, Group, GroupPatch, Layer,
    LayerId, LayerInsert, LayerPatch, Marker, MarkerPatch, Operation, Reorder, TimelinePatch,
    TimelineSnapshot, TrackId, TrackInsert, TrackPatch,
};

use crate::apply::{ApplyMode, apply_op};

/// Compute the operations that transform `previous` into `desired`.
///
/// Returns an empty list when the snapshots are equal.
pub fn diff(previous: &TimelineSnapshot, desired: &TimelineSnapshot) -> Vec<Operation> {
    if previous == desired {
        return Vec::new();
    }

    let mut differ = Differ {
        work: previous.clone(),
        ops: Vec::new(),
    };
    differ.order_layers(desired);
    differ.order_tracks(desired);
    differ.remove_clips(desired);
    differ.place_clips(desired);
    differ.patch_clips(desired);
    differ.remove_lanes(desired);
    differ.patch_lanes(desired);
    differ.diff_markers(desired);
    differ.diff_groups(desired);
    differ.diff_duration(desired);

    if differ.work != *desired {
        warn!(
            "diff replay does not reproduce the desired snapshot ({} ops)",
            differ.ops.len()
        );
    }
    trace!("diff produced {} ops", differ.ops.len());
    differ.ops
}

struct Differ {
    /// `previous` with every emitted op applied.
    work: TimelineSnapshot,
    ops: Vec<Operation>,
}

impl Differ {
    fn emit(&mut self, op: Operation) {
        if let Err(e) = apply_op(&mut self.work, &op, ApplyMode::Strict) {
            error!("diff emitted an inapplicable {} on {:?}: {}", op.kind(), op.target(), e);
        }
        self.ops.push(op);
    }

    fn order_layers(&mut self, desired: &TimelineSnapshot) {
        let current: Vec<LayerId> = self.work.layers.iter().map(|l| l.id.clone()).collect();
        let target: Vec<LayerId> = desired.layers.iter().map(|l| l.id.clone()).collect();

        for step in plan_order(&current, &target) {
            if step.arriving {
                let Some(layer) = desired.layer(&step.id) else {
                    continue;
                };
                let layer = Layer {
                    clips: self.unplaced(layer.clips.iter()),
                    ..layer.clone()
                };
                self.emit(Operation::LayerAdd {
                    layer_id: step.id,
                    data: LayerInsert {
                        index: step.index,
                        layer,
                    },
                });
            } else {
                self.emit(Operation::LayerMove {
                    layer_id: step.id,
                    data: Reorder { index: step.index },
                });
            }
        }
    }

    fn order_tracks(&mut self, desired: &TimelineSnapshot) {
        let current: Vec<TrackId> = self.work.audio_tracks.iter().map(|t| t.id.clone()).collect();
        let target: Vec<TrackId> = desired.audio_tracks.iter().map(|t| t.id.clone()).collect();

        for step in plan_order(&current, &target) {
            if step.arriving {
                let Some(track) = desired.track(&step.id) else {
                    continue;
                };
                let track = AudioTrack {
                    clips: self.unplaced(track.clips.iter()),
                    ..track.clone()
                };
                self.emit(Operation::TrackAdd {
                    track_id: step.id,
                    data: TrackInsert {
                        index: step.index,
                        track,
                    },
                });
            } else {
                self.emit(Operation::TrackMove {
                    track_id: step.id,
                    data: Reorder { index: step.index },
                });
            }
        }
    }

    /// Clips not present anywhere yet; those can ride along with a new lane.
    fn unplaced<'a>(&self, clips: impl Iterator<Item = &'a Clip>) -> im::Vector<Clip> {
        clips
            .filter(|c| self.work.locate_clip(&c.id).is_none())
            .cloned()
            .collect()
    }

    fn remove_clips(&mut self, desired: &TimelineSnapshot) {
        let wanted: HashSet<ClipId> = desired
            .lanes()
            .iter()
            .filter_map(|lane| desired.lane_clips(lane))
            .flat_map(|clips| clips.iter().map(|c| c.id.clone()))
            .collect();

        let mut doomed = Vec::new();
        for lane in self.work.lanes() {
            // Lanes that go away take their clips with them.
            if !desired.has_lane(&lane) {
                continue;
            }
            if let Some(clips) = self.work.lane_clips(&lane) {
                doomed.extend(
                    clips
                        .iter()
                        .filter(|c| !wanted.contains(&c.id))
                        .map(|c| c.id.clone()),
                );
            }
        }
        for clip_id in doomed {
            self.emit(Operation::ClipRemove { clip_id });
        }
    }

    fn place_clips(&mut self, desired: &TimelineSnapshot) {
        for lane in desired.lanes() {
            let Some(target_clips) = desired.lane_clips(&lane) else {
                continue;
            };
            let by_id: HashMap<&ClipId, &Clip> = target_clips.iter().map(|c| (&c.id, c)).collect();
            let target: Vec<ClipId> = target_clips.iter().map(|c| c.id.clone()).collect();
            let current: Vec<ClipId> = self
                .work
                .lane_clips(&lane)
                .map(|clips| clips.iter().map(|c| c.id.clone()).collect())
                .unwrap_or_default();

            for step in plan_order(&current, &target) {
                let Some(&clip) = by_id.get(&step.id) else {
                    continue;
                };
                let existing_start = self.work.clip(&step.id).map(|c| c.start_ms);
                let op = match existing_start {
                    None => Operation::ClipAdd {
                        clip_id: step.id,
                        data: ClipPlacement {
                            lane: lane.clone(),
                            index: step.index,
                            clip: clip.clone(),
                        },
                    },
                    Some(start_ms) => Operation::ClipMove {
                        clip_id: step.id,
                        data: ClipMove {
                            start_ms: (start_ms != clip.start_ms).then_some(clip.start_ms),
                            lane: step.arriving.then(|| lane.clone()),
                            index: Some(step.index),
                        },
                    },
                };
                self.emit(op);
            }
        }
    }

    fn patch_clips(&mut self, desired: &TimelineSnapshot) {
        let mut pending = Vec::new();
        for lane in desired.lanes() {
            let Some(clips) = desired.lane_clips(&lane) else {
                continue;
            };
            for clip in clips.iter() {
                let Some(current) = self.work.clip(&clip.id) else {
                    continue;
                };
                if current.start_ms != clip.start_ms {
                    pending.push(Operation::ClipMove {
                        clip_id: clip.id.clone(),
                        data: ClipMove {
                            start_ms: Some(clip.start_ms),
                            ..Default::default()
                        },
                    });
                }
                let patch = clip_patch(current, clip);
                if !patch.is_empty() {
                    pending.push(Operation::ClipUpdate {
                        clip_id: clip.id.clone(),
                        data: patch,
                    });
                }
            }
        }
        for op in pending {
            self.emit(op);
        }
    }

    fn remove_lanes(&mut self, desired: &TimelineSnapshot) {
        let layers: Vec<LayerId> = self
            .work
            .layers
            .iter()
            .filter(|l| desired.layer_index(&l.id).is_none())
            .map(|l| l.id.clone())
            .collect();
        for layer_id in layers {
            self.emit(Operation::LayerRemove { layer_id });
        }

        let tracks: Vec<TrackId> = self
            .work
            .audio_tracks
            .iter()
            .filter(|t| desired.track_index(&t.id).is_none())
            .map(|t| t.id.clone())
            .collect();
        for track_id in tracks {
            self.emit(Operation::TrackRemove { track_id });
        }
    }

    fn patch_lanes(&mut self, desired: &TimelineSnapshot) {
        let mut pending = Vec::new();
        for layer in desired.layers.iter() {
            if let Some(current) = self.work.layer(&layer.id) {
                let patch = layer_patch(current, layer);
                if !patch.is_empty() {
                    pending.push(Operation::LayerUpdate {
                        layer_id: layer.id.clone(),
                        data: patch,
                    });
                }
            }
        }
        for track in desired.audio_tracks.iter() {
            if let Some(current) = self.work.track(&track.id) {
                let patch = track_patch(current, track);
                if !patch.is_empty() {
                    pending.push(Operation::TrackUpdate {
                        track_id: track.id.clone(),
                        data: patch,
                    });
                }
            }
        }
        for op in pending {
            self.emit(op);
        }
    }

    fn diff_markers(&mut self, desired: &TimelineSnapshot) {
        let mut pending = Vec::new();
        for marker_id in self.work.markers.keys() {
            if !desired.markers.contains_key(marker_id) {
                pending.push(Operation::MarkerRemove {
                    marker_id: marker_id.clone(),
                });
            }
        }
        for (marker_id, marker) in desired.markers.iter() {
            match self.work.markers.get(marker_id) {
                None => pending.push(Operation::MarkerAdd {
                    marker_id: marker_id.clone(),
                    data: marker.clone(),
                }),
                Some(current) if current != marker => pending.push(Operation::MarkerUpdate {
                    marker_id: marker_id.clone(),
                    data: marker_patch(current, marker),
                }),
                Some(_) => {}
            }
        }
        for op in pending {
            self.emit(op);
        }
    }

    fn diff_groups(&mut self, desired: &TimelineSnapshot) {
        let mut pending = Vec::new();
        for group_id in self.work.groups.keys() {
            if !desired.groups.contains_key(group_id) {
                pending.push(Operation::GroupRemove {
                    group_id: group_id.clone(),
                });
            }
        }
        for (group_id, group) in desired.groups.iter() {
            match self.work.groups.get(group_id) {
                None => pending.push(Operation::GroupAdd {
                    group_id: group_id.clone(),
                    data: group.clone(),
                }),
                Some(current) if current != group => pending.push(Operation::GroupUpdate {
                    group_id: group_id.clone(),
                    data: group_patch(current, group),
                }),
                Some(_) => {}
            }
        }
        for op in pending {
            self.emit(op);
        }
    }

    fn diff_duration(&mut self, desired: &TimelineSnapshot) {
        if self.work.duration_ms != desired.duration_ms {
            self.emit(Operation::TimelineUpdate {
                data: TimelinePatch {
                    duration_ms: Some(desired.duration_ms),
                },
            });
        }
    }
}

// ============================================================================
// Patch builders
// ============================================================================

fn clip_patch(from: &Clip, to: &Clip) -> ClipPatch {
    let mut patch = ClipPatch::default();
    if from.name != to.name {
        patch.name = Some(to.name.clone());
    }
    if from.asset_id != to.asset_id {
        patch.asset_id = Some(to.asset_id.clone());
    }
    if from.duration_ms != to.duration_ms {
        patch.duration_ms = Some(to.duration_ms);
    }
    if from.source_in_ms != to.source_in_ms {
        patch.source_in_ms = Some(to.source_in_ms);
    }
    for (key, value) in &to.properties {
        if from.properties.get(key) != Some(value) {
            patch.properties.insert(key.clone(), Some(value.clone()));
        }
    }
    for key in from.properties.keys() {
        if !to.properties.contains_key(key) {
            patch.properties.insert(key.clone(), None);
        }
    }
    patch
}

fn layer_patch(from: &Layer, to: &Layer) -> LayerPatch {
    LayerPatch {
        name: (from.name != to.name).then(|| to.name.clone()),
        hidden: (from.hidden != to.hidden).then_some(to.hidden),
        locked: (from.locked != to.locked).then_some(to.locked),
        opacity: (from.opacity != to.opacity).then_some(to.opacity),
    }
}

fn track_patch(from: &AudioTrack, to: &AudioTrack) -> TrackPatch {
    TrackPatch {
        name: (from.name != to.name).then(|| to.name.clone()),
        muted: (from.muted != to.muted).then_some(to.muted),
        volume: (from.volume != to.volume).then_some(to.volume),
    }
}

fn marker_patch(from: &Marker, to: &Marker) -> MarkerPatch {
    MarkerPatch {
        time_ms: (from.time_ms != to.time_ms).then_some(to.time_ms),
        label: (from.label != to.label).then(|| to.label.clone()),
        color: (from.color != to.color).then(|| to.color.clone()),
    }
}

fn group_patch(from: &Group, to: &Group) -> GroupPatch {
    GroupPatch {
        name: (from.name != to.name).then(|| to.name.clone()),
        clip_ids: (from.clip_ids != to.clip_ids).then(|| to.clip_ids.clone()),
    }
}

// ============================================================================
// Ordering
// ============================================================================

/// One placement in an ordering plan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Placement<K> {
    pub id: K,
    /// Position at application time, after the entity left its old slot.
    pub index: usize,
    /// Not in `current`: added or moved in from elsewhere.
    pub arriving: bool,
}

/// Plan the placements that bring `desired` into order within `current`.
///
/// `current` may contain entities absent from `desired` (they are left where
/// they are) and may lack some of `desired` (those arrive).
pub(crate) fn plan_order<K: Clone + Eq + Hash>(current: &[K], desired: &[K]) -> Vec<Placement<K>> {
    let positions: HashMap<&K, usize> = current.iter().enumerate().map(|(i, k)| (k, i)).collect();

    // (desired index, current position) for entities already here
    let present: Vec<(usize, usize)> = desired
        .iter()
        .enumerate()
        .filter_map(|(i, k)| positions.get(k).map(|&p| (i, p)))
        .collect();
    let run = longest_increasing(&present.iter().map(|&(_, p)| p).collect::<Vec<_>>());
    let stable: HashSet<usize> = run.into_iter().map(|j| present[j].0).collect();

    let mut sim: Vec<K> = current.to_vec();
    let mut plan = Vec::new();
    for (i, id) in desired.iter().enumerate() {
        if stable.contains(&i) {
            continue;
        }
        let arriving = !positions.contains_key(id);
        let old_pos = sim.iter().position(|k| k == id);
        if let Some(pos) = old_pos {
            sim.remove(pos);
        }
        let index = match i {
            0 => 0,
            _ => sim
                .iter()
                .position(|k| k == &desired[i - 1])
                .map_or(sim.len(), |p| p + 1),
        };
        sim.insert(index, id.clone());
        if old_pos == Some(index) && !arriving {
            continue;
        }
        plan.push(Placement {
            id: id.clone(),
            index,
            arriving,
        });
    }
    plan
}

/// Indices of one longest strictly increasing subsequence of `seq`.
fn longest_increasing(seq: &[usize]) -> Vec<usize> {
    let mut tails: Vec<usize> = Vec::new();
    let mut prev: Vec<Option<usize>> = vec![None; seq.len()];
    for (i, &value) in seq.iter().enumerate() {
        let slot = tails.partition_point(|&t| seq[t] < value);
        if slot > 0 {
            prev[i] = Some(tails[slot - 1]);
        }
        if slot == tails.len() {
            tails.push(i);
        } else {
            tails[slot] = i;
        }
    }

    let mut run = Vec::with_capacity(tails.len());
    let mut cursor = tails.last().copied();
    while let Some(i) = cursor {
        run.push(i);
        cursor = prev[i];
    }
    run.reverse();
    run
}

// ============================================================================
// Tests
// ============================================================================
