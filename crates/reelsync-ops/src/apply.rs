//! Replaying operations onto a snapshot.
//!
//! Two modes share one implementation:
//!
//! - **Strict** is what the server runs. Any unknown target, duplicate id or
//!   out-of-range index fails the operation, and [`apply_ops`] fails the whole
//!   batch without touching the input.
//! - **Lenient** is what the remote merger runs against a local snapshot that
//!   may already disagree with the author's. Missing targets are skipped,
//!   indices are clamped, and adds of an id that already exists overwrite it,
//!   so the last applied write wins field by field.

use std::collections::HashSet;

use tracing::trace;

use reelsync_types::{
    AudioTrack, Clip, ClipId, ClipMove, ClipPatch, ClipPlacement, Group, GroupPatch, Layer,
    LayerPatch, Marker, MarkerPatch, Operation, TimelineSnapshot, TrackPatch,
};

use crate::{OpError, Result};

/// How strictly to validate operations.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ApplyMode {
    Strict,
    Lenient,
}

/// Outcome of a lenient replay.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ApplyReport {
    pub applied: usize,
    /// Index into the input slice and why the operation was skipped.
    pub skipped: Vec<(usize, OpError)>,
}

/// Apply a batch atomically: either every operation lands or none does.
pub fn apply_ops(snapshot: &TimelineSnapshot, ops: &[Operation]) -> Result<TimelineSnapshot> {
    let mut work = snapshot.clone();
    for op in ops {
        apply_op(&mut work, op, ApplyMode::Strict)?;
    }
    Ok(work)
}

/// Apply as much of a batch as the snapshot allows.
pub fn apply_ops_lenient(
    snapshot: &TimelineSnapshot,
    ops: &[Operation],
) -> (TimelineSnapshot, ApplyReport) {
    let mut work = snapshot.clone();
    let mut report = ApplyReport::default();
    for (i, op) in ops.iter().enumerate() {
        // A failed op may have half-applied; replay onto a scratch copy.
        let mut scratch = work.clone();
        match apply_op(&mut scratch, op, ApplyMode::Lenient) {
            Ok(()) => {
                work = scratch;
                report.applied += 1;
            }
            Err(e) => {
                trace!("lenient apply skipped {} on {:?}: {}", op.kind(), op.target(), e);
                report.skipped.push((i, e));
            }
        }
    }
    (work, report)
}

/// Apply a single operation in place.
///
/// On error the snapshot may be partially modified; use [`apply_ops`] or
/// [`apply_ops_lenient`] for all-or-nothing behaviour.
pub fn apply_op(snapshot: &mut TimelineSnapshot, op: &Operation, mode: ApplyMode) -> Result<()> {
    match op {
        Operation::ClipAdd { clip_id, data } => add_clip(snapshot, clip_id, data, mode),
        Operation::ClipRemove { clip_id } => {
            remove_clip(snapshot, clip_id)?;
            Ok(())
        }
        Operation::ClipMove { clip_id, data } => move_clip(snapshot, clip_id, data, mode),
        Operation::ClipUpdate { clip_id, data } => {
            let (lane, pos) = snapshot
                .locate_clip(clip_id)
                .ok_or_else(|| OpError::ClipNotFound(clip_id.clone()))?;
            let clip = snapshot
                .lane_clips_mut(&lane)
                .and_then(|clips| clips.get_mut(pos))
                .ok_or_else(|| OpError::ClipNotFound(clip_id.clone()))?;
            patch_clip(clip, data);
            Ok(())
        }

        Operation::LayerAdd { layer_id, data } => {
            check_id(layer_id.as_str(), data.layer.id.as_str())?;
            if let Some(existing) = snapshot.layer_index(layer_id) {
                if mode == ApplyMode::Strict {
                    return Err(OpError::DuplicateLayer(layer_id.clone()));
                }
                snapshot.layers.remove(existing);
            }
            let layer = claim_clips(snapshot, data.layer.clone(), mode)?;
            let index = bound(data.index, snapshot.layers.len(), mode)?;
            snapshot.layers.insert(index, layer);
            Ok(())
        }
        Operation::LayerRemove { layer_id } => {
            let idx = snapshot
                .layer_index(layer_id)
                .ok_or_else(|| OpError::LayerNotFound(layer_id.clone()))?;
            snapshot.layers.remove(idx);
            Ok(())
        }
        Operation::LayerMove { layer_id, data } => {
            let idx = snapshot
                .layer_index(layer_id)
                .ok_or_else(|| OpError::LayerNotFound(layer_id.clone()))?;
            let layer = snapshot.layers.remove(idx);
            let index = bound(data.index, snapshot.layers.len(), mode)?;
            snapshot.layers.insert(index, layer);
            Ok(())
        }
        Operation::LayerUpdate { layer_id, data } => {
            let idx = snapshot
                .layer_index(layer_id)
                .ok_or_else(|| OpError::LayerNotFound(layer_id.clone()))?;
            if let Some(layer) = snapshot.layers.get_mut(idx) {
                patch_layer(layer, data);
            }
            Ok(())
        }

        Operation::TrackAdd { track_id, data } => {
            check_id(track_id.as_str(), data.track.id.as_str())?;
            if let Some(existing) = snapshot.track_index(track_id) {
                if mode == ApplyMode::Strict {
                    return Err(OpError::DuplicateTrack(track_id.clone()));
                }
                snapshot.audio_tracks.remove(existing);
            }
            let track = claim_track_clips(snapshot, data.track.clone(), mode)?;
            let index = bound(data.index, snapshot.audio_tracks.len(), mode)?;
            snapshot.audio_tracks.insert(index, track);
            Ok(())
        }
        Operation::TrackRemove { track_id } => {
            let idx = snapshot
                .track_index(track_id)
                .ok_or_else(|| OpError::TrackNotFound(track_id.clone()))?;
            snapshot.audio_tracks.remove(idx);
            Ok(())
        }
        Operation::TrackMove { track_id, data } => {
            let idx = snapshot
                .track_index(track_id)
                .ok_or_else(|| OpError::TrackNotFound(track_id.clone()))?;
            let track = snapshot.audio_tracks.remove(idx);
            let index = bound(data.index, snapshot.audio_tracks.len(), mode)?;
            snapshot.audio_tracks.insert(index, track);
            Ok(())
        }
        Operation::TrackUpdate { track_id, data } => {
            let idx = snapshot
                .track_index(track_id)
                .ok_or_else(|| OpError::TrackNotFound(track_id.clone()))?;
            if let Some(track) = snapshot.audio_tracks.get_mut(idx) {
                patch_track(track, data);
            }
            Ok(())
        }

        Operation::MarkerAdd { marker_id, data } => {
            check_id(marker_id.as_str(), data.id.as_str())?;
            if mode == ApplyMode::Strict && snapshot.markers.contains_key(marker_id) {
                return Err(OpError::DuplicateMarker(marker_id.clone()));
            }
            snapshot.markers.insert(marker_id.clone(), data.clone());
            Ok(())
        }
        Operation::MarkerRemove { marker_id } => snapshot
            .markers
            .remove(marker_id)
            .map(|_| ())
            .ok_or_else(|| OpError::MarkerNotFound(marker_id.clone())),
        Operation::MarkerUpdate { marker_id, data } => {
            let marker = snapshot
                .markers
                .get_mut(marker_id)
                .ok_or_else(|| OpError::MarkerNotFound(marker_id.clone()))?;
            patch_marker(marker, data);
            Ok(())
        }

        Operation::GroupAdd { group_id, data } => {
            check_id(group_id.as_str(), data.id.as_str())?;
            if mode == ApplyMode::Strict && snapshot.groups.contains_key(group_id) {
                return Err(OpError::DuplicateGroup(group_id.clone()));
            }
            snapshot.groups.insert(group_id.clone(), data.clone());
            Ok(())
        }
        Operation::GroupRemove { group_id } => snapshot
            .groups
            .remove(group_id)
            .map(|_| ())
            .ok_or_else(|| OpError::GroupNotFound(group_id.clone())),
        Operation::GroupUpdate { group_id, data } => {
            let group = snapshot
                .groups
                .get_mut(group_id)
                .ok_or_else(|| OpError::GroupNotFound(group_id.clone()))?;
            patch_group(group, data);
            Ok(())
        }

        Operation::TimelineUpdate { data } => {
            if let Some(duration_ms) = data.duration_ms {
                snapshot.duration_ms = duration_ms;
            }
            Ok(())
        }
        Operation::TimelineReplace { data } => {
            validate_unique_ids(data)?;
            *snapshot = (**data).clone();
            Ok(())
        }
    }
}

/// Check that no clip, layer or track id appears twice.
pub fn validate_unique_ids(snapshot: &TimelineSnapshot) -> Result<()> {
    let mut layers = HashSet::new();
    for layer in snapshot.layers.iter() {
        if !layers.insert(&layer.id) {
            return Err(OpError::DuplicateLayer(layer.id.clone()));
        }
    }
    let mut tracks = HashSet::new();
    for track in snapshot.audio_tracks.iter() {
        if !tracks.insert(&track.id) {
            return Err(OpError::DuplicateTrack(track.id.clone()));
        }
    }
    let mut clips = HashSet::new();
    let all_clips = snapshot
        .layers
        .iter()
        .flat_map(|l| l.clips.iter())
        .chain(snapshot.audio_tracks.iter().flat_map(|t| t.clips.iter()));
    for clip in all_clips {
        if !clips.insert(&clip.id) {
            return Err(OpError::DuplicateClip(clip.id.clone()));
        }
    }
    Ok(())
}

// ============================================================================
// Internal helpers
// ============================================================================

fn bound(index: usize, len: usize, mode: ApplyMode) -> Result<usize> {
    match mode {
        _ if index <= len => Ok(index),
        ApplyMode::Lenient => Ok(len),
        ApplyMode::Strict => Err(OpError::IndexOutOfBounds { index, len }),
    }
}

fn check_id(op_id: &str, payload_id: &str) -> Result<()> {
    if op_id == payload_id {
        Ok(())
    } else {
        Err(OpError::IdMismatch {
            op_id: op_id.to_string(),
            payload_id: payload_id.to_string(),
        })
    }
}

fn remove_clip(snapshot: &mut TimelineSnapshot, clip_id: &ClipId) -> Result<Clip> {
    let (lane, pos) = snapshot
        .locate_clip(clip_id)
        .ok_or_else(|| OpError::ClipNotFound(clip_id.clone()))?;
    let clips = snapshot
        .lane_clips_mut(&lane)
        .ok_or_else(|| OpError::LaneNotFound(lane.clone()))?;
    Ok(clips.remove(pos))
}

fn add_clip(
    snapshot: &mut TimelineSnapshot,
    clip_id: &ClipId,
    data: &ClipPlacement,
    mode: ApplyMode,
) -> Result<()> {
    check_id(clip_id.as_str(), data.clip.id.as_str())?;
    if !snapshot.has_lane(&data.lane) {
        return Err(OpError::LaneNotFound(data.lane.clone()));
    }
    if snapshot.locate_clip(clip_id).is_some() {
        match mode {
            ApplyMode::Strict => return Err(OpError::DuplicateClip(clip_id.clone())),
            ApplyMode::Lenient => {
                remove_clip(snapshot, clip_id)?;
            }
        }
    }
    let clips = snapshot
        .lane_clips_mut(&data.lane)
        .ok_or_else(|| OpError::LaneNotFound(data.lane.clone()))?;
    let index = bound(data.index, clips.len(), mode)?;
    clips.insert(index, data.clip.clone());
    Ok(())
}

fn move_clip(
    snapshot: &mut TimelineSnapshot,
    clip_id: &ClipId,
    data: &ClipMove,
    mode: ApplyMode,
) -> Result<()> {
    let (from_lane, from_pos) = snapshot
        .locate_clip(clip_id)
        .ok_or_else(|| OpError::ClipNotFound(clip_id.clone()))?;

    let dest_lane = match &data.lane {
        Some(lane) if snapshot.has_lane(lane) => lane.clone(),
        Some(lane) => match mode {
            ApplyMode::Strict => return Err(OpError::LaneNotFound(lane.clone())),
            ApplyMode::Lenient => from_lane.clone(),
        },
        None => from_lane.clone(),
    };

    // Pure time shift: no list surgery.
    if dest_lane == from_lane && data.index.is_none() {
        if let (Some(start_ms), Some(clip)) = (
            data.start_ms,
            snapshot
                .lane_clips_mut(&from_lane)
                .and_then(|clips| clips.get_mut(from_pos)),
        ) {
            clip.start_ms = start_ms;
        }
        return Ok(());
    }

    let mut clip = remove_clip(snapshot, clip_id)?;
    if let Some(start_ms) = data.start_ms {
        clip.start_ms = start_ms;
    }
    let clips = snapshot
        .lane_clips_mut(&dest_lane)
        .ok_or_else(|| OpError::LaneNotFound(dest_lane.clone()))?;
    let index = match data.index {
        Some(index) => bound(index, clips.len(), mode)?,
        None if dest_lane == from_lane => from_pos.min(clips.len()),
        None => clips.len(),
    };
    clips.insert(index, clip);
    Ok(())
}

/// Make sure the clips carried by a new lane are not already placed elsewhere.
fn claim_clips(snapshot: &mut TimelineSnapshot, layer: Layer, mode: ApplyMode) -> Result<Layer> {
    release_existing(snapshot, layer.clips.iter(), mode)?;
    Ok(layer)
}

fn claim_track_clips(
    snapshot: &mut TimelineSnapshot,
    track: AudioTrack,
    mode: ApplyMode,
) -> Result<AudioTrack> {
    release_existing(snapshot, track.clips.iter(), mode)?;
    Ok(track)
}

fn release_existing<'a>(
    snapshot: &mut TimelineSnapshot,
    clips: impl Iterator<Item = &'a Clip>,
    mode: ApplyMode,
) -> Result<()> {
    for clip in clips {
        if snapshot.locate_clip(&clip.id).is_some() {
            match mode {
                ApplyMode::Strict => return Err(OpError::DuplicateClip(clip.id.clone())),
                ApplyMode::Lenient => {
                    remove_clip(snapshot, &clip.id)?;
                }
            }
        }
    }
    Ok(())
}

fn patch_clip(clip: &mut Clip, patch: &ClipPatch) {
    if let Some(name) = &patch.name {
        clip.name = name.clone();
    }
    if let Some(asset_id) = &patch.asset_id {
        clip.asset_id = asset_id.clone();
    }
    if let Some(duration_ms) = patch.duration_ms {
        clip.duration_ms = duration_ms;
    }
    if let Some(source_in_ms) = patch.source_in_ms {
        clip.source_in_ms = source_in_ms;
    }
    for (key, value) in &patch.properties {
        match value {
            Some(value) => {
                clip.properties.insert(key.clone(), value.clone());
            }
            None => {
                clip.properties.remove(key);
            }
        }
    }
}

fn patch_layer(layer: &mut Layer, patch: &LayerPatch) {
    if let Some(name) = &patch.name {
        layer.name = name.clone();
    }
    if let Some(hidden) = patch.hidden {
        layer.hidden = hidden;
    }
    if let Some(locked) = patch.locked {
        layer.locked = locked;
    }
    if let Some(opacity) = patch.opacity {
        layer.opacity = opacity;
    }
}

fn patch_track(track: &mut AudioTrack, patch: &TrackPatch) {
    if let Some(name) = &patch.name {
        track.name = name.clone();
    }
    if let Some(muted) = patch.muted {
        track.muted = muted;
    }
    if let Some(volume) = patch.volume {
        track.volume = volume;
    }
}

fn patch_marker(marker: &mut Marker, patch: &MarkerPatch) {
    if let Some(time_ms) = patch.time_ms {
        marker.time_ms = time_ms;
    }
    if let Some(label) = &patch.label {
        marker.label = label.clone();
    }
    if let Some(color) = &patch.color {
        marker.color = color.clone();
    }
}

fn patch_group(group: &mut Group, patch: &GroupPatch) {
    if let Some(name) = &patch.name {
        group.name = name.clone();
    }
    if let Some(clip_ids) = &patch.clip_ids {
        group.clip_ids = clip_ids.clone();
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use reelsync_types::{
        Lane, LayerId, LayerInsert, MarkerId, Reorder, TimelinePatch, TrackId, TrackInsert,
    };
    use serde_json::json;

    fn base() -> TimelineSnapshot {
        TimelineSnapshot::new()
            .with_layer(
                Layer::new("L1")
                    .with_clip(Clip::new("C1", 0, 1000))
                    .with_clip(Clip::new("C2", 1000, 1000)),
            )
            .with_layer(Layer::new("L2"))
            .with_track(AudioTrack::new("A1").with_clip(Clip::new("S1", 0, 3000)))
            .with_marker(Marker::new("M1", 500, "beat"))
    }

    fn ids(snapshot: &TimelineSnapshot, lane: &Lane) -> Vec<String> {
        snapshot
            .lane_clips(lane)
            .unwrap()
            .iter()
            .map(|c| c.id.to_string())
            .collect()
    }

    fn layer(id: &str) -> Lane {
        Lane::Layer(LayerId::from(id))
    }

    #[test]
    fn test_move_start_only_keeps_position() {
        let op = Operation::ClipMove {
            clip_id: ClipId::from("C1"),
            data: ClipMove {
                start_ms: Some(5000),
                ..Default::default()
            },
        };
        let out = apply_ops(&base(), &[op]).unwrap();
        assert_eq!(ids(&out, &layer("L1")), vec!["C1", "C2"]);
        assert_eq!(out.clip(&ClipId::from("C1")).unwrap().start_ms, 5000);
    }

    #[test]
    fn test_move_across_lanes() {
        let op = Operation::ClipMove {
            clip_id: ClipId::from("S1"),
            data: ClipMove {
                start_ms: None,
                lane: Some(layer("L2")),
                index: Some(0),
            },
        };
        let out = apply_ops(&base(), &[op]).unwrap();
        assert_eq!(ids(&out, &layer("L2")), vec!["S1"]);
        assert!(ids(&out, &Lane::Track(TrackId::from("A1"))).is_empty());
    }

    #[test]
    fn test_strict_batch_is_atomic() {
        let ops = vec![
            Operation::ClipRemove {
                clip_id: ClipId::from("C1"),
            },
            Operation::ClipRemove {
                clip_id: ClipId::from("ghost"),
            },
        ];
        let input = base();
        let err = apply_ops(&input, &ops).unwrap_err();
        assert_eq!(err, OpError::ClipNotFound(ClipId::from("ghost")));
        assert_eq!(input.clip_count(), 3);
    }

    #[test]
    fn test_strict_rejects_duplicates_and_bad_index() {
        let dup = Operation::ClipAdd {
            clip_id: ClipId::from("C1"),
            data: ClipPlacement {
                lane: layer("L2"),
                index: 0,
                clip: Clip::new("C1", 0, 10),
            },
        };
        assert_eq!(
            apply_ops(&base(), &[dup]).unwrap_err(),
            OpError::DuplicateClip(ClipId::from("C1"))
        );

        let far = Operation::LayerMove {
            layer_id: LayerId::from("L1"),
            data: Reorder { index: 7 },
        };
        assert_eq!(
            apply_ops(&base(), &[far]).unwrap_err(),
            OpError::IndexOutOfBounds { index: 7, len: 1 }
        );
    }

    #[test]
    fn test_id_mismatch_is_validation_error() {
        let op = Operation::MarkerAdd {
            marker_id: MarkerId::from("M2"),
            data: Marker::new("M3", 0, ""),
        };
        assert!(matches!(
            apply_ops(&base(), &[op]),
            Err(OpError::IdMismatch { .. })
        ));
    }

    #[test]
    fn test_lenient_skips_missing_and_clamps() {
        let ops = vec![
            Operation::ClipUpdate {
                clip_id: ClipId::from("ghost"),
                data: ClipPatch {
                    name: Some("x".into()),
                    ..Default::default()
                },
            },
            Operation::ClipMove {
                clip_id: ClipId::from("C1"),
                data: ClipMove {
                    start_ms: None,
                    lane: None,
                    index: Some(99),
                },
            },
        ];
        let (out, report) = apply_ops_lenient(&base(), &ops);
        assert_eq!(report.applied, 1);
        assert_eq!(report.skipped.len(), 1);
        assert_eq!(report.skipped[0].0, 0);
        assert_eq!(ids(&out, &layer("L1")), vec!["C2", "C1"]);
    }

    #[test]
    fn test_lenient_add_overwrites_existing() {
        let op = Operation::ClipAdd {
            clip_id: ClipId::from("C1"),
            data: ClipPlacement {
                lane: layer("L2"),
                index: 0,
                clip: Clip::new("C1", 42, 10),
            },
        };
        let (out, report) = apply_ops_lenient(&base(), &[op]);
        assert!(report.skipped.is_empty());
        assert_eq!(ids(&out, &layer("L1")), vec!["C2"]);
        assert_eq!(out.clip(&ClipId::from("C1")).unwrap().start_ms, 42);
    }

    #[test]
    fn test_lenient_lane_add_replaces_existing() {
        let ops = [
            Operation::LayerAdd {
                layer_id: LayerId::from("L1"),
                data: LayerInsert {
                    index: 1,
                    layer: Layer::new("L1")
                        .with_name("Graded")
                        .with_clip(Clip::new("C2", 0, 700)),
                },
            },
            Operation::TrackAdd {
                track_id: TrackId::from("A1"),
                data: TrackInsert {
                    index: 0,
                    track: AudioTrack::new("A1").with_name("Stems"),
                },
            },
        ];
        let (out, report) = apply_ops_lenient(&base(), &ops);
        assert!(report.skipped.is_empty());
        assert_eq!(out.layers.len(), 2);
        assert_eq!(out.layers[1].name, "Graded");
        assert_eq!(ids(&out, &layer("L1")), vec!["C2"]);
        assert!(out.clip(&ClipId::from("C1")).is_none());
        assert_eq!(out.audio_tracks.len(), 1);
        assert_eq!(out.audio_tracks[0].name, "Stems");
        assert!(out.clip(&ClipId::from("S1")).is_none());

        assert!(matches!(
            apply_ops(&base(), &ops[..1]),
            Err(OpError::DuplicateLayer(_))
        ));
    }

    #[test]
    fn test_layer_remove_takes_its_clips() {
        let op = Operation::LayerRemove {
            layer_id: LayerId::from("L1"),
        };
        let out = apply_ops(&base(), &[op]).unwrap();
        assert_eq!(out.clip_count(), 1);
    }

    #[test]
    fn test_layer_add_with_clips() {
        let op = Operation::LayerAdd {
            layer_id: LayerId::from("L0"),
            data: LayerInsert {
                index: 0,
                layer: Layer::new("L0").with_clip(Clip::new("T1", 0, 500)),
            },
        };
        let out = apply_ops(&base(), &[op]).unwrap();
        assert_eq!(out.layers[0].id, LayerId::from("L0"));
        assert_eq!(
            out.locate_clip(&ClipId::from("T1")),
            Some((layer("L0"), 0))
        );
    }

    #[test]
    fn test_patch_properties_set_and_remove() {
        let start = base();
        let mut with_prop = start.clone();
        apply_op(
            &mut with_prop,
            &Operation::ClipUpdate {
                clip_id: ClipId::from("C2"),
                data: ClipPatch {
                    properties: [("scale".to_string(), Some(json!(2.0)))].into(),
                    ..Default::default()
                },
            },
            ApplyMode::Strict,
        )
        .unwrap();
        assert_eq!(
            with_prop.clip(&ClipId::from("C2")).unwrap().properties["scale"],
            json!(2.0)
        );

        apply_op(
            &mut with_prop,
            &Operation::ClipUpdate {
                clip_id: ClipId::from("C2"),
                data: ClipPatch {
                    properties: [("scale".to_string(), None)].into(),
                    ..Default::default()
                },
            },
            ApplyMode::Strict,
        )
        .unwrap();
        assert_eq!(with_prop, start);
    }

    #[test]
    fn test_replace_validates_ids() {
        let bad = TimelineSnapshot::new()
            .with_layer(Layer::new("L1").with_clip(Clip::new("C1", 0, 1)))
            .with_layer(Layer::new("L2").with_clip(Clip::new("C1", 0, 1)));
        let op = Operation::TimelineReplace { data: Box::new(bad) };
        assert_eq!(
            apply_ops(&base(), &[op]).unwrap_err(),
            OpError::DuplicateClip(ClipId::from("C1"))
        );

        let op = Operation::TimelineUpdate {
            data: TimelinePatch {
                duration_ms: Some(123),
            },
        };
        assert_eq!(apply_ops(&base(), &[op]).unwrap().duration_ms, 123);
    }
}
