//! Motion datasets: clips, per-sample feature vectors and the weights used to
//! compare them.
//!
//! ## Feature layout
//! ```text
//! | pose: 6 per body + facing3 | goal: 10 per future sample, 10 per history sample | extras: bias, group |
//! ```
//! Authored entries carry the pose and goal sections; extras are derived from
//! the entry's `biased` flag and `group`.

pub mod packed;
pub mod registry;
pub mod search;
#[cfg(any(test, feature = "test-support"))]
pub mod testing;

pub use crate::ids::{ClipId, DatasetId, LayerId, TransitionTableId};
pub use registry::DatasetRegistry;
pub use search::{ClosestEntry, MirrorMode, Query, SearchParams};

use fxhash::FxHashMap;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::error::{LocomotionError, Result};
use crate::math::{Pos3, Vec3};
use crate::sample::AnimationSample;
use crate::settings::MatchingSettings;
use crate::trajectory::{Trajectory, TrajectorySample};

pub const EXTRA_DIMS: usize = 2;
pub const EXTRA_BIAS: usize = 0;
pub const EXTRA_GROUP: usize = 1;
/// Values per trajectory sample: pos3, vel3, facing3, yaw1.
pub const GOAL_SAMPLE_DIMS: usize = 10;
pub const POSE_BODY_DIMS: usize = 6;
/// Slack when comparing a sample's fractional frame against entry frames.
const FRAME_EPSILON: f32 = 1e-3;

// ============================================================================
// Authored form
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ClipInfo {
    pub id: ClipId,
    /// Seconds
    pub duration: f32,
    #[serde(default)]
    pub looping: bool,
    /// Feature samples per second
    #[serde(default = "default_sample_rate")]
    pub sample_rate: f32,
}

fn default_sample_rate() -> f32 {
    30.0
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct EntryDef {
    pub clip: ClipId,
    /// Sample index within the clip
    pub frame: u32,
    #[serde(default = "LayerId::default_layer")]
    pub layer: LayerId,
    /// Biased clips are favoured by `anim_bias_weight`
    #[serde(default)]
    pub biased: bool,
    #[serde(default)]
    pub group: i32,
    /// Pose then goal sections
    pub features: Vec<f32>,
}

/// Clip tried when a change is forced and nothing in the dataset is acceptable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct FallbackClip {
    pub clip: ClipId,
    #[serde(default)]
    pub cost_bias: f32,
}

/// A dataset as authored on disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct MotionDatasetDef {
    pub id: DatasetId,
    #[serde(default)]
    pub settings: MatchingSettings,
    pub clips: Vec<ClipInfo>,
    pub entries: Vec<EntryDef>,
    /// Per-dimension multipliers producing the mirrored vector
    #[serde(default)]
    pub mirror: Option<Vec<f32>>,
    /// Per-dimension dead zone subtracted before squaring
    #[serde(default)]
    pub feature_mins: Vec<f32>,
    #[serde(default)]
    pub fallbacks: Vec<FallbackClip>,
    #[serde(default)]
    pub idle_clip: Option<ClipId>,
}

// ============================================================================
// Feature layout
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeatureLayout {
    pub num_bodies: usize,
    pub num_samples: usize,
    pub num_prev_samples: usize,
}

impl FeatureLayout {
    pub fn from_settings(settings: &MatchingSettings) -> Self {
        Self {
            num_bodies: settings.pose.bodies.len(),
            num_samples: settings.goals.num_samples,
            num_prev_samples: settings.goals.num_prev_samples,
        }
    }

    pub fn pose_dims(&self) -> usize {
        self.num_bodies * POSE_BODY_DIMS + 3
    }

    pub fn goal_offset(&self) -> usize {
        self.pose_dims()
    }

    pub fn goal_dims(&self) -> usize {
        (self.num_samples + self.num_prev_samples) * GOAL_SAMPLE_DIMS
    }

    pub fn history_offset(&self) -> usize {
        self.goal_offset() + self.num_samples * GOAL_SAMPLE_DIMS
    }

    pub fn extras_offset(&self) -> usize {
        self.pose_dims() + self.goal_dims()
    }

    /// Length of an authored feature row.
    pub fn authored_dims(&self) -> usize {
        self.extras_offset()
    }

    pub fn dims(&self) -> usize {
        self.extras_offset() + EXTRA_DIMS
    }
}

// ============================================================================
// Validated dataset
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryMeta {
    pub clip: usize,
    pub frame: u32,
    pub layer: usize,
}

/// A validated, read-only dataset ready for search.
#[derive(Debug, Clone)]
pub struct MotionDataset {
    id: DatasetId,
    settings: MatchingSettings,
    layout: FeatureLayout,
    clips: Vec<ClipInfo>,
    clip_index: FxHashMap<ClipId, usize>,
    /// Entry indices per clip, sorted by frame
    clip_entries: Vec<Vec<usize>>,
    entries: Vec<EntryMeta>,
    layers: Vec<LayerId>,
    /// Row-major, `layout.dims()` per entry
    features: Vec<f32>,
    base_scales: Vec<f32>,
    mins: Vec<f32>,
    mirror: Vec<f32>,
    mirror_swaps: Vec<(usize, usize)>,
    fallbacks: Vec<FallbackClip>,
    idle_clip: Option<ClipId>,
}

impl TryFrom<MotionDatasetDef> for MotionDataset {
    type Error = LocomotionError;

    fn try_from(def: MotionDatasetDef) -> Result<Self> {
        Self::from_def(def)
    }
}

impl MotionDataset {
    pub fn from_def(def: MotionDatasetDef) -> Result<Self> {
        let invalid = |reason: String| LocomotionError::InvalidDataset {
            dataset: def.id.to_string(),
            reason,
        };

        let layout = FeatureLayout::from_settings(&def.settings);
        let dims = layout.dims();

        if def.settings.goals.num_samples == 0 {
            return Err(invalid("goals.num_samples must be at least 1".into()));
        }

        let mut clip_index = FxHashMap::default();
        for (i, clip) in def.clips.iter().enumerate() {
            if clip.duration <= 0.0 || clip.sample_rate <= 0.0 {
                return Err(invalid(format!("clip {} has non-positive duration or sample rate", clip.id)));
            }
            if clip_index.insert(clip.id.clone(), i).is_some() {
                return Err(invalid(format!("clip {} declared twice", clip.id)));
            }
        }

        let mut layers: Vec<LayerId> = vec![LayerId::default_layer()];
        let mut layer_index: FxHashMap<LayerId, usize> = FxHashMap::default();
        layer_index.insert(LayerId::default_layer(), 0);

        let mut clip_entries = vec![Vec::new(); def.clips.len()];
        let mut entries = Vec::with_capacity(def.entries.len());
        let mut features = Vec::with_capacity(def.entries.len() * dims);

        for (i, entry) in def.entries.iter().enumerate() {
            let Some(&clip) = clip_index.get(&entry.clip) else {
                return Err(invalid(format!("entry {i} references unknown clip {}", entry.clip)));
            };
            if entry.features.len() != layout.authored_dims() {
                return Err(invalid(format!(
                    "entry {i} has {} features, layout needs {}",
                    entry.features.len(),
                    layout.authored_dims()
                )));
            }
            if entry.features.iter().any(|f| !f.is_finite()) {
                return Err(invalid(format!("entry {i} has non-finite features")));
            }
            let layer = *layer_index.entry(entry.layer.clone()).or_insert_with(|| {
                layers.push(entry.layer.clone());
                layers.len() - 1
            });

            features.extend_from_slice(&entry.features);
            features.push(if entry.biased { 0.0 } else { 1.0 });
            features.push(entry.group as f32);

            clip_entries[clip].push(i);
            entries.push(EntryMeta {
                clip,
                frame: entry.frame,
                layer,
            });
        }

        for list in &mut clip_entries {
            list.sort_by_key(|&i| entries[i].frame);
        }

        let mirror = match def.mirror {
            Some(m) if m.len() != dims => {
                return Err(invalid(format!("mirror vector has {} dims, layout needs {dims}", m.len())));
            }
            Some(m) => m,
            None => default_mirror_vector(&layout),
        };

        let mins = if def.feature_mins.is_empty() {
            vec![0.0; dims]
        } else if def.feature_mins.len() == dims {
            def.feature_mins
        } else {
            return Err(invalid(format!(
                "feature_mins has {} dims, layout needs {dims}",
                def.feature_mins.len()
            )));
        };

        for fallback in &def.fallbacks {
            if !clip_index.contains_key(&fallback.clip) {
                return Err(invalid(format!("fallback clip {} is not declared", fallback.clip)));
            }
        }
        if let Some(idle) = &def.idle_clip {
            if !clip_index.contains_key(idle) {
                return Err(invalid(format!("idle clip {idle} is not declared")));
            }
        }

        let base_scales = base_scales(&def.settings, &layout);
        let mirror_swaps = mirror_swaps(&def.settings);

        Ok(Self {
            id: def.id,
            settings: def.settings,
            layout,
            clips: def.clips,
            clip_index,
            clip_entries,
            entries,
            layers,
            features,
            base_scales,
            mins,
            mirror,
            mirror_swaps,
            fallbacks: def.fallbacks,
            idle_clip: def.idle_clip,
        })
    }

    pub fn id(&self) -> &DatasetId {
        &self.id
    }

    pub fn settings(&self) -> &MatchingSettings {
        &self.settings
    }

    pub fn layout(&self) -> &FeatureLayout {
        &self.layout
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clips(&self) -> &[ClipInfo] {
        &self.clips
    }

    pub fn clip(&self, id: &ClipId) -> Option<&ClipInfo> {
        self.clip_index.get(id).map(|&i| &self.clips[i])
    }

    pub fn layers(&self) -> &[LayerId] {
        &self.layers
    }

    pub fn entry(&self, index: usize) -> Option<&EntryMeta> {
        self.entries.get(index)
    }

    pub fn features(&self, index: usize) -> &[f32] {
        let dims = self.layout.dims();
        &self.features[index * dims..(index + 1) * dims]
    }

    pub fn fallbacks(&self) -> &[FallbackClip] {
        &self.fallbacks
    }

    pub fn idle_clip(&self) -> Option<&ClipId> {
        self.idle_clip.as_ref()
    }

    pub fn mins(&self) -> &[f32] {
        &self.mins
    }

    /// Joints the character must have for pose matching.
    pub fn required_joints(&self) -> impl Iterator<Item = &str> {
        self.settings.pose.required_joints()
    }

    /// Fails with [`LocomotionError::MissingRequiredJoints`] listing every joint
    /// `has_joint` rejects.
    pub fn check_required_joints(&self, has_joint: impl Fn(&str) -> bool) -> Result<()> {
        let missing: Vec<String> = self
            .required_joints()
            .filter(|j| !has_joint(j))
            .map(str::to_string)
            .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(LocomotionError::MissingRequiredJoints {
                dataset: self.id.clone(),
                missing,
            })
        }
    }

    // ========================================================================
    // Sample lookup
    // ========================================================================

    fn fractional_frame(&self, clip: &ClipInfo, sample: &AnimationSample) -> f32 {
        sample.phase_time(clip.duration) * clip.sample_rate
    }

    /// Whether `sample` lies inside the dataset's coverage of its clip, and
    /// whether the following sample does too.
    pub fn is_in_set(&self, sample: &AnimationSample) -> (bool, bool) {
        let Some(&clip_idx) = self.clip_index.get(&sample.clip) else {
            return (false, false);
        };
        let Some(&last) = self.clip_entries[clip_idx].last() else {
            return (false, false);
        };
        let last_frame = self.entries[last].frame as f32;
        let frame = self.fractional_frame(&self.clips[clip_idx], sample);
        (
            last_frame + FRAME_EPSILON >= frame,
            last_frame + FRAME_EPSILON >= frame + 1.0,
        )
    }

    /// Entry nearest in time to `sample` within its clip.
    pub fn entry_for_sample(&self, sample: &AnimationSample) -> Option<usize> {
        let &clip_idx = self.clip_index.get(&sample.clip)?;
        let list = &self.clip_entries[clip_idx];
        if list.is_empty() {
            return None;
        }
        let frame = self.fractional_frame(&self.clips[clip_idx], sample);
        let pos = list.partition_point(|&i| (self.entries[i].frame as f32) < frame);
        let candidates = [pos.checked_sub(1), Some(pos)];
        candidates
            .into_iter()
            .flatten()
            .filter_map(|p| list.get(p).copied())
            .min_by(|&a, &b| {
                let da = (self.entries[a].frame as f32 - frame).abs();
                let db = (self.entries[b].frame as f32 - frame).abs();
                da.total_cmp(&db).then(a.cmp(&b))
            })
    }

    pub fn sample_from_entry(&self, index: usize, mirror: bool) -> Option<AnimationSample> {
        let meta = self.entries.get(index)?;
        let clip = &self.clips[meta.clip];
        let phase = (meta.frame as f32 / clip.sample_rate / clip.duration).clamp(0.0, 1.0);
        Some(AnimationSample {
            clip: clip.id.clone(),
            phase,
            mirror,
            rate: 1.0,
        })
    }

    /// The goal section of an entry decoded back into a trajectory relative to
    /// the sample's own align.
    pub fn entry_trajectory(&self, index: usize, mirror: bool) -> Option<Trajectory> {
        if index >= self.entries.len() {
            return None;
        }
        let row = if mirror {
            self.mirror_vector(self.features(index))
        } else {
            self.features(index).to_vec()
        };
        let goals = &self.settings.goals;
        let n = self.layout.num_samples;
        let n_prev = self.layout.num_prev_samples;

        let mut samples = Vec::with_capacity(n + n_prev + 1);
        for i in (0..n_prev).rev() {
            let t = -goals.max_prev_sample_time * (i + 1) as f32 / n_prev as f32;
            let offset = self.layout.history_offset() + i * GOAL_SAMPLE_DIMS;
            samples.push(decode_goal_sample(&row[offset..offset + GOAL_SAMPLE_DIMS], t));
        }
        for i in 0..n {
            let t = goals.max_sample_time * (i + 1) as f32 / n as f32;
            let offset = self.layout.goal_offset() + i * GOAL_SAMPLE_DIMS;
            samples.push(decode_goal_sample(&row[offset..offset + GOAL_SAMPLE_DIMS], t));
        }

        let partial = Trajectory::from_samples(samples.iter().copied());
        let velocity = partial
            .sample_at(0.0)
            .map(|s| s.velocity)
            .or_else(|| samples.get(n_prev).map(|s| s.velocity))
            .unwrap_or_else(Vec3::zeros);
        let origin = TrajectorySample {
            time: 0.0,
            pos: Pos3::origin(),
            velocity,
            facing: Vec3::z(),
            yaw_speed: 0.0,
        };
        samples.insert(n_prev, origin);
        Some(Trajectory::from_samples(samples))
    }

    // ========================================================================
    // Weights
    // ========================================================================

    /// Scales with the query's goal filter applied.
    pub fn scales(&self, filter: &[f32]) -> Vec<f32> {
        self.base_scales.iter().zip(filter).map(|(s, f)| s * f).collect()
    }

    pub fn base_scales(&self) -> &[f32] {
        &self.base_scales
    }

    /// `Σ scale·max(|a−b| − min, 0)²`
    pub fn distance(&self, a: &[f32], b: &[f32], scales: &[f32]) -> f32 {
        weighted_distance(a, b, scales, &self.mins)
    }

    /// Component-wise mirror with left/right body sections swapped.
    pub fn mirror_vector(&self, v: &[f32]) -> Vec<f32> {
        let mut out: Vec<f32> = v.iter().zip(&self.mirror).map(|(a, m)| a * m).collect();
        for &(a, b) in &self.mirror_swaps {
            for k in 0..POSE_BODY_DIMS {
                out.swap(a * POSE_BODY_DIMS + k, b * POSE_BODY_DIMS + k);
            }
        }
        out
    }
}

pub fn weighted_distance(a: &[f32], b: &[f32], scales: &[f32], mins: &[f32]) -> f32 {
    a.iter()
        .zip(b)
        .zip(scales.iter().zip(mins))
        .map(|((a, b), (s, m))| {
            let d = ((a - b).abs() - m).max(0.0);
            s * d * d
        })
        .sum()
}

fn decode_goal_sample(v: &[f32], time: f32) -> TrajectorySample {
    TrajectorySample {
        time,
        pos: Pos3::new(v[0], v[1], v[2]),
        velocity: Vec3::new(v[3], v[4], v[5]),
        facing: Vec3::new(v[6], v[7], v[8]),
        yaw_speed: v[9],
    }
}

/// Writes one trajectory sample into a goal slot.
pub(crate) fn encode_goal_sample(s: &TrajectorySample, out: &mut [f32]) {
    out[0..3].copy_from_slice(&[s.pos.x, s.pos.y, s.pos.z]);
    out[3..6].copy_from_slice(&[s.velocity.x, s.velocity.y, s.velocity.z]);
    out[6..9].copy_from_slice(&[s.facing.x, s.facing.y, s.facing.z]);
    out[9] = s.yaw_speed;
}

fn base_scales(settings: &MatchingSettings, layout: &FeatureLayout) -> Vec<f32> {
    let mut scales = Vec::with_capacity(layout.dims());
    let pose = &settings.pose;
    for body in &pose.bodies {
        scales.extend([body.position_weight * pose.master_weight; 3]);
        scales.extend([body.velocity_weight * pose.master_weight; 3]);
    }
    scales.extend([pose.facing_weight * pose.master_weight; 3]);

    let goals = &settings.goals;
    let mut push_section = |count: usize, extra: f32| {
        for i in 0..count {
            let weight = goals.master_weight * extra;
            let tail = i + 1 == count;
            let directional = if tail {
                goals.directional_weight
            } else {
                goals.interim_directional_weight
            };
            scales.extend([weight * goals.position_weight; 3]);
            scales.extend([weight * goals.velocity_weight; 3]);
            scales.extend([weight * directional; 3]);
            scales.push(weight * goals.yaw_speed_weight);
        }
    };
    push_section(layout.num_samples, 1.0);
    push_section(layout.num_prev_samples, goals.prev_traj_weight);

    scales.push(goals.anim_bias_weight);
    scales.push(goals.grouping_weight);
    scales
}

/// Negates X components and yaw speeds.
fn default_mirror_vector(layout: &FeatureLayout) -> Vec<f32> {
    let mut m = Vec::with_capacity(layout.dims());
    for _ in 0..layout.num_bodies * 2 + 1 {
        m.extend([-1.0, 1.0, 1.0]);
    }
    for _ in 0..layout.num_samples + layout.num_prev_samples {
        m.extend([-1.0, 1.0, 1.0, -1.0, 1.0, 1.0, -1.0, 1.0, 1.0, -1.0]);
    }
    m.extend([1.0; EXTRA_DIMS]);
    m
}

/// Body index pairs named `l_*` / `r_*`.
fn mirror_swaps(settings: &MatchingSettings) -> Vec<(usize, usize)> {
    let bodies = &settings.pose.bodies;
    bodies
        .iter()
        .enumerate()
        .filter_map(|(i, body)| {
            let rest = body.joint.strip_prefix("l_")?;
            let partner = format!("r_{rest}");
            bodies.iter().position(|b| b.joint == partner).map(|j| (i, j))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::testing::{locomotion_dataset_def, SyntheticOptions};
    use super::*;
    use crate::settings::PoseBody;

    fn dataset() -> MotionDataset {
        MotionDataset::from_def(locomotion_dataset_def(&SyntheticOptions::default())).unwrap()
    }

    #[test]
    fn test_layout_dims() {
        let mut settings = MatchingSettings::default();
        settings.pose.bodies = vec![
            PoseBody {
                joint: "l_ankle".into(),
                position_weight: 1.0,
                velocity_weight: 1.0,
            },
            PoseBody {
                joint: "r_ankle".into(),
                position_weight: 1.0,
                velocity_weight: 1.0,
            },
        ];
        let layout = FeatureLayout::from_settings(&settings);
        assert_eq!(layout.pose_dims(), 15);
        assert_eq!(layout.goal_dims(), 40);
        assert_eq!(layout.dims(), 57);
        assert_eq!(base_scales(&settings, &layout).len(), 57);
        assert_eq!(default_mirror_vector(&layout).len(), 57);
        assert_eq!(mirror_swaps(&settings), vec![(0, 1)]);
    }

    #[test]
    fn test_rejects_wrong_feature_length() {
        let mut def = locomotion_dataset_def(&SyntheticOptions::default());
        def.entries[3].features.pop();
        let err = MotionDataset::from_def(def).unwrap_err();
        assert!(matches!(err, LocomotionError::InvalidDataset { .. }));
        assert!(err.to_string().contains("entry 3"));
    }

    #[test]
    fn test_rejects_unknown_clip() {
        let mut def = locomotion_dataset_def(&SyntheticOptions::default());
        def.entries[0].clip = ClipId::from("nope");
        assert!(MotionDataset::from_def(def).is_err());
    }

    #[test]
    fn test_in_set_and_next() {
        let ds = dataset();
        let clip = &ds.clips()[0];
        let start = AnimationSample::new(clip.id.clone(), 0.0);
        assert_eq!(ds.is_in_set(&start), (true, true));

        let last_entry = *ds.clip_entries[0].last().unwrap();
        let last = ds.sample_from_entry(last_entry, false).unwrap();
        assert_eq!(ds.is_in_set(&last), (true, false));

        assert_eq!(ds.is_in_set(&AnimationSample::new("foreign", 0.0)), (false, false));
    }

    #[test]
    fn test_entry_sample_roundtrip() {
        let ds = dataset();
        for i in [0, 5, ds.len() - 1] {
            let sample = ds.sample_from_entry(i, false).unwrap();
            assert_eq!(ds.entry_for_sample(&sample), Some(i));
        }
    }

    #[test]
    fn test_distance_with_mins() {
        let d = weighted_distance(&[0.0, 1.0], &[3.0, 1.0], &[2.0, 5.0], &[1.0, 0.0]);
        assert!((d - 8.0).abs() < 1e-6);
    }

    #[test]
    fn test_mirror_is_involution() {
        let ds = dataset();
        let row = ds.features(7).to_vec();
        let twice = ds.mirror_vector(&ds.mirror_vector(&row));
        for (a, b) in row.iter().zip(&twice) {
            assert!((a - b).abs() < 1e-6);
        }
    }

    #[test]
    fn test_entry_trajectory_times() {
        let ds = dataset();
        let traj = ds.entry_trajectory(4, false).unwrap();
        let goals = &ds.settings().goals;
        assert_eq!(traj.len(), goals.num_samples + goals.num_prev_samples + 1);
        assert!((traj.max_time() - goals.max_sample_time).abs() < 1e-5);
        assert!((traj.min_time() + goals.max_prev_sample_time).abs() < 1e-5);
    }

    #[test]
    fn test_required_joints() {
        let ds = dataset();
        assert!(ds.check_required_joints(|_| true).is_ok());
        let err = ds.check_required_joints(|j| j != "root").unwrap_err();
        match err {
            LocomotionError::MissingRequiredJoints { missing, .. } => assert_eq!(missing, vec!["root"]),
            other => panic!("unexpected {other:?}"),
        }
    }
}
