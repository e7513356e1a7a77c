//! Sampled trajectories: history behind the character, the motion model's
//! prediction ahead of it.
//!
//! Every sample is expressed relative to a reference locator captured when
//! the trajectory is built. Negative times are history, positive are future.

use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::error::Result;
use crate::history::LocomotionHistory;
use crate::math::{dist_xz, flatten, safe_normalize, Locator, Pos3, Vec3};
use crate::motion_model::{MotionModel, MotionModelInput, MotionState};
use crate::settings::{GoalSettings, MotionSettings};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrajectorySample {
    pub time: f32,
    pub pos: Pos3,
    pub velocity: Vec3,
    pub facing: Vec3,
    pub yaw_speed: f32,
}

impl TrajectorySample {
    fn lerp(&self, other: &Self, t: f32, time: f32) -> Self {
        let facing = safe_normalize(&self.facing.lerp(&other.facing, t), self.facing);
        Self {
            time,
            pos: self.pos + (other.pos - self.pos) * t,
            velocity: self.velocity.lerp(&other.velocity, t),
            facing,
            yaw_speed: self.yaw_speed + (other.yaw_speed - self.yaw_speed) * t,
        }
    }
}

/// Immutable, time-ordered samples.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Trajectory {
    samples: Vec<TrajectorySample>,
}

impl Trajectory {
    /// Builds from samples; out-of-order or duplicate times are dropped.
    pub fn from_samples(samples: impl IntoIterator<Item = TrajectorySample>) -> Self {
        let mut out: Vec<TrajectorySample> = Vec::new();
        for s in samples {
            if out.last().map_or(true, |last| s.time > last.time) {
                out.push(s);
            }
        }
        Self { samples: out }
    }

    pub fn samples(&self) -> &[TrajectorySample] {
        &self.samples
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn min_time(&self) -> f32 {
        self.samples.first().map_or(0.0, |s| s.time)
    }

    pub fn max_time(&self) -> f32 {
        self.samples.last().map_or(0.0, |s| s.time)
    }

    pub fn tail(&self) -> Option<&TrajectorySample> {
        self.samples.last()
    }

    /// Linear interpolation at `time`; `None` outside the sampled range.
    pub fn sample_at(&self, time: f32) -> Option<TrajectorySample> {
        let first = self.samples.first()?;
        let last = self.samples.last()?;
        if time < first.time - f32::EPSILON || time > last.time + f32::EPSILON {
            return None;
        }
        let idx = self.samples.partition_point(|s| s.time < time);
        let Some(after) = self.samples.get(idx) else {
            return Some(*last);
        };
        if idx == 0 || after.time <= time {
            return Some(*after);
        }
        let before = &self.samples[idx - 1];
        let t = (time - before.time) / (after.time - before.time);
        Some(before.lerp(after, t, time))
    }

    /// Same as [`sample_at`](Self::sample_at) but clamps `time` into range.
    pub fn sample_clamped(&self, time: f32) -> Option<TrajectorySample> {
        self.sample_at(time.clamp(self.min_time(), self.max_time()))
    }

    /// Horizontal distance travelled between `t0` and `t1` along the samples.
    pub fn travel_distance(&self, t0: f32, t1: f32) -> f32 {
        let (Some(start), Some(end)) = (self.sample_clamped(t0), self.sample_clamped(t1)) else {
            return 0.0;
        };
        let mut dist = 0.0;
        let mut prev = start.pos;
        for s in self.samples.iter().filter(|s| s.time > start.time && s.time < end.time) {
            dist += dist_xz(&prev, &s.pos);
            prev = s.pos;
        }
        dist + dist_xz(&prev, &end.pos)
    }

    /// Re-expresses every sample in a new reference frame given in the old one.
    pub fn relative_to(&self, frame: &Locator) -> Self {
        Self {
            samples: self
                .samples
                .iter()
                .map(|s| TrajectorySample {
                    pos: frame.untransform_point(&s.pos),
                    velocity: frame.untransform_vector(&s.velocity),
                    facing: frame.untransform_vector(&s.facing),
                    ..*s
                })
                .collect(),
        }
    }
}

// ============================================================================
// Builder
// ============================================================================

/// Sampling layout of a trajectory query.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrajectoryLayout {
    pub horizon: f32,
    pub num_samples: usize,
    pub resolution: usize,
    pub look_back: f32,
    pub num_prev_samples: usize,
    pub flatten_history: bool,
}

impl TrajectoryLayout {
    /// Layout for a dataset; the future horizon also covers the procedural
    /// rotation window.
    pub fn from_goals(goals: &GoalSettings, rotation_time: f32) -> Self {
        Self {
            horizon: goals.max_sample_time.max(rotation_time).max(0.0),
            num_samples: goals.num_samples,
            resolution: goals.resolution.max(1),
            look_back: goals.max_prev_sample_time.max(0.0),
            num_prev_samples: goals.num_prev_samples,
            flatten_history: goals.flatten_history,
        }
    }
}

/// Predicts the model's path by stepping a copy of it.
///
/// `future_dir` may steer the prediction; returning `None` keeps the current
/// input direction.
pub fn predict_future<F>(
    model: &MotionModel,
    input: &MotionModelInput<'_>,
    settings: &MotionSettings,
    layout: &TrajectoryLayout,
    reference: &Locator,
    mut future_dir: F,
) -> Result<Vec<TrajectorySample>>
where
    F: FnMut(f32, &MotionState) -> Option<Vec3>,
{
    let mut samples = Vec::with_capacity(layout.num_samples + 1);
    samples.push(sample_from_model(model, 0.0, reference));

    if layout.num_samples == 0 || layout.horizon <= 0.0 {
        return Ok(samples);
    }

    let steps = layout.num_samples * layout.resolution;
    let dt = layout.horizon / steps as f32;
    let mut sim = model.clone();
    let mut step_input = *input;

    for i in 1..=steps {
        let t = dt * i as f32;
        if let Some(dir) = future_dir(t, &sim.state()) {
            step_input.velocity_dir = dir;
        }
        sim.step(&step_input, Some(settings), dt)?;
        if i % layout.resolution == 0 {
            samples.push(sample_from_model(&sim, t, reference));
        }
    }
    Ok(samples)
}

fn sample_from_model(model: &MotionModel, time: f32, reference: &Locator) -> TrajectorySample {
    TrajectorySample {
        time,
        pos: reference.untransform_point(&model.pos()),
        velocity: reference.untransform_vector(&model.velocity()),
        facing: reference.untransform_vector(&model.facing()),
        yaw_speed: model.yaw_speed(),
    }
}

/// Resamples recorded history at evenly spaced past times.
///
/// Times the history does not cover are skipped, so a short history yields
/// fewer samples.
pub fn resample_history(
    history: &LocomotionHistory,
    now: f32,
    layout: &TrajectoryLayout,
    reference: &Locator,
) -> Vec<TrajectorySample> {
    if layout.num_prev_samples == 0 || layout.look_back <= 0.0 {
        return Vec::new();
    }
    let step = layout.look_back / layout.num_prev_samples as f32;
    let mut out = Vec::with_capacity(layout.num_prev_samples);
    for i in (1..=layout.num_prev_samples).rev() {
        let age = step * i as f32;
        let Some(state) = history.sample_at(now - age) else {
            continue;
        };
        let local = reference.untransform_locator(&state.align);
        let mut pos = local.pos;
        let mut velocity = reference.untransform_vector(&state.velocity);
        if layout.flatten_history {
            pos.y = 0.0;
            velocity = flatten(&velocity);
        }
        out.push(TrajectorySample {
            time: -age,
            pos,
            velocity,
            facing: local.facing(),
            yaw_speed: state.yaw_speed,
        });
    }
    out
}

/// History followed by prediction, relative to `reference`.
pub fn build_trajectory<F>(
    model: &MotionModel,
    input: &MotionModelInput<'_>,
    settings: &MotionSettings,
    history: &LocomotionHistory,
    now: f32,
    layout: &TrajectoryLayout,
    reference: &Locator,
    future_dir: F,
) -> Result<Trajectory>
where
    F: FnMut(f32, &MotionState) -> Option<Vec3>,
{
    let past = resample_history(history, now, layout, reference);
    if past.len() < layout.num_prev_samples {
        trace!(
            wanted = layout.num_prev_samples,
            got = past.len(),
            "history does not cover look-back"
        );
    }
    let future = predict_future(model, input, settings, layout, reference, future_dir)?;
    Ok(Trajectory::from_samples(past.into_iter().chain(future)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::LocomotionState;
    use proptest::prelude::*;

    fn layout() -> TrajectoryLayout {
        TrajectoryLayout {
            horizon: 1.0,
            num_samples: 4,
            resolution: 3,
            look_back: 0.4,
            num_prev_samples: 2,
            flatten_history: true,
        }
    }

    fn settings() -> MotionSettings {
        MotionSettings::default().resolved()
    }

    #[test]
    fn test_future_samples_evenly_spaced() {
        let s = settings();
        let model = MotionModel::new(Pos3::origin(), Vec3::z(), Vec3::zeros(), &s);
        let input = MotionModelInput {
            velocity_dir: Vec3::z(),
            ..Default::default()
        };
        let samples =
            predict_future(&model, &input, &s, &layout(), &Locator::identity(), |_, _| None).unwrap();
        let times: Vec<f32> = samples.iter().map(|s| s.time).collect();
        assert_eq!(times.len(), 5);
        for (i, t) in times.iter().enumerate() {
            assert!((t - 0.25 * i as f32).abs() < 1e-5, "times {:?}", times);
        }
        assert!(samples[4].pos.z > samples[1].pos.z);
    }

    #[test]
    fn test_prediction_does_not_mutate_model() {
        let s = settings();
        let model = MotionModel::new(Pos3::origin(), Vec3::z(), Vec3::zeros(), &s);
        let input = MotionModelInput {
            velocity_dir: Vec3::x(),
            ..Default::default()
        };
        predict_future(&model, &input, &s, &layout(), &Locator::identity(), |_, _| None).unwrap();
        assert_eq!(model.pos(), Pos3::origin());
    }

    #[test]
    fn test_future_callback_steers() {
        let s = settings();
        let model = MotionModel::new(Pos3::origin(), Vec3::z(), Vec3::zeros(), &s);
        let input = MotionModelInput {
            velocity_dir: Vec3::z(),
            ..Default::default()
        };
        let samples = predict_future(&model, &input, &s, &layout(), &Locator::identity(), |_, _| {
            Some(Vec3::x())
        })
        .unwrap();
        let tail = samples.last().unwrap();
        assert!(tail.pos.x > tail.pos.z.abs());
    }

    #[test]
    fn test_short_history_yields_fewer_samples() {
        let mut history = LocomotionHistory::default();
        history.record(LocomotionState {
            align: Locator::identity(),
            velocity: Vec3::zeros(),
            yaw_speed: 0.0,
            time: 0.75,
        });
        history.record(LocomotionState {
            align: Locator::identity(),
            velocity: Vec3::zeros(),
            yaw_speed: 0.0,
            time: 1.0,
        });
        // look-back 0.4 from t=1.0 reaches 0.6 and 0.8; only 0.8 is recorded
        let past = resample_history(&history, 1.0, &layout(), &Locator::identity());
        assert_eq!(past.len(), 1);
        assert!((past[0].time + 0.2).abs() < 1e-5);
    }

    #[test]
    fn test_history_flattened() {
        let mut history = LocomotionHistory::default();
        for i in 0..10 {
            history.record(LocomotionState {
                align: Locator::from_pos(Pos3::new(0.0, 1.0, i as f32 * 0.1)),
                velocity: Vec3::new(0.0, 0.5, 3.0),
                yaw_speed: 0.0,
                time: i as f32 * 0.1,
            });
        }
        let past = resample_history(&history, 0.9, &layout(), &Locator::identity());
        assert_eq!(past.len(), 2);
        assert!(past.iter().all(|s| s.pos.y == 0.0 && s.velocity.y == 0.0));
    }

    #[test]
    fn test_sample_at_bounds() {
        let traj = Trajectory::from_samples(vec![
            TrajectorySample {
                time: 0.0,
                pos: Pos3::origin(),
                velocity: Vec3::zeros(),
                facing: Vec3::z(),
                yaw_speed: 0.0,
            },
            TrajectorySample {
                time: 1.0,
                pos: Pos3::new(0.0, 0.0, 2.0),
                velocity: Vec3::zeros(),
                facing: Vec3::x(),
                yaw_speed: 1.0,
            },
        ]);
        assert!(traj.sample_at(1.5).is_none());
        let mid = traj.sample_at(0.5).unwrap();
        assert!((mid.pos.z - 1.0).abs() < 1e-5);
        assert!((mid.facing.norm() - 1.0).abs() < 1e-5);
        assert!((traj.travel_distance(0.0, 1.0) - 2.0).abs() < 1e-5);
    }

    proptest! {
        #[test]
        fn prop_times_strictly_increase(
            n in 1usize..6,
            res in 1usize..5,
            n_prev in 0usize..4,
            horizon in 0.1f32..2.0,
            look_back in 0.05f32..1.0,
            dir_x in -1.0f32..1.0,
            history_len in 0usize..40,
        ) {
            let s = settings();
            let layout = TrajectoryLayout {
                horizon,
                num_samples: n,
                resolution: res,
                look_back,
                num_prev_samples: n_prev,
                flatten_history: false,
            };
            let mut history = LocomotionHistory::default();
            let now = 2.0;
            for i in 0..history_len {
                let t = now - (history_len - i) as f32 / 30.0;
                history.record(LocomotionState {
                    align: Locator::from_pos(Pos3::new(0.0, 0.0, t)),
                    velocity: Vec3::z(),
                    yaw_speed: 0.0,
                    time: t,
                });
            }
            let model = MotionModel::new(Pos3::origin(), Vec3::z(), Vec3::zeros(), &s);
            let input = MotionModelInput { velocity_dir: Vec3::new(dir_x, 0.0, 1.0), ..Default::default() };
            let traj = build_trajectory(&model, &input, &s, &history, now, &layout, &Locator::identity(), |_, _| None).unwrap();

            let times: Vec<f32> = traj.samples().iter().map(|s| s.time).collect();
            prop_assert!(times.windows(2).all(|w| w[1] > w[0]), "times {:?}", times);
            prop_assert!(traj.min_time() >= -look_back - 1e-4);
            prop_assert!(traj.max_time() <= horizon + 1e-4);
            prop_assert_eq!(traj.samples().iter().filter(|s| s.time > 0.0).count(), n);
        }
    }
}
