//! Synthetic datasets for tests, benches and the CLI demo.
//!
//! Clips are generated analytically: an idle, constant-speed forward loops,
//! a non-looping start that ramps from rest to 3 m/s, and an idle on an
//! `aim` layer. Trajectory features are exact; only pose features get
//! seeded noise.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use super::{ClipInfo, EntryDef, FallbackClip, MotionDataset, MotionDatasetDef};
use crate::ids::{ClipId, DatasetId, LayerId};
use crate::settings::{MatchingSettings, PoseBody};

/// Top speed of the `start` clip (m/s).
pub const START_TOP_SPEED: f32 = 3.0;
pub const START_DURATION: f32 = 1.0;

#[derive(Debug, Clone)]
pub struct SyntheticOptions {
    pub id: String,
    pub seed: u64,
    /// One looping forward clip per speed (m/s)
    pub speeds: Vec<f32>,
    pub sample_rate: f32,
    pub loop_duration: f32,
    pub pose_noise: f32,
    /// Repeats every clip this many times to inflate the row count
    pub copies: usize,
}

impl Default for SyntheticOptions {
    fn default() -> Self {
        Self {
            id: "locomotion".to_string(),
            seed: 7,
            speeds: vec![1.0, 2.0, 3.0, 4.0],
            sample_rate: 30.0,
            loop_duration: 1.0,
            pose_noise: 0.01,
            copies: 1,
        }
    }
}

pub fn synthetic_settings() -> MatchingSettings {
    let mut settings = MatchingSettings::default();
    settings.pose.bodies = ["l_ankle", "r_ankle"]
        .into_iter()
        .map(|joint| PoseBody {
            joint: joint.to_string(),
            position_weight: 1.0,
            velocity_weight: 0.5,
        })
        .collect();
    settings.motion.max_speed = 4.0;
    settings
}

/// Speed of the `start` clip at `t` seconds in.
pub fn start_speed(t: f32) -> f32 {
    (t / START_DURATION).clamp(0.0, 1.0) * START_TOP_SPEED
}

/// Distance covered by the `start` clip between `t0` and `t1`.
fn start_distance(t0: f32, t1: f32) -> f32 {
    let (lo, hi, sign) = if t1 >= t0 { (t0, t1, 1.0) } else { (t1, t0, -1.0) };
    let steps = 32;
    let dt = (hi - lo) / steps as f32;
    let dist: f32 = (0..steps)
        .map(|i| start_speed(lo + (i as f32 + 0.5) * dt) * dt)
        .sum();
    dist * sign
}

struct ClipSpec {
    id: String,
    duration: f32,
    looping: bool,
    layer: &'static str,
    group: i32,
    /// (time in clip, offset) -> (forward distance, forward speed)
    motion: Box<dyn Fn(f32, f32) -> (f32, f32)>,
}

pub fn locomotion_dataset_def(opts: &SyntheticOptions) -> MotionDatasetDef {
    let settings = synthetic_settings();
    let goals = settings.goals.clone();
    let mut rng = ChaCha8Rng::seed_from_u64(opts.seed);

    let mut shapes = vec![ClipSpec {
        id: "idle".to_string(),
        duration: 2.0,
        looping: true,
        layer: "default",
        group: 0,
        motion: Box::new(|_: f32, _: f32| (0.0, 0.0)),
    }];
    for (i, &speed) in opts.speeds.iter().enumerate() {
        shapes.push(ClipSpec {
            id: format!("move_{i}"),
            duration: opts.loop_duration,
            looping: true,
            layer: "default",
            group: 0,
            motion: Box::new(move |_: f32, dt: f32| (speed * dt, speed)),
        });
    }
    shapes.push(ClipSpec {
        id: "start".to_string(),
        duration: START_DURATION,
        looping: false,
        layer: "default",
        group: 0,
        motion: Box::new(|t: f32, dt: f32| (start_distance(t, t + dt), start_speed(t + dt))),
    });
    shapes.push(ClipSpec {
        id: "aim_idle".to_string(),
        duration: 2.0,
        looping: true,
        layer: "aim",
        group: 1,
        motion: Box::new(|_: f32, _: f32| (0.0, 0.0)),
    });

    let mut clips = Vec::new();
    let mut entries = Vec::new();
    for copy in 0..opts.copies.max(1) {
        for shape in &shapes {
            let id = if copy == 0 {
                shape.id.clone()
            } else {
                format!("{}#{copy}", shape.id)
            };
            clips.push(ClipInfo {
                id: ClipId::from(id.as_str()),
                duration: shape.duration,
                looping: shape.looping,
                sample_rate: opts.sample_rate,
            });
            let frames = (shape.duration * opts.sample_rate).floor() as u32;
            for frame in 0..frames {
                let t = frame as f32 / opts.sample_rate;
                let mut features = Vec::new();

                let (_, speed_now) = (shape.motion)(t, 0.0);
                let stride = (t * std::f32::consts::TAU).sin() * 0.1 * speed_now;
                for side in [-1.0f32, 1.0] {
                    let noise = |rng: &mut ChaCha8Rng| rng.gen_range(-1.0f32..=1.0) * opts.pose_noise;
                    features.extend([0.1 * side + noise(&mut rng), 0.1, side * stride + noise(&mut rng)]);
                    features.extend([0.0, 0.0, speed_now + side * stride]);
                }
                features.extend([0.0, 0.0, 1.0]);

                for i in 0..goals.num_samples {
                    let dt = goals.max_sample_time * (i + 1) as f32 / goals.num_samples as f32;
                    let (dist, speed) = (shape.motion)(t, dt);
                    features.extend([0.0, 0.0, dist, 0.0, 0.0, speed, 0.0, 0.0, 1.0, 0.0]);
                }
                for i in 0..goals.num_prev_samples {
                    let dt = -goals.max_prev_sample_time * (i + 1) as f32 / goals.num_prev_samples as f32;
                    let (dist, speed) = (shape.motion)(t, dt);
                    features.extend([0.0, 0.0, dist, 0.0, 0.0, speed, 0.0, 0.0, 1.0, 0.0]);
                }

                entries.push(EntryDef {
                    clip: ClipId::from(id.as_str()),
                    frame,
                    layer: LayerId::from(shape.layer),
                    biased: false,
                    group: shape.group,
                    features,
                });
            }
        }
    }

    MotionDatasetDef {
        id: DatasetId::from(opts.id.as_str()),
        settings,
        clips,
        entries,
        mirror: None,
        feature_mins: Vec::new(),
        fallbacks: vec![FallbackClip {
            clip: ClipId::from("idle"),
            cost_bias: 0.0,
        }],
        idle_clip: Some(ClipId::from("idle")),
    }
}

/// Builds and validates; panics on an inconsistent generator.
pub fn locomotion_dataset(opts: &SyntheticOptions) -> MotionDataset {
    MotionDataset::from_def(locomotion_dataset_def(opts)).expect("synthetic dataset is consistent")
}
