//! Per-tick input from game logic and the values handed back to the
//! animation runtime.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::dataset::{DatasetId, LayerId, MirrorMode, TransitionTableId};
use crate::matcher::MatchSelection;
use crate::math::{Locator, Vec3};
use crate::motion_model::{MotionModelInput, PathInput};

/// Everything game logic decides for one tick, in the character's parent
/// space.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct LocomotionInput {
    /// Direction to move; the length is the speed fraction (0..1)
    #[schemars(with = "[f32; 3]")]
    pub desired_velocity_dir: Vec3,
    /// Facing to hold; `None` faces the direction of travel
    #[schemars(with = "Option<[f32; 3]>")]
    pub desired_facing: Option<Vec3>,
    pub base_yaw_speed: f32,
    pub translation_skew: f32,
    pub speed_scale: f32,
    /// Polyline to follow instead of the stick direction
    pub path: Option<PathInput>,
    pub dataset: DatasetId,
    pub transitions: Option<TransitionTableId>,
    /// Extra search layers and their cost modifiers
    pub layers: Vec<(LayerId, f32)>,
    #[schemars(with = "[f32; 3]")]
    pub ground_normal: Vec3,
    /// Lower bound on the time between selections (s)
    pub transition_interval: f32,
    /// Skips the selection interval for one tick; cleared after the tick's match
    pub force_change: bool,
    /// Matches from the live pose for one tick even when the playing clip is
    /// in the dataset; cleared after the tick's match
    pub force_external_pose: bool,
    pub mirror_mode: MirrorMode,
    /// Group id matched against each entry's group
    pub group: i32,
    pub ground_adjust_factor: f32,
    pub leg_ik_factor: f32,
}

impl Default for LocomotionInput {
    fn default() -> Self {
        Self {
            desired_velocity_dir: Vec3::zeros(),
            desired_facing: None,
            base_yaw_speed: 0.0,
            translation_skew: 1.0,
            speed_scale: 1.0,
            path: None,
            dataset: DatasetId::from("default"),
            transitions: None,
            layers: Vec::new(),
            ground_normal: Vec3::y(),
            transition_interval: 0.0,
            force_change: false,
            force_external_pose: false,
            mirror_mode: MirrorMode::None,
            group: 0,
            ground_adjust_factor: 1.0,
            leg_ik_factor: 1.0,
        }
    }
}

impl LocomotionInput {
    pub fn model_input(&self) -> MotionModelInput<'_> {
        MotionModelInput {
            velocity_dir: self.desired_velocity_dir,
            facing: self.desired_facing,
            base_yaw_speed: self.base_yaw_speed,
            translation_skew: self.translation_skew,
            speed_scale: self.speed_scale,
            path: self.path.as_ref(),
        }
    }
}

/// Foot planting hints for the IK runtime. Strategies may adjust them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FootPlantParams {
    pub ground_normal: Vec3,
    /// 0 disables leg IK, 1 applies it fully
    pub ik_weight: f32,
    /// Feet lock below this root speed (m/s)
    pub plant_speed_threshold: f32,
}

impl Default for FootPlantParams {
    fn default() -> Self {
        Self {
            ground_normal: Vec3::y(),
            ik_weight: 1.0,
            plant_speed_threshold: 0.1,
        }
    }
}

/// What the animation runtime applies this tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TickOutput {
    /// A new clip to blend into; `None` keeps the current one
    pub selected: Option<MatchSelection>,
    /// Corrected world alignment
    pub align: Locator,
    pub playback_rate: f32,
    pub ground_adjust_factor: f32,
    pub leg_ik_factor: f32,
    pub foot_plant: FootPlantParams,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TickOutcome {
    Output(TickOutput),
    /// The character is gone or its locomotion was aborted
    Terminated,
}

impl TickOutcome {
    pub fn output(&self) -> Option<&TickOutput> {
        match self {
            TickOutcome::Output(out) => Some(out),
            TickOutcome::Terminated => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_input_yaml_defaults() {
        let input: LocomotionInput =
            serde_yaml::from_str("dataset: walk\ndesired_velocity_dir: [0.0, 0.0, 0.5]\nlayers: [[aim, 0.25]]\n").unwrap();
        assert_eq!(input.dataset.as_str(), "walk");
        assert_eq!(input.speed_scale, 1.0);
        assert_eq!(input.layers, vec![(LayerId::from("aim"), 0.25)]);
        assert!((input.model_input().velocity_dir.z - 0.5).abs() < 1e-6);
    }
}
