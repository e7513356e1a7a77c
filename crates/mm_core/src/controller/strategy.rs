//! Per-game customisation hooks.

use super::input::{FootPlantParams, LocomotionInput};
use crate::math::{Locator, Vec3};
use crate::motion_model::MotionState;
use crate::procedural::ProceduralContext;
use crate::sample::{AnimationSample, MatchCandidate, MotionPose};
use crate::trajectory::Trajectory;

/// Game-specific decisions the controller asks for every tick.
///
/// Only `get_input` is required; every other hook defaults to leaving the
/// controller's behaviour alone.
pub trait LocomotionStrategy {
    /// Fills this tick's input. The previous tick's input is passed in, with
    /// `force_change` and `force_external_pose` cleared once a match has been
    /// evaluated with them.
    fn get_input(&mut self, input: &mut LocomotionInput);

    /// Steers the predicted future at `t` seconds ahead. `None` holds the
    /// current input direction.
    fn future_direction(&self, _t: f32, _state: &MotionState) -> Option<Vec3> {
        None
    }

    /// Last chance to adjust the corrected alignment (parent space).
    fn apply_procedural_motion(&mut self, _ctx: &ProceduralContext<'_>, corrected: Locator) -> Locator {
        corrected
    }

    fn fill_foot_plant_params(&self, _params: &mut FootPlantParams) {}

    fn limit_look_ahead(&self, look_ahead: f32) -> f32 {
        look_ahead
    }

    /// A sample the search should also consider, with its own bias.
    fn extra_sample(&self) -> Option<MatchCandidate> {
        None
    }

    /// The character's live pose, for matching out of a clip the dataset
    /// does not contain.
    fn current_pose(&self) -> Option<MotionPose> {
        None
    }

    /// Natural trajectory of a clip the dataset does not contain.
    fn clip_trajectory(&self, _sample: &AnimationSample) -> Option<Trajectory> {
        None
    }
}
