//! Motion model: a spring-driven proxy of where the character *should* be.
//!
//! The model is stepped from gameplay input every tick and never looks at the
//! animation, except through `procedural_clamp_dist`, which bounds how far the
//! corrected animation may drift from it.
//!
//! ## Modes
//! - **Stick**: input is a direction whose length is the speed fraction.
//! - **Path**: input is a polyline; speed is limited ahead of sharp corners.

pub mod path;

pub use path::{Corner, PathInput};

use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::error::{LocomotionError, Result};
use crate::math::{
    clamp01, dist_xz, flatten, limit_length, signed_angle_xz_deg, turn_towards, unit_xz, wrap_degrees,
    yaw_deg, Locator, Pos3, Vec3, EPSILON,
};
use crate::settings::MotionSettings;
use crate::spring::{approximate_stopping_distance, SpringTracker};

/// Filter rate of the procedural clamp distance (1/s).
const CLAMP_DIST_ALPHA: f32 = 10.0;
/// Rate at which a path offset bleeds away (m/s).
const PATH_OFFSET_DECAY: f32 = 0.075;
const MIN_STOP_DIST: f32 = 0.1;
const MIN_NAV_ADJUST_RADIUS: f32 = 0.1;
/// Paths longer than this always narrow the nav radius (m).
const LONG_PATH_LENGTH: f32 = 2.0;

/// One tick of gameplay input, in parent space.
#[derive(Debug, Clone, Copy)]
pub struct MotionModelInput<'a> {
    /// Direction to move; its length (clamped to 1) is the speed fraction
    pub velocity_dir: Vec3,
    /// Facing to hold while moving (strafe)
    pub facing: Option<Vec3>,
    pub base_yaw_speed: f32,
    pub translation_skew: f32,
    pub speed_scale: f32,
    pub path: Option<&'a PathInput>,
}

impl Default for MotionModelInput<'_> {
    fn default() -> Self {
        Self {
            velocity_dir: Vec3::zeros(),
            facing: None,
            base_yaw_speed: 0.0,
            translation_skew: 1.0,
            speed_scale: 1.0,
            path: None,
        }
    }
}

/// Read-only snapshot of the model.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MotionState {
    pub pos: Pos3,
    pub facing: Vec3,
    pub velocity: Vec3,
    pub acceleration: Vec3,
    pub desired_velocity: Vec3,
    pub desired_facing: Vec3,
    pub yaw_speed: f32,
    pub following_path: bool,
}

#[derive(Debug, Clone, Default)]
struct PathState {
    last_path_id: Option<u64>,
    corners: Vec<Corner>,
    offset_dist: f32,
    remaining: f32,
}

#[derive(Debug, Clone)]
pub struct MotionModel {
    pos: Pos3,
    velocity: Vec3,
    desired_velocity: Vec3,
    facing: Vec3,
    desired_facing: Vec3,
    yaw_speed: f32,
    max_speed: f32,
    vel_spring: SpringTracker<Vec3>,
    procedural_clamp_dist: f32,
    clamp_dist_shrunk: bool,
    path: Option<PathState>,
}

impl MotionModel {
    pub fn new(pos: Pos3, facing: Vec3, velocity: Vec3, settings: &MotionSettings) -> Self {
        let facing = unit_xz(&facing, Vec3::z());
        Self {
            pos,
            velocity: flatten(&velocity),
            desired_velocity: flatten(&velocity),
            facing,
            desired_facing: facing,
            yaw_speed: 0.0,
            max_speed: settings.top_speed(),
            vel_spring: SpringTracker::new(Vec3::zeros()),
            procedural_clamp_dist: settings.procedural_clamp_dist.max(0.0),
            clamp_dist_shrunk: false,
            path: None,
        }
    }

    /// Re-seeds the model, e.g. from the character's actual motion.
    pub fn reset(&mut self, pos: Pos3, facing: Vec3, velocity: Vec3) {
        self.pos = pos;
        self.velocity = flatten(&velocity);
        self.desired_velocity = self.velocity;
        self.facing = unit_xz(&facing, self.facing);
        self.desired_facing = self.facing;
        self.yaw_speed = 0.0;
        self.vel_spring.reset(Vec3::zeros());
        self.path = None;
    }

    pub fn pos(&self) -> Pos3 {
        self.pos
    }

    pub fn velocity(&self) -> Vec3 {
        self.velocity
    }

    pub fn facing(&self) -> Vec3 {
        self.facing
    }

    pub fn desired_velocity(&self) -> Vec3 {
        self.desired_velocity
    }

    pub fn yaw_speed(&self) -> f32 {
        self.yaw_speed
    }

    pub fn max_speed(&self) -> f32 {
        self.max_speed
    }

    pub fn is_following_path(&self) -> bool {
        self.path.is_some()
    }

    pub fn procedural_clamp_dist(&self) -> f32 {
        self.procedural_clamp_dist
    }

    pub fn state(&self) -> MotionState {
        MotionState {
            pos: self.pos,
            facing: self.facing,
            velocity: self.velocity,
            acceleration: self.vel_spring.speed(),
            desired_velocity: self.desired_velocity,
            desired_facing: self.desired_facing,
            yaw_speed: self.yaw_speed,
            following_path: self.is_following_path(),
        }
    }

    /// Re-expresses the model after its parent frame changed.
    pub fn reparent(&mut self, old: &Locator, new: &Locator) {
        let world_pos = old.transform_point(&self.pos);
        self.pos = new.untransform_point(&world_pos);
        let remap = |v: &Vec3| new.untransform_vector(&old.transform_vector(v));
        self.velocity = remap(&self.velocity);
        self.desired_velocity = remap(&self.desired_velocity);
        self.facing = unit_xz(&remap(&self.facing), self.facing);
        self.desired_facing = unit_xz(&remap(&self.desired_facing), self.facing);
        self.path = None;
    }

    /// Shrinks the clamp radius, e.g. while an obstacle holds the character back.
    pub fn reduce_procedural_clamp_dist(&mut self, amount: f32) {
        self.procedural_clamp_dist = (self.procedural_clamp_dist - amount.max(0.0)).max(0.0);
        self.clamp_dist_shrunk = true;
    }

    // ========================================================================
    // Directional tuning lookups
    // ========================================================================

    /// Angle between facing and movement used to index the directional curves.
    fn curve_angle(facing: &Vec3, move_dir: &Vec3) -> f32 {
        wrap_degrees(yaw_deg(facing) - yaw_deg(move_dir))
    }

    fn use_idle_curves(settings: &MotionSettings, speed_frac: f32) -> bool {
        settings.moving_group_speed_percent_threshold >= 0.0
            && speed_frac < settings.moving_group_speed_percent_threshold
    }

    fn vel_k_for(settings: &MotionSettings, angle: f32, idle: bool) -> f32 {
        let idle_curve = settings.idle_vel_k_curve();
        if idle && idle_curve.is_set() {
            return idle_curve.evaluate(angle);
        }
        settings.vel_k_curve().evaluate(angle)
    }

    fn vel_k_decel_for(settings: &MotionSettings, angle: f32, idle: bool) -> f32 {
        let k = settings.vel_k_decel_curve().evaluate(angle);
        if k >= 0.0 {
            k
        } else {
            Self::vel_k_for(settings, angle, idle)
        }
    }

    fn turn_rate_for(settings: &MotionSettings, angle: f32, idle: bool) -> f32 {
        let idle_curve = settings.idle_turn_rate_curve();
        if idle && idle_curve.is_set() {
            return idle_curve.evaluate(angle);
        }
        settings.turn_rate_curve().evaluate(angle)
    }

    // ========================================================================
    // Step
    // ========================================================================

    /// Advances the model by `dt`.
    ///
    /// Fails with [`LocomotionError::MissingSettings`] when no tuning is
    /// available; the controller must then stop.
    pub fn step(&mut self, input: &MotionModelInput<'_>, settings: Option<&MotionSettings>, dt: f32) -> Result<()> {
        let settings = settings.ok_or(LocomotionError::MissingSettings)?;
        if dt <= 0.0 {
            return Ok(());
        }

        let prev_pos = self.pos;
        let prev_facing = self.facing;
        let speed_frac = input.velocity_dir.norm().min(1.0);
        let idle = Self::use_idle_curves(settings, speed_frac);

        let desired_clamp = match input.path.filter(|p| p.waypoints.len() >= 2) {
            Some(path) => self.step_path(input, path, settings, speed_frac, idle, dt),
            None => {
                self.path = None;
                self.step_stick(input, settings, speed_frac, idle, dt)
            }
        };

        if self.clamp_dist_shrunk {
            self.clamp_dist_shrunk = false;
        } else {
            let filtered = self.procedural_clamp_dist
                + (desired_clamp - self.procedural_clamp_dist) * clamp01(CLAMP_DIST_ALPHA * dt);
            self.procedural_clamp_dist = filtered.max(desired_clamp);
        }

        self.update_facing(input, settings, idle, dt);

        let turned = signed_angle_xz_deg(&prev_facing, &self.facing).to_radians();
        self.yaw_speed = input.base_yaw_speed * settings.base_yaw_speed_factor + turned / dt;

        let skew = input.translation_skew;
        if skew > 0.0 && (skew - 1.0).abs() > EPSILON {
            self.pos = prev_pos + (self.pos - prev_pos) * skew;
        }

        trace!(
            pos = ?self.pos,
            speed = self.velocity.norm(),
            clamp = self.procedural_clamp_dist,
            "motion model step"
        );
        Ok(())
    }

    fn track_velocity(&mut self, desired: Vec3, k: f32, max_accel: f32, dt: f32) -> Vec3 {
        let mut new_vel = self.vel_spring.track(self.velocity, desired, dt, k);
        if max_accel > 0.0 && self.vel_spring.speed().norm() > max_accel {
            let accel = unit_xz(&(desired - self.velocity), Vec3::zeros()) * max_accel;
            new_vel = self.velocity + accel * dt;
            self.vel_spring.reset(accel);
        }
        new_vel
    }

    fn step_stick(
        &mut self,
        input: &MotionModelInput<'_>,
        settings: &MotionSettings,
        speed_frac: f32,
        idle: bool,
        dt: f32,
    ) -> f32 {
        let move_dir = unit_xz(&input.velocity_dir, self.facing);
        let face_dir = input.facing.map_or(move_dir, |f| unit_xz(&f, move_dir));
        let angle = Self::curve_angle(&face_dir, &move_dir);

        self.max_speed = settings.max_speed_curve().evaluate(angle) * input.speed_scale;
        self.desired_velocity = move_dir * (self.max_speed * speed_frac);

        let decelerating = self.desired_velocity.norm() < self.velocity.norm();
        let k = if decelerating {
            Self::vel_k_decel_for(settings, angle, idle)
        } else {
            Self::vel_k_for(settings, angle, idle)
        };

        self.velocity = self.track_velocity(self.desired_velocity, k, settings.max_accel, dt);
        self.pos += self.velocity * dt;

        settings.procedural_clamp_dist.max(0.0)
    }

    fn step_path(
        &mut self,
        input: &MotionModelInput<'_>,
        path_input: &PathInput,
        settings: &MotionSettings,
        speed_frac: f32,
        idle: bool,
        dt: f32,
    ) -> f32 {
        let waypoints = &path_input.waypoints;
        let Some((leg, closest)) = path::closest_point_on_path(waypoints, &self.pos) else {
            return self.step_stick(input, settings, 0.0, idle, dt);
        };

        let path_dir = unit_xz(&(waypoints[leg + 1] - waypoints[leg]), self.facing);
        let face_dir = input.facing.map_or(path_dir, |f| unit_xz(&f, path_dir));
        let angle = Self::curve_angle(&face_dir, &path_dir);

        let mut state = self.path.take().unwrap_or_default();
        if state.last_path_id != Some(path_input.id) {
            self.velocity = path_dir * self.velocity.dot(&path_dir).max(0.0);
            state.last_path_id = Some(path_input.id);
            state.offset_dist = dist_xz(&self.pos, &closest).min(self.procedural_clamp_dist);
        } else {
            state.offset_dist = (state.offset_dist - dt * PATH_OFFSET_DECAY).max(0.0);
        }

        let decel_k = Self::vel_k_decel_for(settings, angle, idle);
        self.max_speed = settings.max_speed_curve().evaluate(angle) * input.speed_scale;

        state.corners =
            path::gather_corners(waypoints, leg, &closest, self.max_speed, decel_k, &settings.corners);
        state.remaining = path::remaining_length(waypoints, leg, &closest);

        let limited = path::corner_limited_max_speed(&state.corners, &closest, self.max_speed);
        let mut desired_speed = limited * speed_frac;

        if path_input.speed_at_goal >= 0.0 && path_input.speed_at_goal < desired_speed {
            let slow_dist =
                approximate_stopping_distance(desired_speed - path_input.speed_at_goal, 0.0, decel_k);
            if slow_dist >= state.remaining {
                desired_speed = path_input.speed_at_goal;
            }
        }

        let cur_speed = self.velocity.dot(&path_dir).max(0.0);
        let accel_along = self.vel_spring.speed().dot(&path_dir);
        let stop_dist = approximate_stopping_distance(cur_speed, accel_along, decel_k).max(MIN_STOP_DIST);
        if path_input.stop_at_goal && stop_dist >= state.remaining {
            desired_speed = 0.0;
        }

        self.desired_velocity = path_dir * desired_speed;
        let k = if desired_speed < cur_speed {
            decel_k
        } else {
            Self::vel_k_for(settings, angle, idle)
        };
        self.velocity = self.track_velocity(self.desired_velocity, k, settings.max_accel, dt);

        let travel = self.velocity.dot(&path_dir).max(0.0) * dt;
        let travel = if path_input.stop_at_goal {
            travel.min(state.remaining)
        } else {
            travel
        };
        let (_, on_path) = path::advance_along_path(waypoints, leg, closest, travel);
        let offset = limit_length(&flatten(&(self.pos - closest)), state.offset_dist);
        // keep the speed but point it where the path actually took us
        let travel_dir = unit_xz(&(on_path - closest), path_dir);
        self.velocity = travel_dir * self.velocity.norm();
        self.pos = on_path + offset;

        self.path = Some(state);
        settings.procedural_clamp_dist.max(0.0)
    }

    fn update_facing(&mut self, input: &MotionModelInput<'_>, settings: &MotionSettings, idle: bool, dt: f32) {
        let move_dir = unit_xz(&self.desired_velocity, self.facing);
        let angle = Self::curve_angle(&self.facing, &move_dir);
        let turn_rate = Self::turn_rate_for(settings, angle, idle);

        match input.facing {
            Some(user) => {
                self.desired_facing = unit_xz(&user, self.facing);
                self.turn(turn_rate, dt);
            }
            None => {
                self.desired_facing = move_dir;
                if settings.always_interpolate_facing {
                    self.turn(turn_rate, dt);
                } else {
                    self.facing = self.desired_facing;
                }
            }
        }
    }

    fn turn(&mut self, turn_rate_dps: f32, dt: f32) {
        if turn_rate_dps < 0.0 {
            self.facing = self.desired_facing;
        } else {
            self.facing = turn_towards(&self.facing, &self.desired_facing, turn_rate_dps * dt);
        }
    }

    // ========================================================================
    // Queries
    // ========================================================================

    /// Where the model would come to rest if input stopped now.
    pub fn approximate_stopping_position(&self, settings: &MotionSettings) -> Pos3 {
        let move_dir = unit_xz(&self.velocity, self.facing);
        let angle = Self::curve_angle(&self.facing, &move_dir);
        let k = Self::vel_k_decel_for(settings, angle, false);
        let accel = self.vel_spring.speed();
        let dx = approximate_stopping_distance(self.velocity.x, accel.x, k);
        let dz = approximate_stopping_distance(self.velocity.z, accel.z, k);
        self.pos + Vec3::new(dx, 0.0, dz)
    }

    /// Narrows a navigation avoidance radius while threading a tight path.
    pub fn nav_adjust_radius(&self, radius: f32) -> f32 {
        let Some(path) = &self.path else {
            return radius;
        };
        if self.desired_velocity.norm_squared() <= 0.0 {
            return radius;
        }
        if !path.corners.is_empty() || path.remaining > LONG_PATH_LENGTH {
            radius.min(path.offset_dist.max(MIN_NAV_ADJUST_RADIUS))
        } else {
            radius
        }
    }

    pub fn path_corners(&self) -> &[Corner] {
        self.path.as_ref().map_or(&[], |p| p.corners.as_slice())
    }

    pub fn path_offset_dist(&self) -> f32 {
        self.path.as_ref().map_or(0.0, |p| p.offset_dist)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::DirectionalCurve;

    const DT: f32 = 1.0 / 30.0;

    fn settings() -> MotionSettings {
        MotionSettings::default().resolved()
    }

    fn run(model: &mut MotionModel, input: &MotionModelInput<'_>, s: &MotionSettings, ticks: usize) {
        for _ in 0..ticks {
            model.step(input, Some(s), DT).unwrap();
        }
    }

    #[test]
    fn test_missing_settings_fails() {
        let s = settings();
        let mut m = MotionModel::new(Pos3::origin(), Vec3::z(), Vec3::zeros(), &s);
        let err = m.step(&MotionModelInput::default(), None, DT).unwrap_err();
        assert!(matches!(err, LocomotionError::MissingSettings));
    }

    #[test]
    fn test_accelerates_to_max_speed() {
        let s = settings();
        let mut m = MotionModel::new(Pos3::origin(), Vec3::z(), Vec3::zeros(), &s);
        let input = MotionModelInput {
            velocity_dir: Vec3::x(),
            ..Default::default()
        };
        run(&mut m, &input, &s, 90);
        assert!((m.velocity().norm() - 3.5).abs() < 0.05, "speed {}", m.velocity().norm());
        assert!(m.pos().x > 5.0);
        assert!((m.facing() - Vec3::x()).norm() < 1e-3, "should face travel direction");
    }

    #[test]
    fn test_speed_fraction_scales_target() {
        let s = settings();
        let mut m = MotionModel::new(Pos3::origin(), Vec3::z(), Vec3::zeros(), &s);
        let input = MotionModelInput {
            velocity_dir: Vec3::z() * 0.5,
            ..Default::default()
        };
        run(&mut m, &input, &s, 120);
        assert!((m.velocity().norm() - 1.75).abs() < 0.05);
    }

    #[test]
    fn test_directional_speed_curve() {
        let mut s = MotionSettings::default();
        // only forward allows full speed
        s.max_speed_curve = Some(DirectionalCurve {
            values: [1.0, 1.0, 1.0, 2.0, 4.0, 2.0, 1.0, 1.0, 1.0],
        });
        let s = s.resolved();
        let mut m = MotionModel::new(Pos3::origin(), Vec3::z(), Vec3::zeros(), &s);
        let strafe_right = MotionModelInput {
            velocity_dir: Vec3::x(),
            facing: Some(Vec3::z()),
            ..Default::default()
        };
        run(&mut m, &strafe_right, &s, 120);
        assert!((m.velocity().norm() - 1.0).abs() < 0.05, "strafe speed {}", m.velocity().norm());
        assert!((m.facing() - Vec3::z()).norm() < 1e-3, "facing held while strafing");
    }

    #[test]
    fn test_turn_rate_limits_facing() {
        let mut s = MotionSettings::default();
        s.turn_rate_dps = 90.0;
        let s = s.resolved();
        let mut m = MotionModel::new(Pos3::origin(), Vec3::z(), Vec3::zeros(), &s);
        let input = MotionModelInput {
            velocity_dir: -Vec3::z(),
            ..Default::default()
        };
        m.step(&input, Some(&s), DT).unwrap();
        let turned = signed_angle_xz_deg(&Vec3::z(), &m.facing()).abs();
        assert!((turned - 3.0).abs() < 0.01, "turned {}", turned);
        assert!((m.yaw_speed().abs() - 90f32.to_radians()).abs() < 0.01);
    }

    #[test]
    fn test_max_accel_limits_velocity_change() {
        let mut s = MotionSettings::default();
        s.max_accel = 2.0;
        s.vel_k = 400.0;
        let s = s.resolved();
        let mut m = MotionModel::new(Pos3::origin(), Vec3::z(), Vec3::zeros(), &s);
        let input = MotionModelInput {
            velocity_dir: Vec3::z(),
            ..Default::default()
        };
        m.step(&input, Some(&s), DT).unwrap();
        assert!(m.velocity().norm() <= 2.0 * DT + 1e-4);
    }

    #[test]
    fn test_translation_skew_scales_delta() {
        let s = settings();
        let mut a = MotionModel::new(Pos3::origin(), Vec3::z(), Vec3::z() * 3.5, &s);
        let mut b = a.clone();
        let input = MotionModelInput {
            velocity_dir: Vec3::z(),
            ..Default::default()
        };
        let skewed = MotionModelInput {
            translation_skew: 2.0,
            ..input
        };
        a.step(&input, Some(&s), DT).unwrap();
        b.step(&skewed, Some(&s), DT).unwrap();
        assert!((b.pos().z - 2.0 * a.pos().z).abs() < 1e-4);
    }

    #[test]
    fn test_clamp_dist_reduce_and_recover() {
        let s = settings();
        let mut m = MotionModel::new(Pos3::origin(), Vec3::z(), Vec3::zeros(), &s);
        m.reduce_procedural_clamp_dist(0.3);
        assert!((m.procedural_clamp_dist() - 0.2).abs() < 1e-5);
        m.reduce_procedural_clamp_dist(-5.0);
        assert!((m.procedural_clamp_dist() - 0.2).abs() < 1e-5, "negative amounts are ignored");
        m.reduce_procedural_clamp_dist(10.0);
        assert_eq!(m.procedural_clamp_dist(), 0.0);

        // the shrink tick skips filtering, then the radius recovers
        m.step(&MotionModelInput::default(), Some(&s), DT).unwrap();
        assert_eq!(m.procedural_clamp_dist(), 0.0);
        m.step(&MotionModelInput::default(), Some(&s), DT).unwrap();
        assert!((m.procedural_clamp_dist() - 0.5).abs() < 1e-5);
    }

    #[test]
    fn test_stopping_position_ahead_of_motion() {
        let s = settings();
        let m = MotionModel::new(Pos3::origin(), Vec3::z(), Vec3::z() * 3.0, &s);
        let stop = m.approximate_stopping_position(&s);
        assert!(stop.z > 0.3, "stop {:?}", stop);
        assert!(stop.x.abs() < 1e-5);
    }

    #[test]
    fn test_path_mode_follows_and_stops() {
        let s = settings();
        let path = PathInput {
            id: 1,
            waypoints: vec![
                Pos3::new(0.0, 0.0, 0.0),
                Pos3::new(0.0, 0.0, 4.0),
                Pos3::new(4.0, 0.0, 4.0),
            ],
            stop_at_goal: true,
            speed_at_goal: -1.0,
        };
        let mut m = MotionModel::new(Pos3::origin(), Vec3::z(), Vec3::zeros(), &s);
        let input = MotionModelInput {
            velocity_dir: Vec3::z(),
            path: Some(&path),
            ..Default::default()
        };
        run(&mut m, &input, &s, 30);
        assert!(m.is_following_path());
        assert!(!m.path_corners().is_empty(), "right angle ahead should register");
        assert!(m.nav_adjust_radius(1.0) <= 1.0);

        run(&mut m, &input, &s, 300);
        let goal = Pos3::new(4.0, 0.0, 4.0);
        assert!(dist_xz(&m.pos(), &goal) < 0.3, "ended at {:?}", m.pos());
        assert!(m.velocity().norm() < 0.2);
    }

    #[test]
    fn test_path_dropped_returns_to_stick() {
        let s = settings();
        let path = PathInput {
            id: 7,
            waypoints: vec![Pos3::origin(), Pos3::new(0.0, 0.0, 10.0)],
            stop_at_goal: true,
            speed_at_goal: -1.0,
        };
        let mut m = MotionModel::new(Pos3::origin(), Vec3::z(), Vec3::zeros(), &s);
        let with_path = MotionModelInput {
            velocity_dir: Vec3::z(),
            path: Some(&path),
            ..Default::default()
        };
        m.step(&with_path, Some(&s), DT).unwrap();
        assert!(m.is_following_path());
        m.step(&MotionModelInput::default(), Some(&s), DT).unwrap();
        assert!(!m.is_following_path());
        assert_eq!(m.nav_adjust_radius(0.8), 0.8);
    }
}
