//! Procedural correction of the selected clip's root motion.
//!
//! The clip plays with its own natural alignment; this layer pulls that
//! alignment toward the motion model a little every tick. Position is eased
//! in and clamped to the model's clamp radius. Facing is rotated toward the
//! planned path, the far-end facing, or the user's strafe facing. Playback
//! rate is scaled so the clip covers the planned distance.

use serde::{Deserialize, Serialize};
use tracing::trace;
use validator::Validate;

use crate::math::{clamp01, dist_xz, flatten, rotation_between, seek, unit_xz, Locator, Pos3, Quat, Vec3, EPSILON};
use crate::motion_model::MotionModel;
use crate::settings::ProceduralSettings;
use crate::spring::SpringTracker;
use crate::trajectory::Trajectory;

/// Below this natural travel distance the playback rate is left at 1.
const MIN_ANIM_TRAVEL: f32 = 0.01;
/// Push-backs shorter than this are not treated as blocking.
const BLOCK_TOLERANCE: f32 = 1e-3;

/// Thresholds that are engine-wide rather than per dataset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct CorrectionThresholds {
    /// Planned travel beyond which the character counts as moving (m)
    #[validate(range(min = 0.0, max = 10.0))]
    pub moving_tail_dist: f32,
    /// Shorter direction vectors do not steer the moving rotation (m)
    #[validate(range(min = 0.0, max = 5.0))]
    pub min_rotation_vec_len: f32,
    /// Strafe weight change per second
    #[validate(range(min = 0.0, max = 100.0))]
    pub strafe_blend_rate: f32,
    /// Slack allowed past the clamp radius after a strategy override (m)
    #[validate(range(min = 0.0, max = 1.0))]
    pub max_overshoot: f32,
}

impl Default for CorrectionThresholds {
    fn default() -> Self {
        Self {
            moving_tail_dist: 0.75,
            min_rotation_vec_len: 0.15,
            strafe_blend_rate: 5.0,
            max_overshoot: 0.05,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CorrectionMode {
    Moving,
    Standing,
}

/// Inputs for one correction.
#[derive(Debug, Clone, Copy)]
pub struct ProceduralContext<'a> {
    pub dt: f32,
    /// Where the clip's root motion put the character this tick (parent space)
    pub anim_align: Locator,
    /// The clip's natural path, relative to `anim_align`
    pub anim_trajectory: Option<&'a Trajectory>,
    /// The planned path, relative to `reference`
    pub desired_trajectory: &'a Trajectory,
    pub reference: Locator,
    pub model_pos: Pos3,
    pub model_speed: f32,
    pub model_max_speed: f32,
    pub clamp_dist: f32,
    pub user_facing: Option<Vec3>,
    pub supports_strafe: bool,
    pub look_ahead: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Correction {
    pub align: Locator,
    pub playback_rate: f32,
    pub mode: CorrectionMode,
    /// 0 = path-driven facing, 1 = user facing
    pub strafe_weight: f32,
}

/// Look-ahead used for rotation targets and speed scaling.
pub fn look_ahead_time(horizon: f32, settings: &ProceduralSettings, remaining_clip_time: f32) -> f32 {
    (horizon * settings.look_ahead_scale)
        .min(remaining_clip_time)
        .max(settings.rotation_time)
}

/// Clamps `pos` to within `radius` of `center`.
pub fn clamp_to_radius(pos: Pos3, center: Pos3, radius: f32) -> Pos3 {
    let offset = pos - center;
    let len = offset.norm();
    let radius = radius.max(0.0);
    if len > radius && len > EPSILON {
        center + offset * (radius / len)
    } else {
        pos
    }
}

/// How far a pushed-back character overshoots the clamp radius.
///
/// `None` when the character reached where it was sent or stayed inside
/// the radius.
pub fn blocked_overshoot(intended: &Pos3, actual: &Pos3, model_pos: &Pos3, clamp_dist: f32) -> Option<f32> {
    if dist_xz(intended, actual) <= BLOCK_TOLERANCE {
        return None;
    }
    let overshoot = dist_xz(model_pos, actual) - clamp_dist;
    (overshoot > 0.0).then_some(overshoot)
}

/// Shrinks the model's clamp radius in proportion to a blocked overshoot.
pub fn shrink_clamp_for_block(model: &mut MotionModel, overshoot: f32, settings: &ProceduralSettings, dt: f32) {
    let amount = overshoot * settings.clamp_shrink_alpha * dt;
    trace!(overshoot, amount, "shrinking clamp radius");
    model.reduce_procedural_clamp_dist(amount);
}

#[derive(Debug, Clone)]
pub struct ProceduralCorrector {
    thresholds: CorrectionThresholds,
    strafe_weight: f32,
    speed_scale: f32,
    speed_spring: SpringTracker<f32>,
}

impl ProceduralCorrector {
    pub fn new(thresholds: CorrectionThresholds) -> Self {
        Self {
            thresholds,
            strafe_weight: 0.0,
            speed_scale: 1.0,
            speed_spring: SpringTracker::new(0.0),
        }
    }

    pub fn reset(&mut self) {
        self.strafe_weight = 0.0;
        self.speed_scale = 1.0;
        self.speed_spring.reset(0.0);
    }

    pub fn thresholds(&self) -> &CorrectionThresholds {
        &self.thresholds
    }

    pub fn speed_scale(&self) -> f32 {
        self.speed_scale
    }

    pub fn correct(&mut self, ctx: &ProceduralContext<'_>, settings: &ProceduralSettings) -> Correction {
        let pos = self.correct_translation(ctx, settings);
        let (rot, mode) = self.correct_rotation(ctx, settings);
        let playback_rate = self.scale_speed(ctx, settings);
        trace!(?mode, strafe = self.strafe_weight, playback_rate, "procedural correction");
        Correction {
            align: Locator::new(pos, rot),
            playback_rate,
            mode,
            strafe_weight: self.strafe_weight,
        }
    }

    fn correct_translation(&self, ctx: &ProceduralContext<'_>, settings: &ProceduralSettings) -> Pos3 {
        let anim_pos = ctx.anim_align.pos;
        let err = ctx.model_pos - anim_pos;
        let speed_factor = if ctx.model_max_speed > EPSILON {
            (ctx.model_speed / ctx.model_max_speed).max(settings.translation_min_factor)
        } else {
            settings.translation_min_factor
        };
        let step = clamp01(settings.translation_alpha * speed_factor * ctx.dt);
        clamp_to_radius(anim_pos + err * step, ctx.model_pos, ctx.clamp_dist)
    }

    fn world_point(traj: &Trajectory, frame: &Locator, t: f32) -> Option<(Pos3, Vec3)> {
        let s = traj.sample_clamped(t)?;
        Some((frame.transform_point(&s.pos), frame.transform_vector(&s.facing)))
    }

    fn correct_rotation(&mut self, ctx: &ProceduralContext<'_>, settings: &ProceduralSettings) -> (Quat, CorrectionMode) {
        let anim_rot = ctx.anim_align.rot;
        let anim_facing = unit_xz(&ctx.anim_align.facing(), Vec3::z());
        let desired = ctx.desired_trajectory;

        let start = desired.sample_clamped(0.0);
        let tail = desired.tail().copied();
        let mode = match (start, tail) {
            (Some(s), Some(t)) if dist_xz(&s.pos, &t.pos) > self.thresholds.moving_tail_dist => CorrectionMode::Moving,
            _ => CorrectionMode::Standing,
        };

        let anim_future = ctx
            .anim_trajectory
            .and_then(|t| Self::world_point(t, &ctx.anim_align, ctx.look_ahead));

        let base = match mode {
            CorrectionMode::Moving => {
                let target = Self::world_point(desired, &ctx.reference, ctx.look_ahead);
                match (anim_future, target) {
                    (Some((anim_pt, _)), Some((desired_pt, _))) => {
                        let to_anim = flatten(&(anim_pt - ctx.anim_align.pos));
                        let to_desired = flatten(&(desired_pt - ctx.anim_align.pos));
                        let min_len = self.thresholds.min_rotation_vec_len;
                        if to_anim.norm() > min_len && to_desired.norm() > min_len {
                            rotation_between(&to_anim, &to_desired)
                        } else {
                            Quat::identity()
                        }
                    }
                    _ => Quat::identity(),
                }
            }
            CorrectionMode::Standing => match tail {
                Some(t) => {
                    let far_facing = unit_xz(&ctx.reference.transform_vector(&t.facing), anim_facing);
                    rotation_between(&anim_facing, &far_facing)
                }
                None => Quat::identity(),
            },
        };

        let anim_future_facing = anim_future.map_or(anim_facing, |(_, f)| unit_xz(&f, anim_facing));
        let lock_cos = settings.strafe_lock_angle_deg.to_radians().cos();
        let strafe_target = match ctx.user_facing {
            Some(user) if ctx.supports_strafe && user.dot(&anim_future_facing) >= lock_cos => 1.0,
            _ => 0.0,
        };
        self.strafe_weight = seek(
            self.strafe_weight,
            strafe_target,
            self.thresholds.strafe_blend_rate * ctx.dt,
        );

        let mut rotation_time = settings.rotation_time;
        let mut rot = base;
        if self.strafe_weight > 0.0 {
            if let Some(user) = ctx.user_facing {
                let strafe_rot = rotation_between(&anim_facing, &unit_xz(&user, anim_facing));
                rot = base
                    .try_slerp(&strafe_rot, self.strafe_weight, EPSILON)
                    .unwrap_or(strafe_rot);
                if settings.strafing_rotation_time >= 0.0 && self.strafe_weight >= 0.5 {
                    rotation_time = settings.strafing_rotation_time;
                }
            }
        }

        let power = if rotation_time > EPSILON {
            clamp01(ctx.dt / rotation_time)
        } else {
            1.0
        };
        let mut step = rot.powf(power);
        step.renormalize();
        let mut out = step * anim_rot;
        out.renormalize();
        (out, mode)
    }

    fn scale_speed(&mut self, ctx: &ProceduralContext<'_>, settings: &ProceduralSettings) -> f32 {
        let target = match ctx.anim_trajectory {
            Some(anim) if settings.speed_scale_enabled => {
                let anim_travel = anim.travel_distance(0.0, ctx.look_ahead);
                let desired_travel = ctx.desired_trajectory.travel_distance(0.0, ctx.look_ahead);
                if anim_travel < MIN_ANIM_TRAVEL {
                    1.0
                } else {
                    (settings.speed_scale_rate * desired_travel / anim_travel)
                        .clamp(settings.speed_scale_min, settings.speed_scale_max)
                }
            }
            _ => 1.0,
        };
        self.speed_scale = self
            .speed_spring
            .track(self.speed_scale, target, ctx.dt, settings.speed_scale_spring_k);
        self.speed_scale
    }
}

impl Default for ProceduralCorrector {
    fn default() -> Self {
        Self::new(CorrectionThresholds::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::{yaw_deg, yaw_rotation};
    use crate::trajectory::TrajectorySample;
    use proptest::prelude::*;

    fn straight(dir: Vec3, speed: f32) -> Trajectory {
        Trajectory::from_samples((0..=10).map(|i| {
            let t = i as f32 * 0.1;
            TrajectorySample {
                time: t,
                pos: Pos3::origin() + dir * speed * t,
                velocity: dir * speed,
                facing: dir,
                yaw_speed: 0.0,
            }
        }))
    }

    fn ctx<'a>(desired: &'a Trajectory, anim: Option<&'a Trajectory>) -> ProceduralContext<'a> {
        ProceduralContext {
            dt: 1.0 / 30.0,
            anim_align: Locator::identity(),
            anim_trajectory: anim,
            desired_trajectory: desired,
            reference: Locator::identity(),
            model_pos: Pos3::origin(),
            model_speed: 0.0,
            model_max_speed: 4.0,
            clamp_dist: 0.5,
            user_facing: None,
            supports_strafe: true,
            look_ahead: 0.5,
        }
    }

    #[test]
    fn test_look_ahead_bounds() {
        let settings = ProceduralSettings::default();
        assert!((look_ahead_time(1.0, &settings, 10.0) - 0.5).abs() < 1e-6);
        assert!((look_ahead_time(1.0, &settings, 0.1) - settings.rotation_time).abs() < 1e-6);
    }

    #[test]
    fn test_translation_eases_toward_model() {
        let desired = straight(Vec3::z(), 0.0);
        let mut c = ctx(&desired, None);
        c.model_pos = Pos3::new(0.2, 0.0, 0.0);
        let mut corrector = ProceduralCorrector::default();
        let out = corrector.correct(&c, &ProceduralSettings::default());
        assert!(out.align.pos.x > 0.0 && out.align.pos.x < 0.2, "{:?}", out.align.pos);
        assert_eq!(out.mode, CorrectionMode::Standing);
    }

    #[test]
    fn test_moving_rotation_turns_toward_path() {
        let desired = straight(Vec3::x(), 3.0);
        let anim = straight(Vec3::z(), 3.0);
        let c = ctx(&desired, Some(&anim));
        let mut corrector = ProceduralCorrector::default();
        let out = corrector.correct(&c, &ProceduralSettings::default());
        assert_eq!(out.mode, CorrectionMode::Moving);
        let yaw = yaw_deg(&out.align.facing());
        assert!(yaw > 0.0 && yaw < 90.0, "yaw {yaw}");
        assert!((out.align.rot.quaternion().norm() - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_standing_rotation_uses_far_facing() {
        let desired = Trajectory::from_samples([0.0f32, 1.0].map(|t| TrajectorySample {
            time: t,
            pos: Pos3::origin(),
            velocity: Vec3::zeros(),
            facing: Vec3::x(),
            yaw_speed: 0.0,
        }));
        let mut c = ctx(&desired, None);
        c.dt = 10.0;
        let mut corrector = ProceduralCorrector::default();
        let out = corrector.correct(&c, &ProceduralSettings::default());
        assert!((yaw_deg(&out.align.facing()) - 90.0).abs() < 1e-3);
    }

    #[test]
    fn test_strafe_blends_in_and_respects_lock() {
        let desired = straight(Vec3::z(), 3.0);
        let anim = straight(Vec3::z(), 3.0);
        let settings = ProceduralSettings::default();
        let mut corrector = ProceduralCorrector::default();

        let mut c = ctx(&desired, Some(&anim));
        c.user_facing = Some(yaw_rotation(30.0) * Vec3::z());
        let first = corrector.correct(&c, &settings);
        assert!(first.strafe_weight > 0.0 && first.strafe_weight < 1.0);
        for _ in 0..30 {
            corrector.correct(&c, &settings);
        }
        assert_eq!(corrector.correct(&c, &settings).strafe_weight, 1.0);

        c.user_facing = Some(yaw_rotation(120.0) * Vec3::z());
        let out = corrector.correct(&c, &settings);
        assert!(out.strafe_weight < 1.0);
    }

    #[test]
    fn test_speed_scale_clamped_and_smoothed() {
        let desired = straight(Vec3::z(), 6.0);
        let anim = straight(Vec3::z(), 3.0);
        let settings = ProceduralSettings::default();
        let mut corrector = ProceduralCorrector::default();
        let c = ctx(&desired, Some(&anim));
        let first = corrector.correct(&c, &settings).playback_rate;
        assert!(first > 1.0 && first < settings.speed_scale_max);
        let mut rate = first;
        for _ in 0..120 {
            rate = corrector.correct(&c, &settings).playback_rate;
        }
        assert!((rate - settings.speed_scale_max).abs() < 1e-3, "rate {rate}");

        let still = straight(Vec3::z(), 0.0);
        let c = ctx(&desired, Some(&still));
        for _ in 0..120 {
            rate = corrector.correct(&c, &settings).playback_rate;
        }
        assert!((rate - 1.0).abs() < 1e-3);
    }

    #[test]
    fn test_blocked_overshoot() {
        let model = Pos3::new(1.0, 0.0, 0.0);
        let intended = Pos3::new(0.6, 0.0, 0.0);
        assert_eq!(blocked_overshoot(&intended, &intended, &model, 0.5), None);
        let actual = Pos3::new(0.2, 0.0, 0.0);
        let over = blocked_overshoot(&intended, &actual, &model, 0.5).unwrap();
        assert!((over - 0.3).abs() < 1e-5);
    }

    proptest! {
        #[test]
        fn prop_translation_within_clamp(
            mx in -5.0f32..5.0, mz in -5.0f32..5.0,
            ax in -5.0f32..5.0, az in -5.0f32..5.0,
            clamp in 0.0f32..2.0,
            speed in 0.0f32..6.0,
            dt in 0.0f32..0.5,
        ) {
            let desired = straight(Vec3::z(), speed);
            let mut c = ctx(&desired, None);
            c.model_pos = Pos3::new(mx, 0.0, mz);
            c.anim_align = Locator::from_pos(Pos3::new(ax, 0.0, az));
            c.clamp_dist = clamp;
            c.model_speed = speed;
            c.dt = dt;
            let mut corrector = ProceduralCorrector::default();
            let out = corrector.correct(&c, &ProceduralSettings::default());
            prop_assert!((out.align.pos - c.model_pos).norm() <= clamp + 1e-4);
        }
    }
}
