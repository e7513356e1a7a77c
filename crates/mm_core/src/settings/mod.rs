//! Dataset tuning: motion model parameters, goal weights, pose definition and
//! procedural correction settings.
//!
//! Everything here is authored alongside a dataset and deserialised with it.
//! Negative values on the "possibly negative" fields mean "not set, use the
//! fallback".

pub mod blend_queue;
pub mod curve;

pub use blend_queue::SettingsBlendQueue;
pub use curve::{DirectionalCurve, CURVE_KEYS};

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::math::{lerp, lerp_possibly_negative};

// ============================================================================
// Motion model tuning
// ============================================================================

/// Corner slowdown used when following a path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct CornerSettings {
    /// Turns shallower than this are not recorded as corners (deg)
    pub gather_angle_deg: f32,
    /// At or below this turn angle the corner speed is `speed_max`
    pub angle_min_deg: f32,
    /// At or above this turn angle the corner speed is `speed_min`
    pub angle_max_deg: f32,
    pub speed_min: f32,
    pub speed_max: f32,
    /// How long the character should hold the corner speed (s)
    pub time_at_min_speed: f32,
}

impl Default for CornerSettings {
    fn default() -> Self {
        Self {
            gather_angle_deg: 20.0,
            angle_min_deg: 30.0,
            angle_max_deg: 120.0,
            speed_min: 1.0,
            speed_max: 4.0,
            time_at_min_speed: 0.25,
        }
    }
}

impl CornerSettings {
    fn lerp(&self, other: &Self, t: f32) -> Self {
        Self {
            gather_angle_deg: lerp(self.gather_angle_deg, other.gather_angle_deg, t),
            angle_min_deg: lerp(self.angle_min_deg, other.angle_min_deg, t),
            angle_max_deg: lerp(self.angle_max_deg, other.angle_max_deg, t),
            speed_min: lerp(self.speed_min, other.speed_min, t),
            speed_max: lerp(self.speed_max, other.speed_max, t),
            time_at_min_speed: lerp(self.time_at_min_speed, other.time_at_min_speed, t),
        }
    }
}

/// Integrator tuning. Curves left unset are filled from their scalar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct MotionSettings {
    /// m/s
    pub max_speed: f32,
    pub max_speed_curve: Option<DirectionalCurve>,
    /// Velocity spring stiffness while accelerating
    pub vel_k: f32,
    pub vel_k_curve: Option<DirectionalCurve>,
    /// Velocity spring stiffness while decelerating; negative falls back to `vel_k`
    pub vel_k_decel: f32,
    pub vel_k_decel_curve: Option<DirectionalCurve>,
    /// deg/s
    pub turn_rate_dps: f32,
    pub turn_rate_curve: Option<DirectionalCurve>,
    /// Used below `moving_group_speed_percent_threshold`; unset falls back to `vel_k_curve`
    pub idle_vel_k_curve: Option<DirectionalCurve>,
    /// Used below `moving_group_speed_percent_threshold`; unset falls back to `turn_rate_curve`
    pub idle_turn_rate_curve: Option<DirectionalCurve>,
    /// Speed fraction under which the idle curves apply; negative disables them
    pub moving_group_speed_percent_threshold: f32,
    /// m/s², negative means unlimited
    pub max_accel: f32,
    /// How far the model may drift from the animation (m)
    pub procedural_clamp_dist: f32,
    pub base_yaw_speed_factor: f32,
    /// Turn at `turn_rate_dps` instead of snapping to the velocity direction
    pub always_interpolate_facing: bool,
    pub corners: CornerSettings,
}

impl Default for MotionSettings {
    fn default() -> Self {
        Self {
            max_speed: 3.5,
            max_speed_curve: None,
            vel_k: 20.0,
            vel_k_curve: None,
            vel_k_decel: -1.0,
            vel_k_decel_curve: None,
            turn_rate_dps: 360.0,
            turn_rate_curve: None,
            idle_vel_k_curve: None,
            idle_turn_rate_curve: None,
            moving_group_speed_percent_threshold: -1.0,
            max_accel: -1.0,
            procedural_clamp_dist: 0.5,
            base_yaw_speed_factor: 1.0,
            always_interpolate_facing: true,
            corners: CornerSettings::default(),
        }
    }
}

impl MotionSettings {
    /// Copy with every curve present: main curves take their scalar, idle
    /// curves take the -1 sentinel.
    pub fn resolved(&self) -> Self {
        let mut out = self.clone();
        let fill = |curve: Option<DirectionalCurve>, base: f32| {
            Some(curve.unwrap_or_else(|| DirectionalCurve::constant(base)))
        };
        out.max_speed_curve = fill(self.max_speed_curve, self.max_speed);
        out.vel_k_curve = fill(self.vel_k_curve, self.vel_k);
        out.vel_k_decel_curve = fill(self.vel_k_decel_curve, self.vel_k_decel);
        out.turn_rate_curve = fill(self.turn_rate_curve, self.turn_rate_dps);
        out.idle_vel_k_curve = fill(self.idle_vel_k_curve, -1.0);
        out.idle_turn_rate_curve = fill(self.idle_turn_rate_curve, -1.0);
        out
    }

    pub fn max_speed_curve(&self) -> DirectionalCurve {
        self.max_speed_curve
            .unwrap_or_else(|| DirectionalCurve::constant(self.max_speed))
    }

    pub fn vel_k_curve(&self) -> DirectionalCurve {
        self.vel_k_curve
            .unwrap_or_else(|| DirectionalCurve::constant(self.vel_k))
    }

    pub fn vel_k_decel_curve(&self) -> DirectionalCurve {
        self.vel_k_decel_curve
            .unwrap_or_else(|| DirectionalCurve::constant(self.vel_k_decel))
    }

    pub fn turn_rate_curve(&self) -> DirectionalCurve {
        self.turn_rate_curve
            .unwrap_or_else(|| DirectionalCurve::constant(self.turn_rate_dps))
    }

    pub fn idle_vel_k_curve(&self) -> DirectionalCurve {
        self.idle_vel_k_curve
            .unwrap_or_else(|| DirectionalCurve::constant(-1.0))
    }

    pub fn idle_turn_rate_curve(&self) -> DirectionalCurve {
        self.idle_turn_rate_curve
            .unwrap_or_else(|| DirectionalCurve::constant(-1.0))
    }

    /// Highest speed any direction allows.
    pub fn top_speed(&self) -> f32 {
        self.max_speed_curve().max_value()
    }

    /// Blends two resolved settings. `t <= 0` and `t >= 1` return an end exactly.
    pub fn lerp(a: &Self, b: &Self, t: f32) -> Self {
        if t <= 0.0 {
            return a.clone();
        }
        if t >= 1.0 {
            return b.clone();
        }

        let vel_k_a = a.vel_k_curve();
        let vel_k_b = b.vel_k_curve();
        let turn_a = a.turn_rate_curve();
        let turn_b = b.turn_rate_curve();

        Self {
            max_speed: lerp(a.max_speed, b.max_speed, t),
            max_speed_curve: Some(
                a.max_speed_curve()
                    .lerp_possibly_negative(&b.max_speed_curve(), t),
            ),
            vel_k: lerp(a.vel_k, b.vel_k, t),
            vel_k_curve: Some(vel_k_a.lerp_possibly_negative(&vel_k_b, t)),
            vel_k_decel: lerp_possibly_negative(a.vel_k_decel, b.vel_k_decel, t),
            vel_k_decel_curve: Some(
                a.vel_k_decel_curve()
                    .lerp_possibly_negative(&b.vel_k_decel_curve(), t),
            ),
            turn_rate_dps: lerp(a.turn_rate_dps, b.turn_rate_dps, t),
            turn_rate_curve: Some(turn_a.lerp_possibly_negative(&turn_b, t)),
            idle_vel_k_curve: Some(DirectionalCurve::lerp_with_fallback(
                &a.idle_vel_k_curve(),
                &vel_k_a,
                &b.idle_vel_k_curve(),
                &vel_k_b,
                t,
            )),
            idle_turn_rate_curve: Some(DirectionalCurve::lerp_with_fallback(
                &a.idle_turn_rate_curve(),
                &turn_a,
                &b.idle_turn_rate_curve(),
                &turn_b,
                t,
            )),
            moving_group_speed_percent_threshold: lerp_possibly_negative(
                a.moving_group_speed_percent_threshold,
                b.moving_group_speed_percent_threshold,
                t,
            ),
            max_accel: lerp_possibly_negative(a.max_accel, b.max_accel, t),
            procedural_clamp_dist: lerp_possibly_negative(
                a.procedural_clamp_dist,
                b.procedural_clamp_dist,
                t,
            ),
            base_yaw_speed_factor: lerp(a.base_yaw_speed_factor, b.base_yaw_speed_factor, t),
            always_interpolate_facing: a.always_interpolate_facing || b.always_interpolate_facing,
            corners: a.corners.lerp(&b.corners, t),
        }
    }
}

// ============================================================================
// Matching weights
// ============================================================================

/// Trajectory sampling and goal weights.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct GoalSettings {
    /// Future samples compared per query
    pub num_samples: usize,
    /// Future horizon (s)
    pub max_sample_time: f32,
    /// History samples compared per query
    pub num_prev_samples: usize,
    /// History look-back (s)
    pub max_prev_sample_time: f32,
    /// Integrator sub-steps per future sample
    pub resolution: usize,
    pub master_weight: f32,
    pub position_weight: f32,
    pub velocity_weight: f32,
    /// Facing weight on the last future/history sample
    pub directional_weight: f32,
    /// Facing weight on every other sample
    pub interim_directional_weight: f32,
    pub yaw_speed_weight: f32,
    /// Extra multiplier on history samples
    pub prev_traj_weight: f32,
    pub anim_bias_weight: f32,
    pub grouping_weight: f32,
    /// Flatten history samples onto the horizontal plane
    pub flatten_history: bool,
}

impl Default for GoalSettings {
    fn default() -> Self {
        Self {
            num_samples: 3,
            max_sample_time: 1.0,
            num_prev_samples: 1,
            max_prev_sample_time: 0.3,
            resolution: 4,
            master_weight: 1.0,
            position_weight: 1.0,
            velocity_weight: 0.5,
            directional_weight: 1.0,
            interim_directional_weight: 0.5,
            yaw_speed_weight: 0.05,
            prev_traj_weight: 0.5,
            anim_bias_weight: 1.0,
            grouping_weight: 1.0,
            flatten_history: true,
        }
    }
}

/// One body contributing position and velocity to the pose features.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct PoseBody {
    pub joint: String,
    #[serde(default = "one")]
    pub position_weight: f32,
    #[serde(default = "one")]
    pub velocity_weight: f32,
}

fn one() -> f32 {
    1.0
}

/// Joints compared when matching from an external pose.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct PoseSettings {
    pub bodies: Vec<PoseBody>,
    pub facing_joint: String,
    pub facing_weight: f32,
    pub master_weight: f32,
}

impl Default for PoseSettings {
    fn default() -> Self {
        Self {
            bodies: Vec::new(),
            facing_joint: "root".to_string(),
            facing_weight: 1.0,
            master_weight: 1.0,
        }
    }
}

impl PoseSettings {
    pub fn required_joints(&self) -> impl Iterator<Item = &str> {
        self.bodies
            .iter()
            .map(|b| b.joint.as_str())
            .chain(std::iter::once(self.facing_joint.as_str()))
    }
}

/// Post-selection correction tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct ProceduralSettings {
    /// Time constant of the facing correction (s)
    pub rotation_time: f32,
    /// Time constant while strafing; negative uses `rotation_time`
    pub strafing_rotation_time: f32,
    /// Beyond this angle between user facing and animation facing strafing is dropped (deg)
    pub strafe_lock_angle_deg: f32,
    pub translation_alpha: f32,
    /// Lower bound of the speed factor applied to `translation_alpha`
    pub translation_min_factor: f32,
    /// How fast the clamp radius shrinks when the character is blocked
    pub clamp_shrink_alpha: f32,
    pub look_ahead_scale: f32,
    pub speed_scale_enabled: bool,
    pub speed_scale_rate: f32,
    pub speed_scale_min: f32,
    pub speed_scale_max: f32,
    pub speed_scale_spring_k: f32,
}

impl Default for ProceduralSettings {
    fn default() -> Self {
        Self {
            rotation_time: 0.4,
            strafing_rotation_time: -1.0,
            strafe_lock_angle_deg: 60.0,
            translation_alpha: 4.0,
            translation_min_factor: 0.2,
            clamp_shrink_alpha: 5.0,
            look_ahead_scale: 0.5,
            speed_scale_enabled: true,
            speed_scale_rate: 1.0,
            speed_scale_min: 0.8,
            speed_scale_max: 1.2,
            speed_scale_spring_k: 30.0,
        }
    }
}

/// Animation and motion fade times used when a new clip is selected.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct BlendPair {
    pub anim_fade_time: f32,
    pub motion_fade_time: f32,
}

impl BlendPair {
    pub fn uniform(time: f32) -> Self {
        Self {
            anim_fade_time: time,
            motion_fade_time: time,
        }
    }
}

impl Default for BlendPair {
    fn default() -> Self {
        Self::uniform(0.5)
    }
}

/// Everything a dataset declares about how it should be matched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct MatchingSettings {
    pub motion: MotionSettings,
    pub goals: GoalSettings,
    pub pose: PoseSettings,
    pub procedural: ProceduralSettings,
    /// Minimum time between accepted matches (s)
    pub transition_interval_sec: f32,
    /// Cost discount for continuing the current clip
    pub natural_bias: f32,
    /// A non-looping clip this close to its end must be replaced (s)
    pub min_blend_time: f32,
    pub blend: BlendPair,
    /// Settings blend time when switching into this dataset; negative uses the transition table
    pub settings_blend_time: f32,
    pub disable_settings_blend: bool,
    pub supports_strafe: bool,
    pub ground_adjust_factor: f32,
    pub allow_external_transitions: bool,
}

impl Default for MatchingSettings {
    fn default() -> Self {
        Self {
            motion: MotionSettings::default(),
            goals: GoalSettings::default(),
            pose: PoseSettings::default(),
            procedural: ProceduralSettings::default(),
            transition_interval_sec: 0.1,
            natural_bias: 0.1,
            min_blend_time: 0.2,
            blend: BlendPair::default(),
            settings_blend_time: -1.0,
            disable_settings_blend: false,
            supports_strafe: true,
            ground_adjust_factor: 1.0,
            allow_external_transitions: true,
        }
    }
}
