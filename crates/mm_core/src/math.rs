//! Math helpers shared by the locomotion core.
//!
//! All motion lives on the XZ plane with +Y up. Facing is the local +Z axis of
//! a rotation, so a yaw of 0° looks down +Z and +90° looks down +X.

use nalgebra::{Point3, UnitQuaternion, Vector3};
use serde::{Deserialize, Serialize};

pub type Vec3 = Vector3<f32>;
pub type Pos3 = Point3<f32>;
pub type Quat = UnitQuaternion<f32>;

/// Lengths below this are treated as zero.
pub const EPSILON: f32 = 1e-5;

// ============================================================================
// Scalar helpers
// ============================================================================

#[inline]
pub fn clamp01(x: f32) -> f32 {
    x.clamp(0.0, 1.0)
}

#[inline]
pub fn lerp(a: f32, b: f32, t: f32) -> f32 {
    a + (b - a) * t
}

/// Maps `x` from `[in0, in1]` onto `[out0, out1]`, clamping to the output range.
#[inline]
pub fn lerp_scale_clamp(in0: f32, in1: f32, out0: f32, out1: f32, x: f32) -> f32 {
    let span = in1 - in0;
    if span.abs() < EPSILON {
        return if x < in0 { out0 } else { out1 };
    }
    lerp(out0, out1, clamp01((x - in0) / span))
}

#[inline]
pub fn smoothstep(t: f32) -> f32 {
    let t = clamp01(t);
    t * t * (3.0 - 2.0 * t)
}

/// Blends two values where a negative value means "not set".
///
/// Both unset stays unset (-1). One unset takes the other side as is.
#[inline]
pub fn lerp_possibly_negative(a: f32, b: f32, t: f32) -> f32 {
    match (a < 0.0, b < 0.0) {
        (true, true) => -1.0,
        (true, false) => b,
        (false, true) => a,
        (false, false) => lerp(a, b, t),
    }
}

/// Wraps an angle into `[-180, 180)`.
#[inline]
pub fn wrap_degrees(deg: f32) -> f32 {
    let wrapped = (deg + 180.0).rem_euclid(360.0) - 180.0;
    if wrapped.is_finite() {
        wrapped
    } else {
        0.0
    }
}

/// Moves `current` toward `target` by at most `max_delta`.
#[inline]
pub fn seek(current: f32, target: f32, max_delta: f32) -> f32 {
    if current < target {
        (current + max_delta).min(target)
    } else {
        (current - max_delta).max(target)
    }
}

// ============================================================================
// Vector helpers
// ============================================================================

#[inline]
pub fn flatten(v: &Vec3) -> Vec3 {
    Vec3::new(v.x, 0.0, v.z)
}

#[inline]
pub fn length_xz(v: &Vec3) -> f32 {
    (v.x * v.x + v.z * v.z).sqrt()
}

#[inline]
pub fn dist_xz(a: &Pos3, b: &Pos3) -> f32 {
    length_xz(&(b - a))
}

#[inline]
pub fn safe_normalize(v: &Vec3, fallback: Vec3) -> Vec3 {
    let len = v.norm();
    if len > EPSILON {
        v / len
    } else {
        fallback
    }
}

/// Unit vector on the XZ plane, or `fallback` when `v` has no horizontal extent.
#[inline]
pub fn unit_xz(v: &Vec3, fallback: Vec3) -> Vec3 {
    safe_normalize(&flatten(v), fallback)
}

/// Shortens `v` so its length does not exceed `max_len`.
#[inline]
pub fn limit_length(v: &Vec3, max_len: f32) -> Vec3 {
    let len = v.norm();
    if len > max_len && len > EPSILON {
        v * (max_len.max(0.0) / len)
    } else {
        *v
    }
}

/// Heading of a direction in degrees, measured from +Z toward +X.
#[inline]
pub fn yaw_deg(dir: &Vec3) -> f32 {
    dir.x.atan2(dir.z).to_degrees()
}

/// Signed angle in degrees from `from` to `to` on the XZ plane.
#[inline]
pub fn signed_angle_xz_deg(from: &Vec3, to: &Vec3) -> f32 {
    wrap_degrees(yaw_deg(to) - yaw_deg(from))
}

#[inline]
pub fn yaw_rotation(deg: f32) -> Quat {
    Quat::from_axis_angle(&Vector3::y_axis(), deg.to_radians())
}

#[inline]
pub fn facing_rotation(dir: &Vec3) -> Quat {
    yaw_rotation(yaw_deg(dir))
}

/// Shortest rotation carrying `from` onto `to`. Opposite vectors turn about +Y.
pub fn rotation_between(from: &Vec3, to: &Vec3) -> Quat {
    Quat::rotation_between(from, to).unwrap_or_else(|| {
        if from.dot(to) > 0.0 {
            Quat::identity()
        } else {
            yaw_rotation(180.0)
        }
    })
}

/// Rotates `current` toward `target` on the XZ plane by at most `max_deg`.
pub fn turn_towards(current: &Vec3, target: &Vec3, max_deg: f32) -> Vec3 {
    let delta = signed_angle_xz_deg(current, target);
    let step = delta.clamp(-max_deg.abs(), max_deg.abs());
    yaw_rotation(step) * unit_xz(current, Vec3::z())
}

// ============================================================================
// Locator
// ============================================================================

/// Rigid transform: a position plus a rotation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Locator {
    pub pos: Pos3,
    pub rot: Quat,
}

impl Default for Locator {
    fn default() -> Self {
        Self::identity()
    }
}

impl Locator {
    pub fn new(pos: Pos3, rot: Quat) -> Self {
        Self { pos, rot }
    }

    pub fn identity() -> Self {
        Self {
            pos: Pos3::origin(),
            rot: Quat::identity(),
        }
    }

    pub fn from_pos(pos: Pos3) -> Self {
        Self {
            pos,
            rot: Quat::identity(),
        }
    }

    /// Local +Z in parent space.
    pub fn facing(&self) -> Vec3 {
        self.rot * Vec3::z()
    }

    pub fn transform_point(&self, p: &Pos3) -> Pos3 {
        self.pos + self.rot * p.coords
    }

    pub fn untransform_point(&self, p: &Pos3) -> Pos3 {
        Pos3::from(self.rot.inverse() * (p - self.pos))
    }

    pub fn transform_vector(&self, v: &Vec3) -> Vec3 {
        self.rot * v
    }

    pub fn untransform_vector(&self, v: &Vec3) -> Vec3 {
        self.rot.inverse() * v
    }

    /// Expresses a locator given relative to `self` in `self`'s parent space.
    pub fn transform_locator(&self, local: &Locator) -> Locator {
        Locator {
            pos: self.transform_point(&local.pos),
            rot: self.rot * local.rot,
        }
    }

    /// Expresses a parent-space locator relative to `self`.
    pub fn untransform_locator(&self, other: &Locator) -> Locator {
        Locator {
            pos: self.untransform_point(&other.pos),
            rot: self.rot.inverse() * other.rot,
        }
    }

    /// Re-expresses a locator from the `from` frame into the `to` frame.
    pub fn reparent(&self, from: &Locator, to: &Locator) -> Locator {
        to.untransform_locator(&from.transform_locator(self))
    }

    /// Opposite rotations snap to whichever end `t` is closer to.
    pub fn lerp(&self, other: &Locator, t: f32) -> Locator {
        let rot = self
            .rot
            .try_slerp(&other.rot, t, EPSILON)
            .unwrap_or(if t < 0.5 { self.rot } else { other.rot });
        Locator {
            pos: self.pos + (other.pos - self.pos) * t,
            rot,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wrap_degrees() {
        assert!((wrap_degrees(190.0) + 170.0).abs() < 1e-4);
        assert!((wrap_degrees(-190.0) - 170.0).abs() < 1e-4);
        assert!((wrap_degrees(180.0) + 180.0).abs() < 1e-4);
        assert!((wrap_degrees(45.0) - 45.0).abs() < 1e-4);
    }

    #[test]
    fn test_lerp_possibly_negative() {
        assert_eq!(lerp_possibly_negative(-1.0, -5.0, 0.5), -1.0);
        assert_eq!(lerp_possibly_negative(-1.0, 3.0, 0.1), 3.0);
        assert_eq!(lerp_possibly_negative(2.0, -1.0, 0.9), 2.0);
        assert!((lerp_possibly_negative(2.0, 4.0, 0.5) - 3.0).abs() < 1e-6);
    }

    #[test]
    fn test_yaw_convention() {
        assert!(yaw_deg(&Vec3::z()).abs() < 1e-4);
        assert!((yaw_deg(&Vec3::x()) - 90.0).abs() < 1e-4);
        let f = yaw_rotation(90.0) * Vec3::z();
        assert!((f - Vec3::x()).norm() < 1e-5, "yaw 90 should face +X, got {:?}", f);
    }

    #[test]
    fn test_turn_towards_limits_step() {
        let out = turn_towards(&Vec3::z(), &Vec3::x(), 30.0);
        assert!((yaw_deg(&out) - 30.0).abs() < 1e-3);
        let done = turn_towards(&Vec3::z(), &Vec3::x(), 120.0);
        assert!((yaw_deg(&done) - 90.0).abs() < 1e-3);
    }

    #[test]
    fn test_locator_roundtrip() {
        let frame = Locator::new(Pos3::new(1.0, 0.0, 2.0), yaw_rotation(45.0));
        let local = Locator::new(Pos3::new(0.5, 0.0, -1.0), yaw_rotation(-10.0));
        let back = frame.untransform_locator(&frame.transform_locator(&local));
        assert!((back.pos - local.pos).norm() < 1e-5);
        assert!(back.rot.angle_to(&local.rot) < 1e-4);
    }

    #[test]
    fn test_rotation_between_opposite() {
        let r = rotation_between(&Vec3::z(), &-Vec3::z());
        let out = r * Vec3::z();
        assert!((out + Vec3::z()).norm() < 1e-4);
    }
}
