//! Nine-key directional tuning curves.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::math::{lerp, lerp_possibly_negative, wrap_degrees};

/// Number of keys: one every 45° from -180° through 180°.
pub const CURVE_KEYS: usize = 9;
pub const CURVE_STEP_DEG: f32 = 45.0;

/// A value sampled at 45° steps around the character.
///
/// The angle is the offset between where the character faces and where it is
/// moving, so key 4 (0°) is forward movement and keys 0/8 (±180°) are backward.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct DirectionalCurve {
    pub values: [f32; CURVE_KEYS],
}

impl DirectionalCurve {
    pub fn constant(value: f32) -> Self {
        Self {
            values: [value; CURVE_KEYS],
        }
    }

    pub fn key_angle(index: usize) -> f32 {
        -180.0 + CURVE_STEP_DEG * index as f32
    }

    /// Value at the ±180° seam. Authored curves normally agree at both ends; if
    /// they do not, the seam takes their mean so the curve stays continuous.
    fn seam(&self) -> f32 {
        0.5 * (self.values[0] + self.values[CURVE_KEYS - 1])
    }

    /// Circular linear interpolation at `angle_deg`.
    pub fn evaluate(&self, angle_deg: f32) -> f32 {
        let a = wrap_degrees(angle_deg);
        let f = (a + 180.0) / CURVE_STEP_DEG;
        let i = (f.floor() as usize).min(CURVE_KEYS - 2);
        let t = (f - i as f32).clamp(0.0, 1.0);

        let v0 = if i == 0 { self.seam() } else { self.values[i] };
        let v1 = if i + 1 == CURVE_KEYS - 1 {
            self.seam()
        } else {
            self.values[i + 1]
        };
        lerp(v0, v1, t)
    }

    pub fn max_value(&self) -> f32 {
        self.values.iter().copied().fold(f32::MIN, f32::max)
    }

    /// True when the curve carries real data (the -1 sentinel means "use the fallback").
    pub fn is_set(&self) -> bool {
        self.values[0] >= 0.0
    }

    pub fn lerp(&self, other: &Self, t: f32) -> Self {
        let mut values = [0.0; CURVE_KEYS];
        for (i, v) in values.iter_mut().enumerate() {
            *v = lerp(self.values[i], other.values[i], t);
        }
        Self { values }
    }

    /// Key-wise blend treating negative keys as unset.
    pub fn lerp_possibly_negative(&self, other: &Self, t: f32) -> Self {
        let mut values = [0.0; CURVE_KEYS];
        for (i, v) in values.iter_mut().enumerate() {
            *v = lerp_possibly_negative(self.values[i], other.values[i], t);
        }
        Self { values }
    }

    /// Blends two optional-data curves where each side substitutes its own
    /// `fallback` curve when it has no data of its own.
    pub fn lerp_with_fallback(
        a: &Self,
        a_fallback: &Self,
        b: &Self,
        b_fallback: &Self,
        t: f32,
    ) -> Self {
        match (a.is_set(), b.is_set()) {
            (false, false) => Self::constant(-1.0),
            (a_set, b_set) => {
                let from = if a_set { a } else { a_fallback };
                let to = if b_set { b } else { b_fallback };
                from.lerp(to, t)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp() -> DirectionalCurve {
        // Backward slow, forward fast.
        DirectionalCurve {
            values: [1.0, 2.0, 3.0, 4.0, 5.0, 4.0, 3.0, 2.0, 1.0],
        }
    }

    #[test]
    fn test_evaluate_at_keys() {
        let c = ramp();
        assert!((c.evaluate(0.0) - 5.0).abs() < 1e-5);
        assert!((c.evaluate(90.0) - 3.0).abs() < 1e-5);
        assert!((c.evaluate(-45.0) - 4.0).abs() < 1e-5);
    }

    #[test]
    fn test_evaluate_between_keys() {
        let c = ramp();
        assert!((c.evaluate(22.5) - 4.5).abs() < 1e-5);
    }

    #[test]
    fn test_wraps_across_seam() {
        let c = ramp();
        let a = c.evaluate(179.0);
        let b = c.evaluate(-179.0);
        assert!((a - b).abs() < 0.1, "seam should be continuous: {} vs {}", a, b);
        assert!((c.evaluate(540.0) - c.evaluate(180.0)).abs() < 1e-5);
    }

    #[test]
    fn test_mismatched_seam_is_continuous() {
        let mut c = ramp();
        c.values[0] = 0.0;
        c.values[8] = 2.0;
        let just_below = c.evaluate(179.999);
        let just_above = c.evaluate(-179.999);
        assert!((just_below - just_above).abs() < 1e-3);
        assert!((c.evaluate(180.0) - 1.0).abs() < 1e-4);
    }

    #[test]
    fn test_lerp_with_fallback() {
        let unset = DirectionalCurve::constant(-1.0);
        let fallback = DirectionalCurve::constant(10.0);
        let set = DirectionalCurve::constant(20.0);

        let out = DirectionalCurve::lerp_with_fallback(&unset, &fallback, &set, &fallback, 0.5);
        assert!((out.values[3] - 15.0).abs() < 1e-5);

        let both = DirectionalCurve::lerp_with_fallback(&unset, &fallback, &unset, &fallback, 0.5);
        assert!(!both.is_set());
    }
}
