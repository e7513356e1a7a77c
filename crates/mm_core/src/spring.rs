//! Critically damped spring used by the motion model and speed scaling.

use std::ops::{Add, Mul, Sub};

/// Tracks a value toward a moving target along a critically damped spring.
///
/// `k` is the spring stiffness; the natural frequency is `sqrt(k)`.
#[derive(Debug, Clone, Copy)]
pub struct SpringTracker<T> {
    speed: T,
}

impl<T> SpringTracker<T>
where
    T: Copy + Add<Output = T> + Sub<Output = T> + Mul<f32, Output = T>,
{
    pub fn new(zero: T) -> Self {
        Self { speed: zero }
    }

    pub fn reset(&mut self, speed: T) {
        self.speed = speed;
    }

    /// Rate of change produced by the last `track` call.
    pub fn speed(&self) -> T {
        self.speed
    }

    pub fn track(&mut self, current: T, desired: T, dt: f32, k: f32) -> T {
        if dt <= 0.0 {
            return current;
        }
        if k <= 0.0 {
            self.speed = (desired - current) * (1.0 / dt);
            return desired;
        }

        let w = k.sqrt();
        let x0 = current - desired;
        let c2 = self.speed + x0 * w;
        let decay = (-w * dt).exp();
        let x = (x0 + c2 * dt) * decay;
        self.speed = (c2 - (x0 + c2 * dt) * w) * decay;
        desired + x
    }
}

/// Distance travelled while a critically damped spring brings `vel` to rest.
///
/// Integrates `(A + B t) e^(-w t)` with `A = vel`, `B = accel + w vel` up to
/// the time the envelope has decayed to 1%.
pub fn approximate_stopping_distance(vel: f32, accel: f32, k: f32) -> f32 {
    if k <= 0.0 {
        return 0.0;
    }
    let w = k.sqrt();
    let a = vel;
    let b = accel + w * vel;
    let t_end = (100.0f32).ln() / w;
    let e = (-w * t_end).exp();

    // ∫(A + Bt)e^{-wt} = -(A + Bt)e^{-wt}/w - B e^{-wt}/w²
    let antiderivative = |t: f32, e_t: f32| -((a + b * t) * e_t) / w - b * e_t / (w * w);
    antiderivative(t_end, e) - antiderivative(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::Vec3;

    #[test]
    fn test_spring_converges() {
        let mut spring = SpringTracker::new(0.0f32);
        let mut x = 0.0;
        for _ in 0..300 {
            x = spring.track(x, 5.0, 1.0 / 30.0, 25.0);
        }
        assert!((x - 5.0).abs() < 0.01, "spring should settle at target, got {}", x);
    }

    #[test]
    fn test_spring_no_overshoot_from_rest() {
        let mut spring = SpringTracker::new(0.0f32);
        let mut x = 0.0f32;
        for _ in 0..200 {
            x = spring.track(x, 1.0, 1.0 / 60.0, 100.0);
            assert!(x <= 1.0 + 1e-4, "critically damped spring overshot: {}", x);
        }
    }

    #[test]
    fn test_spring_vector() {
        let mut spring = SpringTracker::new(Vec3::zeros());
        let mut v = Vec3::zeros();
        for _ in 0..120 {
            v = spring.track(v, Vec3::new(3.0, 0.0, 0.0), 1.0 / 30.0, 16.0);
        }
        assert!((v.x - 3.0).abs() < 0.05);
    }

    #[test]
    fn test_stopping_distance_matches_simulation() {
        let k = 16.0;
        let dt = 1.0 / 240.0;
        let mut spring = SpringTracker::new(0.0f32);
        let mut v = 4.0f32;
        let mut dist = 0.0f32;
        for _ in 0..2000 {
            v = spring.track(v, 0.0, dt, k);
            dist += v * dt;
        }
        let approx = approximate_stopping_distance(4.0, 0.0, k);
        assert!(
            (approx - dist).abs() / dist < 0.05,
            "approx {} vs simulated {}",
            approx,
            dist
        );
    }

    #[test]
    fn test_stopping_distance_zero_spring() {
        assert_eq!(approximate_stopping_distance(3.0, 0.0, 0.0), 0.0);
    }
}
