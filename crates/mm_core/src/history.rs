//! Ring buffer of recent locomotion states, kept in the character's parent space.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::math::{Locator, Vec3};

pub const DEFAULT_HISTORY_CAPACITY: usize = 64;

/// One recorded tick.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LocomotionState {
    pub align: Locator,
    pub velocity: Vec3,
    pub yaw_speed: f32,
    pub time: f32,
}

#[derive(Debug, Clone)]
pub struct LocomotionHistory {
    states: VecDeque<LocomotionState>,
    capacity: usize,
}

impl Default for LocomotionHistory {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_HISTORY_CAPACITY)
    }
}

impl LocomotionHistory {
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(2);
        Self {
            states: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.states.clear();
    }

    pub fn latest(&self) -> Option<&LocomotionState> {
        self.states.back()
    }

    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &LocomotionState> {
        self.states.iter()
    }

    /// Appends a state, dropping the oldest when full.
    pub fn record(&mut self, state: LocomotionState) {
        if self.states.len() >= self.capacity {
            self.states.pop_front();
        }
        self.states.push_back(state);
    }

    /// Re-expresses every entry after the parent frame changed from `old` to `new`.
    pub fn reparent(&mut self, old: &Locator, new: &Locator) {
        for state in self.states.iter_mut() {
            state.align = state.align.reparent(old, new);
            let world_vel = old.transform_vector(&state.velocity);
            state.velocity = new.untransform_vector(&world_vel);
        }
    }

    /// Δv/Δt between the two newest entries with distinct times.
    pub fn acceleration(&self) -> Vec3 {
        let mut newest = self.states.iter().rev();
        let Some(last) = newest.next() else {
            return Vec3::zeros();
        };
        for prev in newest {
            let dt = last.time - prev.time;
            if dt > f32::EPSILON {
                return (last.velocity - prev.velocity) / dt;
            }
        }
        Vec3::zeros()
    }

    /// Interpolated state at absolute `time`.
    ///
    /// Returns `None` when the history does not reach back that far.
    pub fn sample_at(&self, time: f32) -> Option<LocomotionState> {
        let oldest = self.states.front()?;
        let newest = self.states.back()?;
        if time < oldest.time || time > newest.time {
            return None;
        }

        let idx = self.states.partition_point(|s| s.time < time);
        let after = self.states.get(idx)?;
        if idx == 0 || after.time <= time {
            return Some(*after);
        }
        let before = &self.states[idx - 1];
        let span = after.time - before.time;
        let t = if span > f32::EPSILON {
            (time - before.time) / span
        } else {
            1.0
        };
        Some(LocomotionState {
            align: before.align.lerp(&after.align, t),
            velocity: before.velocity.lerp(&after.velocity, t),
            yaw_speed: before.yaw_speed + (after.yaw_speed - before.yaw_speed) * t,
            time,
        })
    }
}
