//! Points in the motion database and the candidates built from them.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::ids::ClipId;
use crate::math::Vec3;

/// One point in a clip: normalized phase, mirror flag and playback rate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct AnimationSample {
    pub clip: ClipId,
    /// 0..1 over the clip duration
    pub phase: f32,
    #[serde(default)]
    pub mirror: bool,
    #[serde(default = "default_rate")]
    pub rate: f32,
}

fn default_rate() -> f32 {
    1.0
}

impl AnimationSample {
    pub fn new(clip: impl Into<ClipId>, phase: f32) -> Self {
        Self {
            clip: clip.into(),
            phase,
            mirror: false,
            rate: 1.0,
        }
    }

    pub fn mirrored(mut self, mirror: bool) -> Self {
        self.mirror = mirror;
        self
    }

    /// Seconds into a clip of `duration`.
    pub fn phase_time(&self, duration: f32) -> f32 {
        self.phase * duration
    }

    /// Advances the phase by `dt` seconds of playback, wrapping looping clips.
    pub fn advanced(&self, dt: f32, duration: f32, looping: bool) -> Self {
        if duration <= 0.0 {
            return self.clone();
        }
        let mut phase = self.phase + dt * self.rate / duration;
        if looping {
            phase = phase.rem_euclid(1.0);
        } else {
            phase = phase.clamp(0.0, 1.0);
        }
        Self {
            phase,
            ..self.clone()
        }
    }

    /// Same clip and mirror, phase within `tolerance`.
    pub fn same_point(&self, other: &Self, tolerance: f32) -> bool {
        self.clip == other.clip && self.mirror == other.mirror && (self.phase - other.phase).abs() <= tolerance
    }
}

/// The clip the character is playing right now.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct PlayingClip {
    pub sample: AnimationSample,
    pub duration: f32,
    #[serde(default)]
    pub looping: bool,
}

impl PlayingClip {
    pub fn phase_time(&self) -> f32 {
        self.sample.phase_time(self.duration)
    }

    pub fn remaining_time(&self) -> f32 {
        if self.looping {
            f32::INFINITY
        } else {
            (self.duration - self.phase_time()).max(0.0)
        }
    }
}

/// A sample with the cost it was chosen at.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct MatchCandidate {
    pub sample: AnimationSample,
    pub cost: f32,
    /// Subtracted from the sample's distance before comparing
    #[serde(default)]
    pub cost_bias: f32,
}

impl MatchCandidate {
    pub fn biased(sample: AnimationSample, cost_bias: f32) -> Self {
        Self {
            sample,
            cost: 0.0,
            cost_bias,
        }
    }
}

/// One joint of the character's current pose, relative to its align.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct PoseJoint {
    pub joint: String,
    #[schemars(with = "[f32; 3]")]
    pub position: Vec3,
    #[schemars(with = "[f32; 3]")]
    pub velocity: Vec3,
}

/// The character's live pose, used to match from a clip outside the dataset.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize, JsonSchema)]
pub struct MotionPose {
    pub joints: Vec<PoseJoint>,
    #[schemars(with = "[f32; 3]")]
    pub facing: Vec3,
    /// Group the pose counts as when grouping weights apply
    #[serde(default)]
    pub group: i32,
}

impl MotionPose {
    pub fn joint(&self, name: &str) -> Option<&PoseJoint> {
        self.joints.iter().find(|j| j.joint == name)
    }

    pub fn has_joints<'a>(&self, mut names: impl Iterator<Item = &'a str>) -> bool {
        names.all(|n| self.joint(n).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_advance_wraps_looping() {
        let s = AnimationSample::new("walk", 0.9);
        let next = s.advanced(0.2, 1.0, true);
        assert!((next.phase - 0.1).abs() < 1e-5);

        let clamped = s.advanced(0.2, 1.0, false);
        assert_eq!(clamped.phase, 1.0);
    }

    #[test]
    fn test_same_point() {
        let a = AnimationSample::new("walk", 0.5);
        let b = AnimationSample::new("walk", 0.501);
        assert!(a.same_point(&b, 0.01));
        assert!(!a.same_point(&b.clone().mirrored(true), 0.01));
    }
}
