//! Debug sinks for per-tick controller output.

use crate::matcher::MatchSelection;
use crate::math::Locator;
use crate::procedural::Correction;
use crate::trajectory::Trajectory;

/// Receives what the controller computed each tick. Never needed for
/// correctness.
pub trait LocomotionObserver {
    fn on_trajectory(&mut self, _trajectory: &Trajectory, _reference: &Locator) {}
    fn on_match(&mut self, _selection: &MatchSelection) {}
    fn on_correction(&mut self, _correction: &Correction) {}
    fn on_terminated(&mut self, _reason: &str) {}
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NullObserver;

impl LocomotionObserver for NullObserver {}

/// Keeps everything it is shown.
#[derive(Debug, Clone, Default)]
pub struct RecordingObserver {
    pub trajectories: Vec<Trajectory>,
    pub matches: Vec<MatchSelection>,
    pub corrections: Vec<Correction>,
    pub terminated: Option<String>,
}

impl LocomotionObserver for RecordingObserver {
    fn on_trajectory(&mut self, trajectory: &Trajectory, _reference: &Locator) {
        self.trajectories.push(trajectory.clone());
    }

    fn on_match(&mut self, selection: &MatchSelection) {
        self.matches.push(selection.clone());
    }

    fn on_correction(&mut self, correction: &Correction) {
        self.corrections.push(*correction);
    }

    fn on_terminated(&mut self, reason: &str) {
        self.terminated = Some(reason.to_string());
    }
}
