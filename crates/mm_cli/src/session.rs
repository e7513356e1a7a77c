//! Scripted locomotion sessions.
//!
//! A script is a list of input phases. The simulated character follows the
//! corrected alignment the controller hands back and moves with the root
//! velocity of whatever clip it is playing.

use std::sync::{Arc, Mutex};

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use mm_core::controller::{
    CharacterFrame, CharacterHandle, LocomotionController, LocomotionInput, LocomotionStrategy, NullObserver,
    TickOutcome, TickOutput,
};
use mm_core::dataset::ClipId;
use mm_core::math::{facing_rotation, yaw_deg, Locator, Pos3, Vec3};
use mm_core::sample::{AnimationSample, PlayingClip};
use mm_core::{DatasetRegistry, LocomotionConfig, MatchBranch, MotionDataset};

#[derive(Debug, Clone, Deserialize)]
pub struct ScriptPhase {
    /// The phase applies while the session clock is below this (s)
    pub until: f32,
    #[serde(default)]
    pub input: LocomotionInput,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StartState {
    pub pos: Pos3,
    pub facing: Vec3,
    /// Clip playing when the session starts; the dataset's idle clip if unset
    pub clip: Option<String>,
}

impl Default for StartState {
    fn default() -> Self {
        Self {
            pos: Pos3::origin(),
            facing: Vec3::z(),
            clip: None,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Script {
    /// Config preset name; ignored when `config` is given
    pub preset: Option<String>,
    pub config: Option<LocomotionConfig>,
    pub start: StartState,
    pub phases: Vec<ScriptPhase>,
}

impl Script {
    pub fn from_yaml(text: &str) -> Result<Self> {
        let script: Self = serde_yaml::from_str(text).context("parsing session script")?;
        if script.phases.is_empty() {
            bail!("script has no phases");
        }
        Ok(script)
    }

    pub fn locomotion_config(&self) -> Result<LocomotionConfig> {
        let config = match (&self.config, &self.preset) {
            (Some(config), _) => config.clone(),
            (None, Some(name)) => {
                LocomotionConfig::preset(name).with_context(|| format!("unknown config preset '{name}'"))?
            }
            (None, None) => LocomotionConfig::default(),
        };
        config.check()?;
        Ok(config)
    }
}

/// Plays the script's phases back by session time.
pub struct ScriptedStrategy {
    phases: Vec<ScriptPhase>,
    time: f32,
}

impl ScriptedStrategy {
    pub fn new(phases: Vec<ScriptPhase>) -> Self {
        Self { phases, time: 0.0 }
    }

    pub fn set_time(&mut self, time: f32) {
        self.time = time;
    }

    fn phase(&self) -> Option<&ScriptPhase> {
        self.phases
            .iter()
            .find(|p| self.time < p.until)
            .or_else(|| self.phases.last())
    }
}

impl LocomotionStrategy for ScriptedStrategy {
    fn get_input(&mut self, input: &mut LocomotionInput) {
        if let Some(phase) = self.phase() {
            *input = phase.input.clone();
        }
    }
}

#[derive(Clone)]
struct SimCharacter(Arc<Mutex<CharacterFrame>>);

impl CharacterHandle for SimCharacter {
    fn resolve(&self) -> Option<CharacterFrame> {
        self.0.lock().ok().map(|frame| frame.clone())
    }
}

/// One JSON line of `simulate` output.
#[derive(Debug, Clone, Serialize)]
pub struct TickLine {
    pub tick: usize,
    pub time: f32,
    pub terminated: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub clip: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phase: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub branch: Option<MatchBranch>,
    pub pos: [f32; 3],
    pub yaw_deg: f32,
    pub playback_rate: f32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct SessionSummary {
    pub ticks: usize,
    pub selections: usize,
    pub terminated: bool,
    pub final_pos: [f32; 3],
}

pub struct Session {
    controller: LocomotionController,
    strategy: ScriptedStrategy,
    character: Arc<Mutex<CharacterFrame>>,
}

impl Session {
    pub fn new(registry: Arc<DatasetRegistry>, script: &Script) -> Result<Self> {
        let config = script.locomotion_config()?;
        let first_dataset = script
            .phases
            .first()
            .map(|p| p.input.dataset.clone())
            .context("script has no phases")?;
        let dataset = registry
            .dataset(&first_dataset)
            .with_context(|| format!("script starts on dataset '{first_dataset}'"))?;

        let start = &script.start;
        let mut frame = CharacterFrame::at(Locator::new(start.pos, facing_rotation(&start.facing)));
        let clip = start
            .clip
            .as_deref()
            .map(ClipId::from)
            .or_else(|| dataset.idle_clip().cloned());
        frame.playing = clip.and_then(|id| {
            let info = dataset.clip(&id)?;
            Some(PlayingClip {
                sample: AnimationSample::new(id.clone(), 0.0),
                duration: info.duration,
                looping: info.looping,
            })
        });

        let character = Arc::new(Mutex::new(frame));
        let controller = LocomotionController::new(registry, Box::new(SimCharacter(character.clone())), config)?;
        Ok(Self {
            controller,
            strategy: ScriptedStrategy::new(script.phases.clone()),
            character,
        })
    }

    pub fn run(&mut self, ticks: usize, dt: f32, mut emit: impl FnMut(&TickLine) -> Result<()>) -> Result<SessionSummary> {
        let mut summary = SessionSummary::default();
        for tick in 0..ticks {
            let now = tick as f32 * dt;
            self.strategy.set_time(now);
            let outcome = self
                .controller
                .tick(dt, now, &mut self.strategy, &mut NullObserver)
                .with_context(|| format!("tick {tick} at {now:.3}s"))?;
            summary.ticks += 1;

            let line = match &outcome {
                TickOutcome::Output(out) => {
                    if out.selected.is_some() {
                        summary.selections += 1;
                    }
                    self.advance_character(out, dt)?;
                    tick_line(tick, now, out)
                }
                TickOutcome::Terminated => {
                    summary.terminated = true;
                    TickLine {
                        tick,
                        time: now,
                        terminated: true,
                        clip: None,
                        phase: None,
                        branch: None,
                        pos: summary.final_pos,
                        yaw_deg: 0.0,
                        playback_rate: 0.0,
                    }
                }
            };
            summary.final_pos = line.pos;
            emit(&line)?;
            if summary.terminated {
                break;
            }
        }
        info!(
            ticks = summary.ticks,
            selections = summary.selections,
            terminated = summary.terminated,
            "session finished"
        );
        Ok(summary)
    }

    /// Applies the tick's output and plays the character's clip forward by `dt`.
    fn advance_character(&self, out: &TickOutput, dt: f32) -> Result<()> {
        let dataset = self.controller.dataset().cloned();
        let mut frame = self
            .character
            .lock()
            .map_err(|_| anyhow::anyhow!("character state poisoned"))?;

        if let (Some(sel), Some(ds)) = (&out.selected, &dataset) {
            if let Some(info) = ds.clip(&sel.sample.clip) {
                debug!(clip = %sel.sample.clip, phase = sel.sample.phase, "character switches clip");
                frame.playing = Some(PlayingClip {
                    sample: sel.sample.clone(),
                    duration: info.duration,
                    looping: info.looping,
                });
            }
        }

        let step = dt * out.playback_rate;
        let local_velocity = match (&frame.playing, &dataset) {
            (Some(playing), Some(ds)) => root_velocity(ds, &playing.sample),
            _ => Vec3::zeros(),
        };
        let velocity = out.align.rot * local_velocity * out.playback_rate;

        frame.align = out.align;
        frame.align.pos += velocity * dt;
        frame.velocity = velocity;
        if let Some(playing) = frame.playing.as_mut() {
            playing.sample = playing.sample.advanced(step, playing.duration, playing.looping);
        }
        Ok(())
    }
}

/// Root velocity of a clip at `sample`, relative to the clip's own align.
fn root_velocity(dataset: &MotionDataset, sample: &AnimationSample) -> Vec3 {
    dataset
        .entry_for_sample(sample)
        .and_then(|entry| dataset.entry_trajectory(entry, sample.mirror))
        .and_then(|traj| traj.sample_at(0.0))
        .map_or_else(Vec3::zeros, |s| s.velocity)
}

fn tick_line(tick: usize, time: f32, out: &TickOutput) -> TickLine {
    let pos = out.align.pos;
    TickLine {
        tick,
        time,
        terminated: false,
        clip: out.selected.as_ref().map(|s| s.sample.clip.to_string()),
        phase: out.selected.as_ref().map(|s| s.sample.phase),
        branch: out.selected.as_ref().map(|s| s.branch),
        pos: [pos.x, pos.y, pos.z],
        yaw_deg: yaw_deg(&out.align.facing()),
        playback_rate: out.playback_rate,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mm_core::dataset::testing::{locomotion_dataset, SyntheticOptions};

    const WALK_RUN: &str = include_str!("../scripts/walk_run.yaml");

    fn registry() -> Arc<DatasetRegistry> {
        let walk = locomotion_dataset(&SyntheticOptions {
            id: "walk".into(),
            ..Default::default()
        });
        let run = locomotion_dataset(&SyntheticOptions {
            id: "run".into(),
            ..Default::default()
        });
        Arc::new(
            DatasetRegistry::new()
                .with_dataset(walk)
                .unwrap()
                .with_dataset(run)
                .unwrap(),
        )
    }

    #[test]
    fn test_bundled_script_parses() {
        let script = Script::from_yaml(WALK_RUN).unwrap();
        assert_eq!(script.phases.len(), 3);
        assert_eq!(script.phases[0].input.dataset.as_str(), "walk");
        assert!(script.locomotion_config().is_ok());
    }

    #[test]
    fn test_empty_script_rejected() {
        assert!(Script::from_yaml("phases: []\n").is_err());
    }

    #[test]
    fn test_unknown_preset_rejected() {
        let script = Script::from_yaml("preset: arcade\nphases:\n  - until: 1.0\n").unwrap();
        assert!(script.locomotion_config().is_err());
    }

    #[test]
    fn test_scripted_strategy_follows_phases() {
        let script = Script::from_yaml(WALK_RUN).unwrap();
        let mut strategy = ScriptedStrategy::new(script.phases.clone());
        let mut input = LocomotionInput::default();

        strategy.set_time(0.0);
        strategy.get_input(&mut input);
        assert_eq!(input.dataset.as_str(), "walk");

        strategy.set_time(1e6);
        strategy.get_input(&mut input);
        assert_eq!(input, script.phases[2].input);
    }

    #[test]
    fn test_session_walks_forward() {
        let script = Script::from_yaml(WALK_RUN).unwrap();
        let mut session = Session::new(registry(), &script).unwrap();
        let mut lines = Vec::new();
        let summary = session
            .run(60, 1.0 / 30.0, |line| {
                lines.push(line.clone());
                Ok(())
            })
            .unwrap();
        assert_eq!(summary.ticks, 60);
        assert!(!summary.terminated);
        assert!(summary.selections > 0);
        assert!(summary.final_pos[2] > 0.5, "{:?}", summary.final_pos);
        assert_eq!(lines.len(), 60);
    }

    #[test]
    fn test_session_on_missing_dataset_fails() {
        let script = Script::from_yaml("phases:\n  - until: 1.0\n    input: { dataset: swim }\n").unwrap();
        assert!(Session::new(registry(), &script).is_err());
    }
}
