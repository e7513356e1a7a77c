//! Per-character locomotion controller.
//!
//! One tick:
//! 1. resolve the character; a vanished character terminates the controller
//! 2. read input from the strategy and switch datasets if asked
//! 3. step the motion model with the blended motion settings
//! 4. build the trajectory and run the matcher
//! 5. correct the clip's alignment toward the model and record history
//!
//! Resource errors (missing dataset, missing joints) terminate the
//! controller and are returned to the caller. Search misses are "no change".

pub mod input;
pub mod observer;
pub mod strategy;

pub use input::{FootPlantParams, LocomotionInput, TickOutcome, TickOutput};
pub use observer::{LocomotionObserver, NullObserver, RecordingObserver};
pub use strategy::LocomotionStrategy;

use std::sync::Arc;

use tracing::{error, info, trace, warn};

use crate::config::LocomotionConfig;
use crate::dataset::{DatasetRegistry, MotionDataset};
use crate::error::Result;
use crate::history::{LocomotionHistory, LocomotionState};
use crate::matcher::{MatchRequest, MatchSelection, Matcher};
use crate::math::{Locator, Pos3, Vec3};
use crate::motion_model::MotionModel;
use crate::procedural::{
    blocked_overshoot, clamp_to_radius, look_ahead_time, shrink_clamp_for_block, ProceduralContext,
    ProceduralCorrector,
};
use crate::sample::{AnimationSample, PlayingClip};
use crate::settings::{BlendPair, MotionSettings, SettingsBlendQueue};
use crate::trajectory::{build_trajectory, Trajectory, TrajectoryLayout};
use crate::transition::{settings_blend_time, transition_blend};

/// The character as seen this tick.
#[derive(Debug, Clone, PartialEq)]
pub struct CharacterFrame {
    /// World alignment after the clip's root motion
    pub align: Locator,
    /// World locator of whatever the character stands on
    pub parent: Locator,
    /// Changes when the character moves onto a different parent
    pub parent_id: u64,
    /// World velocity
    pub velocity: Vec3,
    pub playing: Option<PlayingClip>,
    pub paused: bool,
    /// Where collision left the character after the previous output, if it
    /// was pushed back
    pub collision_pos: Option<Pos3>,
}

impl CharacterFrame {
    pub fn at(align: Locator) -> Self {
        Self {
            align,
            parent: Locator::identity(),
            parent_id: 0,
            velocity: Vec3::zeros(),
            playing: None,
            paused: false,
            collision_pos: None,
        }
    }
}

/// Non-owning handle to the character, resolved fresh every tick.
pub trait CharacterHandle: Send {
    /// `None` once the character is gone.
    fn resolve(&self) -> Option<CharacterFrame>;

    fn has_joint(&self, _name: &str) -> bool {
        true
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerState {
    Running,
    Terminated,
}

pub struct LocomotionController {
    registry: Arc<DatasetRegistry>,
    character: Box<dyn CharacterHandle>,
    config: LocomotionConfig,
    state: ControllerState,
    input: LocomotionInput,
    dataset: Option<Arc<MotionDataset>>,
    pending_blend: Option<BlendPair>,
    model: MotionModel,
    history: LocomotionHistory,
    blend_queue: SettingsBlendQueue,
    settings: MotionSettings,
    matcher: Matcher,
    corrector: ProceduralCorrector,
    parent: Option<(u64, Locator)>,
    last_align: Option<Locator>,
}

impl LocomotionController {
    pub fn new(
        registry: Arc<DatasetRegistry>,
        character: Box<dyn CharacterHandle>,
        config: LocomotionConfig,
    ) -> Result<Self> {
        config.check()?;
        let settings = MotionSettings::default().resolved();
        Ok(Self {
            registry,
            character,
            state: ControllerState::Running,
            input: LocomotionInput::default(),
            dataset: None,
            pending_blend: None,
            model: MotionModel::new(Pos3::origin(), Vec3::z(), Vec3::zeros(), &settings),
            history: LocomotionHistory::with_capacity(config.history_capacity),
            blend_queue: SettingsBlendQueue::new(),
            settings,
            matcher: Matcher::new(config.always_evaluate, config.parallel_threshold),
            corrector: ProceduralCorrector::new(config.correction.clone()),
            parent: None,
            last_align: None,
            config,
        })
    }

    pub fn state(&self) -> ControllerState {
        self.state
    }

    pub fn dataset(&self) -> Option<&Arc<MotionDataset>> {
        self.dataset.as_ref()
    }

    pub fn model(&self) -> &MotionModel {
        &self.model
    }

    pub fn history(&self) -> &LocomotionHistory {
        &self.history
    }

    pub fn blend_queue(&self) -> &SettingsBlendQueue {
        &self.blend_queue
    }

    /// Where the model would stop if input ceased now (parent space).
    pub fn approximate_stopping_position(&self) -> Pos3 {
        self.model.approximate_stopping_position(&self.settings)
    }

    /// Avoidance radius for navigation, narrowed while threading a path.
    pub fn nav_avoidance_radius(&self, radius: f32) -> f32 {
        self.model.nav_adjust_radius(radius)
    }

    fn terminate(&mut self, reason: &str, observer: &mut dyn LocomotionObserver) {
        self.state = ControllerState::Terminated;
        self.blend_queue.clear();
        self.history.clear();
        self.matcher.reset();
        self.corrector.reset();
        self.dataset = None;
        self.pending_blend = None;
        observer.on_terminated(reason);
    }

    pub fn tick(
        &mut self,
        dt: f32,
        now: f32,
        strategy: &mut dyn LocomotionStrategy,
        observer: &mut dyn LocomotionObserver,
    ) -> Result<TickOutcome> {
        if self.state == ControllerState::Terminated {
            return Ok(TickOutcome::Terminated);
        }
        let Some(frame) = self.character.resolve() else {
            info!("character gone, stopping locomotion");
            self.terminate("character gone", observer);
            return Ok(TickOutcome::Terminated);
        };

        match self.run(dt, now, &frame, strategy, observer) {
            Ok(output) => Ok(TickOutcome::Output(output)),
            Err(e) if e.is_fatal() => {
                error!(error = %e, "aborting locomotion");
                self.terminate(&e.to_string(), observer);
                Err(e)
            }
            Err(e) => {
                warn!(error = %e, "locomotion tick skipped");
                Err(e)
            }
        }
    }

    fn run(
        &mut self,
        dt: f32,
        now: f32,
        frame: &CharacterFrame,
        strategy: &mut dyn LocomotionStrategy,
        observer: &mut dyn LocomotionObserver,
    ) -> Result<TickOutput> {
        let mut input = self.input.clone();
        strategy.get_input(&mut input);
        self.input = input;

        self.follow_parent(frame);
        let local_align = frame.parent.untransform_locator(&frame.align);
        let local_velocity = frame.parent.untransform_vector(&frame.velocity);

        let dataset = self.switch_dataset(&local_align, &local_velocity, now)?;
        let matching = dataset.settings();

        self.blend_queue.update(now);
        self.settings = self.blend_queue.get(now);

        if let (Some(actual), Some(last)) = (frame.collision_pos, self.last_align) {
            let actual = frame.parent.untransform_point(&actual);
            if let Some(overshoot) =
                blocked_overshoot(&last.pos, &actual, &self.model.pos(), self.model.procedural_clamp_dist())
            {
                shrink_clamp_for_block(&mut self.model, overshoot, &matching.procedural, dt);
            }
        }

        let model_input = self.input.model_input();
        if !frame.paused {
            self.model.step(&model_input, Some(&self.settings), dt)?;
        }

        let layout = TrajectoryLayout::from_goals(&matching.goals, matching.procedural.rotation_time);
        let trajectory = build_trajectory(
            &self.model,
            &model_input,
            &self.settings,
            &self.history,
            now,
            &layout,
            &local_align,
            |t, state| strategy.future_direction(t, state),
        )?;
        observer.on_trajectory(&trajectory, &local_align);

        let selected = if frame.paused {
            None
        } else {
            let selected = self.select(&dataset, &trajectory, frame, now, strategy);
            // Forcing lasts one evaluated tick.
            self.input.force_change = false;
            self.input.force_external_pose = false;
            selected
        };
        if let Some(sel) = &selected {
            observer.on_match(sel);
        }

        let clip = match &selected {
            Some(sel) => self.playing_from_selection(&dataset, sel),
            None => frame.playing.clone(),
        };
        let anim_trajectory = clip.as_ref().and_then(|c| clip_trajectory(&dataset, &c.sample, strategy));
        let remaining = clip.as_ref().map_or(f32::INFINITY, PlayingClip::remaining_time);
        let look_ahead = strategy.limit_look_ahead(look_ahead_time(layout.horizon, &matching.procedural, remaining));

        let ctx = ProceduralContext {
            dt,
            anim_align: local_align,
            anim_trajectory: anim_trajectory.as_ref(),
            desired_trajectory: &trajectory,
            reference: local_align,
            model_pos: self.model.pos(),
            model_speed: self.model.velocity().norm(),
            model_max_speed: self.model.max_speed(),
            clamp_dist: self.model.procedural_clamp_dist(),
            user_facing: self.input.desired_facing,
            supports_strafe: matching.supports_strafe,
            look_ahead,
        };
        let correction = self.corrector.correct(&ctx, &matching.procedural);
        let mut align = strategy.apply_procedural_motion(&ctx, correction.align);
        align.pos = clamp_to_radius(
            align.pos,
            self.model.pos(),
            self.model.procedural_clamp_dist() + self.config.correction.max_overshoot,
        );
        observer.on_correction(&correction);

        if !frame.paused {
            self.history.record(LocomotionState {
                align,
                velocity: local_velocity,
                yaw_speed: self.model.yaw_speed(),
                time: now,
            });
        }
        self.last_align = Some(align);

        let mut foot_plant = FootPlantParams {
            ground_normal: self.input.ground_normal,
            ik_weight: self.input.leg_ik_factor,
            ..FootPlantParams::default()
        };
        strategy.fill_foot_plant_params(&mut foot_plant);

        trace!(pos = ?align.pos, rate = correction.playback_rate, "tick done");
        Ok(TickOutput {
            selected,
            align: frame.parent.transform_locator(&align),
            playback_rate: correction.playback_rate,
            ground_adjust_factor: matching.ground_adjust_factor * self.input.ground_adjust_factor,
            leg_ik_factor: self.input.leg_ik_factor,
            foot_plant,
        })
    }

    /// Re-expresses model and history when the character changes parent.
    fn follow_parent(&mut self, frame: &CharacterFrame) {
        match self.parent {
            Some((id, old)) if id != frame.parent_id => {
                trace!(from = id, to = frame.parent_id, "reparenting");
                self.model.reparent(&old, &frame.parent);
                self.history.reparent(&old, &frame.parent);
                if let Some(last) = self.last_align {
                    self.last_align = Some(last.reparent(&old, &frame.parent));
                }
            }
            _ => {}
        }
        self.parent = Some((frame.parent_id, frame.parent));
    }

    fn switch_dataset(&mut self, local_align: &Locator, local_velocity: &Vec3, now: f32) -> Result<Arc<MotionDataset>> {
        if let Some(current) = &self.dataset {
            if current.id() == &self.input.dataset {
                return Ok(current.clone());
            }
        }

        let next = self.registry.dataset(&self.input.dataset)?;
        let character = &self.character;
        next.check_required_joints(|joint| character.has_joint(joint))?;

        match self.dataset.take() {
            None => {
                info!(dataset = %next.id(), "locomotion attached");
                self.blend_queue.clear();
                self.blend_queue
                    .push(Arc::new(next.settings().motion.clone()), now, 0.0);
                self.model.reset(local_align.pos, local_align.facing(), *local_velocity);
                self.history.clear();
            }
            Some(prev) => {
                let table = match &self.input.transitions {
                    Some(id) => match self.registry.transition_table(id) {
                        Ok(table) => Some(table),
                        Err(e) => {
                            warn!(error = %e, "using default blend");
                            None
                        }
                    },
                    None => None,
                };
                let blend = transition_blend(table.as_deref(), prev.id(), next.id(), next.settings());
                let blend_time = settings_blend_time(prev.settings(), next.settings(), &blend);
                info!(
                    from = %prev.id(),
                    to = %next.id(),
                    blend_time,
                    "locomotion dataset changed"
                );
                self.blend_queue
                    .push(Arc::new(next.settings().motion.clone()), now, blend_time);
                self.pending_blend = Some(blend);
            }
        }
        self.dataset = Some(next.clone());
        Ok(next)
    }

    fn select(
        &mut self,
        dataset: &MotionDataset,
        trajectory: &Trajectory,
        frame: &CharacterFrame,
        now: f32,
        strategy: &dyn LocomotionStrategy,
    ) -> Option<MatchSelection> {
        let pose = strategy.current_pose();
        let extra = strategy.extra_sample();
        let current_trajectory = frame
            .playing
            .as_ref()
            .filter(|p| !dataset.is_in_set(&p.sample).0)
            .and_then(|p| strategy.clip_trajectory(&p.sample));

        let req = MatchRequest {
            dataset,
            trajectory,
            current: frame.playing.as_ref(),
            pose: pose.as_ref(),
            current_trajectory: current_trajectory.as_ref(),
            extra_sample: extra.as_ref(),
            layers: &self.input.layers,
            mirror_mode: self.input.mirror_mode,
            group: self.input.group,
            transition_interval: self.input.transition_interval,
            force_change: self.input.force_change,
            force_external_pose: self.input.force_external_pose,
            now,
        };
        let mut selection = self.matcher.evaluate(&req)?;
        if let Some(blend) = self.pending_blend.take() {
            selection.blend = blend;
        }
        Some(selection)
    }

    fn playing_from_selection(&self, dataset: &MotionDataset, sel: &MatchSelection) -> Option<PlayingClip> {
        let clip = dataset.clip(&sel.sample.clip)?;
        Some(PlayingClip {
            sample: sel.sample.clone(),
            duration: clip.duration,
            looping: clip.looping,
        })
    }
}

/// The clip's own path: decoded from the dataset when it has the clip,
/// otherwise whatever the strategy knows.
fn clip_trajectory(
    dataset: &MotionDataset,
    sample: &AnimationSample,
    strategy: &dyn LocomotionStrategy,
) -> Option<Trajectory> {
    match dataset.entry_for_sample(sample) {
        Some(entry) if dataset.is_in_set(sample).0 => dataset.entry_trajectory(entry, sample.mirror),
        _ => strategy.clip_trajectory(sample),
    }
}
