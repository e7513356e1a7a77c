//! Per-tick clip selection with hysteresis.
//!
//! The matcher keeps the playing clip unless something in the dataset beats
//! it by more than the continuation bias. Two routes lead to a search:
//!
//! - **Continuation**: the playing sample is part of the active dataset, so
//!   its own feature row supplies the pose half of the query.
//! - **External pose**: the playing clip is foreign (a one-shot, another
//!   dataset) and the character's live joints supply the pose instead.
//!
//! Anything else is "no change" and the caller keeps what it has.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::dataset::{ClosestEntry, LayerId, MirrorMode, MotionDataset, SearchParams};
use crate::sample::{AnimationSample, MatchCandidate, MotionPose, PlayingClip};
use crate::settings::BlendPair;
use crate::trajectory::Trajectory;

/// Which route produced a selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum MatchBranch {
    Continuation,
    ExternalPose,
    Fallback,
}

/// A newly selected clip and how to blend into it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct MatchSelection {
    pub sample: AnimationSample,
    pub blend: BlendPair,
    pub cost: f32,
    pub branch: MatchBranch,
}

/// Everything one evaluation looks at.
#[derive(Debug, Clone, Copy)]
pub struct MatchRequest<'a> {
    pub dataset: &'a MotionDataset,
    pub trajectory: &'a Trajectory,
    pub current: Option<&'a PlayingClip>,
    /// Live pose, needed when the current clip is not in the dataset
    pub pose: Option<&'a MotionPose>,
    /// Natural trajectory of a current clip that is not in the dataset
    pub current_trajectory: Option<&'a Trajectory>,
    pub extra_sample: Option<&'a MatchCandidate>,
    pub layers: &'a [(LayerId, f32)],
    pub mirror_mode: MirrorMode,
    pub group: i32,
    /// Caller's minimum interval; the dataset's applies when larger
    pub transition_interval: f32,
    /// Bypasses the interval gate and, when matching from a pose, forces a switch
    pub force_change: bool,
    /// Matches from `pose` even when the current clip is in the dataset
    pub force_external_pose: bool,
    pub now: f32,
}

impl<'a> MatchRequest<'a> {
    pub fn new(dataset: &'a MotionDataset, trajectory: &'a Trajectory, now: f32) -> Self {
        Self {
            dataset,
            trajectory,
            current: None,
            pose: None,
            current_trajectory: None,
            extra_sample: None,
            layers: &[],
            mirror_mode: MirrorMode::None,
            group: 0,
            transition_interval: 0.0,
            force_change: false,
            force_external_pose: false,
            now,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Matcher {
    last_match_time: Option<f32>,
    always_evaluate: bool,
    parallel_threshold: usize,
}

impl Default for Matcher {
    fn default() -> Self {
        Self::new(false, usize::MAX)
    }
}

impl Matcher {
    pub fn new(always_evaluate: bool, parallel_threshold: usize) -> Self {
        Self {
            last_match_time: None,
            always_evaluate,
            parallel_threshold,
        }
    }

    /// Time of the last accepted selection.
    pub fn last_match_time(&self) -> Option<f32> {
        self.last_match_time
    }

    pub fn reset(&mut self) {
        self.last_match_time = None;
    }

    fn interval(req: &MatchRequest<'_>) -> f32 {
        req.dataset
            .settings()
            .transition_interval_sec
            .max(req.transition_interval)
    }

    fn gate_open(&self, req: &MatchRequest<'_>) -> bool {
        if self.always_evaluate || req.force_change {
            return true;
        }
        match self.last_match_time {
            Some(last) => req.now - last >= Self::interval(req),
            None => true,
        }
    }

    /// Returns a new selection, or `None` to keep playing the current clip.
    pub fn evaluate(&mut self, req: &MatchRequest<'_>) -> Option<MatchSelection> {
        if !self.gate_open(req) {
            trace!(now = req.now, "match gated");
            return None;
        }

        let in_set = req
            .current
            .map_or((false, false), |c| req.dataset.is_in_set(&c.sample));

        let selection = if in_set.0 && !req.force_external_pose {
            self.continuation(req, in_set.1)
        } else if let Some(pose) = req.pose.filter(|p| p.has_joints(req.dataset.required_joints())) {
            self.external(req, pose)
        } else {
            trace!("no match branch applies");
            None
        };

        if let Some(sel) = &selection {
            // Accepted matches never move the clock backwards.
            let now = self.last_match_time.map_or(req.now, |last| last.max(req.now));
            self.last_match_time = Some(now);
            debug!(
                clip = %sel.sample.clip,
                phase = sel.sample.phase,
                mirror = sel.sample.mirror,
                cost = sel.cost,
                branch = ?sel.branch,
                "accepted match"
            );
        }
        selection
    }

    fn search_params<'r>(&self, req: &MatchRequest<'r>) -> SearchParams<'r> {
        SearchParams {
            layers: req.layers,
            mirror_mode: req.mirror_mode,
            parallel_threshold: self.parallel_threshold,
        }
    }

    fn continuation(&self, req: &MatchRequest<'_>, next_in_set: bool) -> Option<MatchSelection> {
        let dataset = req.dataset;
        let current = req.current?;
        let entry = dataset.entry_for_sample(&current.sample)?;
        let mirror = current.sample.mirror;
        let natural_bias = if next_in_set {
            dataset.settings().natural_bias
        } else {
            0.0
        };

        let query = dataset.query_from_existing(entry, mirror, req.trajectory, req.group);
        let scales = dataset.scales(&query.filter);
        let mut closest = dataset.find_closest(&query, &scales, &self.search_params(req));

        let layer_costs = dataset.layer_costs(req.layers);
        let layer_cost = dataset.entry(entry).and_then(|meta| layer_costs[meta.layer]);
        let mirror_matches = closest.map_or(true, |c| c.mirror == mirror);
        if let (Some(layer_cost), true) = (layer_cost, mirror_matches) {
            let row = if mirror {
                dataset.mirror_vector(dataset.features(entry))
            } else {
                dataset.features(entry).to_vec()
            };
            let natural = dataset.distance(&row, &query.vector, &scales) - natural_bias + layer_cost;
            trace!(natural, best = ?closest.map(|c| c.cost), "continuation cost");
            if closest.map_or(true, |c| natural <= c.cost) {
                closest = Some(ClosestEntry {
                    index: entry,
                    cost: natural,
                    mirror,
                    cost_bias: natural_bias,
                });
            }
        }

        let closest = dataset.consider_extra_sample(req.extra_sample, closest, &query, &scales)?;
        if closest.index == entry && closest.mirror == mirror {
            return None;
        }
        self.selection(dataset, closest, MatchBranch::Continuation)
    }

    fn external(&self, req: &MatchRequest<'_>, pose: &MotionPose) -> Option<MatchSelection> {
        let dataset = req.dataset;
        let settings = dataset.settings();

        let force_change = req.force_change
            || match req.current {
                None => true,
                Some(c) => !c.looping && c.phase_time() + settings.min_blend_time >= c.duration,
            };

        let query = dataset.query_from_pose(pose, req.trajectory, 0.0);
        let scales = dataset.scales(&query.filter);
        let found = dataset.find_closest(&query, &scales, &self.search_params(req));
        let found = dataset.consider_extra_sample(req.extra_sample, found, &query, &scales);

        let continue_cost = match (req.current, req.current_trajectory) {
            (Some(c), Some(clip_traj)) if settings.allow_external_transitions && !c.looping => {
                dataset.goal_cost_of_trajectory(clip_traj, req.trajectory, false, pose.group)
            }
            _ => f32::INFINITY,
        };
        let found_cost = found.map_or(f32::INFINITY, |c| dataset.goal_cost(c.index, c.mirror, req.trajectory));
        trace!(continue_cost, found_cost, force_change, "external pose costs");

        if continue_cost < found_cost && !force_change {
            return None;
        }

        let mut result = found.and_then(|c| {
            let sel = self.selection(dataset, c, MatchBranch::ExternalPose)?;
            Some((sel, found_cost))
        });

        if force_change {
            for fallback in dataset.fallbacks() {
                let sample = AnimationSample::new(fallback.clip.clone(), 0.0);
                let cost = dataset
                    .entry_for_sample(&sample)
                    .map_or(f32::INFINITY, |e| dataset.goal_cost(e, false, req.trajectory));
                let result_cost = result.as_ref().map_or(f32::INFINITY, |(_, c)| *c);
                if cost < result_cost + fallback.cost_bias {
                    result = Some((
                        MatchSelection {
                            sample,
                            blend: settings.blend,
                            cost,
                            branch: MatchBranch::Fallback,
                        },
                        cost,
                    ));
                }
            }
        }

        let (sel, _) = result?;
        if let Some(current) = req.current {
            if current.sample.same_point(&sel.sample, 0.0) {
                return None;
            }
        }
        Some(sel)
    }

    fn selection(&self, dataset: &MotionDataset, closest: ClosestEntry, branch: MatchBranch) -> Option<MatchSelection> {
        let sample = dataset.sample_from_entry(closest.index, closest.mirror)?;
        Some(MatchSelection {
            sample,
            blend: dataset.settings().blend,
            cost: closest.cost,
            branch,
        })
    }
}
