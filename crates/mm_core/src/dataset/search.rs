//! Brute-force nearest-neighbour search over a dataset's feature rows.

use rayon::prelude::*;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tracing::trace;

use super::{
    encode_goal_sample, weighted_distance, MotionDataset, EXTRA_BIAS, EXTRA_GROUP, GOAL_SAMPLE_DIMS, POSE_BODY_DIMS,
};
use crate::ids::{LayerId, DEFAULT_LAYER};
use crate::sample::{MatchCandidate, MotionPose};
use crate::trajectory::Trajectory;

/// Rows handed to one rayon task at minimum.
const PARALLEL_MIN_CHUNK: usize = 256;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum MirrorMode {
    #[default]
    None,
    /// Search both, keep the cheaper
    Allow,
    /// Only mirrored results
    Forced,
}

#[derive(Debug, Clone, Copy)]
pub struct SearchParams<'a> {
    /// Extra active layers and their cost modifiers
    pub layers: &'a [(LayerId, f32)],
    pub mirror_mode: MirrorMode,
    /// Datasets with more rows than this are searched in parallel
    pub parallel_threshold: usize,
}

impl Default for SearchParams<'_> {
    fn default() -> Self {
        Self {
            layers: &[],
            mirror_mode: MirrorMode::None,
            parallel_threshold: usize::MAX,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClosestEntry {
    pub index: usize,
    pub cost: f32,
    pub mirror: bool,
    pub cost_bias: f32,
}

impl ClosestEntry {
    fn better_than(&self, other: &Self) -> bool {
        self.cost < other.cost || (self.cost == other.cost && self.index < other.index)
    }
}

/// A query row and its goal filter (0 where the trajectory had no data).
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub vector: Vec<f32>,
    pub filter: Vec<f32>,
}

impl Query {
    fn zeroed(dims: usize) -> Self {
        Self {
            vector: vec![0.0; dims],
            filter: vec![1.0; dims],
        }
    }
}

impl MotionDataset {
    /// Cost modifier per dataset layer; `None` for inactive layers.
    pub fn layer_costs(&self, active: &[(LayerId, f32)]) -> Vec<Option<f32>> {
        let mut costs: Vec<Option<f32>> = vec![None; self.layers().len()];
        for (i, layer) in self.layers().iter().enumerate() {
            if layer.as_str() == DEFAULT_LAYER {
                costs[i] = Some(0.0);
            }
        }
        for (layer, modifier) in active {
            if layer.as_str() == DEFAULT_LAYER {
                continue;
            }
            if let Some(i) = self.layers().iter().position(|l| l == layer) {
                *costs[i].get_or_insert(0.0) += modifier;
            }
        }
        costs
    }

    /// Writes the goal section for `trajectory`, zeroing the filter where it
    /// has no sample.
    pub fn encode_trajectory(&self, trajectory: &Trajectory, query: &mut Query) {
        let goals = &self.settings().goals;
        let layout = *self.layout();
        let sections = [
            (layout.goal_offset(), layout.num_samples, goals.max_sample_time),
            (layout.history_offset(), layout.num_prev_samples, -goals.max_prev_sample_time),
        ];
        for (offset, count, max_time) in sections {
            for i in 0..count {
                let at = offset + i * GOAL_SAMPLE_DIMS;
                let slot = at..at + GOAL_SAMPLE_DIMS;
                let t = max_time * (i + 1) as f32 / count as f32;
                match trajectory.sample_at(t) {
                    Some(s) => {
                        encode_goal_sample(&s, &mut query.vector[slot.clone()]);
                        query.filter[slot].fill(1.0);
                        if i + 1 != count {
                            query.vector[at + 9] = 0.0;
                            query.filter[at + 9] = 0.0;
                        }
                    }
                    None => {
                        query.vector[slot.clone()].fill(0.0);
                        query.filter[slot].fill(0.0);
                    }
                }
            }
        }
    }

    fn set_extras(&self, query: &mut Query, bias: f32, group: i32) {
        let extras = self.layout().extras_offset();
        query.vector[extras + EXTRA_BIAS] = bias;
        query.vector[extras + EXTRA_GROUP] = group as f32;
    }

    /// Goal-only query; the pose section carries no weight.
    pub fn query_from_trajectory(&self, trajectory: &Trajectory, group: i32) -> Query {
        let mut query = Query::zeroed(self.layout().dims());
        query.filter[..self.layout().pose_dims()].fill(0.0);
        self.encode_trajectory(trajectory, &mut query);
        self.set_extras(&mut query, 0.0, group);
        query
    }

    /// Query whose pose is taken from an entry of this dataset.
    pub fn query_from_existing(&self, entry: usize, mirror: bool, trajectory: &Trajectory, group: i32) -> Query {
        let dims = self.layout().dims();
        let pose_dims = self.layout().pose_dims();
        let mut query = Query::zeroed(dims);
        let row = if mirror {
            self.mirror_vector(self.features(entry))
        } else {
            self.features(entry).to_vec()
        };
        query.vector[..pose_dims].copy_from_slice(&row[..pose_dims]);
        self.encode_trajectory(trajectory, &mut query);
        self.set_extras(&mut query, 0.0, group);
        query
    }

    /// Query whose pose comes from the character's live joints.
    pub fn query_from_pose(&self, pose: &MotionPose, trajectory: &Trajectory, bias: f32) -> Query {
        let mut query = Query::zeroed(self.layout().dims());
        for (b, body) in self.settings().pose.bodies.iter().enumerate() {
            let at = b * POSE_BODY_DIMS;
            match pose.joint(&body.joint) {
                Some(j) => {
                    query.vector[at..at + 3].copy_from_slice(&[j.position.x, j.position.y, j.position.z]);
                    query.vector[at + 3..at + 6].copy_from_slice(&[j.velocity.x, j.velocity.y, j.velocity.z]);
                }
                None => query.filter[at..at + POSE_BODY_DIMS].fill(0.0),
            }
        }
        let facing_at = self.layout().pose_dims() - 3;
        query.vector[facing_at..facing_at + 3].copy_from_slice(&[pose.facing.x, pose.facing.y, pose.facing.z]);
        self.encode_trajectory(trajectory, &mut query);
        self.set_extras(&mut query, bias, pose.group);
        query
    }

    /// Best entry over active layers, honouring the mirror mode.
    pub fn find_closest(&self, query: &Query, scales: &[f32], params: &SearchParams<'_>) -> Option<ClosestEntry> {
        let layer_costs = self.layer_costs(params.layers);
        if self.is_empty() || layer_costs.iter().all(Option::is_none) {
            trace!(dataset = %self.id(), "no search candidate");
            return None;
        }
        let parallel = self.len() > params.parallel_threshold;

        let mut best = None;
        if params.mirror_mode != MirrorMode::Forced {
            best = self.search_pass(&query.vector, scales, false, &layer_costs, parallel);
        }
        if params.mirror_mode != MirrorMode::None {
            let mirrored = self.mirror_vector(&query.vector);
            let candidate = self.search_pass(&mirrored, scales, true, &layer_costs, parallel);
            best = match (best, candidate) {
                (Some(b), Some(m)) if m.cost < b.cost => Some(m),
                (None, m) => m,
                (b, _) => b,
            };
        }
        best
    }

    fn search_pass(
        &self,
        query: &[f32],
        scales: &[f32],
        mirrored: bool,
        layer_costs: &[Option<f32>],
        parallel: bool,
    ) -> Option<ClosestEntry> {
        let evaluate = |index: usize| {
            let meta = self.entry(index)?;
            let layer_cost = layer_costs[meta.layer]?;
            let cost = weighted_distance(self.features(index), query, scales, self.mins()) + layer_cost;
            Some(ClosestEntry {
                index,
                cost,
                mirror: mirrored,
                cost_bias: 0.0,
            })
        };
        let pick = |a: ClosestEntry, b: ClosestEntry| if b.better_than(&a) { b } else { a };

        if parallel {
            (0..self.len())
                .into_par_iter()
                .with_min_len(PARALLEL_MIN_CHUNK)
                .filter_map(evaluate)
                .reduce_with(pick)
        } else {
            (0..self.len()).filter_map(evaluate).reduce(pick)
        }
    }

    /// Lets a caller-supplied biased sample win when its discounted distance
    /// is no worse than the current best.
    pub fn consider_extra_sample(
        &self,
        extra: Option<&MatchCandidate>,
        closest: Option<ClosestEntry>,
        query: &Query,
        scales: &[f32],
    ) -> Option<ClosestEntry> {
        let Some(extra) = extra else {
            return closest;
        };
        let Some(index) = self.entry_for_sample(&extra.sample) else {
            return closest;
        };
        let dist = self.distance(self.features(index), &query.vector, scales);
        let cost = (dist - extra.cost_bias).max(0.0);
        match closest {
            Some(c) if cost > c.cost => Some(c),
            _ => Some(ClosestEntry {
                index,
                cost,
                mirror: extra.sample.mirror,
                cost_bias: extra.cost_bias,
            }),
        }
    }

    /// Trajectory cost of continuing `entry`, including its bias and group
    /// against an unbiased query in group 0.
    pub fn goal_cost(&self, entry: usize, mirror: bool, trajectory: &Trajectory) -> f32 {
        let pose_dims = self.layout().pose_dims();
        let mut row = if mirror {
            self.mirror_vector(self.features(entry))
        } else {
            self.features(entry).to_vec()
        };
        row[..pose_dims].fill(0.0);
        self.goal_cost_of_row(&row, trajectory)
    }

    /// Same as [`goal_cost`](Self::goal_cost) for a clip outside the dataset,
    /// given its natural trajectory. Infinite when that trajectory does not
    /// cover the future horizon.
    pub fn goal_cost_of_trajectory(
        &self,
        clip_trajectory: &Trajectory,
        trajectory: &Trajectory,
        biased: bool,
        group: i32,
    ) -> f32 {
        let mut sample = Query::zeroed(self.layout().dims());
        self.encode_trajectory(clip_trajectory, &mut sample);
        let future = self.layout().goal_offset()..self.layout().history_offset();
        if sample.filter[future].iter().step_by(GOAL_SAMPLE_DIMS).any(|&f| f == 0.0) {
            return f32::INFINITY;
        }
        self.set_extras(&mut sample, if biased { 0.0 } else { 1.0 }, group);
        self.goal_cost_of_row(&sample.vector, trajectory)
    }

    fn goal_cost_of_row(&self, row: &[f32], trajectory: &Trajectory) -> f32 {
        let mut query = Query::zeroed(self.layout().dims());
        self.encode_trajectory(trajectory, &mut query);
        self.set_extras(&mut query, 1.0, 0);
        let scales = self.scales(&query.filter);
        self.distance(row, &query.vector, &scales)
    }
}
