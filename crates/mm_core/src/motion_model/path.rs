//! Path following support: closest-point queries and corner slowdown.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::math::{dist_xz, lerp, lerp_scale_clamp, signed_angle_xz_deg, smoothstep, unit_xz, Pos3, Vec3};
use crate::settings::CornerSettings;
use crate::spring::approximate_stopping_distance;

/// Corners further along the path than this are ignored (m).
pub const CORNER_CULL_RADIUS: f32 = 7.5;
/// Same-direction corners closer than this are merged (m).
pub const CORNER_MERGE_DIST: f32 = 1.0;
pub const MAX_CORNERS: usize = 16;

/// Polyline the model should follow, in parent space.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct PathInput {
    /// Changes whenever the path is replanned
    pub id: u64,
    #[schemars(with = "Vec<[f32; 3]>")]
    pub waypoints: Vec<Pos3>,
    #[serde(default = "default_true")]
    pub stop_at_goal: bool,
    /// Speed to arrive with; negative means no constraint
    #[serde(default = "default_speed_at_goal")]
    pub speed_at_goal: f32,
}

fn default_true() -> bool {
    true
}

fn default_speed_at_goal() -> f32 {
    -1.0
}

/// A sharp turn ahead and the speed it allows.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Corner {
    pub pos: Pos3,
    pub angle_deg: f32,
    pub max_speed: f32,
    pub radius_min: f32,
    pub radius_max: f32,
}

/// Closest point on the polyline to `pos`, with the index of its leg.
pub fn closest_point_on_path(waypoints: &[Pos3], pos: &Pos3) -> Option<(usize, Pos3)> {
    if waypoints.len() < 2 {
        return None;
    }
    let mut best: Option<(usize, Pos3, f32)> = None;
    for (leg, pair) in waypoints.windows(2).enumerate() {
        let (a, b) = (pair[0], pair[1]);
        let ab = b - a;
        let len_sq = ab.x * ab.x + ab.z * ab.z;
        let t = if len_sq > f32::EPSILON {
            (((pos - a).x * ab.x + (pos - a).z * ab.z) / len_sq).clamp(0.0, 1.0)
        } else {
            0.0
        };
        let p = a + ab * t;
        let d = dist_xz(&p, pos);
        if best.map_or(true, |(_, _, bd)| d < bd) {
            best = Some((leg, p, d));
        }
    }
    best.map(|(leg, p, _)| (leg, p))
}

/// Path length from `from` (on leg `leg`) to the final waypoint.
pub fn remaining_length(waypoints: &[Pos3], leg: usize, from: &Pos3) -> f32 {
    let Some(next) = waypoints.get(leg + 1) else {
        return 0.0;
    };
    let mut total = dist_xz(from, next);
    for pair in waypoints[leg + 1..].windows(2) {
        total += dist_xz(&pair[0], &pair[1]);
    }
    total
}

/// Walks `dist` metres along the path starting at `from` on leg `leg`.
pub fn advance_along_path(waypoints: &[Pos3], mut leg: usize, from: Pos3, dist: f32) -> (usize, Pos3) {
    let mut pos = from;
    let mut remaining = dist.max(0.0);
    while leg + 1 < waypoints.len() {
        let next = waypoints[leg + 1];
        let to_next = dist_xz(&pos, &next);
        if remaining <= to_next {
            let dir = next - pos;
            let len = dir.norm();
            if len > f32::EPSILON {
                pos += dir * (remaining / len);
            }
            return (leg, pos);
        }
        remaining -= to_next;
        pos = next;
        leg += 1;
    }
    (waypoints.len().saturating_sub(2), pos)
}

/// Finds sharp turns ahead of `pos`.
pub fn gather_corners(
    waypoints: &[Pos3],
    leg: usize,
    pos: &Pos3,
    cur_max_speed: f32,
    decel_k: f32,
    settings: &CornerSettings,
) -> Vec<Corner> {
    let mut corners: Vec<Corner> = Vec::new();
    let mut travelled = 0.0;
    let mut prev = *pos;

    for i in (leg + 1)..waypoints.len().saturating_sub(1) {
        let vertex = waypoints[i];
        travelled += dist_xz(&prev, &vertex);
        prev = vertex;
        if travelled > CORNER_CULL_RADIUS {
            break;
        }

        let dir_in = unit_xz(&(vertex - waypoints[i - 1]), Vec3::zeros());
        let dir_out = unit_xz(&(waypoints[i + 1] - vertex), Vec3::zeros());
        if dir_in.norm_squared() < 0.5 || dir_out.norm_squared() < 0.5 {
            continue;
        }
        let angle = signed_angle_xz_deg(&dir_in, &dir_out);
        if angle.abs() < settings.gather_angle_deg {
            continue;
        }

        let merged = match corners.last_mut() {
            Some(last)
                if last.angle_deg.signum() == angle.signum()
                    && dist_xz(&last.pos, &vertex) < CORNER_MERGE_DIST =>
            {
                last.angle_deg += angle;
                *last = make_corner(last.pos, last.angle_deg, cur_max_speed, decel_k, settings);
                true
            }
            _ => false,
        };
        if !merged {
            if corners.len() >= MAX_CORNERS {
                break;
            }
            corners.push(make_corner(vertex, angle, cur_max_speed, decel_k, settings));
        }
    }
    corners
}

fn make_corner(pos: Pos3, angle_deg: f32, cur_max_speed: f32, decel_k: f32, settings: &CornerSettings) -> Corner {
    let max_speed = lerp_scale_clamp(
        settings.angle_min_deg,
        settings.angle_max_deg,
        settings.speed_max,
        settings.speed_min,
        angle_deg.abs(),
    );
    let radius_min = (max_speed * settings.time_at_min_speed).max(0.1);
    let speed_delta = (cur_max_speed - max_speed).max(0.0);
    let slow_dist = approximate_stopping_distance(speed_delta, 0.0, decel_k).clamp(0.5, 10.0);
    Corner {
        pos,
        angle_deg,
        max_speed,
        radius_min,
        radius_max: radius_min + slow_dist,
    }
}

/// Desired speed after slowing for every corner near `pos`.
pub fn corner_limited_max_speed(corners: &[Corner], pos: &Pos3, desired: f32) -> f32 {
    corners.iter().fold(desired, |speed, c| {
        let dist = dist_xz(pos, &c.pos);
        let tt = smoothstep(lerp_scale_clamp(c.radius_min, c.radius_max, 1.0, 0.0, dist));
        let limited = lerp(desired, c.max_speed.min(desired), tt);
        speed.min(limited)
    })
}
