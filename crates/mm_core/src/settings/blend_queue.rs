//! Time-windowed blending of motion settings across dataset changes.

use std::collections::VecDeque;
use std::sync::Arc;

use once_cell::sync::Lazy;

use super::MotionSettings;
use crate::math::lerp_scale_clamp;

/// Maximum number of settings kept in flight.
pub const BLEND_QUEUE_CAPACITY: usize = 5;

static FALLBACK_SETTINGS: Lazy<MotionSettings> = Lazy::new(|| MotionSettings::default().resolved());

/// One pushed settings target.
#[derive(Debug, Clone)]
pub struct SettingsBlendEntry {
    pub settings: Arc<MotionSettings>,
    pub start_time: f32,
    pub blend_time: f32,
}

/// Queue of settings targets, oldest first.
///
/// Entries after the first blend in over their own window, each on top of the
/// blended result of the entries before it.
#[derive(Debug, Clone, Default)]
pub struct SettingsBlendQueue {
    entries: VecDeque<SettingsBlendEntry>,
}

impl SettingsBlendQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Adds a target, dropping the oldest entries while the queue is full.
    pub fn push(&mut self, settings: Arc<MotionSettings>, now: f32, blend_time: f32) {
        while self.entries.len() >= BLEND_QUEUE_CAPACITY {
            self.entries.pop_front();
        }
        self.entries.push_back(SettingsBlendEntry {
            settings,
            start_time: now,
            blend_time: blend_time.max(0.0),
        });
    }

    /// Blended settings at `time`.
    ///
    /// An empty queue is a bug in the caller; release builds fall back to the
    /// default settings.
    pub fn get(&self, time: f32) -> MotionSettings {
        debug_assert!(!self.entries.is_empty(), "settings blend queue is empty");

        let mut iter = self.entries.iter();
        let Some(first) = iter.next() else {
            return FALLBACK_SETTINGS.clone();
        };

        let mut current = first.settings.resolved();
        for entry in iter {
            let blend = if entry.blend_time > 0.0 {
                lerp_scale_clamp(0.0, entry.blend_time, 0.0, 1.0, time - entry.start_time)
            } else if time >= entry.start_time {
                1.0
            } else {
                0.0
            };
            if blend > 0.0 {
                current = MotionSettings::lerp(&current, &entry.settings.resolved(), blend);
            }
        }
        current
    }

    /// Drops everything older than the newest fully blended entry.
    pub fn update(&mut self, now: f32) {
        let finished = (1..self.entries.len())
            .rev()
            .find(|&i| {
                let e = &self.entries[i];
                e.start_time + e.blend_time < now
            });
        if let Some(i) = finished {
            self.entries.drain(..i);
        }
    }

    pub fn newest(&self) -> Option<&SettingsBlendEntry> {
        self.entries.back()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn with_speed(speed: f32) -> Arc<MotionSettings> {
        Arc::new(MotionSettings {
            max_speed: speed,
            ..MotionSettings::default()
        })
    }

    fn speed_at(queue: &SettingsBlendQueue, t: f32) -> f32 {
        queue.get(t).max_speed_curve().evaluate(0.0)
    }

    #[test]
    fn test_blend_midpoint() {
        let mut q = SettingsBlendQueue::new();
        q.push(with_speed(4.0), 0.0, 0.0);
        q.push(with_speed(8.0), 0.0, 1.0);
        assert!((speed_at(&q, 0.5) - 6.0).abs() < 1e-5);
        assert!((q.get(0.5).max_speed - 6.0).abs() < 1e-5);
    }

    #[test]
    fn test_blend_endpoints_exact() {
        let mut q = SettingsBlendQueue::new();
        q.push(with_speed(4.0), 0.0, 0.0);
        q.push(with_speed(8.0), 2.0, 1.0);
        assert_eq!(speed_at(&q, 1.0), 4.0);
        assert_eq!(speed_at(&q, 2.0), 4.0);
        assert_eq!(speed_at(&q, 3.0), 8.0);
        assert_eq!(speed_at(&q, 10.0), 8.0);
    }

    #[test]
    fn test_capacity_drops_oldest() {
        let mut q = SettingsBlendQueue::new();
        for i in 0..8 {
            q.push(with_speed(i as f32), i as f32, 0.5);
        }
        assert_eq!(q.len(), BLEND_QUEUE_CAPACITY);
        assert_eq!(q.entries.front().map(|e| e.settings.max_speed), Some(3.0));
    }

    #[test]
    fn test_update_keeps_at_least_one() {
        let mut q = SettingsBlendQueue::new();
        q.push(with_speed(4.0), 0.0, 0.0);
        q.update(100.0);
        assert_eq!(q.len(), 1);

        q.push(with_speed(5.0), 1.0, 0.5);
        q.push(with_speed(6.0), 2.0, 0.5);
        q.update(100.0);
        assert_eq!(q.len(), 1);
        assert_eq!(speed_at(&q, 100.0), 6.0);
    }

    #[test]
    fn test_update_keeps_blending_entries() {
        let mut q = SettingsBlendQueue::new();
        q.push(with_speed(4.0), 0.0, 0.0);
        q.push(with_speed(8.0), 1.0, 1.0);
        q.update(1.5);
        assert_eq!(q.len(), 2, "entry still blending must survive");
        assert!((speed_at(&q, 1.5) - 6.0).abs() < 1e-5);
    }

    #[test]
    #[cfg(not(debug_assertions))]
    fn test_empty_queue_is_inert() {
        let q = SettingsBlendQueue::new();
        assert_eq!(q.get(0.0).max_speed, MotionSettings::default().max_speed);
    }

    proptest! {
        #[test]
        fn prop_blend_is_monotonic(a in 0.5f32..10.0, b in 0.5f32..10.0, dur in 0.05f32..3.0) {
            let mut q = SettingsBlendQueue::new();
            q.push(with_speed(a), 0.0, 0.0);
            q.push(with_speed(b), 0.0, dur);
            let mut prev = speed_at(&q, 0.0);
            prop_assert_eq!(prev, a);
            for i in 1..=20 {
                let t = dur * i as f32 / 20.0;
                let v = speed_at(&q, t);
                if b >= a {
                    prop_assert!(v >= prev - 1e-5);
                } else {
                    prop_assert!(v <= prev + 1e-5);
                }
                prev = v;
            }
            prop_assert!((speed_at(&q, dur + 0.001) - b).abs() < 1e-6);
        }
    }
}
