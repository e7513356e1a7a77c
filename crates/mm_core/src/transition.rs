//! Transition tables: blend times between pairs of datasets.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::ids::{DatasetId, TransitionTableId, ANY_DATASET};
use crate::settings::{BlendPair, MatchingSettings};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct TransitionEntry {
    /// Previous dataset, or `"any"`
    pub from: DatasetId,
    /// Next dataset, or `"any"`
    pub to: DatasetId,
    pub blend: BlendPair,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct TransitionTable {
    pub id: TransitionTableId,
    #[serde(default)]
    pub entries: Vec<TransitionEntry>,
}

impl TransitionTable {
    fn find(&self, from: &str, to: &str) -> Option<BlendPair> {
        self.entries
            .iter()
            .find(|e| e.from.as_str() == from && e.to.as_str() == to)
            .map(|e| e.blend)
    }

    /// Exact pair first, then `any -> next`, then `prev -> any`.
    pub fn lookup(&self, prev: &DatasetId, next: &DatasetId) -> Option<BlendPair> {
        self.find(prev.as_str(), next.as_str())
            .or_else(|| self.find(ANY_DATASET, next.as_str()))
            .or_else(|| self.find(prev.as_str(), ANY_DATASET))
    }
}

/// Blend to use when switching datasets, falling back to the next dataset's
/// default blend.
pub fn transition_blend(
    table: Option<&TransitionTable>,
    prev: &DatasetId,
    next: &DatasetId,
    next_settings: &MatchingSettings,
) -> BlendPair {
    table
        .and_then(|t| t.lookup(prev, next))
        .unwrap_or(next_settings.blend)
}

/// How long motion settings take to blend into the next dataset's.
pub fn settings_blend_time(prev: &MatchingSettings, next: &MatchingSettings, blend: &BlendPair) -> f32 {
    if prev.disable_settings_blend || next.disable_settings_blend {
        0.0
    } else if next.settings_blend_time >= 0.0 {
        next.settings_blend_time
    } else {
        blend.motion_fade_time
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(from: &str, to: &str, t: f32) -> TransitionEntry {
        TransitionEntry {
            from: from.into(),
            to: to.into(),
            blend: BlendPair::uniform(t),
        }
    }

    fn table() -> TransitionTable {
        TransitionTable {
            id: "default".into(),
            entries: vec![
                entry("walk", "run", 0.2),
                entry("any", "run", 0.3),
                entry("walk", "any", 0.4),
            ],
        }
    }

    #[test]
    fn test_lookup_order() {
        let t = table();
        let b = |from: &str, to: &str| t.lookup(&from.into(), &to.into()).map(|b| b.anim_fade_time);
        assert_eq!(b("walk", "run"), Some(0.2));
        assert_eq!(b("crouch", "run"), Some(0.3));
        assert_eq!(b("walk", "crouch"), Some(0.4));
        assert_eq!(b("crouch", "walk"), None);
    }

    #[test]
    fn test_default_blend_fallback() {
        let settings = MatchingSettings::default();
        let blend = transition_blend(None, &"a".into(), &"b".into(), &settings);
        assert_eq!(blend, BlendPair::uniform(0.5));
    }

    #[test]
    fn test_settings_blend_time() {
        let prev = MatchingSettings::default();
        let mut next = MatchingSettings::default();
        let blend = BlendPair {
            anim_fade_time: 0.2,
            motion_fade_time: 0.6,
        };
        assert_eq!(settings_blend_time(&prev, &next, &blend), 0.6);
        next.settings_blend_time = 0.25;
        assert_eq!(settings_blend_time(&prev, &next, &blend), 0.25);
        next.disable_settings_blend = true;
        assert_eq!(settings_blend_time(&prev, &next, &blend), 0.0);
    }
}
