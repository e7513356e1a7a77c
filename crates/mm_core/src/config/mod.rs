//! Engine-wide locomotion configuration.
//!
//! Per-dataset tuning travels with the dataset (`MatchingSettings`). What
//! lives here applies to every controller regardless of dataset: history
//! size, search fan-out and the correction thresholds.
//!
//! ```yaml
//! always_evaluate: false
//! history_capacity: 64
//! parallel_threshold: 2048
//! correction:
//!   moving_tail_dist: 0.75
//! ```

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;
use validator::Validate;

use crate::error::{LocomotionError, Result};
use crate::history::DEFAULT_HISTORY_CAPACITY;
use crate::procedural::CorrectionThresholds;

pub const PRESET_NAMES: [&str; 3] = ["realistic", "responsive", "debug"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct LocomotionConfig {
    /// Ignore the transition interval and search every tick
    pub always_evaluate: bool,
    #[validate(range(min = 2, max = 4096))]
    pub history_capacity: usize,
    /// Datasets with more rows are searched on the rayon pool
    #[validate(range(min = 1))]
    pub parallel_threshold: usize,
    #[validate]
    pub correction: CorrectionThresholds,
}

impl Default for LocomotionConfig {
    fn default() -> Self {
        Self::realistic()
    }
}

impl LocomotionConfig {
    pub fn realistic() -> Self {
        Self {
            always_evaluate: false,
            history_capacity: DEFAULT_HISTORY_CAPACITY,
            parallel_threshold: 2048,
            correction: CorrectionThresholds::default(),
        }
    }

    /// Snappier strafing and an earlier switch into moving rotation.
    pub fn responsive() -> Self {
        Self {
            correction: CorrectionThresholds {
                moving_tail_dist: 0.5,
                strafe_blend_rate: 10.0,
                ..CorrectionThresholds::default()
            },
            ..Self::realistic()
        }
    }

    /// Searches every tick on one thread.
    pub fn debug() -> Self {
        Self {
            always_evaluate: true,
            parallel_threshold: usize::MAX,
            ..Self::realistic()
        }
    }

    pub fn preset(name: &str) -> Option<Self> {
        match name {
            "realistic" => Some(Self::realistic()),
            "responsive" => Some(Self::responsive()),
            "debug" => Some(Self::debug()),
            _ => None,
        }
    }

    pub fn check(&self) -> Result<()> {
        self.validate()
            .map_err(|e| LocomotionError::InvalidConfig(e.to_string()))
    }

    pub fn from_yaml_str(text: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(text)?;
        config.check()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let config = Self::from_yaml_str(&fs::read_to_string(path)?)?;
        debug!(path = %path.display(), "loaded locomotion config");
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_snapshot() {
        let yaml = serde_yaml::to_string(&LocomotionConfig::default()).unwrap();
        insta::assert_snapshot!(yaml, @r###"
        always_evaluate: false
        history_capacity: 64
        parallel_threshold: 2048
        correction:
          moving_tail_dist: 0.75
          min_rotation_vec_len: 0.15
          strafe_blend_rate: 5.0
          max_overshoot: 0.05
        "###);
    }

    #[test]
    fn test_presets_are_valid() {
        for name in PRESET_NAMES {
            let config = LocomotionConfig::preset(name).unwrap();
            assert!(config.check().is_ok(), "preset {name}");
        }
        assert!(LocomotionConfig::preset("arcade").is_none());
        assert!(LocomotionConfig::debug().always_evaluate);
    }

    #[test]
    fn test_partial_yaml_fills_defaults() {
        let config = LocomotionConfig::from_yaml_str("history_capacity: 16\ncorrection:\n  strafe_blend_rate: 8.0\n").unwrap();
        assert_eq!(config.history_capacity, 16);
        assert_eq!(config.correction.strafe_blend_rate, 8.0);
        assert_eq!(config.correction.moving_tail_dist, 0.75);
        assert_eq!(config.parallel_threshold, 2048);
    }

    #[test]
    fn test_out_of_range_rejected() {
        let err = LocomotionConfig::from_yaml_str("history_capacity: 1\n").unwrap_err();
        assert!(matches!(err, LocomotionError::InvalidConfig(_)));

        let err = LocomotionConfig::from_yaml_str("correction:\n  max_overshoot: 3.0\n").unwrap_err();
        assert!(matches!(err, LocomotionError::InvalidConfig(_)));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("locomotion.yaml");
        fs::write(&path, "always_evaluate: true\n").unwrap();
        assert!(LocomotionConfig::load(&path).unwrap().always_evaluate);
    }
}
