//! Error types for the locomotion core.

use thiserror::Error;

use crate::dataset::{DatasetId, TransitionTableId};

/// Everything that can stop a controller or fail a resource load.
///
/// Per-tick search misses are not errors; they surface as "no change".
#[derive(Error, Debug)]
pub enum LocomotionError {
    #[error("dataset not found: {0}")]
    MissingDataset(DatasetId),

    #[error("transition table not found: {0}")]
    MissingTransitionTable(TransitionTableId),

    #[error("dataset {dataset} needs joints the skeleton lacks: {missing:?}")]
    MissingRequiredJoints {
        dataset: DatasetId,
        missing: Vec<String>,
    },

    #[error("motion settings unavailable")]
    MissingSettings,

    #[error("invalid dataset {dataset}: {reason}")]
    InvalidDataset { dataset: String, reason: String },

    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("decode error: {0}")]
    Decode(String),

    #[error("checksum mismatch: expected {expected}, found {found}")]
    ChecksumMismatch { expected: String, found: String },
}

impl LocomotionError {
    /// Fatal errors end locomotion for the character that hit them.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, LocomotionError::MissingTransitionTable(_))
    }
}

pub type Result<T> = std::result::Result<T, LocomotionError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_messages() {
        let err = LocomotionError::MissingDataset(DatasetId::from("walk"));
        assert_eq!(err.to_string(), "dataset not found: walk");

        let err = LocomotionError::MissingRequiredJoints {
            dataset: DatasetId::from("walk"),
            missing: vec!["l_ankle".into()],
        };
        assert!(err.to_string().contains("l_ankle"));
    }

    #[test]
    fn test_fatality() {
        assert!(LocomotionError::MissingSettings.is_fatal());
        assert!(!LocomotionError::MissingTransitionTable(TransitionTableId::from("t")).is_fatal());
    }
}
