//! # mm_core - Motion-Matching Locomotion Core
//!
//! Drives a character's locomotion from game input by picking animation
//! samples out of a motion dataset.
//!
//! ## Features
//! - Critically damped motion model with directional tuning curves and path following
//! - Trajectory synthesis from recorded history and predicted future
//! - Weighted nearest-neighbour search with layers, mirroring and external poses
//! - Procedural alignment correction toward the model
//! - Per-character controller with pluggable strategy and observer hooks

#![allow(clippy::too_many_arguments)]

pub mod config;
pub mod controller;
pub mod dataset;
pub mod error;
pub mod history;
pub mod ids;
pub mod matcher;
pub mod math;
pub mod motion_model;
pub mod procedural;
pub mod sample;
pub mod settings;
pub mod spring;
pub mod trajectory;
pub mod transition;

pub use config::LocomotionConfig;
pub use controller::{
    CharacterFrame, CharacterHandle, ControllerState, LocomotionController, LocomotionInput,
    LocomotionObserver, LocomotionStrategy, TickOutcome, TickOutput,
};
pub use dataset::{DatasetRegistry, MotionDataset};
pub use error::{LocomotionError, Result};
pub use matcher::{MatchBranch, MatchRequest, MatchSelection, Matcher};
pub use motion_model::{MotionModel, MotionModelInput};
pub use sample::{AnimationSample, PlayingClip};
pub use settings::{MatchingSettings, MotionSettings};
pub use trajectory::Trajectory;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
