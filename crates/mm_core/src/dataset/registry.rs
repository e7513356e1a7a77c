//! Read-only registry of datasets and transition tables, keyed by id.
//!
//! Built once at load time and shared as `Arc<DatasetRegistry>`; nothing in
//! it changes during gameplay.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use fxhash::FxHashMap;
use tracing::{debug, info, warn};

use super::packed::{read_packed, PACKED_EXTENSION};
use super::{DatasetId, MotionDataset, MotionDatasetDef, TransitionTableId};
use crate::error::{LocomotionError, Result};
use crate::transition::TransitionTable;

/// Overrides the directory `DatasetRegistry::from_env` loads.
pub const REGISTRY_DIR_ENV: &str = "MM_REGISTRY_DIR";
pub const DEFAULT_REGISTRY_DIR: &str = "data/locomotion";
/// File suffix that marks a transition table rather than a dataset.
pub const TRANSITIONS_SUFFIX: &str = ".transitions";

#[derive(Debug, Clone, Default)]
pub struct DatasetRegistry {
    datasets: FxHashMap<DatasetId, Arc<MotionDataset>>,
    tables: FxHashMap<TransitionTableId, Arc<TransitionTable>>,
}

impl DatasetRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_dataset(&mut self, dataset: MotionDataset) -> Result<()> {
        let id = dataset.id().clone();
        if self.datasets.contains_key(&id) {
            return Err(LocomotionError::InvalidDataset {
                dataset: id.to_string(),
                reason: "registered twice".into(),
            });
        }
        self.datasets.insert(id, Arc::new(dataset));
        Ok(())
    }

    pub fn insert_transition_table(&mut self, table: TransitionTable) {
        if self.tables.contains_key(&table.id) {
            warn!(table = %table.id, "replacing transition table");
        }
        self.tables.insert(table.id.clone(), Arc::new(table));
    }

    pub fn with_dataset(mut self, dataset: MotionDataset) -> Result<Self> {
        self.insert_dataset(dataset)?;
        Ok(self)
    }

    pub fn with_transition_table(mut self, table: TransitionTable) -> Self {
        self.insert_transition_table(table);
        self
    }

    pub fn dataset(&self, id: &DatasetId) -> Result<Arc<MotionDataset>> {
        self.datasets
            .get(id)
            .cloned()
            .ok_or_else(|| LocomotionError::MissingDataset(id.clone()))
    }

    pub fn transition_table(&self, id: &TransitionTableId) -> Result<Arc<TransitionTable>> {
        self.tables
            .get(id)
            .cloned()
            .ok_or_else(|| LocomotionError::MissingTransitionTable(id.clone()))
    }

    /// Dataset ids in sorted order.
    pub fn dataset_ids(&self) -> Vec<DatasetId> {
        let mut ids: Vec<_> = self.datasets.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.datasets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.datasets.is_empty()
    }

    // ========================================================================
    // Loading
    // ========================================================================

    /// Loads every dataset (`.json`, `.mmpk`) and transition table
    /// (`*.transitions.json|yaml|yml`) in `dir`, in file name order.
    pub fn load_dir(dir: &Path) -> Result<Self> {
        let mut paths: Vec<PathBuf> = fs::read_dir(dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.is_file())
            .collect();
        paths.sort();

        let mut registry = Self::new();
        for path in paths {
            if is_transition_file(&path) {
                let table = load_transition_file(&path)?;
                debug!(table = %table.id, path = %path.display(), "loaded transition table");
                registry.insert_transition_table(table);
                continue;
            }
            match extension(&path).as_deref() {
                Some("json") | Some(PACKED_EXTENSION) => {
                    let dataset = load_dataset_file(&path)?;
                    debug!(dataset = %dataset.id(), rows = dataset.len(), "loaded dataset");
                    registry.insert_dataset(dataset)?;
                }
                _ => debug!(path = %path.display(), "skipping unrecognised file"),
            }
        }
        info!(
            dir = %dir.display(),
            datasets = registry.datasets.len(),
            tables = registry.tables.len(),
            "registry loaded"
        );
        Ok(registry)
    }

    /// Loads from `$MM_REGISTRY_DIR`, or the default relative directory.
    pub fn from_env() -> Result<Self> {
        Self::load_dir(&resolve_registry_dir())
    }
}

pub fn resolve_registry_dir() -> PathBuf {
    env::var(REGISTRY_DIR_ENV)
        .ok()
        .map(|p| p.trim().to_string())
        .filter(|p| !p.is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_REGISTRY_DIR))
}

fn extension(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
}

fn is_transition_file(path: &Path) -> bool {
    path.file_stem()
        .and_then(|s| s.to_str())
        .is_some_and(|s| s.ends_with(TRANSITIONS_SUFFIX))
}

/// Reads a dataset from JSON or packed form and validates it.
pub fn load_dataset_file(path: &Path) -> Result<MotionDataset> {
    let def: MotionDatasetDef = match extension(path).as_deref() {
        Some(PACKED_EXTENSION) => read_packed(path)?,
        _ => serde_json::from_str(&fs::read_to_string(path)?)?,
    };
    MotionDataset::from_def(def)
}

pub fn load_transition_file(path: &Path) -> Result<TransitionTable> {
    let text = fs::read_to_string(path)?;
    match extension(path).as_deref() {
        Some("yaml") | Some("yml") => Ok(serde_yaml::from_str(&text)?),
        _ => Ok(serde_json::from_str(&text)?),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::packed::write_packed;
    use crate::dataset::testing::{locomotion_dataset, locomotion_dataset_def, SyntheticOptions};
    use tempfile::tempdir;

    fn assert_send_sync<T: Send + Sync>() {}

    #[test]
    fn test_registry_is_shareable() {
        assert_send_sync::<DatasetRegistry>();
        assert_send_sync::<Arc<MotionDataset>>();
    }

    #[test]
    fn test_missing_ids() {
        let registry = DatasetRegistry::new();
        assert!(matches!(
            registry.dataset(&"walk".into()),
            Err(LocomotionError::MissingDataset(_))
        ));
        let err = registry.transition_table(&"t".into()).unwrap_err();
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_duplicate_dataset_rejected() {
        let registry = DatasetRegistry::new()
            .with_dataset(locomotion_dataset(&SyntheticOptions::default()))
            .unwrap();
        assert!(registry
            .with_dataset(locomotion_dataset(&SyntheticOptions::default()))
            .is_err());
    }

    #[test]
    fn test_load_dir() {
        let dir = tempdir().unwrap();
        let walk = locomotion_dataset_def(&SyntheticOptions {
            id: "walk".into(),
            ..Default::default()
        });
        fs::write(dir.path().join("walk.json"), serde_json::to_string(&walk).unwrap()).unwrap();

        let run = locomotion_dataset_def(&SyntheticOptions {
            id: "run".into(),
            ..Default::default()
        });
        write_packed(&run, &dir.path().join("run.mmpk")).unwrap();

        fs::write(
            dir.path().join("default.transitions.yaml"),
            "id: default\nentries:\n  - from: walk\n    to: run\n    blend: { anim_fade_time: 0.2, motion_fade_time: 0.3 }\n",
        )
        .unwrap();
        fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let registry = DatasetRegistry::load_dir(dir.path()).unwrap();
        assert_eq!(registry.dataset_ids(), vec![DatasetId::from("run"), DatasetId::from("walk")]);
        let table = registry.transition_table(&"default".into()).unwrap();
        let blend = table.lookup(&"walk".into(), &"run".into()).unwrap();
        assert!((blend.motion_fade_time - 0.3).abs() < 1e-6);
    }

    #[test]
    fn test_invalid_dataset_file_fails_load() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("broken.json"), "{\"id\": \"x\"}").unwrap();
        assert!(matches!(
            DatasetRegistry::load_dir(dir.path()),
            Err(LocomotionError::Json(_))
        ));
    }
}
