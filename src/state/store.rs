// src/state/store.rs

//! Persistent stage completion records
//!
//! The store is a single JSON document at `.xyz/build-state.json`:
//!
//! ```json
//! {
//!   "version": 1,
//!   "targets": {
//!     "binutils@arm-none-eabi": {
//!       "fetch": { "fingerprint": "9c1e...", "completed_at": "2026-01-05T10:12:44Z" }
//!     }
//!   }
//! }
//! ```
//!
//! Updates from concurrently running targets are serialized by a mutex and
//! every update rewrites the file atomically, so a crash leaves either the
//! old or the new document on disk.

use super::Stage;
use crate::error::{Error, Result};
use crate::filesystem::atomic_write;
use crate::target::TargetId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{debug, warn};

const STATE_VERSION: u32 = 1;

/// Last successful run of one stage
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageRecord {
    pub fingerprint: String,
    pub completed_at: DateTime<Utc>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct StateFile {
    version: u32,
    /// target id -> stage name -> record
    targets: BTreeMap<String, BTreeMap<Stage, StageRecord>>,
}

pub struct BuildStateStore {
    path: PathBuf,
    state: Mutex<StateFile>,
}

impl BuildStateStore {
    /// Open the store at `path`; a missing file is an empty store
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let state = if path.exists() {
            let content = std::fs::read(&path)?;
            let state: StateFile = serde_json::from_slice(&content).map_err(|e| {
                Error::State(format!(
                    "{} is unreadable ({}); run `xyz clean` to reset it",
                    path.display(),
                    e
                ))
            })?;
            if state.version != STATE_VERSION {
                warn!(
                    "Ignoring build state version {} in {}",
                    state.version,
                    path.display()
                );
                StateFile::new()
            } else {
                state
            }
        } else {
            StateFile::new()
        };

        debug!(
            "Opened build state {} ({} targets)",
            path.display(),
            state.targets.len()
        );
        Ok(Self {
            path,
            state: Mutex::new(state),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get(&self, target: &TargetId, stage: Stage) -> Option<StageRecord> {
        self.lock()
            .targets
            .get(&target.to_string())
            .and_then(|stages| stages.get(&stage))
            .cloned()
    }

    /// True if the last successful run of `stage` had this fingerprint
    pub fn is_current(&self, target: &TargetId, stage: Stage, fingerprint: &str) -> bool {
        self.get(target, stage)
            .is_some_and(|record| record.fingerprint == fingerprint)
    }

    /// Record a successful stage run
    pub fn record(&self, target: &TargetId, stage: Stage, fingerprint: &str) -> Result<()> {
        let mut state = self.lock();
        state.targets.entry(target.to_string()).or_default().insert(
            stage,
            StageRecord {
                fingerprint: fingerprint.to_string(),
                completed_at: Utc::now(),
            },
        );
        self.persist(&state)
    }

    /// Forget `stage` and every later stage of a target
    pub fn invalidate_from(&self, target: &TargetId, stage: Stage) -> Result<()> {
        let mut state = self.lock();
        let key = target.to_string();
        let Some(stages) = state.targets.get_mut(&key) else {
            return Ok(());
        };

        let before = stages.len();
        stages.retain(|recorded, _| *recorded < stage);
        if stages.len() == before {
            return Ok(());
        }
        if stages.is_empty() {
            state.targets.remove(&key);
        }
        self.persist(&state)
    }

    /// Forget every record of a target
    pub fn remove_target(&self, target: &TargetId) -> Result<()> {
        let mut state = self.lock();
        if state.targets.remove(&target.to_string()).is_some() {
            self.persist(&state)?;
        }
        Ok(())
    }

    /// Targets with at least one record
    pub fn targets(&self) -> Vec<String> {
        self.lock().targets.keys().cloned().collect()
    }

    fn persist(&self, state: &StateFile) -> Result<()> {
        let data = serde_json::to_vec_pretty(state)?;
        atomic_write(&self.path, &data)
            .map_err(|e| Error::State(format!("failed to write {}: {}", self.path.display(), e)))
    }

    fn lock(&self) -> MutexGuard<'_, StateFile> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl StateFile {
    fn new() -> Self {
        Self {
            version: STATE_VERSION,
            targets: BTreeMap::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_records_survive_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(".xyz/build-state.json");
        let gmp = TargetId::new("gmp");

        let store = BuildStateStore::open(&path).unwrap();
        store.record(&gmp, Stage::Fetch, "f1").unwrap();
        store.record(&gmp, Stage::Configure, "c1").unwrap();
        drop(store);

        let store = BuildStateStore::open(&path).unwrap();
        assert!(store.is_current(&gmp, Stage::Fetch, "f1"));
        assert!(!store.is_current(&gmp, Stage::Fetch, "f2"));
        assert!(!store.is_current(&gmp, Stage::Build, "c1"));
        assert_eq!(store.targets(), vec!["gmp"]);
    }

    #[test]
    fn test_invalidate_from_drops_later_stages() {
        let dir = TempDir::new().unwrap();
        let store = BuildStateStore::open(dir.path().join("state.json")).unwrap();
        let id = TargetId::with_variant("gcc", "arm");
        for stage in Stage::ALL {
            store.record(&id, stage, stage.as_str()).unwrap();
        }

        store.invalidate_from(&id, Stage::Build).unwrap();

        assert!(store.get(&id, Stage::Configure).is_some());
        assert!(store.get(&id, Stage::Build).is_none());
        assert!(store.get(&id, Stage::Package).is_none());
    }

    #[test]
    fn test_variants_are_separate_entries() {
        let dir = TempDir::new().unwrap();
        let store = BuildStateStore::open(dir.path().join("state.json")).unwrap();
        let arm = TargetId::with_variant("binutils", "arm");
        let avr = TargetId::with_variant("binutils", "avr");

        store.record(&arm, Stage::Fetch, "same").unwrap();
        assert!(!store.is_current(&avr, Stage::Fetch, "same"));

        store.remove_target(&arm).unwrap();
        assert!(store.targets().is_empty());
    }

    #[test]
    fn test_corrupt_store_is_state_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(matches!(BuildStateStore::open(&path), Err(Error::State(_))));
    }

    #[test]
    fn test_document_uses_stage_names() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.json");
        let store = BuildStateStore::open(&path).unwrap();
        store
            .record(&TargetId::new("m4"), Stage::PrepareDependencies, "p")
            .unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("\"prepare-dependencies\""));
        assert!(text.contains("\"completed_at\""));
    }
}
