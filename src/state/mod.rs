// src/state/mod.rs

//! Build stages, target states and the incremental-rebuild cache
//!
//! Every target moves through the same six stages. For each stage the
//! [`fingerprint`] module computes a digest of everything that can
//! invalidate it, and the [`store`] module remembers the digest of the last
//! successful run. A stage is reused only when both digests agree and its
//! output is still on disk.

pub mod fingerprint;
pub mod store;

pub use fingerprint::{DependencyInput, StageFingerprints};
pub use store::{BuildStateStore, StageRecord};

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// One phase of the build pipeline, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Stage {
    Fetch,
    PrepareDependencies,
    Configure,
    Build,
    Install,
    Package,
}

impl Stage {
    pub const ALL: [Stage; 6] = [
        Stage::Fetch,
        Stage::PrepareDependencies,
        Stage::Configure,
        Stage::Build,
        Stage::Install,
        Stage::Package,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Fetch => "fetch",
            Self::PrepareDependencies => "prepare-dependencies",
            Self::Configure => "configure",
            Self::Build => "build",
            Self::Install => "install",
            Self::Package => "package",
        }
    }

    /// State a target is in once this stage is satisfied
    pub fn completed_state(&self) -> TargetState {
        match self {
            Self::Fetch => TargetState::SourceFetched,
            Self::PrepareDependencies => TargetState::DependenciesPrepared,
            Self::Configure => TargetState::Configured,
            Self::Build => TargetState::Built,
            Self::Install => TargetState::Installed,
            Self::Package => TargetState::Packaged,
        }
    }

    /// This stage and every stage after it
    pub fn and_later(self) -> impl Iterator<Item = Stage> {
        Self::ALL.into_iter().filter(move |s| *s >= self)
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Stage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|stage| stage.as_str() == s)
            .ok_or_else(|| format!("unknown stage: {}", s))
    }
}

/// Position of a target in the build state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TargetState {
    Pending,
    SourceFetched,
    DependenciesPrepared,
    Configured,
    Built,
    Installed,
    Packaged,
    Released,
    Failed,
}

impl TargetState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Released | Self::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::SourceFetched => "source-fetched",
            Self::DependenciesPrepared => "dependencies-prepared",
            Self::Configured => "configured",
            Self::Built => "built",
            Self::Installed => "installed",
            Self::Packaged => "packaged",
            Self::Released => "released",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for TargetState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_order() {
        assert!(Stage::Fetch < Stage::PrepareDependencies);
        assert!(Stage::Install < Stage::Package);
        let later: Vec<_> = Stage::Build.and_later().collect();
        assert_eq!(later, vec![Stage::Build, Stage::Install, Stage::Package]);
    }

    #[test]
    fn test_stage_round_trips_through_name() {
        for stage in Stage::ALL {
            assert_eq!(stage.as_str().parse::<Stage>().unwrap(), stage);
        }
        assert!("simmer".parse::<Stage>().is_err());
    }

    #[test]
    fn test_completed_states_follow_pipeline() {
        assert_eq!(Stage::Fetch.completed_state(), TargetState::SourceFetched);
        assert_eq!(Stage::Package.completed_state(), TargetState::Packaged);
        assert!(!TargetState::Packaged.is_terminal());
        assert!(TargetState::Failed.is_terminal());
    }
}
