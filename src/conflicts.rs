// src/conflicts.rs

//! Cross-package file conflict detection
//!
//! Every `release/*.manifest` is read and each installed path is mapped to
//! the releases claiming it. A path claimed with more than one distinct
//! content hash is a conflict; identical content shipped by several
//! packages is allowed. Nothing here writes to the workspace.

use crate::archive::Manifest;
use crate::error::Result;
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use tracing::debug;

/// One release claiming a path
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct Claimant {
    /// Release name, the manifest file stem
    pub release: String,
    pub hash: String,
}

/// A path installed with differing content by several releases
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conflict {
    pub path: String,
    /// Sorted by release name
    pub claimants: Vec<Claimant>,
}

impl fmt::Display for Conflict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:", self.path)?;
        for (i, claimant) in self.claimants.iter().enumerate() {
            let sep = if i == 0 { " " } else { ", " };
            write!(f, "{}{} ({})", sep, claimant.release, short(&claimant.hash))?;
        }
        Ok(())
    }
}

fn short(hash: &str) -> &str {
    hash.get(..12).unwrap_or(hash)
}

#[derive(Debug, Default)]
pub struct ConflictReport {
    /// Releases that were examined
    pub releases: Vec<String>,
    /// Sorted by path
    pub conflicts: Vec<Conflict>,
}

impl ConflictReport {
    pub fn is_clean(&self) -> bool {
        self.conflicts.is_empty()
    }
}

/// Check every manifest in `release_dir`
///
/// A missing release directory holds no releases and so no conflicts.
pub fn check_releases(release_dir: &Path) -> Result<ConflictReport> {
    let mut report = ConflictReport::default();
    if !release_dir.is_dir() {
        return Ok(report);
    }

    let mut manifests = Vec::new();
    for entry in std::fs::read_dir(release_dir)? {
        let path = entry?.path();
        if path.extension().is_some_and(|ext| ext == "manifest")
            && let Some(stem) = path.file_stem().and_then(|s| s.to_str())
        {
            manifests.push((stem.to_string(), path.clone()));
        }
    }
    manifests.sort();

    let mut claims: BTreeMap<String, Vec<Claimant>> = BTreeMap::new();
    for (release, path) in manifests {
        let manifest = Manifest::read(&path)?;
        debug!("{}: {} entries", release, manifest.entries.len());
        for entry in manifest.entries {
            claims.entry(entry.path).or_default().push(Claimant {
                release: release.clone(),
                hash: entry.hash,
            });
        }
        report.releases.push(release);
    }

    for (path, mut claimants) in claims {
        let first = &claimants[0].hash;
        if claimants.iter().any(|c| &c.hash != first) {
            claimants.sort();
            report.conflicts.push(Conflict { path, claimants });
        }
    }

    Ok(report)
}
