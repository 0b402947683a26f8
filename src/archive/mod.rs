// src/archive/mod.rs

//! Package archiver
//!
//! Turns a target's install prefix into its release: the tree is normalized,
//! scanned into a [`Manifest`], and written as `release/<slug>.tar.gz` with
//! the manifest embedded at `share/xyz/<slug>.manifest`. The manifest is
//! also written next to the archive for the conflict checker.

pub mod manifest;
pub mod normalize;
mod tarball;

pub use manifest::{EntryKind, Manifest, ManifestEntry};
pub use normalize::{NormalizeReport, normalize_install_tree};
pub use tarball::{ExtraFile, write_archive};

use crate::error::Result;
use crate::hash::sha256_file;
use crate::target::{TargetId, TargetPaths};
use std::path::PathBuf;
use tracing::info;

/// Timestamp given to every archive entry (2013-01-01T00:00:00Z)
pub const BASE_TIME: u64 = 1_356_998_400;

/// A finished release of one target
#[derive(Debug, Clone)]
pub struct ReleaseArtifact {
    pub archive: PathBuf,
    pub manifest_path: PathBuf,
    pub manifest: Manifest,
    /// SHA-256 of the archive file
    pub archive_hash: String,
}

/// Location of the manifest inside the archive
pub fn embedded_manifest_path(slug: &str) -> String {
    format!("share/xyz/{}.manifest", slug)
}

/// Manifest, archive and on-disk manifest for an already normalized target
pub fn package_target(id: &TargetId, paths: &TargetPaths) -> Result<ReleaseArtifact> {
    let manifest = Manifest::scan(&id.package, id.variant_label(), &paths.prefix_dir)?;
    let text = manifest.to_text();
    let embedded = embedded_manifest_path(&paths.slug);
    let extras = [ExtraFile {
        path: &embedded,
        contents: text.as_bytes(),
    }];

    let archive_hash = write_archive(&paths.prefix_dir, &manifest, &extras, &paths.archive)?;
    manifest.write(&paths.manifest)?;

    info!(
        "Released {} ({} files, sha256 {})",
        id,
        manifest.entries.len(),
        archive_hash.get(..12).unwrap_or(&archive_hash)
    );

    Ok(ReleaseArtifact {
        archive: paths.archive.clone(),
        manifest_path: paths.manifest.clone(),
        manifest,
        archive_hash,
    })
}

/// The existing release of a target, if both archive and manifest are present
pub fn read_release(paths: &TargetPaths) -> Result<Option<ReleaseArtifact>> {
    if !paths.archive.is_file() || !paths.manifest.is_file() {
        return Ok(None);
    }

    Ok(Some(ReleaseArtifact {
        archive: paths.archive.clone(),
        manifest_path: paths.manifest.clone(),
        manifest: Manifest::read(&paths.manifest)?,
        archive_hash: sha256_file(&paths.archive)?,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BuildConfig;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_package_target_writes_release() {
        let dir = TempDir::new().unwrap();
        let config = BuildConfig::with_platform(dir.path(), "x86_64-unknown-linux-gnu", "x86_64-unknown-linux-gnu");
        let id = TargetId::new("gmp");
        let paths = TargetPaths::new(&config, &id);
        fs::create_dir_all(paths.eprefix_dir.join("lib")).unwrap();
        fs::write(paths.eprefix_dir.join("lib/libgmp.a"), b"archive").unwrap();

        let release = package_target(&id, &paths).unwrap();
        assert!(paths.archive.is_file());
        assert_eq!(release.manifest.entries.len(), 1);
        assert_eq!(
            release.manifest.entries[0].path,
            "x86_64-unknown-linux-gnu/lib/libgmp.a"
        );

        let again = read_release(&paths).unwrap().unwrap();
        assert_eq!(again.archive_hash, release.archive_hash);
        assert_eq!(again.manifest.entries[0].hash, release.manifest.entries[0].hash);
    }

    #[test]
    fn test_missing_release() {
        let dir = TempDir::new().unwrap();
        let config = BuildConfig::with_platform(dir.path(), "x86_64-unknown-linux-gnu", "x86_64-unknown-linux-gnu");
        let paths = TargetPaths::new(&config, &TargetId::new("mpfr"));
        assert!(read_release(&paths).unwrap().is_none());
    }
}
