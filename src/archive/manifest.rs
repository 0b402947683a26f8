// src/archive/manifest.rs

//! Release manifests
//!
//! A manifest lists every file of a released target with its SHA-256 and
//! size, sorted by path:
//!
//! ```text
//! format-version: 1
//! package: binutils
//! variant: arm-none-eabi
//! bin/arm-none-eabi-as	3f1c...	1204832
//! ```
//!
//! Symlinks are listed with the digest of `symlink:<target>` and the length
//! of the target, so a changed link is a changed entry.

use crate::error::{Error, Result};
use crate::filesystem::atomic_write;
use crate::hash::{sha256, sha256_file};
use std::fmt::Write as _;
use std::fs;
use std::path::Path;
use walkdir::WalkDir;

pub const FORMAT_VERSION: u32 = 1;

/// One file in a release
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct ManifestEntry {
    /// Path relative to the install prefix, `/`-separated
    pub path: String,
    pub hash: String,
    pub size: u64,
    pub kind: EntryKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum EntryKind {
    File,
    Symlink,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Manifest {
    pub format_version: u32,
    pub package: String,
    pub variant: String,
    pub entries: Vec<ManifestEntry>,
}

impl Manifest {
    /// List the files under `root`
    ///
    /// Directories contribute no entries of their own; entries are sorted by
    /// path so the result does not depend on directory iteration order.
    pub fn scan(package: &str, variant: &str, root: &Path) -> Result<Self> {
        let mut entries = Vec::new();

        if root.exists() {
            for entry in WalkDir::new(root).min_depth(1) {
                let entry = entry?;
                let file_type = entry.file_type();
                if file_type.is_dir() {
                    continue;
                }

                let rel = entry
                    .path()
                    .strip_prefix(root)
                    .map_err(|e| invalid(root, e.to_string()))?;
                let path = rel
                    .to_str()
                    .ok_or_else(|| invalid(root, format!("non UTF-8 path {}", rel.display())))?
                    .to_string();
                if path.contains(['\t', '\n']) {
                    return Err(invalid(root, format!("unrepresentable path {:?}", path)));
                }

                let entry = if file_type.is_symlink() {
                    let target = fs::read_link(entry.path())?;
                    let target = target.to_string_lossy();
                    ManifestEntry {
                        path,
                        hash: sha256(format!("symlink:{}", target).as_bytes()),
                        size: target.len() as u64,
                        kind: EntryKind::Symlink,
                    }
                } else if file_type.is_file() {
                    ManifestEntry {
                        hash: sha256_file(entry.path())?,
                        size: entry.metadata()?.len(),
                        path,
                        kind: EntryKind::File,
                    }
                } else {
                    return Err(invalid(root, format!("{} is not a file, directory or symlink", path)));
                };
                entries.push(entry);
            }
        }

        entries.sort();

        Ok(Self {
            format_version: FORMAT_VERSION,
            package: package.to_string(),
            variant: variant.to_string(),
            entries,
        })
    }

    /// Serialized manifest text
    pub fn to_text(&self) -> String {
        let mut text = String::new();
        let _ = writeln!(text, "format-version: {}", self.format_version);
        let _ = writeln!(text, "package: {}", self.package);
        let _ = writeln!(text, "variant: {}", self.variant);
        for entry in &self.entries {
            let _ = writeln!(text, "{}\t{}\t{}", entry.path, entry.hash, entry.size);
        }
        text
    }

    /// Parse manifest text; `origin` is used in error messages
    ///
    /// The entry kind is not part of the text format; parsed entries are
    /// reported as files.
    pub fn parse(text: &str, origin: &Path) -> Result<Self> {
        let mut lines = text.lines();
        let mut header = |key: &str| -> Result<String> {
            let line = lines
                .next()
                .ok_or_else(|| invalid(origin, format!("missing '{}' header", key)))?;
            line.strip_prefix(key)
                .and_then(|rest| rest.strip_prefix(": "))
                .map(str::to_string)
                .ok_or_else(|| invalid(origin, format!("expected '{}: ...', found '{}'", key, line)))
        };

        let format_version: u32 = header("format-version")?
            .parse()
            .map_err(|e| invalid(origin, format!("bad format version: {}", e)))?;
        if format_version != FORMAT_VERSION {
            return Err(invalid(
                origin,
                format!("unsupported format version {}", format_version),
            ));
        }
        let package = header("package")?;
        let variant = header("variant")?;

        let mut entries = Vec::new();
        for (number, line) in lines.enumerate() {
            let mut fields = line.split('\t');
            let (Some(path), Some(hash), Some(size), None) =
                (fields.next(), fields.next(), fields.next(), fields.next())
            else {
                return Err(invalid(origin, format!("malformed entry on line {}", number + 4)));
            };
            let size = size
                .parse()
                .map_err(|e| invalid(origin, format!("bad size on line {}: {}", number + 4, e)))?;
            entries.push(ManifestEntry {
                path: path.to_string(),
                hash: hash.to_string(),
                size,
                kind: EntryKind::File,
            });
        }

        if entries.windows(2).any(|w| w[0].path >= w[1].path) {
            return Err(invalid(origin, "entries are not sorted by path".to_string()));
        }

        Ok(Self {
            format_version,
            package,
            variant,
            entries,
        })
    }

    pub fn read(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        Self::parse(&text, path)
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        atomic_write(path, self.to_text().as_bytes())?;
        Ok(())
    }
}

fn invalid(path: &Path, reason: String) -> Error {
    Error::InvalidManifest {
        path: path.to_path_buf(),
        reason,
    }
}
