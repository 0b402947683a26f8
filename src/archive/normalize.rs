// src/archive/normalize.rs

//! Install tree normalization
//!
//! Some files produced by `make install` break relocation or differ between
//! otherwise identical builds:
//! - libtool `.la` archives record absolute build paths
//! - `share/info/dir` and the info manuals shipped by every GNU package
//!   collide across packages with different content
//! - man pages generated by help2man and friends carry a "generated by"
//!   first line that varies with the build host
//!
//! These are removed or rewritten before the manifest is computed.

use crate::error::Result;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::debug;
use walkdir::WalkDir;

/// Info files installed by many packages with divergent content
pub const SHARED_INFO_FILES: &[&str] = &["dir", "standards.info", "configure.info", "bfd.info"];

/// What normalization changed
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct NormalizeReport {
    pub removed: Vec<PathBuf>,
    pub rewritten: Vec<PathBuf>,
}

/// Normalize the install prefix of a target in place
pub fn normalize_install_tree(prefix_dir: &Path) -> Result<NormalizeReport> {
    let mut report = NormalizeReport::default();
    if !prefix_dir.exists() {
        return Ok(report);
    }

    for name in SHARED_INFO_FILES {
        let path = prefix_dir.join("share").join("info").join(name);
        if path.symlink_metadata().is_ok() {
            fs::remove_file(&path)?;
            report.removed.push(path);
        }
    }

    let mut libtool_archives = Vec::new();
    for entry in WalkDir::new(prefix_dir).sort_by_file_name() {
        let entry = entry?;
        if entry.file_type().is_file() && entry.path().extension().is_some_and(|e| e == "la") {
            libtool_archives.push(entry.into_path());
        }
    }
    for path in libtool_archives {
        fs::remove_file(&path)?;
        report.removed.push(path);
    }

    let man_dir = prefix_dir.join("share").join("man");
    if man_dir.is_dir() {
        for entry in WalkDir::new(&man_dir).sort_by_file_name() {
            let entry = entry?;
            if entry.file_type().is_file()
                && !is_compressed(entry.path())
                && strip_generated_header(entry.path())?
            {
                report.rewritten.push(entry.into_path());
            }
        }
    }

    debug!(
        "Normalized {}: {} removed, {} rewritten",
        prefix_dir.display(),
        report.removed.len(),
        report.rewritten.len()
    );
    Ok(report)
}

fn is_compressed(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| matches!(e, "gz" | "bz2" | "xz" | "zst"))
}

/// Drop the first line of a file if it mentions "generated"
pub fn strip_generated_header(path: &Path) -> io::Result<bool> {
    let content = fs::read(path)?;
    let first_line_end = content
        .iter()
        .position(|b| *b == b'\n')
        .map_or(content.len(), |i| i + 1);
    let first_line = &content[..first_line_end];

    if !first_line.windows(b"generated".len()).any(|w| w == b"generated") {
        return Ok(false);
    }

    rewrite(path, &content[first_line_end..])?;
    Ok(true)
}

/// Replace absolute paths in a linker script's GROUP lines with file names
///
/// glibc installs `libc.so` as a linker script naming its real libraries by
/// absolute path; inside a relocatable DevTree those paths must be resolved
/// through the library search path instead.
pub fn fixup_linker_script(path: &Path) -> io::Result<bool> {
    let content = fs::read_to_string(path)?;
    let mut changed = false;
    let mut output = String::with_capacity(content.len());

    for line in content.split_inclusive('\n') {
        if line.starts_with("GROUP") {
            let fixed: Vec<&str> = line
                .split_whitespace()
                .map(|part| match part.strip_prefix('/') {
                    Some(rest) => rest.rsplit('/').next().unwrap_or(part),
                    None => part,
                })
                .collect();
            let fixed = fixed.join(" ") + "\n";
            changed |= fixed != line;
            output.push_str(&fixed);
        } else {
            output.push_str(line);
        }
    }

    if changed {
        rewrite(path, output.as_bytes())?;
    }
    Ok(changed)
}

/// Rewrite a file keeping its permissions, even if it is read-only
fn rewrite(path: &Path, data: &[u8]) -> io::Result<()> {
    let permissions = fs::metadata(path)?.permissions();
    fs::remove_file(path)?;
    fs::write(path, data)?;
    fs::set_permissions(path, permissions)
}
