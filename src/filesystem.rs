// src/filesystem.rs

//! Directory helpers shared by the executor, DevTree and archiver

use std::fs;
use std::io::{self, Write};
use std::os::unix::fs::{PermissionsExt, symlink};
use std::path::Path;
use walkdir::WalkDir;

/// Remove a file or directory tree, ignoring a missing one
pub fn remove_path(path: &Path) -> io::Result<()> {
    match fs::symlink_metadata(path) {
        Ok(meta) if meta.is_dir() => fs::remove_dir_all(path),
        Ok(_) => fs::remove_file(path),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

/// Replace `path` with an empty directory
pub fn recreate_dir(path: &Path) -> io::Result<()> {
    remove_path(path)?;
    fs::create_dir_all(path)
}

/// Copy the contents of `from` into `to`, preserving symlinks and modes
///
/// Existing files in `to` are overwritten; other existing content is kept.
pub fn copy_tree(from: &Path, to: &Path) -> io::Result<()> {
    fs::create_dir_all(to)?;

    for entry in WalkDir::new(from).min_depth(1).sort_by_file_name() {
        let entry = entry.map_err(io::Error::other)?;
        let rel = entry
            .path()
            .strip_prefix(from)
            .map_err(io::Error::other)?;
        let dest = to.join(rel);
        let file_type = entry.file_type();

        if file_type.is_dir() {
            fs::create_dir_all(&dest)?;
        } else if file_type.is_symlink() {
            let target = fs::read_link(entry.path())?;
            remove_path(&dest)?;
            symlink(target, &dest)?;
        } else {
            remove_path(&dest)?;
            fs::copy(entry.path(), &dest)?;
            let mode = entry.metadata().map_err(io::Error::other)?.permissions().mode();
            fs::set_permissions(&dest, fs::Permissions::from_mode(mode))?;
        }
    }

    Ok(())
}

/// Write `data` to `path` through a temporary file in the same directory
pub fn atomic_write(path: &Path, data: &[u8]) -> io::Result<()> {
    let dir = path
        .parent()
        .ok_or_else(|| io::Error::other(format!("{} has no parent", path.display())))?;
    fs::create_dir_all(dir)?;

    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(data)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}
