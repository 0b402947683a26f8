// src/lock.rs

//! Exclusive ownership of a workspace
//!
//! `build` and `clean` both hold this lock for their whole run, so a clean
//! can never remove directories a build is writing to and two builds never
//! share a DevTree or build-state store.
//!
//! # Example
//!
//! ```ignore
//! let _lock = WorkspaceLock::acquire(&config.lock_file())?;
//! // ... the workspace is ours until the lock is dropped ...
//! ```

use crate::error::{Error, Result};
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Held `flock(LOCK_EX)` on the workspace lock file
pub struct WorkspaceLock {
    /// Kept open to maintain the lock
    #[allow(dead_code)]
    file: File,
    path: PathBuf,
}

impl WorkspaceLock {
    /// Take the lock without waiting
    ///
    /// Fails with [`Error::WorkspaceBusy`] if another process holds it.
    pub fn acquire(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(path)?;

        match file.try_lock_exclusive() {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                return Err(Error::WorkspaceBusy(path.to_path_buf()));
            }
            Err(e) => return Err(e.into()),
        }

        // Informational only; the flock is what excludes other processes.
        file.set_len(0)?;
        writeln!(file, "{}", std::process::id())?;

        debug!("Acquired workspace lock {}", path.display());
        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// PID written by the current holder, if any
    pub fn holder_pid(path: &Path) -> Option<u32> {
        fs::read_to_string(path)
            .ok()
            .and_then(|s| s.trim().parse().ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_second_acquire_is_busy() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(".xyz/lock");

        let lock = WorkspaceLock::acquire(&path).unwrap();
        assert_eq!(WorkspaceLock::holder_pid(&path), Some(std::process::id()));

        let err = WorkspaceLock::acquire(&path).err().unwrap();
        assert!(matches!(err, Error::WorkspaceBusy(ref p) if p == &path));

        drop(lock);
        assert!(WorkspaceLock::acquire(&path).is_ok());
    }
}
