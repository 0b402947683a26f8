// src/kitchen/devtree.rs

//! Shared development tree
//!
//! Released dependencies are made available to their dependents here:
//!
//! ```text
//! devtree/
//!   store/<slug>/           unpacked release of one target
//!   store/.<slug>.sha256    archive hash the store entry came from
//!   <slug>/                 the view one target builds against
//! ```
//!
//! A release is unpacked into a private staging directory first; only the
//! final swap into `store/<slug>` happens under the tree mutex. A view is the
//! union of the store entries of a target's transitive dependencies, copied
//! in build order while the mutex is held, so a target always sees a
//! consistent set of dependencies even while other targets are publishing.

use crate::config::BuildConfig;
use crate::error::Result;
use crate::filesystem::{atomic_write, copy_tree, recreate_dir, remove_path};
use flate2::read::GzDecoder;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{debug, info};

pub struct DevTree {
    store_root: PathBuf,
    lock: Mutex<()>,
}

impl DevTree {
    pub fn new(config: &BuildConfig) -> Self {
        Self {
            store_root: config.devtree_root().join("store"),
            lock: Mutex::new(()),
        }
    }

    /// Unpacked release of the target with this slug
    pub fn store_dir(&self, slug: &str) -> PathBuf {
        self.store_root.join(slug)
    }

    fn hash_file(&self, slug: &str) -> PathBuf {
        self.store_root.join(format!(".{}.sha256", slug))
    }

    /// True if the store holds exactly this archive of `slug`
    pub fn is_published(&self, slug: &str, archive_hash: &str) -> bool {
        self.store_dir(slug).is_dir()
            && fs::read_to_string(self.hash_file(slug)).is_ok_and(|h| h.trim() == archive_hash)
    }

    /// Unpack a release archive into the store, replacing any older copy
    ///
    /// Returns `false` if the store already held this archive.
    pub fn publish(&self, slug: &str, archive: &Path, archive_hash: &str) -> Result<bool> {
        if self.is_published(slug, archive_hash) {
            debug!("DevTree already holds {}", slug);
            return Ok(false);
        }

        fs::create_dir_all(&self.store_root)?;
        let staging = tempfile::Builder::new()
            .prefix(".staging-")
            .tempdir_in(&self.store_root)?;
        let mut unpacker = tar::Archive::new(GzDecoder::new(File::open(archive)?));
        unpacker.set_preserve_permissions(true);
        unpacker.unpack(staging.path())?;

        {
            let _guard = self.lock();
            let dest = self.store_dir(slug);
            remove_path(&dest)?;
            fs::rename(staging.path(), &dest)?;
            atomic_write(&self.hash_file(slug), archive_hash.as_bytes())?;
        }

        info!("Installed {} into the DevTree", slug);
        Ok(true)
    }

    /// Rebuild the view at `view` from the store entries of `slugs`, in order
    ///
    /// Later entries overwrite earlier ones where they overlap.
    pub fn assemble(&self, view: &Path, slugs: &[String]) -> Result<()> {
        let _guard = self.lock();
        recreate_dir(view)?;
        for slug in slugs {
            let entry = self.store_dir(slug);
            if !entry.is_dir() {
                return Err(std::io::Error::other(format!(
                    "{} is missing from the DevTree store",
                    slug
                ))
                .into());
            }
            copy_tree(&entry, view)?;
        }
        debug!("Assembled {} from {} entries", view.display(), slugs.len());
        Ok(())
    }

    fn lock(&self) -> MutexGuard<'_, ()> {
        self.lock.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
