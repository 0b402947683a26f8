// src/commands/clean.rs

//! Clean command - remove working directories

use anyhow::{Context, Result};
use tracing::info;
use xyz::filesystem::remove_path;
use xyz::{BuildConfig, WorkspaceLock};

/// Remove build, install and devtree directories and the build state
///
/// With `release`, release artifacts go too. Sources are always kept.
pub fn cmd_clean(config: &BuildConfig, release: bool) -> Result<()> {
    let _lock = WorkspaceLock::acquire(&config.lock_file())
        .with_context(|| format!("Cannot clean {}", config.root.display()))?;

    let mut targets = config.scratch_dirs();
    targets.push(config.state_file());
    if release {
        targets.push(config.release_root());
    }

    for path in targets {
        if path.exists() {
            info!("Removing {}", path.display());
            remove_path(&path).with_context(|| format!("Failed to remove {}", path.display()))?;
            println!("Removed {}", path.display());
        }
    }

    println!("[OK] Workspace cleaned");
    Ok(())
}
