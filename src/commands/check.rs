// src/commands/check.rs

//! Check-packages command - find files released with differing content

use anyhow::{Context, Result};
use xyz::{BuildConfig, Error, check_releases};

/// Cross-reference every release manifest
///
/// Every conflicting path is printed; any conflict fails the command.
pub fn cmd_check_packages(config: &BuildConfig) -> Result<()> {
    let release_dir = config.release_root();
    let report = check_releases(&release_dir)
        .with_context(|| format!("Failed to read manifests in {}", release_dir.display()))?;

    if report.is_clean() {
        println!(
            "[OK] No conflicts among {} release(s)",
            report.releases.len()
        );
        return Ok(());
    }

    println!("Conflicting files:");
    for conflict in &report.conflicts {
        println!("  {}", conflict);
    }
    Err(Error::ManifestConflict(report.conflicts).into())
}
