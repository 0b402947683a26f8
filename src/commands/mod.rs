// src/commands/mod.rs
//! Command handlers for the xyz CLI

mod build;
mod check;
mod clean;
mod plan;

pub use build::cmd_build;
pub use check::cmd_check_packages;
pub use clean::cmd_clean;
pub use plan::cmd_plan;

use crate::cli::{PlatformArgs, TargetArgs};
use anyhow::{Context, Result};
use std::path::Path;
use xyz::{BuildConfig, TargetId};

/// Load the workspace configuration, then apply command-line overrides
pub fn load_config(root: &Path, rules: Option<&Path>, platform: Option<&PlatformArgs>) -> Result<BuildConfig> {
    let mut config = BuildConfig::from_workspace(root)
        .with_context(|| format!("Failed to load workspace {}", root.display()))?;

    if let Some(rules) = rules {
        config.rules_dir = std::path::absolute(rules)
            .with_context(|| format!("Invalid rules directory {}", rules.display()))?;
    }

    if let Some(platform) = platform {
        if let Some(build) = &platform.build {
            config.set_build_triple(build.clone())?;
        }
        if let Some(host) = &platform.host {
            config.host_triple = host.clone();
        }
        if let Some(jobs) = platform.jobs {
            config.jobs = jobs.max(1);
        }
        if let Some(workers) = platform.workers {
            config.workers = workers.max(1);
        }
    }

    Ok(config)
}

/// Target requests named on the command line
///
/// `--variant` applies to every package named without an explicit variant.
pub fn parse_targets(args: &TargetArgs) -> Result<Vec<TargetId>> {
    args.packages
        .iter()
        .map(|spec| -> Result<TargetId> {
            let mut id: TargetId = spec.parse()?;
            if id.variant.is_none() {
                id.variant = args.variant.clone();
            }
            Ok(id)
        })
        .collect()
}
