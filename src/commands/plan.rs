// src/commands/plan.rs

//! Plan command - show build order and cache status

use anyhow::{Context, Result};
use xyz::kitchen::{BuildOptions, Kitchen, StageStatus};
use xyz::sandbox::CancelToken;
use xyz::{BuildConfig, BuildStateStore, RuleRegistry, TargetId, resolve};

/// Print the build order and, per target, which stages would run
///
/// Nothing is built. Dependencies are assumed to keep their current
/// releases.
pub fn cmd_plan(config: &BuildConfig, requests: &[TargetId]) -> Result<()> {
    let registry = RuleRegistry::from_config(config);
    let plan = resolve(&registry, requests).context("Failed to resolve build plan")?;
    let store = BuildStateStore::open(config.state_file())?;
    let kitchen = Kitchen::new(config, &plan, &store, BuildOptions::default(), CancelToken::new());

    println!("Build order ({} targets):", plan.len());
    for (position, preview) in kitchen.preview().iter().enumerate() {
        let deps: Vec<String> = plan.dependencies(&preview.id).map(ToString::to_string).collect();
        let pending = preview
            .stages
            .iter()
            .filter(|(_, status)| *status != StageStatus::Cached)
            .count();

        print!("{:>3}. {}", position + 1, preview.id);
        if !deps.is_empty() {
            print!(" (needs {})", deps.join(", "));
        }
        println!();

        if pending == 0 {
            println!("       up to date");
            continue;
        }
        for (stage, status) in &preview.stages {
            println!("       {:<22} {}", stage.as_str(), status);
        }
    }

    Ok(())
}
