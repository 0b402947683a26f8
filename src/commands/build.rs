// src/commands/build.rs

//! Build command - run the pipeline for packages and their dependencies

use anyhow::{Context, Result};
use std::time::Instant;
use tracing::info;
use xyz::kitchen::{BuildOptions, Kitchen};
use xyz::sandbox::{CancelToken, install_interrupt_handler};
use xyz::{BuildConfig, BuildStateStore, RuleRegistry, TargetId, TargetState, WorkspaceLock, resolve};

/// Build the requested targets
///
/// Rule, variant and cycle errors abort before anything runs. Otherwise
/// every target that can be built is built, and the command fails if any
/// target did not reach `released`.
pub fn cmd_build(config: &BuildConfig, requests: &[TargetId], options: BuildOptions) -> Result<()> {
    let _lock = WorkspaceLock::acquire(&config.lock_file())
        .with_context(|| format!("Cannot build in {}", config.root.display()))?;
    install_interrupt_handler()?;

    let registry = RuleRegistry::from_config(config);
    let plan = resolve(&registry, requests).context("Failed to resolve build plan")?;

    println!(
        "Building {} target(s) for {} on {}",
        plan.len(),
        config.host_triple,
        config.build_triple
    );

    let store = BuildStateStore::open(config.state_file())?;
    let kitchen = Kitchen::new(config, &plan, &store, options, CancelToken::from_signals());

    let started = Instant::now();
    let report = kitchen.cook_all()?;
    info!("Build finished in {:.1}s", started.elapsed().as_secs_f64());

    println!();
    for outcome in &report.outcomes {
        match outcome.state {
            TargetState::Released => {
                let archive = outcome
                    .release
                    .as_ref()
                    .map(|r| r.archive.display().to_string())
                    .unwrap_or_default();
                println!(
                    "[OK] {} ({} run, {} cached) {}",
                    outcome.id,
                    outcome.executed.len(),
                    outcome.skipped.len(),
                    archive
                );
            }
            state => {
                println!(
                    "[FAILED] {} ({}): {}",
                    outcome.id,
                    state,
                    outcome.failure().unwrap_or_default()
                );
            }
        }
    }

    if report.interrupted {
        anyhow::bail!("Build interrupted");
    }
    let failed = report.failed().count();
    if failed > 0 {
        anyhow::bail!("{} of {} target(s) failed", failed, report.outcomes.len());
    }

    println!("\n[OK] {} target(s) released", report.outcomes.len());
    Ok(())
}
