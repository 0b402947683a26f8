// src/kitchen/cook.rs

//! One target's trip through the stage pipeline
//!
//! ```text
//! Pending -> SourceFetched -> DependenciesPrepared -> Configured
//!         -> Built -> Installed -> Packaged -> Released
//! ```
//!
//! Each arrow is one stage. A stage is skipped when its fingerprint matches
//! the stored record, no force directive covers it and its output is still
//! on disk. Once a stage runs, every later stage of the target runs too. The
//! record of a stage and of all later stages is dropped before the stage
//! starts and written back only when it succeeds, so a failed or interrupted
//! stage is never reported as complete. Build and install directories of a
//! failed target are left as they are.

use super::{Kitchen, StageStatus, TargetOutcome};
use crate::archive::{self, ReleaseArtifact, normalize_install_tree};
use crate::error::{Error, Result};
use crate::filesystem::{atomic_write, copy_tree, recreate_dir, remove_path};
use crate::rule::StageContext;
use crate::sandbox::ProcessRunner;
use crate::state::{DependencyInput, Stage, StageFingerprints, TargetState};
use crate::target::{BuildTarget, TargetPaths};
use std::fs;
use std::sync::PoisonError;
use tracing::{debug, error, info};

pub(super) struct Cook<'k, 'a> {
    kitchen: &'k Kitchen<'a>,
    target: &'k BuildTarget,
    paths: TargetPaths,
    fingerprints: StageFingerprints,
    runner: ProcessRunner,
}

/// True if the output a stage leaves behind is present
pub(super) fn output_exists(target: &BuildTarget, paths: &TargetPaths, stage: Stage) -> bool {
    match stage {
        Stage::Fetch => source_is_current(target, paths),
        Stage::PrepareDependencies => paths.devtree_dir.is_dir(),
        Stage::Configure | Stage::Build => paths.build_dir.is_dir(),
        Stage::Install => paths.install_dir.is_dir(),
        Stage::Package => paths.archive.is_file() && paths.manifest.is_file(),
    }
}

/// The checkout exists and came from the rule's current source definition
fn source_is_current(target: &BuildTarget, paths: &TargetPaths) -> bool {
    paths.source_dir.is_dir()
        && fs::read_to_string(&paths.source_stamp)
            .is_ok_and(|stamp| stamp.trim() == target.rule.source_digest())
}

impl<'k, 'a> Cook<'k, 'a> {
    pub(super) fn new(kitchen: &'k Kitchen<'a>, target: &'k BuildTarget, deps: &[DependencyInput]) -> Self {
        Self {
            paths: TargetPaths::new(kitchen.config, &target.id),
            fingerprints: StageFingerprints::compute(target, kitchen.config, deps),
            runner: ProcessRunner::new(kitchen.cancel.clone()),
            kitchen,
            target,
        }
    }

    pub(super) fn run(self) -> TargetOutcome {
        let id = &self.target.id;
        let mut outcome = TargetOutcome::new(id.clone());
        let mut downstream = false;
        info!("Cooking {}", id);

        for stage in Stage::ALL {
            if self.kitchen.cancel.is_cancelled() {
                return self.fail(outcome, Error::Interrupted {
                    target: id.to_string(),
                    stage,
                });
            }

            let fingerprint = self.fingerprints.get(stage);
            let status = if downstream {
                StageStatus::Downstream
            } else {
                self.kitchen
                    .stage_status(self.target, &self.paths, stage, fingerprint)
            };

            if status == StageStatus::Cached {
                debug!("{}: {} is cached", id, stage);
                outcome.skipped.push(stage);
                outcome.state = stage.completed_state();
                continue;
            }
            downstream = true;

            info!("{}: {} ({})", id, stage, status);
            let result = self
                .kitchen
                .store
                .invalidate_from(id, stage)
                .and_then(|_| self.execute(stage))
                .and_then(|_| self.kitchen.store.record(id, stage, fingerprint));

            if let Err(err) = result {
                return self.fail(outcome, self.stage_error(stage, err));
            }
            outcome.executed.push(stage);
            outcome.state = stage.completed_state();
        }

        match self.release() {
            Ok(release) => {
                info!("{} released", id);
                outcome.state = TargetState::Released;
                outcome.release = Some(release);
                outcome.fingerprints = Some(self.fingerprints);
                outcome
            }
            Err(err) => self.fail(outcome, self.stage_error(Stage::Package, err)),
        }
    }

    fn fail(&self, mut outcome: TargetOutcome, err: Error) -> TargetOutcome {
        error!("{} failed in state {}", self.target.id, outcome.state);
        outcome.state = TargetState::Failed;
        outcome.error = Some(err);
        outcome
    }

    fn context(&self, stage: Stage) -> StageContext<'_> {
        StageContext::new(
            &self.target.id,
            stage,
            &self.target.variant,
            &self.paths,
            self.kitchen.config,
            &self.runner,
        )
    }

    fn execute(&self, stage: Stage) -> Result<()> {
        remove_path(&self.paths.stage_log(stage))?;
        let rule = &self.target.rule;
        let ctx = self.context(stage);

        match stage {
            Stage::Fetch => self.fetch(&ctx),
            Stage::PrepareDependencies => self.prepare_dependencies(),
            Stage::Configure => {
                recreate_dir(&self.paths.build_dir)?;
                rule.configure(&ctx)
            }
            Stage::Build => {
                fs::create_dir_all(&self.paths.build_dir)?;
                rule.build(&ctx)
            }
            Stage::Install => {
                recreate_dir(&self.paths.install_dir)?;
                fs::create_dir_all(&self.paths.prefix_dir)?;
                if rule.is_group() {
                    copy_tree(&self.paths.devtree_dir, &self.paths.prefix_dir)?;
                }
                rule.install(&ctx)
            }
            Stage::Package => {
                fs::create_dir_all(&self.paths.prefix_dir)?;
                normalize_install_tree(&self.paths.prefix_dir)?;
                rule.package(&ctx)?;
                archive::package_target(&self.target.id, &self.paths).map(|_| ())
            }
        }
    }

    /// Fetch the package source unless a variant already did
    ///
    /// Variants share `source/<package>`, so source work is serialized per
    /// package. A forced fetch checks out again once per run.
    fn fetch(&self, ctx: &StageContext<'_>) -> Result<()> {
        let package = &self.target.id.package;
        let lock = self.kitchen.fetch_lock(package);
        let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);

        let forced = self.kitchen.force_from(&self.target.id) == Some(Stage::Fetch);
        if forced && !self.kitchen.fetched().contains(package) {
            debug!("Discarding source stamp of {}", package);
            remove_path(&self.paths.source_stamp)?;
        }

        if source_is_current(self.target, &self.paths) {
            debug!("Reusing checkout of {}", package);
        } else {
            remove_path(&self.paths.source_dir)?;
            remove_path(&self.paths.source_stamp)?;
            if let Some(parent) = self.paths.source_dir.parent() {
                fs::create_dir_all(parent)?;
            }

            self.target.rule.fetch(ctx)?;
            fs::create_dir_all(&self.paths.source_dir)?;
            atomic_write(&self.paths.source_stamp, self.target.rule.source_digest().as_bytes())?;
        }

        self.kitchen.fetched().insert(package.clone());
        Ok(())
    }

    /// Assemble this target's DevTree view from its released dependencies
    fn prepare_dependencies(&self) -> Result<()> {
        let slugs: Vec<String> = self
            .kitchen
            .plan
            .ordered_dependencies(&self.target.id)
            .iter()
            .map(|dep| dep.slug(&self.kitchen.config.host_triple))
            .collect();
        self.kitchen.devtree.assemble(&self.paths.devtree_dir, &slugs)
    }

    /// Read back the release and make it available to dependents
    fn release(&self) -> Result<ReleaseArtifact> {
        let release = archive::read_release(&self.paths)?.ok_or_else(|| {
            Error::StageExecution {
                target: self.target.id.to_string(),
                stage: Stage::Package,
                reason: "release archive is missing".to_string(),
            }
        })?;
        self.kitchen
            .devtree
            .publish(&self.paths.slug, &release.archive, &release.archive_hash)?;
        Ok(release)
    }

    /// Attach the target and stage to errors that lack them
    fn stage_error(&self, stage: Stage, err: Error) -> Error {
        let target = self.target.id.to_string();
        match err {
            Error::StageExecution { .. }
            | Error::Fetch { .. }
            | Error::Interrupted { .. }
            | Error::State(_) => err,
            other if stage == Stage::Fetch => Error::Fetch {
                target,
                reason: other.to_string(),
            },
            other => Error::StageExecution {
                target,
                stage,
                reason: other.to_string(),
            },
        }
    }
}
