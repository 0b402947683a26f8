// src/state/fingerprint.rs

//! Per-stage fingerprints
//!
//! Each stage's fingerprint chains the one before it:
//!
//! ```text
//! fetch     = H(rule fetch digest, target id, variant params, build, host)
//! prepare   = H(fetch, rule dependency digest, [(dep id, dep package fp, dep archive sha256)])
//! configure = H(prepare, rule configure digest)
//! build     = H(configure, rule build digest)
//! install   = H(build, rule install digest)
//! package   = H(install, rule package digest)
//! ```
//!
//! A change anywhere upstream therefore changes every later fingerprint of
//! the target, and through the dependency inputs every fingerprint of its
//! dependents from `prepare-dependencies` on.

use super::Stage;
use crate::config::BuildConfig;
use crate::hash::Fingerprinter;
use crate::target::{BuildTarget, TargetId};
use std::collections::BTreeMap;

/// What a dependent sees of one released dependency
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct DependencyInput {
    pub id: TargetId,
    /// The dependency's `package` fingerprint
    pub fingerprint: String,
    /// SHA-256 of the dependency's release archive
    pub archive_hash: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageFingerprints {
    stages: BTreeMap<Stage, String>,
}

impl StageFingerprints {
    /// Fingerprints of every stage of `target`
    ///
    /// `dependencies` must describe the target's direct dependencies; their
    /// order does not matter.
    pub fn compute(target: &BuildTarget, config: &BuildConfig, dependencies: &[DependencyInput]) -> Self {
        let rule = &target.rule;
        let mut stages = BTreeMap::new();

        let mut fp = Fingerprinter::new("stage:fetch");
        fp.field("rule", rule.stage_digest(Stage::Fetch))
            .field("target", target.id.to_string())
            .map("params", &target.variant.params)
            .field("build", &config.build_triple)
            .field("host", &config.host_triple);
        let mut previous = fp.finish();
        stages.insert(Stage::Fetch, previous.clone());

        let mut deps: Vec<&DependencyInput> = dependencies.iter().collect();
        deps.sort();

        for stage in Stage::PrepareDependencies.and_later() {
            let mut fp = Fingerprinter::new(&format!("stage:{}", stage));
            fp.field("previous", &previous)
                .field("rule", rule.stage_digest(stage));
            if stage == Stage::PrepareDependencies {
                for dep in &deps {
                    fp.field("dep.id", dep.id.to_string())
                        .field("dep.fingerprint", &dep.fingerprint)
                        .field("dep.archive", &dep.archive_hash);
                }
                fp.field("dep.count", (deps.len() as u64).to_le_bytes());
            }
            previous = fp.finish();
            stages.insert(stage, previous.clone());
        }

        Self { stages }
    }

    pub fn get(&self, stage: Stage) -> &str {
        self.stages.get(&stage).map_or("", String::as_str)
    }

    /// Fingerprint of the finished release; what dependents record
    pub fn release(&self) -> &str {
        self.get(Stage::Package)
    }

    pub fn iter(&self) -> impl Iterator<Item = (Stage, &str)> {
        self.stages.iter().map(|(stage, fp)| (*stage, fp.as_str()))
    }
}
