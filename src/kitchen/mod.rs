// src/kitchen/mod.rs

//! Build scheduling
//!
//! The [`Kitchen`] takes a resolved [`BuildPlan`] and cooks every target in
//! it. Targets run on a bounded `rayon` pool; a target is dispatched once all
//! of its dependencies are released, so independent subtrees build in
//! parallel while a dependent always sees finished dependencies.
//!
//! A failed target fails everything that transitively depends on it without
//! running it. Targets unrelated to the failure carry on. An interrupt stops
//! new targets from being dispatched and cancels the running ones.

mod cook;
mod devtree;

pub use devtree::DevTree;

use crate::archive::ReleaseArtifact;
use crate::config::BuildConfig;
use crate::error::{Error, Result};
use crate::graph::BuildPlan;
use crate::hash::sha256_file;
use crate::state::{BuildStateStore, DependencyInput, Stage, StageFingerprints, TargetState};
use crate::target::{BuildTarget, TargetId, TargetPaths};
use cook::Cook;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::mpsc;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{error, info, warn};

/// Cache overrides requested on the command line
#[derive(Debug, Clone, Copy, Default)]
pub struct BuildOptions {
    /// Rebuild the requested targets from fetch on
    pub force: bool,
    /// Rebuild every target in the plan from fetch on
    pub force_recursive: bool,
    /// Rebuild the requested targets from configure on
    pub reconfigure: bool,
}

/// Why a stage will run, or that it will not
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageStatus {
    /// Fingerprint matches and the output is present; skipped
    Cached,
    /// A force directive covers this stage
    Forced,
    /// No record, or the recorded fingerprint differs
    Changed,
    /// Recorded fingerprint matches but the output is gone
    Missing,
    /// An earlier stage of the same target runs
    Downstream,
}

impl StageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cached => "cached",
            Self::Forced => "forced",
            Self::Changed => "changed",
            Self::Missing => "missing",
            Self::Downstream => "downstream",
        }
    }
}

impl fmt::Display for StageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Final result of one target
#[derive(Debug)]
pub struct TargetOutcome {
    pub id: TargetId,
    pub state: TargetState,
    pub executed: Vec<Stage>,
    pub skipped: Vec<Stage>,
    pub error: Option<Error>,
    /// Failed dependency that kept this target from starting
    pub blocked_by: Option<TargetId>,
    pub fingerprints: Option<StageFingerprints>,
    pub release: Option<ReleaseArtifact>,
}

impl TargetOutcome {
    fn new(id: TargetId) -> Self {
        Self {
            id,
            state: TargetState::Pending,
            executed: Vec::new(),
            skipped: Vec::new(),
            error: None,
            blocked_by: None,
            fingerprints: None,
            release: None,
        }
    }

    fn blocked(id: TargetId, by: TargetId) -> Self {
        Self {
            state: TargetState::Failed,
            blocked_by: Some(by),
            ..Self::new(id)
        }
    }

    /// One-line reason for a failure
    pub fn failure(&self) -> Option<String> {
        match (&self.error, &self.blocked_by) {
            (Some(error), _) => Some(error.to_string()),
            (None, Some(dep)) => Some(format!("dependency {} failed", dep)),
            (None, None) if self.state == TargetState::Pending => Some("not started".to_string()),
            _ => None,
        }
    }
}

/// Outcome of every target in the plan, in build order
#[derive(Debug, Default)]
pub struct BuildReport {
    pub outcomes: Vec<TargetOutcome>,
    pub interrupted: bool,
}

impl BuildReport {
    /// True if every target was released
    pub fn success(&self) -> bool {
        !self.interrupted && self.outcomes.iter().all(|o| o.state == TargetState::Released)
    }

    pub fn get(&self, id: &TargetId) -> Option<&TargetOutcome> {
        self.outcomes.iter().find(|o| &o.id == id)
    }

    pub fn failed(&self) -> impl Iterator<Item = &TargetOutcome> {
        self.outcomes
            .iter()
            .filter(|o| o.state != TargetState::Released)
    }

    /// Number of stage callbacks run across all targets
    pub fn executed_stages(&self) -> usize {
        self.outcomes.iter().map(|o| o.executed.len()).sum()
    }
}

/// Cache status of every stage of one target, without running anything
#[derive(Debug, Clone)]
pub struct TargetPreview {
    pub id: TargetId,
    pub stages: Vec<(Stage, StageStatus)>,
}

pub struct Kitchen<'a> {
    config: &'a BuildConfig,
    plan: &'a BuildPlan,
    store: &'a BuildStateStore,
    devtree: DevTree,
    cancel: crate::sandbox::CancelToken,
    /// First stage treated as unsatisfied, per forced target
    force_from: HashMap<TargetId, Stage>,
    fetch_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    /// Packages whose source was fetched or verified during this run
    fetched: Mutex<HashSet<String>>,
}

impl<'a> Kitchen<'a> {
    pub fn new(
        config: &'a BuildConfig,
        plan: &'a BuildPlan,
        store: &'a BuildStateStore,
        options: BuildOptions,
        cancel: crate::sandbox::CancelToken,
    ) -> Self {
        Self {
            config,
            plan,
            store,
            devtree: DevTree::new(config),
            cancel,
            force_from: force_directives(plan, options),
            fetch_locks: Mutex::new(HashMap::new()),
            fetched: Mutex::new(HashSet::new()),
        }
    }

    pub fn config(&self) -> &BuildConfig {
        self.config
    }

    pub fn plan(&self) -> &BuildPlan {
        self.plan
    }

    pub fn devtree(&self) -> &DevTree {
        &self.devtree
    }

    /// First stage a force directive covers for `id`
    pub fn force_from(&self, id: &TargetId) -> Option<Stage> {
        self.force_from.get(id).copied()
    }

    /// Build every target in the plan
    pub fn cook_all(&self) -> Result<BuildReport> {
        let workers = self.config.workers.max(1);
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|i| format!("xyz-cook-{}", i))
            .build()
            .map_err(|e| Error::Config(format!("failed to start worker pool: {}", e)))?;
        info!("Cooking {} targets with {} worker(s)", self.plan.len(), workers);

        let mut states: HashMap<&TargetId, TargetState> = self
            .plan
            .order()
            .iter()
            .map(|id| (id, TargetState::Pending))
            .collect();
        let mut outcomes: HashMap<TargetId, TargetOutcome> = HashMap::new();
        let mut inputs: HashMap<TargetId, DependencyInput> = HashMap::new();
        let mut dispatched: HashSet<&TargetId> = HashSet::new();
        let mut running = 0usize;
        let mut interrupted = false;
        let (tx, rx) = mpsc::channel::<TargetOutcome>();

        pool.in_place_scope(|scope| {
            loop {
                interrupted |= self.cancel.is_cancelled();

                if !interrupted {
                    for id in self.plan.order() {
                        if dispatched.contains(id)
                            || states.get(id) != Some(&TargetState::Pending)
                            || !self
                                .plan
                                .dependencies(id)
                                .all(|dep| states.get(dep) == Some(&TargetState::Released))
                        {
                            continue;
                        }
                        let Some(target) = self.plan.get(id) else {
                            continue;
                        };
                        let deps: Vec<DependencyInput> = self
                            .plan
                            .dependencies(id)
                            .filter_map(|dep| inputs.get(dep).cloned())
                            .collect();

                        dispatched.insert(id);
                        running += 1;
                        let tx = tx.clone();
                        scope.spawn(move |_| {
                            let outcome = self.cook_guarded(target, &deps);
                            let _ = tx.send(outcome);
                        });
                    }
                }

                if running == 0 {
                    break;
                }
                let Ok(outcome) = rx.recv() else {
                    break;
                };
                running -= 1;

                let Some((&id, _)) = states.get_key_value(&outcome.id) else {
                    continue;
                };
                states.insert(id, outcome.state);

                if outcome.state == TargetState::Released {
                    if let (Some(fps), Some(release)) = (&outcome.fingerprints, &outcome.release) {
                        inputs.insert(
                            id.clone(),
                            DependencyInput {
                                id: id.clone(),
                                fingerprint: fps.release().to_string(),
                                archive_hash: release.archive_hash.clone(),
                            },
                        );
                    }
                } else {
                    if outcome.error.as_ref().is_some_and(Error::is_interrupt) {
                        interrupted = true;
                    }
                    if let Some(error) = &outcome.error {
                        error!("{}", error);
                    }
                    for dependent in self.plan.transitive_dependents(id) {
                        if let Some((&key, &state)) = states.get_key_value(&dependent)
                            && state == TargetState::Pending
                        {
                            warn!("Skipping {}: dependency {} failed", key, id);
                            states.insert(key, TargetState::Failed);
                            outcomes.insert(
                                key.clone(),
                                TargetOutcome::blocked(key.clone(), id.clone()),
                            );
                        }
                    }
                }

                outcomes.insert(id.clone(), outcome);
            }
        });

        if interrupted {
            warn!("Build interrupted");
        }

        let outcomes = self
            .plan
            .order()
            .iter()
            .map(|id| {
                outcomes
                    .remove(id)
                    .unwrap_or_else(|| TargetOutcome::new(id.clone()))
            })
            .collect();

        Ok(BuildReport {
            outcomes,
            interrupted,
        })
    }

    /// Cache status of every stage, assuming dependencies keep their releases
    pub fn preview(&self) -> Vec<TargetPreview> {
        let mut inputs: HashMap<&TargetId, DependencyInput> = HashMap::new();
        let mut previews = Vec::new();

        for id in self.plan.order() {
            let Some(target) = self.plan.get(id) else {
                continue;
            };
            let deps: Vec<DependencyInput> = self
                .plan
                .dependencies(id)
                .filter_map(|dep| inputs.get(dep).cloned())
                .collect();
            let paths = TargetPaths::new(self.config, id);
            let fingerprints = StageFingerprints::compute(target, self.config, &deps);

            let mut downstream = false;
            let stages = Stage::ALL
                .into_iter()
                .map(|stage| {
                    let status = if downstream {
                        StageStatus::Downstream
                    } else {
                        self.stage_status(target, &paths, stage, fingerprints.get(stage))
                    };
                    downstream |= status != StageStatus::Cached;
                    (stage, status)
                })
                .collect();

            inputs.insert(
                id,
                DependencyInput {
                    id: id.clone(),
                    fingerprint: fingerprints.release().to_string(),
                    archive_hash: sha256_file(&paths.archive).unwrap_or_default(),
                },
            );
            previews.push(TargetPreview {
                id: id.clone(),
                stages,
            });
        }

        previews
    }

    /// Whether `stage` of `target` may be skipped
    fn stage_status(&self, target: &BuildTarget, paths: &TargetPaths, stage: Stage, fingerprint: &str) -> StageStatus {
        if self.force_from(&target.id).is_some_and(|from| stage >= from) {
            return StageStatus::Forced;
        }
        if !self.store.is_current(&target.id, stage, fingerprint) {
            return StageStatus::Changed;
        }
        if !cook::output_exists(target, paths, stage) {
            return StageStatus::Missing;
        }
        StageStatus::Cached
    }

    fn cook_guarded(&self, target: &BuildTarget, deps: &[DependencyInput]) -> TargetOutcome {
        match catch_unwind(AssertUnwindSafe(|| Cook::new(self, target, deps).run())) {
            Ok(outcome) => outcome,
            Err(_) => {
                let mut outcome = TargetOutcome::new(target.id.clone());
                outcome.state = TargetState::Failed;
                outcome.error = Some(Error::State(format!("{}: build panicked", target.id)));
                outcome
            }
        }
    }

    /// Mutex serializing source work on one package
    fn fetch_lock(&self, package: &str) -> Arc<Mutex<()>> {
        let mut locks = self.fetch_locks.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(locks.entry(package.to_string()).or_default())
    }

    fn fetched(&self) -> MutexGuard<'_, HashSet<String>> {
        self.fetched.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// First forced stage of every target covered by a force directive
fn force_directives(plan: &BuildPlan, options: BuildOptions) -> HashMap<TargetId, Stage> {
    let mut from: HashMap<TargetId, Stage> = HashMap::new();

    if options.force_recursive {
        for id in plan.order() {
            force(&mut from, id, Stage::Fetch);
        }
    }
    for id in plan.requested() {
        if options.force {
            force(&mut from, id, Stage::Fetch);
        } else if options.reconfigure {
            force(&mut from, id, Stage::Configure);
        }
    }

    let forced: Vec<TargetId> = from.keys().cloned().collect();
    for id in &forced {
        for dependent in plan.transitive_dependents(id) {
            force(&mut from, &dependent, Stage::PrepareDependencies);
        }
    }

    from
}

fn force(from: &mut HashMap<TargetId, Stage>, id: &TargetId, stage: Stage) {
    from.entry(id.clone())
        .and_modify(|s| *s = (*s).min(stage))
        .or_insert(stage);
}
