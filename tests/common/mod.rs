// tests/common/mod.rs

//! Shared test utilities and helpers for integration tests.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::fs;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use xyz::rule::substitute;
use xyz::sandbox::CancelToken;
use xyz::target::Params;
use xyz::{
    BuildConfig, BuildOptions, BuildReport, BuildStateStore, Result, Rule, RuleRegistry,
    Stage, StageContext, TargetId, TargetPaths, Variant, resolve,
};

pub const TRIPLE: &str = "x86_64-unknown-linux-gnu";

/// Every stage callback run, as (target, stage)
pub type Journal = Arc<Mutex<Vec<(String, Stage)>>>;

/// In-memory rule that records its stage calls and installs fixed files
pub struct FakeRule {
    name: String,
    variants: BTreeMap<String, Params>,
    dependencies: Vec<String>,
    files: Vec<(String, String)>,
    salts: BTreeMap<Stage, String>,
    fail_at: Option<Stage>,
    hang_at: Option<Stage>,
    group: bool,
    journal: Journal,
}

impl FakeRule {
    pub fn new(name: &str, journal: &Journal) -> Self {
        Self {
            name: name.to_string(),
            variants: BTreeMap::new(),
            dependencies: Vec::new(),
            files: Vec::new(),
            salts: BTreeMap::new(),
            fail_at: None,
            hang_at: None,
            group: false,
            journal: Arc::clone(journal),
        }
    }

    pub fn variant(mut self, name: &str, params: &[(&str, &str)]) -> Self {
        let params = params
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        self.variants.insert(name.to_string(), params);
        self
    }

    /// Dependency request; `%(param)s` is replaced with variant parameters
    pub fn depends_on(mut self, spec: &str) -> Self {
        self.dependencies.push(spec.to_string());
        self
    }

    /// File installed under the prefix; path and contents are substituted
    pub fn file(mut self, path: &str, contents: &str) -> Self {
        self.files.push((path.to_string(), contents.to_string()));
        self
    }

    /// Change the rule as far as `stage` is concerned
    pub fn revised(mut self, stage: Stage, revision: &str) -> Self {
        self.salts.insert(stage, revision.to_string());
        self
    }

    pub fn fail_at(mut self, stage: Stage) -> Self {
        self.fail_at = Some(stage);
        self
    }

    /// Run a long `sleep` at `stage`, so the stage can be interrupted
    pub fn hang_at(mut self, stage: Stage) -> Self {
        self.hang_at = Some(stage);
        self
    }

    pub fn group(mut self) -> Self {
        self.group = true;
        self
    }

    fn enter(&self, ctx: &StageContext<'_>) -> Result<()> {
        self.journal
            .lock()
            .unwrap()
            .push((ctx.target.to_string(), ctx.stage));
        if self.fail_at == Some(ctx.stage) {
            return Err(ctx.failure("simulated failure"));
        }
        if self.hang_at == Some(ctx.stage) {
            ctx.shell("echo started; sleep 30", &ctx.config.root, &BTreeMap::new())?;
        }
        Ok(())
    }
}

impl Rule for FakeRule {
    fn name(&self) -> &str {
        &self.name
    }

    fn stage_digest(&self, stage: Stage) -> String {
        let salt = self.salts.get(&stage).map(String::as_str).unwrap_or("");
        match stage {
            Stage::Install => format!("{}:{}:{}:{:?}", self.name, stage, salt, self.files),
            _ => format!("{}:{}:{}", self.name, stage, salt),
        }
    }

    fn variants(&self) -> BTreeMap<String, Params> {
        self.variants.clone()
    }

    fn dependencies(&self, variant: &Variant) -> Vec<TargetId> {
        self.dependencies
            .iter()
            .map(|spec| substitute(spec, &variant.params).parse().unwrap())
            .collect()
    }

    fn is_group(&self) -> bool {
        self.group
    }

    fn fetch(&self, ctx: &StageContext<'_>) -> Result<()> {
        self.enter(ctx)?;
        fs::create_dir_all(&ctx.paths.source_dir)?;
        fs::write(ctx.paths.source_dir.join("VERSION"), "1.0\n")?;
        Ok(())
    }

    fn configure(&self, ctx: &StageContext<'_>) -> Result<()> {
        self.enter(ctx)
    }

    fn build(&self, ctx: &StageContext<'_>) -> Result<()> {
        self.enter(ctx)
    }

    fn install(&self, ctx: &StageContext<'_>) -> Result<()> {
        self.enter(ctx)?;
        for (path, contents) in &self.files {
            let path = ctx.paths.prefix_dir.join(ctx.substitute(path));
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(&path, ctx.substitute(contents))?;
        }
        Ok(())
    }

    fn package(&self, ctx: &StageContext<'_>) -> Result<()> {
        self.enter(ctx)
    }
}

/// A throwaway workspace with an in-memory rule registry
pub struct Workspace {
    pub dir: TempDir,
    pub config: BuildConfig,
    pub registry: RuleRegistry,
    pub journal: Journal,
}

impl Workspace {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let config = BuildConfig::with_platform(dir.path(), TRIPLE, TRIPLE);
        let registry = RuleRegistry::new(&config.rules_dir);
        Self {
            dir,
            config,
            registry,
            journal: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn with_workers(workers: usize) -> Self {
        let mut workspace = Self::new();
        workspace.config.workers = workers;
        workspace
    }

    /// A new rule sharing this workspace's journal
    pub fn rule(&self, name: &str) -> FakeRule {
        FakeRule::new(name, &self.journal)
    }

    /// Register (or replace) a rule
    pub fn register(&self, rule: FakeRule) {
        self.registry.register(Arc::new(rule));
    }

    pub fn build(&self, requests: &[&str]) -> BuildReport {
        self.build_with(requests, BuildOptions::default())
    }

    pub fn build_with(&self, requests: &[&str], options: BuildOptions) -> BuildReport {
        let requests: Vec<TargetId> = requests.iter().map(|r| r.parse().unwrap()).collect();
        let plan = resolve(&self.registry, &requests).unwrap();
        let store = BuildStateStore::open(self.config.state_file()).unwrap();
        xyz::Kitchen::new(&self.config, &plan, &store, options, CancelToken::new())
            .cook_all()
            .unwrap()
    }

    /// Drain the journal
    pub fn take_journal(&self) -> Vec<(String, Stage)> {
        std::mem::take(&mut *self.journal.lock().unwrap())
    }

    /// Stages run for one target since the journal was last drained
    pub fn stages_run(journal: &[(String, Stage)], target: &str) -> Vec<Stage> {
        journal
            .iter()
            .filter(|(t, _)| t == target)
            .map(|(_, stage)| *stage)
            .collect()
    }

    pub fn paths(&self, target: &str) -> TargetPaths {
        TargetPaths::new(&self.config, &target.parse::<TargetId>().unwrap())
    }
}
