// src/rule/mod.rs

//! Package rules and the context their stage callbacks run in
//!
//! A rule describes how to build one package: where its source comes from,
//! which packages it needs at build time, which variants it has, and what to
//! run for each stage. Rules are normally TOML files in the workspace's
//! `rules/` directory (see [`format`]), but anything implementing [`Rule`]
//! can be registered with the [`RuleRegistry`].
//!
//! Stage callbacks never spawn processes themselves; they go through
//! [`StageContext::run`] and [`StageContext::shell`], which apply the
//! sandboxed environment, capture output into the stage log and turn
//! failures into the right error for the stage.

pub mod format;
pub mod parser;
mod registry;
mod toml_rule;

pub use format::RuleFile;
pub use parser::{parse_rule, parse_rule_file, validate_rule};
pub use registry::RuleRegistry;
pub use toml_rule::TomlRule;

use crate::config::{BuildConfig, PREFIX};
use crate::error::{Error, Result};
use crate::sandbox::{ProcessExit, ProcessOutput, ProcessRunner, SandboxEnv};
use crate::state::Stage;
use crate::target::{Params, TargetId, TargetPaths, Variant};
use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::Path;
use tracing::{debug, warn};

/// Contract every package rule satisfies
pub trait Rule: Send + Sync {
    /// Package name; matches the rule file's stem
    fn name(&self) -> &str;

    /// Digest of the part of the rule that affects `stage`
    fn stage_digest(&self, stage: Stage) -> String;

    /// Digest identifying the source checkout
    ///
    /// Variants of a package share one checkout, which is reused while this
    /// digest is unchanged.
    fn source_digest(&self) -> String {
        self.stage_digest(Stage::Fetch)
    }

    /// Declared variants and their parameters; empty for a single default
    fn variants(&self) -> BTreeMap<String, Params> {
        BTreeMap::new()
    }

    /// Build-time dependencies of the given variant
    fn dependencies(&self, _variant: &Variant) -> Vec<TargetId> {
        Vec::new()
    }

    /// Meta-packages bundle their dependencies instead of building anything
    fn is_group(&self) -> bool {
        false
    }

    fn fetch(&self, ctx: &StageContext<'_>) -> Result<()>;
    fn configure(&self, ctx: &StageContext<'_>) -> Result<()>;
    fn build(&self, ctx: &StageContext<'_>) -> Result<()>;
    fn install(&self, ctx: &StageContext<'_>) -> Result<()>;

    /// Final adjustments to the install tree before it is archived
    fn package(&self, _ctx: &StageContext<'_>) -> Result<()> {
        Ok(())
    }
}

/// Everything a stage callback may use
pub struct StageContext<'a> {
    pub target: &'a TargetId,
    pub stage: Stage,
    pub variant: &'a Variant,
    pub paths: &'a TargetPaths,
    pub config: &'a BuildConfig,
    env: SandboxEnv,
    vars: BTreeMap<String, String>,
    runner: &'a ProcessRunner,
}

impl<'a> StageContext<'a> {
    pub fn new(
        target: &'a TargetId,
        stage: Stage,
        variant: &'a Variant,
        paths: &'a TargetPaths,
        config: &'a BuildConfig,
        runner: &'a ProcessRunner,
    ) -> Self {
        Self {
            env: SandboxEnv::new(&paths.devtree_dir, &config.build_triple, &config.host_triple),
            vars: stage_variables(config, target, variant, paths),
            target,
            stage,
            variant,
            paths,
            config,
            runner,
        }
    }

    pub fn env(&self) -> &SandboxEnv {
        &self.env
    }

    pub fn vars(&self) -> &BTreeMap<String, String> {
        &self.vars
    }

    pub fn var(&self, name: &str) -> Option<&str> {
        self.vars.get(name).map(String::as_str)
    }

    /// Replace `%(name)s` patterns with stage variables
    pub fn substitute(&self, template: &str) -> String {
        substitute(template, &self.vars)
    }

    /// Run a program under the sandbox
    pub fn run<S: AsRef<str>>(&self, program: &str, args: &[S], cwd: &Path) -> Result<ProcessOutput> {
        self.run_with_env(program, args, cwd, &BTreeMap::new())
    }

    /// Run a program under the sandbox with extra environment variables
    pub fn run_with_env<S: AsRef<str>>(
        &self,
        program: &str,
        args: &[S],
        cwd: &Path,
        overrides: &BTreeMap<String, String>,
    ) -> Result<ProcessOutput> {
        let command_line = std::iter::once(program)
            .chain(args.iter().map(AsRef::as_ref))
            .collect::<Vec<_>>()
            .join(" ");
        debug!("{}: {}", self.target, command_line);

        let env = self.env.with_overrides(overrides);
        let log = self.open_log();
        if let Some(mut file) = log.as_ref()
            && let Err(e) = writeln!(file, "$ {}", command_line)
        {
            warn!("Could not write stage log: {}", e);
        }

        let exit = self
            .runner
            .run_logged(program, args, cwd, &env, log)
            .map_err(|e| self.failure(format!("failed to run `{}`: {}", command_line, e)))?;

        match exit {
            ProcessExit::Cancelled => Err(Error::Interrupted {
                target: self.target.to_string(),
                stage: self.stage,
            }),
            ProcessExit::Finished(output) => {
                if output.success() {
                    Ok(output)
                } else {
                    Err(self.failure(format!(
                        "`{}` {}\n{}",
                        command_line,
                        output.describe_exit(),
                        output.stderr_tail(20)
                    )))
                }
            }
        }
    }

    /// Run a shell command line under the sandbox
    pub fn shell(
        &self,
        command: &str,
        cwd: &Path,
        overrides: &BTreeMap<String, String>,
    ) -> Result<ProcessOutput> {
        self.run_with_env("sh", &["-c", command], cwd, overrides)
    }

    /// Error describing a failure of this stage
    ///
    /// Failures while fetching are source-retrieval failures; everything
    /// else is a stage execution failure.
    pub fn failure(&self, reason: impl Into<String>) -> Error {
        let target = self.target.to_string();
        match self.stage {
            Stage::Fetch => Error::Fetch {
                target,
                reason: reason.into(),
            },
            stage => Error::StageExecution {
                target,
                stage,
                reason: reason.into(),
            },
        }
    }

    /// This stage's log, opened for appending; a log that cannot be opened
    /// does not fail the stage
    fn open_log(&self) -> Option<File> {
        let path = self.paths.stage_log(self.stage);
        let result = path
            .parent()
            .map_or(Ok(()), fs::create_dir_all)
            .and_then(|_| OpenOptions::new().create(true).append(true).open(&path));
        match result {
            Ok(file) => Some(file),
            Err(e) => {
                warn!("Could not open stage log {}: {}", path.display(), e);
                None
            }
        }
    }
}

/// Replace `%(name)s` patterns with values from `vars`
pub fn substitute(template: &str, vars: &BTreeMap<String, String>) -> String {
    let mut result = template.to_string();
    for (key, value) in vars {
        result = result.replace(&format!("%({})s", key), value);
    }
    result
}

/// Variables available to rule commands
pub fn stage_variables(
    config: &BuildConfig,
    target: &TargetId,
    variant: &Variant,
    paths: &TargetPaths,
) -> BTreeMap<String, String> {
    let mut vars = variant.params.clone();
    let devtree = paths.devtree_dir.display().to_string();
    let mut set = |key: &str, value: String| {
        vars.insert(key.to_string(), value);
    };

    set("pkg_name", target.package.clone());
    set("variant_name", paths.slug.clone());
    set("slug", paths.slug.clone());
    set("host", config.host_triple.clone());
    set("build", config.build_triple.clone());
    set("prefix", PREFIX.to_string());
    set("eprefix", format!("{}/{}", PREFIX, config.host_triple));
    set("root_dir_abs", config.root.display().to_string());
    set("source_dir", paths.source_dir.display().to_string());
    set("build_dir", paths.build_dir.display().to_string());
    set("install_dir", paths.install_dir.display().to_string());
    set("install_dir_abs", paths.install_dir.display().to_string());
    set("prefix_dir", paths.prefix_dir.display().to_string());
    set("eprefix_dir", paths.eprefix_dir.display().to_string());
    set("devtree_dir", devtree.clone());
    set("devtree_dir_abs", devtree.clone());
    set("jobs", format!("-j{}", config.jobs));
    set(
        "standard_ldflags",
        crate::sandbox::standard_ldflags(&config.build_triple, &config.host_triple, &devtree),
    );
    set(
        "standard_cppflags",
        crate::sandbox::standard_cppflags(&config.host_triple, &devtree),
    );
    set("repo_name", format!("{}{}", config.repo_prefix, target.package));

    vars
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::CancelToken;
    use tempfile::TempDir;

    fn setup(root: &Path) -> (BuildConfig, TargetId, Variant, TargetPaths) {
        let config = BuildConfig::with_platform(root, "x86_64-unknown-linux-gnu", "x86_64-unknown-linux-gnu");
        let id = TargetId::with_variant("binutils", "arm");
        let mut params = Params::new();
        params.insert("target".to_string(), "arm-none-eabi".to_string());
        let variant = Variant::named("arm", params);
        let paths = TargetPaths::new(&config, &id);
        (config, id, variant, paths)
    }

    #[test]
    fn test_substitute_stage_variables() {
        let dir = TempDir::new().unwrap();
        let (config, id, variant, paths) = setup(dir.path());
        let runner = ProcessRunner::new(CancelToken::new());
        let ctx = StageContext::new(&id, Stage::Configure, &variant, &paths, &config, &runner);

        assert_eq!(
            ctx.substitute("--program-prefix=%(target)s- --host=%(host)s %(jobs)s"),
            format!("--program-prefix=arm-none-eabi- --host=x86_64-unknown-linux-gnu -j{}", config.jobs)
        );
        assert_eq!(ctx.var("eprefix"), Some("/noprefix/x86_64-unknown-linux-gnu"));
        assert_eq!(
            ctx.var("repo_name"),
            Some("git://github.com/BreakawayConsulting/binutils")
        );
        assert_eq!(ctx.substitute("%(unknown)s"), "%(unknown)s");
    }

    #[test]
    fn test_failed_command_is_stage_error() {
        let dir = TempDir::new().unwrap();
        let (config, id, variant, paths) = setup(dir.path());
        let runner = ProcessRunner::new(CancelToken::new());
        let ctx = StageContext::new(&id, Stage::Build, &variant, &paths, &config, &runner);

        let err = ctx
            .shell("echo boom >&2; exit 2", dir.path(), &BTreeMap::new())
            .unwrap_err();
        match err {
            Error::StageExecution { target, stage, reason } => {
                assert_eq!(target, "binutils@arm");
                assert_eq!(stage, Stage::Build);
                assert!(reason.contains("exit status 2"));
                assert!(reason.contains("boom"));
            }
            other => panic!("unexpected error: {other}"),
        }

        let log = fs::read_to_string(paths.stage_log(Stage::Build)).unwrap();
        assert!(log.starts_with("$ sh -c echo boom"));
        assert!(log.contains("boom"));
    }

    #[test]
    fn test_failed_fetch_is_fetch_error() {
        let dir = TempDir::new().unwrap();
        let (config, id, variant, paths) = setup(dir.path());
        let runner = ProcessRunner::new(CancelToken::new());
        let ctx = StageContext::new(&id, Stage::Fetch, &variant, &paths, &config, &runner);

        let err = ctx.run("false", &[] as &[&str], dir.path()).unwrap_err();
        assert!(matches!(err, Error::Fetch { .. }));
    }

    #[test]
    fn test_cancelled_run_is_interrupt() {
        let dir = TempDir::new().unwrap();
        let (config, id, variant, paths) = setup(dir.path());
        let token = CancelToken::new();
        token.cancel();
        let runner = ProcessRunner::new(token);
        let ctx = StageContext::new(&id, Stage::Install, &variant, &paths, &config, &runner);

        let err = ctx.shell("true", dir.path(), &BTreeMap::new()).unwrap_err();
        assert!(err.is_interrupt());
    }

    #[test]
    fn test_shell_sees_overrides() {
        let dir = TempDir::new().unwrap();
        let (config, id, variant, paths) = setup(dir.path());
        let runner = ProcessRunner::new(CancelToken::new());
        let ctx = StageContext::new(&id, Stage::Configure, &variant, &paths, &config, &runner);

        let mut env = BTreeMap::new();
        env.insert("CFLAGS".to_string(), "-O2".to_string());
        let output = ctx.shell("printf %s \"$CFLAGS\"", dir.path(), &env).unwrap();
        assert_eq!(output.stdout, b"-O2");
    }
}
