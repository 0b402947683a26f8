// src/rule/toml_rule.rs

//! Rules defined by TOML files

use crate::archive::normalize::fixup_linker_script;
use crate::error::{Error, Result};
use crate::filesystem::{copy_tree, remove_path};
use crate::hash::sha256;
use crate::rule::format::{ConfigureStyle, RuleFile};
use crate::rule::parser::{dependency_requests, parse_rule_file};
use crate::rule::{Rule, StageContext};
use crate::state::Stage;
use crate::target::{Params, TargetId, Variant};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, info};

/// A [`Rule`] backed by a parsed rule file
#[derive(Debug, Clone)]
pub struct TomlRule {
    file: RuleFile,
    repo_prefix: String,
    digests: BTreeMap<Stage, String>,
}

impl TomlRule {
    pub fn new(file: RuleFile, repo_prefix: &str) -> Result<Self> {
        let digests = stage_digests(&file, repo_prefix).map_err(|e| Error::RuleLoad {
            name: file.package.name.clone(),
            reason: format!("cannot serialize rule: {}", e),
        })?;

        Ok(Self {
            file,
            repo_prefix: repo_prefix.to_string(),
            digests,
        })
    }

    /// Load `<rules_dir>/<name>.toml`
    pub fn load(name: &str, path: &Path, repo_prefix: &str) -> Result<Self> {
        let file = parse_rule_file(name, path)?;
        Self::new(file, repo_prefix)
    }

    pub fn file(&self) -> &RuleFile {
        &self.file
    }

    fn configure_args(&self, ctx: &StageContext<'_>, style: ConfigureStyle) -> Result<Vec<String>> {
        let standard = || {
            vec![
                ctx.substitute("--prefix=%(prefix)s"),
                ctx.substitute("--exec-prefix=%(eprefix)s"),
                ctx.substitute("--host=%(host)s"),
                ctx.substitute("--build=%(build)s"),
            ]
        };

        let args = match style {
            ConfigureStyle::None | ConfigureStyle::Plain => Vec::new(),
            ConfigureStyle::HostApp => standard(),
            ConfigureStyle::HostLib => {
                let mut args = standard();
                args.push("--disable-shared".to_string());
                args
            }
            ConfigureStyle::Cross => {
                let target = ctx
                    .var("target")
                    .ok_or_else(|| ctx.failure("cross configure needs a 'target' variant parameter"))?;
                let mut args = standard();
                args.push(format!("--program-prefix={}-", target));
                args.push(format!("--target={}", target));
                args
            }
        };
        Ok(args)
    }
}

/// Per-stage digests over the sections each stage reads
fn stage_digests(
    file: &RuleFile,
    repo_prefix: &str,
) -> std::result::Result<BTreeMap<Stage, String>, serde_json::Error> {
    fn digest<T: Serialize>(value: &T) -> std::result::Result<String, serde_json::Error> {
        Ok(sha256(serde_json::to_string(value)?.as_bytes()))
    }

    let mut digests = BTreeMap::new();
    digests.insert(
        Stage::Fetch,
        digest(&(&file.package, &file.source, file.git_url(repo_prefix)))?,
    );
    digests.insert(Stage::PrepareDependencies, digest(&file.dependencies)?);
    digests.insert(Stage::Configure, digest(&file.configure)?);
    // Effective commands only: spelling out a default must not change a digest
    digests.insert(
        Stage::Build,
        digest(&(file.build_command(), &file.build.environment))?,
    );
    let install = &file.install;
    digests.insert(
        Stage::Install,
        digest(&(
            file.install_command(),
            &install.environment,
            &install.remove,
            &install.fixup_linker_scripts,
        ))?,
    );
    digests.insert(Stage::Package, digest(&file.package)?);
    Ok(digests)
}

fn substitute_env(ctx: &StageContext<'_>, env: &BTreeMap<String, String>) -> BTreeMap<String, String> {
    env.iter()
        .map(|(key, value)| (key.clone(), ctx.substitute(value)))
        .collect()
}

fn git_checkout(ctx: &StageContext<'_>, url: &str, revision: Option<&str>) -> Result<()> {
    let source_dir = ctx.paths.source_dir.display().to_string();
    let parent = ctx
        .paths
        .source_dir
        .parent()
        .ok_or_else(|| ctx.failure("source directory has no parent"))?;

    info!("Cloning {} into {}", url, source_dir);
    ctx.run("git", &["clone", "--quiet", url, source_dir.as_str()], parent)?;

    if let Some(revision) = revision {
        info!("Checking out {} in {}", revision, source_dir);
        ctx.run(
            "git",
            &["-C", source_dir.as_str(), "checkout", "--quiet", revision],
            parent,
        )?;
    }
    Ok(())
}

impl Rule for TomlRule {
    fn name(&self) -> &str {
        &self.file.package.name
    }

    fn stage_digest(&self, stage: Stage) -> String {
        self.digests.get(&stage).cloned().unwrap_or_default()
    }

    fn variants(&self) -> BTreeMap<String, Params> {
        self.file.variants.clone()
    }

    fn dependencies(&self, variant: &Variant) -> Vec<TargetId> {
        dependency_requests(&self.file.dependencies.requires, &variant.params)
            .into_iter()
            .filter_map(|(_, id)| id.ok())
            .collect()
    }

    fn is_group(&self) -> bool {
        self.file.package.group
    }

    fn fetch(&self, ctx: &StageContext<'_>) -> Result<()> {
        if let Some(path) = &self.file.source.path {
            let from = ctx.config.root.join(ctx.substitute(path));
            debug!("Copying source from {}", from.display());
            return copy_tree(&from, &ctx.paths.source_dir)
                .map_err(|e| ctx.failure(format!("copying {}: {}", from.display(), e)));
        }

        match self.file.git_url(&self.repo_prefix) {
            Some(url) => git_checkout(ctx, &url, self.file.source.revision.as_deref()),
            None => Ok(()),
        }
    }

    fn configure(&self, ctx: &StageContext<'_>) -> Result<()> {
        if self.is_group() {
            return Ok(());
        }
        let Some(section) = &self.file.configure else {
            return Ok(());
        };

        let mut env = substitute_env(ctx, &section.environment);
        let build_dir = &ctx.paths.build_dir;

        if let Some(command) = &section.command {
            ctx.shell(&ctx.substitute(command), build_dir, &env)?;
            return Ok(());
        }
        if section.style == ConfigureStyle::None {
            return Ok(());
        }

        let mut args = self.configure_args(ctx, section.style)?;
        args.extend(section.args.iter().map(|arg| ctx.substitute(arg)));

        // Cross tools are built against the build platform's headers
        if section.style == ConfigureStyle::Cross {
            env.entry("CPPFLAGS".to_string()).or_default();
        }

        let script = ctx.paths.source_dir.join("configure").display().to_string();
        ctx.run_with_env(&script, &args, build_dir, &env)?;
        Ok(())
    }

    fn build(&self, ctx: &StageContext<'_>) -> Result<()> {
        if self.is_group() {
            return Ok(());
        }
        let env = substitute_env(ctx, &self.file.build.environment);
        ctx.shell(
            &ctx.substitute(self.file.build_command()),
            &ctx.paths.build_dir,
            &env,
        )?;
        Ok(())
    }

    fn install(&self, ctx: &StageContext<'_>) -> Result<()> {
        if self.is_group() {
            return Ok(());
        }
        let section = &self.file.install;
        let env = substitute_env(ctx, &section.environment);
        ctx.shell(
            &ctx.substitute(self.file.install_command()),
            &ctx.paths.build_dir,
            &env,
        )?;

        for pattern in &section.remove {
            let pattern = ctx.paths.prefix_dir.join(ctx.substitute(pattern));
            let pattern = pattern.display().to_string();
            let matches = glob::glob(&pattern)
                .map_err(|e| ctx.failure(format!("invalid remove pattern {}: {}", pattern, e)))?;
            for path in matches.flatten() {
                debug!("Removing {}", path.display());
                remove_path(&path)
                    .map_err(|e| ctx.failure(format!("removing {}: {}", path.display(), e)))?;
            }
        }

        for script in &section.fixup_linker_scripts {
            let path = ctx.paths.prefix_dir.join(ctx.substitute(script));
            fixup_linker_script(&path)
                .map_err(|e| ctx.failure(format!("fixing up {}: {}", path.display(), e)))?;
        }

        Ok(())
    }
}
