// src/config.rs

//! Workspace configuration
//!
//! A [`BuildConfig`] names every directory the engine reads or writes and the
//! platform triples it builds for. It is created once per invocation and
//! passed by reference to each component; nothing in the engine consults the
//! process working directory.
//!
//! An optional `xyz.toml` at the workspace root supplies defaults:
//!
//! ```toml
//! [build]
//! host = "x86_64-unknown-linux-gnu"
//! jobs = 8
//! workers = 2
//!
//! [source]
//! repo_prefix = "git://github.com/BreakawayConsulting/"
//! ```

use crate::error::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Install prefix baked into every package
pub const PREFIX: &str = "/noprefix";

/// Default location of package source repositories
pub const DEFAULT_REPO_PREFIX: &str = "git://github.com/BreakawayConsulting/";

/// Name of the optional workspace configuration file
pub const CONFIG_FILE: &str = "xyz.toml";

#[derive(Debug, Clone)]
pub struct BuildConfig {
    /// Workspace root (absolute)
    pub root: PathBuf,
    /// Directory holding `<package>.toml` rule files
    pub rules_dir: PathBuf,
    /// Platform the build runs on
    pub build_triple: String,
    /// Platform the produced packages run on
    pub host_triple: String,
    /// Parallelism passed to make as `-jN`
    pub jobs: usize,
    /// Number of targets built concurrently
    pub workers: usize,
    /// Prefix prepended to a package name to form its repository URL
    pub repo_prefix: String,
}

impl BuildConfig {
    /// Configuration for a workspace with explicit platform triples
    pub fn with_platform(
        root: impl Into<PathBuf>,
        build_triple: impl Into<String>,
        host_triple: impl Into<String>,
    ) -> Self {
        let root = root.into();
        Self {
            rules_dir: root.join("rules"),
            root,
            build_triple: build_triple.into(),
            host_triple: host_triple.into(),
            jobs: default_jobs(),
            workers: 1,
            repo_prefix: DEFAULT_REPO_PREFIX.to_string(),
        }
    }

    /// Configuration for a workspace on the detected build platform
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let build = detect_build_triple()?;
        Ok(Self::with_platform(root, build.clone(), build))
    }

    /// Load the workspace at `root`, applying `xyz.toml` if present
    pub fn from_workspace(root: &Path) -> Result<Self> {
        let root = std::path::absolute(root)?;
        let mut config = Self::new(&root)?;

        let file = root.join(CONFIG_FILE);
        if file.exists() {
            debug!("Loading workspace configuration from {}", file.display());
            let content = std::fs::read_to_string(&file)?;
            config.apply_file(&content)?;
        }

        Ok(config)
    }

    /// Apply the contents of an `xyz.toml` file
    pub fn apply_file(&mut self, content: &str) -> Result<()> {
        let file: ConfigFile = toml::from_str(content)
            .map_err(|e| Error::Config(format!("invalid {}: {}", CONFIG_FILE, e)))?;

        if let Some(build) = file.build.build {
            self.set_build_triple(build)?;
        }
        if let Some(host) = file.build.host {
            self.host_triple = host;
        }
        if let Some(jobs) = file.build.jobs {
            self.jobs = jobs.max(1);
        }
        if let Some(workers) = file.build.workers {
            self.workers = workers.max(1);
        }
        if let Some(prefix) = file.source.repo_prefix {
            self.repo_prefix = prefix;
        }
        if let Some(rules) = file.paths.rules {
            self.rules_dir = self.root.join(rules);
        }
        Ok(())
    }

    /// Override the build triple
    ///
    /// A triple that differs from the detected platform is accepted with a
    /// warning; the host triple follows the build triple unless it was set.
    pub fn set_build_triple(&mut self, build: String) -> Result<()> {
        validate_triple(&build)?;
        if let Ok(detected) = detect_build_triple()
            && detected != build
        {
            warn!(
                "Provided build {} does not match detected build {}",
                build, detected
            );
        }
        if self.host_triple == self.build_triple {
            self.host_triple = build.clone();
        }
        self.build_triple = build;
        Ok(())
    }

    pub fn source_root(&self) -> PathBuf {
        self.root.join("source")
    }

    pub fn build_root(&self) -> PathBuf {
        self.root.join("build")
    }

    pub fn install_root(&self) -> PathBuf {
        self.root.join("install")
    }

    pub fn devtree_root(&self) -> PathBuf {
        self.root.join("devtree")
    }

    pub fn release_root(&self) -> PathBuf {
        self.root.join("release")
    }

    /// Private engine state (build-state store, workspace lock)
    pub fn state_dir(&self) -> PathBuf {
        self.root.join(".xyz")
    }

    pub fn state_file(&self) -> PathBuf {
        self.state_dir().join("build-state.json")
    }

    pub fn lock_file(&self) -> PathBuf {
        self.state_dir().join("lock")
    }

    /// Working directories removed by `clean`
    pub fn scratch_dirs(&self) -> Vec<PathBuf> {
        vec![self.build_root(), self.install_root(), self.devtree_root()]
    }
}

fn default_jobs() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

/// Detect the triple of the platform we are running on
pub fn detect_build_triple() -> Result<String> {
    let arch = std::env::consts::ARCH;
    let triple = match std::env::consts::OS {
        "linux" => format!("{}-unknown-linux-gnu", arch),
        "macos" => format!("{}-apple-darwin", arch),
        other => {
            return Err(Error::Config(format!(
                "unsupported build platform: {}-{}",
                arch, other
            )));
        }
    };
    Ok(triple)
}

/// Only darwin and linux-gnu build platforms have known linker flags
fn validate_triple(triple: &str) -> Result<()> {
    if triple.ends_with("-darwin") || triple.ends_with("-linux-gnu") {
        Ok(())
    } else {
        Err(Error::Config(format!(
            "can't determine linker flags for build platform {}",
            triple
        )))
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigFile {
    #[serde(default)]
    build: BuildSection,
    #[serde(default)]
    source: SourceSection,
    #[serde(default)]
    paths: PathsSection,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct BuildSection {
    build: Option<String>,
    host: Option<String>,
    jobs: Option<usize>,
    workers: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct SourceSection {
    repo_prefix: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct PathsSection {
    rules: Option<String>,
}
