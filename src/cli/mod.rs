// src/cli/mod.rs
//! CLI definitions for xyz
//!
//! This module contains the command-line interface definitions using clap.
//! The command implementations are in the `commands` module.
//!
//! Commands:
//! - `build` - Build packages and their dependencies
//! - `plan` - Show build order and cache status without building
//! - `clean` - Remove working directories (and releases with `--release`)
//! - `check-packages` - Detect conflicting files across releases
//!
//! `--clean`, `--clean-release` and `--check-packages` are also accepted as
//! top-level flags.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "xyz")]
#[command(author = "xyz Contributors")]
#[command(version)]
#[command(about = "Build relocatable, self-contained application bundles", long_about = None)]
pub struct Cli {
    /// Workspace root
    #[arg(long, global = true, default_value = ".")]
    pub root: PathBuf,

    /// Directory holding package rules (default: <root>/rules)
    #[arg(long, global = true)]
    pub rules: Option<PathBuf>,

    /// Log debug output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Remove build, install and devtree directories
    #[arg(long, conflicts_with_all = ["clean_release", "check_packages"])]
    pub clean: bool,

    /// Remove working directories and release artifacts
    #[arg(long, conflicts_with = "check_packages")]
    pub clean_release: bool,

    /// Check release manifests for conflicting files
    #[arg(long)]
    pub check_packages: bool,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Build packages and their dependencies
    Build {
        #[command(flatten)]
        targets: TargetArgs,

        /// Rebuild the named packages from scratch
        #[arg(short, long)]
        force: bool,

        /// Rebuild the named packages and every dependency from scratch
        #[arg(long)]
        force_recursive: bool,

        /// Rerun configure and later stages of the named packages
        #[arg(long)]
        reconfigure: bool,

        #[command(flatten)]
        platform: PlatformArgs,
    },

    /// Show the build order and which stages would run
    Plan {
        #[command(flatten)]
        targets: TargetArgs,

        #[command(flatten)]
        platform: PlatformArgs,
    },

    /// Remove working directories
    Clean {
        /// Also remove release artifacts
        #[arg(long)]
        release: bool,
    },

    /// Check release manifests for conflicting files
    CheckPackages,
}

#[derive(Args)]
pub struct TargetArgs {
    /// Packages to build, as NAME or NAME@VARIANT
    #[arg(required = true, value_name = "PKG[@VARIANT]")]
    pub packages: Vec<String>,

    /// Variant applied to packages named without one
    #[arg(long)]
    pub variant: Option<String>,
}

#[derive(Args)]
pub struct PlatformArgs {
    /// Parallel make jobs per target
    #[arg(short, long)]
    pub jobs: Option<usize>,

    /// Targets built concurrently
    #[arg(long)]
    pub workers: Option<usize>,

    /// Build platform triple (default: detected)
    #[arg(long)]
    pub build: Option<String>,

    /// Platform the packages run on (default: the build platform)
    #[arg(long)]
    pub host: Option<String>,
}
