// src/rule/format.rs

//! Rule file format definitions
//!
//! Rules are TOML files named after the package they build:
//!
//! ```toml
//! [package]
//! name = "binutils"
//! summary = "GNU binary utilities"
//!
//! [dependencies]
//! requires = ["texinfo"]
//!
//! [variants.arm-none-eabi]
//! target = "arm-none-eabi"
//!
//! [configure]
//! style = "cross"
//! args = ["--disable-nls", "--disable-werror"]
//!
//! [install]
//! remove = ["lib/libiberty.a"]
//! ```
//!
//! All command strings and arguments support `%(name)s` substitution of stage
//! variables and variant parameters.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A complete rule file
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RuleFile {
    pub package: PackageSection,

    #[serde(default)]
    pub source: SourceSection,

    #[serde(default)]
    pub dependencies: DependencySection,

    /// Variant name -> parameters
    #[serde(default)]
    pub variants: BTreeMap<String, BTreeMap<String, String>>,

    /// Required unless the package is a group
    #[serde(default)]
    pub configure: Option<ConfigureSection>,

    #[serde(default)]
    pub build: CommandSection,

    #[serde(default)]
    pub install: InstallSection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PackageSection {
    pub name: String,

    #[serde(default)]
    pub summary: Option<String>,

    /// Meta-package bundling its dependencies
    #[serde(default)]
    pub group: bool,
}

/// Where the package source comes from
///
/// With no keys set the source is cloned from the workspace repository
/// prefix followed by the package name.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SourceSection {
    /// Explicit git repository URL
    #[serde(default)]
    pub git: Option<String>,

    /// Revision to check out after cloning
    #[serde(default)]
    pub revision: Option<String>,

    /// Local directory, relative to the workspace root, copied as the source
    #[serde(default)]
    pub path: Option<String>,

    /// The package has no source of its own
    #[serde(default)]
    pub none: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DependencySection {
    /// `package` or `package@variant`; variant parameters are substituted
    #[serde(default)]
    pub requires: Vec<String>,
}

/// How the configure stage invokes the package's configure script
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConfigureStyle {
    /// Application for the host: prefix, exec-prefix, host and build
    #[default]
    HostApp,
    /// Static library for the host: as `host-app` plus `--disable-shared`
    HostLib,
    /// Cross tool for the variant's `target` parameter
    Cross,
    /// `configure` with only the rule's own arguments
    Plain,
    /// Nothing to configure
    None,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigureSection {
    #[serde(default)]
    pub style: ConfigureStyle,

    /// Extra arguments appended to the generated configure command
    #[serde(default)]
    pub args: Vec<String>,

    /// Shell command replacing the generated configure command
    #[serde(default)]
    pub command: Option<String>,

    #[serde(default)]
    pub environment: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CommandSection {
    /// Shell command; defaults to `make %(jobs)s`
    #[serde(default)]
    pub command: Option<String>,

    #[serde(default)]
    pub environment: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InstallSection {
    /// Shell command; defaults to `make DESTDIR=%(install_dir_abs)s install`
    #[serde(default)]
    pub command: Option<String>,

    #[serde(default)]
    pub environment: BTreeMap<String, String>,

    /// Glob patterns, relative to the install prefix, removed after install
    #[serde(default)]
    pub remove: Vec<String>,

    /// Linker scripts, relative to the install prefix, whose GROUP lines
    /// must not reference absolute paths
    #[serde(default)]
    pub fixup_linker_scripts: Vec<String>,
}

pub const DEFAULT_BUILD_COMMAND: &str = "make %(jobs)s";
pub const DEFAULT_INSTALL_COMMAND: &str = "make DESTDIR=%(install_dir_abs)s install";

impl RuleFile {
    /// Repository the source is cloned from, if it comes from git
    pub fn git_url(&self, repo_prefix: &str) -> Option<String> {
        if self.package.group || self.source.none || self.source.path.is_some() {
            return None;
        }
        Some(
            self.source
                .git
                .clone()
                .unwrap_or_else(|| format!("{}{}", repo_prefix, self.package.name)),
        )
    }

    pub fn build_command(&self) -> &str {
        self.build.command.as_deref().unwrap_or(DEFAULT_BUILD_COMMAND)
    }

    pub fn install_command(&self) -> &str {
        self.install
            .command
            .as_deref()
            .unwrap_or(DEFAULT_INSTALL_COMMAND)
    }
}
