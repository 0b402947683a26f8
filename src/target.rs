// src/target.rs

//! Build targets and variant expansion
//!
//! A [`TargetId`] names a package and, optionally, one of its variants; it is
//! written `gcc` or `gcc@arm-none-eabi`. Expanding a request against the rule
//! registry yields a [`BuildTarget`] carrying the rule, the variant
//! parameters and the dependency requests the rule declares for that variant.

use crate::config::{BuildConfig, PREFIX};
use crate::error::{Error, Result};
use crate::rule::{Rule, RuleRegistry};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

/// Variant parameters, ordered by name
pub type Params = BTreeMap<String, String>;

/// Label used for targets of packages without variants
pub const DEFAULT_VARIANT: &str = "default";

/// Identity of a build target: package name plus optional variant name
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TargetId {
    pub package: String,
    pub variant: Option<String>,
}

impl TargetId {
    pub fn new(package: impl Into<String>) -> Self {
        Self {
            package: package.into(),
            variant: None,
        }
    }

    pub fn with_variant(package: impl Into<String>, variant: impl Into<String>) -> Self {
        Self {
            package: package.into(),
            variant: Some(variant.into()),
        }
    }

    /// Variant name as written in manifests
    pub fn variant_label(&self) -> &str {
        self.variant.as_deref().unwrap_or(DEFAULT_VARIANT)
    }

    /// `<package>[-<variant>]`, the host-independent part of [`slug`](Self::slug)
    pub fn stem(&self) -> String {
        match &self.variant {
            Some(variant) => format!("{}-{}", self.package, variant),
            None => self.package.clone(),
        }
    }

    /// Directory name for this target's working and release files
    pub fn slug(&self, host: &str) -> String {
        format!("{}-{}", self.stem(), host)
    }
}

impl fmt::Display for TargetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.variant {
            Some(variant) => write!(f, "{}@{}", self.package, variant),
            None => f.write_str(&self.package),
        }
    }
}

impl FromStr for TargetId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let (package, variant) = match s.split_once('@') {
            Some((package, variant)) => (package, Some(variant)),
            None => (s, None),
        };

        if package.is_empty() || variant.is_some_and(str::is_empty) {
            return Err(Error::Config(format!("invalid target: '{}'", s)));
        }

        Ok(Self {
            package: package.to_string(),
            variant: variant.map(str::to_string),
        })
    }
}

/// A named parameterization of a rule
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Variant {
    /// `None` for the default variant of a package without variants
    pub name: Option<String>,
    pub params: Params,
}

impl Variant {
    pub fn named(name: impl Into<String>, params: Params) -> Self {
        Self {
            name: Some(name.into()),
            params,
        }
    }
}

/// A (package, variant) pair scheduled for building
#[derive(Clone)]
pub struct BuildTarget {
    pub id: TargetId,
    pub rule: Arc<dyn Rule>,
    pub variant: Variant,
    /// Direct dependencies, as declared by the rule for this variant
    pub dependencies: Vec<TargetId>,
}

impl fmt::Debug for BuildTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BuildTarget")
            .field("id", &self.id)
            .field("variant", &self.variant)
            .field("dependencies", &self.dependencies)
            .finish()
    }
}

/// Filesystem locations owned by one target
///
/// Only `source_dir` is shared: all variants of a package build from the
/// same checkout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetPaths {
    pub slug: String,
    pub source_dir: PathBuf,
    /// Stamp recording which source spec the checkout came from
    pub source_stamp: PathBuf,
    pub build_dir: PathBuf,
    pub install_dir: PathBuf,
    /// Install prefix inside `install_dir`; this is what gets archived
    pub prefix_dir: PathBuf,
    /// Host-specific half of the prefix
    pub eprefix_dir: PathBuf,
    /// This target's view of its dependencies
    pub devtree_dir: PathBuf,
    pub archive: PathBuf,
    pub manifest: PathBuf,
    pub log_dir: PathBuf,
}

impl TargetPaths {
    pub fn new(config: &BuildConfig, id: &TargetId) -> Self {
        let slug = id.slug(&config.host_triple);
        let install_dir = config.install_root().join(&slug);
        let prefix_dir = install_dir.join(PREFIX.trim_start_matches('/'));
        let release = config.release_root();

        Self {
            source_dir: config.source_root().join(&id.package),
            source_stamp: config.source_root().join(format!(".{}.stamp", id.package)),
            build_dir: config.build_root().join(&slug),
            eprefix_dir: prefix_dir.join(&config.host_triple),
            prefix_dir,
            install_dir,
            devtree_dir: config.devtree_root().join(&slug),
            archive: release.join(format!("{}.tar.gz", slug)),
            manifest: release.join(format!("{}.manifest", slug)),
            log_dir: config.build_root().join(".logs").join(&slug),
            slug,
        }
    }

    pub fn stage_log(&self, stage: crate::state::Stage) -> PathBuf {
        self.log_dir.join(format!("{}.log", stage))
    }
}

/// Resolve a target request to a concrete build target
///
/// A package without variants only accepts the default variant. A package
/// with variants requires one to be named.
pub fn expand(registry: &RuleRegistry, request: &TargetId) -> Result<BuildTarget> {
    let rule = registry.load(&request.package)?;
    let mut variants = rule.variants();
    let available: Vec<String> = variants.keys().cloned().collect();

    let variant = match (&request.variant, variants.is_empty()) {
        (None, true) => Variant::default(),
        (None, false) => {
            return Err(Error::AmbiguousVariant {
                package: request.package.clone(),
                available,
            });
        }
        (Some(name), _) => match variants.remove(name) {
            Some(params) => Variant::named(name.clone(), params),
            None => {
                return Err(Error::UnknownVariant {
                    package: request.package.clone(),
                    variant: name.clone(),
                    available,
                });
            }
        },
    };

    let dependencies = rule.dependencies(&variant);

    Ok(BuildTarget {
        id: request.clone(),
        rule,
        variant,
        dependencies,
    })
}
