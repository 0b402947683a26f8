// src/rule/registry.rs

//! Lookup and caching of package rules
//!
//! The registry only loads and validates; it never runs anything. File rules
//! are read on first use and cached for the rest of the invocation.

use crate::config::{BuildConfig, DEFAULT_REPO_PREFIX};
use crate::error::{Error, Result};
use crate::rule::{Rule, TomlRule};
use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info};

pub struct RuleRegistry {
    rules_dir: PathBuf,
    repo_prefix: String,
    rules: Mutex<HashMap<String, Arc<dyn Rule>>>,
}

impl RuleRegistry {
    /// Registry reading rule files from `rules_dir`
    pub fn new(rules_dir: impl Into<PathBuf>) -> Self {
        Self {
            rules_dir: rules_dir.into(),
            repo_prefix: DEFAULT_REPO_PREFIX.to_string(),
            rules: Mutex::new(HashMap::new()),
        }
    }

    pub fn from_config(config: &BuildConfig) -> Self {
        Self {
            repo_prefix: config.repo_prefix.clone(),
            ..Self::new(&config.rules_dir)
        }
    }

    pub fn rules_dir(&self) -> &Path {
        &self.rules_dir
    }

    /// Register an in-process rule, replacing any rule of the same name
    pub fn register(&self, rule: Arc<dyn Rule>) {
        debug!("Registering rule {}", rule.name());
        self.lock().insert(rule.name().to_string(), rule);
    }

    /// Path of the rule file for `name`
    pub fn rule_path(&self, name: &str) -> PathBuf {
        self.rules_dir.join(format!("{}.toml", name))
    }

    /// Look up the rule for a package, loading its file on first use
    pub fn load(&self, name: &str) -> Result<Arc<dyn Rule>> {
        if let Some(rule) = self.lock().get(name) {
            return Ok(Arc::clone(rule));
        }

        validate_name(name)?;
        let path = self.rule_path(name);
        if !path.exists() {
            return Err(Error::RuleLoad {
                name: name.to_string(),
                reason: format!("no rule file at {}", path.display()),
            });
        }

        info!("Loading rule: {}", name);
        let rule: Arc<dyn Rule> = Arc::new(TomlRule::load(name, &path, &self.repo_prefix)?);

        // A concurrent load of the same name may have won; keep the first.
        let mut rules = self.lock();
        let rule = rules.entry(name.to_string()).or_insert(rule);
        Ok(Arc::clone(rule))
    }

    /// Names of every rule available, registered or on disk
    pub fn available(&self) -> Result<Vec<String>> {
        let mut names: BTreeSet<String> = self.lock().keys().cloned().collect();

        if self.rules_dir.is_dir() {
            for entry in std::fs::read_dir(&self.rules_dir)? {
                let path = entry?.path();
                if path.extension().is_some_and(|ext| ext == "toml")
                    && let Some(stem) = path.file_stem().and_then(|s| s.to_str())
                {
                    names.insert(stem.to_string());
                }
            }
        }

        Ok(names.into_iter().collect())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Arc<dyn Rule>>> {
        self.rules.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn validate_name(name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && !name.starts_with('.')
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '+'));
    if valid {
        Ok(())
    } else {
        Err(Error::RuleLoad {
            name: name.to_string(),
            reason: "invalid package name".to_string(),
        })
    }
}
