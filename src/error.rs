// src/error.rs

//! Error types for the build orchestrator
//!
//! Graph-construction errors (`RuleLoad`, `AmbiguousVariant`, `UnknownVariant`,
//! `DependencyCycle`, `PathCollision`) abort an invocation before any stage
//! runs. Stage-level errors (`StageExecution`, `Fetch`, `Interrupted`) fail
//! only the affected target and whatever depends on it.

use crate::conflicts::Conflict;
use crate::state::Stage;
use std::path::PathBuf;
use thiserror::Error;

/// Result type used throughout the library
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// Rule file missing, malformed, or not satisfying the rule contract
    #[error("failed to load rule '{name}': {reason}")]
    RuleLoad { name: String, reason: String },

    /// A package declares variants but none was requested
    #[error("package '{package}' has variants ({}); choose one with {package}@<variant>", .available.join(", "))]
    AmbiguousVariant {
        package: String,
        available: Vec<String>,
    },

    /// The requested variant is not declared by the package
    #[error("package '{package}' has no variant '{variant}' (available: {})", display_available(.available))]
    UnknownVariant {
        package: String,
        variant: String,
        available: Vec<String>,
    },

    /// Dependency graph is not acyclic; members are listed in cycle order
    #[error("dependency cycle: {}", .members.join(" -> "))]
    DependencyCycle { members: Vec<String> },

    /// Two targets in one plan would own the same working directories
    #[error("targets '{first}' and '{second}' both map to directory name '{stem}'")]
    PathCollision {
        first: String,
        second: String,
        stem: String,
    },

    /// A stage callback failed or an external process exited non-zero
    #[error("{target}: {stage} failed: {reason}")]
    StageExecution {
        target: String,
        stage: Stage,
        reason: String,
    },

    /// Source retrieval failed
    #[error("{target}: fetching source failed: {reason}")]
    Fetch { target: String, reason: String },

    /// Released packages disagree on the content of shared paths
    #[error("{} conflicting path(s) across released packages", .0.len())]
    ManifestConflict(Vec<Conflict>),

    /// A manifest file could not be parsed
    #[error("invalid manifest {}: {reason}", .path.display())]
    InvalidManifest { path: PathBuf, reason: String },

    /// The stage was cancelled by a user interrupt
    #[error("{target}: {stage} interrupted")]
    Interrupted { target: String, stage: Stage },

    /// The build-state store could not be read or written
    #[error("build state error: {0}")]
    State(String),

    /// Another xyz process holds the workspace
    #[error("workspace is in use by another xyz process (lock: {})", .0.display())]
    WorkspaceBusy(PathBuf),

    /// Invalid configuration
    #[error("configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("directory walk failed: {0}")]
    Walk(#[from] walkdir::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

fn display_available(available: &[String]) -> String {
    if available.is_empty() {
        "none".to_string()
    } else {
        available.join(", ")
    }
}

impl Error {
    /// True for errors detected while building the target graph
    pub fn is_graph_error(&self) -> bool {
        matches!(
            self,
            Self::RuleLoad { .. }
                | Self::AmbiguousVariant { .. }
                | Self::UnknownVariant { .. }
                | Self::DependencyCycle { .. }
                | Self::PathCollision { .. }
        )
    }

    /// True if the error was caused by a user interrupt
    pub fn is_interrupt(&self) -> bool {
        matches!(self, Self::Interrupted { .. })
    }
}
