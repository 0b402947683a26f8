// src/lib.rs

//! xyz build orchestrator
//!
//! Builds relocatable, self-contained application bundles from declarative
//! package rules, tracking build-time dependencies between packages and
//! reusing cached work across invocations.
//!
//! # Architecture
//!
//! - Rules: one TOML rule per package, loaded and validated by the registry
//! - Targets: a package plus one of its variants; the unit of caching
//! - Plan: the dependency-ordered set of targets for one invocation
//! - Fingerprints: per-stage content digests chained through the pipeline
//! - Kitchen: parallel scheduler driving each target through its stages
//! - Releases: normalized install trees archived with a sorted manifest

pub mod archive;
pub mod config;
pub mod conflicts;
mod error;
pub mod filesystem;
pub mod graph;
pub mod hash;
pub mod kitchen;
pub mod lock;
pub mod rule;
pub mod sandbox;
pub mod state;
pub mod target;

pub use config::BuildConfig;
pub use conflicts::{Conflict, ConflictReport, check_releases};
pub use error::{Error, Result};
pub use graph::{BuildPlan, resolve};
pub use kitchen::{BuildOptions, BuildReport, Kitchen, StageStatus, TargetOutcome};
pub use lock::WorkspaceLock;
pub use rule::{Rule, RuleRegistry, StageContext};
pub use state::{BuildStateStore, Stage, TargetState};
pub use target::{BuildTarget, TargetId, TargetPaths, Variant};
