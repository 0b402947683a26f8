// src/graph.rs

//! Target dependency graph and build order
//!
//! Resolution walks the declared dependencies of every requested target
//! depth-first, expanding each dependency request into a build target as it
//! goes. A request met again while it is still on the DFS stack closes a
//! cycle, which is reported with every member in order. A target reached
//! along several paths (a diamond) is expanded once and shared. No two
//! targets of a plan may map to the same directory name.
//!
//! # Example
//!
//! ```ignore
//! let plan = resolve(&registry, &["arm-toolchain".parse()?])?;
//! for id in plan.order() {
//!     // dependencies always come before their dependents
//! }
//! ```

use crate::error::{Error, Result};
use crate::rule::RuleRegistry;
use crate::target::{BuildTarget, TargetId, expand};
use std::collections::{BTreeSet, HashMap, VecDeque};
use tracing::debug;

/// Fully expanded, topologically ordered set of targets for one invocation
#[derive(Debug, Default)]
pub struct BuildPlan {
    targets: HashMap<TargetId, BuildTarget>,
    /// Dependency-first order
    order: Vec<TargetId>,
    requested: Vec<TargetId>,
    /// target -> targets it depends on
    edges: HashMap<TargetId, BTreeSet<TargetId>>,
    /// target -> targets depending on it
    reverse_edges: HashMap<TargetId, BTreeSet<TargetId>>,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Visiting,
    Done,
}

struct Resolver<'a> {
    registry: &'a RuleRegistry,
    plan: BuildPlan,
    marks: HashMap<TargetId, Mark>,
    path: Vec<TargetId>,
}

impl Resolver<'_> {
    fn visit(&mut self, id: &TargetId) -> Result<()> {
        match self.marks.get(id) {
            Some(Mark::Done) => return Ok(()),
            Some(Mark::Visiting) => {
                let start = self.path.iter().position(|p| p == id).unwrap_or(0);
                let mut members: Vec<String> =
                    self.path[start..].iter().map(ToString::to_string).collect();
                members.push(id.to_string());
                return Err(Error::DependencyCycle { members });
            }
            None => {}
        }

        let target = expand(self.registry, id)?;
        debug!("Resolved {} -> {:?}", id, target.dependencies);

        self.marks.insert(id.clone(), Mark::Visiting);
        self.path.push(id.clone());

        for dep in &target.dependencies {
            self.visit(dep)?;
        }

        self.path.pop();
        self.marks.insert(id.clone(), Mark::Done);

        self.plan.add(target);
        Ok(())
    }
}

/// Build the plan for `requests` and all of their transitive dependencies
///
/// Rule loading, variant expansion and cycle errors all surface here, before
/// anything is built.
pub fn resolve(registry: &RuleRegistry, requests: &[TargetId]) -> Result<BuildPlan> {
    let mut resolver = Resolver {
        registry,
        plan: BuildPlan::default(),
        marks: HashMap::new(),
        path: Vec::new(),
    };

    for request in requests {
        resolver.visit(request)?;
        if !resolver.plan.requested.contains(request) {
            resolver.plan.requested.push(request.clone());
        }
    }

    check_stems(&resolver.plan)?;
    Ok(resolver.plan)
}

/// `gcc@arm` and a package named `gcc-arm` would share every directory
fn check_stems(plan: &BuildPlan) -> Result<()> {
    let mut owners: HashMap<String, &TargetId> = HashMap::new();
    for id in &plan.order {
        if let Some(first) = owners.insert(id.stem(), id) {
            return Err(Error::PathCollision {
                first: first.to_string(),
                second: id.to_string(),
                stem: id.stem(),
            });
        }
    }
    Ok(())
}

impl BuildPlan {
    /// Append a target whose dependencies are already in the plan
    fn add(&mut self, target: BuildTarget) {
        let id = target.id.clone();
        let deps: BTreeSet<TargetId> = target.dependencies.iter().cloned().collect();

        for dep in &deps {
            self.reverse_edges
                .entry(dep.clone())
                .or_default()
                .insert(id.clone());
        }
        self.edges.insert(id.clone(), deps);
        self.reverse_edges.entry(id.clone()).or_default();
        self.order.push(id.clone());
        self.targets.insert(id, target);
    }

    /// Targets in build order: every target after all of its dependencies
    pub fn order(&self) -> &[TargetId] {
        &self.order
    }

    /// Targets named on the command line
    pub fn requested(&self) -> &[TargetId] {
        &self.requested
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn get(&self, id: &TargetId) -> Option<&BuildTarget> {
        self.targets.get(id)
    }

    pub fn contains(&self, id: &TargetId) -> bool {
        self.targets.contains_key(id)
    }

    /// Direct dependencies of a target
    pub fn dependencies(&self, id: &TargetId) -> impl Iterator<Item = &TargetId> {
        self.edges.get(id).into_iter().flatten()
    }

    /// Targets directly depending on a target
    pub fn dependents(&self, id: &TargetId) -> impl Iterator<Item = &TargetId> {
        self.reverse_edges.get(id).into_iter().flatten()
    }

    /// Every target `id` depends on, directly or not
    pub fn transitive_dependencies(&self, id: &TargetId) -> BTreeSet<TargetId> {
        walk(&self.edges, id)
    }

    /// Every target that depends on `id`, directly or not
    pub fn transitive_dependents(&self, id: &TargetId) -> BTreeSet<TargetId> {
        walk(&self.reverse_edges, id)
    }

    /// Transitive dependencies of `id` in build order
    pub fn ordered_dependencies(&self, id: &TargetId) -> Vec<TargetId> {
        let deps = self.transitive_dependencies(id);
        self.order
            .iter()
            .filter(|candidate| deps.contains(*candidate))
            .cloned()
            .collect()
    }
}

fn walk(edges: &HashMap<TargetId, BTreeSet<TargetId>>, start: &TargetId) -> BTreeSet<TargetId> {
    let mut seen = BTreeSet::new();
    let mut queue: VecDeque<&TargetId> = edges.get(start).into_iter().flatten().collect();

    while let Some(next) = queue.pop_front() {
        if seen.insert(next.clone())
            && let Some(more) = edges.get(next)
        {
            queue.extend(more.iter().filter(|m| !seen.contains(*m)));
        }
    }

    seen
}
