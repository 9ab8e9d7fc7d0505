//! Script dependency graph
//!
//! Resolves each script's declared dependencies (resource names or script
//! identities) to concrete producing scripts. Resolution is deliberately
//! simple: the first script in input order whose resource or identity
//! matches wins, unresolvable names are dropped, self references are
//! dropped.
//!
//! Building never fails. Cycles are only reported by [`DependencyGraph::ensure_acyclic`]
//! and [`DependencyGraph::topological_order`], which the scheduler runs
//! before dispatching anything.

use crate::script::{ScriptDescriptor, ScriptId};
use std::collections::{HashMap, HashSet, VecDeque};
use thiserror::Error;

/// Errors that can occur when validating a dependency graph
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
    #[error("Circular dependency detected: {}", format_cycle(.0))]
    CircularDependency(Vec<ScriptId>),

    #[error("Unknown script: {0}")]
    UnknownScript(ScriptId),
}

fn format_cycle(path: &[ScriptId]) -> String {
    path.iter()
        .map(ScriptId::as_str)
        .collect::<Vec<_>>()
        .join(" -> ")
}

/// Map from script identity to the scripts that must complete first
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DependencyGraph {
    /// Script identities in input order
    order: Vec<ScriptId>,
    prerequisites: HashMap<ScriptId, Vec<ScriptId>>,
}

impl DependencyGraph {
    /// Build the graph from a flat list of descriptors
    pub fn build(scripts: &[ScriptDescriptor]) -> Self {
        let order: Vec<ScriptId> = scripts.iter().map(ScriptDescriptor::id).collect();
        let mut prerequisites: HashMap<ScriptId, Vec<ScriptId>> = order
            .iter()
            .map(|id| (id.clone(), Vec::new()))
            .collect();

        for (script, id) in scripts.iter().zip(&order) {
            for dependency in &script.depends_on {
                let Some(upstream) = Self::resolve(scripts, dependency) else {
                    continue;
                };
                if &upstream == id {
                    continue;
                }
                let entry = prerequisites.entry(id.clone()).or_default();
                if !entry.contains(&upstream) {
                    entry.push(upstream);
                }
            }
        }

        Self {
            order,
            prerequisites,
        }
    }

    /// First script whose resource or identity matches the dependency string
    fn resolve(scripts: &[ScriptDescriptor], dependency: &str) -> Option<ScriptId> {
        scripts
            .iter()
            .find(|s| s.resource == dependency || s.id().as_str() == dependency)
            .map(ScriptDescriptor::id)
    }

    /// Script identities in the order they were supplied
    pub fn script_ids(&self) -> &[ScriptId] {
        &self.order
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn contains(&self, id: &ScriptId) -> bool {
        self.prerequisites.contains_key(id)
    }

    /// Scripts that must complete before `id` may start
    pub fn prerequisites(&self, id: &ScriptId) -> &[ScriptId] {
        self.prerequisites
            .get(id)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Scripts that list `id` as a prerequisite, in input order
    pub fn dependents(&self, id: &ScriptId) -> Vec<ScriptId> {
        self.order
            .iter()
            .filter(|candidate| self.prerequisites(candidate).contains(id))
            .cloned()
            .collect()
    }

    /// Fail with the offending path if the declarations contain a cycle
    pub fn ensure_acyclic(&self) -> Result<(), GraphError> {
        let mut done: HashSet<&ScriptId> = HashSet::new();

        for root in &self.order {
            if done.contains(root) {
                continue;
            }

            // Iterative DFS; `path` doubles as the visiting set.
            let mut path: Vec<&ScriptId> = vec![root];
            let mut cursors: Vec<usize> = vec![0];

            while let Some(node) = path.last().copied() {
                let depth = path.len() - 1;
                let prereqs = self.prerequisites(node);

                if cursors[depth] >= prereqs.len() {
                    done.insert(node);
                    path.pop();
                    cursors.pop();
                    continue;
                }

                let next = &prereqs[cursors[depth]];
                cursors[depth] += 1;

                if done.contains(next) {
                    continue;
                }
                if let Some(pos) = path.iter().position(|n| *n == next) {
                    let mut cycle: Vec<ScriptId> =
                        path[pos..].iter().map(|id| (*id).clone()).collect();
                    cycle.push(next.clone());
                    return Err(GraphError::CircularDependency(cycle));
                }

                path.push(next);
                cursors.push(0);
            }
        }

        Ok(())
    }

    /// Kahn's algorithm; ties are broken by input order
    pub fn topological_order(&self) -> Result<Vec<ScriptId>, GraphError> {
        let mut indegree: HashMap<&ScriptId, usize> = self
            .order
            .iter()
            .map(|id| (id, self.prerequisites(id).len()))
            .collect();

        let mut ready: VecDeque<&ScriptId> = self
            .order
            .iter()
            .filter(|id| indegree.get(id).copied() == Some(0))
            .collect();

        let mut ordered = Vec::with_capacity(self.order.len());

        while let Some(id) = ready.pop_front() {
            ordered.push(id.clone());

            for child in self.order.iter().filter(|c| self.prerequisites(c).contains(id)) {
                if let Some(deg) = indegree.get_mut(child) {
                    *deg -= 1;
                    if *deg == 0 {
                        ready.push_back(child);
                    }
                }
            }
        }

        if ordered.len() != self.order.len() {
            self.ensure_acyclic()?;
            return Err(GraphError::CircularDependency(Vec::new()));
        }

        Ok(ordered)
    }
}
