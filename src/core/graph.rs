//! Dependency graph validation.
//!
//! [`Graph::build`] turns a collection of [`TaskDescriptor`]s into a validated
//! directed acyclic graph, or a [`DefinitionError`] if the definition is
//! structurally broken. Definition errors are always fatal and detected before
//! any task executes; they are never retried.

use std::collections::HashMap;

use thiserror::Error;

use super::descriptor::TaskDescriptor;
use super::types::TaskName;

/// Structural problems in a pipeline definition.
#[derive(Debug, Error)]
pub enum DefinitionError {
    /// Two descriptors share the same name.
    #[error("duplicate task: {0}")]
    DuplicateTask(TaskName),

    /// A dependency references a task that doesn't exist.
    #[error("unknown dependency: task '{task}' depends on undeclared task '{dependency}'")]
    UnknownDependency {
        task: TaskName,
        dependency: TaskName,
    },

    /// A path through `depends_on` edges leads back to its start.
    #[error("cyclic dependency: {}", render_cycle(.0))]
    CyclicDependency(Vec<TaskName>),

    /// The definition contains no tasks at all.
    #[error("pipeline definition contains no tasks")]
    EmptyPipeline,
}

fn render_cycle(cycle: &[TaskName]) -> String {
    cycle
        .iter()
        .map(TaskName::as_str)
        .collect::<Vec<_>>()
        .join(" -> ")
}

/// Marking for the depth-first cycle scan.
#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Unvisited,
    InProgress,
    Done,
}

/// A validated, read-only dependency graph over a set of task descriptors.
///
/// Exposes each task's direct predecessors and direct dependents, and a
/// topological ordering. The ordering is a sanity baseline only; concurrent
/// execution order is computed dynamically by the executor.
pub struct Graph {
    nodes: HashMap<TaskName, TaskDescriptor>,
    predecessors: HashMap<TaskName, Vec<TaskName>>,
    dependents: HashMap<TaskName, Vec<TaskName>>,
    topo_order: Vec<TaskName>,
}

impl Graph {
    /// Validate a collection of descriptors into a graph.
    ///
    /// Checks, in order: non-emptiness, name uniqueness, referential
    /// integrity of every `depends_on` entry, and acyclicity (depth-first
    /// three-color scan; a back-edge to an in-progress node is reported with
    /// the cycle's task names in path order).
    ///
    /// Pure function over its input; no side effects.
    pub fn build(descriptors: Vec<TaskDescriptor>) -> Result<Self, DefinitionError> {
        if descriptors.is_empty() {
            return Err(DefinitionError::EmptyPipeline);
        }

        let mut nodes: HashMap<TaskName, TaskDescriptor> = HashMap::new();
        let mut insertion: Vec<TaskName> = Vec::with_capacity(descriptors.len());

        for desc in descriptors {
            let name = desc.name().clone();
            if nodes.contains_key(&name) {
                return Err(DefinitionError::DuplicateTask(name));
            }
            insertion.push(name.clone());
            nodes.insert(name, desc);
        }

        // Referential integrity before any traversal.
        let mut predecessors: HashMap<TaskName, Vec<TaskName>> = HashMap::new();
        let mut dependents: HashMap<TaskName, Vec<TaskName>> = HashMap::new();
        for name in &insertion {
            predecessors.entry(name.clone()).or_default();
            dependents.entry(name.clone()).or_default();
        }
        for name in &insertion {
            let desc = &nodes[name];
            for dep in desc.dependencies() {
                if !nodes.contains_key(dep) {
                    return Err(DefinitionError::UnknownDependency {
                        task: name.clone(),
                        dependency: dep.clone(),
                    });
                }
                predecessors
                    .get_mut(name)
                    .expect("entry created above")
                    .push(dep.clone());
                dependents
                    .get_mut(dep)
                    .expect("entry created above")
                    .push(name.clone());
            }
        }

        let topo_order = toposort(&insertion, &predecessors)?;

        Ok(Self {
            nodes,
            predecessors,
            dependents,
            topo_order,
        })
    }

    /// Number of tasks in the graph.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the graph has no tasks. Always false for a built graph.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Whether the graph contains a task with this name.
    pub fn contains(&self, name: &TaskName) -> bool {
        self.nodes.contains_key(name)
    }

    /// Look up a descriptor by name.
    pub fn descriptor(&self, name: &TaskName) -> Option<&TaskDescriptor> {
        self.nodes.get(name)
    }

    /// Direct predecessors of a task (the tasks it depends on).
    pub fn predecessors_of(&self, name: &TaskName) -> &[TaskName] {
        self.predecessors.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Direct dependents of a task (the tasks that depend on it).
    pub fn dependents_of(&self, name: &TaskName) -> &[TaskName] {
        self.dependents.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    /// A valid topological ordering (dependencies before dependents).
    pub fn topological_order(&self) -> &[TaskName] {
        &self.topo_order
    }

    /// All task names, in topological order.
    pub fn task_names(&self) -> impl Iterator<Item = &TaskName> {
        self.topo_order.iter()
    }
}

/// Depth-first three-color scan over `depends_on` edges.
///
/// Returns the tasks in dependency-first order, or the cycle found.
fn toposort(
    roots: &[TaskName],
    predecessors: &HashMap<TaskName, Vec<TaskName>>,
) -> Result<Vec<TaskName>, DefinitionError> {
    let mut marks: HashMap<&TaskName, Mark> =
        roots.iter().map(|n| (n, Mark::Unvisited)).collect();
    let mut order: Vec<TaskName> = Vec::with_capacity(roots.len());
    let mut path: Vec<TaskName> = Vec::new();

    for root in roots {
        if marks[root] == Mark::Unvisited {
            visit(root, predecessors, &mut marks, &mut path, &mut order)?;
        }
    }

    Ok(order)
}

fn visit<'a>(
    name: &'a TaskName,
    predecessors: &'a HashMap<TaskName, Vec<TaskName>>,
    marks: &mut HashMap<&'a TaskName, Mark>,
    path: &mut Vec<TaskName>,
    order: &mut Vec<TaskName>,
) -> Result<(), DefinitionError> {
    marks.insert(name, Mark::InProgress);
    path.push(name.clone());

    for dep in predecessors.get(name).map(Vec::as_slice).unwrap_or(&[]) {
        match marks.get(dep).copied().unwrap_or(Mark::Unvisited) {
            Mark::Done => {}
            Mark::InProgress => {
                // Back-edge: the cycle is the path from the first occurrence
                // of `dep` through `name`, closed back on `dep`.
                let start = path
                    .iter()
                    .position(|n| n == dep)
                    .expect("in-progress task is on the traversal path");
                let mut cycle = path[start..].to_vec();
                cycle.push(dep.clone());
                return Err(DefinitionError::CyclicDependency(cycle));
            }
            Mark::Unvisited => {
                // `dep` exists in `predecessors` by referential integrity.
                let dep = predecessors
                    .get_key_value(dep)
                    .map(|(k, _)| k)
                    .expect("dependency validated before traversal");
                visit(dep, predecessors, marks, path, order)?;
            }
        }
    }

    path.pop();
    marks.insert(name, Mark::Done);
    order.push(name.clone());
    Ok(())
}
