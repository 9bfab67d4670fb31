//! Restore ordering from declared task dependencies.
//!
//! A dump producer knows which objects reference which (foreign keys).
//! [`plan_restoration`] turns that into the [`RestorationContext`] stored in
//! metadata: a topological dispatch order plus the dependency map the ordered
//! restore producer waits on.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::fmt::Display;
use std::hash::Hash;

use petgraph::Direction;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;

use shroud_core::id::TaskId;
use shroud_core::metadata::RestorationContext;

use crate::error::{Error, Result};

/// Directed graph with deterministic topological sorting.
///
/// An edge `a -> b` means `a` must finish before `b` starts.
#[derive(Debug, Clone)]
pub(crate) struct Dag<T>
where
    T: Clone + Eq + Hash + Display,
{
    graph: DiGraph<T, ()>,
    index_map: HashMap<T, NodeIndex>,
    /// Tie-break order for toposort.
    insertion_order: Vec<NodeIndex>,
}

impl<T> Dag<T>
where
    T: Clone + Eq + Hash + Display,
{
    pub(crate) fn new() -> Self {
        Self {
            graph: DiGraph::new(),
            index_map: HashMap::new(),
            insertion_order: Vec::new(),
        }
    }

    /// Adds a node; returns the existing index if already present.
    pub(crate) fn add_node(&mut self, value: T) -> NodeIndex {
        if let Some(&idx) = self.index_map.get(&value) {
            return idx;
        }
        let idx = self.graph.add_node(value.clone());
        self.index_map.insert(value, idx);
        self.insertion_order.push(idx);
        idx
    }

    pub(crate) fn add_edge(&mut self, from: NodeIndex, to: NodeIndex) -> Result<()> {
        for idx in [from, to] {
            self.graph
                .node_weight(idx)
                .ok_or_else(|| Error::DagNodeNotFound {
                    node: format!("index {}", idx.index()),
                })?;
        }
        self.graph.add_edge(from, to, ());
        Ok(())
    }

    /// Kahn's algorithm; ready nodes are taken in insertion order.
    ///
    /// # Errors
    ///
    /// Returns `Error::CycleDetected` listing every node left unsorted.
    pub(crate) fn toposort(&self) -> Result<Vec<T>> {
        let node_count = self.graph.node_count();
        let position: HashMap<NodeIndex, usize> = self
            .insertion_order
            .iter()
            .enumerate()
            .map(|(pos, &idx)| (idx, pos))
            .collect();

        let mut in_degree: HashMap<NodeIndex, usize> =
            self.graph.node_indices().map(|idx| (idx, 0)).collect();
        for edge in self.graph.edge_references() {
            *in_degree.entry(edge.target()).or_insert(0) += 1;
        }

        let mut queue: VecDeque<NodeIndex> = self
            .insertion_order
            .iter()
            .filter(|idx| in_degree.get(idx).copied().unwrap_or(0) == 0)
            .copied()
            .collect();

        let mut sorted = Vec::with_capacity(node_count);
        while let Some(idx) = queue.pop_front() {
            let node = self
                .graph
                .node_weight(idx)
                .ok_or_else(|| Error::DagNodeNotFound {
                    node: format!("index {}", idx.index()),
                })?;
            sorted.push(node.clone());

            let mut next: Vec<NodeIndex> = self
                .graph
                .neighbors_directed(idx, Direction::Outgoing)
                .collect();
            next.sort_by_key(|n| position.get(n).copied().unwrap_or(usize::MAX));
            next.dedup();

            for neighbor in next {
                let edges = self.graph.edges_connecting(idx, neighbor).count();
                if let Some(deg) = in_degree.get_mut(&neighbor) {
                    *deg = deg.saturating_sub(edges);
                    if *deg == 0 {
                        queue.push_back(neighbor);
                    }
                }
            }
        }

        if sorted.len() != node_count {
            let cycle = self
                .insertion_order
                .iter()
                .filter(|idx| in_degree.get(idx).copied().unwrap_or(0) > 0)
                .filter_map(|&idx| self.graph.node_weight(idx))
                .map(ToString::to_string)
                .collect();
            return Err(Error::CycleDetected { cycle });
        }
        Ok(sorted)
    }
}

/// Builds the restore ordering for `tasks`.
///
/// `depends_on[b]` lists the tasks `b` needs restored first. Dependencies on
/// tasks outside `tasks` are dropped, since nothing would ever complete them.
/// A cyclic graph yields `has_topological_order = false` with `tasks` in
/// their given order and the dependency map left empty, so an ordered
/// restore degrades to plain sequential dispatch instead of deadlocking.
#[must_use]
pub fn plan_restoration(
    tasks: &[TaskId],
    depends_on: &BTreeMap<TaskId, Vec<TaskId>>,
) -> RestorationContext {
    let mut dag = Dag::new();
    let nodes: HashMap<&TaskId, NodeIndex> = tasks
        .iter()
        .map(|task| (task, dag.add_node(task.clone())))
        .collect();

    let mut dependencies = BTreeMap::new();
    for task in tasks {
        let Some(&to) = nodes.get(task) else { continue };
        let mut kept = Vec::new();
        for dep in depends_on.get(task).map_or(&[][..], Vec::as_slice) {
            match nodes.get(dep) {
                Some(&from) if dep != task => {
                    if dag.add_edge(from, to).is_ok() && !kept.contains(dep) {
                        kept.push(dep.clone());
                    }
                }
                Some(_) => {}
                None => {
                    tracing::warn!(task = %task, dependency = %dep, "dependency is not part of the dump; ignoring");
                }
            }
        }
        if !kept.is_empty() {
            dependencies.insert(task.clone(), kept);
        }
    }

    match dag.toposort() {
        Ok(order) => RestorationContext {
            has_topological_order: true,
            restoration_order: order,
            dependencies,
        },
        Err(err) => {
            tracing::warn!(error = %err, "dependency graph has a cycle; restoring without order");
            RestorationContext {
                has_topological_order: false,
                restoration_order: tasks.to_vec(),
                dependencies: BTreeMap::new(),
            }
        }
    }
}
