//! Update Scheduler
//!
//! The scheduler determines the order in which dirty nodes should be updated.
//! It ensures that dependencies are always updated before their dependents.
//!
//! # Algorithm
//!
//! We use a topological sort to process nodes in dependency order:
//!
//! 1. When a node changes, mark all its direct dependents as "maybe dirty"
//! 2. Propagate "maybe dirty" to their dependents, recursively
//! 3. Collect all maybe-dirty and dirty nodes
//! 4. Sort them topologically (dependencies before dependents)
//! 5. The caller processes each node in order:
//!    - For "maybe dirty" nodes: check if any input actually changed
//!    - For "dirty" nodes: recompute
//!
//! Nodes caught in a cycle cannot be ordered; they are appended after the
//! ordered ones and the caller resolves them against cached values.
//!
//! Edges are whatever the caller last reported through
//! [`UpdateScheduler::set_dependencies`], so dependencies may change from one
//! evaluation to the next.

use std::collections::VecDeque;
use std::hash::Hash;

use indexmap::{IndexMap, IndexSet};

use super::node::{DirtyState, Node, NodeKind};

/// The dependency graph plus its dirty set.
#[derive(Debug, Clone)]
pub struct UpdateScheduler<K> {
    /// All nodes in the graph, indexed by key.
    nodes: IndexMap<K, Node<K>>,

    /// Keys of every node that is not clean.
    dirty: IndexSet<K>,
}

impl<K: Clone + Hash + Eq> UpdateScheduler<K> {
    /// Create a new empty scheduler.
    pub fn new() -> Self {
        Self {
            nodes: IndexMap::new(),
            dirty: IndexSet::new(),
        }
    }

    /// Add a node, or change the kind of an existing one while keeping its
    /// edges. Derived nodes start dirty.
    pub fn add_node(&mut self, key: K, kind: NodeKind) {
        let node = self
            .nodes
            .entry(key.clone())
            .or_insert_with(|| Node::new(kind));
        node.set_kind(kind);
        if kind == NodeKind::Derived {
            node.mark_dirty();
            self.dirty.insert(key);
        }
    }

    /// Remove a node.
    ///
    /// Its own dependencies are dropped. If other nodes still read it, it
    /// stays behind as an [`NodeKind::Absent`] placeholder.
    pub fn remove_node(&mut self, key: &K) {
        self.set_dependencies(key, std::iter::empty());
        let Some(node) = self.nodes.get_mut(key) else {
            return;
        };
        if node.dependents().is_empty() {
            self.nodes.shift_remove(key);
        } else {
            node.set_kind(NodeKind::Absent);
            node.mark_clean();
        }
        self.dirty.shift_remove(key);
    }

    pub fn node(&self, key: &K) -> Option<&Node<K>> {
        self.nodes.get(key)
    }

    pub fn contains(&self, key: &K) -> bool {
        self.nodes.contains_key(key)
    }

    /// Add a dependency edge: `dependent` depends on `dependency`.
    ///
    /// Missing endpoints are created as absent placeholders.
    pub fn add_edge(&mut self, dependency: K, dependent: K) {
        self.nodes
            .entry(dependency.clone())
            .or_insert_with(|| Node::new(NodeKind::Absent))
            .add_dependent(dependent.clone());
        self.nodes
            .entry(dependent)
            .or_insert_with(|| Node::new(NodeKind::Absent))
            .add_dependency(dependency);
    }

    /// Remove a dependency edge, dropping placeholders left without edges.
    pub fn remove_edge(&mut self, dependency: &K, dependent: &K) {
        if let Some(node) = self.nodes.get_mut(dependency) {
            node.remove_dependent(dependent);
        }
        if let Some(node) = self.nodes.get_mut(dependent) {
            node.remove_dependency(dependency);
        }
        self.prune(dependency);
        self.prune(dependent);
    }

    /// Replace everything `dependent` depends on.
    pub fn set_dependencies(&mut self, dependent: &K, dependencies: impl IntoIterator<Item = K>) {
        let old = match self.nodes.get_mut(dependent) {
            Some(node) => node.take_dependencies(),
            None => IndexSet::new(),
        };
        for dependency in &old {
            if let Some(node) = self.nodes.get_mut(dependency) {
                node.remove_dependent(dependent);
            }
        }
        for dependency in dependencies {
            self.add_edge(dependency, dependent.clone());
        }
        for dependency in &old {
            self.prune(dependency);
        }
    }

    fn prune(&mut self, key: &K) {
        if self.nodes.get(key).is_some_and(Node::is_orphan) {
            self.nodes.shift_remove(key);
            self.dirty.shift_remove(key);
        }
    }

    pub fn dirty_state(&self, key: &K) -> DirtyState {
        self.nodes
            .get(key)
            .map_or(DirtyState::Clean, Node::dirty_state)
    }

    pub fn mark_dirty(&mut self, key: &K) {
        if let Some(node) = self.nodes.get_mut(key) {
            node.mark_dirty();
            self.dirty.insert(key.clone());
        }
    }

    pub fn mark_clean(&mut self, key: &K) {
        if let Some(node) = self.nodes.get_mut(key) {
            node.mark_clean();
        }
        self.dirty.shift_remove(key);
    }

    /// Mark a node as changed and propagate dirty flags.
    ///
    /// Returns every transitive dependent, in update order.
    pub fn mark_changed(&mut self, source: &K) -> Vec<K> {
        let mut to_process = Vec::new();
        let mut visited = IndexSet::new();
        let mut queue = VecDeque::new();

        // Start with the source node's direct dependents
        if let Some(node) = self.nodes.get(source) {
            queue.extend(node.dependents().iter().cloned());
        }

        // BFS to propagate maybe-dirty status
        while let Some(key) = queue.pop_front() {
            if !visited.insert(key.clone()) {
                continue;
            }

            if let Some(node) = self.nodes.get_mut(&key) {
                node.mark_maybe_dirty();
                queue.extend(node.dependents().iter().cloned());
                self.dirty.insert(key.clone());
                to_process.push(key);
            }
        }

        // Sort topologically so dependencies are processed first
        self.topological_sort(to_process)
    }

    /// Every node that is not clean, in update order.
    pub fn dirty_in_order(&self) -> Vec<K> {
        self.topological_sort(self.dirty.iter().cloned().collect())
    }

    /// Perform a topological sort of the given nodes.
    ///
    /// Returns nodes in order such that dependencies come before dependents.
    /// Nodes on a cycle follow, in their original order.
    fn topological_sort(&self, nodes: Vec<K>) -> Vec<K> {
        let node_set: IndexSet<&K> = nodes.iter().collect();
        let mut in_degree: IndexMap<&K, usize> = IndexMap::new();
        let mut result = Vec::with_capacity(nodes.len());
        let mut queue = VecDeque::new();

        // Calculate in-degrees (only counting edges within the node set)
        for key in &nodes {
            if let Some(node) = self.nodes.get(key) {
                let degree = node
                    .dependencies()
                    .iter()
                    .filter(|d| node_set.contains(d))
                    .count();
                in_degree.insert(key, degree);
                if degree == 0 {
                    queue.push_back(key);
                }
            }
        }

        // Kahn's algorithm
        let mut emitted = IndexSet::new();
        while let Some(key) = queue.pop_front() {
            emitted.insert(key);
            result.push(key.clone());

            if let Some(node) = self.nodes.get(key) {
                for dependent in node.dependents() {
                    if let Some(degree) = in_degree.get_mut(dependent) {
                        *degree = degree.saturating_sub(1);
                        if *degree == 0 {
                            if let Some((key, _)) = in_degree.get_key_value(dependent) {
                                queue.push_back(*key);
                            }
                        }
                    }
                }
            }
        }

        for key in &nodes {
            if !emitted.contains(key) && self.nodes.contains_key(key) {
                result.push(key.clone());
            }
        }
        result
    }

    /// Get the total number of nodes in the graph.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn dirty_count(&self) -> usize {
        self.dirty.len()
    }
}

impl<K: Clone + Hash + Eq> Default for UpdateScheduler<K> {
    fn default() -> Self {
        Self::new()
    }
}
