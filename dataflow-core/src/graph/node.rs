//! Graph Nodes
//!
//! This module defines the node types that live in the dependency graph.

use std::hash::Hash;

use indexmap::IndexSet;

/// The kind of node in the dependency graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    /// A field holding a plain value (literal, child scope or bound input).
    /// It changes only when written.
    Source,

    /// A field computed from an expression.
    Derived,

    /// A name that something reads but that is not defined. Kept so the
    /// readers are found again when the name is defined later.
    Absent,
}

/// Dirty state of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirtyState {
    /// The node's value is up-to-date.
    Clean,

    /// The node might need to recompute. One of its dependencies changed,
    /// but we have not yet verified if the actual input values are different.
    MaybeDirty,

    /// The node definitely needs to recompute.
    Dirty,
}

/// A node in the dependency graph, keyed by `K`.
#[derive(Debug, Clone)]
pub struct Node<K> {
    /// What kind of node this is.
    kind: NodeKind,

    /// Current dirty state.
    dirty: DirtyState,

    /// Nodes this node read during its last evaluation.
    dependencies: IndexSet<K>,

    /// Nodes that read this node.
    dependents: IndexSet<K>,
}

impl<K: Hash + Eq> Node<K> {
    /// Create a new node with the given kind.
    pub fn new(kind: NodeKind) -> Self {
        Self {
            kind,
            dirty: match kind {
                NodeKind::Derived => DirtyState::Dirty, // Start dirty to ensure first computation
                NodeKind::Source | NodeKind::Absent => DirtyState::Clean,
            },
            dependencies: IndexSet::new(),
            dependents: IndexSet::new(),
        }
    }

    pub fn kind(&self) -> NodeKind {
        self.kind
    }

    pub fn set_kind(&mut self, kind: NodeKind) {
        self.kind = kind;
    }

    pub fn dirty_state(&self) -> DirtyState {
        self.dirty
    }

    pub fn is_clean(&self) -> bool {
        self.dirty == DirtyState::Clean
    }

    pub fn mark_clean(&mut self) {
        self.dirty = DirtyState::Clean;
    }

    /// Mark the node as maybe dirty (a dependency might have changed).
    pub fn mark_maybe_dirty(&mut self) {
        if self.dirty == DirtyState::Clean {
            self.dirty = DirtyState::MaybeDirty;
        }
    }

    /// Mark the node as definitely dirty (needs recomputation).
    pub fn mark_dirty(&mut self) {
        self.dirty = DirtyState::Dirty;
    }

    pub fn add_dependency(&mut self, key: K) {
        self.dependencies.insert(key);
    }

    pub fn remove_dependency(&mut self, key: &K) {
        self.dependencies.shift_remove(key);
    }

    pub fn dependencies(&self) -> &IndexSet<K> {
        &self.dependencies
    }

    pub fn add_dependent(&mut self, key: K) {
        self.dependents.insert(key);
    }

    pub fn remove_dependent(&mut self, key: &K) {
        self.dependents.shift_remove(key);
    }

    pub fn dependents(&self) -> &IndexSet<K> {
        &self.dependents
    }

    /// Take all dependencies, leaving none.
    pub fn take_dependencies(&mut self) -> IndexSet<K> {
        std::mem::take(&mut self.dependencies)
    }

    /// True for a placeholder nobody reads and that reads nothing.
    pub fn is_orphan(&self) -> bool {
        self.kind == NodeKind::Absent && self.dependents.is_empty() && self.dependencies.is_empty()
    }
}
