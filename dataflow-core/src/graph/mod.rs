//! Dependency Graph
//!
//! This module implements the dependency graph that tracks which fields of a
//! compiled scope read which other fields.
//!
//! # Overview
//!
//! - Nodes represent fields: plain sources, derived (expression) fields, and
//!   absent placeholders for names that are read but not yet defined
//! - Edges represent dependencies: if A reads B, there is an edge from B to A
//!
//! When a field is written, we traverse the graph to find all affected nodes
//! and mark them maybe dirty. The compiler then walks the dirty nodes in
//! topological order and re-evaluates only those whose inputs really changed.
//!
//! # Design Decisions
//!
//! 1. The graph is generic over its key so the compiler can key it by slot
//!    (scope plus field) without the graph knowing about scopes.
//!
//! 2. Nodes live in insertion-ordered maps, so update order among unrelated
//!    fields is deterministic.
//!
//! 3. We maintain both forward (dependencies) and reverse (dependents) edges
//!    to enable efficient traversal in both directions.

mod node;
mod scheduler;

pub use node::{DirtyState, Node, NodeKind};
pub use scheduler::UpdateScheduler;
