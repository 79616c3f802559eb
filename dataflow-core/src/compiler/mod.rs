//! Dataflow Compiler
//!
//! This module turns a record literal into a live, incrementally maintained
//! [`Scope`].
//!
//! # How Compilation Works
//!
//! 1. **Materialize.** Every nested record literal becomes a child scope. The
//!    child remembers its parent for read fallback only; it owns its own
//!    fields.
//! 2. **Compile.** Every field whose value is an expression gets an updater
//!    and starts dirty, so the first reconcile evaluates it. Fields whose key
//!    is itself an expression are kept verbatim and logged; their keys are
//!    never bound.
//!
//! # How Reconciliation Works
//!
//! All scopes compiled from one literal share a model: an arena of scopes
//! plus one dependency graph keyed by [`SlotRef`]. Evaluating an updater
//! records every slot it reads, and those reads become its dependency edges,
//! so edges follow whichever branch a conditional actually took.
//!
//! A write marks its slot changed and every transitive reader maybe dirty.
//! Reconciling walks the dirty slots in dependency order; a maybe-dirty slot
//! re-evaluates only if one of the slots it read really changed.
//!
//! # Name Resolution
//!
//! `$name` looks in the local scope first, then in each enclosing scope.
//! Reads never modify an enclosing scope. Writes through [`Scope::put`] go
//! to the local field if there is one, else to the nearest enclosing scope
//! that owns the key, else create the key locally.
//!
//! # Example
//!
//! ```rust,ignore
//! let scope = ModelBuilder::new().build(
//!     Record::new()
//!         .with_field("x", 2)
//!         .with_field("y", binary(BinaryOp::Times, select("x"), 10))
//!         .into(),
//! )?;
//! scope.reconcile_input(clock.advance());
//! assert_eq!(scope.get(&"y".into()), Value::from(20));
//! ```

mod builder;
mod functions;
mod interpreter;
mod model;
mod scope;

pub use builder::ModelBuilder;
pub use functions::{Function, FunctionTable};
pub use interpreter::{evaluate, evaluate_literal, Environment};
pub use scope::Scope;

use crate::value::Value;

/// Index of a scope in its model's arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ScopeId(usize);

impl ScopeId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// How an item is addressed inside its scope.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ItemKey {
    /// A `key: value` field.
    Field(Value),
    /// A bare item or a field with a non-constant key, numbered in order of
    /// appearance.
    Position(usize),
    /// The scope's set of keys. Changes whenever an item is added or removed.
    Keys,
}

/// A slot in the dependency graph: one item of one scope.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SlotRef {
    pub scope: ScopeId,
    pub key: ItemKey,
}

impl SlotRef {
    pub fn new(scope: ScopeId, key: ItemKey) -> Self {
        Self { scope, key }
    }

    pub(crate) fn keys_of(scope: ScopeId) -> Self {
        Self::new(scope, ItemKey::Keys)
    }
}
