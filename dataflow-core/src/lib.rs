//! Dataflow Core
//!
//! An incremental dataflow engine. Values flow through a graph of nodes;
//! when an input changes, only the nodes that depend on it are recomputed,
//! and only when someone asks for their value.
//!
//! The crate has three layers:
//!
//! - `reactive`: the push/pull protocol. Producers *decohere* their
//!   consumers when they change (cheap, no evaluation) and consumers
//!   *reconcile* against an epoch when read (evaluation happens here, at most
//!   once per epoch).
//! - `combinator` and `reduce`: keyed collections where change is tracked
//!   per key, with filter/map/memoize/watch stages and an `O(log n)`
//!   incremental reduction.
//! - `compiler`: turns a structured record literal whose fields hold
//!   expressions into a live, self-updating [`Scope`].
//!
//! Around those sit [`EngineConfig`], the crate [`Error`] type, and
//! [`ScopeAgent`], which gives a scope its own tokio task.
//!
//! # Example
//!
//! ```rust,ignore
//! use dataflow_core::{binary, select, BinaryOp, EpochClock, ModelBuilder, Record, Value};
//!
//! let clock = EpochClock::new();
//! let scope = ModelBuilder::new().build(
//!     Record::new()
//!         .with_field("price", 4)
//!         .with_field("qty", 3)
//!         .with_field("total", binary(BinaryOp::Times, select("price"), select("qty")))
//!         .into(),
//! )?;
//!
//! scope.reconcile_input(clock.advance());
//! assert_eq!(scope.get(&"total".into()), Value::from(12));
//!
//! // Only `total` is re-evaluated.
//! scope.put("qty", 5);
//! scope.reconcile_input(clock.advance());
//! assert_eq!(scope.get(&"total".into()), Value::from(20));
//! ```

pub mod agent;
pub mod combinator;
pub mod compiler;
pub mod config;
pub mod error;
pub mod graph;
pub mod reactive;
pub mod reduce;
pub mod value;

pub use agent::{ScopeAgent, ScopeHandle};
pub use combinator::KeyedPipeline;
pub use compiler::{evaluate_literal, FunctionTable, ModelBuilder, Scope};
pub use config::EngineConfig;
pub use error::{Error, Result};
pub use reactive::{
    ChangeTag, Consumer, Epoch, EpochClock, KeyedConsumer, KeyedProducer, KeyedSource, Observer,
    Producer, Source, Transform,
};
pub use reduce::{ReduceTree, Reducer};
pub use value::{binary, select, BinaryOp, Item, Num, Record, Value};
