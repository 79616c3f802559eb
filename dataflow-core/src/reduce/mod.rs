//! Incremental reduction.
//!
//! A [`ReduceTree`] is a balanced ordered map whose nodes cache the reduction
//! of their subtree. Changing one entry only refolds the nodes on the path
//! from that entry to the root, so keeping a sum (or any other associative
//! reduction) of `n` entries current costs `O(log n)` per change.
//!
//! What "reduce" means is supplied by a [`Reducer`]:
//!
//! - `identity()` is the fold of nothing.
//! - `accumulate(acc, value)` folds one value into an accumulator.
//! - `combine(a, b)` merges two accumulators. It must be associative, and
//!   `identity()` must be its neutral element.

mod tree;

pub use tree::{Iter, ReduceTree};

/// An associative reduction of `V`s into an `A`.
pub trait Reducer<V, A>: Send + Sync {
    fn identity(&self) -> A;
    fn accumulate(&self, acc: A, value: &V) -> A;
    fn combine(&self, lhs: A, rhs: A) -> A;
}

/// A reducer built from three closures.
pub struct FnReducer<I, F, C> {
    identity: I,
    accumulate: F,
    combine: C,
}

impl<I, F, C> FnReducer<I, F, C> {
    pub fn new(identity: I, accumulate: F, combine: C) -> Self {
        Self {
            identity,
            accumulate,
            combine,
        }
    }
}

impl<V, A, I, F, C> Reducer<V, A> for FnReducer<I, F, C>
where
    I: Fn() -> A + Send + Sync,
    F: Fn(A, &V) -> A + Send + Sync,
    C: Fn(A, A) -> A + Send + Sync,
{
    fn identity(&self) -> A {
        (self.identity)()
    }

    fn accumulate(&self, acc: A, value: &V) -> A {
        (self.accumulate)(acc, value)
    }

    fn combine(&self, lhs: A, rhs: A) -> A {
        (self.combine)(lhs, rhs)
    }
}

/// Sum of `i64` values.
#[derive(Debug, Clone, Copy, Default)]
pub struct Sum;

impl Reducer<i64, i64> for Sum {
    fn identity(&self) -> i64 {
        0
    }

    fn accumulate(&self, acc: i64, value: &i64) -> i64 {
        acc.wrapping_add(*value)
    }

    fn combine(&self, lhs: i64, rhs: i64) -> i64 {
        lhs.wrapping_add(rhs)
    }
}

/// Number of entries, whatever their type.
#[derive(Debug, Clone, Copy, Default)]
pub struct Count;

impl<V> Reducer<V, usize> for Count {
    fn identity(&self) -> usize {
        0
    }

    fn accumulate(&self, acc: usize, _value: &V) -> usize {
        acc + 1
    }

    fn combine(&self, lhs: usize, rhs: usize) -> usize {
        lhs + rhs
    }
}
