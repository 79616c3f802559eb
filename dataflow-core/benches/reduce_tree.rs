//! Benchmarks for incremental reduction and scope reconciliation.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use dataflow_core::combinator::reduce;
use dataflow_core::reduce::{ReduceTree, Sum};
use dataflow_core::{binary, select, BinaryOp, EpochClock, KeyedSource, ModelBuilder, Producer, Record};

/// One update against a tree of n entries.
fn bench_tree_update(c: &mut Criterion) {
    let mut group = c.benchmark_group("reduce_tree_update");

    for n in [1_000i64, 10_000, 100_000] {
        group.bench_with_input(BenchmarkId::from_parameter(n), &n, |b, &n| {
            let mut tree = ReduceTree::new(Sum);
            for i in 0..n {
                tree.insert(i, i);
            }
            let mut next = 0i64;
            b.iter(|| {
                next = (next + 7919) % n;
                tree.insert(next, black_box(next * 2));
                black_box(tree.fold())
            });
        });
    }

    group.finish();
}

/// One keyed change flowing through a reduce stage.
fn bench_reduce_stage(c: &mut Criterion) {
    let mut group = c.benchmark_group("reduce_stage_update");

    for n in [1_000i64, 10_000] {
        group.bench_with_input(BenchmarkId::from_parameter(n), &n, |b, &n| {
            let clock = EpochClock::new();
            let source = KeyedSource::from_entries((0..n).map(|i| (i, i)));
            let total = reduce(source.clone(), Sum);
            total.reconcile_output(clock.advance());

            let mut next = 0i64;
            b.iter(|| {
                next = (next + 7919) % n;
                source.put(next, next);
                total.reconcile_output(clock.advance());
                black_box(total.current_value())
            });
        });
    }

    group.finish();
}

/// A write to the head of a chain of n dependent fields.
fn bench_scope_chain(c: &mut Criterion) {
    let mut group = c.benchmark_group("scope_chain");

    for n in [10usize, 100, 1000] {
        group.bench_with_input(BenchmarkId::from_parameter(n), &n, |b, &n| {
            let mut literal = Record::new().with_field("f0", 0);
            for i in 1..n {
                literal = literal.with_field(
                    format!("f{i}"),
                    binary(BinaryOp::Plus, select(format!("f{}", i - 1)), 1),
                );
            }
            let scope = ModelBuilder::new().build(literal.into()).unwrap();
            let clock = EpochClock::new();
            scope.reconcile_input(clock.advance());

            let mut head = 0i64;
            b.iter(|| {
                head += 1;
                scope.put("f0", head);
                scope.reconcile_input(clock.advance());
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_tree_update, bench_reduce_stage, bench_scope_chain);
criterion_main!(benches);
