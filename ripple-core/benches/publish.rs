//! Benchmarks for ripple-core
//!
//! Run with: cargo bench

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use ripple_core::prelude::*;

// =============================================================================
// MUTABLE PROPERTY BENCHMARKS
// =============================================================================

fn bench_set_unobserved(c: &mut Criterion) {
    let concurrent = concurrent_property_of(0_u64);
    let confined = confined_property_of(0_u64);
    c.bench_function("set_unobserved_concurrent", |b| b.iter(|| concurrent.set(black_box(1))));
    c.bench_function("set_unobserved_confined", |b| b.iter(|| confined.set(black_box(1))));
}

fn bench_publish_to_listeners(c: &mut Criterion) {
    let mut group = c.benchmark_group("publish");
    for listeners in [1, 10, 100] {
        for concurrent in [true, false] {
            let prop = property_of(0_u64, concurrent);
            for _ in 0..listeners {
                prop.on_change(|old: &u64, new: &u64| {
                    black_box((old, new));
                });
            }
            let label = if concurrent { "concurrent" } else { "confined" };
            group.bench_with_input(BenchmarkId::new(label, listeners), &listeners, |b, _| {
                b.iter(|| prop.set(black_box(1)))
            });
        }
    }
    group.finish();
}

fn bench_compare_and_set(c: &mut Criterion) {
    let prop = concurrent_property_of(0_u64);
    c.bench_function("compare_and_set", |b| {
        b.iter(|| {
            let current = prop.value();
            prop.compare_and_set(&current, black_box(current + 1))
        })
    });
}

// =============================================================================
// DERIVED BENCHMARKS
// =============================================================================

fn bench_map_chain(c: &mut Criterion) {
    let source = concurrent_property_of(0_i64);
    let mut tip: Prop<i64> = source.clone().as_property();
    for _ in 0..10 {
        tip = tip.map(|v: &i64| v + 1);
    }
    tip.on_change(|_: &i64, new: &i64| {
        black_box(new);
    });
    c.bench_function("map_chain_10", |b| b.iter(|| source.set(black_box(5))));
}

fn bench_map_all(c: &mut Criterion) {
    let sources: Vec<_> = (0..16).map(|_| concurrent_property_of(1_i64)).collect();
    let sum = map_all(
        sources.iter().map(|s| s.clone().as_property()).collect(),
        |values: &[i64]| values.iter().sum::<i64>(),
    )
    .unwrap();
    sum.on_change(|_: &i64, new: &i64| {
        black_box(new);
    });
    c.bench_function("map_all_16", |b| b.iter(|| sources[7].set(black_box(2))));
}

fn bench_subscribe_unsubscribe(c: &mut Criterion) {
    let prop = concurrent_property_of(0_u64);
    let listener = ChangeListener::new(|_: &u64, _: &u64| {});
    c.bench_function("subscribe_unsubscribe", |b| {
        b.iter(|| {
            let id = prop.subscribe_unconfined(listener.clone());
            prop.unsubscribe(id);
        })
    });
}

fn bench_diff_set(c: &mut Criterion) {
    let prop = ConcurrentMutableDiff::new(0_u64);
    prop.subscribe_diff_unconfined(Listener::with_diff(|_: &u64, _: &u64, d: &u64| {
        black_box(d);
    }));
    c.bench_function("diff_set", |b| b.iter(|| prop.set(black_box(1), 1)));
}

criterion_group!(
    benches,
    bench_set_unobserved,
    bench_publish_to_listeners,
    bench_compare_and_set,
    bench_map_chain,
    bench_map_all,
    bench_subscribe_unsubscribe,
    bench_diff_set,
);
criterion_main!(benches);
