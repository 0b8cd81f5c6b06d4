//! Spawn and resume latency benchmarks using criterion.
//!
//! Measures the cost of creating a frame and running it to completion, and
//! the cost of one suspend/resume round trip through the executor.

use criterion::{BatchSize, Criterion, criterion_group, criterion_main};
use fiberspawn::{ExecutionContext, StackConfig, spawn, spawn_with_stack};
use std::hint::black_box;

fn bench_spawn_and_run(c: &mut Criterion) {
    let mut group = c.benchmark_group("spawn");

    group.bench_function("default_stack", |b| {
        b.iter(|| {
            let ctx = ExecutionContext::new();
            spawn(&ctx, |_y| black_box(1_u32)).unwrap();
            ctx.run()
        })
    });

    group.bench_function("64k_stack", |b| {
        b.iter(|| {
            let ctx = ExecutionContext::new();
            spawn_with_stack(&ctx, |_y| black_box(1_u32), StackConfig::with_size(65536))
                .unwrap();
            ctx.run()
        })
    });

    group.finish();
}

fn bench_yield_round_trip(c: &mut Criterion) {
    let mut group = c.benchmark_group("yield");

    for &yields in &[1_usize, 100] {
        group.bench_function(format!("{}_yields", yields), |b| {
            b.iter_batched(
                || {
                    let ctx = ExecutionContext::new();
                    spawn(&ctx, move |y| {
                        for _ in 0..yields {
                            y.yield_now();
                        }
                    })
                    .unwrap();
                    ctx
                },
                |ctx| black_box(ctx.run()),
                BatchSize::SmallInput,
            )
        });
    }

    group.finish();
}

criterion_group!(benches, bench_spawn_and_run, bench_yield_round_trip);
criterion_main!(benches);
