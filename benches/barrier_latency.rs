use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use std::hint::black_box;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use epoch_swap::QuiescenceDomain;

/// Benchmark: Grace period with only idle contexts
///
/// Measures the fixed cost of `synchronize`: epoch advance, fence, slot
/// snapshot and one load per slot.
fn bench_idle_contexts(c: &mut Criterion) {
    let mut group = c.benchmark_group("synchronize_idle");

    for contexts in [0usize, 1, 8, 64].iter() {
        group.bench_with_input(
            BenchmarkId::new("contexts", contexts),
            contexts,
            |b, &contexts| {
                let (mut barrier, domain) = QuiescenceDomain::new();
                let _held: Vec<_> = (0..contexts).map(|_| domain.register_context()).collect();

                b.iter(|| {
                    barrier.synchronize().unwrap();
                    black_box(barrier.global_epoch());
                });
            },
        );
    }

    group.finish();
}

/// Benchmark: Grace period while writer threads enter and exit sections
fn bench_busy_contexts(c: &mut Criterion) {
    let mut group = c.benchmark_group("synchronize_busy");
    group.sample_size(20);
    group.measurement_time(Duration::from_secs(5));

    for writers in [1usize, 2, 4, 8].iter() {
        group.bench_with_input(
            BenchmarkId::new("writers", writers),
            writers,
            |b, &writers| {
                let (mut barrier, domain) = QuiescenceDomain::new();
                let running = Arc::new(AtomicBool::new(true));

                let handles: Vec<_> = (0..writers)
                    .map(|_| {
                        let domain = domain.clone();
                        let running = running.clone();
                        thread::spawn(move || {
                            let ctx = domain.register_context();
                            let mut sections = 0u64;
                            while running.load(Ordering::Relaxed) {
                                let section = ctx.enter();
                                black_box(section.epoch());
                                sections += 1;
                            }
                            sections
                        })
                    })
                    .collect();

                b.iter(|| barrier.synchronize().unwrap());

                running.store(false, Ordering::Relaxed);
                for handle in handles {
                    black_box(handle.join().unwrap());
                }
            },
        );
    }

    group.finish();
}

/// Benchmark: Writer-side cost of entering a critical section
fn bench_enter(c: &mut Criterion) {
    let mut group = c.benchmark_group("context_enter");

    group.bench_function("enter_exit", |b| {
        let (_barrier, domain) = QuiescenceDomain::new();
        let ctx = domain.register_context();
        b.iter(|| {
            let section = ctx.enter();
            black_box(section.epoch());
        });
    });

    group.bench_function("nested_enter", |b| {
        let (_barrier, domain) = QuiescenceDomain::new();
        let ctx = domain.register_context();
        let _outer = ctx.enter();
        b.iter(|| {
            let section = ctx.enter();
            black_box(section.epoch());
        });
    });

    group.finish();
}

criterion_group!(benches, bench_idle_contexts, bench_busy_contexts, bench_enter);
criterion_main!(benches);
