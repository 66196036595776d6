use std::hint::black_box;

use criterion::{criterion_group, criterion_main, Criterion};
use crossbeam_utils::thread::scope;

use quiesce::{Collector, Owned};

fn bench_pin(c: &mut Criterion) {
    let collector = Collector::new();
    let handle = collector.register();

    c.bench_function("single_pin", |b| b.iter(|| black_box(handle.pin())));

    c.bench_function("reentrant_pin", |b| {
        let _outer = handle.pin();
        b.iter(|| black_box(handle.pin()));
    });
}

fn bench_multi_pin(c: &mut Criterion) {
    const THREADS: usize = 8;
    const STEPS: usize = 10_000;

    let collector = Collector::new();

    c.bench_function("multi_pin", |b| {
        b.iter(|| {
            scope(|s| {
                for _ in 0..THREADS {
                    s.spawn(|_| {
                        let handle = collector.register();
                        for _ in 0..STEPS {
                            black_box(handle.pin());
                        }
                    });
                }
            })
            .unwrap();
        });
    });
}

fn bench_defer(c: &mut Criterion) {
    let collector = Collector::new();
    let handle = collector.register();

    c.bench_function("defer_destroy", |b| {
        b.iter(|| {
            let guard = handle.pin();
            let cell = Owned::new(0_u64).into_shared(&guard);
            unsafe { guard.defer_destroy(cell) };
        });
    });
}

criterion_group!(benches, bench_pin, bench_multi_pin, bench_defer);
criterion_main!(benches);
