// Pool throughput benchmarks.
//
// Measures raw acquire/release overhead with an instant factory
// (no I/O, zero-latency creation).

use std::hint::black_box;
use std::sync::Arc;

use criterion::{Criterion, criterion_group, criterion_main};

use abacus_pool::pool::Pool;
use abacus_pool::testing::{CountingFactory, ManualClock};

fn bench_acquire_release(c: &mut Criterion) {
    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .unwrap();

    let clock = Arc::new(ManualClock::starting_now());
    let pool = Pool::new("bench", CountingFactory::new(clock));
    rt.block_on(async {
        for _ in 0..8 {
            pool.add_resource().await.unwrap();
        }
    });

    c.bench_function("acquire_release_hot", |b| {
        b.to_async(&rt).iter(|| {
            let pool = pool.clone();
            async move {
                let member = pool.acquire().await.unwrap();
                pool.release(black_box(member));
            }
        });
    });

    c.bench_function("available_snapshot", |b| {
        b.iter(|| black_box(pool.available_members().len()));
    });
}

criterion_group!(benches, bench_acquire_release);
criterion_main!(benches);
