use asyncio_queue::PendingRegistry;
use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::hint::black_box;

fn register_take(c: &mut Criterion) {
    let mut group = c.benchmark_group("registry");
    for &inflight in &[1usize, 64, 4096] {
        group.throughput(Throughput::Elements(inflight as u64));
        group.bench_with_input(BenchmarkId::new("register_take", inflight), &inflight, |b, &n| {
            let reg = PendingRegistry::new(n);
            let mut tokens = Vec::with_capacity(n);
            b.iter(|| {
                for i in 0..n {
                    tokens.push(reg.register(i).unwrap());
                }
                for t in tokens.drain(..) {
                    black_box(reg.take(t));
                }
            });
        });
    }
    group.finish();
}

fn stale_lookup(c: &mut Criterion) {
    let reg = PendingRegistry::new(1024);
    let stale = reg.register(0u64).unwrap();
    reg.take(stale);
    let _live: Vec<_> = (0..512u64).map(|i| reg.register(i).unwrap()).collect();
    c.bench_function("registry/stale_take", |b| b.iter(|| black_box(reg.take(black_box(stale)))));
}

criterion_group!(benches, register_take, stale_lookup);
criterion_main!(benches);
