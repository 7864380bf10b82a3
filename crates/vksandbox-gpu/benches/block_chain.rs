//! Block chain allocate/free throughput.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use vksandbox_gpu::BlockChain;

fn fill_and_drain(c: &mut Criterion) {
    let mut group = c.benchmark_group("fill_and_drain");
    for count in [64u64, 512, 4096] {
        group.bench_with_input(BenchmarkId::from_parameter(count), &count, |b, &count| {
            b.iter(|| {
                let mut chain = BlockChain::new(count * 1024);
                let blocks: Vec<_> = (0..count)
                    .map(|_| chain.allocate(black_box(1000), 16).unwrap().block)
                    .collect();
                for id in blocks.into_iter().rev() {
                    chain.free(id);
                }
                chain
            });
        });
    }
    group.finish();
}

fn fragmented_churn(c: &mut Criterion) {
    c.bench_function("fragmented_churn", |b| {
        let mut chain = BlockChain::new(64 * 1024 * 1024);
        let live: Vec<_> = (0..2048u64)
            .map(|i| chain.allocate(256 + (i % 7) * 512, 256).unwrap().block)
            .collect();
        // Free every other block so the free index holds many sizes.
        for &id in live.iter().step_by(2) {
            chain.free(id);
        }

        let mut i = 0u64;
        b.iter(|| {
            i += 1;
            let placement = chain.allocate(black_box(256 + (i % 11) * 300), 64).unwrap();
            chain.free(placement.block);
        });
    });
}

criterion_group!(benches, fill_and_drain, fragmented_churn);
criterion_main!(benches);
