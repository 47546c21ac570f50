use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion};
use kinv_runtime::{Arena, FirstFitHeap};
use std::sync::Arc;

const SIZE: usize = 16 << 20;

fn seeded() -> FirstFitHeap {
    let arena = match Arena::new(SIZE) {
        Ok(a) => Arc::new(a),
        Err(e) => panic!("arena: {}", e),
    };
    let mut heap = FirstFitHeap::new(arena);
    heap.add_range(0, SIZE);
    heap
}

fn bench_alloc_free(c: &mut Criterion) {
    let mut heap = seeded();
    c.bench_function("heap_alloc_free_64", |b| {
        b.iter(|| {
            if let Ok(a) = heap.alloc(black_box(64), 64) {
                let _ = heap.free(a, 64);
            }
        })
    });
    c.bench_function("heap_alloc_free_4k_aligned", |b| {
        b.iter(|| {
            if let Ok(a) = heap.alloc(black_box(4096), 4096) {
                let _ = heap.free(a, 4096);
            }
        })
    });
}

fn bench_fragmented(c: &mut Criterion) {
    c.bench_function("heap_fragmented_1000", |b| {
        b.iter_batched(
            || {
                let mut heap = seeded();
                let blocks: Vec<usize> = (0..2000).filter_map(|_| heap.alloc(128, 64).ok()).collect();
                // Free every other block so first fit has to walk
                for a in blocks.iter().step_by(2) {
                    let _ = heap.free(*a, 128);
                }
                heap
            },
            |mut heap| {
                for _ in 0..1000 {
                    let _ = black_box(heap.alloc(256, 64));
                }
            },
            BatchSize::LargeInput,
        )
    });
}

criterion_group!(benches, bench_alloc_free, bench_fragmented);
criterion_main!(benches);
