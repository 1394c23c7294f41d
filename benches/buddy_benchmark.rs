/*!
 * Buddy Allocator Benchmark
 * Allocate/free churn and pointer encoding on the local sub-allocator
 */

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use pgas_runtime::{BuddyAllocator, GlobalPointer, SegmentId, TeamId, UnitId};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

const CAPACITY: usize = 16 * 1024 * 1024;
const MIN_BLOCK: usize = 64;

fn benchmark_churn(c: &mut Criterion) {
    let mut group = c.benchmark_group("buddy_churn");

    for size in [64usize, 1024, 16 * 1024, 256 * 1024].iter() {
        group.throughput(Throughput::Elements(1));

        // Allocate then free the same block; splits and merges every iteration
        group.bench_with_input(BenchmarkId::new("allocate_free", size), size, |b, &size| {
            let mut buddy = BuddyAllocator::new(CAPACITY, MIN_BLOCK).unwrap();
            b.iter(|| {
                let offset = buddy.allocate(black_box(size)).unwrap();
                buddy.free(black_box(offset)).unwrap();
            });
        });

        // Fill the pool in `size` blocks and drain it again
        group.bench_with_input(BenchmarkId::new("fill_drain", size), size, |b, &size| {
            let mut buddy = BuddyAllocator::new(CAPACITY, MIN_BLOCK).unwrap();
            let mut offsets = Vec::with_capacity(CAPACITY / size);
            b.iter(|| {
                while let Ok(offset) = buddy.allocate(size) {
                    offsets.push(offset);
                }
                for offset in offsets.drain(..).rev() {
                    buddy.free(offset).unwrap();
                }
                black_box(buddy.largest_free());
            });
        });
    }

    // Mixed sizes, freed in random order
    group.throughput(Throughput::Elements(256));
    group.bench_function("random_mix", |b| {
        let mut rng = StdRng::seed_from_u64(0x5eed);
        let sizes: Vec<usize> = (0..256).map(|_| rng.gen_range(1..=64 * 1024)).collect();
        let mut buddy = BuddyAllocator::new(CAPACITY, MIN_BLOCK).unwrap();
        let mut live = Vec::with_capacity(sizes.len());
        b.iter(|| {
            for &size in &sizes {
                if let Ok(offset) = buddy.allocate(size) {
                    live.push(offset);
                }
            }
            while !live.is_empty() {
                let offset = live.swap_remove(rng.gen_range(0..live.len()));
                buddy.free(offset).unwrap();
            }
        });
    });

    group.finish();
}

fn benchmark_pointer_encoding(c: &mut Criterion) {
    let gptr = GlobalPointer::new(UnitId(3), SegmentId(42), Some(TeamId(7)), 4096);
    let bytes = gptr.to_bytes().unwrap();

    c.bench_function("gptr_to_bytes", |b| {
        b.iter(|| black_box(black_box(&gptr).to_bytes().unwrap()));
    });
    c.bench_function("gptr_from_bytes", |b| {
        b.iter(|| black_box(GlobalPointer::from_bytes(black_box(&bytes)).unwrap()));
    });
}

criterion_group!(benches, benchmark_churn, benchmark_pointer_encoding);
criterion_main!(benches);
