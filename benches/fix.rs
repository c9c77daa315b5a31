use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use framebuf::{BufferPool, PageId, PoolOptions};
use tempfile::tempdir;

fn bench_fix(c: &mut Criterion) {
    let dir = tempdir().unwrap();
    let pool = BufferPool::open_in(
        dir.path(),
        PoolOptions {
            page_size: 4096,
            page_count: 64,
        },
    )
    .unwrap();

    // warm the page so the measured loops stay on the hit path
    let page = pool.fix(PageId(1), true).unwrap();
    pool.unfix(page, false);

    let mut group = c.benchmark_group("fix");
    group.throughput(Throughput::Elements(1));
    group.bench_function("hit_shared", |b| {
        b.iter(|| {
            let page = pool.fix(black_box(PageId(1)), false).unwrap();
            pool.unfix(page, false);
        })
    });
    group.bench_function("hit_exclusive", |b| {
        b.iter(|| {
            let page = pool.fix(black_box(PageId(1)), true).unwrap();
            pool.unfix(page, false);
        })
    });
    group.finish();
}

fn bench_eviction(c: &mut Criterion) {
    let dir = tempdir().unwrap();
    let pool = BufferPool::open_in(
        dir.path(),
        PoolOptions {
            page_size: 4096,
            page_count: 4,
        },
    )
    .unwrap();

    // twice as many pages as frames: every fix in the cycle evicts
    let mut group = c.benchmark_group("eviction");
    group.throughput(Throughput::Elements(8));
    group.bench_function("cycle_clean", |b| {
        b.iter(|| {
            for i in 0..8u64 {
                let page = pool.fix(black_box(PageId(i)), false).unwrap();
                pool.unfix(page, false);
            }
        })
    });
    group.finish();
}

criterion_group!(benches, bench_fix, bench_eviction);
criterion_main!(benches);
