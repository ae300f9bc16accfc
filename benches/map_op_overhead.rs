//! Lock-free map operation benchmarks
//!
//! The registry lookup (`get`) sits on the capture hot path, so its
//! latency matters the same way the queue push does. `put`/`remove` run
//! from thread lifecycle callbacks and are measured for reference.
//!
//! ```bash
//! cargo bench --bench map_op_overhead
//! ```

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use muestreo::lock_free_map::LockFreeMap;

fn populated_map(entries: u64) -> LockFreeMap {
    let map = LockFreeMap::with_capacity(entries as usize * 4);
    for key in 1..=entries {
        map.put(key, key + 1);
    }
    map
}

fn bench_get_hit(c: &mut Criterion) {
    let map = populated_map(1024);
    c.bench_function("map_get_hit", |b| b.iter(|| map.get(black_box(512))));
}

fn bench_get_miss(c: &mut Criterion) {
    let map = populated_map(1024);
    c.bench_function("map_get_miss", |b| b.iter(|| map.get(black_box(1_000_000))));
}

fn bench_put_update(c: &mut Criterion) {
    let map = populated_map(1024);
    c.bench_function("map_put_update", |b| {
        b.iter(|| map.put(black_box(512), black_box(7)))
    });
}

fn bench_remove_reinsert(c: &mut Criterion) {
    let map = populated_map(1024);
    c.bench_function("map_remove_reinsert", |b| {
        b.iter(|| {
            map.remove(black_box(512));
            map.put(black_box(512), black_box(7))
        })
    });
}

criterion_group!(
    benches,
    bench_get_hit,
    bench_get_miss,
    bench_put_update,
    bench_remove_reinsert
);
criterion_main!(benches);
