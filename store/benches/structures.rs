//! Microbenchmarks for the hot data structures.

use criterion::{Criterion, black_box, criterion_group, criterion_main};
use store::Store;
use store::zset::ZSet;

fn store_set_get(c: &mut Criterion) {
    let keys: Vec<Vec<u8>> = (0..10_000u32)
        .map(|i| format!("key-{i}").into_bytes())
        .collect();

    c.bench_function("store/set_10k", |b| {
        b.iter(|| {
            let mut store = Store::new();
            for key in &keys {
                store.set(black_box(key), b"value").unwrap();
            }
            store
        });
    });

    let mut store = Store::new();
    for key in &keys {
        store.set(key, b"value").unwrap();
    }
    c.bench_function("store/get_hit", |b| {
        let mut i = 0usize;
        b.iter(|| {
            let key = &keys[i % keys.len()];
            i = i.wrapping_add(7);
            black_box(store.get(black_box(key)).unwrap())
        });
    });
}

fn zset_ops(c: &mut Criterion) {
    let names: Vec<Vec<u8>> = (0..10_000u32)
        .map(|i| format!("member-{i}").into_bytes())
        .collect();

    c.bench_function("zset/insert_10k", |b| {
        b.iter(|| {
            let mut zset = ZSet::new();
            for (i, name) in names.iter().enumerate() {
                zset.insert(black_box(name), (i % 357) as f64);
            }
            zset
        });
    });

    let mut zset = ZSet::new();
    for (i, name) in names.iter().enumerate() {
        zset.insert(name, (i % 357) as f64);
    }
    c.bench_function("zset/range_100", |b| {
        b.iter(|| black_box(zset.range(black_box(100.0), b"", 0, 100)));
    });
}

criterion_group!(benches, store_set_get, zset_ops);
criterion_main!(benches);
