//! MemBuffer write, staging and iteration benchmarks

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use kovan_txnkv::{Key, MemBuffer};

fn key(i: usize) -> Key {
    Key::from(format!("key{:08}", i))
}

fn filled(n: usize) -> MemBuffer {
    let buf = MemBuffer::default();
    for i in 0..n {
        buf.set(key(i), "value").unwrap();
    }
    buf
}

fn bench_set(c: &mut Criterion) {
    let mut group = c.benchmark_group("set");

    for size in [100, 1_000, 10_000].iter() {
        group.throughput(Throughput::Elements(*size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, &size| {
            b.iter(|| black_box(filled(size)));
        });
    }

    group.finish();
}

fn bench_get(c: &mut Criterion) {
    let mut group = c.benchmark_group("get");
    let buf = filled(10_000);
    let keys: Vec<Key> = (0..10_000).step_by(7).map(key).collect();

    group.throughput(Throughput::Elements(keys.len() as u64));
    group.bench_function("hit", |b| {
        b.iter(|| {
            for k in &keys {
                black_box(buf.get(k).unwrap());
            }
        });
    });

    group.finish();
}

fn bench_staging(c: &mut Criterion) {
    let mut group = c.benchmark_group("staging");
    let buf = filled(10_000);

    for writes in [10, 100, 1_000].iter() {
        group.throughput(Throughput::Elements(*writes as u64));
        group.bench_with_input(BenchmarkId::new("release", writes), writes, |b, &writes| {
            b.iter(|| {
                let h = buf.staging();
                for i in 0..writes {
                    buf.set(key(i), "staged").unwrap();
                }
                buf.release(h);
            });
        });
        group.bench_with_input(BenchmarkId::new("cleanup", writes), writes, |b, &writes| {
            b.iter(|| {
                let h = buf.staging();
                for i in 0..writes {
                    buf.set(key(i), "staged").unwrap();
                }
                buf.cleanup(h);
            });
        });
    }

    group.finish();
}

fn bench_iter(c: &mut Criterion) {
    let mut group = c.benchmark_group("iter");
    let buf = filled(10_000);
    let h = buf.staging();
    for i in (0..10_000).step_by(3) {
        buf.set(key(i), "staged").unwrap();
    }

    group.throughput(Throughput::Elements(10_000));
    group.bench_function("merged_forward", |b| {
        b.iter(|| black_box(buf.iter(&Key::default(), None).count()));
    });
    group.bench_function("snapshot_forward", |b| {
        b.iter(|| black_box(buf.snapshot_iter(&Key::default(), None).count()));
    });

    group.finish();
    buf.cleanup(h);
}

criterion_group!(benches, bench_set, bench_get, bench_staging, bench_iter);
criterion_main!(benches);
