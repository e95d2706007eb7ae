//! Single-key and listing benchmarks

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use nosql::driver::Driver;
use nosql_bench::config::{BenchmarkConfig, EMBEDDED_BACKENDS};
use nosql_bench::data_gen::{generate_entries, key_for, random_indexes};
use nosql_bench::stores::{create_db, create_populated_db, BENCH_BUCKET};
use std::hint::black_box;

fn bench_set(c: &mut Criterion) {
    let config = BenchmarkConfig::from_env();
    let mut group = c.benchmark_group("CRUD/Set");

    for &size in config.entry_counts.iter() {
        let entries = generate_entries(BENCH_BUCKET, size, config.value_size);
        group.throughput(Throughput::Elements(size as u64));

        for kind in EMBEDDED_BACKENDS {
            group.bench_with_input(BenchmarkId::new(kind.name(), size), &entries, |b, entries| {
                b.iter_with_setup(
                    || create_db(kind, &config).unwrap(),
                    |ctx| {
                        ctx.populate(entries).unwrap();
                        black_box(ctx)
                    },
                );
            });
        }
    }

    group.finish();
}

fn bench_get(c: &mut Criterion) {
    let config = BenchmarkConfig::from_env();
    let mut group = c.benchmark_group("CRUD/Get");
    let reads = 1_000;

    for &size in config.entry_counts.iter() {
        let entries = generate_entries(BENCH_BUCKET, size, config.value_size);
        let indexes = random_indexes(size, reads);
        group.throughput(Throughput::Elements(reads as u64));

        for kind in EMBEDDED_BACKENDS {
            let ctx = create_populated_db(kind, &config, &entries).unwrap();
            group.bench_with_input(BenchmarkId::new(kind.name(), size), &indexes, |b, indexes| {
                b.iter(|| {
                    ctx.block_on(async {
                        let mut bytes = 0;
                        for &i in indexes {
                            bytes += ctx.db().get(BENCH_BUCKET, &key_for(i)).await.unwrap().len();
                        }
                        black_box(bytes)
                    })
                });
            });
        }
    }

    group.finish();
}

fn bench_delete(c: &mut Criterion) {
    let config = BenchmarkConfig::from_env();
    let mut group = c.benchmark_group("CRUD/Delete");

    for &size in config.entry_counts.iter() {
        let entries = generate_entries(BENCH_BUCKET, size, config.value_size);
        group.throughput(Throughput::Elements(size as u64));

        for kind in EMBEDDED_BACKENDS {
            group.bench_with_input(BenchmarkId::new(kind.name(), size), &entries, |b, entries| {
                b.iter_with_setup(
                    || create_populated_db(kind, &config, entries).unwrap(),
                    |ctx| {
                        ctx.block_on(async {
                            for entry in entries {
                                ctx.db().del(BENCH_BUCKET, &entry.key).await.unwrap();
                            }
                        });
                        black_box(ctx)
                    },
                );
            });
        }
    }

    group.finish();
}

fn bench_list(c: &mut Criterion) {
    let config = BenchmarkConfig::from_env();
    let mut group = c.benchmark_group("CRUD/List");

    for &size in config.entry_counts.iter() {
        let entries = generate_entries(BENCH_BUCKET, size, config.value_size);
        group.throughput(Throughput::Elements(size as u64));

        for kind in EMBEDDED_BACKENDS {
            let ctx = create_populated_db(kind, &config, &entries).unwrap();
            group.bench_function(BenchmarkId::new(kind.name(), size), |b| {
                b.iter(|| {
                    let listed = ctx.block_on(ctx.db().list(BENCH_BUCKET)).unwrap();
                    assert_eq!(listed.len(), size);
                    black_box(listed)
                });
            });
        }
    }

    group.finish();
}

criterion_group!(benches, bench_set, bench_get, bench_delete, bench_list);
criterion_main!(benches);
