//! Transaction benchmarks - multi-key updates and compare-and-swap

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use nosql::driver::Driver;
use nosql::transaction::Transaction;
use nosql_bench::config::{BenchmarkConfig, EMBEDDED_BACKENDS};
use nosql_bench::data_gen::{generate_entries, key_for, random_value};
use nosql_bench::stores::{create_db, create_populated_db, BENCH_BUCKET};
use std::hint::black_box;

fn bench_update_commit(c: &mut Criterion) {
    let config = BenchmarkConfig::from_env();
    let mut group = c.benchmark_group("Transaction/Update");
    group.sample_size(20);
    let tx_count = 100;

    for &ops_per_tx in [1, 5, 25].iter() {
        group.throughput(Throughput::Elements((tx_count * ops_per_tx) as u64));

        for kind in EMBEDDED_BACKENDS {
            group.bench_with_input(BenchmarkId::new(kind.name(), ops_per_tx), &ops_per_tx, |b, &ops_per_tx| {
                b.iter_with_setup(
                    || create_db(kind, &config).unwrap(),
                    |ctx| {
                        ctx.block_on(async {
                            for t in 0..tx_count {
                                let tx = (0..ops_per_tx).fold(Transaction::new(), |tx, op| {
                                    tx.set(BENCH_BUCKET, key_for(t * ops_per_tx + op), random_value(config.value_size))
                                });
                                ctx.db().update(tx).await.unwrap();
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

fn bench_update_abort(c: &mut Criterion) {
    let config = BenchmarkConfig::from_env();
    let mut group = c.benchmark_group("Transaction/Abort");
    group.sample_size(20);
    let tx_count = 100;

    for kind in EMBEDDED_BACKENDS {
        group.bench_function(BenchmarkId::new(kind.name(), tx_count), |b| {
            b.iter_with_setup(
                || create_db(kind, &config).unwrap(),
                |ctx| {
                    let aborted = ctx.block_on(async {
                        let mut aborted = 0;
                        for t in 0..tx_count {
                            // the read of an absent key aborts the whole update
                            let tx = Transaction::new()
                                .set(BENCH_BUCKET, key_for(t), random_value(config.value_size))
                                .get(BENCH_BUCKET, "absent");
                            if ctx.db().update(tx).await.is_err() {
                                aborted += 1;
                            }
                        }
                        aborted
                    });
                    black_box(aborted)
                },
            );
        });
    }

    group.finish();
}

fn bench_compare_and_swap(c: &mut Criterion) {
    let config = BenchmarkConfig::from_env();
    let mut group = c.benchmark_group("Transaction/CompareAndSwap");
    let size = 1_000;
    let entries = generate_entries(BENCH_BUCKET, size, config.value_size);
    group.throughput(Throughput::Elements(size as u64));

    for kind in EMBEDDED_BACKENDS {
        group.bench_with_input(BenchmarkId::new(kind.name(), size), &entries, |b, entries| {
            b.iter_with_setup(
                || create_populated_db(kind, &config, entries).unwrap(),
                |ctx| {
                    let swapped = ctx.block_on(async {
                        let mut swapped = 0;
                        for entry in entries {
                            let outcome = ctx
                                .db()
                                .compare_and_swap(BENCH_BUCKET, &entry.key, Some(&entry.value), b"swapped")
                                .await
                                .unwrap();
                            if outcome.swapped {
                                swapped += 1;
                            }
                        }
                        swapped
                    });
                    assert_eq!(swapped, entries.len());
                    black_box(ctx)
                },
            );
        });
    }

    group.finish();
}

criterion_group!(benches, bench_update_commit, bench_update_abort, bench_compare_and_swap);
criterion_main!(benches);
