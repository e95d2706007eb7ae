//! Concurrency benchmarks - parallel writers and contended compare-and-swap

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use nosql::driver::Driver;
use nosql_bench::config::{BenchmarkConfig, EMBEDDED_BACKENDS};
use nosql_bench::data_gen::{key_for, random_value};
use nosql_bench::stores::{create_db, BENCH_BUCKET};
use std::hint::black_box;

fn bench_concurrent_set(c: &mut Criterion) {
    let config = BenchmarkConfig::from_env();
    let mut group = c.benchmark_group("Concurrency/Set");
    group.sample_size(10);
    let entry_count = 2_000;

    for &task_count in [2, 4, 8].iter() {
        if task_count > num_cpus::get() * 2 {
            continue;
        }
        let per_task = entry_count / task_count;

        for kind in EMBEDDED_BACKENDS {
            group.bench_with_input(
                BenchmarkId::new(format!("{}/{}_tasks", kind.name(), task_count), entry_count),
                &per_task,
                |b, &per_task| {
                    b.iter_with_setup(
                        || create_db(kind, &config).unwrap(),
                        |ctx| {
                            let written = ctx.block_on(async {
                                let writers = (0..task_count).map(|task| {
                                    let db = ctx.db().clone();
                                    let value_size = config.value_size;
                                    tokio::spawn(async move {
                                        let mut written = 0;
                                        for i in 0..per_task {
                                            let key = key_for(task * per_task + i);
                                            if db.set(BENCH_BUCKET, &key, &random_value(value_size)).await.is_ok() {
                                                written += 1;
                                            }
                                        }
                                        written
                                    })
                                });
                                futures::future::join_all(writers)
                                    .await
                                    .into_iter()
                                    .map(|written| written.unwrap_or(0))
                                    .sum::<usize>()
                            });
                            black_box(written)
                        },
                    );
                },
            );
        }
    }

    group.finish();
}

fn bench_contended_cas(c: &mut Criterion) {
    let config = BenchmarkConfig::from_env();
    let mut group = c.benchmark_group("Concurrency/ContendedCas");
    group.sample_size(10);
    let rounds = 200;

    for &task_count in [2, 4, 8].iter() {
        for kind in EMBEDDED_BACKENDS {
            group.bench_function(BenchmarkId::new(kind.name(), task_count), |b| {
                b.iter_with_setup(
                    || create_db(kind, &config).unwrap(),
                    |ctx| {
                        let wins = ctx.block_on(async {
                            let mut wins = 0;
                            for round in 0..rounds {
                                // every task races to claim the same fresh key
                                let key = key_for(round);
                                let racers = (0..task_count).map(|task| {
                                    let db = ctx.db().clone();
                                    let key = key.clone();
                                    tokio::spawn(async move {
                                        let claim = format!("task-{}", task).into_bytes();
                                        db.compare_and_swap(BENCH_BUCKET, &key, None, &claim)
                                            .await
                                            .map(|outcome| outcome.swapped)
                                            .unwrap_or(false)
                                    })
                                });
                                let outcomes = futures::future::join_all(racers).await;
                                wins += outcomes.into_iter().filter(|won| matches!(won, Ok(true))).count();
                            }
                            wins
                        });
                        assert_eq!(wins, rounds);
                        black_box(wins)
                    },
                );
            });
        }
    }

    group.finish();
}

criterion_group!(benches, bench_concurrent_set, bench_contended_cas);
criterion_main!(benches);
