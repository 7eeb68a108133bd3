use batchid::{
    BatchConfig, BatchSize, IdentifierAssignmentCoordinator, InsertTemplate, MemoryConnection,
    MemoryPersister, MemoryTable, SessionKey,
};
use core::hint::black_box;
use criterion::{Criterion, Throughput, criterion_group, criterion_main};
use std::{
    sync::{Arc, Barrier},
    thread::scope,
    time::Instant,
};

// Number of records assigned per benchmark iteration (split across threads
// for the contended benchmarks).
const TOTAL_RECORDS: usize = 4096;

type Columns = fn(&u64) -> Vec<String>;
type Coordinator = IdentifierAssignmentCoordinator<u64, u64, MemoryPersister<Columns>>;

fn columns(record: &u64) -> Vec<String> {
    vec![record.to_string()]
}

fn coordinator(batch_size: BatchSize) -> Coordinator {
    IdentifierAssignmentCoordinator::new(
        MemoryPersister::new("id", columns as Columns),
        BatchConfig::new(batch_size),
    )
}

fn template() -> InsertTemplate {
    InsertTemplate::new("insert into bench (value) values (?)", "id")
}

/// Prepares every record up front, then assigns keys for all of them.
fn bench_prepare_then_assign(c: &mut Criterion) {
    let mut group = c.benchmark_group("sequential/prepare-then-assign");
    group.throughput(Throughput::Elements(TOTAL_RECORDS as u64));
    let template = template();

    for batch in [1, 16, 50, 256] {
        let batch_size = BatchSize::new(batch).unwrap();
        group.bench_function(format!("elems/{TOTAL_RECORDS}/batch/{batch}"), |b| {
            b.iter_custom(|iters| {
                let start = Instant::now();

                for _ in 0..iters {
                    let coordinator = coordinator(batch_size);
                    let mut conn = MemoryConnection::new(MemoryTable::new());
                    let session = SessionKey::issue(1);
                    for record in 0..TOTAL_RECORDS as u64 {
                        coordinator.on_record_prepared(session, record).unwrap();
                    }
                    for _ in 0..TOTAL_RECORDS {
                        let key = coordinator
                            .on_row_about_to_insert(session, batch_size, &template, &mut conn)
                            .unwrap();
                        black_box(key);
                    }
                }

                start.elapsed()
            });
        });
    }

    group.finish();
}

/// Interleaves preparing and assigning, one batch at a time, the way a flush
/// loop drives the coordinator.
fn bench_interleaved(c: &mut Criterion) {
    let mut group = c.benchmark_group("sequential/interleaved");
    group.throughput(Throughput::Elements(TOTAL_RECORDS as u64));
    let template = template();

    for batch in [16, 50, 256] {
        let batch_size = BatchSize::new(batch).unwrap();
        group.bench_function(format!("elems/{TOTAL_RECORDS}/batch/{batch}"), |b| {
            b.iter_custom(|iters| {
                let start = Instant::now();

                for _ in 0..iters {
                    let coordinator = coordinator(batch_size);
                    let mut conn = MemoryConnection::new(MemoryTable::new());
                    let session = SessionKey::issue(1);
                    for chunk in (0..TOTAL_RECORDS as u64).collect::<Vec<_>>().chunks(batch) {
                        for record in chunk {
                            coordinator.on_record_prepared(session, *record).unwrap();
                        }
                        for _ in chunk {
                            let key = coordinator
                                .on_row_about_to_insert(session, batch_size, &template, &mut conn)
                                .unwrap();
                            black_box(key);
                        }
                    }
                }

                start.elapsed()
            });
        });
    }

    group.finish();
}

/// One shared coordinator and table, one session per thread.
fn bench_contended(c: &mut Criterion) {
    let mut group = c.benchmark_group("contended/sessions");
    let batch_size = BatchSize::new(50).unwrap();
    let template = template();
    let max_threads = num_cpus::get().max(2);

    for thread_count in [1, 2, 4, 8, 16].into_iter().filter(|t| *t <= max_threads) {
        let records_per_thread = TOTAL_RECORDS / thread_count;

        group.throughput(Throughput::Elements(TOTAL_RECORDS as u64));
        group.bench_function(
            format!("elems/{TOTAL_RECORDS}/threads/{thread_count}"),
            |b| {
                b.iter_custom(|iters| {
                    let start = Instant::now();

                    for _ in 0..iters {
                        let coordinator = Arc::new(coordinator(batch_size));
                        let table = MemoryTable::new();
                        let barrier = Arc::new(Barrier::new(thread_count + 1));
                        scope(|s| {
                            for t in 0..thread_count {
                                let coordinator = Arc::clone(&coordinator);
                                let barrier = Arc::clone(&barrier);
                                let table = table.clone();
                                let template = &template;
                                s.spawn(move || {
                                    let session = SessionKey::issue(t as u128);
                                    let mut conn = MemoryConnection::new(table);
                                    barrier.wait();
                                    for record in 0..records_per_thread as u64 {
                                        coordinator.on_record_prepared(session, record).unwrap();
                                    }
                                    for _ in 0..records_per_thread {
                                        let key = coordinator
                                            .on_row_about_to_insert(
                                                session, batch_size, template, &mut conn,
                                            )
                                            .unwrap();
                                        black_box(key);
                                    }
                                });
                            }
                            barrier.wait();
                        });
                    }

                    start.elapsed()
                });
            },
        );
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_prepare_then_assign,
    bench_interleaved,
    bench_contended,
);
criterion_main!(benches);
