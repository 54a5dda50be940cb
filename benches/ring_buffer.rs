//! Criterion benchmarks for the byte ring between transform and sink.
//!
//! Key metrics:
//! - Push/pop throughput on anonymous and file-backed mappings
//! - Cross-thread SPSC throughput
//! - Cost of a full-ring push (the drop path)
//!
//! Run with: cargo bench --bench ring_buffer

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use keypipe::data::ring_buffer::{PushOutcome, RingChannel};
use std::thread;

const BATCH: usize = 1000;

/// Push a batch and drain it again, single-threaded.
fn ring_push_pop(c: &mut Criterion) {
    let mut group = c.benchmark_group("ring_push_pop");
    group.throughput(Throughput::Bytes(BATCH as u64));

    let (mut tx, mut rx) = RingChannel::anonymous(BATCH).unwrap().split();
    group.bench_function(BenchmarkId::new("anonymous", BATCH), |b| {
        b.iter(|| {
            for i in 0..BATCH {
                tx.push(black_box(i as u8));
            }
            while let Some(byte) = rx.pop() {
                black_box(byte);
            }
        });
    });

    let temp_dir = tempfile::tempdir().unwrap();
    let path = temp_dir.path().join("bench_ring.buf");
    let (mut tx, mut rx) = RingChannel::create(&path, BATCH).unwrap().split();
    group.bench_function(BenchmarkId::new("file_backed", BATCH), |b| {
        b.iter(|| {
            for i in 0..BATCH {
                tx.push(black_box(i as u8));
            }
            black_box(rx.drain().count());
        });
    });

    group.finish();
}

/// Producer and consumer on separate threads.
fn ring_spsc_threads(c: &mut Criterion) {
    let mut group = c.benchmark_group("ring_spsc");

    for capacity in [64usize, 1000, 4096] {
        let total = 64 * 1024;
        group.throughput(Throughput::Bytes(total as u64));
        group.bench_with_input(
            BenchmarkId::new("threads", capacity),
            &capacity,
            |b, &capacity| {
                b.iter(|| {
                    let (mut tx, mut rx) = RingChannel::anonymous(capacity).unwrap().split();
                    let producer = thread::spawn(move || {
                        let mut sent = 0;
                        while sent < total {
                            if tx.push(sent as u8) == PushOutcome::Accepted {
                                sent += 1;
                            } else {
                                std::hint::spin_loop();
                            }
                        }
                    });

                    let mut received = 0;
                    while received < total {
                        match rx.pop() {
                            Some(byte) => {
                                black_box(byte);
                                received += 1;
                            }
                            None => std::hint::spin_loop(),
                        }
                    }
                    producer.join().unwrap();
                });
            },
        );
    }

    group.finish();
}

/// Pushing into a full ring only inspects the cursors.
fn ring_push_full(c: &mut Criterion) {
    let (mut tx, _rx) = RingChannel::anonymous(16).unwrap().split();
    while tx.push(0) == PushOutcome::Accepted {}

    c.bench_function("ring_push_full", |b| {
        b.iter(|| black_box(tx.push(black_box(b'x'))));
    });
}

criterion_group!(benches, ring_push_pop, ring_spsc_threads, ring_push_full);
criterion_main!(benches);
