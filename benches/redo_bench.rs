// Throughput benchmarks for the reserve/write/close path, single-threaded
// and under contention from multiple reserving threads.

use std::sync::Arc;
use std::thread;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use redo_mtr::config::RedoConfig;
use redo_mtr::redo::file::InMemoryLog;
use redo_mtr::redo::LogSys;

fn bench_config() -> RedoConfig {
    let mut c = RedoConfig::default();
    c.buf_size = 16 * 1024 * 1024;
    c
}

fn bench_reserve_write_close(c: &mut Criterion) {
    let mut group = c.benchmark_group("reserve_write_close");

    for record_len in [16usize, 128, 1024] {
        group.throughput(Throughput::Bytes(record_len as u64));
        group.bench_with_input(BenchmarkId::from_parameter(record_len), &record_len, |b, &len| {
            let log = LogSys::new(bench_config(), Arc::new(InMemoryLog::new(64 * 1024 * 1024)));
            let payload = vec![0xABu8; len];
            b.iter(|| {
                let h = log.reserve(len as u64);
                log.write(h.start_lsn, &payload);
                log.write_completed(h.start_lsn, h.end_lsn);
                log.close(h.start_lsn, h.end_lsn);
            });
        });
    }

    group.finish();
}

fn bench_contended_reserve(c: &mut Criterion) {
    let mut group = c.benchmark_group("contended_reserve");

    for n_threads in [2usize, 4, 8] {
        group.bench_with_input(BenchmarkId::from_parameter(n_threads), &n_threads, |b, &n_threads| {
            let log = LogSys::new(bench_config(), Arc::new(InMemoryLog::new(64 * 1024 * 1024)));
            b.iter(|| {
                thread::scope(|scope| {
                    for _ in 0..n_threads {
                        let log = &log;
                        scope.spawn(move || {
                            for _ in 0..100 {
                                let h = log.reserve(32);
                                log.write(h.start_lsn, &[1u8; 32]);
                                log.write_completed(h.start_lsn, h.end_lsn);
                                log.close(h.start_lsn, h.end_lsn);
                            }
                        });
                    }
                });
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_reserve_write_close, bench_contended_reserve);
criterion_main!(benches);
