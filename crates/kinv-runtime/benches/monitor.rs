use criterion::{black_box, criterion_group, criterion_main, Criterion};
use kinv_runtime::{Monitor, Step, Tasklet};
use std::sync::Arc;
use std::thread;

fn bench_uncontended(c: &mut Criterion) {
    let m = Arc::new(Monitor::new(0u64));
    c.bench_function("monitor_request_idle", |b| {
        b.iter(|| {
            m.request(Tasklet::new(|n: &mut u64, _| {
                *n = black_box(*n + 1);
                Step::Done
            }))
        })
    });
}

fn bench_nested_queue(c: &mut Criterion) {
    let m = Arc::new(Monitor::new(0u64));
    c.bench_function("monitor_drain_64_queued", |b| {
        b.iter(|| {
            let inner = Arc::clone(&m);
            m.request(Tasklet::new(move |_n: &mut u64, _| {
                for _ in 0..64 {
                    inner.request(Tasklet::new(|n: &mut u64, _| {
                        *n += 1;
                        Step::Done
                    }));
                }
                Step::Done
            }))
        })
    });
}

fn bench_contended(c: &mut Criterion) {
    c.bench_function("monitor_4_threads_x_1000", |b| {
        b.iter(|| {
            let m = Arc::new(Monitor::new(0u64));
            let handles: Vec<_> = (0..4)
                .map(|_| {
                    let m = Arc::clone(&m);
                    thread::spawn(move || {
                        for _ in 0..1000 {
                            m.request(Tasklet::new(|n: &mut u64, _| {
                                *n += 1;
                                Step::Done
                            }));
                        }
                    })
                })
                .collect();
            for h in handles {
                let _ = h.join();
            }
        })
    });
}

criterion_group!(benches, bench_uncontended, bench_nested_queue, bench_contended);
criterion_main!(benches);
