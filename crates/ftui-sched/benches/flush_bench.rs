//! Benchmarks for mutation flushing and direct-event coalescing.
//!
//! Run with: cargo bench -p ftui-sched --bench flush_bench

use std::cell::Cell;
use std::hint::black_box;
use std::rc::Rc;
use std::time::Duration;

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use ftui_sched::testing::{TargetId, VirtualHost};
use ftui_sched::{Scheduler, direct_block};

fn fresh_scheduler() -> (VirtualHost<u32>, Scheduler<VirtualHost<u32>>, TargetId) {
    let host = VirtualHost::new();
    let target = host.target();
    let sched = Scheduler::new(host.clone());
    (host, sched, target)
}

fn bench_flush(c: &mut Criterion) {
    let mut group = c.benchmark_group("mutation/flush");

    for batch in [16u64, 256, 4096] {
        group.throughput(Throughput::Elements(batch));
        group.bench_with_input(BenchmarkId::new("queued", batch), &batch, |b, &batch| {
            b.iter(|| {
                let (host, sched, target) = fresh_scheduler();
                let block = direct_block(|_: &u32| {});
                sched.attach_direct(&target, "move", &block);
                host.emit(&target, "move", 0);

                let counter = Rc::new(Cell::new(0u64));
                for _ in 0..batch {
                    let counter = Rc::clone(&counter);
                    let _ = sched.mutation(move || counter.set(counter.get() + 1));
                }
                host.advance(Duration::from_millis(360));
                black_box(counter.get())
            });
        });
    }

    group.finish();
}

fn bench_immediate(c: &mut Criterion) {
    let (_host, sched, _target) = fresh_scheduler();
    c.bench_function("mutation/immediate", |b| {
        b.iter(|| black_box(sched.mutation(|| {}).is_complete()));
    });
}

fn bench_coalesce(c: &mut Criterion) {
    let mut group = c.benchmark_group("direct/coalesce");

    for events in [1u64, 32, 512] {
        group.throughput(Throughput::Elements(events));
        let (host, sched, target) = fresh_scheduler();
        let last = Rc::new(Cell::new(0u32));
        let l = Rc::clone(&last);
        let block = direct_block(move |event: &u32| l.set(*event));
        sched.attach_direct(&target, "move", &block);

        group.bench_with_input(BenchmarkId::new("per_frame", events), &events, |b, &events| {
            b.iter(|| {
                for i in 0..events {
                    host.emit(&target, "move", i as u32);
                }
                host.tick(Duration::from_millis(16));
                black_box(last.get())
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_flush, bench_immediate, bench_coalesce);
criterion_main!(benches);
