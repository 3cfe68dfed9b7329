#![expect(
    missing_docs,
    clippy::undocumented_unsafe_blocks,
    reason = "benchmarks"
)]

use std::hint::black_box;
use std::iter;
use std::time::Instant;

use criterion::{Criterion, criterion_group, criterion_main};
use events_handoff::{
    CountdownLatch, Event, FORGET_WAITER, WaiterSlot, wait_any,
};

fn entrypoint(c: &mut Criterion) {
    let mut g = c.benchmark_group("events_handoff");

    g.bench_function("signal_no_waiter", |b| {
        b.iter_custom(|iterations| {
            let events = iter::repeat_with(|| Event::new(false))
                .take(usize::try_from(iterations).unwrap())
                .collect::<Vec<_>>();

            let start = Instant::now();

            for event in &events {
                unsafe { black_box(event.signal()) };
            }

            start.elapsed()
        });
    });

    g.bench_function("wait_signal_cycle", |b| {
        let slot = WaiterSlot::new(&FORGET_WAITER);

        b.iter_custom(|iterations| {
            let events = iter::repeat_with(|| Event::new(false))
                .take(usize::try_from(iterations).unwrap())
                .collect::<Vec<_>>();

            let start = Instant::now();

            for event in &events {
                unsafe {
                    let _ = black_box(event.try_wait(&slot));
                    black_box(event.signal());
                }
            }

            start.elapsed()
        });
    });

    g.bench_function("dismiss_cycle", |b| {
        let slot = WaiterSlot::new(&FORGET_WAITER);

        b.iter_custom(|iterations| {
            let events = iter::repeat_with(|| Event::new(false))
                .take(usize::try_from(iterations).unwrap())
                .collect::<Vec<_>>();

            let start = Instant::now();

            for event in &events {
                unsafe {
                    let _ = black_box(event.try_wait(&slot));
                    let _ = black_box(event.dismiss_wait(&slot));
                }
            }

            start.elapsed()
        });
    });

    g.bench_function("wait_any_pre_signaled", |b| {
        let mut latch = CountdownLatch::new();

        b.iter(|| {
            let events =
                [Event::new(false), Event::new(true), Event::new(false)];

            wait_any(&mut latch, black_box(&events));
        });
    });

    g.finish();
}

criterion_group!(benches, entrypoint);
criterion_main!(benches);
