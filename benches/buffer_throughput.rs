use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::sync::Arc;
use std::thread;
use widget_factory::{BoundedBuffer, Widget};

const ITEMS: u64 = 10_000;

fn single_thread(c: &mut Criterion) {
    let buffer = BoundedBuffer::new(64).unwrap();
    c.bench_function("insert_remove_single_thread", |b| {
        b.iter(|| {
            let slot = buffer.try_reserve_slot_for_insert().unwrap();
            slot.insert(Widget { serial: 0, value: 7 }).unwrap();
            let (widget, _) = buffer.try_reserve_slot_for_remove().unwrap().remove().unwrap();
            black_box(widget)
        })
    });
}

fn contended(c: &mut Criterion) {
    let mut group = c.benchmark_group("contended_exchange");
    group.throughput(Throughput::Elements(ITEMS));

    for workers in [1usize, 2, 4] {
        group.bench_with_input(BenchmarkId::from_parameter(workers), &workers, |b, &workers| {
            b.iter(|| {
                let buffer = Arc::new(BoundedBuffer::new(200).unwrap());
                let per_worker = ITEMS / workers as u64;
                let mut handles = Vec::new();
                for _ in 0..workers {
                    let producer = buffer.clone();
                    handles.push(thread::spawn(move || {
                        for serial in 0..per_worker {
                            let slot = producer.try_reserve_slot_for_insert().unwrap();
                            slot.insert(Widget { serial, value: 0 }).unwrap();
                        }
                    }));
                    let consumer = buffer.clone();
                    handles.push(thread::spawn(move || {
                        for _ in 0..per_worker {
                            black_box(consumer.try_reserve_slot_for_remove().unwrap().remove().unwrap());
                        }
                    }));
                }
                for handle in handles {
                    handle.join().unwrap();
                }
            })
        });
    }
    group.finish();
}

criterion_group!(benches, single_thread, contended);
criterion_main!(benches);
