use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use tidewire::{Handle, HandlePool, MessageAllocator, MessageQueue, Internal};

#[derive(Default)]
struct Session {
    id: u64,
    bytes: [u8; 32],
}

fn benchmark_create_destroy(c: &mut Criterion) {
    let mut group = c.benchmark_group("HandlePool_CreateDestroy");

    for capacity in [64u16, 1024, 16384].iter() {
        group.throughput(Throughput::Elements(*capacity as u64));
        group.bench_with_input(BenchmarkId::new("fill_drain", capacity), capacity, |b, &capacity| {
            let mut pool: HandlePool<Session> = HandlePool::new(capacity).unwrap();
            let mut handles = Vec::with_capacity(capacity as usize);

            b.iter(|| {
                for i in 0..capacity as u64 {
                    handles.push(pool.create_with(|| Session { id: i, bytes: [0; 32] }).unwrap());
                }
                for handle in handles.drain(..) {
                    pool.destroy(handle).unwrap();
                }
            });
        });
    }

    group.finish();
}

fn benchmark_lookup(c: &mut Criterion) {
    let mut group = c.benchmark_group("HandlePool_Lookup");
    let mut pool: HandlePool<Session> = HandlePool::new(1024).unwrap();
    let handles: Vec<Handle> = (0..1024).map(|_| pool.create_default().unwrap()).collect();

    group.bench_function("get", |b| {
        b.iter(|| {
            for handle in &handles {
                black_box(pool.get(*handle).map(|s| s.id));
            }
        });
    });

    group.bench_function("from_index", |b| {
        b.iter(|| {
            for index in 0..1024u16 {
                black_box(pool.from_index(index).map(|s| s.bytes[0]));
            }
        });
    });

    group.finish();
}

fn benchmark_message_queue(c: &mut Criterion) {
    let mut group = c.benchmark_group("MessageQueue");

    group.bench_function("alloc_push_pop_256", |b| {
        let mut messages = MessageAllocator::new(1 << 20);
        let mut queue = MessageQueue::new();
        let handle = Handle::default();

        b.iter(|| {
            for _ in 0..256 {
                let msg = messages.alloc(handle, 128, true, Internal::None).unwrap();
                queue.push(msg);
            }
            while let Some(msg) = queue.pop() {
                black_box(msg.len());
            }
        });
    });

    group.finish();
}

criterion_group!(benches, benchmark_create_destroy, benchmark_lookup, benchmark_message_queue);
criterion_main!(benches);
