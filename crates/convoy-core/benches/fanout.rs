//! Fan-out benchmarks for convoy-core.
//!
//! Measures audience resolution and push cost as the number of live
//! connections grows.

use convoy_core::{
    outbox, Connection, Inbox, PresenceRegistry, Push, Recipients, AudienceResolver,
};
use convoy_protocol::UserType;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::sync::Arc;

fn populated(drivers: usize) -> (Arc<PresenceRegistry>, Vec<Inbox>) {
    let registry = Arc::new(PresenceRegistry::new());
    let mut inboxes = Vec::with_capacity(drivers);
    for i in 0..drivers {
        let (tx, rx) = outbox();
        registry.register(Connection::new(
            format!("conn-{}", i),
            format!("d-{}", i),
            UserType::Driver,
            format!("Driver {}", i),
            tx,
        ));
        inboxes.push(rx);
    }
    (registry, inboxes)
}

fn bench_resolve_and_push(c: &mut Criterion) {
    let mut group = c.benchmark_group("broadcast");

    for drivers in [10usize, 100, 1000] {
        let (registry, mut inboxes) = populated(drivers);
        let resolver = AudienceResolver::new(registry);
        let payload = Arc::new(Push::DriversUpdate(vec![]));

        group.throughput(Throughput::Elements(drivers as u64));
        group.bench_with_input(BenchmarkId::from_parameter(drivers), &drivers, |b, _| {
            b.iter(|| {
                let audience = resolver.resolve(black_box(&Recipients::Type(UserType::Driver)));
                let pushed = audience.push(Arc::clone(&payload));
                for rx in inboxes.iter_mut() {
                    while rx.try_recv().is_ok() {}
                }
                pushed
            })
        });
    }

    group.finish();
}

fn bench_register_unregister(c: &mut Criterion) {
    let (registry, _inboxes) = populated(1000);

    c.bench_function("register_unregister", |b| {
        b.iter(|| {
            let (tx, _rx) = outbox();
            registry.register(Connection::new("bench", "p-1", UserType::Passenger, "P", tx));
            registry.unregister(black_box("bench"))
        })
    });
}

criterion_group!(benches, bench_resolve_and_push, bench_register_unregister);
criterion_main!(benches);
