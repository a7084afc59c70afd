//! Throughput benchmarks for Relay.
//!
//! These benchmarks measure the raw throughput of the presence registry, the
//! message router and the presence broadcaster.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use relay_protocol::ChatMessage;
use std::sync::Arc;
use tenvis_relay_core::{
    ConnectionGuard, ConnectionId, ConnectionManager, Handshake, OutboundReceiver,
    PresenceRegistry, SessionId, UserId,
};

/// Open `count` sessions of `user` on `manager`.
fn open_sessions(
    manager: &Arc<ConnectionManager>,
    user: &str,
    count: usize,
) -> Vec<(ConnectionGuard, OutboundReceiver)> {
    (0..count)
        .map(|i| {
            manager
                .connect(&Handshake::new(user, format!("session-{}", i)))
                .unwrap()
        })
        .collect()
}

fn drain(sessions: &mut [(ConnectionGuard, OutboundReceiver)]) {
    for (_, rx) in sessions {
        while rx.try_recv().is_ok() {}
    }
}

/// Benchmark registry operations.
fn bench_registry(c: &mut Criterion) {
    let mut group = c.benchmark_group("registry");

    group.bench_function("register", |b| {
        let registry = PresenceRegistry::new();
        let mut i = 0u64;
        b.iter(|| {
            let user = UserId::new(format!("user-{}", i % 1000));
            let session = SessionId::new(format!("session-{}", i));
            let conn = ConnectionId::new(format!("conn-{}", i));
            i += 1;
            registry.register(&user, &session, &conn)
        });
    });

    group.bench_function("register_deregister", |b| {
        let registry = PresenceRegistry::new();
        let user = UserId::from("alice");
        let session = SessionId::from("s1");
        let conn = ConnectionId::from("conn-1");
        b.iter(|| {
            registry.register(&user, &session, &conn);
            registry.deregister_connection(&user, &session, black_box(&conn))
        });
    });

    for size in [100, 10_000].iter() {
        group.throughput(Throughput::Elements(*size as u64));
        group.bench_with_input(
            BenchmarkId::new("online_user_ids", size),
            size,
            |b, &size| {
                let registry = PresenceRegistry::new();
                for i in 0..size {
                    registry.register(
                        &UserId::new(format!("user-{}", i)),
                        &SessionId::default(),
                        &ConnectionId::new(format!("conn-{}", i)),
                    );
                }
                b.iter(|| registry.online_user_ids());
            },
        );
    }

    group.finish();
}

/// Benchmark message fan-out by number of receiver sessions.
fn bench_fanout(c: &mut Criterion) {
    let mut group = c.benchmark_group("fanout");

    for size in [1, 10, 100].iter() {
        group.throughput(Throughput::Elements(*size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, &size| {
            let manager = Arc::new(ConnectionManager::new());
            let sender = open_sessions(&manager, "alice", 2);
            let mut receivers = open_sessions(&manager, "bob", size);
            let (origin, _) = &sender[0];
            let message = ChatMessage::new("alice", "bob", "hello");

            b.iter(|| {
                let fan_out = origin.send_message(black_box(message.clone())).unwrap();
                drain(&mut receivers);
                fan_out
            });
        });
    }

    group.finish();
}

/// Benchmark presence snapshot broadcast by number of connections.
fn bench_broadcast(c: &mut Criterion) {
    let mut group = c.benchmark_group("broadcast");

    for size in [10, 100, 1000].iter() {
        group.throughput(Throughput::Elements(*size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, &size| {
            let manager = Arc::new(ConnectionManager::new());
            let mut sessions: Vec<_> = (0..size)
                .map(|i| {
                    manager
                        .connect(&Handshake::new(format!("user-{}", i), "default"))
                        .unwrap()
                })
                .collect();
            drain(&mut sessions);

            b.iter(|| {
                let result = manager.broadcaster().broadcast();
                drain(&mut sessions);
                result
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_registry, bench_fanout, bench_broadcast);
criterion_main!(benches);
