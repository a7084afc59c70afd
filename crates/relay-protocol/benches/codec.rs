//! Codec benchmarks for relay-protocol.

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use relay_protocol::{codec, ChatMessage, Frame};

fn deliver_frame(text_len: usize) -> Frame {
    Frame::message_deliver(
        ChatMessage::new("user-a", "user-b", "x".repeat(text_len))
            .with_created_at("2024-01-01T00:00:00.000Z"),
    )
}

fn bench_encode_small(c: &mut Criterion) {
    let frame = deliver_frame(64);

    let mut group = c.benchmark_group("encode");
    group.throughput(Throughput::Bytes(64));
    group.bench_function("deliver_64B", |b| b.iter(|| codec::encode(black_box(&frame))));
    group.bench_function("deliver_64B_json", |b| {
        b.iter(|| codec::encode_json(black_box(&frame)))
    });
    group.finish();
}

fn bench_decode_small(c: &mut Criterion) {
    let frame = deliver_frame(64);
    let encoded = codec::encode(&frame).unwrap();

    let mut group = c.benchmark_group("decode");
    group.throughput(Throughput::Bytes(encoded.len() as u64));
    group.bench_function("deliver_64B", |b| {
        b.iter(|| codec::decode(black_box(&encoded)))
    });
    group.finish();
}

fn bench_snapshot(c: &mut Criterion) {
    let users: Vec<String> = (0..1000).map(|i| format!("user-{i}")).collect();
    let frame = Frame::presence_snapshot(1, users);

    c.bench_function("encode_snapshot_1000_users", |b| {
        b.iter(|| codec::encode(black_box(&frame)).unwrap())
    });
}

criterion_group!(benches, bench_encode_small, bench_decode_small, bench_snapshot);
criterion_main!(benches);
