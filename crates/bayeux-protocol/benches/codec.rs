//! Codec benchmarks for bayeux-protocol.

use bayeux_protocol::{channel, codec, Message};
use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use serde_json::json;

fn batch(size: usize) -> Vec<Message> {
    (0..size)
        .map(|i| {
            Message::publish("/chat/lobby", json!({"seq": i, "text": "hello"}))
                .with_client_id("c1")
                .with_id(i.to_string())
        })
        .collect()
}

fn bench_encode(c: &mut Criterion) {
    let messages = batch(16);
    let encoded = codec::encode(&messages).unwrap();

    let mut group = c.benchmark_group("encode");
    group.throughput(Throughput::Bytes(encoded.len() as u64));
    group.bench_function("batch_16", |b| b.iter(|| codec::encode(black_box(&messages))));
    group.bench_function("form_16", |b| {
        b.iter(|| codec::encode_form(black_box(&messages)))
    });
    group.finish();
}

fn bench_decode(c: &mut Criterion) {
    let encoded = codec::encode(&batch(16)).unwrap();

    let mut group = c.benchmark_group("decode");
    group.throughput(Throughput::Bytes(encoded.len() as u64));
    group.bench_function("batch_16", |b| b.iter(|| codec::decode(black_box(&encoded))));
    group.finish();
}

fn bench_expand(c: &mut Criterion) {
    c.bench_function("expand_depth_4", |b| {
        b.iter(|| channel::expand(black_box("/org/team/room/thread")))
    });
}

criterion_group!(benches, bench_encode, bench_decode, bench_expand);
criterion_main!(benches);
