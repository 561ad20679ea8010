//! Codec benchmarks
//!
//! Measures command encoding and reply decoding without any I/O.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use igt_tracker::protocol::command::{Command, ReplyOptions};
use igt_tracker::protocol::crc::{append_crc, calculate_crc};
use igt_tracker::protocol::reply::parse_reply;
use igt_tracker::protocol::tx::{HandleRecord, PortStatus, TxReply};
use igt_tracker::tracking::sample::decode_transform;
use std::time::Instant;

fn tx_reply(tools: u16) -> TxReply {
    let records = (0..tools)
        .map(|i| {
            let offset = f64::from(i) * 10.0;
            HandleRecord::valid(
                0x0A + i,
                [0.7071, 0.0, 0.7071, 0.0, offset, -offset, -1500.0, 0.12],
                PortStatus::AVAILABLE_MASK,
                42,
            )
        })
        .collect();
    TxReply {
        records,
        system_status: 0,
    }
}

fn bench_command_encode(c: &mut Criterion) {
    c.bench_function("tx_command_encode", |b| {
        let command = Command::Tx(ReplyOptions::default());
        b.iter(|| black_box(command.encode()));
    });
}

fn bench_crc(c: &mut Criterion) {
    let payload = tx_reply(8).encode();
    c.bench_function("crc16_8_tool_reply", |b| {
        b.iter(|| black_box(calculate_crc(payload.as_bytes())));
    });
}

fn bench_tx_decode(c: &mut Criterion) {
    let mut record = tx_reply(4).encode().into_bytes();
    append_crc(&mut record);
    record.push(b'\r');

    c.bench_function("tx_reply_parse_4_tools", |b| {
        b.iter(|| {
            let reply = parse_reply(black_box(&record)).unwrap();
            black_box(reply)
        });
    });

    let text = tx_reply(4).encode();
    c.bench_function("tx_reply_decode_samples_4_tools", |b| {
        b.iter(|| {
            let reply = TxReply::parse(&text).unwrap();
            let valid_until = Instant::now();
            let samples: Vec<_> = reply
                .records
                .iter()
                .filter_map(|r| r.transform.as_ref())
                .map(|raw| decode_transform(raw, valid_until))
                .collect();
            black_box(samples)
        });
    });
}

criterion_group!(benches, bench_command_encode, bench_crc, bench_tx_decode);

criterion_main!(benches);
