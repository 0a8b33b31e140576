//! Benchmarks for the log row codec
//!
//! Run with: cargo bench

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use mqtt_replay::store::LogCodec;
use mqtt_replay::LogEntry;

fn sample_entries(count: usize) -> Vec<LogEntry> {
    (0..count)
        .map(|i| {
            let payload = if i % 10 == 0 {
                format!("{{\"seq\":{},\"note\":\"a,b\\nc `q`\"}}", i)
            } else {
                format!("{{\"seq\":{},\"value\":{}}}", i, i as f64 * 0.5)
            };
            LogEntry::new(i as f64 * 0.01, format!("sensors/{}/value", i % 16), payload)
        })
        .collect()
}

fn encode_log(codec: &LogCodec, entries: &[LogEntry]) -> String {
    let mut text = codec.header();
    for entry in entries {
        if let Ok(row) = codec.encode(entry) {
            text.push_str(&row);
        }
    }
    text
}

fn bench_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("log_encode");
    let codec = LogCodec::new();

    for size in [100, 1_000, 10_000].iter() {
        let entries = sample_entries(*size);
        group.throughput(Throughput::Elements(*size as u64));
        group.bench_with_input(BenchmarkId::new("encode", size), &entries, |b, entries| {
            b.iter(|| {
                for entry in entries {
                    black_box(codec.encode(entry).ok());
                }
            });
        });
    }

    group.finish();
}

fn bench_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("log_decode");
    let codec = LogCodec::new();

    for size in [100, 1_000, 10_000].iter() {
        let text = encode_log(&codec, &sample_entries(*size));
        group.throughput(Throughput::Bytes(text.len() as u64));
        group.bench_with_input(BenchmarkId::new("decode", size), &text, |b, text| {
            b.iter(|| black_box(codec.decode(text).ok()));
        });
    }

    group.finish();
}

criterion_group!(benches, bench_encode, bench_decode);

criterion_main!(benches);
