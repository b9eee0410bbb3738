//! Performance benchmarks for command processing.
//!
//! These benchmarks measure the hot paths in the daemon:
//! - Request line framing and command parsing
//! - Permission evaluation
//! - Response serialization

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use daemon::files::{evaluate, EntryMetadata, Identity, Operation};
use protocol::{Command, LineDecoder, Permissions, Response};

/// Benchmark parsing of each command form.
fn bench_command_parsing(c: &mut Criterion) {
    let mut group = c.benchmark_group("command_parsing");

    for line in [
        "create report rwrnnn",
        "change report rwrwrw",
        "read report",
        "write report a",
        "create report rwx",
    ] {
        group.bench_function(line, |b| {
            b.iter(|| Command::parse(black_box(line)));
        });
    }

    group.bench_function("permissions", |b| {
        b.iter(|| Permissions::parse(black_box("rwrnnn")));
    });

    group.finish();
}

/// Benchmark line decoding over a batch of pipelined requests.
fn bench_line_decoding(c: &mut Criterion) {
    let mut group = c.benchmark_group("line_decoding");

    let batch: Vec<u8> = (0..64)
        .flat_map(|i| format!("write file{} a\r\n", i).into_bytes())
        .collect();
    group.throughput(Throughput::Bytes(batch.len() as u64));
    group.bench_function("batch_64_lines", |b| {
        b.iter(|| {
            let mut decoder = LineDecoder::new();
            decoder.push(black_box(&batch));
            let mut count = 0;
            while let Ok(Some(_line)) = decoder.next_line() {
                count += 1;
            }
            count
        });
    });

    group.finish();
}

/// Benchmark permission evaluation for each class.
fn bench_permission_evaluation(c: &mut Criterion) {
    let mut group = c.benchmark_group("permission_evaluation");

    let metadata = EntryMetadata {
        owner: "alice".to_string(),
        group: "G1".to_string(),
        perms: Permissions::parse("rwrnnn").unwrap(),
    };
    let requesters = [
        ("owner", Identity::new("alice", "G1")),
        ("group", Identity::new("carol", "G1")),
        ("other", Identity::new("bob", "G2")),
    ];

    for (class, requester) in &requesters {
        group.bench_function(*class, |b| {
            b.iter(|| evaluate(black_box(&metadata), black_box(requester)).allows(Operation::Read));
        });
    }

    group.finish();
}

/// Benchmark response serialization, small and read-sized.
fn bench_response_serialization(c: &mut Criterion) {
    let mut group = c.benchmark_group("response_serialization");

    let small = Response::ok("created report");
    group.bench_function("status_only", |b| {
        b.iter(|| black_box(&small).to_json());
    });

    let content = (0..100)
        .map(|_| "alice wrote here at 2024/05/01-13:45:09")
        .collect::<Vec<_>>()
        .join("\n");
    let large = Response::ok(content);
    group.throughput(Throughput::Bytes(large.message.len() as u64));
    group.bench_function("read_100_records", |b| {
        b.iter(|| black_box(&large).to_json());
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_command_parsing,
    bench_line_decoding,
    bench_permission_evaluation,
    bench_response_serialization,
);

criterion_main!(benches);
