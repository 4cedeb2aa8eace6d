//! Benchmarks for the delegation file reader and block derivation.

use criterion::{Criterion, Throughput, black_box, criterion_group, criterion_main};
use rir_stats::blocks::ipv4_blocks;
use rir_stats::parser::parse_line;
use rir_stats::reader::{ReadOptions, Reader};
use std::net::Ipv4Addr;

/// Sample record lines for benchmarking.
const SAMPLE_LINES: &[&str] = &[
    "2.3|apnic|20110113|23486|19850701|20110112|+1000",
    "apnic|*|ipv4|*|17947|summary",
    "apnic|JP|asn|173|1|20020801|allocated",
    "apnic|MM|ipv4|203.81.160.0|4096|20100122|assigned",
    "apnic|JP|ipv6|2001:200::|35|19990813|allocated",
    "ripencc|PL|ipv4|193.9.25.0|256|20090225|assigned|c7e2d1f0",
    "# comment",
];

/// Build a synthetic delegation file with `records` record lines.
fn synthetic_file(records: u32) -> Vec<u8> {
    let mut data = String::from("2|ripencc|20240101|0|19930901|20240101|+0100\n");
    data.push_str("ripencc|*|asn|*|0|summary\n");
    data.push_str("ripencc|*|ipv4|*|0|summary\n");
    for i in 0..records {
        if i % 3 == 0 {
            data.push_str(&format!("ripencc|NL|asn|{}|1|20020801|allocated|x{}\n", i, i));
        } else {
            data.push_str(&format!(
                "ripencc|DE|ipv4|{}.{}.{}.0|768|20100122|assigned|x{}\n",
                (i >> 16) & 0xff,
                (i >> 8) & 0xff,
                i & 0xff,
                i
            ));
        }
    }
    data.into_bytes()
}

fn bench_parse_line(c: &mut Criterion) {
    let mut group = c.benchmark_group("parse_line");
    let mut fields = Vec::new();

    group.throughput(Throughput::Elements(SAMPLE_LINES.len() as u64));
    group.bench_function("batch", |b| {
        b.iter(|| {
            for (i, line) in SAMPLE_LINES.iter().enumerate() {
                let _ = parse_line(black_box(*line), i + 1, &mut fields);
            }
        })
    });

    group.finish();
}

fn bench_read(c: &mut Criterion) {
    let mut group = c.benchmark_group("read");
    let runtime = tokio::runtime::Runtime::new().expect("Failed to build runtime");
    let data = synthetic_file(100_000);

    group.throughput(Throughput::Bytes(data.len() as u64));
    for sections in [1, 5] {
        let reader = Reader::new(
            data.clone(),
            ReadOptions {
                sections,
                ..Default::default()
            },
        );
        group.bench_function(format!("sections_{}", sections), |b| {
            b.iter(|| runtime.block_on(reader.read()))
        });
    }

    group.finish();
}

fn bench_ipv4_blocks(c: &mut Criterion) {
    let mut group = c.benchmark_group("ipv4_blocks");

    group.bench_function("aligned", |b| {
        b.iter(|| ipv4_blocks(black_box(Ipv4Addr::new(203, 81, 160, 0)), black_box(4096)))
    });
    group.bench_function("unaligned", |b| {
        b.iter(|| ipv4_blocks(black_box(Ipv4Addr::new(193, 9, 25, 7)), black_box(100_000)))
    });

    group.finish();
}

criterion_group!(benches, bench_parse_line, bench_read, bench_ipv4_blocks);
criterion_main!(benches);
