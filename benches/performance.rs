//! Performance benchmarks for subnetwatch

use async_trait::async_trait;
use chrono::Utc;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use futures::StreamExt;
use std::net::Ipv4Addr;
use std::sync::Arc;
use tokio::runtime::Runtime;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use subnetwatch::{
    client::ClientState,
    network::{ProbeOutcome, Prober, RangePrefix},
    protocol::ScanEvent,
    scanner::{create_batches, HostResult, RangeScanner},
    session::{ScanRequest, ScanSession},
};

/// Answers immediately so only scheduling overhead is measured.
struct InstantProber;

#[async_trait]
impl Prober for InstantProber {
    async fn probe(&self, target: Ipv4Addr) -> ProbeOutcome {
        ProbeOutcome::reachable(target.octets()[3] as u32)
    }
}

/// Benchmark prefix parsing and batch planning
fn bench_batch_planning(c: &mut Criterion) {
    let mut group = c.benchmark_group("batch_planning");

    group.bench_function("parse_prefix", |b| {
        b.iter(|| black_box("192.168.100").parse::<RangePrefix>())
    });

    for batch_size in [1, 50, 255].iter() {
        group.bench_with_input(BenchmarkId::new("create_batches", batch_size), batch_size, |b, &batch_size| {
            b.iter(|| create_batches(black_box(RangePrefix::new(10, 0, 0)), batch_size))
        });
    }

    group.finish();
}

/// Benchmark a full range sweep with an instant prober
fn bench_range_scan(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let mut group = c.benchmark_group("range_scan");

    for batch_size in [10, 50, 255].iter() {
        let scanner = RangeScanner::new(Arc::new(InstantProber)).with_batch_size(*batch_size);
        group.bench_with_input(BenchmarkId::new("scan_range", batch_size), batch_size, |b, _| {
            b.iter(|| {
                rt.block_on(async {
                    let batches: Vec<_> = scanner.scan_range(RangePrefix::new(10, 0, 0)).collect().await;
                    black_box(batches)
                })
            })
        });
    }

    let session = ScanSession::new(RangeScanner::new(Arc::new(InstantProber)));
    let request = ScanRequest::new(vec![RangePrefix::new(10, 0, 0), RangePrefix::new(10, 0, 1)]);
    group.bench_function("session_two_ranges", |b| {
        b.iter(|| {
            rt.block_on(async {
                let (tx, mut rx) = mpsc::channel(32);
                let drain = async { while rx.recv().await.is_some() {} };
                let run = async {
                    let outcome = session.run(&request, &tx, &CancellationToken::new()).await;
                    drop(tx);
                    outcome
                };
                let (outcome, _) = tokio::join!(run, drain);
                black_box(outcome)
            })
        })
    });

    group.finish();
}

/// Benchmark merging events into the client grid
fn bench_client_merge(c: &mut Criterion) {
    let mut group = c.benchmark_group("client_merge");
    let prefix = RangePrefix::new(10, 0, 0);
    let results: Vec<HostResult> = (0..255u8)
        .map(|index| HostResult { index, reachable: index % 3 == 0, latency_ms: if index % 3 == 0 { 4 } else { 0 } })
        .collect();

    let progress = ScanEvent::Progress { prefix, percent: 20, results: results[..50].to_vec() };
    let complete = ScanEvent::Complete { prefix, results: results.clone(), timestamp: Utc::now() };

    group.bench_function("apply_progress", |b| {
        let mut state = ClientState::new();
        state.add_range(prefix).unwrap();
        b.iter(|| state.apply(black_box(&progress)))
    });

    group.bench_function("apply_complete", |b| {
        let mut state = ClientState::new();
        state.add_range(prefix).unwrap();
        b.iter(|| state.apply(black_box(&complete)))
    });

    group.bench_function("encode_complete", |b| b.iter(|| black_box(&complete).to_json()));

    group.finish();
}

criterion_group!(benches, bench_batch_planning, bench_range_scan, bench_client_merge);

criterion_main!(benches);
