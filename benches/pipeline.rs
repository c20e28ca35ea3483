//! Throughput benchmarks for the detection pipeline.
//!
//! Run with: `cargo bench --bench pipeline`

use alloy_primitives::{Address, U256};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use rand::Rng;

use collection_core::api::RawLog;
use collection_core::types::{TransactionContext, TRANSFER_TOPIC};
use sale_watcher::dedup::{content_key, DedupLedger};
use sale_watcher::{decode_transfer, parse_stream_message, ClassifierConfig, SaleClassifier};

const COLLECTION: &str = "0xbc4ca0eda7647a8ab7c2061c2e118a18a936f13d";

fn random_word(rng: &mut impl Rng) -> String {
    let bytes: [u8; 20] = rng.gen();
    format!("0x{:0>64}", bytes.iter().map(|b| format!("{:02x}", b)).collect::<String>())
}

/// Mix of indexed, data-encoded and hybrid transfer logs.
fn generate_logs(count: usize) -> Vec<RawLog> {
    let mut rng = rand::thread_rng();
    (0..count)
        .map(|i| {
            let from = random_word(&mut rng);
            let to = random_word(&mut rng);
            let token = format!("{:064x}", rng.gen_range(0..10_000u64));
            let (topics, data) = match i % 3 {
                0 => (
                    vec![TRANSFER_TOPIC.to_string(), from, to, format!("0x{}", token)],
                    "0x".to_string(),
                ),
                1 => (
                    vec![TRANSFER_TOPIC.to_string()],
                    format!("0x{}{}{}", &from[2..], &to[2..], token),
                ),
                _ => (
                    vec![TRANSFER_TOPIC.to_string(), from, to],
                    format!("0x{}", token),
                ),
            };
            RawLog {
                address: COLLECTION.to_string(),
                topics,
                data,
                block_number: format!("0x{:x}", 18_000_000 + i),
                transaction_hash: format!("0x{:064x}", i),
                log_index: format!("0x{:x}", i % 200),
            }
        })
        .collect()
}

fn generate_contexts(count: usize) -> Vec<TransactionContext> {
    let mut rng = rand::thread_rng();
    (0..count)
        .map(|_| TransactionContext {
            value: if rng.gen_bool(0.5) {
                U256::from(rng.gen_range(1..50u64)) * U256::from(100_000_000_000_000_000u64)
            } else {
                U256::ZERO
            },
            to: Some(Address::repeat_byte(rng.gen())),
            to_is_contract: rng.gen_bool(0.7),
            event_count: rng.gen_range(1..8),
            gas_used: rng.gen_range(50_000..300_000),
        })
        .collect()
}

/// Benchmark decoding and classifying batches of transfer logs.
fn bench_decode_classify(c: &mut Criterion) {
    let mut group = c.benchmark_group("decode_classify");
    let classifier = SaleClassifier::new(ClassifierConfig::default(), COLLECTION.parse().unwrap());

    for count in [10, 100, 1000].iter() {
        let logs = generate_logs(*count);
        let contexts = generate_contexts(*count);

        group.throughput(Throughput::Elements(*count as u64));
        group.bench_with_input(
            BenchmarkId::new("logs", count),
            &(logs, contexts),
            |b, (logs, contexts)| {
                b.iter(|| {
                    let mut sales = 0usize;
                    for (log, ctx) in logs.iter().zip(contexts) {
                        if let Ok(transfer) = decode_transfer(log) {
                            if let Some(candidate) = classifier.score_transfer(&transfer, ctx) {
                                sales += candidate.is_sale as usize;
                            }
                        }
                    }
                    black_box(sales)
                })
            },
        );
    }

    group.finish();
}

/// Benchmark dedup ledger inserts across the trim boundary.
fn bench_dedup_ledger(c: &mut Criterion) {
    let mut group = c.benchmark_group("dedup_ledger");

    for capacity in [100, 1000, 10_000].iter() {
        let keys: Vec<String> = (0..capacity * 3)
            .map(|i| content_key(Some(&i.to_string()), Some("1.5 ETH"), None, None, Some(i as i64)))
            .collect();

        group.throughput(Throughput::Elements(keys.len() as u64));
        group.bench_with_input(BenchmarkId::new("insert", capacity), &keys, |b, keys| {
            b.iter(|| {
                let mut ledger = DedupLedger::new(*capacity);
                for key in keys {
                    if !ledger.has(key) {
                        ledger.add(key);
                    }
                }
                black_box(ledger.len())
            })
        });
    }

    group.finish();
}

/// Benchmark parsing a batch stream message.
fn bench_stream_parse(c: &mut Criterion) {
    let entries: Vec<String> = (0..100)
        .map(|i| {
            format!(
                r#"{{"event_type":"item_sold","payload":{{"tokenId":"{}","price":"0.{}","currency":"ETH","seller":"0xa","buyer":"0xb"}}}}"#,
                i,
                i + 1
            )
        })
        .collect();
    let message = format!("[{}]", entries.join(","));

    c.bench_function("stream_parse_100", |b| {
        b.iter(|| black_box(parse_stream_message(black_box(&message))))
    });
}

criterion_group!(
    benches,
    bench_decode_classify,
    bench_dedup_ledger,
    bench_stream_parse,
);

criterion_main!(benches);
