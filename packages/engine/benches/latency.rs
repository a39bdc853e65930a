//! Latency benchmarks for the per-hop feed pipeline
//!
//! Every walker hop decodes one transaction, extracts its pointer and classifies it;
//! these benchmarks cover that hot path without a node.

use alloy::primitives::{address, Address, Bytes, B256, U256};
use alloy::sol_types::{SolCall, SolEvent};
use criterion::{black_box, criterion_group, criterion_main, Criterion};

use lifefeed_engine::classifier::{BodyRenderer, PlainTextRenderer, Summary, DEFAULT_SUMMARY_LENGTH};
use lifefeed_engine::decoder::TransactionDecoder;
use lifefeed_engine::types::{LogicalKey, RawLog, RawTransaction};
use lifefeed_engine::walker::previous_pointer;
use lifefeed_engine::FeedClassifier;

alloy::sol! {
    function post(string message) external;
    event SavePreviousFeedInfoEvent(uint256 previousFeedInfoBN);
}

const LIFECHAIN: Address = address!("5FbDB2315678afecb367f032d93F642f64180aa3");
const AUTHOR: Address = address!("f39Fd6e51aad88F6F4ce6aB8827279cffFb92266");

const BODY: &str = "# Weekend notes\n\n\
    Spent the morning reading about #rust async runtimes and the afternoon hiking.\n\n\
    ![trail](https://example.org/trail.jpg)\n\n\
    Long story short: tokio's scheduler is fascinating, and so is the view from the ridge.";

fn sample_transaction() -> RawTransaction {
    let log = SavePreviousFeedInfoEvent {
        previousFeedInfoBN: U256::from(17_000_000u64),
    }
    .encode_log_data();

    RawTransaction {
        hash: B256::repeat_byte(0xab),
        block_number: 17_000_123,
        from: AUTHOR,
        input: Bytes::from(
            postCall {
                message: BODY.to_string(),
            }
            .abi_encode(),
        ),
        logs: vec![RawLog {
            address: LIFECHAIN,
            topics: log.topics().to_vec(),
            data: log.data,
        }],
    }
}

/// Benchmark calldata and event decoding
fn bench_decode_transaction(c: &mut Criterion) {
    let decoder = TransactionDecoder::default();
    let raw = sample_transaction();

    c.bench_function("decode_transaction", |b| {
        b.iter(|| black_box(decoder.decode(black_box(&raw)).unwrap()))
    });
}

/// Benchmark previous-pointer extraction from decoded events
fn bench_previous_pointer(c: &mut Criterion) {
    let decoder = TransactionDecoder::default();
    let events = decoder.decode_events(&sample_transaction()).unwrap();
    let key = LogicalKey::user(AUTHOR);

    c.bench_function("previous_pointer", |b| {
        b.iter(|| black_box(previous_pointer(black_box(&events), &key).unwrap()))
    });
}

/// Benchmark body rendering and summary truncation
fn bench_summary(c: &mut Criterion) {
    let renderer = PlainTextRenderer;

    c.bench_function("render_summary", |b| {
        b.iter(|| {
            let rendered = renderer.render_body(black_box(BODY));
            black_box(Summary::from_rendered(rendered, DEFAULT_SUMMARY_LENGTH))
        })
    });
}

/// Benchmark classification with a fresh summary memo each time
fn bench_classify(c: &mut Criterion) {
    let decoder = TransactionDecoder::default();
    let decoded = decoder.decode(&sample_transaction()).unwrap();

    c.bench_function("classify_cold", |b| {
        b.iter(|| {
            let classifier = FeedClassifier::default();
            black_box(classifier.classify(black_box(decoded.clone())).unwrap())
        })
    });
}

criterion_group!(
    benches,
    bench_decode_transaction,
    bench_previous_pointer,
    bench_summary,
    bench_classify
);

criterion_main!(benches);
