//! Criterion benchmarks for spv-core hot paths.
//!
//! Covers: header commit on a linear chain, locator construction,
//! bloom filter matching, and partial merkle extraction.

use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion};

use spv_core::bloom::{build_filter, DEFAULT_FALSE_POSITIVE_RATE};
use spv_core::merkle::PartialMerkleTree;
use spv_core::testing::{transaction, HeaderMiner, EASY_BITS};
use spv_core::{Address, Blockchain, CachedHeaderStore, Hash256, MemoryBackend, OutPoint};

fn new_chain() -> Blockchain {
    let store = CachedHeaderStore::new(MemoryBackend::new(), 100).expect("memory store");
    Blockchain::new(Address([0x12; 21]), Box::new(store)).expect("genesis")
}

fn bench_commit(c: &mut Criterion) {
    let chain = new_chain();
    let headers = HeaderMiner::new(EASY_BITS).mine_chain(&chain.chain_tip().header, 200);

    c.bench_function("commit_200_headers", |b| {
        b.iter_batched(
            new_chain,
            |chain| {
                for header in &headers {
                    chain.commit_header(header.clone()).expect("commit");
                }
            },
            BatchSize::SmallInput,
        )
    });
}

fn bench_locator(c: &mut Criterion) {
    let chain = new_chain();
    let headers = HeaderMiner::new(EASY_BITS).mine_chain(&chain.chain_tip().header, 2_000);
    for header in headers {
        chain.commit_header(header).expect("commit");
    }

    c.bench_function("locator_2000_deep", |b| {
        b.iter(|| black_box(&chain).locator().expect("locator"))
    });
}

fn bench_filter_match(c: &mut Criterion) {
    let addresses: Vec<Address> = (0..100u8).map(|i| Address([i; 21])).collect();
    let outpoints: Vec<OutPoint> = (0..100u16)
        .map(|i| OutPoint::new(Hash256([0x33; 32]), i))
        .collect();
    let mut filter = build_filter(&addresses, &outpoints, DEFAULT_FALSE_POSITIVE_RATE);
    let tx = transaction(
        &[OutPoint::new(Hash256([0x44; 32]), 0)],
        &[Address([0xF0; 21]), Address([0xF1; 21])],
        1_000,
    );

    c.bench_function("bloom_match_miss", |b| {
        b.iter(|| filter.match_tx_and_update(black_box(&tx)))
    });
}

fn bench_partial_merkle(c: &mut Criterion) {
    let txids: Vec<Hash256> = (0..1000u32)
        .map(|i| Hash256::digest(&i.to_le_bytes()))
        .collect();
    let matches: Vec<bool> = (0..1000).map(|i| i % 97 == 0).collect();
    let tree = PartialMerkleTree::build(&txids, &matches);

    c.bench_function("partial_merkle_extract_1000", |b| {
        b.iter(|| black_box(&tree).extract_matches())
    });
}

criterion_group!(
    benches,
    bench_commit,
    bench_locator,
    bench_filter_match,
    bench_partial_merkle,
);
criterion_main!(benches);
