//! Header chain over the RocksDB backend: persistence, cache seeding and
//! reorganisation across reopen.

use spv_client::RocksBackend;
use spv_core::genesis::{foundation_address, DEFAULT_FOUNDATION};
use spv_core::store::{HeaderLookup, HeaderStore};
use spv_core::testing::{HeaderMiner, EASY_BITS};
use spv_core::{Blockchain, CachedHeaderStore, Header};

fn open_chain(dir: &std::path::Path, capacity: usize) -> Blockchain {
    let backend = RocksBackend::open(dir.join("headers")).unwrap();
    let store = CachedHeaderStore::new(backend, capacity).unwrap();
    let foundation = foundation_address(DEFAULT_FOUNDATION).unwrap();
    Blockchain::new(foundation, Box::new(store)).unwrap()
}

fn genesis_of(chain: &Blockchain) -> Header {
    chain.chain_tip().header
}

#[test]
fn genesis_installed_once() {
    let dir = tempfile::tempdir().unwrap();
    let genesis_hash = {
        let chain = open_chain(dir.path(), 10);
        assert_eq!(chain.height(), 0);
        chain.genesis_hash()
    };
    let chain = open_chain(dir.path(), 10);
    assert_eq!(chain.chain_tip().hash(), genesis_hash);
    assert_eq!(chain.height(), 0);
}

#[test]
fn tip_and_headers_survive_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let headers = {
        let chain = open_chain(dir.path(), 10);
        let headers = HeaderMiner::new(EASY_BITS).mine_chain(&genesis_of(&chain), 25);
        for header in &headers {
            chain.commit_header(header.clone()).unwrap();
        }
        chain.close().unwrap();
        headers
    };

    let chain = open_chain(dir.path(), 10);
    assert_eq!(chain.height(), 25);
    assert_eq!(chain.chain_tip().header, headers[24]);
    for header in &headers {
        assert!(chain.is_known_header(&header.hash()));
    }
    // Cumulative work: 25 headers at work 2 on a zero-work genesis.
    assert_eq!(chain.chain_tip().total_work, 50u64.into());
}

#[test]
fn reopened_cache_is_seeded_from_tip() {
    let dir = tempfile::tempdir().unwrap();
    let headers = {
        let chain = open_chain(dir.path(), 100);
        let headers = HeaderMiner::new(EASY_BITS).mine_chain(&genesis_of(&chain), 12);
        for header in &headers {
            chain.commit_header(header.clone()).unwrap();
        }
        headers
    };

    let backend = RocksBackend::open(dir.path().join("headers")).unwrap();
    let store = CachedHeaderStore::new(backend, 5).unwrap();
    assert_eq!(store.cached_len(), 5);
    for header in &headers[7..] {
        assert!(store.is_cached(&header.hash()));
    }
    assert!(!store.is_cached(&headers[0].hash()));

    // Uncached headers are still served from disk without entering the cache.
    let first = store.get(&headers[0].hash()).unwrap();
    assert_eq!(first.header, headers[0]);
    assert!(!store.is_cached(&headers[0].hash()));
    assert_eq!(store.get_best().unwrap().header, headers[11]);
}

#[test]
fn reorg_tip_persists_at_fork_point() {
    let dir = tempfile::tempdir().unwrap();
    let miner = HeaderMiner::new(EASY_BITS);
    let (main, fork) = {
        let chain = open_chain(dir.path(), 10);
        let main = miner.mine_chain(&genesis_of(&chain), 3);
        for header in &main {
            chain.commit_header(header.clone()).unwrap();
        }
        let fork = miner.mine_branch(&main[0], 3, 21);
        let mut reorg_from = None;
        for header in &fork {
            reorg_from = chain.commit_header(header.clone()).unwrap().reorg_from.or(reorg_from);
        }
        assert_eq!(reorg_from, Some(3));
        (main, fork)
    };

    let chain = open_chain(dir.path(), 10);
    assert_eq!(chain.chain_tip().header, main[0]);
    // Side-branch headers below the trigger were kept; the trigger was not.
    assert!(chain.is_known_header(&fork[0].hash()));
    assert!(chain.is_known_header(&fork[1].hash()));
    assert!(!chain.is_known_header(&fork[2].hash()));
}

#[test]
fn reset_clears_database_and_restores_genesis() {
    let dir = tempfile::tempdir().unwrap();
    let chain = open_chain(dir.path(), 10);
    let headers = HeaderMiner::new(EASY_BITS).mine_chain(&genesis_of(&chain), 4);
    for header in &headers {
        chain.commit_header(header.clone()).unwrap();
    }
    chain.reset().unwrap();
    assert_eq!(chain.height(), 0);
    assert_eq!(chain.chain_tip().hash(), chain.genesis_hash());
    assert!(!chain.is_known_header(&headers[0].hash()));
}
