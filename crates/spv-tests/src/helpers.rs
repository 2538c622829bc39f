//! Shared helpers for the scenario and property suites.

use spv_core::error::ChainError;
use spv_core::genesis::{self, foundation_address, DEFAULT_FOUNDATION};
use spv_core::merkle::{merkle_root, MerkleBlock};
use spv_core::primitive_types::U256;
use spv_core::store::HeaderStore;
use spv_core::testing::HeaderMiner;
use spv_core::{
    Address, Blockchain, CachedHeaderStore, Hash256, Header, MemoryBackend, StoredHeader, Transaction,
};

pub fn foundation() -> Address {
    foundation_address(DEFAULT_FOUNDATION).expect("default foundation address is valid")
}

/// Genesis header of the default-foundation chain.
pub fn genesis() -> Header {
    genesis::genesis_header(&foundation())
}

/// A fresh chain over an in-memory backend.
pub fn memory_chain() -> Blockchain {
    let store = CachedHeaderStore::new(MemoryBackend::new(), 100).expect("memory store");
    Blockchain::new(foundation(), Box::new(store)).expect("genesis install")
}

/// Deliver one peer's branch the way a peer answers header requests.
///
/// Headers are committed in order. A reorganisation rewinds the tip to the
/// fork point without storing the trigger, so the peer's answer to the new
/// locator is modelled by replaying the branch once more. Returns the
/// reported `reorg_from`, if any.
pub fn deliver_branch(chain: &Blockchain, branch: &[Header]) -> Option<u32> {
    let mut reorg_from = None;
    for header in branch {
        let outcome = chain.commit_header(header.clone()).expect("branch header commits");
        if outcome.reorg_from.is_some() {
            reorg_from = outcome.reorg_from;
            break;
        }
    }
    if reorg_from.is_some() {
        for header in branch {
            match chain.commit_header(header.clone()) {
                Ok(outcome) => assert!(!outcome.is_reorg(), "replay must extend the fork point"),
                Err(ChainError::UnknownParent(_)) => unreachable!("replay starts from a known ancestor"),
                Err(e) => panic!("replay failed: {e}"),
            }
        }
    }
    reorg_from
}

/// Store `len` linked headers (heights `0..len`) directly, skipping
/// proof-of-work, and return the store with its tip.
pub fn fabricated_store(len: u32) -> (CachedHeaderStore<MemoryBackend>, StoredHeader) {
    let store = CachedHeaderStore::new(MemoryBackend::new(), 100).expect("memory store");
    let mut previous = Hash256::ZERO;
    let mut tip = StoredHeader::default();
    for height in 0..len {
        let header = Header {
            version: 1,
            previous,
            timestamp: 1_600_000_000 + height,
            nonce: height,
            height,
            ..Header::default()
        };
        tip = StoredHeader::new(header, U256::from(2 * u64::from(height)));
        store.put(&tip, true).expect("memory put");
        previous = tip.hash();
    }
    (store, tip)
}

/// Mine a child of `parent` whose merkle root commits to `txs`, and a merkle
/// block proving the transactions flagged in `matches`.
pub fn block_with(
    miner: &HeaderMiner,
    parent: &Header,
    txs: &[Transaction],
    matches: &[bool],
) -> (Header, MerkleBlock) {
    let txids: Vec<Hash256> = txs.iter().map(|tx| tx.txid()).collect();
    let header = miner.mine_with_merkle_root(parent, merkle_root(&txids));
    let block = MerkleBlock::new(header.clone(), &txids, matches);
    (header, block)
}
