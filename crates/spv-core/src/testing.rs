//! Test helpers: header mining and recording [`SpvHandler`] / [`PeerNetwork`]
//! implementations.
//!
//! Enabled for this crate's own tests and, for downstream crates, through
//! the `testing` feature.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

use parking_lot::Mutex;

use crate::bloom::{FilterAdd, TxFilterLoad};
use crate::error::{HandlerError, NetworkError};
use crate::header::{AuxPow, Header, ParentHeader};
use crate::merkle::MerkleBlock;
use crate::pow::check_proof_of_work;
use crate::traits::{PeerNetwork, SpvHandler};
use crate::types::{Address, Hash256, OutPoint, Transaction, TxInput, TxOutput};

/// Roughly every second nonce meets this target (work 2 per header).
pub const EASY_BITS: u32 = 0x207f_ffff;

/// Roughly one in 512 nonces meets this target (work 512 per header).
pub const HARD_BITS: u32 = 0x1f7f_ffff;

/// Builds children of a header and grinds the merge-mined parent nonce until
/// the proof-of-work check passes.
#[derive(Clone, Copy, Debug)]
pub struct HeaderMiner {
    pub bits: u32,
}

impl HeaderMiner {
    pub fn new(bits: u32) -> Self {
        Self { bits }
    }

    /// Mine a child of `parent`. Different `salt`s give different siblings.
    pub fn mine_on(&self, parent: &Header, salt: u32) -> Header {
        self.mine_child(parent, Hash256::digest(&salt.to_le_bytes()), salt)
    }

    /// Mine a child of `parent` committing to `merkle_root`.
    pub fn mine_with_merkle_root(&self, parent: &Header, merkle_root: Hash256) -> Header {
        self.mine_child(parent, merkle_root, 0)
    }

    fn mine_child(&self, parent: &Header, merkle_root: Hash256, nonce: u32) -> Header {
        let mut header = Header {
            version: 1,
            previous: parent.hash(),
            merkle_root,
            timestamp: parent.timestamp.wrapping_add(60),
            bits: self.bits,
            nonce,
            height: parent.height + 1,
            aux_pow: AuxPow::default(),
        };
        header.aux_pow = AuxPow {
            coinbase: header.hash().as_bytes().to_vec(),
            coinbase_branch: Vec::new(),
            branch_index: 0,
            parent_header: ParentHeader {
                version: 1,
                previous: Hash256::ZERO,
                merkle_root: header.hash(),
                timestamp: header.timestamp,
                bits: self.bits,
                nonce: 0,
            },
        };
        grind(&mut header);
        header
    }

    /// Mine `len` headers on top of `parent`, all with the same `salt`.
    pub fn mine_branch(&self, parent: &Header, len: usize, salt: u32) -> Vec<Header> {
        let mut out: Vec<Header> = Vec::with_capacity(len);
        for _ in 0..len {
            let next = self.mine_on(out.last().unwrap_or(parent), salt);
            out.push(next);
        }
        out
    }

    /// Mine `len` headers on top of `parent`.
    pub fn mine_chain(&self, parent: &Header, len: usize) -> Vec<Header> {
        self.mine_branch(parent, len, 0)
    }
}

fn grind(header: &mut Header) {
    for nonce in 0..=u32::MAX {
        header.aux_pow.parent_header.nonce = nonce;
        if check_proof_of_work(header).is_ok() {
            return;
        }
    }
}

/// A transaction spending `spends` and paying `value` to each of `pays`.
pub fn transaction(spends: &[OutPoint], pays: &[Address], value: u64) -> Transaction {
    Transaction {
        version: 1,
        inputs: spends
            .iter()
            .map(|op| TxInput {
                previous_output: *op,
                sequence: u32::MAX,
            })
            .collect(),
        outputs: pays
            .iter()
            .map(|addr| TxOutput {
                value,
                address: *addr,
            })
            .collect(),
        lock_time: 0,
    }
}

/// In-memory [`SpvHandler`] that records every callback.
#[derive(Default)]
pub struct RecordingHandler {
    pub addresses: Mutex<Vec<Address>>,
    pub outpoints: Mutex<Vec<OutPoint>>,
    /// Txids reported back as false positives from `commit_tx`.
    pub not_mine: Mutex<HashSet<Hash256>>,
    pub committed: Mutex<Vec<(Hash256, u32)>>,
    pub blocks: Mutex<Vec<Hash256>>,
    pub rollbacks: Mutex<Vec<u32>>,
    /// Number of upcoming `on_rollback` calls that fail.
    pub failing_rollbacks: AtomicU32,
}

impl RecordingHandler {
    pub fn watching(addresses: &[Address]) -> Self {
        let handler = Self::default();
        handler.addresses.lock().extend_from_slice(addresses);
        handler
    }
}

impl SpvHandler for RecordingHandler {
    fn get_watched_data(&self) -> (Vec<Address>, Vec<OutPoint>) {
        (self.addresses.lock().clone(), self.outpoints.lock().clone())
    }

    fn commit_tx(&self, tx: &Transaction, height: u32) -> Result<bool, HandlerError> {
        let txid = tx.txid();
        if self.not_mine.lock().contains(&txid) {
            return Ok(false);
        }
        self.committed.lock().push((txid, height));
        Ok(true)
    }

    fn on_block_committed(&self, block: &MerkleBlock, _txs: &[Transaction]) {
        self.blocks.lock().push(block.block_hash());
    }

    fn on_rollback(&self, height: u32) -> Result<(), HandlerError> {
        let failing = self.failing_rollbacks.load(Ordering::SeqCst);
        if failing > 0 {
            self.failing_rollbacks.store(failing - 1, Ordering::SeqCst);
            return Err(HandlerError(format!("rollback to {height} refused")));
        }
        self.rollbacks.lock().push(height);
        Ok(())
    }
}

/// In-memory [`PeerNetwork`] that records outbound messages.
#[derive(Default)]
pub struct RecordingNetwork {
    pub peers: AtomicUsize,
    pub filter_loads: Mutex<Vec<TxFilterLoad>>,
    pub filter_adds: Mutex<Vec<FilterAdd>>,
    pub header_requests: Mutex<Vec<Vec<Hash256>>>,
    pub transactions: Mutex<Vec<Transaction>>,
}

impl RecordingNetwork {
    pub fn with_peers(peers: usize) -> Self {
        Self {
            peers: AtomicUsize::new(peers),
            ..Self::default()
        }
    }

    pub fn set_peers(&self, peers: usize) {
        self.peers.store(peers, Ordering::SeqCst);
    }

    fn ensure_peers(&self) -> Result<(), NetworkError> {
        if self.peer_count() == 0 {
            return Err(NetworkError::NoPeers);
        }
        Ok(())
    }
}

impl PeerNetwork for RecordingNetwork {
    fn peer_count(&self) -> usize {
        self.peers.load(Ordering::SeqCst)
    }

    fn broadcast_filter_load(&self, msg: &TxFilterLoad) -> Result<(), NetworkError> {
        self.ensure_peers()?;
        self.filter_loads.lock().push(msg.clone());
        Ok(())
    }

    fn broadcast_filter_add(&self, msg: &FilterAdd) -> Result<(), NetworkError> {
        self.ensure_peers()?;
        self.filter_adds.lock().push(msg.clone());
        Ok(())
    }

    fn request_headers(&self, locator: &[Hash256], _stop: Hash256) -> Result<(), NetworkError> {
        self.ensure_peers()?;
        self.header_requests.lock().push(locator.to_vec());
        Ok(())
    }

    fn broadcast_transaction(&self, tx: &Transaction) -> Result<(), NetworkError> {
        self.ensure_peers()?;
        self.transactions.lock().push(tx.clone());
        Ok(())
    }
}
