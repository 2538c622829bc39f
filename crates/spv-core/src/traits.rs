//! Seams to the collaborators that live outside this crate.
//!
//! - [`SpvHandler`]: the wallet (or other consumer) that owns the watched
//!   set and the transaction store.
//! - [`PeerNetwork`]: the peer-to-peer layer that frames and sends messages.

use crate::bloom::{FilterAdd, TxFilterLoad};
use crate::error::{HandlerError, NetworkError};
use crate::merkle::MerkleBlock;
use crate::types::{Address, Hash256, OutPoint, Transaction};

/// Callbacks into the consumer of the SPV engine.
pub trait SpvHandler: Send + Sync {
    /// Everything the filter should match: owned addresses and the outpoints
    /// (spent or unspent) that reference them.
    fn get_watched_data(&self) -> (Vec<Address>, Vec<OutPoint>);

    /// Store a transaction found in the block at `height`.
    ///
    /// Returns `Ok(false)` when the transaction turned out to be a filter
    /// false positive.
    fn commit_tx(&self, tx: &Transaction, height: u32) -> Result<bool, HandlerError>;

    /// Called after a block's transactions have all been committed.
    fn on_block_committed(&self, block: &MerkleBlock, txs: &[Transaction]);

    /// Drop everything recorded at `height`. After a reorganisation this is
    /// called once per abandoned height, from the old tip downwards, so after
    /// `on_rollback(100)` the consumer's chain ends at 99.
    fn on_rollback(&self, height: u32) -> Result<(), HandlerError>;
}

/// Outbound peer messaging.
pub trait PeerNetwork: Send + Sync {
    /// Number of connected peers.
    fn peer_count(&self) -> usize;

    fn broadcast_filter_load(&self, msg: &TxFilterLoad) -> Result<(), NetworkError>;

    fn broadcast_filter_add(&self, msg: &FilterAdd) -> Result<(), NetworkError>;

    /// Ask a peer for headers following the first locator hash it knows.
    fn request_headers(&self, locator: &[Hash256], stop: Hash256) -> Result<(), NetworkError>;

    /// Relay a transaction to the connected peers.
    fn broadcast_transaction(&self, tx: &Transaction) -> Result<(), NetworkError>;
}
