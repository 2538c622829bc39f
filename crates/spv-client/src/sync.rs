//! Header sync and merkle-block processing.
//!
//! [`SyncManager`] sits between the peers and the [`Blockchain`]: it commits
//! header batches, drives the consumer's rollback after a reorganisation,
//! verifies merkle blocks before handing their transactions over, and keeps
//! the bloom filter the peers use in step with the consumer's watched data.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use spv_core::bloom::{build_filter, FilterAdd, DEFAULT_FALSE_POSITIVE_RATE};
use spv_core::merkle::MerkleBlock;
use spv_core::traits::{PeerNetwork, SpvHandler};
use spv_core::{Blockchain, ChainMode, Hash256, Header, Transaction, TxFilter};

use crate::config::{SpvConfig, DEFAULT_MAX_FALSE_POSITIVES};
use crate::error::SyncError;

/// Filter tuning used by the sync manager.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SyncSettings {
    pub fp_rate: f64,
    /// False positives in one block above which the filter is rebuilt.
    pub max_false_positives: u32,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            fp_rate: DEFAULT_FALSE_POSITIVE_RATE,
            max_false_positives: DEFAULT_MAX_FALSE_POSITIVES,
        }
    }
}

impl From<&SpvConfig> for SyncSettings {
    fn from(config: &SpvConfig) -> Self {
        Self {
            fp_rate: config.filter_fp_rate,
            max_false_positives: config.max_false_positives,
        }
    }
}

/// Heights the consumer still has to roll back: `next` down to `fork + 1`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct PendingRollback {
    next: u32,
    fork: u32,
}

/// Result of committing one headers batch.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct BatchOutcome {
    /// Headers accepted before the batch ended. A reorganisation trigger
    /// is not stored and not counted.
    pub committed: usize,
    /// Whether the tip moved.
    pub advanced: bool,
    /// Old tip height if the batch triggered a reorganisation. The batch
    /// stops at the triggering header.
    pub reorg_from: Option<u32>,
}

/// Result of processing one merkle block.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BlockReport {
    pub height: u32,
    pub matched: usize,
    pub false_positives: u32,
    /// The filter was rebuilt and re-broadcast after this block.
    pub filter_refreshed: bool,
}

pub struct SyncManager {
    chain: Arc<Blockchain>,
    filter: Arc<TxFilter>,
    handler: Arc<dyn SpvHandler>,
    network: Arc<dyn PeerNetwork>,
    settings: SyncSettings,
    /// Held for a whole header batch so headers and rollbacks never
    /// interleave.
    rollback: Mutex<Option<PendingRollback>>,
}

impl SyncManager {
    pub fn new(
        chain: Arc<Blockchain>,
        filter: Arc<TxFilter>,
        handler: Arc<dyn SpvHandler>,
        network: Arc<dyn PeerNetwork>,
        settings: SyncSettings,
    ) -> Self {
        Self {
            chain,
            filter,
            handler,
            network,
            settings,
            rollback: Mutex::new(None),
        }
    }

    pub fn chain(&self) -> &Arc<Blockchain> {
        &self.chain
    }

    pub fn filter(&self) -> &Arc<TxFilter> {
        &self.filter
    }

    /// Next height the consumer has yet to roll back, if a rollback is
    /// outstanding.
    pub fn rollback_pending(&self) -> Option<u32> {
        self.rollback.lock().map(|r| r.next)
    }

    /// Commit `headers` in order.
    ///
    /// An outstanding rollback is retried first; while it keeps failing no
    /// header is accepted. The batch stops at the first error and at a
    /// reorganisation, after the consumer has been rolled back to the fork
    /// point.
    pub fn commit_headers(&self, headers: Vec<Header>) -> Result<BatchOutcome, SyncError> {
        let mut pending = self.rollback.lock();
        self.apply_rollback(&mut pending)?;

        let mut outcome = BatchOutcome::default();
        for header in headers {
            let commit = self.chain.commit_header(header)?;
            outcome.advanced |= commit.new_tip;

            if let Some(from) = commit.reorg_from {
                let fork = self.chain.height();
                info!(from, fork, "rolling back consumer to fork point");
                outcome.reorg_from = Some(from);
                *pending = Some(PendingRollback { next: from, fork });
                self.apply_rollback(&mut pending)?;
                break;
            }
            outcome.committed += 1;
        }
        Ok(outcome)
    }

    /// Retry an outstanding rollback without committing headers.
    pub fn retry_rollback(&self) -> Result<(), SyncError> {
        let mut pending = self.rollback.lock();
        self.apply_rollback(&mut pending)
    }

    fn apply_rollback(&self, pending: &mut Option<PendingRollback>) -> Result<(), SyncError> {
        let Some(mut rollback) = *pending else {
            return Ok(());
        };
        while rollback.next > rollback.fork {
            if let Err(e) = self.handler.on_rollback(rollback.next) {
                warn!(height = rollback.next, error = %e, "consumer rollback failed, refusing headers");
                *pending = Some(rollback);
                return Err(SyncError::RollbackPending {
                    height: rollback.next,
                });
            }
            rollback.next -= 1;
        }
        *pending = None;
        debug!(fork = rollback.fork, "consumer rollback complete");
        Ok(())
    }

    /// Handle a `headers` reply: commit it, then ask for more while the tip
    /// keeps moving. An empty or stale batch means the chain caught up.
    pub fn handle_headers(&self, headers: Vec<Header>) -> Result<BatchOutcome, SyncError> {
        if headers.is_empty() {
            self.finish_sync();
            return Ok(BatchOutcome::default());
        }
        let outcome = self.commit_headers(headers)?;
        if outcome.advanced {
            self.request_headers()?;
        } else {
            self.finish_sync();
        }
        Ok(outcome)
    }

    /// Enter `Syncing` and send the first header request.
    pub fn start_sync(&self) -> Result<(), SyncError> {
        self.chain.set_state(ChainMode::Syncing);
        info!(height = self.chain.height(), "starting header sync");
        self.request_headers()
    }

    fn finish_sync(&self) {
        if self.chain.is_syncing() {
            info!(height = self.chain.height(), "header sync caught up");
        }
        self.chain.set_state(ChainMode::Waiting);
    }

    /// Ask peers for the headers after our current locator.
    pub fn request_headers(&self) -> Result<(), SyncError> {
        let locator = self.chain.locator()?;
        self.network.request_headers(&locator, Hash256::ZERO)?;
        debug!(entries = locator.len(), "requested headers");
        Ok(())
    }

    /// Verify a merkle block and commit its matched transactions.
    ///
    /// `txs` are the transactions the peer relayed with the block; every
    /// matched txid must be among them. Each is committed at the block's
    /// height, then [`SpvHandler::on_block_committed`] runs. Too many false
    /// positives rebuild the filter.
    pub fn handle_merkle_block(
        &self,
        block: &MerkleBlock,
        txs: &[Transaction],
    ) -> Result<BlockReport, SyncError> {
        if let Some(height) = self.rollback_pending() {
            return Err(SyncError::RollbackPending { height });
        }

        let hash = block.block_hash();
        if !self.chain.is_known_header(&hash) {
            return Err(SyncError::UnknownBlock(hash));
        }

        let matched = block.matched_txids()?;
        let relayed: HashMap<Hash256, &Transaction> = txs.iter().map(|tx| (tx.txid(), tx)).collect();
        let mut committed = Vec::with_capacity(matched.len());
        for txid in &matched {
            let tx = relayed
                .get(txid)
                .ok_or(SyncError::MissingTransaction(*txid))?;
            committed.push((*tx).clone());
        }

        let height = block.header.height;
        let mut false_positives = 0u32;
        for tx in &committed {
            // Mirror the peer's filter update so spends of new outputs match.
            self.filter.match_tx(tx);
            if !self.handler.commit_tx(tx, height)? {
                false_positives += 1;
            }
        }
        self.handler.on_block_committed(block, &committed);
        debug!(height, %hash, matched = committed.len(), false_positives, "merkle block committed");

        let mut filter_refreshed = false;
        if false_positives > self.settings.max_false_positives {
            info!(
                height,
                false_positives,
                max = self.settings.max_false_positives,
                "false-positive threshold exceeded, rebuilding filter"
            );
            match self.update_filter() {
                Ok(()) => filter_refreshed = true,
                Err(e) => warn!(error = %e, "filter rebuild failed"),
            }
        }

        Ok(BlockReport {
            height,
            matched: committed.len(),
            false_positives,
            filter_refreshed,
        })
    }

    /// Rebuild the filter from the consumer's watched data with a fresh
    /// tweak, install it and broadcast it.
    pub fn update_filter(&self) -> Result<(), SyncError> {
        let (addresses, outpoints) = self.handler.get_watched_data();
        let filter = build_filter(&addresses, &outpoints, self.settings.fp_rate);
        self.filter.install(filter);
        let msg = self.filter.to_wire_message()?;
        self.network.broadcast_filter_load(&msg)?;
        info!(
            addresses = addresses.len(),
            outpoints = outpoints.len(),
            "transaction filter reloaded"
        );
        Ok(())
    }

    /// Add one element to the loaded filter and tell the peers.
    pub fn watch(&self, item: &[u8]) -> Result<(), SyncError> {
        let msg = FilterAdd {
            data: item.to_vec(),
        };
        self.filter.add_message(&msg)?;
        self.network.broadcast_filter_add(&msg)?;
        debug!(len = item.len(), "added item to transaction filter");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::Ordering;

    use spv_core::error::{ChainError, FilterError, MerkleError};
    use spv_core::bloom::BloomFilter;
    use spv_core::genesis::{foundation_address, DEFAULT_FOUNDATION};
    use spv_core::merkle::merkle_root;
    use spv_core::testing::{transaction, HeaderMiner, RecordingHandler, RecordingNetwork, EASY_BITS};
    use spv_core::{Address, CachedHeaderStore, MemoryBackend, OutPoint};

    struct Fixture {
        sync: SyncManager,
        handler: Arc<RecordingHandler>,
        network: Arc<RecordingNetwork>,
        genesis: Header,
    }

    fn fixture_with(handler: RecordingHandler, settings: SyncSettings) -> Fixture {
        let foundation = foundation_address(DEFAULT_FOUNDATION).unwrap();
        let store = CachedHeaderStore::new(MemoryBackend::new(), 100).unwrap();
        let chain = Arc::new(Blockchain::new(foundation, Box::new(store)).unwrap());
        let genesis = chain.chain_tip().header;
        let handler = Arc::new(handler);
        let network = Arc::new(RecordingNetwork::with_peers(3));
        let sync = SyncManager::new(
            chain,
            Arc::new(TxFilter::new()),
            handler.clone(),
            network.clone(),
            settings,
        );
        Fixture {
            sync,
            handler,
            network,
            genesis,
        }
    }

    fn fixture() -> Fixture {
        fixture_with(RecordingHandler::default(), SyncSettings::default())
    }

    fn miner() -> HeaderMiner {
        HeaderMiner::new(EASY_BITS)
    }

    #[test]
    fn batch_commits_in_order() {
        let f = fixture();
        let headers = miner().mine_chain(&f.genesis, 5);
        let outcome = f.sync.commit_headers(headers.clone()).unwrap();
        assert_eq!(outcome.committed, 5);
        assert!(outcome.advanced);
        assert_eq!(f.sync.chain().height(), 5);
        assert_eq!(f.sync.chain().chain_tip().header, headers[4]);
    }

    #[test]
    fn batch_stops_at_first_failure() {
        let f = fixture();
        let mut headers = miner().mine_chain(&f.genesis, 4);
        let orphan = miner().mine_on(&headers[3], 7);
        headers[2] = miner().mine_on(&orphan, 1);
        let err = f.sync.commit_headers(headers).unwrap_err();
        assert!(matches!(err, SyncError::Chain(ChainError::UnknownParent(_))));
        assert_eq!(f.sync.chain().height(), 2);
    }

    #[test]
    fn reorg_rolls_consumer_back_per_height() {
        let f = fixture();
        let main = miner().mine_chain(&f.genesis, 3);
        f.sync.commit_headers(main.clone()).unwrap();

        let fork = miner().mine_branch(&main[0], 3, 5);
        let outcome = f.sync.commit_headers(fork.clone()).unwrap();
        assert_eq!(outcome.reorg_from, Some(3));
        // The two side headers below the trigger.
        assert_eq!(outcome.committed, 2);
        assert!(!f.sync.chain().is_known_header(&fork[2].hash()));
        assert_eq!(f.sync.chain().height(), 1);
        assert_eq!(*f.handler.rollbacks.lock(), vec![3, 2]);
        assert_eq!(f.sync.rollback_pending(), None);
    }

    #[test]
    fn failed_rollback_blocks_headers_until_it_succeeds() {
        let f = fixture();
        let main = miner().mine_chain(&f.genesis, 3);
        f.sync.commit_headers(main.clone()).unwrap();
        f.handler.failing_rollbacks.store(2, Ordering::SeqCst);

        let fork = miner().mine_branch(&main[0], 3, 5);
        let err = f.sync.commit_headers(fork.clone()).unwrap_err();
        assert_eq!(err, SyncError::RollbackPending { height: 3 });
        assert_eq!(f.sync.rollback_pending(), Some(3));

        // Still failing: the replayed branch is refused untouched.
        let err = f.sync.commit_headers(fork.clone()).unwrap_err();
        assert_eq!(err, SyncError::RollbackPending { height: 3 });
        assert_eq!(f.sync.chain().height(), 1);

        let outcome = f.sync.commit_headers(fork).unwrap();
        assert_eq!(*f.handler.rollbacks.lock(), vec![3, 2]);
        assert_eq!(outcome.committed, 3);
        assert_eq!(f.sync.chain().height(), 4);
    }

    #[test]
    fn retry_rollback_clears_pending_state() {
        let f = fixture();
        let main = miner().mine_chain(&f.genesis, 2);
        f.sync.commit_headers(main.clone()).unwrap();
        f.handler.failing_rollbacks.store(1, Ordering::SeqCst);

        let fork = miner().mine_branch(&f.genesis, 3, 9);
        assert!(f.sync.commit_headers(fork).is_err());
        f.sync.retry_rollback().unwrap();
        assert_eq!(f.sync.rollback_pending(), None);
        assert_eq!(*f.handler.rollbacks.lock(), vec![2, 1]);
    }

    #[test]
    fn headers_drive_sync_state() {
        let f = fixture();
        f.sync.start_sync().unwrap();
        assert!(f.sync.chain().is_syncing());
        assert_eq!(f.network.header_requests.lock().len(), 1);

        let headers = miner().mine_chain(&f.genesis, 2);
        f.sync.handle_headers(headers.clone()).unwrap();
        assert!(f.sync.chain().is_syncing());
        let requests = f.network.header_requests.lock().clone();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[1][0], headers[1].hash());

        // Re-delivery of known headers does not move the tip.
        f.sync.handle_headers(headers).unwrap();
        assert!(!f.sync.chain().is_syncing());

        f.sync.start_sync().unwrap();
        f.sync.handle_headers(Vec::new()).unwrap();
        assert_eq!(f.sync.chain().state(), ChainMode::Waiting);
    }

    #[test]
    fn merkle_block_commits_matched_transactions() {
        let watched = Address([0x31; 21]);
        let f = fixture_with(RecordingHandler::watching(&[watched]), SyncSettings::default());
        f.sync.update_filter().unwrap();

        let funding = transaction(&[], &[watched], 50);
        let other = transaction(&[], &[Address([0x99; 21])], 7);
        let txids = [other.txid(), funding.txid()];

        let header = miner().mine_with_merkle_root(&f.genesis, merkle_root(&txids));
        f.sync.commit_headers(vec![header.clone()]).unwrap();

        let block = MerkleBlock::new(header.clone(), &txids, &[false, true]);
        let report = f.sync.handle_merkle_block(&block, &[funding.clone()]).unwrap();
        assert_eq!(report.height, 1);
        assert_eq!(report.matched, 1);
        assert_eq!(report.false_positives, 0);
        assert_eq!(*f.handler.committed.lock(), vec![(funding.txid(), 1)]);
        assert_eq!(*f.handler.blocks.lock(), vec![header.hash()]);

        // The local filter now follows the funding output.
        let spend = transaction(&[OutPoint::new(funding.txid(), 0)], &[Address([0x55; 21])], 49);
        assert!(f.sync.filter().match_tx(&spend));
    }

    #[test]
    fn merkle_block_for_unknown_header_rejected() {
        let f = fixture();
        let header = miner().mine_on(&f.genesis, 0);
        let block = MerkleBlock::new(header.clone(), &[Hash256([1; 32])], &[true]);
        assert_eq!(
            f.sync.handle_merkle_block(&block, &[]),
            Err(SyncError::UnknownBlock(header.hash()))
        );
    }

    #[test]
    fn merkle_root_mismatch_rejected() {
        let f = fixture();
        let header = miner().mine_on(&f.genesis, 0);
        f.sync.commit_headers(vec![header.clone()]).unwrap();
        let block = MerkleBlock::new(header, &[Hash256([1; 32]), Hash256([2; 32])], &[true, false]);
        assert_eq!(
            f.sync.handle_merkle_block(&block, &[]),
            Err(SyncError::Merkle(MerkleError::RootMismatch))
        );
        assert!(f.handler.committed.lock().is_empty());
    }

    #[test]
    fn missing_relayed_transaction_rejected() {
        let f = fixture();
        let tx = transaction(&[], &[Address([4; 21])], 1);
        let header = miner().mine_with_merkle_root(&f.genesis, tx.txid());
        f.sync.commit_headers(vec![header.clone()]).unwrap();
        let block = MerkleBlock::new(header, &[tx.txid()], &[true]);
        assert_eq!(
            f.sync.handle_merkle_block(&block, &[]),
            Err(SyncError::MissingTransaction(tx.txid()))
        );
    }

    #[test]
    fn false_positives_over_threshold_refresh_filter() {
        let settings = SyncSettings {
            max_false_positives: 1,
            ..SyncSettings::default()
        };
        let f = fixture_with(RecordingHandler::watching(&[Address([0x31; 21])]), settings);
        f.sync.update_filter().unwrap();

        let txs: Vec<Transaction> = (0..3u8)
            .map(|i| transaction(&[], &[Address([0x40 + i; 21])], 1))
            .collect();
        let txids: Vec<Hash256> = txs.iter().map(|tx| tx.txid()).collect();
        f.handler.not_mine.lock().extend(txids.iter().copied());

        let header = miner().mine_with_merkle_root(&f.genesis, merkle_root(&txids));
        f.sync.commit_headers(vec![header.clone()]).unwrap();

        let block = MerkleBlock::new(header, &txids, &[true, true, true]);
        let report = f.sync.handle_merkle_block(&block, &txs).unwrap();
        assert_eq!(report.false_positives, 3);
        assert!(report.filter_refreshed);
        assert_eq!(f.network.filter_loads.lock().len(), 2);
    }

    #[test]
    fn update_filter_broadcasts_watched_data() {
        let watched = Address([0x31; 21]);
        let f = fixture_with(RecordingHandler::watching(&[watched]), SyncSettings::default());
        f.sync.update_filter().unwrap();
        let loads = f.network.filter_loads.lock();
        assert_eq!(loads.len(), 1);
        let filter = BloomFilter::load(&loads[0].to_filter_load().unwrap()).unwrap();
        assert!(filter.contains(watched.as_bytes()));
    }

    #[test]
    fn watch_requires_loaded_filter() {
        let f = fixture();
        assert_eq!(
            f.sync.watch(b"item"),
            Err(SyncError::Filter(FilterError::NotLoaded))
        );
        f.sync.update_filter().unwrap();
        f.sync.watch(b"item").unwrap();
        assert_eq!(f.network.filter_adds.lock()[0].data, b"item".to_vec());
    }
}
