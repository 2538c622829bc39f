//! SPV service: wires storage, chain, filter and sync together and runs the
//! peer event loop.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use spv_core::genesis::foundation_address;
use spv_core::merkle::MerkleBlock;
use spv_core::store::HeaderStore;
use spv_core::traits::{PeerNetwork, SpvHandler};
use spv_core::{Blockchain, CachedHeaderStore, ChainMode, Hash256, Header, Transaction, TxFilter};

use crate::config::SpvConfig;
use crate::error::SyncError;
use crate::storage::RocksBackend;
use crate::sync::{SyncManager, SyncSettings};

/// Messages from the peer layer.
#[derive(Clone, Debug)]
pub enum PeerEvent {
    Headers(Vec<Header>),
    /// A merkle block and the transactions relayed with it.
    MerkleBlock {
        block: MerkleBlock,
        txs: Vec<Transaction>,
    },
    /// The consumer's watched set changed.
    ReloadFilter,
    PeerConnected,
    PeerDisconnected,
}

pub struct SpvService {
    sync: SyncManager,
    network: Arc<dyn PeerNetwork>,
    min_peers: usize,
}

impl SpvService {
    /// Open the service over the RocksDB header database in
    /// `config.db_path()`.
    pub fn open(
        config: &SpvConfig,
        handler: Arc<dyn SpvHandler>,
        network: Arc<dyn PeerNetwork>,
    ) -> Result<Self, SyncError> {
        let backend = RocksBackend::open(config.db_path())?;
        let store = CachedHeaderStore::new(backend, config.header_cache_capacity)?;
        Self::with_store(config, Box::new(store), handler, network)
    }

    /// Build the service over an existing header store.
    pub fn with_store(
        config: &SpvConfig,
        store: Box<dyn HeaderStore>,
        handler: Arc<dyn SpvHandler>,
        network: Arc<dyn PeerNetwork>,
    ) -> Result<Self, SyncError> {
        let foundation = foundation_address(&config.foundation)?;
        let chain = Arc::new(Blockchain::new(foundation, store)?);
        let sync = SyncManager::new(
            chain,
            Arc::new(TxFilter::new()),
            handler,
            Arc::clone(&network),
            SyncSettings::from(config),
        );
        Ok(Self {
            sync,
            network,
            min_peers: config.min_peers_for_sync,
        })
    }

    pub fn chain(&self) -> &Arc<Blockchain> {
        self.sync.chain()
    }

    pub fn sync(&self) -> &SyncManager {
        &self.sync
    }

    pub fn chain_state(&self) -> ChainMode {
        self.chain().state()
    }

    /// Rebuild the filter from the consumer's watched data and broadcast it.
    pub fn reload_filter(&self) -> Result<(), SyncError> {
        self.sync.update_filter()
    }

    /// Add one element (an address or an encoded outpoint) to the loaded
    /// filter and broadcast a `filteradd`.
    pub fn watch(&self, item: &[u8]) -> Result<(), SyncError> {
        self.sync.watch(item)
    }

    /// Relay `tx` to the peers and return its txid.
    pub fn send_transaction(&self, tx: &Transaction) -> Result<Hash256, SyncError> {
        let txid = tx.txid();
        self.network.broadcast_transaction(tx)?;
        info!(%txid, peers = self.network.peer_count(), "transaction sent");
        Ok(txid)
    }

    pub fn handle_event(&self, event: PeerEvent) -> Result<(), SyncError> {
        match event {
            PeerEvent::Headers(headers) => {
                let outcome = self.sync.handle_headers(headers)?;
                if let Some(from) = outcome.reorg_from {
                    info!(from, height = self.chain().height(), "reorganisation handled");
                }
            }
            PeerEvent::MerkleBlock { block, txs } => {
                self.sync.handle_merkle_block(&block, &txs)?;
            }
            PeerEvent::ReloadFilter => self.reload_filter()?,
            PeerEvent::PeerConnected => self.on_peer_connected()?,
            PeerEvent::PeerDisconnected => {
                let peers = self.network.peer_count();
                debug!(peers, "peer disconnected");
                if peers < self.min_peers && self.chain().is_syncing() {
                    info!(peers, min = self.min_peers, "too few peers, pausing sync");
                    self.chain().set_state(ChainMode::Waiting);
                }
            }
        }
        Ok(())
    }

    fn on_peer_connected(&self) -> Result<(), SyncError> {
        let peers = self.network.peer_count();
        debug!(peers, "peer connected");
        if !self.sync.filter().is_loaded() {
            self.sync.update_filter()?;
        }
        if peers >= self.min_peers && !self.chain().is_syncing() {
            self.sync.start_sync()?;
        }
        Ok(())
    }

    /// Process peer events until the channel closes, then flush the store.
    pub async fn run(&self, mut events: mpsc::Receiver<PeerEvent>) {
        info!(height = self.chain().height(), "spv service started");
        while let Some(event) = events.recv().await {
            if let Err(e) = self.handle_event(event) {
                warn!(error = %e, "peer event rejected");
            }
        }
        info!("peer event channel closed, shutting down");
        if let Err(e) = self.close() {
            warn!(error = %e, "failed to close header store");
        }
    }

    pub fn close(&self) -> Result<(), SyncError> {
        self.chain().close()?;
        Ok(())
    }
}
