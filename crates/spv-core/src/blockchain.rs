//! Header-chain engine: proof-of-work check, cumulative work, best-tip
//! selection, fork-point detection and block locators.
//!
//! # Reorganisation
//!
//! A header whose cumulative work strictly exceeds the tip's but whose
//! parent is not the tip triggers a reorganisation. The engine does not
//! replay the winning branch: it moves the tip back to the common ancestor
//! and reports the old tip height as `reorg_from`. The caller rolls its own
//! state back and re-requests headers from the new locator, which
//! re-delivers the winning branch on top of the fork point.
//!
//! # Locking
//!
//! One [`RwLock`] guards the engine. [`Blockchain::commit_header`] holds it
//! exclusively for the whole commit; tip, height and locator reads share it.

use parking_lot::RwLock;
use primitive_types::U256;
use tracing::{debug, info, warn};

use crate::error::{ChainError, StoreError};
use crate::genesis;
use crate::header::{Header, StoredHeader};
use crate::pow::{calc_work, check_proof_of_work};
use crate::store::{HeaderLookup, HeaderStore};
use crate::types::{Address, Hash256};

/// Maximum number of hashes in a block locator.
pub const MAX_LOCATOR_HASHES: usize = 100;

/// Entries added at each spacing before the spacing doubles.
const LOCATOR_DENSE_RUN: u32 = 9;

/// Synchronisation mode of the chain.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum ChainMode {
    Syncing,
    #[default]
    Waiting,
}

impl std::fmt::Display for ChainMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChainMode::Syncing => f.write_str("SYNCING"),
            ChainMode::Waiting => f.write_str("WAITING"),
        }
    }
}

/// Result of [`Blockchain::commit_header`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct CommitOutcome {
    /// The chain tip moved (either to the header or back to a fork point).
    pub new_tip: bool,
    /// Height of the abandoned tip when a reorganisation happened.
    pub reorg_from: Option<u32>,
}

impl CommitOutcome {
    pub fn is_reorg(&self) -> bool {
        self.reorg_from.is_some()
    }
}

pub struct Blockchain {
    store: Box<dyn HeaderStore>,
    foundation: Address,
    mode: RwLock<ChainMode>,
}

impl Blockchain {
    /// Open the chain over `store`, installing genesis if no tip is stored.
    pub fn new(foundation: Address, store: Box<dyn HeaderStore>) -> Result<Self, ChainError> {
        let chain = Self {
            store,
            foundation,
            mode: RwLock::new(ChainMode::default()),
        };
        match chain.store.get_best() {
            Ok(tip) => {
                info!(height = tip.height(), hash = %tip.hash(), "loaded header chain");
            }
            Err(e) if e.is_not_found() => chain.install_genesis()?,
            Err(e) => return Err(e.into()),
        }
        Ok(chain)
    }

    fn install_genesis(&self) -> Result<(), ChainError> {
        let genesis = StoredHeader::new(genesis::genesis_header(&self.foundation), U256::zero());
        self.store.put(&genesis, true)?;
        info!(hash = %genesis.hash(), foundation = %self.foundation, "installed genesis header");
        Ok(())
    }

    /// Hash of this chain's genesis header.
    pub fn genesis_hash(&self) -> Hash256 {
        genesis::genesis_header(&self.foundation).hash()
    }

    pub fn set_state(&self, mode: ChainMode) {
        *self.mode.write() = mode;
    }

    pub fn state(&self) -> ChainMode {
        *self.mode.read()
    }

    pub fn is_syncing(&self) -> bool {
        *self.mode.read() == ChainMode::Syncing
    }

    /// Height of the tip, or 0 if the tip cannot be read.
    pub fn height(&self) -> u32 {
        let _guard = self.mode.read();
        self.chain_tip_locked().height()
    }

    /// The current tip, or the zero-work root if the tip cannot be read.
    pub fn chain_tip(&self) -> StoredHeader {
        let _guard = self.mode.read();
        self.chain_tip_locked()
    }

    fn chain_tip_locked(&self) -> StoredHeader {
        self.store
            .get_best()
            .unwrap_or_else(|_| StoredHeader::synthetic_root())
    }

    pub fn is_known_header(&self, hash: &Hash256) -> bool {
        self.store.get(hash).is_ok()
    }

    /// Validate and commit one header.
    ///
    /// 1. Check proof-of-work.
    /// 2. Resolve the parent, using the tip directly when it is the parent.
    /// 3. Re-delivery of the current tip is a no-op.
    /// 4. Cumulative work = parent work + own work.
    /// 5. More work than the tip (strictly) makes it the new best header.
    /// 6. If that header does not extend the tip, rewind the tip to the
    ///    common ancestor and report the old tip height; otherwise persist
    ///    the header (as tip if it won). A header whose stored ancestors
    ///    already lead back to the tip abandons nothing: it is stored as a
    ///    side header and no reorganisation is reported.
    pub fn commit_header(&self, header: Header) -> Result<CommitOutcome, ChainError> {
        check_proof_of_work(&header)?;

        let _guard = self.mode.write();

        let tip = self.store.get_best()?;
        let tip_hash = tip.hash();
        let hash = header.hash();

        let parent = if header.previous == tip_hash {
            tip.clone()
        } else {
            match self.store.get(&header.previous) {
                Ok(parent) => parent,
                Err(e) if e.is_not_found() => return Err(ChainError::UnknownParent(hash)),
                Err(e) => return Err(e.into()),
            }
        };

        if hash == tip_hash {
            debug!(%hash, "header is already the tip");
            return Ok(CommitOutcome::default());
        }

        let expected = parent.height() + 1;
        if header.height != expected {
            return Err(ChainError::HeightMismatch {
                expected,
                got: header.height,
            });
        }

        let total_work = parent.total_work.saturating_add(calc_work(header.bits));
        let stored = StoredHeader::new(header, total_work);

        if total_work <= tip.total_work {
            self.store.put(&stored, false)?;
            debug!(height = stored.height(), %hash, "stored side-branch header");
            return Ok(CommitOutcome::default());
        }

        if parent.hash() != tip_hash {
            let fork = find_common_ancestor(&*self.store, &stored, &tip)?;
            if fork.hash() == tip_hash {
                // Nothing to abandon: the branch already descends from the
                // tip and is re-walked from it in order.
                self.store.put(&stored, false)?;
                debug!(height = stored.height(), %hash, "stored header above the tip's stored branch");
                return Ok(CommitOutcome::default());
            }
            self.store.put(&fork, true)?;
            warn!(
                from = tip.height(),
                to = fork.height(),
                wiped = tip.height() - fork.height(),
                trigger = %hash,
                "chain reorganisation, rewound tip to fork point"
            );
            return Ok(CommitOutcome {
                new_tip: true,
                reorg_from: Some(tip.height()),
            });
        }

        self.store.put(&stored, true)?;
        debug!(height = stored.height(), %hash, "new chain tip");
        Ok(CommitOutcome {
            new_tip: true,
            reorg_from: None,
        })
    }

    /// Block locator for the current tip.
    pub fn locator(&self) -> Result<Vec<Hash256>, ChainError> {
        let _guard = self.mode.read();
        let tip = match self.store.get_best() {
            Ok(tip) => tip,
            Err(e) if e.is_not_found() => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        Ok(build_locator(&*self.store, &tip)?)
    }

    /// Drop every stored header and re-install genesis.
    pub fn reset(&self) -> Result<(), ChainError> {
        let _guard = self.mode.write();
        self.store.clear()?;
        info!("cleared header chain");
        self.install_genesis()
    }

    /// Flush the underlying store.
    pub fn close(&self) -> Result<(), ChainError> {
        let _guard = self.mode.write();
        self.store.close()?;
        debug!("header store closed");
        Ok(())
    }
}

/// Walk `n` parents back from `header`. `None` once the walk passes genesis.
fn rewind<L: HeaderLookup + ?Sized>(
    lookup: &L,
    mut header: StoredHeader,
    n: u32,
) -> Result<Option<StoredHeader>, StoreError> {
    for _ in 0..n {
        header = lookup.get_previous(&header)?;
        if header.is_synthetic_root() {
            return Ok(None);
        }
    }
    Ok(Some(header))
}

/// Build a locator starting at `tip`.
///
/// The first entries step back one header at a time; after every nine
/// steps the spacing doubles. Stops after [`MAX_LOCATOR_HASHES`] entries or
/// when the next step would pass genesis.
pub fn build_locator<L: HeaderLookup + ?Sized>(
    lookup: &L,
    tip: &StoredHeader,
) -> Result<Vec<Hash256>, StoreError> {
    let mut hashes = Vec::new();
    let mut cursor = tip.clone();
    let mut step = 1u32;
    let mut run = 0u32;
    loop {
        if run >= LOCATOR_DENSE_RUN {
            step = step.saturating_mul(2);
            run = 0;
        }
        hashes.push(cursor.hash());
        if hashes.len() >= MAX_LOCATOR_HASHES {
            break;
        }
        match rewind(lookup, cursor, step)? {
            Some(header) => cursor = header,
            None => break,
        }
        run += 1;
    }
    Ok(hashes)
}

/// Last header shared by the branches ending at `a` and `b`.
///
/// `a` need not be stored itself, only its ancestors. The higher branch is
/// first rewound to the other's height, then both step back together until
/// the hashes meet. Reaching the synthetic root means the branches share no
/// stored ancestor.
pub fn find_common_ancestor<L: HeaderLookup + ?Sized>(
    lookup: &L,
    a: &StoredHeader,
    b: &StoredHeader,
) -> Result<StoredHeader, ChainError> {
    let mut a = a.clone();
    let mut b = b.clone();
    while a.height() > b.height() {
        a = step_back(lookup, &a)?;
    }
    while b.height() > a.height() {
        b = step_back(lookup, &b)?;
    }
    while a.hash() != b.hash() {
        a = step_back(lookup, &a)?;
        b = step_back(lookup, &b)?;
    }
    Ok(a)
}

fn step_back<L: HeaderLookup + ?Sized>(
    lookup: &L,
    header: &StoredHeader,
) -> Result<StoredHeader, ChainError> {
    let parent = lookup.get_previous(header)?;
    if parent.is_synthetic_root() {
        return Err(ChainError::NoCommonAncestor);
    }
    Ok(parent)
}
