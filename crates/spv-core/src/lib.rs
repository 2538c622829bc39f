//! # spv-core
//! Header chain and transaction filter for SPV clients.
//!
//! Tracks a chain of merge-mined block headers without downloading blocks:
//! proof-of-work and cumulative-work checks, best-tip selection, rollback to
//! the fork point on reorganisation, and block locators. The BIP37 bloom
//! filter lets full peers relay only the transactions a wallet cares about.
//!
//! Persistence, peers and the wallet are reached through the traits in
//! [`store`] and [`traits`]; `spv-client` supplies RocksDB storage and the
//! sync orchestration on top.

pub mod blockchain;
pub mod bloom;
pub mod cache;
pub mod codec;
pub mod error;
pub mod genesis;
pub mod header;
pub mod merkle;
pub mod pow;
pub mod store;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
pub mod traits;
pub mod txfilter;
pub mod txtypes;
pub mod types;

pub use primitive_types;

pub use blockchain::{Blockchain, ChainMode, CommitOutcome};
pub use header::{Header, StoredHeader};
pub use store::{CachedHeaderStore, HeaderBackend, HeaderStore, MemoryBackend};
pub use txfilter::TxFilter;
pub use txtypes::TxTypesFilter;
pub use types::{Address, Hash256, OutPoint, Transaction};
