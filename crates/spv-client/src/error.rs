//! Error types for the sync orchestrator, configuration and logging.
use thiserror::Error;

use spv_core::error::{
    AddressError, ChainError, FilterError, HandlerError, MerkleError, NetworkError, StoreError,
};
use spv_core::types::Hash256;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SyncError {
    #[error("chain: {0}")] Chain(#[from] ChainError),
    #[error("filter: {0}")] Filter(#[from] FilterError),
    #[error("merkle proof: {0}")] Merkle(#[from] MerkleError),
    #[error("network: {0}")] Network(#[from] NetworkError),
    #[error("storage: {0}")] Storage(#[from] StoreError),
    #[error("foundation address: {0}")] Foundation(#[from] AddressError),
    #[error("{0}")] Handler(#[from] HandlerError),
    #[error("rollback to height {height} not yet applied by handler")] RollbackPending { height: u32 },
    #[error("merkle block for unknown header {0}")] UnknownBlock(Hash256),
    #[error("transaction {0} missing from merkle block delivery")] MissingTransaction(Hash256),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("config load: {0}")] Load(#[from] ::config::ConfigError),
}

#[derive(Error, Debug)]
pub enum LoggingError {
    #[error("invalid log filter: {0}")] Filter(String),
    #[error("global subscriber already set: {0}")] AlreadySet(String),
}
