//! Error types for the SPV header chain and transaction filter.
use thiserror::Error;

use crate::types::Hash256;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("unexpected end of input: needed {needed}, remaining {remaining}")] UnexpectedEof { needed: usize, remaining: usize },
    #[error("non-canonical var-int encoding")] NonCanonicalVarInt,
    #[error("length {len} exceeds maximum {max}")] LengthTooLarge { len: u64, max: u64 },
    #[error("{0} trailing bytes after record")] TrailingBytes(usize),
    #[error("invalid value: {0}")] InvalidValue(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AddressError {
    #[error("invalid base58: {0}")] InvalidBase58(String),
    #[error("invalid length: {0}")] InvalidLength(usize),
    #[error("invalid checksum")] InvalidChecksum,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PowError {
    #[error("block target difficulty is not positive")] NonPositiveTarget,
    #[error("block target difficulty is above the proof-of-work limit")] TargetAboveLimit,
    #[error("block hash is above the claimed target")] HashAboveTarget,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("header not found: {0}")] NotFound(Hash256),
    #[error("no chain tip stored")] NoTip,
    #[error("backend: {0}")] Backend(String),
    #[error("corrupt record: {0}")] Corrupt(String),
}

impl StoreError {
    /// Whether this error means "no such header" rather than an I/O failure.
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound(_) | StoreError::NoTip)
    }
}

impl From<CodecError> for StoreError {
    fn from(e: CodecError) -> Self {
        StoreError::Corrupt(e.to_string())
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChainError {
    #[error("invalid proof of work: {0}")] InvalidProofOfWork(#[from] PowError),
    #[error("header {0} does not extend any known header")] UnknownParent(Hash256),
    #[error("height mismatch: expected {expected}, got {got}")] HeightMismatch { expected: u32, got: u32 },
    #[error("no common ancestor between competing chains")] NoCommonAncestor,
    #[error("storage: {0}")] Storage(#[from] StoreError),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FilterError {
    #[error("filter not loaded")] NotLoaded,
    #[error("filter decode: {0}")] Codec(#[from] CodecError),
    #[error("filter too large: {size} > {max}")] TooLarge { size: usize, max: usize },
    #[error("too many hash functions: {count} > {max}")] TooManyHashFuncs { count: u32, max: u32 },
    #[error("unsupported filter type: {0}")] UnsupportedType(u8),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MerkleError {
    #[error("no transactions")] NoTransactions,
    #[error("too many hashes: {hashes} for {transactions} transactions")] TooManyHashes { hashes: usize, transactions: u32 },
    #[error("ran out of hashes")] NotEnoughHashes,
    #[error("ran out of flag bits")] NotEnoughBits,
    #[error("unconsumed hashes or flag bits")] UnconsumedData,
    #[error("duplicate sibling hash")] DuplicateSibling,
    #[error("merkle root does not match header")] RootMismatch,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NetworkError {
    #[error("no connected peers")] NoPeers,
    #[error("send failed: {0}")] SendFailed(String),
}

/// Failure reported by a consumer callback.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("handler: {0}")]
pub struct HandlerError(pub String);

#[derive(Error, Debug)]
pub enum SpvError {
    #[error(transparent)] Codec(#[from] CodecError),
    #[error(transparent)] Address(#[from] AddressError),
    #[error(transparent)] Chain(#[from] ChainError),
    #[error(transparent)] Store(#[from] StoreError),
    #[error(transparent)] Filter(#[from] FilterError),
    #[error(transparent)] Merkle(#[from] MerkleError),
    #[error(transparent)] Network(#[from] NetworkError),
    #[error(transparent)] Handler(#[from] HandlerError),
}
