//! Genesis header derivation.
//!
//! The genesis header is not downloaded: every client derives it from the
//! network's foundation address. Its merkle root commits to a single
//! coinbase paying the initial supply to the foundation, so clients on
//! different networks build different (but individually deterministic)
//! chains.

use crate::error::AddressError;
use crate::header::{AuxPow, Header};
use crate::types::{Address, Hash256, OutPoint, Transaction, TxInput, TxOutput};

/// Foundation address used when none (or a malformed one) is configured.
pub const DEFAULT_FOUNDATION: &str = "8VYXVxKKSAxkmRrfmGpQR2Kc66XhG6m3ta";

/// Genesis timestamp: December 22, 2017 10:00:00 UTC.
pub const GENESIS_TIMESTAMP: u32 = 1_513_936_800;

pub const GENESIS_BITS: u32 = 0x1d03_ffff;

pub const GENESIS_NONCE: u32 = 2_083_236_893;

/// Initial supply paid to the foundation, in the smallest unit.
pub const GENESIS_SUPPLY: u64 = 3_300_000_000_000_000;

/// Resolve the configured foundation address.
///
/// Anything that is not exactly [`Address::ENCODED_LEN`] characters falls
/// back to [`DEFAULT_FOUNDATION`]; a string of the right length must still
/// be a valid base58check address.
pub fn foundation_address(configured: &str) -> Result<Address, AddressError> {
    if configured.len() == Address::ENCODED_LEN {
        Address::from_base58(configured)
    } else {
        Address::from_base58(DEFAULT_FOUNDATION)
    }
}

/// The coinbase committed to by the genesis header.
pub fn genesis_coinbase(foundation: &Address) -> Transaction {
    Transaction {
        version: 0,
        inputs: vec![TxInput {
            previous_output: OutPoint::new(Hash256::ZERO, u16::MAX),
            sequence: u32::MAX,
        }],
        outputs: vec![TxOutput {
            value: GENESIS_SUPPLY,
            address: *foundation,
        }],
        lock_time: 0,
    }
}

/// Build the genesis header (height 0, no parent) for a foundation address.
pub fn genesis_header(foundation: &Address) -> Header {
    Header {
        version: 0,
        previous: Hash256::ZERO,
        merkle_root: genesis_coinbase(foundation).txid(),
        timestamp: GENESIS_TIMESTAMP,
        bits: GENESIS_BITS,
        nonce: GENESIS_NONCE,
        height: 0,
        aux_pow: AuxPow::default(),
    }
}
